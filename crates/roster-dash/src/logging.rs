use crate::config::Config;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

/// Keeps the log file open for the lifetime of the process.
pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
}

impl LogGuard {
    pub fn is_file_backed(&self) -> bool {
        self.file.is_some()
    }
}

struct FileWriter {
    file: Option<Arc<Mutex<File>>>,
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = &self.file {
            file.lock().unwrap_or_else(PoisonError::into_inner).flush()?;
        }
        Ok(())
    }
}

pub fn open_log_file(log_dir: Option<&Path>) -> io::Result<LogGuard> {
    let Some(dir) = log_dir else {
        return Ok(LogGuard { file: None });
    };
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("roster-dash-{}.log", std::process::id()));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn filter_level(config: &Config) -> String {
    if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("ROSTER_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    }
}

/// The terminal belongs to the dashboard, so logs go to a file or nowhere.
pub fn init_logging(config: &Config) -> LogGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_level(config)));
    let guard = open_log_file(config.log_dir.as_deref()).unwrap_or(LogGuard { file: None });
    let file = guard.file.clone();
    let make_writer = BoxMakeWriter::new(move || FileWriter { file: file.clone() });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .try_init();
    guard
}
