use clap::Parser;
use roster_core::resilience::ResilienceConfig;
use roster_core::scheduler::{SchedulerConfig, DEFAULT_RESERVED_ROWS};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub socket_path: PathBuf,
    pub client_id: String,
    pub refresh_interval: Duration,
    pub retry_delay: Duration,
    pub resolve_delay: Duration,
    pub reserved_rows: usize,
    pub log_dir: Option<PathBuf>,
    pub debug: bool,
}

impl Config {
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick: self.refresh_interval,
            reserved_rows: self.reserved_rows,
        }
    }

    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig {
            retry_delay: self.retry_delay,
            resolve_delay: self.resolve_delay,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "roster-dash", about = "Live friends roster for the terminal")]
pub struct Args {
    /// Presence bridge socket; defaults to $ROSTER_SOCK or the runtime dir.
    #[arg(long, default_value = "")]
    pub socket: String,
    #[arg(long, default_value_t = 30)]
    pub refresh_secs: u64,
    #[arg(long, default_value_t = 5)]
    pub reconnect_delay_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub reconnect_resolve_secs: u64,
    #[arg(long, default_value_t = DEFAULT_RESERVED_ROWS)]
    pub reserved_rows: usize,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

pub fn load_config(args: Args) -> Config {
    Config {
        socket_path: resolve_socket_path(&args.socket),
        client_id: format!("roster-dash-{}", std::process::id()),
        refresh_interval: Duration::from_secs(args.refresh_secs.max(1)),
        retry_delay: Duration::from_secs(args.reconnect_delay_secs.max(1)),
        resolve_delay: Duration::from_secs(args.reconnect_resolve_secs.max(1)),
        reserved_rows: args.reserved_rows,
        log_dir: resolve_log_dir(&args.log_dir),
        debug: args.debug || env_true("ROSTER_DEBUG"),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => parse_bool_flag(&value).unwrap_or(false),
        Err(_) => false,
    }
}

fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn resolve_socket_path(flag: &str) -> PathBuf {
    if !flag.trim().is_empty() {
        return PathBuf::from(flag);
    }
    if let Some(value) = non_empty_env("ROSTER_SOCK") {
        return PathBuf::from(value);
    }
    let runtime_dir = if let Some(value) = non_empty_env("XDG_RUNTIME_DIR") {
        PathBuf::from(value)
    } else if let Some(uid) = non_empty_env("UID") {
        PathBuf::from(format!("/run/user/{uid}"))
    } else {
        PathBuf::from("/tmp")
    };
    runtime_dir.join("roster").join("presence.sock")
}

fn resolve_log_dir(flag: &str) -> Option<PathBuf> {
    if !flag.trim().is_empty() {
        return Some(PathBuf::from(flag));
    }
    if let Some(value) = non_empty_env("ROSTER_LOG_DIR") {
        return Some(PathBuf::from(value));
    }
    non_empty_env("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| non_empty_env("HOME").map(|home| PathBuf::from(home).join(".local/state")))
        .map(|base| base.join("roster"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_flags_accept_common_spellings() {
        assert_eq!(parse_bool_flag(" YES "), Some(true));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }

    #[test]
    fn explicit_flags_win_over_environment() {
        let args = Args::parse_from([
            "roster-dash",
            "--socket",
            "/tmp/custom.sock",
            "--refresh-secs",
            "0",
            "--reserved-rows",
            "9",
            "--log-dir",
            "/tmp/roster-logs",
        ]);
        let config = load_config(args);
        assert_eq!(config.socket_path, PathBuf::from("/tmp/custom.sock"));
        assert_eq!(config.refresh_interval, Duration::from_secs(1));
        assert_eq!(config.reserved_rows, 9);
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/roster-logs")));
        assert_eq!(config.scheduler().reserved_rows, 9);
    }

    #[test]
    fn defaults_match_documented_intervals() {
        let config = load_config(Args::parse_from(["roster-dash", "--socket", "/tmp/x.sock"]));
        assert_eq!(config.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.resilience().retry_delay, Duration::from_secs(5));
        assert_eq!(config.resilience().resolve_delay, Duration::from_secs(10));
        assert_eq!(config.reserved_rows, DEFAULT_RESERVED_ROWS);
    }
}
