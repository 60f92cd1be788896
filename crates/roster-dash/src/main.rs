mod bridge;
mod config;
mod input;
mod logging;
mod theme;
mod ui;

use anyhow::Result;
use bridge::BridgeClient;
use clap::Parser;
use crossterm::event::EventStream;
use futures_util::StreamExt;
use input::InputAction;
use roster_core::directory::RelationshipDirectory;
use roster_core::fingerprint::FingerprintTracker;
use roster_core::handler::{HandleOutcome, PresenceEvent, PresenceHandler};
use roster_core::resilience::{ConnectionSignal, ConnectionSupervisor, Connector};
use roster_core::roster::AppInfoRequester;
use roster_core::scheduler::{render_channel, RefreshScheduler, RenderReason, RenderTrigger, DEFAULT_TRIGGER_CAPACITY};
use roster_core::store::StateStore;
use roster_core::viewport::{apply_command, CommandOutcome, ViewportManager};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

const EVENT_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config(config::Args::parse());
    let log_guard = logging::init_logging(&config);
    info!(
        event = "dashboard_start",
        file_logging = log_guard.is_file_backed(),
        socket = %config.socket_path.display(),
        refresh_secs = config.refresh_interval.as_secs(),
        reserved_rows = config.reserved_rows
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let store = Arc::new(StateStore::new());
    let directory = Arc::new(RelationshipDirectory::new());
    let viewport = Arc::new(ViewportManager::new());

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let bridge = BridgeClient::new(
        config.socket_path.clone(),
        config.client_id.clone(),
        event_tx,
        shutdown_rx.clone(),
    );
    let connector: Arc<dyn Connector> = Arc::new(bridge.clone());
    let requester: Arc<dyn AppInfoRequester> = Arc::new(bridge);

    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let supervisor = ConnectionSupervisor::new(
        Arc::clone(&store),
        Arc::clone(&connector),
        config.resilience(),
        signal_tx,
        shutdown_rx.clone(),
    );
    let (trigger, render_rx) = render_channel(DEFAULT_TRIGGER_CAPACITY);
    let handler = PresenceHandler::new(
        Arc::clone(&store),
        Arc::clone(&directory),
        Arc::clone(&supervisor),
        Arc::clone(&requester),
        trigger.clone(),
    );

    let terminal = ui::setup_terminal()?;
    let sink = ui::TerminalSink::new(terminal, config.reserved_rows);
    let scheduler = RefreshScheduler::new(
        store,
        directory,
        Arc::clone(&viewport),
        Arc::new(FingerprintTracker::new()),
        requester,
        sink,
        config.scheduler(),
    );
    let scheduler_task = tokio::spawn(scheduler.run(render_rx, shutdown_rx));

    trigger.request(RenderReason::Initial);
    connector.request_connect();

    let reason = run_event_loop(&handler, &viewport, &trigger, event_rx, signal_rx).await;
    info!(event = "dashboard_stop", reason);

    let _ = shutdown_tx.send(true);
    supervisor.wait_stopped().await;
    if let Err(err) = scheduler_task.await {
        error!(event = "scheduler_join_error", error = %err);
    }
    ui::restore_terminal()?;
    Ok(())
}

async fn run_event_loop(
    handler: &PresenceHandler,
    viewport: &ViewportManager,
    trigger: &RenderTrigger,
    mut event_rx: mpsc::Receiver<PresenceEvent>,
    mut signal_rx: mpsc::UnboundedReceiver<ConnectionSignal>,
) -> &'static str {
    let mut events = EventStream::new();
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match handler.handle(event) {
                    HandleOutcome::Continue => {}
                    HandleOutcome::AuthenticationFailed => {
                        warn!(event = "session_unauthenticated");
                    }
                    HandleOutcome::Shutdown => return "session_ended",
                }
            }
            Some(signal) = signal_rx.recv() => {
                debug!(event = "connection_lifecycle", signal = signal.as_str());
                trigger.request(RenderReason::ConnectionChanged);
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(event)) => match input::action_for(&event, viewport.capacity()) {
                        Some(InputAction::Resize) => trigger.request(RenderReason::Resize),
                        Some(InputAction::Command(command)) => match apply_command(viewport, command) {
                            CommandOutcome::Exit => return "user_exit",
                            CommandOutcome::Scrolled => trigger.request(RenderReason::Scrolled),
                            CommandOutcome::Unchanged => {}
                        },
                        None => {}
                    },
                    Some(Err(err)) => {
                        warn!(event = "terminal_input_error", error = %err);
                    }
                    None => return "input_closed",
                }
            }
            _ = tokio::signal::ctrl_c() => return "interrupted",
        }
    }
}
