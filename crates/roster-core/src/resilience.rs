use crate::store::StateStore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_RESOLVE_DELAY: Duration = Duration::from_secs(10);
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Connection control exposed by the network client.
pub trait Connector: Send + Sync + 'static {
    /// True while an attempt is outstanding or the link is up.
    fn is_connecting(&self) -> bool;
    fn request_connect(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSignal {
    Disconnected,
    Reconnecting,
    Reconnected,
}

impl ConnectionSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionSignal::Disconnected => "disconnected",
            ConnectionSignal::Reconnecting => "reconnecting",
            ConnectionSignal::Reconnected => "reconnected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
    Retrying,
}

#[derive(Debug, Clone, Copy)]
pub struct ResilienceConfig {
    pub retry_delay: Duration,
    pub resolve_delay: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            resolve_delay: DEFAULT_RESOLVE_DELAY,
        }
    }
}

struct SupervisorInner {
    state: LinkState,
    /// Cleared by the retry task under this lock when it decides to exit.
    retrying: bool,
    retry_task: Option<JoinHandle<()>>,
}

/// Restores connectivity after a drop. At most one retry loop runs at a time.
pub struct ConnectionSupervisor {
    store: Arc<StateStore>,
    connector: Arc<dyn Connector>,
    config: ResilienceConfig,
    signals: mpsc::UnboundedSender<ConnectionSignal>,
    shutdown: watch::Receiver<bool>,
    inner: Mutex<SupervisorInner>,
}

impl ConnectionSupervisor {
    pub fn new(
        store: Arc<StateStore>,
        connector: Arc<dyn Connector>,
        config: ResilienceConfig,
        signals: mpsc::UnboundedSender<ConnectionSignal>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            connector,
            config,
            signals,
            shutdown,
            inner: Mutex::new(SupervisorInner {
                state: LinkState::Disconnected,
                retrying: false,
                retry_task: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, signal: ConnectionSignal) {
        info!(event = "connection_signal", signal = signal.as_str());
        let _ = self.signals.send(signal);
    }

    fn is_running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    pub fn is_retrying(&self) -> bool {
        self.lock().retrying
    }

    pub fn on_connected(&self) {
        self.store.set_connected(true);
        let previous = {
            let mut inner = self.lock();
            std::mem::replace(&mut inner.state, LinkState::Connected)
        };
        if previous != LinkState::Connected {
            self.emit(ConnectionSignal::Reconnected);
        }
    }

    pub fn on_disconnected(self: &Arc<Self>) {
        self.store.set_connected(false);
        let mut inner = self.lock();
        let previous = inner.state;
        if previous == LinkState::Connected {
            inner.state = LinkState::Disconnected;
            self.emit(ConnectionSignal::Disconnected);
        }
        if !self.is_running() {
            debug!(event = "reconnect_skipped", reason = "shutting_down");
            return;
        }
        if inner.retrying {
            // The running loop re-checks the link before it exits.
            if previous != LinkState::Retrying {
                inner.state = LinkState::Retrying;
                drop(inner);
                self.emit(ConnectionSignal::Reconnecting);
            } else {
                debug!(event = "reconnect_already_running");
            }
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                warn!(event = "reconnect_unavailable", error = %err);
                return;
            }
        };
        inner.state = LinkState::Retrying;
        inner.retrying = true;
        inner.retry_task = Some(handle.spawn(Arc::clone(self).retry_loop()));
        drop(inner);
        self.emit(ConnectionSignal::Reconnecting);
    }

    async fn retry_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.clone();
        let mut attempt: u64 = 0;
        loop {
            if !self.store.is_connected() && !*shutdown.borrow() {
                if !wait_or_cancel(self.config.retry_delay, &mut shutdown).await {
                    continue;
                }
                if !self.store.is_connected() {
                    if self.connector.is_connecting() {
                        debug!(event = "reconnect_pending");
                    } else {
                        attempt += 1;
                        info!(event = "reconnect_attempt", attempt);
                        self.connector.request_connect();
                    }
                    wait_or_cancel(self.config.resolve_delay, &mut shutdown).await;
                    continue;
                }
            }

            // Exit is decided under the lock so a disconnect arriving now
            // either sees `retrying == false` or is seen here.
            let exit = {
                let mut inner = self.lock();
                if !self.store.is_connected() && self.is_running() {
                    false
                } else {
                    inner.retrying = false;
                    if inner.state == LinkState::Retrying {
                        inner.state = if self.store.is_connected() {
                            LinkState::Connected
                        } else {
                            LinkState::Disconnected
                        };
                    }
                    true
                }
            };
            if exit {
                break;
            }
        }
        debug!(event = "reconnect_loop_exit", attempts = attempt);
    }

    /// Waits for the retry loop after shutdown has been signalled. The task
    /// is aborted if it does not finish within a short grace period.
    pub async fn wait_stopped(&self) {
        let task = self.lock().retry_task.take();
        let Some(mut task) = task else {
            return;
        };
        if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
            warn!(event = "reconnect_loop_abort");
            task.abort();
            self.lock().retrying = false;
        }
    }
}

/// Sleeps for `delay`; returns false as soon as shutdown is requested.
async fn wait_or_cancel(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let deadline = tokio::time::sleep(delay);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return true,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeConnector {
        connecting: AtomicBool,
        requests: AtomicUsize,
    }

    impl Connector for FakeConnector {
        fn is_connecting(&self) -> bool {
            self.connecting.load(Ordering::SeqCst)
        }

        fn request_connect(&self) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        store: Arc<StateStore>,
        connector: Arc<FakeConnector>,
        supervisor: Arc<ConnectionSupervisor>,
        signals: mpsc::UnboundedReceiver<ConnectionSignal>,
        shutdown: watch::Sender<bool>,
    }

    fn harness(retry: u64, resolve: u64) -> Harness {
        let store = Arc::new(StateStore::new());
        let connector = Arc::new(FakeConnector::default());
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&store),
            connector.clone(),
            ResilienceConfig {
                retry_delay: Duration::from_millis(retry),
                resolve_delay: Duration::from_millis(resolve),
            },
            signal_tx,
            shutdown_rx,
        );
        Harness {
            store,
            connector,
            supervisor,
            signals,
            shutdown,
        }
    }

    fn drain(signals: &mut mpsc::UnboundedReceiver<ConnectionSignal>) -> Vec<ConnectionSignal> {
        let mut seen = Vec::new();
        while let Ok(signal) = signals.try_recv() {
            seen.push(signal);
        }
        seen
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_disconnect_does_not_restart_loop() {
        let mut h = harness(5_000, 5_000);
        h.supervisor.on_connected();
        h.supervisor.on_disconnected();
        h.supervisor.on_disconnected();

        let seen = drain(&mut h.signals);
        let reconnecting = seen
            .iter()
            .filter(|signal| **signal == ConnectionSignal::Reconnecting)
            .count();
        assert_eq!(reconnecting, 1, "{seen:?}");
        assert_eq!(h.supervisor.state(), LinkState::Retrying);
        assert!(h.supervisor.is_retrying());

        h.shutdown.send(true).expect("shutdown");
        h.supervisor.wait_stopped().await;
        assert!(!h.supervisor.is_retrying());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loop_requests_connect_until_connected() {
        let mut h = harness(10, 10);
        h.supervisor.on_disconnected();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(h.connector.requests.load(Ordering::SeqCst) >= 2);

        h.supervisor.on_connected();
        tokio::time::sleep(Duration::from_millis(60)).await;
        let settled = h.connector.requests.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(h.connector.requests.load(Ordering::SeqCst), settled);
        assert!(!h.supervisor.is_retrying());
        assert_eq!(h.supervisor.state(), LinkState::Connected);
        assert!(drain(&mut h.signals).contains(&ConnectionSignal::Reconnected));
        assert!(h.store.is_connected());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drop_during_resolve_window_keeps_retrying() {
        let mut h = harness(10, 150);
        h.supervisor.on_connected();
        drain(&mut h.signals);

        h.supervisor.on_disconnected();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.connector.requests.load(Ordering::SeqCst), 1);

        h.supervisor.on_connected();
        h.supervisor.on_disconnected();
        assert_eq!(h.supervisor.state(), LinkState::Retrying);
        assert!(h.supervisor.is_retrying());
        assert_eq!(
            drain(&mut h.signals),
            vec![
                ConnectionSignal::Disconnected,
                ConnectionSignal::Reconnecting,
                ConnectionSignal::Reconnected,
                ConnectionSignal::Disconnected,
                ConnectionSignal::Reconnecting,
            ]
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(h.connector.requests.load(Ordering::SeqCst) >= 2);
        assert_eq!(h.supervisor.state(), LinkState::Retrying);

        h.shutdown.send(true).expect("shutdown");
        h.supervisor.wait_stopped().await;
        assert!(!h.supervisor.is_retrying());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn outstanding_attempt_is_not_duplicated() {
        let h = harness(10, 10);
        h.connector.connecting.store(true, Ordering::SeqCst);
        h.supervisor.on_disconnected();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(h.connector.requests.load(Ordering::SeqCst), 0);

        h.shutdown.send(true).expect("shutdown");
        h.supervisor.wait_stopped().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_interrupts_pending_delay() {
        let h = harness(60_000, 60_000);
        h.supervisor.on_disconnected();
        assert!(h.supervisor.is_retrying());

        h.shutdown.send(true).expect("shutdown");
        let stopped = tokio::time::timeout(Duration::from_secs(1), h.supervisor.wait_stopped()).await;
        assert!(stopped.is_ok());
        assert_eq!(h.connector.requests.load(Ordering::SeqCst), 0);
        assert_eq!(h.supervisor.state(), LinkState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn no_retry_after_shutdown() {
        let mut h = harness(10, 10);
        h.shutdown.send(true).expect("shutdown");
        h.supervisor.on_disconnected();
        assert!(!h.supervisor.is_retrying());
        assert!(!drain(&mut h.signals).contains(&ConnectionSignal::Reconnecting));
        assert!(!h.store.is_connected());
    }
}
