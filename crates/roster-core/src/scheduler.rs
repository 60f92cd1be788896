use crate::directory::RelationshipDirectory;
use crate::fingerprint::{Fingerprint, FingerprintTracker};
use crate::layout::{compose_frame, DashboardFrame, RenderError};
use crate::roster::{build_at, count_relationships, AppInfoRequester};
use crate::store::StateStore;
use crate::viewport::{visible_capacity, ViewportManager};
use crate::{Contact, RelationshipCounts};
use chrono::{DateTime, Utc};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub const DEFAULT_TICK: Duration = Duration::from_secs(30);
pub const DEFAULT_RESERVED_ROWS: usize = 7;
pub const DEFAULT_TRIGGER_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderReason {
    Initial,
    RosterReplaced,
    Resize,
    ConnectionChanged,
    PersonaChanged,
    AppInfoResolved,
    Scrolled,
}

impl RenderReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderReason::Initial => "initial",
            RenderReason::RosterReplaced => "roster_replaced",
            RenderReason::Resize => "resize",
            RenderReason::ConnectionChanged => "connection_changed",
            RenderReason::PersonaChanged => "persona_changed",
            RenderReason::AppInfoResolved => "app_info_resolved",
            RenderReason::Scrolled => "scrolled",
        }
    }

    pub fn resets_scroll(&self) -> bool {
        matches!(self, RenderReason::RosterReplaced | RenderReason::Resize)
    }
}

/// Producer side of the render request queue. Cheap to clone; never blocks.
#[derive(Debug, Clone)]
pub struct RenderTrigger {
    tx: mpsc::Sender<RenderReason>,
    reset_pending: Arc<AtomicBool>,
}

impl RenderTrigger {
    pub fn request(&self, reason: RenderReason) {
        if reason.resets_scroll() {
            self.reset_pending.store(true, Ordering::SeqCst);
        }
        match self.tx.try_send(reason) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(event = "render_coalesced", reason = reason.as_str());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(event = "render_dropped", reason = reason.as_str());
            }
        }
    }
}

/// Consumer side of the render request queue. A scroll reset requested while
/// the queue was full is remembered here.
#[derive(Debug)]
pub struct RenderQueue {
    rx: mpsc::Receiver<RenderReason>,
    reset_pending: Arc<AtomicBool>,
}

impl RenderQueue {
    pub async fn recv(&mut self) -> Option<RenderReason> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RenderReason> {
        self.rx.try_recv().ok()
    }

    pub fn take_reset(&self) -> bool {
        self.reset_pending.swap(false, Ordering::SeqCst)
    }
}

pub fn render_channel(capacity: usize) -> (RenderTrigger, RenderQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let reset_pending = Arc::new(AtomicBool::new(false));
    (
        RenderTrigger {
            tx,
            reset_pending: Arc::clone(&reset_pending),
        },
        RenderQueue { rx, reset_pending },
    )
}

/// Rendering collaborator. A failed render leaves the previous frame visible.
pub trait RenderSink: Send {
    fn rows(&self) -> u16;
    fn render(&mut self, frame: &DashboardFrame) -> Result<(), RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Rendering,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub reserved_rows: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            reserved_rows: DEFAULT_RESERVED_ROWS,
        }
    }
}

/// Read-only view of scheduler progress, shareable with other tasks.
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    state: Arc<Mutex<SchedulerState>>,
    passes: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
}

impl SchedulerStatus {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState::Idle)),
            passes: Arc::new(AtomicU64::new(0)),
            skipped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SchedulerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn pass_count(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    pub fn failed_count(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }
}

struct RosterSnapshot {
    counts: RelationshipCounts,
    contacts: Vec<Contact>,
}

/// Owns the render state machine. Runs as a single task so passes never
/// overlap.
pub struct RefreshScheduler<S> {
    store: Arc<StateStore>,
    directory: Arc<RelationshipDirectory>,
    viewport: Arc<ViewportManager>,
    fingerprint: Arc<FingerprintTracker>,
    requester: Arc<dyn AppInfoRequester>,
    sink: S,
    config: SchedulerConfig,
    status: SchedulerStatus,
}

impl<S: RenderSink> RefreshScheduler<S> {
    pub fn new(
        store: Arc<StateStore>,
        directory: Arc<RelationshipDirectory>,
        viewport: Arc<ViewportManager>,
        fingerprint: Arc<FingerprintTracker>,
        requester: Arc<dyn AppInfoRequester>,
        sink: S,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            directory,
            viewport,
            fingerprint,
            requester,
            sink,
            config,
            status: SchedulerStatus::new(),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.clone()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn snapshot(&self, now: DateTime<Utc>) -> RosterSnapshot {
        let relationships = self.directory.snapshot();
        let counts = count_relationships(&relationships);
        let contacts = build_at(&relationships, &self.store, self.requester.as_ref(), now);
        RosterSnapshot { counts, contacts }
    }

    /// Event-driven pass: always renders.
    pub fn render_now(&mut self, reasons: &[RenderReason]) {
        let reset_scroll = reasons.iter().any(RenderReason::resets_scroll);
        self.render_pass(reset_scroll);
    }

    fn render_pass(&mut self, reset_scroll: bool) {
        let now = Utc::now();
        self.status.set_state(SchedulerState::Rendering);
        let snapshot = self.snapshot(now);
        let (_, fingerprint) = self
            .fingerprint
            .evaluate_at(&self.store, &snapshot.contacts, now);
        self.render_snapshot(snapshot, fingerprint, reset_scroll, now);
        self.status.set_state(SchedulerState::Idle);
    }

    /// Periodic pass: renders only when time-derived text changed since the
    /// last frame that reached the sink. Returns whether a pass was attempted.
    pub fn on_tick(&mut self) -> bool {
        let now = Utc::now();
        let snapshot = self.snapshot(now);
        let (decision, fingerprint) = self
            .fingerprint
            .evaluate_at(&self.store, &snapshot.contacts, now);
        if !decision.refresh {
            return false;
        }
        debug!(event = "tick_refresh", reasons = ?decision.reasons);
        self.status.set_state(SchedulerState::Rendering);
        self.render_snapshot(snapshot, fingerprint, false, now);
        self.status.set_state(SchedulerState::Idle);
        true
    }

    fn render_snapshot(
        &mut self,
        snapshot: RosterSnapshot,
        fingerprint: Fingerprint,
        reset_scroll: bool,
        now: DateTime<Utc>,
    ) {
        let banner_rows = usize::from(!self.store.is_connected());
        let reserved = self.config.reserved_rows + banner_rows;
        let capacity = visible_capacity(usize::from(self.sink.rows()), reserved);
        self.viewport
            .update_counts(snapshot.contacts.len(), capacity, reset_scroll);

        let frame = compose_frame(
            &self.store,
            snapshot.counts,
            &snapshot.contacts,
            self.viewport.snapshot(),
            now,
        );
        let sink = &mut self.sink;
        match panic::catch_unwind(AssertUnwindSafe(|| sink.render(&frame))) {
            Ok(Ok(())) => {
                self.fingerprint.commit(fingerprint);
                self.status.passes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(err)) => {
                self.status.skipped.fetch_add(1, Ordering::SeqCst);
                warn!(event = "render_skipped", error = %err);
            }
            Err(payload) => {
                self.status.skipped.fetch_add(1, Ordering::SeqCst);
                warn!(event = "render_panicked", error = panic_message(payload.as_ref()));
            }
        }
    }

    /// Drives passes until shutdown, then hands the sink back.
    pub async fn run(mut self, mut requests: RenderQueue, mut shutdown: watch::Receiver<bool>) -> S {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.config.tick, self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                request = requests.recv() => {
                    let Some(first) = request else {
                        break;
                    };
                    self.status.set_state(SchedulerState::Scheduled);
                    let mut reasons = vec![first];
                    while let Some(next) = requests.try_recv() {
                        reasons.push(next);
                    }
                    if reasons.len() > 1 {
                        debug!(event = "render_batched", count = reasons.len());
                    }
                    let reset_scroll =
                        requests.take_reset() || reasons.iter().any(RenderReason::resets_scroll);
                    self.render_pass(reset_scroll);
                }
                _ = ticker.tick() => {
                    self.on_tick();
                }
            }
        }
        self.status.set_state(SchedulerState::Idle);
        debug!(event = "scheduler_stopped", passes = self.status.pass_count());
        self.sink
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text
    } else {
        "non-string panic"
    }
}
