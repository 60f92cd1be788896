use roster_core::handler::PresenceEvent;
use roster_core::presence_ipc::{
    AppInfoRequestPayload, HelloPayload, PresenceEnvelope, PresenceMsg,
};
use roster_core::resilience::Connector;
use roster_core::roster::AppInfoRequester;
use roster_core::AppId;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Client for the local presence bridge. Connects only when asked; the
/// resilience loop decides when to retry.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    socket_path: PathBuf,
    client_id: String,
    events: mpsc::Sender<PresenceEvent>,
    outbound: Mutex<Option<mpsc::UnboundedSender<PresenceMsg>>>,
    unsent: Mutex<Vec<AppId>>,
    connecting: AtomicBool,
    shutdown: watch::Receiver<bool>,
}

impl BridgeClient {
    pub fn new(
        socket_path: PathBuf,
        client_id: String,
        events: mpsc::Sender<PresenceEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                socket_path,
                client_id,
                events,
                outbound: Mutex::new(None),
                unsent: Mutex::new(Vec::new()),
                connecting: AtomicBool::new(false),
                shutdown,
            }),
        }
    }
}

impl BridgeInner {
    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<PresenceMsg>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsent(&self) -> MutexGuard<'_, Vec<AppId>> {
        self.unsent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_app_request(&self, app_ids: Vec<AppId>) {
        let sender = self.outbound().clone();
        let msg = PresenceMsg::AppInfoRequest(AppInfoRequestPayload {
            app_ids: app_ids.clone(),
        });
        match sender {
            Some(tx) if tx.send(msg).is_ok() => {}
            _ => {
                debug!(event = "bridge_request_deferred", count = app_ids.len());
                self.unsent().extend(app_ids);
            }
        }
    }

    /// Keeps app lookups that never reached the socket for the next link.
    fn requeue(&self, msg: PresenceMsg) {
        if let PresenceMsg::AppInfoRequest(payload) = msg {
            self.unsent().extend(payload.app_ids);
        }
    }

    fn flush_unsent(&self) {
        let pending = std::mem::take(&mut *self.unsent());
        if !pending.is_empty() {
            self.queue_app_request(pending);
        }
    }

    fn hello(&self) -> PresenceEnvelope {
        PresenceEnvelope::new(
            self.client_id.clone(),
            PresenceMsg::Hello(HelloPayload {
                client_id: self.client_id.clone(),
                role: "dashboard".to_string(),
                capabilities: vec!["app_info_request".to_string()],
            }),
        )
    }

    fn is_stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn link_lost(&self) {
        self.outbound().take();
        self.connecting.store(false, Ordering::SeqCst);
        if self.is_stopping() {
            return;
        }
        let _ = self.events.send(PresenceEvent::Disconnected).await;
    }
}

impl Connector for BridgeClient {
    fn is_connecting(&self) -> bool {
        self.inner.connecting.load(Ordering::SeqCst)
    }

    fn request_connect(&self) {
        if self.inner.connecting.swap(true, Ordering::SeqCst) {
            debug!(event = "bridge_connect_pending");
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run_link(Arc::clone(&self.inner)));
            }
            Err(err) => {
                self.inner.connecting.store(false, Ordering::SeqCst);
                warn!(event = "bridge_connect_unavailable", error = %err);
            }
        }
    }
}

impl AppInfoRequester for BridgeClient {
    fn request_app_info(&self, app_id: AppId) {
        self.inner.queue_app_request(vec![app_id]);
    }
}

#[cfg(not(unix))]
async fn run_link(inner: Arc<BridgeInner>) {
    warn!(event = "bridge_unsupported_platform");
    inner.link_lost().await;
}

#[cfg(unix)]
async fn run_link(inner: Arc<BridgeInner>) {
    use roster_core::presence_ipc::{
        encode_frame, PresenceFrameDecoder, DEFAULT_MAX_FRAME_BYTES,
    };
    use std::io;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    async fn send_envelope(
        writer: &mut tokio::net::unix::OwnedWriteHalf,
        envelope: &PresenceEnvelope,
    ) -> io::Result<()> {
        let frame = encode_frame(envelope, DEFAULT_MAX_FRAME_BYTES)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        writer.write_all(&frame).await?;
        writer.flush().await
    }

    async fn forward(inner: &BridgeInner, frames: Vec<PresenceEnvelope>) -> bool {
        for envelope in frames {
            let kind = envelope.msg.kind();
            let Some(event) = envelope.msg.into_event() else {
                debug!(event = "bridge_frame_ignored", kind);
                continue;
            };
            if inner.events.send(event).await.is_err() {
                return false;
            }
        }
        true
    }

    if inner.is_stopping() {
        inner.connecting.store(false, Ordering::SeqCst);
        return;
    }

    let stream = match UnixStream::connect(&inner.socket_path).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(
                event = "bridge_connect_error",
                path = %inner.socket_path.display(),
                error = %err
            );
            inner.link_lost().await;
            return;
        }
    };
    let (reader_half, mut writer_half) = stream.into_split();
    if let Err(err) = send_envelope(&mut writer_half, &inner.hello()).await {
        warn!(event = "bridge_hello_error", error = %err);
        inner.link_lost().await;
        return;
    }

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<PresenceMsg>();
    *inner.outbound() = Some(out_tx);
    debug!(event = "bridge_connected", path = %inner.socket_path.display());
    if inner.events.send(PresenceEvent::Connected).await.is_err() {
        inner.link_lost().await;
        return;
    }
    inner.flush_unsent();

    let mut reader = BufReader::new(reader_half);
    let mut decoder = PresenceFrameDecoder::new(DEFAULT_MAX_FRAME_BYTES);
    let mut read_buf = [0u8; 8192];
    let mut shutdown = inner.shutdown.clone();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            read = reader.read(&mut read_buf) => {
                let read = match read {
                    Ok(0) => break,
                    Ok(read) => read,
                    Err(err) => {
                        warn!(event = "bridge_read_error", error = %err);
                        break;
                    }
                };
                let report = decoder.push_chunk(&read_buf[..read]);
                for err in report.errors {
                    warn!(event = "bridge_decode_error", kind = err.kind(), error = %err);
                }
                if !forward(&inner, report.frames).await {
                    break;
                }
            }
            outbound = out_rx.recv() => {
                let Some(msg) = outbound else {
                    break;
                };
                let envelope = PresenceEnvelope::new(inner.client_id.clone(), msg);
                if let Err(err) = send_envelope(&mut writer_half, &envelope).await {
                    warn!(event = "bridge_write_error", error = %err);
                    inner.requeue(envelope.msg);
                    break;
                }
            }
        }
    }

    inner.outbound().take();
    out_rx.close();
    while let Ok(msg) = out_rx.try_recv() {
        inner.requeue(msg);
    }

    let report = decoder.finish();
    for err in report.errors {
        warn!(event = "bridge_decode_error", kind = err.kind(), error = %err);
    }
    forward(&inner, report.frames).await;
    inner.link_lost().await;
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use roster_core::presence_ipc::{encode_frame, FriendsListPayload, DEFAULT_MAX_FRAME_BYTES};
    use roster_core::RelationshipRecord;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    async fn next_event(rx: &mut mpsc::Receiver<PresenceEvent>) -> PresenceEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event timeout")
            .expect("event channel open")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn link_delivers_events_and_requests() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("presence.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = BridgeClient::new(path, "test-client".to_string(), event_tx, shutdown_rx);

        client.request_app_info(AppId(730));
        client.request_connect();
        assert!(client.is_connecting());

        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let hello = lines.next_line().await.expect("read").expect("hello line");
        let hello: PresenceEnvelope = serde_json::from_str(&hello).expect("hello json");
        assert_eq!(hello.msg.kind(), "hello");
        assert_eq!(next_event(&mut event_rx).await, PresenceEvent::Connected);

        let deferred = lines.next_line().await.expect("read").expect("request line");
        let deferred: PresenceEnvelope = serde_json::from_str(&deferred).expect("request json");
        assert_eq!(
            deferred.msg,
            PresenceMsg::AppInfoRequest(AppInfoRequestPayload {
                app_ids: vec![AppId(730)]
            })
        );

        let roster = PresenceEnvelope::new(
            "bridge",
            PresenceMsg::FriendsList(FriendsListPayload {
                incremental: false,
                relationships: vec![RelationshipRecord::friend(1, "Alyx")],
            }),
        );
        let frame = encode_frame(&roster, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        write_half.write_all(&frame).await.expect("write");
        match next_event(&mut event_rx).await {
            PresenceEvent::FriendsList { relationships, .. } => {
                assert_eq!(relationships.len(), 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        drop(write_half);
        drop(lines);
        assert_eq!(next_event(&mut event_rx).await, PresenceEvent::Disconnected);
        assert!(!client.is_connecting());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn request_burst_is_delivered_in_full() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("presence.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = BridgeClient::new(path, "test-client".to_string(), event_tx, shutdown_rx);

        client.request_connect();
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, _write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        lines.next_line().await.expect("read").expect("hello line");
        assert_eq!(next_event(&mut event_rx).await, PresenceEvent::Connected);

        for id in 0..200 {
            client.request_app_info(AppId(id));
        }

        let mut received = Vec::new();
        while received.len() < 200 {
            let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
                .await
                .expect("request timeout")
                .expect("read")
                .expect("request line");
            let envelope: PresenceEnvelope = serde_json::from_str(&line).expect("request json");
            match envelope.msg {
                PresenceMsg::AppInfoRequest(payload) => received.extend(payload.app_ids),
                other => panic!("unexpected message: {other:?}"),
            }
        }
        assert_eq!(received, (0..200).map(AppId).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_connect_reports_disconnect_without_retrying() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = BridgeClient::new(
            dir.path().join("missing.sock"),
            "test-client".to_string(),
            event_tx,
            shutdown_rx,
        );

        client.request_connect();
        assert_eq!(next_event(&mut event_rx).await, PresenceEvent::Disconnected);
        assert!(!client.is_connecting());
        let quiet = tokio::time::timeout(Duration::from_millis(200), event_rx.recv()).await;
        assert!(quiet.is_err());
    }
}
