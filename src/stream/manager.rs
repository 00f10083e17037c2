//! Stream connection manager.
//!
//! Owns the live connection for as long as it is armed:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (Closing | Errored) -> Disconnected
//!       ^                                                                |
//!       +---------------- reconnect after backoff (while armed) --------+
//! ```
//!
//! `start()` arms the manager and spawns the connection task; `stop()` disarms
//! it, aborts the task (cancelling any pending backoff timer) and guarantees
//! that no frame is applied to the view after it returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::envelope::decode_envelope;
use super::transport::{Frame, Transport, WsTransport};
use crate::models::LatestSample;
use crate::view::{lock_view, SharedView};

// ---

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Errored,
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    /// Pre-shared subscription key, sent as the sub-protocol. Not the user's token.
    pub subscription_key: String,
    pub reconnect_delay: Duration,
}

/// Handle on one armed period. Dropped (and its task aborted) on `stop()`.
struct Run {
    armed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

pub struct ConnectionManager<T: Transport = WsTransport> {
    transport: Arc<T>,
    settings: StreamSettings,
    view: SharedView,
    state: Arc<watch::Sender<ConnectionState>>,
    latest: Arc<watch::Sender<Option<LatestSample>>>,
    run: Mutex<Option<Run>>,
}

impl<T: Transport> ConnectionManager<T> {
    // ---
    pub fn new(transport: T, settings: StreamSettings, view: SharedView) -> Self {
        // ---
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (latest, _) = watch::channel(None);

        Self {
            transport: Arc::new(transport),
            settings,
            view,
            state: Arc::new(state),
            latest: Arc::new(latest),
            run: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Latest live sample for any selected device.
    pub fn subscribe_latest(&self) -> watch::Receiver<Option<LatestSample>> {
        self.latest.subscribe()
    }

    pub fn is_armed(&self) -> bool {
        self.run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|run| run.armed.load(Ordering::SeqCst))
    }

    /// Arm the manager and start connecting. No-op when already armed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        // ---
        let mut slot = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!("Stream manager already armed");
            return;
        }

        let armed = Arc::new(AtomicBool::new(true));
        let ctx = RunContext {
            transport: Arc::clone(&self.transport),
            settings: self.settings.clone(),
            view: Arc::clone(&self.view),
            state: Arc::clone(&self.state),
            latest: Arc::clone(&self.latest),
            armed: Arc::clone(&armed),
        };

        info!("Stream manager armed for {}", self.settings.url);
        let task = tokio::spawn(run_connection(ctx));
        *slot = Some(Run { armed, task });
    }

    /// Disarm, close the connection and cancel any pending reconnect.
    pub fn stop(&self) {
        // ---
        let run = self
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(run) = run else {
            return;
        };

        {
            // Flip under the view lock: a frame is either fully applied
            // before this point or never.
            let _view = lock_view(&self.view);
            run.armed.store(false, Ordering::SeqCst);
            self.state.send_replace(ConnectionState::Disconnected);
        }
        run.task.abort();
        info!("Stream manager disarmed");
    }

    /// Tear down and re-arm, e.g. after the selection changed.
    pub fn restart(&self) {
        self.stop();
        self.start();
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct RunContext<T: Transport> {
    transport: Arc<T>,
    settings: StreamSettings,
    view: SharedView,
    state: Arc<watch::Sender<ConnectionState>>,
    latest: Arc<watch::Sender<Option<LatestSample>>>,
    armed: Arc<AtomicBool>,
}

impl<T: Transport> RunContext<T> {
    // ---
    fn armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Publish a state change unless the run was torn down meanwhile.
    fn transition(&self, next: ConnectionState) -> bool {
        // ---
        let _view = lock_view(&self.view);
        if !self.armed() {
            return false;
        }
        self.state.send_replace(next);
        true
    }

    /// Decode and apply one text payload. Returns `false` once disarmed.
    fn dispatch(&self, payload: &str) -> bool {
        // ---
        let (dev_eui, reading) = match decode_envelope(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping stream message: {}", e);
                debug!("Dropped payload: {}", payload);
                return self.armed();
            }
        };

        {
            // notify under the lock too, so nothing is published after stop()
            let mut view = lock_view(&self.view);
            if !self.armed() {
                return false;
            }
            if let Some(sample) = view.record_live(&dev_eui, reading) {
                self.latest.send_replace(Some(sample));
            }
        }

        debug!(
            "Reading {} @ {}: {:.1}%",
            dev_eui, reading.timestamp_ms, reading.moisture_pct
        );
        true
    }
}

async fn run_connection<T: Transport>(ctx: RunContext<T>) {
    // ---
    loop {
        if !ctx.transition(ConnectionState::Connecting) {
            return;
        }

        match ctx
            .transport
            .connect(&ctx.settings.url, &ctx.settings.subscription_key)
            .await
        {
            Ok(mut frames) => {
                if !ctx.transition(ConnectionState::Connected) {
                    return;
                }

                let mut next_state = ConnectionState::Closing;
                while let Some(frame) = frames.next().await {
                    let keep_going = match frame {
                        Ok(Frame::Text(text)) => ctx.dispatch(&text),
                        Ok(Frame::Binary(data)) => match String::from_utf8(data) {
                            Ok(text) => ctx.dispatch(&text),
                            Err(e) => {
                                warn!("Dropping non-UTF-8 stream message: {}", e);
                                ctx.armed()
                            }
                        },
                        Ok(Frame::Control) => ctx.armed(),
                        Ok(Frame::Close) => {
                            info!("Stream closed by peer");
                            break;
                        }
                        Err(e) => {
                            warn!("Stream transport error, closing: {}", e);
                            next_state = ConnectionState::Errored;
                            break;
                        }
                    };
                    if !keep_going {
                        return;
                    }
                }

                // dropping `frames` closes the socket
                drop(frames);
                if !ctx.transition(next_state) {
                    return;
                }
            }
            Err(e) => {
                warn!("Stream connect to {} failed: {}", ctx.settings.url, e);
                if !ctx.transition(ConnectionState::Errored) {
                    return;
                }
            }
        }

        if !ctx.transition(ConnectionState::Disconnected) {
            return;
        }
        info!(
            "Reconnecting in {} ms",
            ctx.settings.reconnect_delay.as_millis()
        );
        tokio::time::sleep(ctx.settings.reconnect_delay).await;
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::stream::transport::{FrameStream, TransportError};
    use crate::view::ViewState;
    use futures_util::stream;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// Transport whose connections stay open until the test drops the sender.
    #[derive(Default)]
    struct ScriptedTransport {
        attempts: AtomicUsize,
        refuse: AtomicBool,
        senders: Mutex<Vec<mpsc::UnboundedSender<Result<Frame, TransportError>>>>,
    }

    impl Transport for Arc<ScriptedTransport> {
        async fn connect(&self, _url: &str, key: &str) -> Result<FrameStream, TransportError> {
            // ---
            assert_eq!(key, "sub-key");
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Rejected { status: 403 });
            }

            let (tx, rx) = mpsc::unbounded_channel();
            self.senders.lock().unwrap().push(tx);
            Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|frame| (frame, rx))
            })
            .boxed())
        }
    }

    impl ScriptedTransport {
        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        fn send_text(&self, text: &str) {
            let senders = self.senders.lock().unwrap();
            let _ = senders
                .last()
                .expect("no open connection")
                .send(Ok(Frame::Text(text.to_string())));
        }

        fn send(&self, frame: Result<Frame, TransportError>) {
            let senders = self.senders.lock().unwrap();
            let _ = senders.last().expect("no open connection").send(frame);
        }

        fn close_current(&self) {
            self.senders.lock().unwrap().pop();
        }
    }

    fn setup() -> (
        Arc<ScriptedTransport>,
        SharedView,
        ConnectionManager<Arc<ScriptedTransport>>,
    ) {
        // ---
        let transport = Arc::new(ScriptedTransport::default());
        let view = ViewState::shared(10);
        let settings = StreamSettings {
            url: "ws://registry.test/ws/updates".into(),
            subscription_key: "sub-key".into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        };
        let manager = ConnectionManager::new(Arc::clone(&transport), settings, Arc::clone(&view));
        (transport, view, manager)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_appends_readings() {
        // ---
        let (transport, view, manager) = setup();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.start();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(transport.attempts(), 1);

        transport.send_text(r#"{"dev_eui":"A1","timestamp":100,"moisture_pct":20.0,"raw_value":4100}"#);
        transport.send_text(r#"{"dev_eui":"B2","timestamp":100,"moisture_pct":40.0,"raw_value":null}"#);
        settle().await;

        let view = lock_view(&view);
        assert_eq!(view.series.get("A1").len(), 1);
        assert_eq!(view.series.get("A1")[0].timestamp_ms, 100_000);
        assert_eq!(view.series.get("B2").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_messages_are_dropped() {
        // ---
        let (transport, view, manager) = setup();
        manager.start();
        settle().await;

        transport.send_text(r#"{"dev_eui":"A1","timestamp":1,"moisture_pct":1.0}"#);
        settle().await;

        transport.send_text("not json at all");
        transport.send_text(r#"{"timestamp":2,"moisture_pct":2.0}"#);
        transport.send_text(r#"{"dev_eui":"","timestamp":2,"moisture_pct":2.0}"#);
        transport.send(Ok(Frame::Binary(vec![0xff, 0xfe])));
        settle().await;

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(transport.attempts(), 1);
        let view = lock_view(&view);
        assert_eq!(view.series.device_ids(), vec!["A1".to_string()]);
        assert_eq!(view.series.get("A1").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_binary_utf8_frames_are_decoded() {
        // ---
        let (transport, view, manager) = setup();
        manager.start();
        settle().await;

        let payload = br#"{"dev_eui":"A1","timestamp":1,"moisture_pct":1.0}"#.to_vec();
        transport.send(Ok(Frame::Binary(payload)));
        settle().await;

        assert_eq!(lock_view(&view).series.get("A1").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_once_after_backoff() {
        // ---
        let (transport, _view, manager) = setup();
        manager.start();
        settle().await;
        assert_eq!(transport.attempts(), 1);

        transport.close_current();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(transport.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(transport.attempts(), 2);
        assert_eq!(manager.state(), ConnectionState::Connected);

        // connection stays up, so no further attempts
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff_cancels_reconnect() {
        // ---
        let (transport, _view, manager) = setup();
        manager.start();
        settle().await;

        transport.close_current();
        tokio::time::sleep(Duration::from_millis(500)).await;
        manager.stop();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.attempts(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_forces_reconnect() {
        // ---
        let (transport, _view, manager) = setup();
        let mut states = manager.subscribe_state();
        manager.start();
        settle().await;

        transport.send(Err(TransportError::WebSocket("reset by peer".into())));
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

        tokio::time::sleep(DEFAULT_RECONNECT_DELAY).await;
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_keeps_retrying() {
        // ---
        let (transport, _view, manager) = setup();
        transport.refuse.store(true, Ordering::SeqCst);
        manager.start();
        settle().await;
        assert_eq!(transport.attempts(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(DEFAULT_RECONNECT_DELAY).await;
        assert_eq!(transport.attempts(), 2);

        transport.refuse.store(false, Ordering::SeqCst);
        tokio::time::sleep(DEFAULT_RECONNECT_DELAY).await;
        assert_eq!(transport.attempts(), 3);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_messages_applied_after_stop() {
        // ---
        let (transport, view, manager) = setup();
        manager.start();
        settle().await;

        manager.stop();
        transport.send_text(r#"{"dev_eui":"A1","timestamp":1,"moisture_pct":1.0}"#);
        settle().await;

        assert!(lock_view(&view).series.get("A1").is_empty());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_latest_sample_published_after_stop() {
        // ---
        let (transport, view, manager) = setup();
        lock_view(&view).select("A1");
        let mut latest = manager.subscribe_latest();
        manager.start();
        settle().await;

        manager.stop();
        transport.send_text(r#"{"dev_eui":"A1","timestamp":1,"moisture_pct":1.0}"#);
        settle().await;

        assert!(!latest.has_changed().unwrap());
        assert!(latest.borrow_and_update().is_none());
        assert_eq!(lock_view(&view).latest("A1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_restart_reconnects() {
        // ---
        let (transport, _view, manager) = setup();
        manager.start();
        manager.start();
        settle().await;
        assert_eq!(transport.attempts(), 1);

        manager.restart();
        settle().await;
        assert_eq!(transport.attempts(), 2);
        assert!(manager.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_sample_only_for_selected() {
        // ---
        let (transport, view, manager) = setup();
        lock_view(&view).select("A1");
        let latest = manager.subscribe_latest();
        manager.start();
        settle().await;

        transport.send_text(r#"{"dev_eui":"B2","timestamp":1,"moisture_pct":5.0}"#);
        settle().await;
        assert!(latest.borrow().is_none());

        transport.send_text(r#"{"dev_eui":"A1","timestamp":2,"moisture_pct":7.0}"#);
        settle().await;
        let sample = latest.borrow().clone().unwrap();
        assert_eq!(sample.dev_eui, "A1");
        assert_eq!(sample.reading.moisture_pct, 7.0);
    }
}
