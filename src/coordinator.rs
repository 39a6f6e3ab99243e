//! Process-wide owner of the listening sessions.
//!
//! Uses a std::thread (NOT a tokio task) per session for the blocking
//! capture loop so the async side is never stalled by device reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::{broadcast, oneshot, watch};
use uuid::Uuid;

use crate::audio::AudioSource;
use crate::config::HotwordConfig;
use crate::decoder::KeywordDecoder;
use crate::error::ListenError;
use crate::session::{
    ListenOutcome, ListeningSession, SessionReport, SessionShared, SessionState, StopReason,
};
use crate::status::{EntityState, HotwordEvent, ListenerStatus, StatusBoard};

/// Supplies a fresh device and decoder for every session.
pub trait SessionBackend: Send + Sync {
    fn audio_source(&self, config: &HotwordConfig) -> Result<Box<dyn AudioSource>, ListenError>;

    /// May load model files; runs on the session's worker thread.
    fn keyword_decoder(
        &self,
        config: &HotwordConfig,
    ) -> Result<Box<dyn KeywordDecoder>, ListenError>;
}

/// ALSA capture with the rustpotter spotter, as enabled at build time.
pub struct NativeBackend;

impl NativeBackend {
    /// False when built without a keyword spotter; every listen then fails.
    pub const fn has_keyword_spotter() -> bool {
        cfg!(feature = "rustpotter")
    }
}

impl SessionBackend for NativeBackend {
    fn audio_source(&self, _config: &HotwordConfig) -> Result<Box<dyn AudioSource>, ListenError> {
        #[cfg(feature = "alsa")]
        {
            Ok(Box::new(crate::audio::AlsaSource::new()))
        }
        #[cfg(not(feature = "alsa"))]
        {
            Err(ListenError::DeviceUnavailable(
                "built without the `alsa` capture backend".into(),
            ))
        }
    }

    fn keyword_decoder(
        &self,
        config: &HotwordConfig,
    ) -> Result<Box<dyn KeywordDecoder>, ListenError> {
        #[cfg(feature = "rustpotter")]
        {
            Ok(Box::new(crate::decoder::RustpotterDecoder::new(config)?))
        }
        #[cfg(not(feature = "rustpotter"))]
        {
            let _ = config;
            Err(ListenError::DecoderFault(
                "built without a keyword spotting backend (enable the `rustpotter` feature)"
                    .into(),
            ))
        }
    }
}

struct ActiveSession {
    shared: Arc<SessionShared>,
}

struct CoordinatorInner {
    config: Arc<HotwordConfig>,
    backend: Arc<dyn SessionBackend>,
    status: StatusBoard,
    // At most one entry; doubles as the idle signal for `wait_idle`
    active: watch::Sender<Option<ActiveSession>>,
    shutdown: AtomicBool,
}

/// Clears the active slot when the owning worker is done, panics included.
/// On a panic it also drops the status back to `idle`.
struct SlotGuard {
    inner: Arc<CoordinatorInner>,
    id: Uuid,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let id = self.id;
        // A worker that died mid-session never published its outcome
        if thread::panicking() {
            log::error!("listening thread for session {} panicked", id);
            self.inner.status.set(ListenerStatus::Idle);
        }
        self.inner.active.send_if_modified(|slot| {
            if slot.as_ref().is_some_and(|s| s.shared.id() == id) {
                *slot = None;
                true
            } else {
                false
            }
        });
    }
}

/// Serializes listen requests and wires shutdown into the active session.
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SessionCoordinator {
    /// Publishes `idle` right away.
    pub fn new(config: HotwordConfig, backend: Arc<dyn SessionBackend>) -> Self {
        let status = StatusBoard::new(config.entity_id());
        let (active, _) = watch::channel(None);
        Self {
            inner: Arc::new(CoordinatorInner {
                config: Arc::new(config),
                backend,
                status,
                active,
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &HotwordConfig {
        &self.inner.config
    }

    /// Start a session and return once it is listening.
    ///
    /// Fails with `SessionBusy` while another session is active, and with
    /// the setup error when the device or decoder cannot be started. After
    /// `request_shutdown` no device is opened; the handle resolves to a
    /// `Shutdown` outcome.
    pub async fn start_listening(&self) -> Result<ListenHandle, ListenError> {
        if self.is_shutdown_requested() {
            log::info!("shutdown requested, not starting a session");
            return Ok(ListenHandle::finished(SessionReport {
                id: Uuid::new_v4(),
                state: SessionState::Terminated,
                outcome: ListenOutcome::NoDetection(StopReason::Shutdown),
                frames: 0,
                hypotheses: 0,
            }));
        }

        let shared = Arc::new(SessionShared::new());
        let id = shared.id();
        let claimed = self.inner.active.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(ActiveSession {
                shared: shared.clone(),
            });
            true
        });
        if !claimed {
            log::warn!("listen request rejected, a session is already active");
            return Err(ListenError::SessionBusy);
        }
        let slot = SlotGuard {
            inner: self.inner.clone(),
            id,
        };

        // Shutdown may have landed between the check above and the claim
        if self.is_shutdown_requested() {
            shared.request_termination();
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let inner = self.inner.clone();
        let worker = thread::Builder::new()
            .name("hotword-listen".into())
            .spawn(move || inner.run_worker(shared, slot, ready_tx, done_tx))
            .map_err(|e| {
                log::error!("Failed to spawn listening thread: {}", e);
                ListenError::WorkerLost
            })?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(ListenHandle {
                id,
                done: done_rx,
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                log::warn!("session {} failed to start: {}", id, e);
                join_worker(worker).await;
                Err(e)
            }
            Err(_) => {
                join_worker(worker).await;
                Err(ListenError::WorkerLost)
            }
        }
    }

    /// Listen until the hotword is heard or the session ends otherwise.
    pub async fn listen(&self) -> Result<ListenOutcome, ListenError> {
        let handle = self.start_listening().await?;
        Ok(handle.wait().await?.outcome)
    }

    /// Stop the active session before its next frame and refuse new ones.
    /// Idempotent and safe without an active session.
    pub fn request_shutdown(&self) {
        let first = !self.inner.shutdown.swap(true, Ordering::SeqCst);
        match self.inner.active.borrow().as_ref() {
            Some(active) => {
                log::info!("shutdown requested, stopping session {}", active.shared.id());
                active.shared.request_termination();
            }
            None if first => log::info!("shutdown requested with no active session"),
            None => {}
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Resolves once no session holds the device.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.active.subscribe();
        let _ = rx.wait_for(|slot| slot.is_none()).await;
    }

    pub fn is_listening(&self) -> bool {
        self.inner.active.borrow().is_some()
    }

    pub fn current_status(&self) -> ListenerStatus {
        self.inner.status.current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<EntityState> {
        self.inner.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<HotwordEvent> {
        self.inner.status.subscribe_events()
    }
}

impl CoordinatorInner {
    fn run_worker(
        &self,
        shared: Arc<SessionShared>,
        slot: SlotGuard,
        ready_tx: oneshot::Sender<Result<(), ListenError>>,
        done_tx: oneshot::Sender<SessionReport>,
    ) {
        let mut ready_tx = Some(ready_tx);
        let mut fail_setup = |e: ListenError| {
            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(Err(e));
            }
        };

        let source = match self.backend.audio_source(&self.config) {
            Ok(source) => source,
            Err(e) => return fail_setup(e),
        };
        let decoder = match self.backend.keyword_decoder(&self.config) {
            Ok(decoder) => decoder,
            Err(e) => return fail_setup(e),
        };
        let session = ListeningSession::with_shared(self.config.clone(), source, decoder, shared);

        let result = session.run(|| {
            self.status.set(ListenerStatus::Listening);
            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(Ok(()));
            }
        });

        match result {
            Ok(report) => {
                self.publish(&report);
                drop(slot);
                let _ = done_tx.send(report);
            }
            Err(e) => {
                drop(slot);
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Err(e));
                }
            }
        }
    }

    fn publish(&self, report: &SessionReport) {
        match &report.outcome {
            ListenOutcome::Detected { name, .. } => {
                self.status.set(ListenerStatus::Idle);
                self.status.fire(HotwordEvent::HotwordDetected { name: name.clone() });
            }
            // The host is going away, leave the status as it was
            ListenOutcome::NoDetection(StopReason::Shutdown) => {}
            ListenOutcome::NoDetection(reason) => {
                log::warn!(
                    "session {} ended without detection: {:?}",
                    report.id,
                    reason
                );
                self.status.set(ListenerStatus::Idle);
            }
        }
    }
}

/// A running session. Dropping it detaches the worker, which still tears
/// down and publishes on its own.
pub struct ListenHandle {
    id: Uuid,
    done: oneshot::Receiver<SessionReport>,
    worker: Option<JoinHandle<()>>,
}

impl ListenHandle {
    fn finished(report: SessionReport) -> Self {
        let (tx, rx) = oneshot::channel();
        let id = report.id;
        let _ = tx.send(report);
        Self {
            id,
            done: rx,
            worker: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Resolves after the device is closed and the final state committed.
    pub async fn wait(self) -> Result<SessionReport, ListenError> {
        let report = self.done.await.map_err(|_| ListenError::WorkerLost);
        if let Some(worker) = self.worker {
            join_worker(worker).await;
        }
        report
    }
}

async fn join_worker(worker: JoinHandle<()>) {
    match tokio::task::spawn_blocking(move || worker.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => log::error!("listening thread panicked"),
        Err(e) => log::error!("failed to join listening thread: {}", e),
    }
}
