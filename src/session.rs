//! One listen request: open the microphone, feed the decoder frame by frame,
//! stop on the hotword or when asked to.
//!
//! The session itself is synchronous. `SessionCoordinator` runs it on a
//! dedicated thread and turns the result into status and events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::audio::{AudioSource, Capture};
use crate::config::HotwordConfig;
use crate::decoder::{KeywordDecoder, Utterance};
use crate::error::ListenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    /// Ended on the configured hotword
    Completed,
    /// Ended for any other reason
    Terminated,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Terminated)
    }
}

/// Why a session ended without a detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested
    Shutdown,
    ReadError(String),
    StreamClosed,
    DecoderFault(String),
}

impl StopReason {
    fn from_read(err: ListenError) -> Self {
        match err {
            ListenError::StreamClosed => StopReason::StreamClosed,
            ListenError::ReadError(msg) => StopReason::ReadError(msg),
            other => StopReason::ReadError(other.to_string()),
        }
    }

    fn from_decoder(err: ListenError) -> Self {
        match err {
            ListenError::DecoderFault(msg) => StopReason::DecoderFault(msg),
            other => StopReason::DecoderFault(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenOutcome {
    Detected { name: String, phrase: String },
    NoDetection(StopReason),
}

impl ListenOutcome {
    pub fn is_detected(&self) -> bool {
        matches!(self, ListenOutcome::Detected { .. })
    }
}

/// Final account of a session, delivered once it has fully torn down.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub id: Uuid,
    pub state: SessionState,
    pub outcome: ListenOutcome,
    /// Successful device reads
    pub frames: u64,
    /// Hypotheses produced, matching or not
    pub hypotheses: u64,
}

struct SessionInner {
    state: SessionState,
    detected_phrase: Option<String>,
}

/// State touched from both the worker thread and the coordinator.
pub struct SessionShared {
    id: Uuid,
    terminate: AtomicBool,
    inner: Mutex<SessionInner>,
}

impl SessionShared {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            terminate: AtomicBool::new(false),
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                detected_phrase: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the loop to stop before its next read. Never cleared.
    pub fn request_termination(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    pub fn termination_requested(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn detected_phrase(&self) -> Option<String> {
        self.lock().detected_phrase.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        // The guarded data stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter_listening(&self) {
        let mut inner = self.lock();
        debug_assert_eq!(inner.state, SessionState::Idle);
        inner.state = SessionState::Listening;
    }

    fn complete(&self, phrase: String) {
        let mut inner = self.lock();
        debug_assert_eq!(inner.state, SessionState::Listening);
        inner.detected_phrase = Some(phrase);
        inner.state = SessionState::Completed;
    }

    fn terminate(&self) {
        let mut inner = self.lock();
        if !inner.state.is_terminal() {
            inner.state = SessionState::Terminated;
        }
    }
}

impl Default for SessionShared {
    fn default() -> Self {
        Self::new()
    }
}

enum LoopExit {
    Matched(String),
    Terminated,
    Fault(StopReason),
}

pub struct ListeningSession {
    config: Arc<HotwordConfig>,
    source: Box<dyn AudioSource>,
    decoder: Box<dyn KeywordDecoder>,
    shared: Arc<SessionShared>,
}

impl ListeningSession {
    pub fn new(
        config: Arc<HotwordConfig>,
        source: Box<dyn AudioSource>,
        decoder: Box<dyn KeywordDecoder>,
    ) -> Self {
        Self::with_shared(config, source, decoder, Arc::new(SessionShared::new()))
    }

    /// Use state the caller already holds, so it can request termination
    /// before the session starts running.
    pub fn with_shared(
        config: Arc<HotwordConfig>,
        source: Box<dyn AudioSource>,
        decoder: Box<dyn KeywordDecoder>,
        shared: Arc<SessionShared>,
    ) -> Self {
        Self {
            config,
            source,
            decoder,
            shared,
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id()
    }

    pub fn shared(&self) -> Arc<SessionShared> {
        self.shared.clone()
    }

    /// Drive the session to a terminal state on the calling thread.
    ///
    /// Setup failures (device, first utterance) are returned before the
    /// session ever listens. Once listening, `on_listening` runs and every
    /// later failure ends the session with a `NoDetection` outcome instead.
    /// The device is closed and the utterance ended before this returns.
    pub fn run(self, on_listening: impl FnOnce()) -> Result<SessionReport, ListenError> {
        let ListeningSession {
            config,
            mut source,
            mut decoder,
            shared,
        } = self;
        let id = shared.id();

        let mut capture = Capture::open(
            source.as_mut(),
            config.audio_device.as_deref(),
            config.sample_rate,
        )?;
        let mut utterance = Utterance::begin(decoder.as_mut())?;

        shared.enter_listening();
        log::info!(
            "session {} listening for '{}' on {}",
            id,
            config.hotword,
            config.audio_device.as_deref().unwrap_or("default device")
        );
        on_listening();

        let mut buf = vec![0u8; config.buffer_size];
        let mut frames = 0u64;
        let mut hypotheses = 0u64;

        let exit = loop {
            if shared.termination_requested() {
                break LoopExit::Terminated;
            }

            let n = match capture.read_frame(&mut buf) {
                Ok(n) => n.min(buf.len()),
                Err(e) => {
                    log::warn!("session {}: {}, stopping", id, e);
                    break LoopExit::Fault(StopReason::from_read(e));
                }
            };
            frames += 1;

            if let Err(e) = utterance.process_frame(&buf[..n]) {
                log::warn!("session {}: {}, stopping", id, e);
                break LoopExit::Fault(StopReason::from_decoder(e));
            }

            let Some(hyp) = utterance.hypothesis() else {
                continue;
            };
            hypotheses += 1;
            utterance.end();

            if hyp == config.hotword {
                break LoopExit::Matched(hyp);
            }

            // Anything else is a reset point
            log::debug!("session {}: heard '{}', not the hotword", id, hyp);
            if let Err(e) = utterance.restart() {
                log::warn!("session {}: {}, stopping", id, e);
                break LoopExit::Fault(StopReason::from_decoder(e));
            }
        };

        drop(utterance);
        drop(capture);

        // A match read after shutdown was requested counts as termination
        let exit = match exit {
            LoopExit::Matched(phrase) if shared.termination_requested() => {
                log::info!("session {}: '{}' heard after shutdown, discarding", id, phrase);
                LoopExit::Terminated
            }
            exit => exit,
        };

        let outcome = match exit {
            LoopExit::Matched(phrase) => {
                shared.complete(phrase.clone());
                log::info!("session {} heard '{}' after {} frames", id, phrase, frames);
                ListenOutcome::Detected {
                    name: config.name.clone(),
                    phrase,
                }
            }
            LoopExit::Terminated => {
                shared.terminate();
                log::info!("session {} terminated after {} frames", id, frames);
                ListenOutcome::NoDetection(StopReason::Shutdown)
            }
            LoopExit::Fault(reason) => {
                shared.terminate();
                ListenOutcome::NoDetection(reason)
            }
        };

        Ok(SessionReport {
            id,
            state: shared.state(),
            outcome,
            frames,
            hypotheses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        closes: AtomicUsize,
        reads: AtomicUsize,
        begins: AtomicUsize,
        ends: AtomicUsize,
    }

    impl Counters {
        fn get(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    struct ScriptSource {
        reads: VecDeque<Result<usize, ListenError>>,
        fail_open: bool,
        open: bool,
        counters: Arc<Counters>,
    }

    impl AudioSource for ScriptSource {
        fn open(&mut self, _device: Option<&str>, _rate: u32) -> Result<(), ListenError> {
            if self.fail_open {
                return Err(ListenError::DeviceUnavailable("busy".into()));
            }
            self.open = true;
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, ListenError> {
            assert!(self.open, "read while closed");
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            self.reads.pop_front().unwrap_or(Ok(buf.len()))
        }

        fn close(&mut self) {
            if self.open {
                self.open = false;
                self.counters.closes.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    /// Emits `script[i]` as the hypothesis after the i-th frame of the session.
    struct ScriptDecoder {
        script: Vec<Option<&'static str>>,
        frame: usize,
        hyp: Option<String>,
        fail_begin: bool,
        counters: Arc<Counters>,
    }

    impl KeywordDecoder for ScriptDecoder {
        fn begin_utterance(&mut self) -> Result<(), ListenError> {
            if self.fail_begin {
                return Err(ListenError::DecoderFault("model missing".into()));
            }
            self.counters.begins.fetch_add(1, Ordering::SeqCst);
            self.hyp = None;
            Ok(())
        }

        fn process_frame(&mut self, _frame: &[u8]) -> Result<(), ListenError> {
            self.hyp = self.script.get(self.frame).copied().flatten().map(String::from);
            self.frame += 1;
            Ok(())
        }

        fn current_hypothesis(&self) -> Option<String> {
            self.hyp.clone()
        }

        fn end_utterance(&mut self) {
            self.counters.ends.fetch_add(1, Ordering::SeqCst);
            self.hyp = None;
        }
    }

    fn session(
        script: Vec<Option<&'static str>>,
        reads: Vec<Result<usize, ListenError>>,
    ) -> (ListeningSession, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let source = ScriptSource {
            reads: reads.into(),
            fail_open: false,
            open: false,
            counters: counters.clone(),
        };
        let decoder = ScriptDecoder {
            script,
            frame: 0,
            hyp: None,
            fail_begin: false,
            counters: counters.clone(),
        };
        let mut config = HotwordConfig::new("wakeword");
        config.name = "porch".into();
        config.buffer_size = 64;
        (
            ListeningSession::new(Arc::new(config), Box::new(source), Box::new(decoder)),
            counters,
        )
    }

    #[test]
    fn completes_on_matching_hypothesis() {
        let (session, counters) = session(vec![None, Some("foo"), Some("wakeword")], vec![]);
        let shared = session.shared();
        let mut saw_listening = false;
        let report = session
            .run(|| {
                saw_listening = true;
            })
            .unwrap();

        assert!(saw_listening);
        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(
            report.outcome,
            ListenOutcome::Detected {
                name: "porch".into(),
                phrase: "wakeword".into()
            }
        );
        assert_eq!(report.frames, 3);
        assert_eq!(report.hypotheses, 2);
        assert_eq!(shared.detected_phrase().as_deref(), Some("wakeword"));
        assert_eq!(Counters::get(&counters.closes), 1);
        assert_eq!(Counters::get(&counters.begins), Counters::get(&counters.ends));
    }

    #[test]
    fn termination_before_first_read_skips_reading() {
        let (session, counters) = session(vec![Some("wakeword")], vec![]);
        let shared = session.shared();
        let report = session.run(|| shared.request_termination()).unwrap();

        assert_eq!(report.state, SessionState::Terminated);
        assert_eq!(report.outcome, ListenOutcome::NoDetection(StopReason::Shutdown));
        assert_eq!(Counters::get(&counters.reads), 0);
        assert_eq!(Counters::get(&counters.closes), 1);
        assert_eq!(Counters::get(&counters.ends), 1);
        assert!(shared.termination_requested());
        assert!(shared.detected_phrase().is_none());
    }

    /// Raises the termination flag while a read is in flight.
    struct TerminatingSource {
        shared: Arc<SessionShared>,
        open: bool,
    }

    impl AudioSource for TerminatingSource {
        fn open(&mut self, _device: Option<&str>, _rate: u32) -> Result<(), ListenError> {
            self.open = true;
            Ok(())
        }

        fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, ListenError> {
            self.shared.request_termination();
            Ok(buf.len())
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    #[test]
    fn match_after_termination_is_discarded() {
        let (mut session, counters) = session(vec![Some("wakeword")], vec![]);
        let shared = session.shared();
        session.source = Box::new(TerminatingSource {
            shared: shared.clone(),
            open: false,
        });
        let report = session.run(|| {}).unwrap();

        assert_eq!(report.state, SessionState::Terminated);
        assert_eq!(report.outcome, ListenOutcome::NoDetection(StopReason::Shutdown));
        assert_eq!(report.frames, 1);
        assert!(shared.detected_phrase().is_none());
        assert_eq!(Counters::get(&counters.begins), Counters::get(&counters.ends));
    }

    #[test]
    fn read_error_ends_without_detection() {
        let reads = vec![
            Ok(64),
            Ok(64),
            Ok(64),
            Err(ListenError::ReadError("EIO".into())),
        ];
        let (session, counters) = session(vec![], reads);
        let report = session.run(|| {}).unwrap();

        assert_eq!(report.state, SessionState::Terminated);
        assert_eq!(
            report.outcome,
            ListenOutcome::NoDetection(StopReason::ReadError("EIO".into()))
        );
        assert_eq!(report.frames, 3);
        assert_eq!(Counters::get(&counters.closes), 1);
        assert_eq!(Counters::get(&counters.ends), 1);
    }

    #[test]
    fn stream_closed_is_reported_as_such() {
        let (session, _) = session(vec![], vec![Err(ListenError::StreamClosed)]);
        let report = session.run(|| {}).unwrap();
        assert_eq!(
            report.outcome,
            ListenOutcome::NoDetection(StopReason::StreamClosed)
        );
    }

    #[test]
    fn device_unavailable_fails_before_listening() {
        let (mut session, counters) = session(vec![], vec![]);
        session.source = Box::new(ScriptSource {
            reads: VecDeque::new(),
            fail_open: true,
            open: false,
            counters: counters.clone(),
        });
        let shared = session.shared();
        let mut called = false;
        let err = session.run(|| called = true).unwrap_err();

        assert!(matches!(err, ListenError::DeviceUnavailable(_)));
        assert!(!called);
        assert_eq!(shared.state(), SessionState::Idle);
        assert_eq!(Counters::get(&counters.begins), 0);
    }

    #[test]
    fn decoder_fault_at_start_releases_device() {
        let (mut session, counters) = session(vec![], vec![]);
        session.decoder = Box::new(ScriptDecoder {
            script: vec![],
            frame: 0,
            hyp: None,
            fail_begin: true,
            counters: counters.clone(),
        });
        let err = session.run(|| {}).unwrap_err();

        assert!(matches!(err, ListenError::DecoderFault(_)));
        assert_eq!(Counters::get(&counters.opens), 1);
        assert_eq!(Counters::get(&counters.closes), 1);
        assert_eq!(Counters::get(&counters.ends), 0);
    }

    #[test]
    fn short_reads_are_passed_through() {
        // A recovered overrun reports zero bytes and the loop carries on
        let (session, _) = session(vec![None, Some("wakeword")], vec![Ok(0), Ok(10)]);
        let report = session.run(|| {}).unwrap();
        assert!(report.outcome.is_detected());
        assert_eq!(report.frames, 2);
    }
}
