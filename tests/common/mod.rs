//! Scripted capture device and decoder that replay fixed sequences.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hotword_listener::audio::AudioSource;
use hotword_listener::decoder::KeywordDecoder;
use hotword_listener::{HotwordConfig, ListenError, SessionBackend};

pub const HOTWORD: &str = "wakeword";
pub const NAME: &str = "test_listener";

pub fn test_config() -> HotwordConfig {
    let mut config = HotwordConfig::new(HOTWORD);
    config.name = NAME.to_string();
    config.buffer_size = 32;
    config
}

/// Call counts across every session built by one backend.
#[derive(Default)]
pub struct Probe {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub reads: AtomicUsize,
    pub begins: AtomicUsize,
    pub ends: AtomicUsize,
    pub decoders_built: AtomicUsize,
}

impl Probe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }
    pub fn ends(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }
}

/// What one session sees.
#[derive(Clone, Default)]
pub struct Script {
    /// Results of the first reads; afterwards every read returns a full frame
    pub reads: Vec<Result<usize, ListenError>>,
    /// Hypothesis after each processed frame; afterwards none
    pub hypotheses: Vec<Option<&'static str>>,
    /// Simulated device latency per read
    pub read_delay: Duration,
    pub fail_open: bool,
    pub fail_begin: bool,
    pub fail_build_decoder: bool,
    /// Processing fails once this many frames went through
    pub fail_process_after: Option<usize>,
    /// Every utterance after the first fails to begin
    pub fail_restart: bool,
    /// Processing a frame panics the worker
    pub panic_on_process: bool,
}

impl Script {
    pub fn hypotheses(hyps: &[Option<&'static str>]) -> Self {
        Self {
            hypotheses: hyps.to_vec(),
            ..Default::default()
        }
    }

    /// Reads forever without ever producing a hypothesis.
    pub fn silence(read_delay: Duration) -> Self {
        Self {
            read_delay,
            ..Default::default()
        }
    }
}

pub struct ScriptedSource {
    reads: VecDeque<Result<usize, ListenError>>,
    read_delay: Duration,
    fail_open: bool,
    open: bool,
    probe: Arc<Probe>,
}

impl AudioSource for ScriptedSource {
    fn open(&mut self, _device: Option<&str>, _sample_rate: u32) -> Result<(), ListenError> {
        if self.fail_open {
            return Err(ListenError::DeviceUnavailable("device busy".into()));
        }
        assert!(!self.open, "opened twice");
        self.open = true;
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, ListenError> {
        if !self.open {
            return Err(ListenError::StreamClosed);
        }
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }
        buf.fill(0);
        self.reads.pop_front().unwrap_or(Ok(buf.len()))
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

pub struct ScriptedDecoder {
    hypotheses: VecDeque<Option<&'static str>>,
    current: Option<String>,
    in_utterance: bool,
    processed: usize,
    begun: bool,
    fail_begin: bool,
    fail_process_after: Option<usize>,
    fail_restart: bool,
    panic_on_process: bool,
    probe: Arc<Probe>,
}

impl KeywordDecoder for ScriptedDecoder {
    fn begin_utterance(&mut self) -> Result<(), ListenError> {
        if self.fail_begin {
            return Err(ListenError::DecoderFault("model failed to load".into()));
        }
        if self.begun && self.fail_restart {
            return Err(ListenError::DecoderFault("could not restart utterance".into()));
        }
        self.begun = true;
        assert!(!self.in_utterance, "utterance already started");
        self.in_utterance = true;
        self.current = None;
        self.probe.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn process_frame(&mut self, _frame: &[u8]) -> Result<(), ListenError> {
        assert!(self.in_utterance, "frame outside utterance");
        if self.panic_on_process {
            panic!("decoder crashed");
        }
        if self.fail_process_after.is_some_and(|n| self.processed >= n) {
            return Err(ListenError::DecoderFault("corrupt frame".into()));
        }
        self.processed += 1;
        if let Some(next) = self.hypotheses.pop_front().flatten() {
            self.current = Some(next.to_string());
        }
        Ok(())
    }

    fn current_hypothesis(&self) -> Option<String> {
        self.current.clone()
    }

    fn end_utterance(&mut self) {
        assert!(self.in_utterance, "ended twice");
        self.in_utterance = false;
        self.current = None;
        self.probe.ends.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands each new session the next script; the last one repeats.
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    last: Mutex<Script>,
    pub probe: Arc<Probe>,
    // The decoder is built after the source; carries the script between the two calls
    pending: Mutex<Option<Script>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        let last = scripts.last().cloned().unwrap_or_default();
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            last: Mutex::new(last),
            probe: Arc::new(Probe::default()),
            pending: Mutex::new(None),
        })
    }

    pub fn single(script: Script) -> Arc<Self> {
        Self::new(vec![script])
    }

    fn next_script(&self) -> Script {
        match self.scripts.lock().unwrap().pop_front() {
            Some(script) => script,
            None => self.last.lock().unwrap().clone(),
        }
    }
}

impl SessionBackend for ScriptedBackend {
    fn audio_source(&self, _config: &HotwordConfig) -> Result<Box<dyn AudioSource>, ListenError> {
        let script = self.next_script();
        let source = ScriptedSource {
            reads: script.reads.clone().into(),
            read_delay: script.read_delay,
            fail_open: script.fail_open,
            open: false,
            probe: self.probe.clone(),
        };
        *self.pending.lock().unwrap() = Some(script);
        Ok(Box::new(source))
    }

    fn keyword_decoder(
        &self,
        _config: &HotwordConfig,
    ) -> Result<Box<dyn KeywordDecoder>, ListenError> {
        let script = self.pending.lock().unwrap().take().unwrap_or_default();
        if script.fail_build_decoder {
            return Err(ListenError::DecoderFault("no such model".into()));
        }
        self.probe.decoders_built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDecoder {
            hypotheses: script.hypotheses.into(),
            current: None,
            in_utterance: false,
            processed: 0,
            begun: false,
            fail_begin: script.fail_begin,
            fail_process_after: script.fail_process_after,
            fail_restart: script.fail_restart,
            panic_on_process: script.panic_on_process,
            probe: self.probe.clone(),
        }))
    }
}
