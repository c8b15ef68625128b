//! Fake native engines that record every load, close, run and cancel.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use edgegen_core::engine::{
    AudioOutput, CancelHook, ChatMessage, ChatRole, ConditionEncoder, DiffusionEngine,
    DiffusionLoadParams, DiffusionModel, EncoderLoadParams, EngineError, ImageOutput,
    ImageParams, NativeModel, PrecomputedCondition, Progress, ProgressSink, SpeechParams,
    SpeechRecognitionEngine, SpeechRecognitionLoadParams, SpeechRecognitionModel,
    SpeechSynthesisEngine, SpeechSynthesisLoadParams, SpeechSynthesisModel, TextEngine,
    TextLoadParams, TextModel, TextOutput, TextParams, TranscriptSegment, Transcription,
    TranscriptionParams, VideoOutput, VideoParams,
};
use edgegen_core::memory::FixedMemoryOracle;
use edgegen_core::models::LocalAssetResolver;
use edgegen_core::{ModelOrchestrator, OrchestratorConfig, OrchestratorDeps, SequentialLoadMode};

/// Longest a blocked fake run waits before finishing on its own.
pub const BLOCK_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Load,
    Close,
    Run,
    Encode,
    Cancel,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub model: String,
    pub at: Instant,
}

/// Totally ordered record of native calls.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, kind: EventKind, model: &str) {
        self.0.lock().unwrap().push(Event {
            kind,
            model: model.to_string(),
            at: Instant::now(),
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, kind: EventKind, model_prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.kind == kind && e.model.starts_with(model_prefix))
            .count()
    }

    /// Position of the first matching event.
    pub fn position(&self, kind: EventKind, model_prefix: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| e.kind == kind && e.model.starts_with(model_prefix))
    }

    pub fn first(&self, kind: EventKind, model_prefix: &str) -> Option<Event> {
        self.events()
            .into_iter()
            .find(|e| e.kind == kind && e.model.starts_with(model_prefix))
    }
}

/// Knobs shared by every fake engine and model.
#[derive(Debug, Default)]
pub struct FakeControl {
    pub fail_load: AtomicBool,
    pub fail_encoder_load: AtomicBool,
    pub fail_next_run: AtomicBool,
    pub corrupt_next_run: AtomicBool,
    pub fail_encode: AtomicBool,
    pub fail_close: AtomicBool,
    /// Runs block until cancelled or until `release` is set.
    pub block_runs: AtomicBool,
    pub release: AtomicBool,
    pub runs_started: AtomicUsize,
    /// Reported native footprint; 0 reports none.
    pub footprint_bytes: AtomicU64,
    /// Threads that ran `DiffusionEngine::estimate_footprint`.
    pub estimate_threads: Mutex<Vec<ThreadId>>,
    /// Chat turns the last text generation saw, stored plus supplied.
    pub last_history_len: AtomicUsize,
}

impl FakeControl {
    /// Wait until `n` runs have started.
    pub async fn wait_for_runs(&self, n: usize) {
        let deadline = Instant::now() + BLOCK_LIMIT;
        while self.runs_started.load(Ordering::SeqCst) < n {
            assert!(Instant::now() < deadline, "run never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// State every fake model carries.
struct FakeHandle {
    name: String,
    log: EventLog,
    control: Arc<FakeControl>,
    cancelled: Arc<AtomicBool>,
}

impl FakeHandle {
    fn new(prefix: &str, path: &Path, log: &EventLog, control: &Arc<FakeControl>) -> Self {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = format!("{prefix}:{file}");
        log.push(EventKind::Load, &name);
        Self {
            name,
            log: log.clone(),
            control: control.clone(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn footprint(&self) -> Option<u64> {
        match self.control.footprint_bytes.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }

    fn hook(&self) -> Option<CancelHook> {
        let cancelled = self.cancelled.clone();
        let log = self.log.clone();
        let name = self.name.clone();
        Some(Arc::new(move || {
            log.push(EventKind::Cancel, &name);
            cancelled.store(true, Ordering::SeqCst);
        }))
    }

    fn close(&self) -> Result<(), EngineError> {
        self.log.push(EventKind::Close, &self.name);
        if self.control.fail_close.load(Ordering::SeqCst) {
            return Err(EngineError::Close(format!("{} refused to close", self.name)));
        }
        Ok(())
    }

    /// Common run prologue: log, honor failure knobs, block if asked.
    fn run(&self) -> Result<(), EngineError> {
        self.log.push(EventKind::Run, &self.name);
        self.control.runs_started.fetch_add(1, Ordering::SeqCst);
        if self.control.corrupt_next_run.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Corrupted("context poisoned".into()));
        }
        if self.control.fail_next_run.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Run("sampler diverged".into()));
        }
        let mut result = Ok(());
        if self.control.block_runs.load(Ordering::SeqCst) {
            let deadline = Instant::now() + BLOCK_LIMIT;
            while Instant::now() < deadline {
                if self.cancelled.load(Ordering::SeqCst) {
                    result = Err(EngineError::Aborted);
                    break;
                }
                if self.control.release.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        self.cancelled.store(false, Ordering::SeqCst);
        result
    }

    /// Emit `n` steps, checking for an abort before each one.
    fn steps(&self, n: u32, mut emit: impl FnMut(u32)) -> Result<(), EngineError> {
        for step in 1..=n {
            if self.cancelled.swap(false, Ordering::SeqCst) {
                return Err(EngineError::Aborted);
            }
            emit(step);
        }
        Ok(())
    }
}

fn report(sink: &Option<ProgressSink>, step: u32, total: u32) {
    if let Some(sink) = sink {
        sink.emit(&Progress::new(step, total));
    }
}

pub struct FakeTextModel {
    handle: FakeHandle,
    store_chats: bool,
    chat: Vec<ChatMessage>,
}

impl NativeModel for FakeTextModel {
    fn footprint_bytes(&self) -> Option<u64> {
        self.handle.footprint()
    }

    fn cancel_hook(&self) -> Option<CancelHook> {
        self.handle.hook()
    }

    fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.handle.close()
    }
}

impl TextModel for FakeTextModel {
    /// Streams the echoed prompt word by word.
    fn generate(&mut self, params: &TextParams) -> Result<TextOutput, EngineError> {
        self.handle.run()?;
        let history = self.chat.len() + params.history.len();
        self.handle.control.last_history_len.store(history, Ordering::SeqCst);

        let text = format!("echo: {}", params.prompt);
        let pieces: Vec<&str> = text.split_inclusive(' ').collect();
        self.handle.steps(pieces.len() as u32, |step| {
            if let Some(sink) = &params.on_token {
                sink.emit(pieces[step as usize - 1]);
            }
        })?;

        if self.store_chats {
            self.chat.push(ChatMessage::new(ChatRole::User, params.prompt.clone()));
            self.chat.push(ChatMessage::new(ChatRole::Assistant, text.clone()));
        }
        let tokens_generated = pieces.len() as u64;
        Ok(TextOutput {
            text,
            tokens_generated,
            generation_time: Duration::from_millis(1),
        })
    }
}

pub struct FakeDiffusionModel(FakeHandle);

fn frame(width: u32, height: u32) -> ImageOutput {
    ImageOutput {
        width,
        height,
        channels: 3,
        pixels: vec![0; (width * height * 3) as usize],
    }
}

impl NativeModel for FakeDiffusionModel {
    fn footprint_bytes(&self) -> Option<u64> {
        self.0.footprint()
    }

    fn cancel_hook(&self) -> Option<CancelHook> {
        self.0.hook()
    }

    fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.0.close()
    }
}

impl DiffusionModel for FakeDiffusionModel {
    fn txt2img(&mut self, params: &ImageParams) -> Result<ImageOutput, EngineError> {
        self.0.run()?;
        self.0.steps(params.steps, |step| report(&params.on_progress, step, params.steps))?;
        Ok(frame(params.width, params.height))
    }

    fn txt2vid(&mut self, params: &VideoParams) -> Result<VideoOutput, EngineError> {
        self.0.run()?;
        self.0.steps(params.steps, |step| report(&params.on_progress, step, params.steps))?;
        Ok(VideoOutput {
            frames: (0..params.video_frames).map(|_| frame(params.width, params.height)).collect(),
        })
    }

    fn txt2vid_with_conditions(
        &mut self,
        cond: PrecomputedCondition,
        uncond: PrecomputedCondition,
        params: &VideoParams,
    ) -> Result<VideoOutput, EngineError> {
        assert!(cond.size_bytes() > 0, "positive condition must carry data");
        drop(uncond);
        self.txt2vid(params)
    }
}

pub struct FakeEncoder(FakeHandle);

impl NativeModel for FakeEncoder {
    fn cancel_hook(&self) -> Option<CancelHook> {
        self.0.hook()
    }

    fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.0.close()
    }
}

impl ConditionEncoder for FakeEncoder {
    fn encode(&mut self, prompt: &str) -> Result<PrecomputedCondition, EngineError> {
        self.0.log.push(EventKind::Encode, &format!("{}:{prompt}", self.0.name));
        if self.0.control.fail_encode.load(Ordering::SeqCst) {
            return Err(EngineError::Run("encoder failed".into()));
        }
        Ok(PrecomputedCondition {
            cross_attn: vec![1; 16 + prompt.len()],
            vector: vec![2; 8],
            concat: Vec::new(),
        })
    }
}

pub struct FakeSynthesisModel(FakeHandle);

impl NativeModel for FakeSynthesisModel {
    fn cancel_hook(&self) -> Option<CancelHook> {
        self.0.hook()
    }

    fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.0.close()
    }
}

impl SpeechSynthesisModel for FakeSynthesisModel {
    /// Reports the semantic, coarse and fine passes.
    fn synthesize(&mut self, params: &SpeechParams) -> Result<AudioOutput, EngineError> {
        self.0.run()?;
        self.0.steps(3, |step| report(&params.on_progress, step, 3))?;
        Ok(AudioOutput {
            samples: vec![0.0; params.text.len() * 100],
            sample_rate: 24_000,
        })
    }
}

pub struct FakeRecognitionModel(FakeHandle);

impl NativeModel for FakeRecognitionModel {
    fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.0.close()
    }
}

impl SpeechRecognitionModel for FakeRecognitionModel {
    /// One segment per half of the audio, progress in percent.
    fn transcribe(&mut self, params: &TranscriptionParams) -> Result<Transcription, EngineError> {
        self.0.run()?;
        let half_ms = (params.samples.len() as u64 * 1000) / 16_000 / 2;
        let words = ["hello", "world"];
        let mut segments = Vec::new();
        self.0.steps(2, |step| {
            let segment = TranscriptSegment {
                start_ms: half_ms * u64::from(step - 1),
                end_ms: half_ms * u64::from(step),
                text: format!(" {} ", words[step as usize - 1]),
            };
            if let Some(sink) = &params.on_segment {
                sink.emit(&segment);
            }
            report(&params.on_progress, step * 50, 100);
            segments.push(segment);
        })?;
        Ok(Transcription {
            segments,
            language: params.language.clone().or_else(|| Some("en".to_string())),
        })
    }
}

/// One engine type for every family.
#[derive(Clone)]
pub struct FakeEngine {
    pub log: EventLog,
    pub control: Arc<FakeControl>,
}

impl FakeEngine {
    fn check_load(&self, path: &Path) -> Result<(), EngineError> {
        if self.control.fail_load.load(Ordering::SeqCst) {
            return Err(EngineError::Load(format!("null handle for {}", path.display())));
        }
        Ok(())
    }
}

impl TextEngine for FakeEngine {
    fn load(&self, params: &TextLoadParams) -> Result<Box<dyn TextModel>, EngineError> {
        self.check_load(&params.model_path)?;
        Ok(Box::new(FakeTextModel {
            handle: FakeHandle::new("text", &params.model_path, &self.log, &self.control),
            store_chats: params.store_chats,
            chat: Vec::new(),
        }))
    }
}

impl DiffusionEngine for FakeEngine {
    fn load(&self, params: &DiffusionLoadParams) -> Result<Box<dyn DiffusionModel>, EngineError> {
        self.check_load(&params.model_path)?;
        let prefix = if params.text_encoder_path.is_some() {
            "diffusion"
        } else {
            "generator"
        };
        Ok(Box::new(FakeDiffusionModel(FakeHandle::new(
            prefix,
            &params.model_path,
            &self.log,
            &self.control,
        ))))
    }

    fn load_encoder(
        &self,
        params: &EncoderLoadParams,
    ) -> Result<Box<dyn ConditionEncoder>, EngineError> {
        if self.control.fail_encoder_load.load(Ordering::SeqCst) {
            return Err(EngineError::Load("encoder handle is null".into()));
        }
        Ok(Box::new(FakeEncoder(FakeHandle::new(
            "encoder",
            &params.encoder_path,
            &self.log,
            &self.control,
        ))))
    }

    fn estimate_footprint(&self, _path: &Path) -> Option<u64> {
        self.control.estimate_threads.lock().unwrap().push(std::thread::current().id());
        None
    }
}

impl SpeechSynthesisEngine for FakeEngine {
    fn load(
        &self,
        params: &SpeechSynthesisLoadParams,
    ) -> Result<Box<dyn SpeechSynthesisModel>, EngineError> {
        self.check_load(&params.model_path)?;
        Ok(Box::new(FakeSynthesisModel(FakeHandle::new(
            "tts",
            &params.model_path,
            &self.log,
            &self.control,
        ))))
    }
}

impl SpeechRecognitionEngine for FakeEngine {
    fn load(
        &self,
        params: &SpeechRecognitionLoadParams,
    ) -> Result<Box<dyn SpeechRecognitionModel>, EngineError> {
        self.check_load(&params.model_path)?;
        Ok(Box::new(FakeRecognitionModel(FakeHandle::new(
            "stt",
            &params.model_path,
            &self.log,
            &self.control,
        ))))
    }
}

/// Fake engines plus a controllable memory oracle.
pub struct Fakes {
    pub engine: FakeEngine,
    pub memory: Arc<FixedMemoryOracle>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            engine: FakeEngine {
                log: EventLog::default(),
                control: Arc::new(FakeControl::default()),
            },
            memory: Arc::new(FixedMemoryOracle::new(16_000, 16_000)),
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.engine.log
    }

    pub fn control(&self) -> &FakeControl {
        &self.engine.control
    }

    pub fn deps(&self, asset_root: &Path) -> OrchestratorDeps {
        let engine = Arc::new(self.engine.clone());
        OrchestratorDeps {
            text: engine.clone(),
            diffusion: engine.clone(),
            speech_synthesis: engine.clone(),
            speech_recognition: engine,
            memory: self.memory.clone(),
            assets: Arc::new(LocalAssetResolver::new(asset_root)),
        }
    }

    /// Orchestrator with sequential loading off and a nonexistent asset root.
    pub fn orchestrator(&self) -> ModelOrchestrator {
        self.orchestrator_with(OrchestratorConfig {
            sequential_load: SequentialLoadMode::Never,
            ..Default::default()
        })
    }

    pub fn orchestrator_with(&self, config: OrchestratorConfig) -> ModelOrchestrator {
        ModelOrchestrator::init(config, self.deps(Path::new("/nonexistent-assets")))
    }
}
