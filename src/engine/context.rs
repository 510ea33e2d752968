//! Audio output context
//!
//! The `AudioContext` owns the output device and a `Mixer` the device pulls
//! frames from. Its clock is the number of frames the device has consumed,
//! so playback position follows what was actually output rather than wall time.
//!
//! A process-wide context is available through [`AudioContext::shared`]; it
//! is created on first use and torn down with [`AudioContext::close_shared`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{OutputBackend, OutputConfig};
use crate::engine::buffer::AudioAsset;
use crate::error::{EditorError, Result};

static SHARED_CONTEXT: Mutex<Option<Arc<AudioContext>>> = Mutex::new(None);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Mixer
// ============================================================================

/// A buffer being played back
struct Voice {
    id: Uuid,
    asset: AudioAsset,
    /// Read position in source frames
    position: f64,
    rate: f64,
    ended: Option<oneshot::Sender<()>>,
}

/// Pull-model mixer shared between the context and its output device
///
/// Holds at most one voice. `render` is called from the device callback
/// (or the headless pump) and advances the output clock.
pub struct Mixer {
    voice: Mutex<Option<Voice>>,
    frames_rendered: AtomicU64,
    sample_rate: u32,
    channels: usize,
}

impl Mixer {
    fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            voice: Mutex::new(None),
            frames_rendered: AtomicU64::new(0),
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// Output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output channel count
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Seconds of audio the device has pulled so far
    pub fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    /// Fill an interleaved output block and advance the clock
    ///
    /// The active voice is resampled by linear interpolation at
    /// `rate * source_rate / output_rate` source frames per output frame.
    /// Source channels are mapped onto output channels round-robin.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let frames = out.len() / self.channels;

        let mut finished = None;
        {
            let mut guard = lock(&self.voice);
            if let Some(voice) = guard.as_mut() {
                let asset = &voice.asset;
                let len = asset.len();
                let source_channels = asset.channels();
                let step = voice.rate * asset.sample_rate as f64 / self.sample_rate as f64;

                for frame in 0..frames {
                    if voice.position >= len as f64 || source_channels == 0 {
                        break;
                    }
                    let idx = voice.position.floor() as usize;
                    let frac = (voice.position - idx as f64) as f32;

                    for ch in 0..self.channels {
                        let source = asset.channel(ch % source_channels);
                        let a = source[idx];
                        let b = source.get(idx + 1).copied().unwrap_or(a);
                        out[frame * self.channels + ch] = a + (b - a) * frac;
                    }
                    voice.position += step;
                }

                if voice.position >= len as f64 {
                    finished = guard.take();
                }
            }
        }

        self.frames_rendered
            .fetch_add(frames as u64, Ordering::AcqRel);

        if let Some(mut voice) = finished {
            debug!("Voice {} reached the end of its buffer", voice.id);
            if let Some(ended) = voice.ended.take() {
                let _ = ended.send(());
            }
        }
    }

    fn with_voice<R>(&self, id: Uuid, f: impl FnOnce(&mut Voice) -> R) -> Option<R> {
        let mut guard = lock(&self.voice);
        guard.as_mut().filter(|v| v.id == id).map(f)
    }

    fn remove_voice(&self, id: Uuid) -> bool {
        let mut guard = lock(&self.voice);
        if guard.as_ref().map(|v| v.id == id).unwrap_or(false) {
            // Dropping the voice drops its `ended` sender without firing it
            *guard = None;
            true
        } else {
            false
        }
    }

    fn clear(&self) {
        *lock(&self.voice) = None;
    }
}

/// Handle to a voice started on an [`AudioContext`]
#[derive(Clone)]
pub struct VoiceHandle {
    id: Uuid,
    mixer: Arc<Mixer>,
}

impl VoiceHandle {
    /// Voice identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Change the playback rate of a live voice
    ///
    /// Returns false if the voice already ended or was stopped.
    pub fn set_rate(&self, rate: f64) -> bool {
        self.mixer.with_voice(self.id, |v| v.rate = rate).is_some()
    }

    /// Current read position of the voice in seconds of source audio
    pub fn position_secs(&self) -> Option<f64> {
        self.mixer
            .with_voice(self.id, |v| v.position / v.asset.sample_rate as f64)
    }

    /// Stop the voice immediately; its end signal is not fired
    pub fn stop(&self) -> bool {
        self.mixer.remove_voice(self.id)
    }
}

// ============================================================================
// Output devices
// ============================================================================

/// Something that pulls audio from a [`Mixer`]
pub trait OutputDevice: Send {
    /// Device name for logs
    fn name(&self) -> &str;

    /// Output sample rate
    fn sample_rate(&self) -> u32;

    /// Output channel count
    fn channels(&self) -> usize;

    /// Begin pulling frames from the mixer
    fn start(&mut self, mixer: Arc<Mixer>) -> Result<()>;

    /// Stop pulling frames
    fn stop(&mut self);
}

/// Output device that consumes audio on a timer and discards it
///
/// Keeps the clock running on machines without a sound card and in tests.
/// Must be started from within a tokio runtime.
pub struct HeadlessDevice {
    sample_rate: u32,
    channels: usize,
    block_frames: usize,
    cancel: Option<CancellationToken>,
}

impl HeadlessDevice {
    pub fn new(sample_rate: u32, channels: usize, block_frames: usize) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            block_frames: block_frames.max(1),
            cancel: None,
        }
    }
}

impl OutputDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "headless"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn start(&mut self, mixer: Arc<Mixer>) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            EditorError::OutputDevice {
                reason: "headless output must be started inside a tokio runtime".to_string(),
            }
        })?;

        let token = CancellationToken::new();
        let pump_token = token.clone();
        let period = Duration::from_secs_f64(self.block_frames as f64 / self.sample_rate as f64);
        let mut scratch = vec![0.0_f32; self.block_frames * self.channels];

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                tokio::select! {
                    biased;
                    _ = pump_token.cancelled() => break,
                    _ = ticker.tick() => mixer.render(&mut scratch),
                }
            }
        });

        self.cancel = Some(token);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }
}

#[cfg(feature = "device-output")]
pub use system::SystemDevice;

#[cfg(feature = "device-output")]
mod system {
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread::JoinHandle;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::{error, info};

    use super::{Mixer, OutputDevice};
    use crate::error::{EditorError, Result};

    fn device_error(context: &str, e: impl std::fmt::Display) -> EditorError {
        EditorError::OutputDevice {
            reason: format!("{}: {}", context, e),
        }
    }

    /// Default system output device (cpal)
    ///
    /// The cpal stream is not `Send` on every platform, so it is created and
    /// owned by a dedicated thread that lives until `stop`.
    pub struct SystemDevice {
        name: String,
        sample_rate: u32,
        channels: usize,
        shutdown: Option<mpsc::Sender<()>>,
        thread: Option<JoinHandle<()>>,
    }

    impl SystemDevice {
        /// Probe the default output device and its preferred configuration
        pub fn open_default() -> Result<Self> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| EditorError::OutputDevice {
                    reason: "no default output device available".to_string(),
                })?;
            let config = device
                .default_output_config()
                .map_err(|e| device_error("failed to query output config", e))?;

            Ok(Self {
                name: device.name().unwrap_or_else(|_| "default".to_string()),
                sample_rate: config.sample_rate().0,
                channels: config.channels() as usize,
                shutdown: None,
                thread: None,
            })
        }
    }

    impl OutputDevice for SystemDevice {
        fn name(&self) -> &str {
            &self.name
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn channels(&self) -> usize {
            self.channels
        }

        fn start(&mut self, mixer: Arc<Mixer>) -> Result<()> {
            let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
            let sample_rate = self.sample_rate;
            let channels = self.channels as u16;

            let thread = std::thread::Builder::new()
                .name("echoform-output".to_string())
                .spawn(move || {
                    let stream = (|| -> Result<cpal::Stream> {
                        let device = cpal::default_host()
                            .default_output_device()
                            .ok_or_else(|| EditorError::OutputDevice {
                                reason: "default output device disappeared".to_string(),
                            })?;
                        let config = cpal::StreamConfig {
                            channels,
                            sample_rate: cpal::SampleRate(sample_rate),
                            buffer_size: cpal::BufferSize::Default,
                        };
                        let stream = device
                            .build_output_stream(
                                &config,
                                move |data: &mut [f32], _| mixer.render(data),
                                |e| error!("Output stream error: {}", e),
                                None,
                            )
                            .map_err(|e| device_error("failed to build output stream", e))?;
                        stream
                            .play()
                            .map_err(|e| device_error("failed to start output stream", e))?;
                        Ok(stream)
                    })();

                    match stream {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            // Park until stop() or the device is dropped
                            let _ = shutdown_rx.recv();
                            drop(stream);
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                        }
                    }
                })
                .map_err(EditorError::Io)?;

            ready_rx
                .recv()
                .map_err(|e| device_error("output thread exited during startup", e))??;

            info!("Output stream started on '{}'", self.name);
            self.shutdown = Some(shutdown_tx);
            self.thread = Some(thread);
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(shutdown) = self.shutdown.take() {
                let _ = shutdown.send(());
            }
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

// ============================================================================
// Audio Context
// ============================================================================

/// The audio output context
///
/// Exclusively used by the playback controller; offline rendering never
/// touches it.
pub struct AudioContext {
    mixer: Arc<Mixer>,
    device: Mutex<Option<Box<dyn OutputDevice>>>,
    closed: AtomicBool,
}

impl AudioContext {
    /// Open a context on the backend named in the configuration
    ///
    /// A system backend that cannot be opened falls back to the headless
    /// device, so playback keeps its clock but produces no sound.
    pub fn open(config: &OutputConfig) -> Result<Arc<Self>> {
        if config.backend == OutputBackend::System {
            match Self::open_system() {
                Ok(ctx) => return Ok(ctx),
                Err(e) => warn!("System audio output unavailable, audio will be discarded: {}", e),
            }
        }
        Self::with_device(Box::new(HeadlessDevice::new(
            config.sample_rate,
            config.channels,
            config.block_frames,
        )))
    }

    #[cfg(feature = "device-output")]
    fn open_system() -> Result<Arc<Self>> {
        Self::with_device(Box::new(SystemDevice::open_default()?))
    }

    #[cfg(not(feature = "device-output"))]
    fn open_system() -> Result<Arc<Self>> {
        Err(EditorError::OutputDevice {
            reason: "built without the `device-output` feature".to_string(),
        })
    }

    /// Name of the output device, empty once closed
    pub fn device_name(&self) -> String {
        lock(&self.device)
            .as_ref()
            .map(|device| device.name().to_string())
            .unwrap_or_default()
    }

    /// Open a context on an explicit device
    pub fn with_device(mut device: Box<dyn OutputDevice>) -> Result<Arc<Self>> {
        let mixer = Arc::new(Mixer::new(device.sample_rate(), device.channels()));
        device.start(Arc::clone(&mixer))?;
        info!(
            "Audio context opened on '{}' ({} Hz, {} channels)",
            device.name(),
            mixer.sample_rate(),
            mixer.channels()
        );

        Ok(Arc::new(Self {
            mixer,
            device: Mutex::new(Some(device)),
            closed: AtomicBool::new(false),
        }))
    }

    /// Get the process-wide context, creating it on first use
    ///
    /// A closed shared context is replaced by a fresh one.
    pub fn shared(config: &OutputConfig) -> Result<Arc<Self>> {
        let mut guard = lock(&SHARED_CONTEXT);
        if let Some(ctx) = guard.as_ref() {
            if !ctx.is_closed() {
                return Ok(Arc::clone(ctx));
            }
        }
        let ctx = Self::open(config)?;
        *guard = Some(Arc::clone(&ctx));
        Ok(ctx)
    }

    /// Close and forget the process-wide context
    ///
    /// Returns false if there was no open shared context.
    pub fn close_shared() -> bool {
        let ctx = lock(&SHARED_CONTEXT).take();
        ctx.map(|ctx| ctx.close()).unwrap_or(false)
    }

    /// Output clock in seconds
    pub fn current_time(&self) -> f64 {
        self.mixer.current_time()
    }

    /// Output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate()
    }

    /// Check whether the context has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Start playing `asset` from `offset_secs` at `rate`
    ///
    /// Replaces any voice already playing. The returned receiver resolves
    /// when the voice reaches the end of the buffer; it errors if the voice
    /// is stopped first.
    pub fn start_voice(
        &self,
        asset: AudioAsset,
        offset_secs: f64,
        rate: f64,
    ) -> Result<(VoiceHandle, oneshot::Receiver<()>)> {
        if self.is_closed() {
            return Err(EditorError::ContextClosed);
        }

        let (ended_tx, ended_rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let position = offset_secs.max(0.0) * asset.sample_rate as f64;

        let previous = lock(&self.mixer.voice).replace(Voice {
            id,
            asset,
            position,
            rate,
            ended: Some(ended_tx),
        });
        if let Some(previous) = previous {
            warn!("Voice {} replaced by {}", previous.id, id);
        }

        Ok((
            VoiceHandle {
                id,
                mixer: Arc::clone(&self.mixer),
            },
            ended_rx,
        ))
    }

    /// Close the context: stop any voice and release the device
    ///
    /// Safe to call more than once; only the first call does anything and
    /// returns true.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Audio context already closed");
            return false;
        }

        self.mixer.clear();
        if let Some(mut device) = lock(&self.device).take() {
            device.stop();
        }
        info!("Audio context closed");
        true
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================
