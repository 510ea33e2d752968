//! Playback transport
//!
//! Plays the loaded asset through the output context at an adjustable rate
//! and tracks the elapsed position.
//!
//! State machine:
//! - `play()`: Idle → Playing
//! - `pause()` or natural end: Playing → Idle
//!
//! Position tracking is a single periodic task per playback session. It is
//! cancelled through the session's token on pause, and ends by itself when
//! the voice reaches the end of the buffer.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PlaybackConfig;
use crate::engine::buffer::AudioAsset;
use crate::engine::context::{AudioContext, VoiceHandle};

/// Slowest supported playback rate
pub const MIN_RATE: f64 = 0.5;

/// Fastest supported playback rate
pub const MAX_RATE: f64 = 3.0;

/// Clamp a requested playback rate into the supported range
///
/// Returns `None` for NaN.
pub fn clamp_rate(rate: f64) -> Option<f64> {
    if rate.is_nan() {
        None
    } else {
        Some(rate.clamp(MIN_RATE, MAX_RATE))
    }
}

/// Playback states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Nothing is playing (default state)
    #[default]
    Idle,
    /// The asset is being played
    Playing,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "Idle"),
            PlaybackState::Playing => write!(f, "Playing"),
        }
    }
}

/// An active playback, from `play()` until pause or natural end
struct PlaybackSession {
    id: Uuid,
    voice: VoiceHandle,
    /// Context clock time corresponding to position zero
    start_clock: f64,
    duration: f64,
    tracker: CancellationToken,
}

struct Inner {
    state: PlaybackState,
    asset: Option<AudioAsset>,
    rate: f64,
    /// Elapsed position in seconds, valid while Idle
    elapsed: f64,
    session: Option<PlaybackSession>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Controls playback of the current asset
///
/// Cheap to clone; clones share the same transport.
#[derive(Clone)]
pub struct PlaybackController {
    context: Arc<AudioContext>,
    inner: Arc<Mutex<Inner>>,
    position_tx: Arc<watch::Sender<f64>>,
    refresh_interval: Duration,
}

impl PlaybackController {
    /// Create a controller that plays through `context`
    pub fn new(context: Arc<AudioContext>, config: &PlaybackConfig) -> Self {
        let (position_tx, _) = watch::channel(0.0);
        Self {
            context,
            inner: Arc::new(Mutex::new(Inner {
                state: PlaybackState::Idle,
                asset: None,
                rate: clamp_rate(config.default_rate).unwrap_or(1.0),
                elapsed: 0.0,
                session: None,
            })),
            position_tx: Arc::new(position_tx),
            refresh_interval: Duration::from_millis(config.refresh_interval_ms.max(1)),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current state
    pub fn state(&self) -> PlaybackState {
        lock(&self.inner).state
    }

    /// Check if currently playing
    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Stored playback rate
    pub fn rate(&self) -> f64 {
        lock(&self.inner).rate
    }

    /// The asset playback operates on
    pub fn asset(&self) -> Option<AudioAsset> {
        lock(&self.inner).asset.clone()
    }

    /// Elapsed position in seconds
    ///
    /// While playing this is read from the output clock, so it can be
    /// ahead of the last published tracker value.
    pub fn elapsed(&self) -> f64 {
        let inner = lock(&self.inner);
        match &inner.session {
            Some(session) => self.position_of(session),
            None => inner.elapsed,
        }
    }

    /// Subscribe to the position published by the tracker
    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.position_tx.subscribe()
    }

    /// Identifier of the active playback session
    pub fn session_id(&self) -> Option<Uuid> {
        lock(&self.inner).session.as_ref().map(|s| s.id)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Replace the asset
    ///
    /// Stops any active playback and rewinds to the start.
    pub fn set_asset(&self, asset: Option<AudioAsset>) {
        let mut inner = lock(&self.inner);
        if let Some(session) = inner.session.take() {
            session.tracker.cancel();
            session.voice.stop();
            debug!("Playback session {} stopped by asset change", session.id);
        }
        inner.asset = asset;
        inner.state = PlaybackState::Idle;
        inner.elapsed = 0.0;
        drop(inner);
        self.position_tx.send_replace(0.0);
    }

    /// Start playback from the elapsed position at the stored rate
    ///
    /// Does nothing when already playing, when no asset is loaded, or when
    /// the output context is closed. Returns true if playback started.
    pub fn play(&self) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("play() called outside a tokio runtime, ignored");
            return false;
        };

        let mut inner = lock(&self.inner);
        if inner.state == PlaybackState::Playing {
            debug!("play() ignored: already playing");
            return false;
        }
        let Some(asset) = inner.asset.clone() else {
            debug!("play() ignored: no asset loaded");
            return false;
        };

        let offset = inner.elapsed;
        let (voice, ended) = match self.context.start_voice(Arc::clone(&asset), offset, inner.rate)
        {
            Ok(started) => started,
            Err(e) => {
                debug!("play() ignored: {}", e);
                return false;
            }
        };

        let session = PlaybackSession {
            id: voice.id(),
            voice,
            start_clock: self.context.current_time() - offset,
            duration: asset.duration_secs(),
            tracker: CancellationToken::new(),
        };
        debug!(
            "Playback session {} started at {:.3}s, rate {}",
            session.id, offset, inner.rate
        );

        runtime.spawn(self.clone().track(
            session.id,
            session.start_clock,
            session.duration,
            ended,
            session.tracker.clone(),
        ));
        inner.session = Some(session);
        inner.state = PlaybackState::Playing;
        true
    }

    /// Stop playback, keeping the elapsed position for resume
    ///
    /// A voice that already left the mixer reached the end before the
    /// tracker noticed, so the position rewinds as on a natural end.
    /// Returns false if nothing was playing.
    pub fn pause(&self) -> bool {
        let mut inner = lock(&self.inner);
        let Some(session) = inner.session.take() else {
            return false;
        };

        session.tracker.cancel();
        let position = if session.voice.stop() {
            self.position_of(&session)
        } else {
            0.0
        };
        inner.elapsed = position;
        inner.state = PlaybackState::Idle;
        drop(inner);

        self.position_tx.send_replace(position);
        debug!("Playback session {} paused at {:.3}s", session.id, position);
        true
    }

    /// Set the playback rate, clamped to `MIN_RATE..=MAX_RATE`
    ///
    /// An active voice changes speed without restarting. Returns the rate
    /// that was applied.
    pub fn set_rate(&self, rate: f64) -> f64 {
        let mut inner = lock(&self.inner);
        let Some(clamped) = clamp_rate(rate) else {
            warn!("Ignoring playback rate {}", rate);
            return inner.rate;
        };
        if clamped != rate {
            warn!("Playback rate {} clamped to {}", rate, clamped);
        }

        inner.rate = clamped;
        if let Some(session) = &inner.session {
            session.voice.set_rate(clamped);
        }
        clamped
    }

    /// Stop playback and tracking for good; the elapsed position resets
    pub fn shutdown(&self) {
        self.set_asset(None);
    }

    // ========================================================================
    // Position tracking
    // ========================================================================

    fn position_of(&self, session: &PlaybackSession) -> f64 {
        (self.context.current_time() - session.start_clock).clamp(0.0, session.duration)
    }

    async fn track(
        self,
        id: Uuid,
        start_clock: f64,
        duration: f64,
        mut ended: oneshot::Receiver<()>,
        token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = &mut ended => {
                    // Err means the voice was stopped or replaced, not finished
                    if result.is_ok() {
                        self.finish(id);
                    }
                    break;
                }
                _ = ticker.tick() => {
                    let position = (self.context.current_time() - start_clock).clamp(0.0, duration);
                    self.position_tx.send_replace(position);
                }
            }
        }
    }

    /// Natural end: rewind and go idle, unless the session was already replaced
    fn finish(&self, id: Uuid) {
        let mut inner = lock(&self.inner);
        if inner.session.as_ref().map(|s| s.id) != Some(id) {
            return;
        }
        inner.session = None;
        inner.state = PlaybackState::Idle;
        inner.elapsed = 0.0;
        drop(inner);

        self.position_tx.send_replace(0.0);
        debug!("Playback session {} reached the end", id);
    }
}

// ============================================================================
// Tests
// ============================================================================
