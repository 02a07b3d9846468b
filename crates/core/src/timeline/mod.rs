//! Capture scheduling keyed to audio playback time rather than wall time.

use crate::{audio::Transport, MuseError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CapturePhase {
    #[default]
    Idle,
    Capturing,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TrackEnded,
    Paused,
    Requested,
    EncoderFailed,
}

/// Tracks how many output frames have been emitted against elapsed audio
/// time. `emitted()` always equals `floor(t * fps)` for the `t` of the last
/// emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClock {
    fps: u32,
    emitted: u64,
}

impl FrameClock {
    pub fn new(fps: u32) -> Self {
        Self { fps, emitted: 0 }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn expected_at(&self, elapsed: f64) -> u64 {
        if !elapsed.is_finite() || elapsed <= 0.0 {
            return 0;
        }
        (elapsed * f64::from(self.fps)).floor() as u64
    }

    /// Number of output frames the next still should cover, or `None` when
    /// no frame is due yet. Advances the emitted count on `Some`.
    pub fn due(&mut self, elapsed: f64) -> Option<u64> {
        let expected = self.expected_at(elapsed);
        if expected <= self.emitted {
            return None;
        }
        let repeat = expected - self.emitted;
        self.emitted = expected;
        Some(repeat)
    }
}

/// Result of one display-refresh tick while capturing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub elapsed: f64,
    /// Output frames the still captured this tick should cover. Zero means
    /// no capture is due.
    pub repeat_count: u64,
    pub progress: f32,
    /// Set when the session must move to finalizing after this tick.
    pub stop: Option<StopReason>,
}

/// Drives a fixed-rate capture loop from the audio transport's clock.
#[derive(Debug, Clone)]
pub struct CaptureScheduler {
    phase: CapturePhase,
    clock: FrameClock,
    live: bool,
}

impl Default for CaptureScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureScheduler {
    pub fn new() -> Self {
        Self {
            phase: CapturePhase::Idle,
            clock: FrameClock::new(60),
            live: false,
        }
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    /// Guard checked at the top of every tick; cleared by a stop request.
    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn emitted_frames(&self) -> u64 {
        self.clock.emitted()
    }

    /// `Idle -> Capturing`: plays the transport from the start at
    /// `capture_speed`.
    pub fn begin<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        fps: u32,
        capture_speed: f64,
    ) -> Result<()> {
        if self.phase != CapturePhase::Idle {
            return Err(MuseError::ConcurrentExportRejected);
        }
        if !transport.is_loaded() {
            return Err(MuseError::NoTrackLoaded);
        }
        if fps == 0 {
            return Err(MuseError::InvalidInput("frame rate must be non-zero"));
        }
        if !(capture_speed.is_finite() && capture_speed > 0.0) {
            return Err(MuseError::InvalidInput("capture speed must be positive"));
        }

        transport.set_speed(capture_speed);
        transport.seek(0.0);
        if let Err(err) = transport.play() {
            restore(transport);
            return Err(err);
        }

        self.clock = FrameClock::new(fps);
        self.phase = CapturePhase::Capturing;
        self.live = true;
        tracing::info!(fps, capture_speed, "capture started");
        Ok(())
    }

    /// One display-refresh tick. Returns `None` once the liveness guard has
    /// been cleared, so late ticks after a stop do nothing.
    pub fn tick<T: Transport + ?Sized>(&mut self, transport: &T) -> Option<Tick> {
        if !self.live || self.phase != CapturePhase::Capturing {
            return None;
        }

        let elapsed = transport.elapsed();
        let stop = if transport.is_ended() {
            Some(StopReason::TrackEnded)
        } else if transport.is_paused() {
            Some(StopReason::Paused)
        } else {
            None
        };

        // Frames due up to the stopping point are still emitted.
        let repeat_count = self.clock.due(elapsed).unwrap_or(0);
        if repeat_count > 0 {
            tracing::debug!(elapsed, repeat_count, emitted = self.clock.emitted(), "frame due");
        }

        Some(Tick {
            elapsed,
            repeat_count,
            progress: progress(elapsed, transport.duration()),
            stop,
        })
    }

    /// `Capturing -> Finalizing`. Clears the liveness guard; no further tick
    /// does any work.
    pub fn request_stop(&mut self) {
        self.live = false;
        if self.phase == CapturePhase::Capturing {
            self.phase = CapturePhase::Finalizing;
        }
    }

    /// `Finalizing -> Idle`: hands the transport back to normal playback
    /// at speed 1.0, paused and rewound.
    pub fn finish<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        self.live = false;
        restore(transport);
        self.phase = CapturePhase::Idle;
        tracing::info!(emitted = self.clock.emitted(), "capture finished");
    }
}

fn restore<T: Transport + ?Sized>(transport: &mut T) {
    transport.set_speed(1.0);
    transport.pause();
    transport.seek(0.0);
}

/// Percentage of the track played, clamped to `[0, 100]`. An unknown
/// duration counts as one second.
pub fn progress(elapsed: f64, duration: f64) -> f32 {
    let duration = if duration > 0.0 { duration } else { 1.0 };
    ((elapsed / duration) * 100.0).clamp(0.0, 100.0) as f32
}
