use std::time::{Duration, Instant};

/// Wall clock measuring the render-loop delta.
pub struct Time {
    start: Instant,
    last: Instant,
    pub delta: Duration,
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

impl Time {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { start: now, last: now, delta: Duration::from_secs_f32(0.0) }
    }
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last;
        self.last = now;
    }
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }
    pub fn elapsed_seconds(&self) -> f32 {
        self.last.duration_since(self.start).as_secs_f32()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    Playing,
    #[default]
    Paused,
}

impl PlaybackState {
    pub fn label(self) -> &'static str {
        match self {
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }
}

/// Animation time accumulator. Advanced once per rendered frame; `time` is
/// never negative and has no upper bound.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackClock {
    state: PlaybackState,
    time: f64,
    speed: f32,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self { state: PlaybackState::Paused, time: 0.0, speed: 1.0 }
    }
}

impl PlaybackClock {
    pub fn new(speed: f32) -> Self {
        let mut clock = Self::default();
        clock.set_speed(speed);
        clock
    }

    pub fn play(&mut self) {
        self.state = PlaybackState::Playing;
    }

    pub fn pause(&mut self) {
        self.state = PlaybackState::Paused;
    }

    pub fn toggle(&mut self) {
        self.state = match self.state {
            PlaybackState::Playing => PlaybackState::Paused,
            PlaybackState::Paused => PlaybackState::Playing,
        };
    }

    /// Rewinds to zero without touching the play state.
    pub fn reset(&mut self) {
        self.time = 0.0;
    }

    /// Non-finite values are ignored; negative values clamp to zero.
    pub fn set_speed(&mut self, speed: f32) {
        if speed.is_finite() {
            self.speed = speed.max(0.0);
        }
    }

    pub fn advance(&mut self, elapsed_seconds: f32) {
        if self.state != PlaybackState::Playing || !elapsed_seconds.is_finite() || elapsed_seconds <= 0.0 {
            return;
        }
        self.time += elapsed_seconds as f64 * self.speed as f64;
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Time folded into `[0, duration)` for upload as `f32`. The frame index
    /// the shader derives from it equals the one derived from the raw time.
    pub fn wrapped_time(&self, duration: f32) -> f32 {
        if duration.is_finite() && duration > 0.0 {
            self.time.rem_euclid(duration as f64) as f32
        } else {
            self.time as f32
        }
    }
}
