use std::time::Instant;

/// Smallest elapsed time a frame ever reports, in seconds.
///
/// Keeps the first frame and back-to-back ticks away from zero so the FPS
/// figure stays finite.
pub const MIN_ELAPSED_SECONDS: f32 = 1.0e-6;

/// Where per-frame elapsed time comes from.
pub trait TimeSource: Send {
    /// Forgets the previous tick.
    fn reset(&mut self);
    /// Seconds since the previous tick; zero on the first.
    fn tick(&mut self) -> f32;
}

/// Monotonic wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource {
    last: Option<Instant>,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.last = None;
    }

    fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let elapsed = self
            .last
            .map(|last| now.duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last = Some(now);
        elapsed
    }
}

pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

/// Produces the elapsed seconds fed to the camera each frame.
pub struct FrameClock {
    source: BoxedTimeSource,
}

impl FrameClock {
    pub fn new(source: BoxedTimeSource) -> Self {
        Self { source }
    }

    pub fn system() -> Self {
        Self::new(Box::new(SystemTimeSource::new()))
    }

    pub fn reset(&mut self) {
        self.source.reset();
    }

    /// Elapsed seconds since the previous tick, never below
    /// [`MIN_ELAPSED_SECONDS`].
    pub fn tick(&mut self) -> f32 {
        clamp_elapsed(self.source.tick())
    }
}

impl std::fmt::Debug for FrameClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameClock").finish_non_exhaustive()
    }
}

pub(crate) fn clamp_elapsed(seconds: f32) -> f32 {
    if seconds.is_finite() {
        seconds.max(MIN_ELAPSED_SECONDS)
    } else {
        MIN_ELAPSED_SECONDS
    }
}

/// Instantaneous frames per second for an elapsed time.
pub fn instantaneous_fps(elapsed_seconds: f32) -> f32 {
    1.0 / clamp_elapsed(elapsed_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_system_tick_is_clamped_away_from_zero() {
        let mut clock = FrameClock::system();
        assert_eq!(clock.tick(), MIN_ELAPSED_SECONDS);
        assert!(clock.tick() >= MIN_ELAPSED_SECONDS);
        clock.reset();
        assert_eq!(clock.tick(), MIN_ELAPSED_SECONDS);
    }

    struct Step(f32);

    impl TimeSource for Step {
        fn reset(&mut self) {}

        fn tick(&mut self) -> f32 {
            self.0
        }
    }

    #[test]
    fn custom_source_is_clamped() {
        let mut clock = FrameClock::new(Box::new(Step(0.25)));
        assert_eq!(clock.tick(), 0.25);
        assert_eq!(clock.tick(), 0.25);

        let mut broken = FrameClock::new(Box::new(Step(-3.0)));
        assert_eq!(broken.tick(), MIN_ELAPSED_SECONDS);
        let mut nan = FrameClock::new(Box::new(Step(f32::NAN)));
        assert_eq!(nan.tick(), MIN_ELAPSED_SECONDS);
    }

    #[test]
    fn fps_is_reciprocal_of_elapsed() {
        assert_eq!(instantaneous_fps(0.5), 2.0);
        assert!(instantaneous_fps(0.0).is_finite());
    }
}
