//! Scoped stage timers for the stylizer pipeline.
//!
//! A [`TimingGuard`] measures one pipeline stage and reports the elapsed time on drop to the
//! `stylizer::telemetry` log target. Guards stay silent unless telemetry has been switched on
//! with [`configure`] *and* the logger accepts the requested level, so leaving them in hot paths
//! costs one atomic load.

use std::{
    borrow::Cow,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use log::{Level, LevelFilter, log, log_enabled};

/// Log target used for every timing record.
pub const TELEMETRY_TARGET: &str = "stylizer::telemetry";

static ENABLED: AtomicBool = AtomicBool::new(false);
static MAX_LEVEL: AtomicUsize = AtomicUsize::new(LevelFilter::Off as usize);

/// RAII timer created by [`timing_guard`] or [`timing_guard_if`].
pub struct TimingGuard {
    stage: Cow<'static, str>,
    level: Level,
    started: Instant,
    armed: bool,
}

impl TimingGuard {
    /// Whether a record will be emitted when the guard drops.
    pub fn is_active(&self) -> bool {
        self.armed
    }

    /// Time spent since the guard was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop the timer without logging and hand back the measured duration.
    pub fn finish(mut self) -> Duration {
        self.armed = false;
        self.started.elapsed()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log!(
            target: TELEMETRY_TARGET,
            self.level,
            "{} took {:.2?}",
            self.stage,
            self.started.elapsed()
        );
    }
}

/// Time a stage, reporting at `level` when telemetry allows it.
pub fn timing_guard(stage: impl Into<Cow<'static, str>>, level: Level) -> TimingGuard {
    timing_guard_if(stage, level, true)
}

/// Like [`timing_guard`], with an extra caller-controlled switch.
pub fn timing_guard_if(
    stage: impl Into<Cow<'static, str>>,
    level: Level,
    enabled: bool,
) -> TimingGuard {
    let armed = enabled && telemetry_allows(level) && log_enabled!(target: TELEMETRY_TARGET, level);
    TimingGuard {
        stage: stage.into(),
        level,
        started: Instant::now(),
        armed,
    }
}

/// Switch telemetry on or off and set the most verbose level it may report at.
pub fn configure(enabled: bool, max_level: LevelFilter) {
    ENABLED.store(enabled, Ordering::Relaxed);
    MAX_LEVEL.store(max_level as usize, Ordering::Relaxed);
}

/// Returns whether telemetry is switched on.
pub fn telemetry_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// The configured reporting ceiling.
pub fn telemetry_level() -> LevelFilter {
    let index = MAX_LEVEL.load(Ordering::Relaxed);
    LevelFilter::iter()
        .nth(index)
        .unwrap_or(LevelFilter::Off)
}

/// Returns `true` when telemetry is on and `level` is within the configured ceiling.
pub fn telemetry_allows(level: Level) -> bool {
    telemetry_enabled() && level <= telemetry_level()
}
