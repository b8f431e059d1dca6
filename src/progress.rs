//! Run notifications and pacing.
//!
//! The runner reports its lifecycle through [`ProgressObserver`]. The default
//! [`LogObserver`] forwards every event to the `log` facade.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use crate::modes::IterationMode;

/// Lifecycle notifications emitted during a run
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The run started
    Started { modes: usize, saved_variants: usize },
    /// A different iteration mode became active
    ModeChanged {
        mode: IterationMode,
        mode_index: usize,
        tests: u64,
    },
    /// Periodic report during long runs
    Progress {
        tests: u64,
        elapsed: Duration,
        mode: Option<IterationMode>,
    },
    /// A test failed
    Error {
        test_index: u64,
        args: String,
        error: String,
    },
    /// The run finished
    Completed {
        tests: u64,
        elapsed: Duration,
        failed: bool,
    },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Started { modes, saved_variants } => write!(
                f,
                "start: {} iteration modes, {} saved variants to replay",
                modes, saved_variants
            ),
            ProgressEvent::ModeChanged { mode, mode_index, tests } => {
                write!(f, "mode #{} ({}) after {} tests", mode_index, mode, tests)
            }
            ProgressEvent::Progress { tests, elapsed, mode } => {
                write!(f, "{} tests in {:.1?}", tests, elapsed)?;
                if let Some(mode) = mode {
                    write!(f, " ({})", mode)?;
                }
                Ok(())
            }
            ProgressEvent::Error { test_index, args, error } => {
                write!(f, "test #{} failed: {} with {}", test_index, error, args)
            }
            ProgressEvent::Completed { tests, elapsed, failed } => write!(
                f,
                "completed {} tests in {:.1?}{}",
                tests,
                elapsed,
                if *failed { " with errors" } else { "" }
            ),
        }
    }
}

/// Receiver of run notifications
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Writes every event to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Error { .. } => log::warn!("{}", event),
            ProgressEvent::Progress { .. } => log::debug!("{}", event),
            _ => log::info!("{}", event),
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentObserver;

impl ProgressObserver for SilentObserver {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Periodic pause to relieve resource pressure in long synchronous loops
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PauseConfig {
    /// Pause after this many tests
    pub every_tests: Option<u64>,
    /// Pause after this much wall time
    pub every_time: Option<Duration>,
    /// Length of each pause; zero only yields the thread
    pub pause: Duration,
}

/// Tracks when the next pause or progress report is due
#[derive(Debug)]
pub struct Pacer {
    config: PauseConfig,
    last_pause_tests: u64,
    last_pause_at: Instant,
    log_interval: Option<Duration>,
    last_log_at: Instant,
}

impl Pacer {
    pub fn new(config: PauseConfig, log_interval: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            config,
            last_pause_tests: 0,
            last_pause_at: now,
            log_interval,
            last_log_at: now,
        }
    }

    /// Pause when due. Returns whether a pause happened.
    pub fn maybe_pause(&mut self, tests: u64) -> bool {
        let by_tests = self
            .config
            .every_tests
            .map_or(false, |every| every > 0 && tests - self.last_pause_tests >= every);
        let by_time = self
            .config
            .every_time
            .map_or(false, |every| self.last_pause_at.elapsed() >= every);
        if !by_tests && !by_time {
            return false;
        }
        if self.config.pause.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(self.config.pause);
        }
        self.last_pause_tests = tests;
        self.last_pause_at = Instant::now();
        true
    }

    /// Whether a periodic progress report is due; resets the interval when it is
    pub fn progress_due(&mut self) -> bool {
        match self.log_interval {
            Some(interval) if self.last_log_at.elapsed() >= interval => {
                self.last_log_at = Instant::now();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pauses_by_test_count() {
        let mut pacer = Pacer::new(
            PauseConfig {
                every_tests: Some(3),
                every_time: None,
                pause: Duration::ZERO,
            },
            None,
        );
        let paused: Vec<bool> = (1..=7).map(|tests| pacer.maybe_pause(tests)).collect();
        assert_eq!(paused, vec![false, false, true, false, false, true, false]);
    }

    #[test]
    fn never_pauses_without_configuration() {
        let mut pacer = Pacer::new(PauseConfig::default(), None);
        assert!(!(0..100).any(|tests| pacer.maybe_pause(tests)));
        assert!(!pacer.progress_due());
    }

    #[test]
    fn zero_interval_reports_every_time() {
        let mut pacer = Pacer::new(PauseConfig::default(), Some(Duration::ZERO));
        assert!(pacer.progress_due());
        assert!(pacer.progress_due());
    }

    #[test]
    fn events_render_for_logs() {
        let event = ProgressEvent::ModeChanged {
            mode: IterationMode::Backward,
            mode_index: 1,
            tests: 10,
        };
        assert_eq!(event.to_string(), "mode #1 (backward) after 10 tests");
    }
}
