//! Best-effort teardown aggregation.
//!
//! Unmount must reclaim as much state as possible: every step is
//! attempted, failures are recorded instead of short-circuiting, and the
//! caller decides what to do with the summary.

use pubvol_common::{VolError, VolResult};

/// Outcome of one teardown step.
#[derive(Debug)]
pub struct TeardownStep {
    /// Human-readable step name.
    pub name: &'static str,
    /// The error, if the step failed.
    pub error: Option<VolError>,
}

/// Collector running fallible teardown steps to completion.
#[derive(Debug, Default)]
pub struct Teardown {
    steps: Vec<TeardownStep>,
}

impl Teardown {
    /// Empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `step`, recording its outcome. Failures are logged and kept,
    /// never propagated.
    pub fn run(&mut self, name: &'static str, step: impl FnOnce() -> VolResult<()>) {
        let error = match step() {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(step = name, error = %e, "Teardown step failed, continuing");
                Some(e)
            }
        };
        self.steps.push(TeardownStep { name, error });
    }

    /// Whether every step so far succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.error.is_none())
    }

    /// The steps that failed.
    pub fn failures(&self) -> impl Iterator<Item = &TeardownStep> {
        self.steps.iter().filter(|s| s.error.is_some())
    }

    /// Number of steps attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_do_not_stop_later_steps() {
        let mut td = Teardown::new();
        td.run("first", || Err(VolError::Io(std::io::Error::other("boom"))));
        td.run("second", || Ok(()));
        td.run("third", || Err(VolError::Io(std::io::Error::other("boom"))));

        assert_eq!(td.attempted(), 3);
        assert!(!td.is_clean());
        let failed: Vec<&str> = td.failures().map(|s| s.name).collect();
        assert_eq!(failed, ["first", "third"]);
    }

    #[test]
    fn clean_run() {
        let mut td = Teardown::new();
        td.run("only", || Ok(()));
        assert!(td.is_clean());
        assert_eq!(td.failures().count(), 0);
    }
}
