//! Wall-clock timing for progress reports.

use std::time::{Duration, Instant};

/// Restartable stopwatch.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    start: Option<Instant>,
    total: Duration,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    pub fn new() -> Self {
        Self { start: None, total: Duration::ZERO }
    }

    /// A stopwatch that is already running.
    pub fn started() -> Self {
        let mut sw = Self::new();
        sw.start();
        sw
    }

    pub fn start(&mut self) {
        self.start = Some(Instant::now());
    }

    /// Stop and return the length of the interval just ended, in seconds.
    pub fn stop(&mut self) -> f64 {
        match self.start.take() {
            Some(t0) => {
                let dt = t0.elapsed();
                self.total += dt;
                dt.as_secs_f64()
            }
            None => 0.0,
        }
    }

    /// Accumulated seconds over all completed intervals plus the running one.
    pub fn total(&self) -> f64 {
        let running = self.start.map(|t0| t0.elapsed()).unwrap_or(Duration::ZERO);
        (self.total + running).as_secs_f64()
    }

    pub fn reset(&mut self) {
        self.start = None;
        self.total = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopwatch_accumulates() {
        let mut sw = Stopwatch::started();
        let first = sw.stop();
        assert!(first >= 0.0);
        assert!(sw.total() >= first);
        assert_eq!(sw.stop(), 0.0);
        sw.reset();
        assert_eq!(sw.total(), 0.0);
    }
}
