//! Training Progress Log
//!
//! Keeps the loss history of a run and reports it on the console with
//! elapsed time, learning rate and perplexity.
//!
//! ## Perplexity
//!
//! ```text
//! perplexity = exp(loss)
//! ```
//!
//! An untrained model guesses uniformly over the vocabulary, so its
//! perplexity starts near `vocab_size` (loss ≈ ln(vocab_size)). A perfect
//! model reaches 1.0.
//!
//! ## Example
//!
//! ```rust
//! use microgpt::progress::ProgressLog;
//!
//! let mut log = ProgressLog::new(100);
//! log.record(1, 0.01, 3.3);
//! log.record(2, 0.01, 3.1);
//! assert_eq!(log.len(), 2);
//! assert!((log.recent_mean(2).unwrap() - 3.2).abs() < 1e-6);
//! ```

use std::time::{Duration, Instant};
use tracing::info;

/// One recorded step
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressEntry {
    pub step: usize,
    pub elapsed: Duration,
    pub learning_rate: f32,
    pub loss: f32,
}

impl ProgressEntry {
    pub fn perplexity(&self) -> f32 {
        self.loss.exp()
    }
}

/// Loss history of one training run
#[derive(Clone, Debug)]
pub struct ProgressLog {
    total_steps: usize,
    start_time: Instant,
    last_log_time: Instant,
    entries: Vec<ProgressEntry>,
}

impl ProgressLog {
    pub fn new(total_steps: usize) -> Self {
        let now = Instant::now();
        Self {
            total_steps,
            start_time: now,
            last_log_time: now,
            entries: Vec::with_capacity(total_steps),
        }
    }

    /// Store a step without printing it
    pub fn record(&mut self, step: usize, learning_rate: f32, loss: f32) -> ProgressEntry {
        let entry = ProgressEntry {
            step,
            elapsed: self.start_time.elapsed(),
            learning_rate,
            loss,
        };
        self.entries.push(entry);
        entry
    }

    /// Store a step and log it
    pub fn log(&mut self, step: usize, learning_rate: f32, loss: f32) {
        let entry = self.record(step, learning_rate, loss);
        let step_time = self.last_log_time.elapsed().as_secs_f32();
        info!(
            "Step {:4}/{} | Time: {:7.1}s (+{:.2}s) | LR: {:.6} | Loss: {:.4} | Perplexity: {:.2}",
            step,
            self.total_steps,
            entry.elapsed.as_secs_f32(),
            step_time,
            learning_rate,
            loss,
            entry.perplexity()
        );
        self.last_log_time = Instant::now();
    }

    pub fn entries(&self) -> &[ProgressEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_loss(&self) -> Option<f32> {
        self.entries.last().map(|e| e.loss)
    }

    /// Mean loss of the last `window` entries
    pub fn recent_mean(&self, window: usize) -> Option<f32> {
        let losses: Vec<f32> = self.entries.iter().map(|e| e.loss).collect();
        moving_average(&losses, window).last().copied()
    }
}

/// Trailing moving average: element `i` is the mean of
/// `values[i+1-window..=i]` (fewer at the start)
///
/// # Example
///
/// ```rust
/// # use microgpt::progress::moving_average;
/// assert_eq!(moving_average(&[1.0, 3.0, 5.0], 2), vec![1.0, 2.0, 4.0]);
/// ```
pub fn moving_average(values: &[f32], window: usize) -> Vec<f32> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, &v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        out.push(sum / (i + 1).min(window) as f32);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_average_window() {
        let avg = moving_average(&[4.0, 2.0, 6.0, 0.0], 3);
        assert_eq!(avg, vec![4.0, 3.0, 4.0, 8.0 / 3.0]);
        assert!(moving_average(&[], 5).is_empty());
        assert_eq!(moving_average(&[2.0, 4.0], 0), vec![2.0, 4.0]);
    }

    #[test]
    fn test_log_tracks_entries() {
        let mut log = ProgressLog::new(3);
        assert!(log.is_empty());
        assert_eq!(log.recent_mean(5), None);
        log.log(1, 0.01, 2.0);
        log.log(2, 0.005, 1.0);
        assert_eq!(log.last_loss(), Some(1.0));
        assert_eq!(log.entries()[0].step, 1);
        assert!((log.entries()[1].perplexity() - 1.0f32.exp()).abs() < 1e-6);
    }
}
