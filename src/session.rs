//! Training Session
//!
//! A [`TrainingSession`] owns everything one `train` request needs: the
//! tokenizer, the model, the optimizer and the encoded document. It is built
//! from a validated request and dropped when the run ends; only the trained
//! model and tokenizer survive (as a [`TrainedModel`]) so `generate` can use
//! them.
//!
//! ## Loop
//!
//! ```text
//! for step in 1..=max_steps
//!     cancel flag set?             → Cancelled
//!     train_step on this step's window, Adam update
//!     step or run over budget?     → TimedOut
//!     progress  every progress_interval steps and on the last
//!     snapshot  every snapshot_interval steps
//!     every yield_interval steps: yield the thread, run the drain callback
//! → Completed
//! ```
//!
//! Cancellation is observed only between steps; a step in flight always
//! finishes, so the weights are never left half-updated.

use crate::backend::ComputeBackend;
use crate::config::{validate_run, AdamConfig, Architecture, HostLimits, ValidatedRun};
use crate::error::{EngineError, Result};
use crate::messages::Response;
use crate::model::MicroGpt;
use crate::optimizer::AdamOptimizer;
use crate::snapshot::{SnapshotConfig, WeightsSnapshot};
use crate::tokenizer::CharTokenizer;
use crate::train::{train_step, window_for_step};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a run ended
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RunOutcome {
    /// All steps ran
    Completed { steps: usize, final_loss: Option<f32> },
    /// The cancel flag was seen before step `steps + 1`
    Cancelled { steps: usize, final_loss: Option<f32> },
    /// Step `step` (1-based) pushed the step or run time over budget
    TimedOut { step: usize },
}

/// A trained model ready for sampling
#[derive(Clone, Debug)]
pub struct TrainedModel {
    pub model: MicroGpt,
    pub tokenizer: CharTokenizer,
}

/// State of one training run
pub struct TrainingSession {
    model: MicroGpt,
    tokenizer: CharTokenizer,
    optimizer: AdamOptimizer,
    tokens: Vec<usize>,
    limits: HostLimits,
    snapshot_config: SnapshotConfig,
}

impl TrainingSession {
    /// Validate a request and build the session
    ///
    /// Nothing is allocated for the model until validation has passed.
    pub fn from_request(
        text: &str,
        arch: &Architecture,
        adam: &AdamConfig,
        limits: HostLimits,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self> {
        let run = validate_run(text, arch, adam, &limits)?;
        Ok(Self::new(run, limits, backend))
    }

    pub fn new(run: ValidatedRun, limits: HostLimits, backend: Arc<dyn ComputeBackend>) -> Self {
        let tokenizer = CharTokenizer::new(&run.text);
        let config = run.model;
        let model = MicroGpt::new(config).with_backend(backend);
        let optimizer = AdamOptimizer::new(&model, run.adam);
        let tokens = tokenizer.encode_doc(&run.text);
        let snapshot_config = SnapshotConfig::new(&config, &tokenizer);

        info!(
            params = model.param_count(),
            vocab = tokenizer.vocab_size(),
            tokens = tokens.len(),
            backend = model.backend().name(),
            "training session ready"
        );

        Self {
            model,
            tokenizer,
            optimizer,
            tokens,
            limits,
            snapshot_config,
        }
    }

    pub fn param_count(&self) -> usize {
        self.model.param_count()
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.vocab_size()
    }

    pub fn total_steps(&self) -> usize {
        self.optimizer.config.max_steps
    }

    pub fn model(&self) -> &MicroGpt {
        &self.model
    }

    /// The `ready` message for this session
    pub fn ready(&self) -> Response {
        Response::Ready {
            param_count: self.param_count(),
            vocab_size: self.vocab_size(),
        }
    }

    /// Run the training loop
    ///
    /// # Arguments
    ///
    /// * `cancel` - Checked before every step
    /// * `emit` - Receives `progress` and `weights-snapshot` messages
    /// * `drain` - Called every `yield_interval` steps so the host can look at
    ///   pending requests (and set `cancel`)
    ///
    /// # Errors
    ///
    /// Fails if the loss becomes non-finite; the diverged update is not applied
    pub fn run<E, D>(&mut self, cancel: &AtomicBool, mut emit: E, mut drain: D) -> Result<RunOutcome>
    where
        E: FnMut(Response),
        D: FnMut(),
    {
        let total = self.total_steps();
        let block_size = self.model.config.block_size;
        let run_start = Instant::now();
        let mut final_loss = None;

        info!(total_steps = total, lr = self.optimizer.config.lr, "training started");

        for step in 0..total {
            if cancel.load(Ordering::SeqCst) {
                info!(steps = step, "training cancelled");
                return Ok(RunOutcome::Cancelled {
                    steps: step,
                    final_loss,
                });
            }

            let step_start = Instant::now();
            let window = window_for_step(&self.tokens, block_size, step);
            let loss = train_step(&mut self.model, window)?;
            if !loss.is_finite() {
                return Err(EngineError::Diverged(step + 1));
            }
            self.optimizer.step(&mut self.model);

            let done = step + 1;
            let step_time = step_start.elapsed();
            if step_time > self.limits.step_budget || run_start.elapsed() > self.limits.run_budget {
                warn!(
                    step = done,
                    step_ms = step_time.as_millis() as u64,
                    run_ms = run_start.elapsed().as_millis() as u64,
                    "training exceeded its time budget"
                );
                return Ok(RunOutcome::TimedOut { step: done });
            }
            final_loss = Some(loss);

            if done % self.limits.progress_interval.max(1) == 0 || done == total {
                debug!(step = done, loss, lr = self.optimizer.current_lr(), "progress");
                emit(Response::Progress {
                    step: done,
                    loss,
                    total_steps: total,
                });
            }

            if self.limits.snapshot_interval > 0 && done % self.limits.snapshot_interval == 0 {
                emit(self.snapshot(done));
            }

            if step % self.limits.yield_interval.max(1) == 0 {
                thread::yield_now();
                drain();
            }
        }

        info!(
            steps = total,
            final_loss,
            elapsed_ms = run_start.elapsed().as_millis() as u64,
            "training complete"
        );
        Ok(RunOutcome::Completed {
            steps: total,
            final_loss,
        })
    }

    /// A deep copy of the current weights as a `weights-snapshot` message
    pub fn snapshot(&self, step: usize) -> Response {
        Response::WeightsSnapshot {
            weights: Box::new(WeightsSnapshot::capture(&self.model)),
            config: self.snapshot_config.clone(),
            step,
        }
    }

    /// Keep the model and tokenizer, dropping optimizer state and the document
    pub fn into_trained(self) -> TrainedModel {
        TrainedModel {
            model: self.model,
            tokenizer: self.tokenizer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use std::time::Duration;

    fn session(max_steps: usize, limits: HostLimits) -> TrainingSession {
        let arch = Architecture {
            block_size: 16,
            n_layer: 1,
            n_head: 2,
            n_embd: 16,
        };
        let adam = AdamConfig {
            max_steps,
            ..AdamConfig::default()
        };
        TrainingSession::from_request("abcabcabc", &arch, &adam, limits, Arc::new(CpuBackend)).unwrap()
    }

    #[test]
    fn test_rejects_invalid_request_before_building() {
        let arch = Architecture {
            n_embd: 15,
            ..Architecture::tiny()
        };
        let result = TrainingSession::from_request(
            "abc",
            &arch,
            &AdamConfig::default(),
            HostLimits::default(),
            Arc::new(CpuBackend),
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_completed_run_emits_progress_every_step() {
        let mut s = session(5, HostLimits::default());
        assert_eq!(s.ready(), Response::Ready { param_count: s.param_count(), vocab_size: 4 });

        let cancel = AtomicBool::new(false);
        let mut messages = Vec::new();
        let outcome = s.run(&cancel, |m| messages.push(m), || {}).unwrap();

        assert!(matches!(outcome, RunOutcome::Completed { steps: 5, final_loss: Some(_) }));
        let steps: Vec<usize> = messages
            .iter()
            .filter_map(|m| match m {
                Response::Progress { step, total_steps: 5, .. } => Some(*step),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_throttled_progress_always_reports_last_step() {
        let limits = HostLimits {
            progress_interval: 4,
            snapshot_interval: 3,
            ..HostLimits::default()
        };
        let mut s = session(6, limits);
        let mut kinds = Vec::new();
        s.run(&AtomicBool::new(false), |m| kinds.push(m.kind()), || {}).unwrap();
        assert_eq!(kinds, vec!["weights-snapshot", "progress", "progress", "weights-snapshot"]);
    }

    #[test]
    fn test_cancel_before_start() {
        let mut s = session(5, HostLimits::default());
        let outcome = s.run(&AtomicBool::new(true), |_| panic!("no messages"), || {}).unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Cancelled {
                steps: 0,
                final_loss: None
            }
        );
    }

    #[test]
    fn test_drain_can_cancel_mid_run() {
        let limits = HostLimits {
            yield_interval: 2,
            ..HostLimits::default()
        };
        let mut s = session(50, limits);
        let cancel = AtomicBool::new(false);
        let mut drains = 0;
        let outcome = s
            .run(&cancel, |_| {}, || {
                drains += 1;
                if drains == 2 {
                    cancel.store(true, Ordering::SeqCst);
                }
            })
            .unwrap();
        // drains after steps 1 and 3
        assert!(matches!(outcome, RunOutcome::Cancelled { steps: 3, final_loss: Some(_) }));
        assert!(s.model().is_finite());
    }

    #[test]
    fn test_zero_step_budget_times_out_first_step() {
        let limits = HostLimits {
            step_budget: Duration::ZERO,
            ..HostLimits::default()
        };
        let mut s = session(5, limits);
        let outcome = s.run(&AtomicBool::new(false), |_| {}, || {}).unwrap();
        assert_eq!(outcome, RunOutcome::TimedOut { step: 1 });
    }

    #[test]
    fn test_into_trained_keeps_tokenizer() {
        let s = session(1, HostLimits::default());
        let trained = s.into_trained();
        assert_eq!(trained.tokenizer.chars(), &['a', 'b', 'c']);
        assert_eq!(trained.model.config.vocab_size, 4);
    }
}
