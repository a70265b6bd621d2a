//! Training Worker
//!
//! Runs training on a dedicated thread so a slow or hung step never blocks the
//! caller. The caller talks to it only through [`Request`] and [`Response`]
//! messages; the model, optimizer state and key/value caches never leave the
//! worker thread.
//!
//! ```text
//!  caller                           worker thread
//!  ──────                           ─────────────
//!  post(Train) ───── requests ────▶ validate → ready → loop ──┐
//!  post(Stop)  ── sets cancel flag ─────────▶ checked between │ steps
//!  recv()      ◀──── responses ──── progress / snapshot ◀─────┘
//!                                   complete | timeout | error
//! ```
//!
//! ## Lifecycle
//!
//! - A `train` request builds a fresh [`TrainingSession`]; the previous model
//!   is replaced only once the new run finishes or is cancelled.
//! - Requests that arrive while training (other than `stop`) are queued and
//!   handled after the run.
//! - A `timeout` shuts the worker down. Later posts fail with
//!   [`EngineError::WorkerGone`].
//! - A panic inside a run is caught here and reported as `error`; the worker
//!   keeps serving requests.

use crate::backend::{select_backend, BackendSelection};
use crate::config::HostLimits;
use crate::error::{EngineError, Result};
use crate::generate::generate;
use crate::messages::{Request, Response};
use crate::session::{RunOutcome, TrainedModel, TrainingSession};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Caller side of a training worker
pub struct WorkerHandle {
    requests: Option<Sender<Request>>,
    responses: Receiver<Response>,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Start a worker thread
    ///
    /// The worker computes on the CPU until an `init_gpu` request finds an
    /// adapter.
    pub fn spawn(limits: HostLimits) -> Result<Self> {
        let (req_tx, req_rx) = mpsc::channel();
        let (resp_tx, resp_rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            limits,
            backend: BackendSelection::cpu(),
            trained: None,
            cancel: Arc::clone(&cancel),
            requests: req_rx,
            responses: resp_tx,
            deferred: VecDeque::new(),
        };

        let thread = thread::Builder::new()
            .name("microgpt-worker".into())
            .spawn(move || worker.serve())
            .map_err(|e| EngineError::WorkerPanic(format!("failed to spawn worker: {}", e)))?;

        Ok(Self {
            requests: Some(req_tx),
            responses: resp_rx,
            cancel,
            thread: Some(thread),
        })
    }

    /// Send a request
    ///
    /// `stop` also raises the cancel flag directly, so a running loop sees it
    /// at its next step boundary.
    pub fn post(&self, request: Request) -> Result<()> {
        if matches!(request, Request::Stop) {
            self.cancel.store(true, Ordering::SeqCst);
        }
        self.requests
            .as_ref()
            .ok_or(EngineError::WorkerGone)?
            .send(request)
            .map_err(|_| EngineError::WorkerGone)
    }

    /// Block until the next response
    pub fn recv(&self) -> Result<Response> {
        self.responses.recv().map_err(|_| EngineError::WorkerGone)
    }

    /// Wait up to `timeout` for the next response; `None` if none arrived
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Response>> {
        match self.responses.recv_timeout(timeout) {
            Ok(r) => Ok(Some(r)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::WorkerGone),
        }
    }

    /// The next response if one is waiting
    pub fn try_recv(&self) -> Result<Option<Response>> {
        match self.responses.try_recv() {
            Ok(r) => Ok(Some(r)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(EngineError::WorkerGone),
        }
    }

    /// Cancel any run, close the request channel and wait for the thread
    pub fn terminate(mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // the thread exits on its own once the request channel closes
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// What the serve loop should do after a request
enum Flow {
    Continue,
    Shutdown,
}

struct Worker {
    limits: HostLimits,
    backend: BackendSelection,
    trained: Option<TrainedModel>,
    cancel: Arc<AtomicBool>,
    requests: Receiver<Request>,
    responses: Sender<Response>,
    deferred: VecDeque<Request>,
}

impl Worker {
    fn serve(mut self) {
        info!("worker started");
        while let Some(request) = self.next_request() {
            match self.handle(request) {
                Flow::Continue => {}
                Flow::Shutdown => break,
            }
        }
        info!("worker stopped");
    }

    fn next_request(&mut self) -> Option<Request> {
        self.deferred
            .pop_front()
            .or_else(|| self.requests.recv().ok())
    }

    fn send(&self, response: Response) {
        // a closed response channel means the caller is gone; the request
        // channel will close too and end the loop
        let _ = self.responses.send(response);
    }

    fn handle(&mut self, request: Request) -> Flow {
        match request {
            Request::InitGpu => {
                self.backend = select_backend(true, self.limits.gpu_init_timeout);
                self.send(Response::GpuStatus(self.backend.status.clone()));
                Flow::Continue
            }
            Request::Train {
                text,
                model_config,
                adam_config,
            } => {
                self.cancel.store(false, Ordering::SeqCst);
                let session = TrainingSession::from_request(
                    &text,
                    &model_config,
                    &adam_config,
                    self.limits.clone(),
                    Arc::clone(&self.backend.backend),
                );
                match session {
                    Ok(session) => self.train(session),
                    Err(e) => {
                        warn!(error = %e, "rejected train request");
                        self.send(Response::error(e));
                        Flow::Continue
                    }
                }
            }
            Request::Generate {
                temperature,
                max_tokens,
            } => {
                let response = match &self.trained {
                    None => Response::error(EngineError::ModelNotTrained),
                    Some(t) => match generate(&t.model, &t.tokenizer, max_tokens, temperature) {
                        Ok(text) => Response::Generated { text },
                        Err(e) => Response::error(e),
                    },
                };
                self.send(response);
                Flow::Continue
            }
            Request::Stop => {
                // nothing running; the flag is reset by the next train request
                Flow::Continue
            }
        }
    }

    fn train(&mut self, mut session: TrainingSession) -> Flow {
        self.send(session.ready());

        let cancel = Arc::clone(&self.cancel);
        let responses = self.responses.clone();
        let requests = &self.requests;
        let deferred = &mut self.deferred;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            session.run(
                &cancel,
                |msg| {
                    let _ = responses.send(msg);
                },
                || loop {
                    match requests.try_recv() {
                        Ok(Request::Stop) => cancel.store(true, Ordering::SeqCst),
                        Ok(other) => deferred.push_back(other),
                        Err(_) => break,
                    }
                },
            )
        }));

        match result {
            Ok(Ok(RunOutcome::Completed { final_loss, .. }))
            | Ok(Ok(RunOutcome::Cancelled { final_loss, .. })) => {
                self.trained = Some(session.into_trained());
                self.send(Response::Complete { final_loss });
                Flow::Continue
            }
            Ok(Ok(RunOutcome::TimedOut { step })) => {
                self.send(Response::Timeout { step });
                Flow::Shutdown
            }
            Ok(Err(e)) => {
                error!(error = %e, "training failed");
                self.send(Response::error(e));
                Flow::Continue
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(%message, "training panicked");
                self.send(Response::error(EngineError::WorkerPanic(message)));
                Flow::Continue
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::config::{AdamConfig, Architecture};

    const WAIT: Duration = Duration::from_secs(60);

    fn train_request(text: &str, steps: usize) -> Request {
        Request::Train {
            text: text.to_string(),
            model_config: Architecture {
                block_size: 16,
                n_layer: 1,
                n_head: 2,
                n_embd: 16,
            },
            adam_config: AdamConfig {
                max_steps: steps,
                ..AdamConfig::default()
            },
        }
    }

    fn wait_for(handle: &WorkerHandle, kind: &str) -> Vec<Response> {
        let mut seen = Vec::new();
        loop {
            let r = handle
                .recv_timeout(WAIT)
                .unwrap()
                .unwrap_or_else(|| panic!("timed out waiting for {}", kind));
            let done = r.kind() == kind;
            seen.push(r);
            if done {
                return seen;
            }
        }
    }

    #[test]
    fn test_generate_before_train_is_an_error() {
        let handle = WorkerHandle::spawn(HostLimits::default()).unwrap();
        handle
            .post(Request::Generate {
                temperature: 0.8,
                max_tokens: 5,
            })
            .unwrap();
        assert_eq!(
            handle.recv().unwrap(),
            Response::Error {
                message: "Model not trained yet".into()
            }
        );
        handle.terminate();
    }

    #[test]
    fn test_invalid_train_request_reports_error_and_recovers() {
        let handle = WorkerHandle::spawn(HostLimits::default()).unwrap();
        handle.post(train_request("", 5)).unwrap();
        assert_eq!(
            handle.recv().unwrap(),
            Response::Error {
                message: "Input text cannot be empty".into()
            }
        );

        handle.post(train_request("abab", 2)).unwrap();
        let seen = wait_for(&handle, "complete");
        assert_eq!(seen[0].kind(), "ready");
        handle.terminate();
    }

    #[test]
    fn test_init_gpu_reports_status() {
        let handle = WorkerHandle::spawn(HostLimits {
            gpu_init_timeout: Duration::from_secs(2),
            ..HostLimits::default()
        })
        .unwrap();
        handle.post(Request::InitGpu).unwrap();
        match handle.recv_timeout(WAIT).unwrap() {
            Some(Response::GpuStatus(status)) => {
                assert_eq!(status.available, status.backend == BackendKind::Webgpu);
            }
            other => panic!("unexpected {:?}", other),
        }
        handle.terminate();
    }

    #[test]
    fn test_timeout_tears_worker_down() {
        let handle = WorkerHandle::spawn(HostLimits {
            step_budget: Duration::ZERO,
            ..HostLimits::default()
        })
        .unwrap();
        handle.post(train_request("abcabc", 10)).unwrap();
        let seen = wait_for(&handle, "timeout");
        assert_eq!(seen.last(), Some(&Response::Timeout { step: 1 }));
        // the worker exits; its response channel closes
        assert!(matches!(handle.recv_timeout(WAIT), Err(EngineError::WorkerGone)));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("bad");
        assert_eq!(panic_message(payload.as_ref()), "bad");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("worse"));
        assert_eq!(panic_message(payload.as_ref()), "worse");
        let payload: Box<dyn std::any::Any + Send> = Box::new(3);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
