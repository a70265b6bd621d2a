//! Message protocol of the training worker, driven through its public handle.

use microgpt::messages::{Request, Response};
use microgpt::{AdamConfig, Architecture, HostLimits, WorkerHandle};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(120);

fn train(text: &str, steps: usize) -> Request {
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

fn next(handle: &WorkerHandle) -> Response {
    handle
        .recv_timeout(WAIT)
        .unwrap()
        .expect("worker went quiet")
}

/// Collect responses up to and including the first `complete`
fn until_complete(handle: &WorkerHandle) -> Vec<Response> {
    let mut seen = Vec::new();
    loop {
        let r = next(handle);
        let done = matches!(r, Response::Complete { .. });
        assert!(!matches!(r, Response::Error { .. } | Response::Timeout { .. }), "{:?}", r);
        seen.push(r);
        if done {
            return seen;
        }
    }
}

fn progress_steps(seen: &[Response]) -> Vec<usize> {
    seen.iter()
        .filter_map(|r| match r {
            Response::Progress { step, .. } => Some(*step),
            _ => None,
        })
        .collect()
}

#[test]
fn test_training_reports_in_order() {
    let handle = WorkerHandle::spawn(HostLimits::default()).unwrap();
    handle.post(train("hello world", 12)).unwrap();
    let seen = until_complete(&handle);

    match &seen[0] {
        Response::Ready {
            param_count,
            vocab_size,
        } => {
            assert_eq!(*vocab_size, 9);
            assert!(*param_count > 0);
        }
        other => panic!("expected ready, got {:?}", other),
    }
    assert_eq!(progress_steps(&seen), (1..=12).collect::<Vec<_>>());
    for r in &seen {
        if let Response::Progress {
            loss, total_steps, ..
        } = r
        {
            assert!(loss.is_finite());
            assert_eq!(*total_steps, 12);
        }
    }
    match seen.last() {
        Some(Response::Complete { final_loss }) => assert!(final_loss.is_some()),
        other => panic!("expected complete, got {:?}", other),
    }
    handle.terminate();
}

#[test]
fn test_generated_text_stays_in_vocabulary() {
    let handle = WorkerHandle::spawn(HostLimits::default()).unwrap();
    handle.post(train("abba abba", 20)).unwrap();
    until_complete(&handle);

    for max_tokens in [1, 4, 200] {
        handle
            .post(Request::Generate {
                temperature: 1.0,
                max_tokens,
            })
            .unwrap();
        match next(&handle) {
            Response::Generated { text } => {
                assert!(text.chars().count() <= max_tokens.min(16));
                assert!(text.chars().all(|c| "ab ".contains(c)), "{:?}", text);
            }
            other => panic!("expected generated, got {:?}", other),
        }
    }

    // non-positive temperatures clamp to the same near-greedy sampling
    let mut samples = Vec::new();
    for temperature in [0.0, -1.0] {
        handle
            .post(Request::Generate {
                temperature,
                max_tokens: 5,
            })
            .unwrap();
        match next(&handle) {
            Response::Generated { text } => samples.push(text),
            other => panic!("expected generated, got {:?}", other),
        }
    }
    assert_eq!(samples[0], samples[1]);
    handle.terminate();
}

#[test]
fn test_stop_ends_run_early_and_keeps_model() {
    let handle = WorkerHandle::spawn(HostLimits::default()).unwrap();
    handle.post(train("the cat sat on the mat", 2000)).unwrap();

    // let a few steps run first
    loop {
        if let Response::Progress { step, .. } = next(&handle) {
            if step >= 3 {
                break;
            }
        }
    }
    handle.post(Request::Stop).unwrap();
    let seen = until_complete(&handle);
    let last = progress_steps(&seen).last().copied().unwrap_or(3);
    assert!(last < 2000);

    handle
        .post(Request::Generate {
            temperature: 0.8,
            max_tokens: 10,
        })
        .unwrap();
    assert_eq!(next(&handle).kind(), "generated");

    // a fresh run replaces the stopped one
    handle.post(train("xyz", 3)).unwrap();
    let seen = until_complete(&handle);
    assert_eq!(progress_steps(&seen), vec![1, 2, 3]);
    handle
        .post(Request::Generate {
            temperature: 0.5,
            max_tokens: 10,
        })
        .unwrap();
    match next(&handle) {
        Response::Generated { text } => assert!(text.chars().all(|c| "xyz".contains(c))),
        other => panic!("expected generated, got {:?}", other),
    }
    handle.terminate();
}

#[test]
fn test_weights_snapshot_serializes() {
    let handle = WorkerHandle::spawn(HostLimits::default()).unwrap();
    handle.post(train("snapshot", 50)).unwrap();
    let seen = until_complete(&handle);

    let snapshots: Vec<&Response> = seen
        .iter()
        .filter(|r| matches!(r, Response::WeightsSnapshot { .. }))
        .collect();
    assert_eq!(snapshots.len(), 1);

    let json = serde_json::to_value(snapshots[0]).unwrap();
    assert_eq!(json["type"], "weights-snapshot");
    assert_eq!(json["step"], 50);
    assert_eq!(json["config"]["n_layer"], 1);
    assert_eq!(json["weights"]["blocks"].as_array().map(Vec::len), Some(1));
    handle.terminate();
}

#[test]
fn test_requests_parse_from_json() {
    let handle = WorkerHandle::spawn(HostLimits::default()).unwrap();
    let req: Request = serde_json::from_str(
        r#"{"type":"train","text":"abc","modelConfig":{"blockSize":16,"nLayer":1,"nHead":1,"nEmbd":16},"adamConfig":{"maxSteps":2}}"#,
    )
    .unwrap();
    handle.post(req).unwrap();
    until_complete(&handle);

    let req: Request = serde_json::from_str(r#"{"type":"generate"}"#).unwrap();
    handle.post(req).unwrap();
    assert_eq!(next(&handle).kind(), "generated");
    handle.terminate();
}
