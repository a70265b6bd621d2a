//! Finite-difference verification of the two-pass backward.

use microgpt::grad_check::{grad_check, grad_check_model, GradCheckOptions};
use microgpt::{MicroGpt, ModelConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn assert_passed(report: &microgpt::GradCheckReport) {
    for p in &report.params {
        assert!(
            p.max_rel_error < GradCheckOptions::default().tolerance,
            "{}: max relative error {:.3e} (checked {}, kinks {})",
            p.name,
            p.max_rel_error,
            p.checked,
            p.skipped_kinks
        );
        assert!(
            p.sufficiently_sampled(),
            "{}: only {} of {} elements clear of ReLU kinks",
            p.name,
            p.checked,
            p.checked + p.skipped_kinks
        );
    }
    assert!(report.passed);
}

#[test]
fn test_single_layer_gradients_match() {
    let report = grad_check(GradCheckOptions::default()).unwrap();
    assert_passed(&report);
}

#[test]
fn test_gradients_match_across_seeds() {
    for seed in [1, 7] {
        let report = grad_check(GradCheckOptions {
            seed,
            ..GradCheckOptions::default()
        })
        .unwrap();
        assert_passed(&report);
    }
}

#[test]
fn test_report_serializes_camel_case() {
    let report = grad_check(GradCheckOptions::default()).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["params"][1]["name"], "wpe");
    assert!(json["maxRelError"].is_number());
    assert!(json["params"][0]["skippedKinks"].is_number());
}

#[test]
fn test_two_layer_gradients_match() {
    let config = ModelConfig {
        vocab_size: 6,
        block_size: 8,
        n_layer: 2,
        n_head: 2,
        n_embd: 8,
    };
    for seed in [5, 6, 7] {
        let mut model = MicroGpt::with_rng(config, &mut StdRng::seed_from_u64(seed));
        let report =
            grad_check_model(&mut model, &[5, 0, 1, 2, 3, 4, 0, 5], GradCheckOptions::default())
                .unwrap();
        assert_eq!(report.params.len(), 15);
        assert_passed(&report);
    }
}
