//! End-to-end training behavior on small models.

use microgpt::progress::moving_average;
use microgpt::{
    compute_param_count, generate_with_rng, sequence_loss, train_step, AdamConfig, AdamOptimizer,
    Architecture, CharTokenizer, MicroGpt, ModelConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn tiny_config(vocab_size: usize) -> ModelConfig {
    ModelConfig {
        vocab_size,
        block_size: 16,
        n_layer: 1,
        n_head: 2,
        n_embd: 16,
    }
}

#[test]
fn test_initial_loss_near_uniform() {
    let text = "the quick brown fox jumps over the lazy dog";
    let tok = CharTokenizer::new(text);
    let tokens = tok.encode_doc(text);
    let expected = (tok.vocab_size() as f32).ln();

    let seeds = [0u64, 1, 2, 3, 4];
    let mean: f32 = seeds
        .iter()
        .map(|&seed| {
            let model =
                MicroGpt::with_rng(tiny_config(tok.vocab_size()), &mut StdRng::seed_from_u64(seed));
            sequence_loss(&model, &tokens).unwrap()
        })
        .sum::<f32>()
        / seeds.len() as f32;

    assert!(
        (mean - expected).abs() < 0.5,
        "initial loss {} vs ln(V) {}",
        mean,
        expected
    );
}

#[test]
fn test_loss_trend_falls_on_repeating_text() {
    let text = "hello world ".repeat(4);
    let tok = CharTokenizer::new(&text);
    let tokens = tok.encode_doc(&text);
    let mut model =
        MicroGpt::with_rng(tiny_config(tok.vocab_size()), &mut StdRng::seed_from_u64(42));
    let mut optimizer = AdamOptimizer::new(
        &model,
        AdamConfig {
            lr: 0.01,
            max_steps: 200,
            ..AdamConfig::default()
        },
    );

    let losses: Vec<f32> = (0..200)
        .map(|_| {
            let loss = train_step(&mut model, &tokens).unwrap();
            optimizer.step(&mut model);
            loss
        })
        .collect();

    assert!(losses.iter().all(|l| l.is_finite()));
    let first: f32 = losses[..20].iter().sum::<f32>() / 20.0;
    let last: f32 = losses[180..].iter().sum::<f32>() / 20.0;
    assert!(last < 0.7 * first, "loss went from {} to {}", first, last);

    let smoothed = moving_average(&losses, 20);
    assert!(smoothed[199] < smoothed[49]);
    assert!(model.is_finite());
}

#[test]
fn test_trained_model_generates_from_vocabulary() {
    let text = "abcabcabcabc";
    let tok = CharTokenizer::new(text);
    let tokens = tok.encode_doc(text);
    let mut model = MicroGpt::with_rng(tiny_config(tok.vocab_size()), &mut StdRng::seed_from_u64(3));
    let mut optimizer = AdamOptimizer::new(&model, AdamConfig::default());
    for _ in 0..50 {
        train_step(&mut model, &tokens).unwrap();
        optimizer.step(&mut model);
    }

    let mut rng = StdRng::seed_from_u64(9);
    for max_tokens in [0, 1, 5, 100] {
        let out = generate_with_rng(&model, &tok, max_tokens, 0.8, &mut rng).unwrap();
        assert!(out.chars().count() <= max_tokens.min(16));
        assert!(out.chars().all(|c| "abc".contains(c)));
    }
}

#[test]
fn test_param_count_matches_model() {
    let configs = [
        tiny_config(5),
        Architecture::tiny().with_vocab(27),
        Architecture::small().with_vocab(65),
        ModelConfig {
            vocab_size: 3,
            block_size: 20,
            n_layer: 3,
            n_head: 4,
            n_embd: 24,
        },
    ];
    for config in configs {
        let model = MicroGpt::with_rng(config, &mut StdRng::seed_from_u64(0));
        let total: usize = model.parameters().iter().map(|p| p.size()).sum();
        assert_eq!(total, compute_param_count(&config), "{:?}", config);
    }
}
