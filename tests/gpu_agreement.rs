//! GPU kernels must agree with the CPU reference within float tolerance.
//!
//! Skipped (passes trivially) on machines without an adapter.

#![cfg(feature = "gpu")]

use microgpt::gpu::GpuBackend;
use microgpt::{ops, ComputeBackend, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

fn gpu() -> Option<GpuBackend> {
    match GpuBackend::init(Duration::from_secs(5)) {
        Ok(backend) => Some(backend),
        Err(e) => {
            eprintln!("skipping GPU agreement: {}", e);
            None
        }
    }
}

fn assert_close(gpu: &Tensor, cpu: &Tensor, tol: f32) {
    assert_eq!(gpu.shape, cpu.shape);
    for (i, (g, c)) in gpu.data.iter().zip(&cpu.data).enumerate() {
        assert!(
            (g - c).abs() <= tol * (1.0 + c.abs()),
            "element {}: gpu {} vs cpu {}",
            i,
            g,
            c
        );
    }
}

#[test]
fn test_matmul_agrees() {
    let Some(backend) = gpu() else { return };
    let mut rng = StdRng::seed_from_u64(1);
    let a = Tensor::randn(vec![64, 64], 1.0, &mut rng);
    let b = Tensor::randn(vec![64, 64], 1.0, &mut rng);
    assert_close(&backend.matmul(&a, &b), &ops::matmul(&a, &b), 1e-3);
}

#[test]
fn test_linear_agrees() {
    let Some(backend) = gpu() else { return };
    let mut rng = StdRng::seed_from_u64(2);
    let x = Tensor::randn(vec![256], 1.0, &mut rng);
    let w = Tensor::randn(vec![512, 256], 0.1, &mut rng);
    assert_close(&backend.linear(&x, &w), &ops::linear(&x, &w), 1e-3);
}

#[test]
fn test_softmax_agrees() {
    let Some(backend) = gpu() else { return };
    let mut rng = StdRng::seed_from_u64(3);
    let x = Tensor::randn(vec![1024], 3.0, &mut rng);
    let y = backend.softmax(&x);
    assert_close(&y, &ops::softmax(&x), 1e-4);
    let sum: f32 = y.data.iter().sum();
    assert!((sum - 1.0).abs() < 1e-3);
}

#[test]
fn test_elementwise_agrees() {
    let Some(backend) = gpu() else { return };
    let mut rng = StdRng::seed_from_u64(4);
    let a = Tensor::randn(vec![4096], 1.0, &mut rng);
    let b = Tensor::randn(vec![4096], 1.0, &mut rng);
    assert_close(&backend.relu(&a), &ops::relu(&a), 1e-6);
    assert_close(&backend.add(&a, &b), &ops::add(&a, &b), 1e-6);
    assert_close(&backend.scale(&a, 0.37), &ops::scale(&a, 0.37), 1e-6);
}

#[test]
fn test_small_inputs_stay_exact() {
    // below the dispatch thresholds the CPU kernels run directly
    let Some(backend) = gpu() else { return };
    let x = Tensor::from_vec(vec![1.0, -2.0, 3.0]);
    assert_eq!(backend.relu(&x), ops::relu(&x));
    assert_eq!(backend.softmax(&x), ops::softmax(&x));
}
