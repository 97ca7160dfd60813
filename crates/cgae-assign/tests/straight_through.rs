//! Straight-through assignment: discrete forward value, soft backward gradient.

use burn::backend::{Autodiff, NdArray};
use burn::tensor::{Tensor, TensorData};
use cgae_assign::soft_assign_with_noise;

type B = Autodiff<NdArray<f32>>;

fn logits_data() -> TensorData {
    TensorData::new(
        vec![0.3f32, -1.2, 0.8, 1.5, 0.1, -0.4, 0.0, 0.0, 0.2, -0.7, 2.2, 0.9],
        [4, 3],
    )
}

fn noise_data() -> TensorData {
    TensorData::new(
        vec![0.12f32, -0.31, 0.05, 0.44, -0.2, 0.7, -0.05, 0.33, 0.01, 0.2, -0.6, 0.15],
        [4, 3],
    )
}

fn probe() -> Tensor<B, 2> {
    Tensor::from_data(
        TensorData::new(
            vec![1.0f32, -2.0, 0.5, 0.3, 0.9, -1.1, 2.0, 0.0, -0.4, 0.7, 0.2, 1.3],
            [4, 3],
        ),
        &Default::default(),
    )
}

fn gradient(use_hard: bool, shift: f32) -> (Vec<f32>, Vec<f32>) {
    let device = Default::default();
    let values: Vec<f32> = logits_data()
        .to_vec::<f32>()
        .unwrap()
        .into_iter()
        .map(|v| v + shift)
        .collect();
    let logits = Tensor::<B, 2>::from_data(TensorData::new(values, [4, 3]), &device).require_grad();
    let noise = Tensor::<B, 2>::from_data(noise_data(), &device);
    let assignment = soft_assign_with_noise(logits.clone(), noise, 0.7);

    let chosen = if use_hard { assignment.hard.clone() } else { assignment.soft.clone() };
    let loss = (chosen * probe()).sum();
    let grads = loss.backward();
    let grad = logits
        .grad(&grads)
        .map(|g| g.into_data().to_vec::<f32>().unwrap())
        .unwrap_or_default();
    let hard = assignment.hard.into_data().to_vec::<f32>().unwrap();
    (grad, hard)
}

#[test]
fn test_forward_is_argmax_one_hot() {
    let device = Default::default();
    let logits = Tensor::<B, 2>::from_data(logits_data(), &device);
    let noise = Tensor::<B, 2>::from_data(noise_data(), &device);
    let assignment = soft_assign_with_noise(logits, noise, 0.7);
    let soft = assignment.soft.into_data().to_vec::<f32>().unwrap();
    let hard = assignment.hard.into_data().to_vec::<f32>().unwrap();

    for (s, h) in soft.chunks(3).zip(hard.chunks(3)) {
        let argmax = s
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        for (j, &v) in h.iter().enumerate() {
            let expected = if j == argmax { 1.0 } else { 0.0 };
            assert!((v - expected).abs() < 1e-6);
        }
    }
}

#[test]
fn test_gradient_equals_soft_gradient() {
    let (grad_hard, _) = gradient(true, 0.0);
    let (grad_soft, _) = gradient(false, 0.0);
    assert_eq!(grad_hard.len(), 12);
    assert!(grad_soft.iter().any(|g| g.abs() > 1e-6));
    for (h, s) in grad_hard.iter().zip(&grad_soft) {
        assert!((h - s).abs() < 1e-6, "{h} vs {s}");
    }
}

#[test]
fn test_small_perturbation_keeps_forward_but_moves_gradient_like_soft() {
    let device = Default::default();
    let base = logits_data().to_vec::<f32>().unwrap();
    let nudged: Vec<f32> = base.iter().enumerate().map(|(i, v)| v + 0.01 * (i % 3) as f32).collect();

    let run = |values: Vec<f32>, use_hard: bool| {
        let logits = Tensor::<B, 2>::from_data(TensorData::new(values, [4, 3]), &device).require_grad();
        let noise = Tensor::<B, 2>::from_data(noise_data(), &device);
        let a = soft_assign_with_noise(logits.clone(), noise, 0.7);
        let chosen = if use_hard { a.hard.clone() } else { a.soft };
        let grads = (chosen * probe()).sum().backward();
        let grad = logits.grad(&grads).unwrap().into_data().to_vec::<f32>().unwrap();
        (grad, a.hard.into_data().to_vec::<f32>().unwrap())
    };

    let (g_hard_0, h0) = run(base.clone(), true);
    let (g_hard_1, h1) = run(nudged.clone(), true);
    let (g_soft_0, _) = run(base, false);
    let (g_soft_1, _) = run(nudged, false);

    assert_close(&h0, &h1);
    for i in 0..12 {
        let d_hard = g_hard_1[i] - g_hard_0[i];
        let d_soft = g_soft_1[i] - g_soft_0[i];
        assert!((d_hard - d_soft).abs() < 1e-6);
    }

    let (_, shifted_forward) = gradient(true, 0.5);
    assert_close(&shifted_forward, &h0);
}

fn assert_close(a: &[f32], b: &[f32]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-6, "{x} vs {y}");
    }
}
