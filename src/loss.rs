use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::config::LossKind;

const BCE_EPS: f64 = 1e-6;

/// Sums every non-batch element, `[batch, ...] -> [batch]`.
fn per_sample_sum<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 1> {
    let flat: Tensor<B, 2> = x.flatten(1, 3);
    flat.sum_dim(1).squeeze(1)
}

/// KL divergence between `N(mu, exp(logvar))` and `N(0, 1)`, one value per sample.
pub fn kl_divergence<B: Backend>(mu: Tensor<B, 4>, logvar: Tensor<B, 4>) -> Tensor<B, 1> {
    let kl = (logvar.clone().add_scalar(1.0) - mu.powf_scalar(2.0) - logvar.exp())
        .mul_scalar(-0.5);
    per_sample_sum(kl)
}

pub fn binary_cross_entropy<B: Backend>(x: Tensor<B, 4>, rec: Tensor<B, 4>) -> Tensor<B, 1> {
    let rec = rec.clamp(BCE_EPS, 1.0 - BCE_EPS);
    let bce = (x.clone() * rec.clone().log()
        + x.neg().add_scalar(1.0) * rec.neg().add_scalar(1.0).log())
    .neg();
    per_sample_sum(bce)
}

pub fn squared_error<B: Backend>(x: Tensor<B, 4>, rec: Tensor<B, 4>) -> Tensor<B, 1> {
    per_sample_sum((rec - x).powf_scalar(2.0))
}

/// Per-sample loss of one class model, shape `[batch]`.
///
/// Lower is a better explanation of the input by that model.
pub fn samplewise_loss<B: Backend>(
    x: Tensor<B, 4>,
    rec: Tensor<B, 4>,
    mu: Tensor<B, 4>,
    logvar: Tensor<B, 4>,
    beta: f64,
    kind: LossKind,
) -> Tensor<B, 1> {
    let reconstruction = match kind {
        LossKind::Vae => binary_cross_entropy(x, rec),
        LossKind::Mse => squared_error(x, rec),
    };
    reconstruction + kl_divergence(mu, logvar).mul_scalar(beta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn assert_close(got: Vec<f32>, want: &[f32]) {
        assert_eq!(got.len(), want.len());
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-3, "{got:?} != {want:?}");
        }
    }

    #[test]
    fn kl_is_zero_for_standard_normal() {
        let device = Default::default();
        let mu = Tensor::<TestBackend, 4>::zeros([3, 4, 1, 1], &device);
        let logvar = Tensor::<TestBackend, 4>::zeros([3, 4, 1, 1], &device);

        let kl: Vec<f32> = kl_divergence(mu, logvar).into_data().to_vec().unwrap();

        assert_close(kl, &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn kl_of_shifted_mean() {
        let device = Default::default();
        let mu = Tensor::<TestBackend, 4>::ones([2, 2, 1, 1], &device).mul_scalar(2.0);
        let logvar = Tensor::<TestBackend, 4>::zeros([2, 2, 1, 1], &device);

        let kl: Vec<f32> = kl_divergence(mu, logvar).into_data().to_vec().unwrap();

        // 0.5 * mu^2 per latent, two latents
        assert_close(kl, &[4.0, 4.0]);
    }

    #[test]
    fn squared_error_is_summed_per_sample() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([2, 1, 2, 2], &device);
        let rec = Tensor::<TestBackend, 4>::from_floats(
            [[[[0.5, 0.5], [0.5, 0.5]]], [[[1.0, 0.0], [0.0, 0.0]]]],
            &device,
        );

        let loss: Vec<f32> = squared_error(x, rec).into_data().to_vec().unwrap();

        assert_close(loss, &[1.0, 1.0]);
    }

    #[test]
    fn bce_prefers_matching_reconstruction() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 0.0], [1.0, 0.0]]]], &device);
        let good = Tensor::<TestBackend, 4>::from_floats([[[[0.9, 0.1], [0.9, 0.1]]]], &device);
        let bad = Tensor::<TestBackend, 4>::from_floats([[[[0.1, 0.9], [0.1, 0.9]]]], &device);

        let good: f32 = binary_cross_entropy(x.clone(), good).into_scalar();
        let bad: f32 = binary_cross_entropy(x, bad).into_scalar();

        assert!((good - 4.0 * -(0.9f32.ln())).abs() < 1e-3);
        assert!(good < bad);
    }

    #[test]
    fn bce_stays_finite_at_saturation() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let rec = Tensor::<TestBackend, 4>::zeros([1, 1, 2, 2], &device);

        let loss: f32 = binary_cross_entropy(x, rec).into_scalar();

        assert!(loss.is_finite());
    }

    #[test]
    fn beta_weights_the_kl_term() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([1, 1, 2, 2], &device);
        let rec = Tensor::<TestBackend, 4>::zeros([1, 1, 2, 2], &device);
        let mu = Tensor::<TestBackend, 4>::ones([1, 2, 1, 1], &device);
        let logvar = Tensor::<TestBackend, 4>::zeros([1, 2, 1, 1], &device);

        let plain: f32 =
            samplewise_loss(x.clone(), rec.clone(), mu.clone(), logvar.clone(), 1.0, LossKind::Mse)
                .into_scalar();
        let weighted: f32 =
            samplewise_loss(x, rec, mu, logvar, 3.0, LossKind::Mse).into_scalar();

        assert!((plain - 1.0).abs() < 1e-5);
        assert!((weighted - 3.0).abs() < 1e-5);
    }
}
