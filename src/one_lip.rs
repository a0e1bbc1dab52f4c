use burn::module::{Module, Param};
use burn::nn::Initializer;
use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::vae::Mode;

/// Dense layer whose weight is divided by `max(1, ||W||_F)` on every call.
///
/// The Frobenius norm bounds the spectral norm, so the layer is 1-Lipschitz
/// no matter what the optimizer does to the raw weight.
#[derive(Module, Debug)]
pub struct LipschitzLinear<B: Backend> {
    weight: Param<Tensor<B, 2>>,
    bias: Param<Tensor<B, 1>>,
}

impl<B: Backend> LipschitzLinear<B> {
    pub fn new(d_input: usize, d_output: usize, device: &B::Device) -> Self {
        let weight = Initializer::KaimingUniform {
            gain: 1.0 / 3.0f64.sqrt(),
            fan_out_only: false,
        }
        .init_with([d_input, d_output], Some(d_input), Some(d_output), device);
        let bias = Initializer::Zeros.init([d_output], device);

        Self { weight, bias }
    }

    pub fn normalized_weight(&self) -> Tensor<B, 2> {
        let weight = self.weight.val();
        let norm = weight.clone().powf_scalar(2.0).sum().sqrt().clamp_min(1.0);
        weight / norm.unsqueeze::<2>()
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        x.matmul(self.normalized_weight()) + self.bias.val().unsqueeze::<2>()
    }
}

/// GroupSort with groups of two: each pair of units becomes (max, min).
pub fn max_min<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let [batch, width] = x.dims();
    let pairs = x.reshape([batch, width / 2, 2]);
    let max = pairs.clone().max_dim(2);
    let min = pairs.min_dim(2);
    Tensor::cat(vec![max, min], 2).reshape([batch, width])
}

#[derive(Module, Debug)]
pub struct LipschitzEncoder<B: Backend> {
    layers: Vec<LipschitzLinear<B>>,
    n_latents: usize,
}

impl<B: Backend> LipschitzEncoder<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let batch = x.dims()[0];
        let h = lipschitz_stack(&self.layers, x.flatten(1, 3));
        h.reshape([batch, self.n_latents, 1, 1])
    }
}

#[derive(Module, Debug)]
pub struct LipschitzDecoder<B: Backend> {
    layers: Vec<LipschitzLinear<B>>,
    channels: usize,
    side: usize,
}

impl<B: Backend> LipschitzDecoder<B> {
    pub fn forward(&self, z: Tensor<B, 4>) -> Tensor<B, 4> {
        let batch = z.dims()[0];
        let y = lipschitz_stack(&self.layers, z.flatten(1, 3));
        activation::sigmoid(y).reshape([batch, self.channels, self.side, self.side])
    }
}

// MaxMin between layers, none after the last one.
fn lipschitz_stack<B: Backend>(layers: &[LipschitzLinear<B>], x: Tensor<B, 2>) -> Tensor<B, 2> {
    let last = layers.len() - 1;
    layers.iter().enumerate().fold(x, |h, (i, layer)| {
        let h = layer.forward(h);
        if i < last {
            max_min(h)
        } else {
            h
        }
    })
}

fn lipschitz_layers<B: Backend>(widths: &[usize], device: &B::Device) -> Vec<LipschitzLinear<B>> {
    widths
        .windows(2)
        .map(|pair| LipschitzLinear::new(pair[0], pair[1], device))
        .collect()
}

/// Deterministic autoencoder built from 1-Lipschitz layers.
///
/// Shares the VAE output contract: `logvar` is all zeros and `mu` is the code.
#[derive(Module, Debug)]
pub struct OneLipAe<B: Backend> {
    encoder: LipschitzEncoder<B>,
    decoder: LipschitzDecoder<B>,
}

impl<B: Backend> OneLipAe<B> {
    pub fn new(n_latents: usize, color: bool, hidden: usize, device: &B::Device) -> Self {
        let (channels, side) = if color { (3, 32) } else { (1, 28) };
        let pixels = channels * side * side;

        Self {
            encoder: LipschitzEncoder {
                layers: lipschitz_layers(&[pixels, hidden, hidden, n_latents], device),
                n_latents,
            },
            decoder: LipschitzDecoder {
                layers: lipschitz_layers(&[n_latents, hidden, hidden, pixels], device),
                channels,
                side,
            },
        }
    }

    pub fn encoder(&self) -> &LipschitzEncoder<B> {
        &self.encoder
    }

    pub fn decoder(&self) -> &LipschitzDecoder<B> {
        &self.decoder
    }

    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        _mode: Mode,
    ) -> (Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) {
        let mu = self.encoder.forward(x);
        let logvar = mu.zeros_like();
        let reconstruction = self.decoder.forward(mu.clone());
        (reconstruction, mu, logvar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn max_min_sorts_pairs() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_floats([[1.0, 3.0, 5.0, -2.0]], &device);

        let y: Vec<f32> = max_min(x).into_data().to_vec().unwrap();

        assert_eq!(y, vec![3.0, 1.0, 5.0, -2.0]);
    }

    #[test]
    fn normalized_weight_has_bounded_norm() {
        let device = Default::default();
        let mut layer = LipschitzLinear::<TestBackend>::new(16, 8, &device);
        layer.weight = Param::from_tensor(Tensor::ones([16, 8], &device).mul_scalar(10.0));

        let norm: f32 = layer
            .normalized_weight()
            .powf_scalar(2.0)
            .sum()
            .sqrt()
            .into_scalar();

        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn layer_is_one_lipschitz() {
        let device = Default::default();
        let layer = LipschitzLinear::<TestBackend>::new(32, 32, &device);
        let a = Tensor::<TestBackend, 2>::random([1, 32], Distribution::Normal(0.0, 5.0), &device);
        let b = Tensor::<TestBackend, 2>::random([1, 32], Distribution::Normal(0.0, 5.0), &device);

        let input_gap: f32 = (a.clone() - b.clone()).powf_scalar(2.0).sum().sqrt().into_scalar();
        let output_gap: f32 = (layer.forward(a) - layer.forward(b))
            .powf_scalar(2.0)
            .sum()
            .sqrt()
            .into_scalar();

        assert!(output_gap <= input_gap + 1e-4);
    }

    #[test]
    fn forward_matches_vae_contract() {
        let device = Default::default();
        let model = OneLipAe::<TestBackend>::new(4, false, 16, &device);
        let x = Tensor::random([2, 1, 28, 28], Distribution::Uniform(0.0, 1.0), &device);

        let (rec, mu, logvar) = model.forward(x, Mode::Train);

        assert_eq!(rec.dims(), [2, 1, 28, 28]);
        assert_eq!(mu.dims(), [2, 4, 1, 1]);
        let logvar: Vec<f32> = logvar.into_data().to_vec().unwrap();
        assert_eq!(logvar, vec![0.0; 8]);

        let values: Vec<f32> = rec.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn color_variant_shapes() {
        let device = Default::default();
        let model = OneLipAe::<TestBackend>::new(3, true, 8, &device);
        let x = Tensor::random([1, 3, 32, 32], Distribution::Uniform(0.0, 1.0), &device);

        let (rec, mu, _) = model.forward(x, Mode::Eval);

        assert_eq!(rec.dims(), [1, 3, 32, 32]);
        assert_eq!(mu.dims(), [1, 3, 1, 1]);
    }
}
