use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// (in_channels, out_channels, kernel, stride)
pub type Layer = (usize, usize, usize, usize);

const GRAY_TRUNK: [Layer; 3] = [(1, 32, 5, 1), (32, 32, 4, 2), (32, 64, 3, 2)];
const COLOR_TRUNK: [Layer; 4] = [(3, 32, 5, 1), (32, 32, 4, 2), (32, 32, 3, 1), (32, 64, 3, 2)];

// First entry takes n_latents as its input channel count.
const GRAY_DECODER: [Layer; 3] = [(0, 32, 4, 1), (32, 16, 5, 2), (16, 16, 5, 2)];
const COLOR_DECODER: [Layer; 4] = [(0, 32, 4, 1), (32, 32, 5, 2), (32, 16, 3, 1), (16, 16, 5, 2)];

const HEAD_KERNEL: usize = 5;
const OUTPUT_KERNEL: usize = 4;

/// Exponential linear unit, `x` for positive inputs and `exp(x) - 1` otherwise.
pub fn elu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let positive = x.clone().clamp_min(0.0);
    let negative = x.clamp_max(0.0).exp().sub_scalar(1.0);
    positive + negative
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(layer: Layer, device: &B::Device) -> Self {
        let (in_channels, out_channels, kernel, stride) = layer;
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
                .with_stride([stride, stride])
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        elu(x)
    }
}

#[derive(Module, Debug)]
pub struct DeconvBlock<B: Backend> {
    deconv: ConvTranspose2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> DeconvBlock<B> {
    pub fn new(layer: Layer, device: &B::Device) -> Self {
        let (in_channels, out_channels, kernel, stride) = layer;
        Self {
            deconv: ConvTranspose2dConfig::new([in_channels, out_channels], [kernel, kernel])
                .with_stride([stride, stride])
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.deconv.forward(x);
        let x = self.bn.forward(x);
        elu(x)
    }
}

/// Convolutional encoder producing per-position Gaussian parameters.
///
/// The grayscale variant maps `[batch, 1, 28, 28]` and the color variant
/// `[batch, 3, 32, 32]` to `[batch, n_latents, 1, 1]`.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    shared: Vec<ConvBlock<B>>,
    conv_mu: Conv2d<B>,
    conv_logvar: Conv2d<B>,
    in_channels: usize,
}

impl<B: Backend> Encoder<B> {
    pub fn grayscale(n_latents: usize, device: &B::Device) -> Self {
        Self::from_layers(&GRAY_TRUNK, n_latents, device)
    }

    pub fn color(n_latents: usize, device: &B::Device) -> Self {
        Self::from_layers(&COLOR_TRUNK, n_latents, device)
    }

    fn from_layers(trunk: &[Layer], n_latents: usize, device: &B::Device) -> Self {
        let in_channels = trunk[0].0;
        let trunk_out = trunk[trunk.len() - 1].1;
        let head = || {
            Conv2dConfig::new([trunk_out, n_latents], [HEAD_KERNEL, HEAD_KERNEL]).init(device)
        };

        Self {
            shared: trunk.iter().map(|&layer| ConvBlock::new(layer, device)).collect(),
            conv_mu: head(),
            conv_logvar: head(),
            in_channels,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let shared = self
            .shared
            .iter()
            .fold(x, |x, block| block.forward(x));

        let mu = self.conv_mu.forward(shared.clone());
        let logvar = self.conv_logvar.forward(shared);
        (mu, logvar)
    }
}

/// Transposed-convolution decoder, the spatial mirror of [`Encoder`].
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    layers: Vec<DeconvBlock<B>>,
    output: ConvTranspose2d<B>,
    out_channels: usize,
}

impl<B: Backend> Decoder<B> {
    pub fn grayscale(n_latents: usize, device: &B::Device) -> Self {
        Self::from_layers(&GRAY_DECODER, n_latents, 1, device)
    }

    pub fn color(n_latents: usize, device: &B::Device) -> Self {
        Self::from_layers(&COLOR_DECODER, n_latents, 3, device)
    }

    fn from_layers(
        blocks: &[Layer],
        n_latents: usize,
        out_channels: usize,
        device: &B::Device,
    ) -> Self {
        let layers = blocks
            .iter()
            .enumerate()
            .map(|(i, &(in_channels, out, kernel, stride))| {
                let in_channels = if i == 0 { n_latents } else { in_channels };
                DeconvBlock::new((in_channels, out, kernel, stride), device)
            })
            .collect();
        let last = blocks[blocks.len() - 1].1;

        Self {
            layers,
            output: ConvTranspose2dConfig::new(
                [last, out_channels],
                [OUTPUT_KERNEL, OUTPUT_KERNEL],
            )
            .init(device),
            out_channels,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn forward(&self, z: Tensor<B, 4>) -> Tensor<B, 4> {
        let y = self.layers.iter().fold(z, |y, block| block.forward(y));
        let y = self.output.forward(y);
        activation::sigmoid(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn elu_matches_definition() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([-2.0, -0.5, 0.0, 1.5], &device);

        let y: Vec<f32> = elu(x).into_data().to_vec().unwrap();

        let expected = [(-2.0f32).exp() - 1.0, (-0.5f32).exp() - 1.0, 0.0, 1.5];
        for (got, want) in y.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} != {want}");
        }
    }

    #[test]
    fn grayscale_round_trip_shapes() {
        let device = Default::default();
        let encoder = Encoder::<TestBackend>::grayscale(8, &device);
        let decoder = Decoder::<TestBackend>::grayscale(8, &device);
        let x = Tensor::random([2, 1, 28, 28], Distribution::Uniform(0.0, 1.0), &device);

        let (mu, logvar) = encoder.forward(x);
        assert_eq!(mu.dims(), [2, 8, 1, 1]);
        assert_eq!(logvar.dims(), [2, 8, 1, 1]);

        let rec = decoder.forward(mu);
        assert_eq!(rec.dims(), [2, 1, 28, 28]);
    }

    #[test]
    fn color_round_trip_shapes() {
        let device = Default::default();
        let encoder = Encoder::<TestBackend>::color(4, &device);
        let decoder = Decoder::<TestBackend>::color(4, &device);
        let x = Tensor::random([2, 3, 32, 32], Distribution::Uniform(0.0, 1.0), &device);

        let (mu, logvar) = encoder.forward(x);
        assert_eq!(mu.dims(), [2, 4, 1, 1]);
        assert_eq!(logvar.dims(), [2, 4, 1, 1]);
        assert_eq!(encoder.in_channels(), 3);

        let rec = decoder.forward(logvar);
        assert_eq!(rec.dims(), [2, 3, 32, 32]);
        assert_eq!(decoder.out_channels(), 3);
    }

    #[test]
    fn decoder_output_is_bounded() {
        let device = Default::default();
        let decoders = [
            Decoder::<TestBackend>::grayscale(6, &device),
            Decoder::<TestBackend>::color(6, &device),
        ];

        for decoder in decoders {
            let z = Tensor::random([3, 6, 1, 1], Distribution::Uniform(-50.0, 50.0), &device);
            let values: Vec<f32> = decoder.forward(z).into_data().to_vec().unwrap();

            assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }
}
