use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};

use crate::architecture::{Decoder, Encoder};

/// Sampling policy of the latent step.
///
/// Batch-norm layers do not look at this flag, they follow the backend:
/// batch statistics under autodiff, running statistics after `valid()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// `z = mu + eps * exp(0.5 * logvar)` with fresh noise on every call.
    Train,
    /// `z = mu`.
    Eval,
}

#[derive(Module, Debug)]
pub struct Vae<B: Backend> {
    encoder: Encoder<B>,
    decoder: Decoder<B>,
    n_latents: usize,
}

impl<B: Backend> Vae<B> {
    pub fn new(n_latents: usize, color: bool, device: &B::Device) -> Self {
        let (encoder, decoder) = if color {
            (
                Encoder::color(n_latents, device),
                Decoder::color(n_latents, device),
            )
        } else {
            (
                Encoder::grayscale(n_latents, device),
                Decoder::grayscale(n_latents, device),
            )
        };

        Self {
            encoder,
            decoder,
            n_latents,
        }
    }

    pub fn n_latents(&self) -> usize {
        self.n_latents
    }

    pub fn encoder(&self) -> &Encoder<B> {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder<B> {
        &self.decoder
    }

    pub fn reparameterize(
        &self,
        mu: Tensor<B, 4>,
        logvar: Tensor<B, 4>,
        mode: Mode,
    ) -> Tensor<B, 4> {
        match mode {
            Mode::Train => {
                let std = logvar.mul_scalar(0.5).exp();
                let eps = Tensor::random_like(&std, Distribution::Normal(0.0, 1.0));
                eps * std + mu
            }
            Mode::Eval => mu,
        }
    }

    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        mode: Mode,
    ) -> (Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) {
        let (mu, logvar) = self.encoder.forward(x);
        let z = self.reparameterize(mu.clone(), logvar.clone(), mode);
        let reconstruction = self.decoder.forward(z);
        (reconstruction, mu, logvar)
    }

    pub fn encode(&self, x: Tensor<B, 4>, mode: Mode) -> Tensor<B, 4> {
        let (mu, logvar) = self.encoder.forward(x);
        self.reparameterize(mu, logvar, mode)
    }

    pub fn decode(&self, z: Tensor<B, 4>) -> Tensor<B, 4> {
        self.decoder.forward(z)
    }
}
