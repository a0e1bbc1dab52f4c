use std::fmt;
use std::str::FromStr;

use burn::config::Config;
use burn::tensor::backend::Backend;
use tracing::debug;

use crate::abs::{Abs, BaseModel};
use crate::error::{AbsError, Result};
use crate::one_lip::OneLipAe;
use crate::vae::Vae;

/// Which generative model backs each class of the ensemble.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaseModelKind {
    Vae,
    OneLipAe,
}

impl FromStr for BaseModelKind {
    type Err = AbsError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "vae" | "VAE" => Ok(Self::Vae),
            "one_lip_ae" | "OneLipAE" => Ok(Self::OneLipAe),
            other => Err(AbsError::NotImplemented {
                model: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for BaseModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vae => write!(f, "vae"),
            Self::OneLipAe => write!(f, "one_lip_ae"),
        }
    }
}

/// Selects the reconstruction term of the per-sample loss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossKind {
    /// Binary cross-entropy plus beta-weighted KL divergence.
    Vae,
    /// Squared error plus beta-weighted KL divergence.
    Mse,
}

impl FromStr for LossKind {
    type Err = AbsError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "vae" => Ok(Self::Vae),
            "mse" => Ok(Self::Mse),
            other => Err(AbsError::UnknownLoss(other.to_string())),
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vae => write!(f, "vae"),
            Self::Mse => write!(f, "mse"),
        }
    }
}

#[derive(Config, Debug)]
pub struct AbsConfig {
    #[config(default = 10)]
    pub n_classes: usize,
    /// Latent channels of every class model.
    #[config(default = 8)]
    pub n_latents: usize,
    /// Weight of the KL term when scoring.
    #[config(default = 1.0)]
    pub beta: f64,
    /// 3-channel 32x32 inputs instead of 1-channel 28x28.
    #[config(default = "false")]
    pub color: bool,
    /// Stored for compatibility, never applied to the logits.
    #[config(default = 1.0)]
    pub logit_scale: f64,
    #[config(default = "String::from(\"vae\")")]
    pub base_model: String,
    #[config(default = "String::from(\"vae\")")]
    pub loss_f: String,
    /// Hidden width of the Lipschitz autoencoder, must be even.
    #[config(default = 512)]
    pub one_lip_hidden: usize,
}

impl AbsConfig {
    pub fn base_model_kind(&self) -> Result<BaseModelKind> {
        self.base_model.parse()
    }

    pub fn loss_kind(&self) -> Result<LossKind> {
        self.loss_f.parse()
    }

    /// Side length of the square input images.
    pub fn image_size(&self) -> usize {
        if self.color {
            32
        } else {
            28
        }
    }

    pub fn channels(&self) -> usize {
        if self.color {
            3
        } else {
            1
        }
    }

    pub fn init_base_model<B: Backend>(&self, device: &B::Device) -> Result<BaseModel<B>> {
        match self.base_model_kind()? {
            BaseModelKind::Vae => Ok(BaseModel::Vae(Vae::new(
                self.n_latents,
                self.color,
                device,
            ))),
            BaseModelKind::OneLipAe => {
                if self.one_lip_hidden == 0 || self.one_lip_hidden % 2 != 0 {
                    return Err(AbsError::InvalidConfig(format!(
                        "one_lip_hidden must be a positive even number, got {}",
                        self.one_lip_hidden
                    )));
                }
                Ok(BaseModel::OneLip(OneLipAe::new(
                    self.n_latents,
                    self.color,
                    self.one_lip_hidden,
                    device,
                )))
            }
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Abs<B>> {
        let kind = self.base_model_kind()?;
        let loss_kind = self.loss_kind()?;

        if self.n_classes == 0 {
            return Err(AbsError::InvalidConfig(
                "n_classes must be at least 1".to_string(),
            ));
        }
        if self.n_latents == 0 {
            return Err(AbsError::InvalidConfig(
                "n_latents must be at least 1".to_string(),
            ));
        }

        let base_models = (0..self.n_classes)
            .map(|_| self.init_base_model(device))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            n_classes = self.n_classes,
            n_latents = self.n_latents,
            base_model = %kind,
            loss = %loss_kind,
            color = self.color,
            "built ABS ensemble"
        );

        Ok(Abs::new(base_models, self.beta, loss_kind))
    }
}
