//! Analysis-by-Synthesis classification with one generative model per class.
//!
//! Each class owns a [`Vae`] (or a [`OneLipAe`]); an input is scored by how
//! well every class model reconstructs it and the negated per-class losses
//! become the logits.

pub mod abs;
pub mod architecture;
pub mod config;
pub mod error;
pub mod io;
pub mod loss;
pub mod one_lip;
pub mod vae;

pub use abs::{Abs, AbsOutput, BaseModel};
pub use architecture::{Decoder, Encoder};
pub use config::{AbsConfig, BaseModelKind, LossKind};
pub use error::{AbsError, Result};
pub use loss::samplewise_loss;
pub use one_lip::OneLipAe;
pub use vae::{Mode, Vae};
