use thiserror::Error;

#[derive(Debug, Error)]
pub enum AbsError {
    #[error("model {model} is not implemented try OneLipAE or VAE")]
    NotImplemented { model: String },

    #[error("unknown loss function `{0}`, expected `vae` or `mse`")]
    UnknownLoss(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("record error: {0}")]
    Record(#[from] burn::record::RecorderError),

    #[error("config error: {0}")]
    Config(String),

    #[error("tensor data error: {0}")]
    TensorData(String),
}

pub type Result<T, E = AbsError> = std::result::Result<T, E>;
