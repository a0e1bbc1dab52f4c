use std::fs;
use std::path::{Path, PathBuf};

use burn::config::Config;
use burn::module::Module;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use tracing::{debug, info};

use crate::abs::Abs;
use crate::config::AbsConfig;
use crate::error::{AbsError, Result};

const CONFIG_FILE: &str = "config.json";
const WEIGHTS_FILE: &str = "model";

/// Writes `config.json` and the ensemble weights into `dir`.
pub fn save_model<B: Backend>(model: &Abs<B>, config: &AbsConfig, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    config
        .save(dir.join(CONFIG_FILE))
        .map_err(|e| AbsError::Config(e.to_string()))?;

    let recorder = CompactRecorder::new();
    recorder.record(model.clone().into_record(), dir.join(WEIGHTS_FILE))?;
    info!(dir = %dir.display(), n_classes = model.n_classes(), "model saved");
    Ok(())
}

/// Reads a directory written by [`save_model`].
pub fn load_model<B: Backend>(dir: &Path, device: &B::Device) -> Result<(Abs<B>, AbsConfig)> {
    let config = load_config(&dir.join(CONFIG_FILE))?;
    let recorder = CompactRecorder::new();
    let record = recorder.load(dir.join(WEIGHTS_FILE), device)?;

    let model = config.init::<B>(device)?.load_record(record);
    info!(dir = %dir.display(), n_classes = model.n_classes(), "model loaded");
    Ok((model, config))
}

pub fn load_config(path: &Path) -> Result<AbsConfig> {
    AbsConfig::load(path).map_err(|e| AbsError::Config(format!("{}: {e:?}", path.display())))
}

/// Images of a directory, sorted by file name, served as `[0, 1]` tensors.
pub struct ImageFolder {
    pub image_paths: Vec<PathBuf>,
    pub channels: usize,
    pub side: usize,
}

impl ImageFolder {
    pub fn directory(dir_path: &Path, color: bool) -> Result<Self> {
        if !dir_path.exists() {
            return Err(AbsError::InvalidConfig(format!(
                "directory does not exist: {}",
                dir_path.display()
            )));
        }

        let mut image_paths = Vec::new();
        for entry in fs::read_dir(dir_path)? {
            let path = entry?.path();

            if let Some(ext) = path.extension() {
                let ext = ext.to_str().unwrap_or("").to_lowercase();
                if matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "bmp" | "gif") {
                    image_paths.push(path);
                }
            }
        }

        if image_paths.is_empty() {
            return Err(AbsError::InvalidConfig(format!(
                "no images found in directory: {}",
                dir_path.display()
            )));
        }
        image_paths.sort();

        debug!(count = image_paths.len(), dir = %dir_path.display(), "indexed images");

        let (channels, side) = if color { (3, 32) } else { (1, 28) };
        Ok(Self {
            image_paths,
            channels,
            side,
        })
    }

    pub fn len(&self) -> usize {
        self.image_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_paths.is_empty()
    }

    pub fn path(&self, idx: usize) -> Option<&Path> {
        self.image_paths.get(idx).map(PathBuf::as_path)
    }

    pub fn get<B: Backend>(&self, idx: usize, device: &B::Device) -> Result<Tensor<B, 4>> {
        let path = self.path(idx).ok_or_else(|| {
            AbsError::InvalidConfig(format!("index {idx} out of bounds (size: {})", self.len()))
        })?;

        let img = image::open(path)?;
        let side = self.side as u32;
        let img = img.resize_exact(side, side, FilterType::Lanczos3);

        // channel-major layout, as burn expects
        let data: Vec<f32> = if self.channels == 1 {
            img.to_luma8()
                .pixels()
                .map(|pixel| pixel[0] as f32 / 255.0)
                .collect()
        } else {
            let rgb = img.to_rgb8();
            (0..3)
                .flat_map(|c| rgb.pixels().map(move |pixel| pixel[c] as f32 / 255.0))
                .collect()
        };

        let shape = [1, self.channels, self.side, self.side];
        Ok(Tensor::from_data(TensorData::new(data, shape), device))
    }

    pub fn get_batch<B: Backend>(
        &self,
        indices: &[usize],
        device: &B::Device,
    ) -> Result<Tensor<B, 4>> {
        let batch = indices
            .iter()
            .map(|&idx| self.get::<B>(idx, device))
            .collect::<Result<Vec<_>>>()?;

        Ok(Tensor::cat(batch, 0))
    }
}

/// Saves the first image of a `[batch, channels, h, w]` tensor with values in `[0, 1]`.
pub fn save_tensor_as_image<B: Backend>(tensor: Tensor<B, 4>, path: &Path) -> Result<()> {
    let [_batch, channels, height, width] = tensor.dims();

    let values: Vec<f32> = tensor
        .slice([0..1])
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| AbsError::TensorData(format!("{e:?}")))?;
    let pixels: Vec<u8> = values
        .iter()
        .map(|&v| (v * 255.0).clamp(0.0, 255.0) as u8)
        .collect();
    let plane = height * width;

    match channels {
        1 => {
            let img = GrayImage::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
                AbsError::TensorData("pixel buffer does not match image size".to_string())
            })?;
            img.save(path)?;
        }
        3 => {
            let img = RgbImage::from_fn(width as u32, height as u32, |x, y| {
                let idx = y as usize * width + x as usize;
                image::Rgb([pixels[idx], pixels[plane + idx], pixels[2 * plane + idx]])
            });
            img.save(path)?;
        }
        other => {
            return Err(AbsError::InvalidConfig(format!(
                "cannot save a {other}-channel tensor as an image"
            )))
        }
    }

    Ok(())
}
