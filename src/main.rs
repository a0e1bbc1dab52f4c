use std::path::PathBuf;

use abs_vae::io::{load_config, load_model, save_model, save_tensor_as_image, ImageFolder};
use abs_vae::{AbsConfig, Mode};
use anyhow::{Context, Result};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::wgpu::WgpuDevice;
use burn::backend::{NdArray, Wgpu};
use burn::tensor::backend::Backend;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(
    name = "abs-classify",
    about = "Analysis-by-Synthesis classification with per-class VAEs"
)]
struct Cli {
    /// Run on the CPU (ndarray) instead of the GPU (wgpu).
    #[arg(long, global = true)]
    cpu: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a freshly initialised model and write it to disk.
    Init(InitArgs),
    /// Classify every image of a directory.
    Classify(ClassifyArgs),
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Output directory for config.json and the weights.
    #[arg(long)]
    out: PathBuf,
    /// Start from this config file instead of the defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    n_classes: Option<usize>,
    #[arg(long)]
    n_latents: Option<usize>,
    #[arg(long)]
    beta: Option<f64>,
    #[arg(long)]
    color: bool,
    /// `vae` or `one_lip_ae`.
    #[arg(long)]
    base_model: Option<String>,
    /// `vae` or `mse`.
    #[arg(long)]
    loss: Option<String>,
}

#[derive(Args, Debug)]
struct ClassifyArgs {
    /// Directory written by `init` (or by an external trainer).
    #[arg(long)]
    model: PathBuf,
    /// Directory of images to classify.
    images: PathBuf,
    /// Save the predicted class's reconstruction of every image here.
    #[arg(long)]
    reconstructions: Option<PathBuf>,
    #[arg(long, default_value_t = 16)]
    batch_size: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("abs_vae=info".parse()?)
                .add_directive("abs_classify=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if cli.cpu {
        info!("Using device: cpu (ndarray)");
        run::<NdArray>(cli.command, &NdArrayDevice::default())
    } else {
        let device = WgpuDevice::default();
        info!("Using device: {:?}", device);
        run::<Wgpu>(cli.command, &device)
    }
}

fn run<B: Backend>(command: Command, device: &B::Device) -> Result<()> {
    match command {
        Command::Init(args) => init::<B>(args, device),
        Command::Classify(args) => classify::<B>(args, device),
    }
}

fn init<B: Backend>(args: InitArgs, device: &B::Device) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => AbsConfig::new(),
    };
    if let Some(n_classes) = args.n_classes {
        config.n_classes = n_classes;
    }
    if let Some(n_latents) = args.n_latents {
        config.n_latents = n_latents;
    }
    if let Some(beta) = args.beta {
        config.beta = beta;
    }
    if args.color {
        config.color = true;
    }
    if let Some(base_model) = args.base_model {
        config.base_model = base_model;
    }
    if let Some(loss) = args.loss {
        config.loss_f = loss;
    }

    let model = config
        .init::<B>(device)
        .context("failed to build the ensemble")?;
    save_model(&model, &config, &args.out)
        .with_context(|| format!("failed to write model to {}", args.out.display()))?;

    info!(
        "Initialised {} x {} model in {}",
        config.n_classes,
        config.base_model,
        args.out.display()
    );
    Ok(())
}

fn classify<B: Backend>(args: ClassifyArgs, device: &B::Device) -> Result<()> {
    let (model, config) = load_model::<B>(&args.model, device)
        .with_context(|| format!("failed to load model from {}", args.model.display()))?;
    let dataset = ImageFolder::directory(&args.images, config.color)?;

    if let Some(dir) = &args.reconstructions {
        std::fs::create_dir_all(dir)?;
    }

    info!("Classifying {} images with {} classes", dataset.len(), model.n_classes());

    let indices: Vec<usize> = (0..dataset.len()).collect();
    for chunk in indices.chunks(args.batch_size.max(1)) {
        let images = dataset.get_batch::<B>(chunk, device)?;
        let output = model.forward(images, Mode::Eval);

        let predicted: Vec<i64> = output
            .logits
            .clone()
            .argmax(1)
            .into_data()
            .convert::<i64>()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("{:?}", e))?;
        let logits: Vec<f32> = output
            .logits
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("{:?}", e))?;

        for (row, (&idx, &class)) in chunk.iter().zip(&predicted).enumerate() {
            let path = dataset.path(idx).unwrap_or_else(|| std::path::Path::new("?"));
            let n = model.n_classes();
            let row_logits = &logits[row * n..(row + 1) * n];
            info!("{} -> class {}", path.display(), class);
            debug!(logits = ?row_logits, "per-class logits");

            if let Some(dir) = &args.reconstructions {
                let class = class as usize;
                let rec = output
                    .recs
                    .clone()
                    .slice([class..class + 1, row..row + 1])
                    .squeeze::<4>(0);
                let name = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or("image");
                save_tensor_as_image(rec, &dir.join(format!("{name}_class{class}.png")))?;
            }
        }
    }

    Ok(())
}
