use burn::module::{Ignored, Module, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Int, Tensor};

use crate::config::LossKind;
use crate::loss::samplewise_loss;
use crate::one_lip::OneLipAe;
use crate::vae::{Mode, Vae};

/// Generative model backing one class of the ensemble.
#[derive(Module, Debug)]
pub enum BaseModel<B: Backend> {
    Vae(Vae<B>),
    OneLip(OneLipAe<B>),
}

impl<B: Backend> BaseModel<B> {
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        mode: Mode,
    ) -> (Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) {
        match self {
            Self::Vae(vae) => vae.forward(x, mode),
            Self::OneLip(model) => model.forward(x, mode),
        }
    }

    pub fn encoder_parameters(&self) -> Vec<ParamId> {
        match self {
            Self::Vae(vae) => collect_param_ids::<B, _>(vae.encoder()),
            Self::OneLip(model) => collect_param_ids::<B, _>(model.encoder()),
        }
    }

    pub fn decoder_parameters(&self) -> Vec<ParamId> {
        match self {
            Self::Vae(vae) => collect_param_ids::<B, _>(vae.decoder()),
            Self::OneLip(model) => collect_param_ids::<B, _>(model.decoder()),
        }
    }
}

struct ParamIdCollector {
    ids: Vec<ParamId>,
}

impl<B: Backend> ModuleVisitor<B> for ParamIdCollector {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        self.ids.push(id);
    }
}

/// Ids of every float tensor of `module`, in visiting order.
///
/// Batch-norm running statistics are float tensors too and are included.
/// They never receive gradients, so `GradientsParams::from_params` skips them.
pub fn collect_param_ids<B: Backend, M: Module<B>>(module: &M) -> Vec<ParamId> {
    let mut collector = ParamIdCollector { ids: Vec::new() };
    module.visit(&mut collector);
    collector.ids
}

#[derive(Debug, Clone)]
pub struct AbsOutput<B: Backend> {
    /// `[batch, n_classes]`, negated per-class losses.
    pub logits: Tensor<B, 2>,
    /// `[n_classes, batch, channels, height, width]`
    pub recs: Tensor<B, 5>,
    /// `[n_classes, batch, n_latents, 1, 1]`
    pub mus: Tensor<B, 5>,
    pub logvars: Tensor<B, 5>,
}

/// Analysis-by-Synthesis classifier.
///
/// Every class owns an independent generative model. A sample is scored
/// under each of them and the class whose model explains it with the
/// lowest loss gets the highest logit.
#[derive(Module, Debug)]
pub struct Abs<B: Backend> {
    base_models: Vec<BaseModel<B>>,
    beta: f64,
    loss_kind: Ignored<LossKind>,
}

impl<B: Backend> Abs<B> {
    pub fn new(base_models: Vec<BaseModel<B>>, beta: f64, loss_kind: LossKind) -> Self {
        Self {
            base_models,
            beta,
            loss_kind: Ignored(loss_kind),
        }
    }

    pub fn n_classes(&self) -> usize {
        self.base_models.len()
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn loss_kind(&self) -> LossKind {
        *self.loss_kind
    }

    pub fn base_model(&self, class: usize) -> Option<&BaseModel<B>> {
        self.base_models.get(class)
    }

    pub fn forward(&self, x: Tensor<B, 4>, mode: Mode) -> AbsOutput<B> {
        let batch = x.dims()[0];
        let outputs: Vec<_> = self
            .base_models
            .iter()
            .map(|model| model.forward(x.clone(), mode))
            .collect();

        let losses: Vec<Tensor<B, 1>> = outputs
            .iter()
            .map(|(rec, mu, logvar)| {
                samplewise_loss(
                    x.clone(),
                    rec.clone().detach(),
                    mu.clone().detach(),
                    logvar.clone().detach(),
                    self.beta,
                    *self.loss_kind,
                )
            })
            .collect();
        let losses: Tensor<B, 2> = Tensor::stack(losses, 0);
        assert_eq!(
            losses.dims(),
            [self.n_classes(), batch],
            "per-class losses must be [n_classes, batch]"
        );

        let mut recs = Vec::with_capacity(outputs.len());
        let mut mus = Vec::with_capacity(outputs.len());
        let mut logvars = Vec::with_capacity(outputs.len());
        for (rec, mu, logvar) in outputs {
            recs.push(rec);
            mus.push(mu);
            logvars.push(logvar);
        }

        AbsOutput {
            logits: losses.neg().swap_dims(0, 1),
            recs: Tensor::stack(recs, 0),
            mus: Tensor::stack(mus, 0),
            logvars: Tensor::stack(logvars, 0),
        }
    }

    /// Class with the highest eval-mode logit for every sample, `[batch]`.
    ///
    /// Call it on the inner backend (`abs.valid().predict(x)`): under autodiff
    /// batch-norm uses batch statistics and the logits of a sample depend on
    /// the rest of the batch.
    pub fn predict(&self, x: Tensor<B, 4>) -> Tensor<B, 1, Int> {
        self.forward(x, Mode::Eval).logits.argmax(1).squeeze(1)
    }

    /// Encoder tensors of all class models, in class order, batch-norm
    /// running statistics included.
    pub fn encoder_parameters(&self) -> Vec<ParamId> {
        self.base_models
            .iter()
            .flat_map(BaseModel::encoder_parameters)
            .collect()
    }

    /// Decoder tensors of all class models, in class order, batch-norm
    /// running statistics included.
    pub fn decoder_parameters(&self) -> Vec<ParamId> {
        self.base_models
            .iter()
            .flat_map(BaseModel::decoder_parameters)
            .collect()
    }
}

impl<B: AutodiffBackend> Abs<B> {
    /// Gradients of the encoder tensors only, for a dedicated optimizer.
    pub fn encoder_grads(&self, grads: &mut B::Gradients) -> GradientsParams {
        GradientsParams::from_params(grads, self, &self.encoder_parameters())
    }

    /// Gradients of the decoder tensors only, for a dedicated optimizer.
    pub fn decoder_grads(&self, grads: &mut B::Gradients) -> GradientsParams {
        GradientsParams::from_params(grads, self, &self.decoder_parameters())
    }
}
