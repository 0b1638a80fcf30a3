//! Seam to the frameworks that own the model.
//!
//! A [`Backend`] bundles the checkpoint store, the training-harness
//! constructor, the quantization toolkit and the exporter. They are grouped
//! because all four operate on the same concrete model type.

use std::path::Path;

use crate::algorithm::AlgorithmConfig;
use crate::config::TrainerConfig;
use crate::dist::Harness;
use crate::model::{CheckpointSource, Model, ModelConfig};

/// Calibration callback handed to the toolkit.
pub type ForwardLoop<'a, M> = dyn FnMut(&mut M) -> anyhow::Result<()> + 'a;

/// Parameters for one exporter call.
#[derive(Debug, Clone)]
pub struct ExportRequest<'a> {
    /// Decoder architecture tag, e.g. "llama"
    pub decoder_type: &'a str,
    /// Precision of non-quantized tensors
    pub dtype: safetensors::Dtype,
    /// Directory receiving config, weights and tokenizer config
    pub export_dir: &'a Path,
    /// Tensor parallelism of the target inference engine
    pub inference_tensor_parallel: usize,
}

pub trait Backend {
    type Model: Model;

    /// Build a training harness for `strategy` from pass-through trainer options.
    fn create_harness(
        &self,
        strategy: &str,
        trainer: &TrainerConfig,
    ) -> anyhow::Result<Box<dyn Harness>>;

    /// Restore only the model configuration from a checkpoint.
    fn restore_config(
        &self,
        source: &CheckpointSource,
        harness: &dyn Harness,
    ) -> anyhow::Result<ModelConfig>;

    /// Restore the model weights using a (possibly rewritten) configuration.
    fn restore_model(
        &self,
        source: &CheckpointSource,
        harness: Box<dyn Harness>,
        config: ModelConfig,
    ) -> anyhow::Result<Self::Model>;

    /// Quantize `model` in place.
    ///
    /// The toolkit decides how often `forward_loop` runs; zero, one or several
    /// invocations are all valid.
    fn quantize(
        &self,
        model: &mut Self::Model,
        config: &AlgorithmConfig,
        forward_loop: &mut ForwardLoop<'_, Self::Model>,
    ) -> anyhow::Result<()>;

    /// Serialize the quantized model's config and weights into `request.export_dir`.
    ///
    /// Every rank calls this; implementations may run collectives across
    /// tensor-parallel shards.
    fn export_model_config(
        &self,
        model: &Self::Model,
        request: &ExportRequest<'_>,
    ) -> anyhow::Result<()>;
}
