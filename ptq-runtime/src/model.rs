//! Checkpoint locations, restored model configuration and the model seam.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::InferenceConfig;
use crate::dist::Harness;

/// Layer-spec tag the quantization toolkit requires. It selects local layer
/// implementations instead of fused attention kernels the toolkit cannot patch.
pub const QUANTIZATION_LAYER_SPEC: &str = "ammo";

/// Where a checkpoint lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointSource {
    /// Packed checkpoint archive.
    Archive(PathBuf),
    /// Checkpoint that has already been unpacked into a directory.
    Extracted(PathBuf),
}

impl CheckpointSource {
    /// Classify a path: existing directories are treated as extracted checkpoints.
    pub fn from_path(path: &Path) -> Self {
        if path.is_dir() {
            CheckpointSource::Extracted(path.to_path_buf())
        } else {
            CheckpointSource::Archive(path.to_path_buf())
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            CheckpointSource::Archive(p) | CheckpointSource::Extracted(p) => p,
        }
    }

    /// Directory to restore from without unpacking, if any.
    pub fn extracted_dir(&self) -> Option<&Path> {
        match self {
            CheckpointSource::Extracted(p) => Some(p),
            CheckpointSource::Archive(_) => None,
        }
    }
}

/// Model configuration restored from a checkpoint.
///
/// Only the fields this crate rewrites are typed; the rest is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_parallel_size")]
    pub tensor_model_parallel_size: usize,

    #[serde(default = "default_parallel_size")]
    pub pipeline_model_parallel_size: usize,

    #[serde(default)]
    pub activations_checkpoint_method: Option<String>,

    #[serde(default)]
    pub activations_checkpoint_granularity: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_parallel_size() -> usize {
    1
}

impl ModelConfig {
    /// Rewrite the configuration for a calibration run.
    ///
    /// Activation checkpointing is turned off, parallel degrees are replaced
    /// when overrides are given, and the layer spec is pinned to
    /// [`QUANTIZATION_LAYER_SPEC`].
    pub fn apply_quantization_overrides(
        &mut self,
        tensor_model_parallel_size: Option<usize>,
        pipeline_model_parallel_size: Option<usize>,
    ) {
        self.activations_checkpoint_method = None;
        self.activations_checkpoint_granularity = None;
        if let Some(tp) = tensor_model_parallel_size {
            self.tensor_model_parallel_size = tp;
        }
        if let Some(pp) = pipeline_model_parallel_size {
            self.pipeline_model_parallel_size = pp;
        }
        self.name = Some(QUANTIZATION_LAYER_SPEC.to_string());
    }
}

/// A restored model, owned by the caller's framework.
pub trait Model: fmt::Debug {
    /// Switch to inference-only mode with gradients disabled.
    fn freeze(&mut self);

    /// Encoder activation-checkpoint method, if the model has an encoder that carries one.
    fn encoder_checkpoint_method_mut(&mut self) -> Option<&mut Option<String>>;

    /// Harness the model was restored with.
    fn harness(&self) -> &dyn Harness;

    fn harness_mut(&mut self) -> &mut dyn Harness;

    fn set_inference_config(&mut self, config: &InferenceConfig) -> anyhow::Result<()>;

    /// Run one inference step over a batch of prompts.
    fn predict_step(&mut self, batch: &[String], batch_index: usize) -> anyhow::Result<()>;

    /// Write auxiliary artifacts (tokenizer model and config) into `dir`.
    fn save_artifacts(&self, dir: &Path) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_source_directory_is_extracted() {
        let dir = TempDir::new().unwrap();
        let source = CheckpointSource::from_path(dir.path());
        assert_eq!(source.extracted_dir(), Some(dir.path()));
    }

    #[test]
    fn test_checkpoint_source_file_is_archive() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("llama2-7b.nemo");
        std::fs::File::create(&file).unwrap();

        let source = CheckpointSource::from_path(&file);
        assert_eq!(source, CheckpointSource::Archive(file.clone()));
        assert_eq!(source.path(), file);
        assert!(source.extracted_dir().is_none());
    }

    #[test]
    fn test_checkpoint_source_missing_path_is_archive() {
        let source = CheckpointSource::from_path(Path::new("/nonexistent/model.nemo"));
        assert!(matches!(source, CheckpointSource::Archive(_)));
    }

    #[test]
    fn test_overrides_with_parallel_sizes() {
        let json = r#"{
            "name": "megatron_gpt",
            "tensor_model_parallel_size": 8,
            "pipeline_model_parallel_size": 2,
            "activations_checkpoint_method": "uniform",
            "activations_checkpoint_granularity": "full",
            "hidden_size": 4096
        }"#;
        let mut config: ModelConfig = serde_json::from_str(json).unwrap();
        config.apply_quantization_overrides(Some(1), Some(1));

        assert_eq!(config.name.as_deref(), Some(QUANTIZATION_LAYER_SPEC));
        assert_eq!(config.tensor_model_parallel_size, 1);
        assert_eq!(config.pipeline_model_parallel_size, 1);
        assert!(config.activations_checkpoint_method.is_none());
        assert!(config.activations_checkpoint_granularity.is_none());
        assert_eq!(config.extra["hidden_size"], 4096);
    }

    #[test]
    fn test_overrides_without_parallel_sizes() {
        let json = r#"{"tensor_model_parallel_size": 4, "pipeline_model_parallel_size": 2}"#;
        let mut config: ModelConfig = serde_json::from_str(json).unwrap();
        config.apply_quantization_overrides(None, None);

        assert_eq!(config.tensor_model_parallel_size, 4);
        assert_eq!(config.pipeline_model_parallel_size, 2);
        assert_eq!(config.name.as_deref(), Some(QUANTIZATION_LAYER_SPEC));
    }
}
