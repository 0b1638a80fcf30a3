//! Run configuration for post-training quantization.
//!
//! The four sections mirror the systems a run touches: the quantization
//! toolkit, the model's inference setup, the exporter and the training
//! harness. Inference and trainer sections are opaque maps handed through to
//! the backend untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

use crate::error::{PtqError, Result};

/// Parallelism strategy used when none is configured.
pub const DEFAULT_STRATEGY: &str = "nlp_ddp";

/// Precision tags accepted for `export.dtype`.
pub const SUPPORTED_DTYPES: &[&str] = &["16", "bf16"];

/// Complete configuration for a quantization run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PtqConfig {
    pub quantization: QuantizationConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    pub export: ExportConfig,

    #[serde(default)]
    pub trainer: TrainerConfig,
}

/// Quantization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Algorithm identifier: "int8", "int8_sq", "fp8", "int4_awq" or "w4a8_awq"
    pub algorithm: String,

    /// Path to calibration text (JSON lines or plain text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calib_dataset: Option<PathBuf>,

    /// Number of calibration samples to draw
    #[serde(default = "default_num_calib_size")]
    pub num_calib_size: usize,
}

fn default_num_calib_size() -> usize {
    512
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            algorithm: "fp8".to_string(),
            calib_dataset: None,
            num_calib_size: default_num_calib_size(),
        }
    }
}

/// Inference parameters passed to the model's inference setup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InferenceConfig(pub Map<String, Value>);

impl InferenceConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 64;
    pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 512;

    /// Calibration batch size (`batch_size`).
    pub fn batch_size(&self) -> usize {
        self.get_usize("batch_size")
            .unwrap_or(Self::DEFAULT_BATCH_SIZE)
    }

    /// Per-sample character budget for calibration text (`max_context_length`).
    pub fn max_context_length(&self) -> usize {
        self.get_usize("max_context_length")
            .unwrap_or(Self::DEFAULT_MAX_CONTEXT_LENGTH)
    }

    fn get_usize(&self, key: &str) -> Option<usize> {
        self.0.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
    }
}

/// Export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Decoder architecture tag understood by the exporter (e.g. "llama")
    pub decoder_type: String,

    /// Precision for non-quantized layers: 16, "16" or "bf16"
    pub dtype: PrecisionTag,

    /// Tensor parallelism of the target inference engine
    #[serde(default = "default_inference_tensor_parallel")]
    pub inference_tensor_parallel: usize,

    /// Parent directory for the export workspace. Must be visible to every rank.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,

    /// Extra files copied into the archive next to the exporter output
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_artifacts: Vec<PathBuf>,
}

fn default_inference_tensor_parallel() -> usize {
    1
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            decoder_type: "llama".to_string(),
            dtype: PrecisionTag::Bits(16),
            inference_tensor_parallel: default_inference_tensor_parallel(),
            workspace_dir: None,
            extra_artifacts: Vec::new(),
        }
    }
}

/// Training harness settings. Everything except the strategy is passed through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,

    #[serde(flatten)]
    pub options: Map<String, Value>,
}

fn default_strategy() -> String {
    DEFAULT_STRATEGY.to_string()
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            options: Map::new(),
        }
    }
}

/// Raw precision tag as written in config files: either a bit count or a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrecisionTag {
    Bits(i64),
    Name(String),
}

impl fmt::Display for PrecisionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrecisionTag::Bits(bits) => write!(f, "{}", bits),
            PrecisionTag::Name(name) => f.write_str(name),
        }
    }
}

/// Floating-point representation of non-quantized layers in the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportDtype {
    Float16,
    BFloat16,
}

impl ExportDtype {
    /// Validate a precision tag. Only `16`, `"16"` and `"bf16"` are accepted.
    pub fn from_tag(tag: &PrecisionTag) -> Result<Self> {
        match tag {
            PrecisionTag::Bits(16) => Ok(ExportDtype::Float16),
            PrecisionTag::Name(name) if name == "16" => Ok(ExportDtype::Float16),
            PrecisionTag::Name(name) if name == "bf16" => Ok(ExportDtype::BFloat16),
            _ => Err(PtqError::UnsupportedDtype {
                dtype: tag.to_string(),
                supported: SUPPORTED_DTYPES.join(", "),
            }),
        }
    }

    /// Concrete tensor dtype handed to the exporter.
    pub fn tensor_dtype(self) -> safetensors::Dtype {
        match self {
            ExportDtype::Float16 => safetensors::Dtype::F16,
            ExportDtype::BFloat16 => safetensors::Dtype::BF16,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportDtype::Float16 => "float16",
            ExportDtype::BFloat16 => "bfloat16",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== ExportDtype tests ====================

    #[test]
    fn test_export_dtype_accepts_supported_tags() {
        assert_eq!(
            ExportDtype::from_tag(&PrecisionTag::Bits(16)).unwrap(),
            ExportDtype::Float16
        );
        assert_eq!(
            ExportDtype::from_tag(&PrecisionTag::Name("16".into())).unwrap(),
            ExportDtype::Float16
        );
        assert_eq!(
            ExportDtype::from_tag(&PrecisionTag::Name("bf16".into())).unwrap(),
            ExportDtype::BFloat16
        );
    }

    #[test]
    fn test_export_dtype_rejects_other_tags() {
        for tag in [
            PrecisionTag::Bits(32),
            PrecisionTag::Bits(8),
            PrecisionTag::Name("32".into()),
            PrecisionTag::Name("fp16".into()),
            PrecisionTag::Name("bf16-mixed".into()),
        ] {
            let err = ExportDtype::from_tag(&tag).unwrap_err();
            assert!(matches!(err, PtqError::UnsupportedDtype { .. }), "{:?}", tag);
        }
    }

    #[test]
    fn test_export_dtype_tensor_dtype() {
        assert_eq!(ExportDtype::Float16.tensor_dtype(), safetensors::Dtype::F16);
        assert_eq!(ExportDtype::BFloat16.tensor_dtype(), safetensors::Dtype::BF16);
    }

    // ==================== PtqConfig tests ====================

    #[test]
    fn test_config_deserialization() {
        let json = r#"{
            "quantization": {"algorithm": "int4_awq", "num_calib_size": 128},
            "inference": {"batch_size": 8, "max_context_length": 256, "greedy": true},
            "export": {"decoder_type": "llama", "dtype": "bf16", "inference_tensor_parallel": 2},
            "trainer": {"devices": 8, "num_nodes": 1, "precision": "bf16"}
        }"#;

        let config: PtqConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.quantization.algorithm, "int4_awq");
        assert_eq!(config.quantization.num_calib_size, 128);
        assert!(config.quantization.calib_dataset.is_none());
        assert_eq!(config.inference.batch_size(), 8);
        assert_eq!(config.inference.max_context_length(), 256);
        assert_eq!(config.export.dtype, PrecisionTag::Name("bf16".into()));
        assert_eq!(config.export.inference_tensor_parallel, 2);
        assert_eq!(config.trainer.strategy, DEFAULT_STRATEGY);
        assert_eq!(config.trainer.options["devices"], 8);
    }

    #[test]
    fn test_config_numeric_dtype() {
        let json = r#"{
            "quantization": {"algorithm": "fp8"},
            "export": {"decoder_type": "gptnext", "dtype": 16}
        }"#;

        let config: PtqConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.export.dtype, PrecisionTag::Bits(16));
        assert_eq!(config.export.inference_tensor_parallel, 1);
        assert!(config.export.extra_artifacts.is_empty());
        assert_eq!(config.quantization.num_calib_size, 512);
        assert_eq!(config.inference.batch_size(), InferenceConfig::DEFAULT_BATCH_SIZE);
        assert!(config.trainer.options.is_empty());
    }

    #[test]
    fn test_trainer_config_round_trip_keeps_options() {
        let json = r#"{"strategy": "custom", "devices": 2, "accelerator": "gpu"}"#;
        let trainer: TrainerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(trainer.strategy, "custom");
        assert_eq!(trainer.options.len(), 2);

        let out = serde_json::to_value(&trainer).unwrap();
        assert_eq!(out["accelerator"], "gpu");
        assert_eq!(out["strategy"], "custom");
    }

    #[test]
    fn test_precision_tag_display() {
        assert_eq!(PrecisionTag::Bits(16).to_string(), "16");
        assert_eq!(PrecisionTag::Name("bf16".into()).to_string(), "bf16");
    }
}
