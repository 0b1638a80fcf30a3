//! PTQ Runtime - post-training quantization of distributed checkpoints.
//!
//! Sequences the systems involved in a quantization run: a checkpoint store
//! restores the model under a parallelism strategy, a toolkit calibrates and
//! quantizes it, and an exporter writes the quantized weights, which are then
//! packed into a `.qnemo` archive for the inference engine.
//!
//! # Usage
//! ```ignore
//! use ptq_runtime::{PtqConfig, Quantizer};
//!
//! let quantizer = Quantizer::new(config, backend)?;
//! let model = quantizer.quantize(Path::new("llama2-7b.nemo"), &batches, Some(1), Some(1))?;
//! quantizer.export(&model, Path::new("llama2-7b-fp8.qnemo"))?;
//! ```

pub mod algorithm;
pub mod backend;
pub mod calibration;
pub mod config;
pub mod dist;
pub mod error;
pub mod model;
pub mod package;
pub mod quantizer;


// Re-exports
pub use algorithm::{AlgorithmConfig, QuantAlgorithm, QuantizerSpec, OUTPUT_LAYER_PATTERN};
pub use backend::{Backend, ExportRequest, ForwardLoop};
pub use config::{ExportConfig, ExportDtype, InferenceConfig, PrecisionTag, PtqConfig, QuantizationConfig, TrainerConfig};
pub use dist::{ensure_process_group, Harness, Launcher, LocalHarness, ProcessGroup, SingleProcessGroup, ThreadGroup};
pub use error::{PtqError, Result};
pub use model::{CheckpointSource, Model, ModelConfig, QUANTIZATION_LAYER_SPEC};
pub use quantizer::{ExportSummary, Quantizer};
