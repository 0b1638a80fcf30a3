//! Post-training quantization of distributed checkpoints.
//!
//! A run has two phases:
//!
//! 1. [`Quantizer::quantize`] restores the checkpoint under the configured
//!    parallelism, runs calibration batches through the toolkit and returns
//!    the model quantized in place.
//! 2. [`Quantizer::export`] writes config, quantized weights and tokenizer
//!    files into a shared workspace on every rank and, after a barrier, packs
//!    them into a `.qnemo` archive on the coordinator.
//!
//! The produced archive is what the downstream inference engine consumes.

use std::path::Path;

use tracing::{debug, info};

use crate::algorithm::{AlgorithmConfig, QuantAlgorithm};
use crate::backend::{Backend, ExportRequest};
use crate::calibration::run_forward_loop;
use crate::config::{ExportDtype, PtqConfig};
use crate::dist::{ensure_process_group, Harness};
use crate::error::Result;
use crate::model::{CheckpointSource, Model, ModelConfig};
use crate::package::{copy_artifacts, write_archive, ExportWorkspace};

/// Outcome of [`Quantizer::export`] on one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportSummary {
    /// This rank packaged the archive.
    Packaged {
        archive: std::path::PathBuf,
        files: usize,
        bytes_written: u64,
    },
    /// This rank contributed its shard and left packaging to the coordinator.
    Skipped { rank: usize },
}

/// Drives calibration, quantization and export for one configuration.
pub struct Quantizer<B> {
    config: PtqConfig,
    algorithm: QuantAlgorithm,
    algorithm_config: AlgorithmConfig,
    export_dtype: ExportDtype,
    backend: B,
}

impl<B: Backend> Quantizer<B> {
    /// Validate the configuration and derive the algorithm config.
    ///
    /// Fails if the export dtype or the algorithm is not supported.
    pub fn new(config: PtqConfig, backend: B) -> Result<Self> {
        let export_dtype = ExportDtype::from_tag(&config.export.dtype)?;
        let algorithm: QuantAlgorithm = config.quantization.algorithm.parse()?;
        let algorithm_config = algorithm.derive_config();

        debug!(%algorithm, dtype = export_dtype.as_str(), "quantizer configured");

        Ok(Self {
            config,
            algorithm,
            algorithm_config,
            export_dtype,
            backend,
        })
    }

    pub fn algorithm(&self) -> QuantAlgorithm {
        self.algorithm
    }

    pub fn algorithm_config(&self) -> &AlgorithmConfig {
        &self.algorithm_config
    }

    pub fn export_dtype(&self) -> ExportDtype {
        self.export_dtype
    }

    /// Restore the checkpoint, calibrate on `calibration` and quantize.
    ///
    /// Parallel overrides replace the degrees stored in the checkpoint.
    pub fn quantize(
        &self,
        model_file: &Path,
        calibration: &[Vec<String>],
        tensor_model_parallel_size: Option<usize>,
        pipeline_model_parallel_size: Option<usize>,
    ) -> Result<B::Model> {
        let mut model = self.load_model(
            model_file,
            tensor_model_parallel_size,
            pipeline_model_parallel_size,
        )?;
        model.set_inference_config(&self.config.inference)?;

        let log_progress = model.harness().process_group().is_coordinator();
        let mut forward_loop =
            |model: &mut B::Model| run_forward_loop(model, calibration, log_progress);

        info!(
            algorithm = %self.algorithm,
            batches = calibration.len(),
            "Quantizing model"
        );
        self.backend
            .quantize(&mut model, &self.algorithm_config, &mut forward_loop)?;
        Ok(model)
    }

    fn load_model(
        &self,
        model_file: &Path,
        tensor_model_parallel_size: Option<usize>,
        pipeline_model_parallel_size: Option<usize>,
    ) -> Result<B::Model> {
        let trainer = &self.config.trainer;
        let harness = self.backend.create_harness(&trainer.strategy, trainer)?;
        let source = CheckpointSource::from_path(model_file);

        let model_config = self.restore_and_modify_config(
            &source,
            harness.as_ref(),
            tensor_model_parallel_size,
            pipeline_model_parallel_size,
        )?;

        let mut model = self
            .backend
            .restore_model(&source, harness, model_config)?;
        model.freeze();

        if let Some(method) = model.encoder_checkpoint_method_mut() {
            *method = None;
        }

        if model.harness().process_group().is_coordinator() {
            debug!(?model, "restored model");
        }

        ensure_process_group(model.harness_mut())?;
        Ok(model)
    }

    fn restore_and_modify_config(
        &self,
        source: &CheckpointSource,
        harness: &dyn Harness,
        tensor_model_parallel_size: Option<usize>,
        pipeline_model_parallel_size: Option<usize>,
    ) -> Result<ModelConfig> {
        let mut model_config = self.backend.restore_config(source, harness)?;
        model_config
            .apply_quantization_overrides(tensor_model_parallel_size, pipeline_model_parallel_size);
        Ok(model_config)
    }

    /// Export the quantized model and package it at `destination`.
    ///
    /// Collective: every rank must call this. Only the coordinator writes the
    /// archive, after all ranks finished their export shard.
    ///
    /// A rank whose exporter fails returns before the barrier, so the other
    /// ranks stay blocked in it. Callers running a multi-rank group should
    /// abort the whole group on error.
    pub fn export(&self, model: &B::Model, destination: &Path) -> Result<ExportSummary> {
        let export = &self.config.export;
        let group = model.harness().process_group();
        let workspace = ExportWorkspace::create(group, export.workspace_dir.as_deref())?;

        self.backend.export_model_config(
            model,
            &ExportRequest {
                decoder_type: &export.decoder_type,
                dtype: self.export_dtype.tensor_dtype(),
                export_dir: workspace.path(),
                inference_tensor_parallel: export.inference_tensor_parallel,
            },
        )?;

        // All ranks must finish writing their shard before the directory is read.
        group.barrier()?;

        if !group.is_coordinator() {
            return Ok(ExportSummary::Skipped { rank: group.rank() });
        }

        info!(
            destination = %destination.display(),
            "Exporting quantized weights, model artifacts, and tokenizer config"
        );
        model.save_artifacts(workspace.path())?;
        copy_artifacts(&export.extra_artifacts, workspace.path())?;
        let summary = write_archive(workspace.path(), destination)?;

        Ok(ExportSummary::Packaged {
            archive: summary.path,
            files: summary.files,
            bytes_written: summary.bytes_written,
        })
    }
}
