//! Run config template generation.

use anyhow::{Context, Result};
use ptq_runtime::{
    ExportConfig, InferenceConfig, PrecisionTag, PtqConfig, QuantizationConfig, TrainerConfig,
};
use serde_json::{json, Map, Value};
use std::fs;

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Template config with the recommended settings for Llama-family models.
pub fn template() -> PtqConfig {
    PtqConfig {
        quantization: QuantizationConfig {
            algorithm: "fp8".to_string(),
            calib_dataset: None,
            num_calib_size: 512,
        },
        inference: InferenceConfig(object(json!({
            "greedy": false,
            "top_k": 0,
            "top_p": 0.9,
            "temperature": 1.0,
            "add_BOS": true,
            "tokens_to_generate": 30,
            "all_probs": false,
            "repetition_penalty": 1.2,
            "min_tokens_to_generate": 0,
            "compute_logprob": false,
            "batch_size": 64,
            "max_context_length": 512,
        }))),
        export: ExportConfig {
            decoder_type: "llama".to_string(),
            dtype: PrecisionTag::Bits(16),
            inference_tensor_parallel: 1,
            workspace_dir: None,
            extra_artifacts: Vec::new(),
        },
        trainer: TrainerConfig {
            options: object(json!({
                "devices": 1,
                "num_nodes": 1,
                "accelerator": "gpu",
                "logger": false,
                "enable_checkpointing": false,
                "precision": "bf16",
            })),
            ..Default::default()
        },
    }
}

/// Write the template config to `output`.
pub fn run(output: &str) -> Result<()> {
    let config = template();
    fs::write(output, serde_json::to_string_pretty(&config)?)
        .with_context(|| format!("Failed to write config: {}", output))?;

    println!("Generated {}", output);
    println!(
        "Algorithm: {} (supported: {})",
        config.quantization.algorithm,
        ptq_runtime::QuantAlgorithm::supported()
    );
    println!("Run: ptq show-algorithm --config {}", output);

    Ok(())
}
