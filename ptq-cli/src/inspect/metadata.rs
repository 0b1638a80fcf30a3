//! Summaries of the files found inside a packaged archive.

use anyhow::{Context, Result};
use safetensors::SafeTensors;
use std::collections::BTreeMap;

/// Tensor-level summary of one `.safetensors` shard.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ShardSummary {
    pub tensors: usize,
    pub parameters: u64,
    pub dtypes: BTreeMap<String, usize>,
}

pub fn summarize_shard(data: &[u8]) -> Result<ShardSummary> {
    let st = SafeTensors::deserialize(data).context("Failed to parse safetensors shard")?;

    let mut summary = ShardSummary::default();
    for (_, view) in st.tensors() {
        summary.tensors += 1;
        summary.parameters += view.shape().iter().map(|&d| d as u64).product::<u64>();
        *summary
            .dtypes
            .entry(format!("{:?}", view.dtype()))
            .or_insert(0) += 1;
    }
    Ok(summary)
}

/// Exported model config fields worth showing.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExportedConfig {
    pub decoder: Option<String>,
    pub dtype: Option<String>,
    pub quantization: Option<String>,
    pub tensor_parallel: Option<u64>,
}

pub fn summarize_config(data: &[u8]) -> Result<ExportedConfig> {
    let json: serde_json::Value =
        serde_json::from_slice(data).context("Failed to parse exported config.json")?;

    let get_str = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| json.get(*k).and_then(|v| v.as_str()).map(str::to_string))
    };
    let quantization = json
        .get("quantization")
        .and_then(|q| q.get("quant_algo").or_else(|| q.get("algorithm")))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(ExportedConfig {
        decoder: get_str(&["decoder", "decoder_type", "architecture"]),
        dtype: get_str(&["dtype"]),
        quantization,
        tensor_parallel: json
            .get("tensor_parallel")
            .or_else(|| json.get("inference_tensor_parallel"))
            .and_then(|v| v.as_u64()),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal safetensors buffer: u64 LE header length, JSON header, data.
    pub(crate) fn shard(tensors: &[(&str, &str, &[usize])]) -> Vec<u8> {
        let mut header = serde_json::Map::new();
        let mut offset = 0usize;
        for (name, dtype, shape) in tensors {
            let width = if *dtype == "F32" { 4 } else if *dtype == "I8" { 1 } else { 2 };
            let len = shape.iter().product::<usize>() * width;
            header.insert(
                name.to_string(),
                serde_json::json!({"dtype": dtype, "shape": shape, "data_offsets": [offset, offset + len]}),
            );
            offset += len;
        }
        let header = serde_json::to_vec(&header).unwrap();
        let mut buf = (header.len() as u64).to_le_bytes().to_vec();
        buf.extend_from_slice(&header);
        buf.resize(buf.len() + offset, 0);
        buf
    }

    // ==================== shard tests ====================

    #[test]
    fn test_summarize_shard() {
        let data = shard(&[
            ("layers.0.weight", "I8", &[4, 8]),
            ("layers.0.weight_scale", "F16", &[4]),
            ("output_layer.weight", "F16", &[2, 8]),
        ]);
        let summary = summarize_shard(&data).unwrap();
        assert_eq!(summary.tensors, 3);
        assert_eq!(summary.parameters, 32 + 4 + 16);
        assert_eq!(summary.dtypes.get("I8"), Some(&1));
        assert_eq!(summary.dtypes.get("F16"), Some(&2));
    }

    #[test]
    fn test_summarize_shard_garbage() {
        assert!(summarize_shard(b"not a shard").is_err());
    }

    // ==================== config tests ====================

    #[test]
    fn test_summarize_config() {
        let data = br#"{"decoder": "llama", "dtype": "float16", "tensor_parallel": 2,
                        "quantization": {"quant_algo": "FP8"}}"#;
        let config = summarize_config(data).unwrap();
        assert_eq!(
            config,
            ExportedConfig {
                decoder: Some("llama".to_string()),
                dtype: Some("float16".to_string()),
                quantization: Some("FP8".to_string()),
                tensor_parallel: Some(2),
            }
        );
    }

    #[test]
    fn test_summarize_config_sparse() {
        let config = summarize_config(b"{}").unwrap();
        assert_eq!(config, ExportedConfig::default());
    }
}
