//! Calibration data preview.

use anyhow::{Context, Result};
use ptq_runtime::calibration::{load_texts, make_batches};
use ptq_runtime::PtqConfig;
use std::path::PathBuf;

use crate::common::load_config;

/// Summary of the batches a run would calibrate on.
#[derive(Debug, PartialEq, Eq)]
pub struct BatchPlan {
    pub samples_available: usize,
    pub samples_used: usize,
    pub batch_sizes: Vec<usize>,
}

pub fn plan(config: &PtqConfig, data_override: Option<&str>) -> Result<BatchPlan> {
    let data = data_override
        .map(PathBuf::from)
        .or_else(|| config.quantization.calib_dataset.clone())
        .context("No calibration data: set quantization.calib_dataset or pass --data")?;

    let texts = load_texts(&data)
        .with_context(|| format!("Failed to load calibration data: {}", data.display()))?;
    let batches = make_batches(
        &texts,
        config.inference.batch_size(),
        config.quantization.num_calib_size,
        config.inference.max_context_length(),
    )?;

    Ok(BatchPlan {
        samples_available: texts.len(),
        samples_used: batches.iter().map(|b| b.len()).sum(),
        batch_sizes: batches.iter().map(|b| b.len()).collect(),
    })
}

pub fn run(config_path: Option<&str>, data: Option<&str>) -> Result<()> {
    let config: PtqConfig = load_config(config_path, "ptq_config.json")?;
    let plan = plan(&config, data)?;

    println!(
        "Calibration samples: {} used of {} available",
        plan.samples_used, plan.samples_available
    );
    println!(
        "Batches: {} (batch_size={}, max_context_length={})",
        plan.batch_sizes.len(),
        config.inference.batch_size(),
        config.inference.max_context_length()
    );
    if plan.samples_used < config.quantization.num_calib_size {
        println!(
            "Warning: requested {} samples, only {} available",
            config.quantization.num_calib_size, plan.samples_used
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_with(batch_size: u64, num_calib_size: usize) -> PtqConfig {
        let mut config = crate::generate::template();
        config.quantization.num_calib_size = num_calib_size;
        config
            .inference
            .0
            .insert("batch_size".to_string(), batch_size.into());
        config
    }

    #[test]
    fn test_plan_with_override() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("calib.txt");
        let lines: Vec<String> = (0..10).map(|i| format!("line {}", i)).collect();
        fs::write(&data, lines.join("\n")).unwrap();

        let plan = plan(&config_with(4, 9), data.to_str()).unwrap();
        assert_eq!(
            plan,
            BatchPlan {
                samples_available: 10,
                samples_used: 9,
                batch_sizes: vec![4, 4, 1],
            }
        );
    }

    #[test]
    fn test_plan_from_config_dataset() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("calib.jsonl");
        fs::write(&data, "{\"text\": \"a\"}\n{\"text\": \"b\"}\n").unwrap();

        let mut config = config_with(8, 512);
        config.quantization.calib_dataset = Some(data);
        let plan = plan(&config, None).unwrap();
        assert_eq!(plan.batch_sizes, vec![2]);
    }

    #[test]
    fn test_plan_without_data() {
        let err = plan(&config_with(8, 512), None).unwrap_err();
        assert!(err.to_string().contains("No calibration data"));
    }
}
