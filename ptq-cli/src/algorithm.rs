//! Resolve and print the algorithm config a run would use.

use anyhow::Result;
use ptq_runtime::{ExportDtype, PtqConfig, QuantAlgorithm, OUTPUT_LAYER_PATTERN};

use crate::common::load_config;

/// Resolve the algorithm from `--algorithm` or a run config.
///
/// A run config is validated the same way a quantization run validates it,
/// export dtype included.
fn resolve(algorithm: Option<&str>, config_path: Option<&str>) -> Result<QuantAlgorithm> {
    if let Some(id) = algorithm {
        return Ok(id.parse()?);
    }

    let config: PtqConfig = load_config(config_path, "ptq_config.json")?;
    let dtype = ExportDtype::from_tag(&config.export.dtype)?;
    println!("Export dtype: {}", dtype.as_str());
    Ok(config.quantization.algorithm.parse()?)
}

pub fn run(algorithm: Option<&str>, config_path: Option<&str>) -> Result<()> {
    let algorithm = resolve(algorithm, config_path)?;
    let derived = algorithm.derive_config();

    println!("Algorithm: {}", algorithm);
    if derived.rule(OUTPUT_LAYER_PATTERN).is_some() {
        println!("Output layer ({}) kept in full precision", OUTPUT_LAYER_PATTERN);
    }
    println!("{}", serde_json::to_string_pretty(&derived)?);

    Ok(())
}
