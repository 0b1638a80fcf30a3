//! Inspect a packaged `.qnemo` archive.

mod metadata;

use anyhow::{Context, Result};
use std::path::Path;

use crate::common::format_bytes;
use metadata::{summarize_config, summarize_shard, ExportedConfig, ShardSummary};
use ptq_runtime::package::{list_archive, read_archive_files};

const CONFIG_FILE: &str = "config.json";

/// Everything `inspect` reports about an archive.
#[derive(Debug)]
pub struct ArchiveReport {
    pub files: Vec<(String, u64)>,
    pub config: Option<ExportedConfig>,
    pub shards: Vec<(String, ShardSummary)>,
}

impl ArchiveReport {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|(_, size)| size).sum()
    }
}

fn is_shard(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "safetensors")
}

pub fn report(archive: &Path) -> Result<ArchiveReport> {
    let mut files: Vec<(String, u64)> = list_archive(archive)
        .with_context(|| format!("Failed to read archive: {}", archive.display()))?
        .into_iter()
        .map(|e| (e.path.to_string_lossy().into_owned(), e.size))
        .collect();
    files.sort();

    let mut config = None;
    let mut shards = Vec::new();
    for (path, data) in read_archive_files(archive, |p| p == Path::new(CONFIG_FILE) || is_shard(p))? {
        let name = path.to_string_lossy().into_owned();
        if is_shard(&path) {
            let summary =
                summarize_shard(&data).with_context(|| format!("Invalid shard: {}", name))?;
            shards.push((name, summary));
        } else {
            config = Some(summarize_config(&data)?);
        }
    }
    shards.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(ArchiveReport { files, config, shards })
}

pub fn run(archive: &str) -> Result<()> {
    let report = report(Path::new(archive))?;

    println!("Archive: {}", archive);
    println!(
        "Files: {} ({} uncompressed)",
        report.files.len(),
        format_bytes(report.total_bytes())
    );
    for (name, size) in &report.files {
        println!("  {:<48} {:>10}", name, format_bytes(*size));
    }

    match &report.config {
        Some(config) => {
            println!("\nExported config:");
            let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
            println!("  decoder:         {}", show(&config.decoder));
            println!("  dtype:           {}", show(&config.dtype));
            println!("  quantization:    {}", show(&config.quantization));
            if let Some(tp) = config.tensor_parallel {
                println!("  tensor_parallel: {}", tp);
            }
        }
        None => println!("\nWarning: archive has no {}", CONFIG_FILE),
    }

    for (name, shard) in &report.shards {
        let dtypes: Vec<String> = shard
            .dtypes
            .iter()
            .map(|(dtype, count)| format!("{}x{}", count, dtype))
            .collect();
        println!(
            "\n{}: {} tensors, {} parameters [{}]",
            name,
            shard.tensors,
            shard.parameters,
            dtypes.join(", ")
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptq_runtime::package::write_archive;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_report() {
        let export = TempDir::new().unwrap();
        fs::write(
            export.path().join(CONFIG_FILE),
            r#"{"decoder": "llama", "dtype": "bfloat16", "quantization": {"quant_algo": "W4A8_AWQ"}}"#,
        )
        .unwrap();
        fs::write(
            export.path().join("rank0.safetensors"),
            metadata::tests::shard(&[("a", "I8", &[2, 2]), ("b", "F16", &[2])]),
        )
        .unwrap();
        fs::write(
            export.path().join("rank1.safetensors"),
            metadata::tests::shard(&[("a", "I8", &[2, 2])]),
        )
        .unwrap();
        fs::write(export.path().join("tokenizer.model"), b"spm").unwrap();

        let out = TempDir::new().unwrap();
        let archive = out.path().join("model.qnemo");
        write_archive(export.path(), &archive).unwrap();

        let report = report(&archive).unwrap();
        let names: Vec<&str> = report.files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["config.json", "rank0.safetensors", "rank1.safetensors", "tokenizer.model"]
        );
        assert_eq!(
            report.config.as_ref().unwrap().quantization.as_deref(),
            Some("W4A8_AWQ")
        );
        assert_eq!(report.shards.len(), 2);
        assert_eq!(report.shards[0].0, "rank0.safetensors");
        assert_eq!(report.shards[0].1.tensors, 2);
        assert_eq!(report.shards[1].1.parameters, 4);
    }

    #[test]
    fn test_report_missing_archive() {
        assert!(report(Path::new("/nonexistent/model.qnemo")).is_err());
    }

    #[test]
    fn test_is_shard() {
        assert!(is_shard(Path::new("rank0.safetensors")));
        assert!(!is_shard(Path::new("config.json")));
    }
}
