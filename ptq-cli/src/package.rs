//! Package an exported directory into a `.qnemo` archive.

use anyhow::{Context, Result};
use ptq_runtime::package::{copy_artifacts, ensure_outside, write_archive};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::common::{format_bytes, require_dir};

/// Package `input` (plus extra artifacts) into `output`.
///
/// Artifacts are staged next to the exporter output in a scratch copy so the
/// input directory is left untouched.
pub fn run(input: &str, output: &str, artifacts: &[String]) -> Result<()> {
    let input_dir = require_dir(input)?;
    let artifacts: Vec<PathBuf> = artifacts.iter().map(PathBuf::from).collect();
    ensure_outside(input_dir, output.as_ref())?;

    let summary = if artifacts.is_empty() {
        write_archive(input_dir, output.as_ref())?
    } else {
        let staging = tempfile::Builder::new()
            .prefix("ptq-package-")
            .tempdir()
            .context("Failed to create staging directory")?;
        debug!(
            staging = %staging.path().display(),
            artifacts = artifacts.len(),
            "staging export directory"
        );
        copy_dir(input_dir, staging.path())?;
        copy_artifacts(&artifacts, staging.path())?;
        write_archive(staging.path(), output.as_ref())?
    };

    println!(
        "Packaged {} files into {} ({})",
        summary.files,
        summary.path.display(),
        format_bytes(summary.bytes_written)
    );
    Ok(())
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    for entry in fs::read_dir(src)
        .with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&target)?;
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}
