//! Calibration data loading and the forward loop run by the toolkit.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{PtqError, Result};
use crate::model::Model;

/// JSON fields checked, in order, for sample text in JSON-lines files.
const TEXT_FIELDS: &[&str] = &["text", "article"];

/// Load calibration samples from a file.
///
/// `.jsonl` / `.json` files hold one JSON object per line with the sample in
/// `text` (or `article`). Any other file is plain text with one sample per
/// non-empty line.
pub fn load_texts(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    let is_jsonl = matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("jsonl") | Some("json")
    );

    let mut texts = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if !is_jsonl {
            texts.push(line.to_string());
            continue;
        }

        let record: serde_json::Value = serde_json::from_str(line).map_err(|e| {
            PtqError::Calibration(format!("{}:{}: {}", path.display(), line_no + 1, e))
        })?;
        let text = TEXT_FIELDS
            .iter()
            .find_map(|field| record.get(*field).and_then(|v| v.as_str()))
            .ok_or_else(|| {
                PtqError::Calibration(format!(
                    "{}:{}: no {} field",
                    path.display(),
                    line_no + 1,
                    TEXT_FIELDS.join("/")
                ))
            })?;
        texts.push(text.to_string());
    }

    if texts.is_empty() {
        return Err(PtqError::Calibration(format!(
            "no calibration samples in {}",
            path.display()
        )));
    }
    Ok(texts)
}

/// Shape samples into calibration batches.
///
/// At most `num_samples` samples are used, each truncated to
/// `max_sequence_length` characters. The last batch may be short.
pub fn make_batches(
    texts: &[String],
    batch_size: usize,
    num_samples: usize,
    max_sequence_length: usize,
) -> Result<Vec<Vec<String>>> {
    if batch_size == 0 {
        return Err(PtqError::Calibration("batch_size must be positive".to_string()));
    }

    let batches = texts
        .iter()
        .take(num_samples)
        .map(|t| t.chars().take(max_sequence_length).collect::<String>())
        .collect::<Vec<_>>()
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect();
    Ok(batches)
}

/// Run one inference step per batch, in order.
///
/// Progress is logged only when `log_progress` is set, so a multi-rank run
/// reports once.
pub fn run_forward_loop<M: Model + ?Sized>(
    model: &mut M,
    batches: &[Vec<String>],
    log_progress: bool,
) -> anyhow::Result<()> {
    for (i, batch) in batches.iter().enumerate() {
        if log_progress {
            info!(batch = i, size = batch.len(), "Calibrating batch {}", i);
        }
        model.predict_step(batch, i)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("sample {}", i)).collect()
    }

    // ==================== load_texts tests ====================

    #[test]
    fn test_load_plain_text_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calib.txt");
        fs::write(&path, "first line\n\n  second line  \n").unwrap();

        let loaded = load_texts(&path).unwrap();
        assert_eq!(loaded, vec!["first line", "second line"]);
    }

    #[test]
    fn test_load_jsonl_text_and_article_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calib.jsonl");
        fs::write(
            &path,
            "{\"text\": \"alpha\"}\n{\"article\": \"beta\", \"highlights\": \"b\"}\n",
        )
        .unwrap();

        let loaded = load_texts(&path).unwrap();
        assert_eq!(loaded, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_load_jsonl_missing_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calib.jsonl");
        fs::write(&path, "{\"summary\": \"x\"}\n").unwrap();

        let err = load_texts(&path).unwrap_err();
        assert!(err.to_string().contains("no text/article field"));
    }

    #[test]
    fn test_load_jsonl_invalid_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calib.jsonl");
        fs::write(&path, "{\"text\": \"ok\"}\nnot json\n").unwrap();

        let err = load_texts(&path).unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn test_load_empty_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calib.txt");
        fs::write(&path, "\n\n").unwrap();

        assert!(matches!(load_texts(&path), Err(PtqError::Calibration(_))));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = load_texts(Path::new("/nonexistent/calib.txt")).unwrap_err();
        assert!(matches!(err, PtqError::Io(_)));
    }

    // ==================== make_batches tests ====================

    #[test]
    fn test_make_batches_with_short_tail() {
        let batches = make_batches(&texts(10), 4, 100, 512).unwrap();
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(batches[2][1], "sample 9");
    }

    #[test]
    fn test_make_batches_limits_samples() {
        let batches = make_batches(&texts(10), 3, 5, 512).unwrap();
        let flat: Vec<&String> = batches.iter().flatten().collect();
        assert_eq!(flat.len(), 5);
        assert_eq!(flat[4], "sample 4");
    }

    #[test]
    fn test_make_batches_truncates_by_chars() {
        let input = vec!["héllo wörld".to_string()];
        let batches = make_batches(&input, 1, 1, 4).unwrap();
        assert_eq!(batches[0][0], "héll");
    }

    #[test]
    fn test_make_batches_zero_batch_size() {
        assert!(make_batches(&texts(3), 0, 3, 10).is_err());
    }

    #[test]
    fn test_make_batches_empty_input() {
        assert!(make_batches(&[], 4, 10, 10).unwrap().is_empty());
    }
}
