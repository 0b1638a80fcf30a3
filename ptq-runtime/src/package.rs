//! Export workspace and `.qnemo` archive packaging.
//!
//! The exporter writes into a temporary directory shared by all ranks. Once
//! every rank is done, the coordinator packs that directory into a gzip tar
//! whose root is the directory itself. The archive is staged next to its
//! destination and renamed into place, so a failed run never leaves a
//! truncated archive behind.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

use crate::dist::ProcessGroup;
use crate::error::{PtqError, Result};

/// Prefix of export workspace directories.
const WORKSPACE_PREFIX: &str = "ptq-export-";

/// Temporary export directory shared by every rank.
///
/// The coordinator creates the directory and owns it; other ranks only hold
/// its path. The directory is removed when the coordinator's handle drops.
#[derive(Debug)]
pub struct ExportWorkspace {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl ExportWorkspace {
    /// Create the workspace on the coordinator and broadcast its path.
    ///
    /// Collective: every rank of `group` must call this. The coordinator
    /// broadcasts even when it fails to create the directory, so the other
    /// ranks return an error instead of waiting on it.
    pub fn create(group: &dyn ProcessGroup, parent: Option<&Path>) -> Result<Self> {
        let created = group.is_coordinator().then(|| create_workspace_dir(parent));
        let announced = created.as_ref().map(|dir| match dir {
            Ok(dir) => dir.path().to_string_lossy().into_owned(),
            Err(_) => String::new(),
        });

        let shared = group.broadcast(announced)?;
        let dir = created.transpose()?;
        if shared.is_empty() {
            return Err(archive_error(
                parent.unwrap_or(Path::new(WORKSPACE_PREFIX)),
                "coordinator failed to create the export workspace",
            ));
        }
        debug!(rank = group.rank(), path = %shared, "export workspace ready");

        Ok(Self {
            path: PathBuf::from(shared),
            dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn create_workspace_dir(parent: Option<&Path>) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(WORKSPACE_PREFIX);
    let dir = match parent {
        Some(parent) => {
            fs::create_dir_all(parent)?;
            builder.tempdir_in(parent)?
        }
        None => builder.tempdir()?,
    };
    Ok(dir)
}

/// Result of packaging a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    /// Regular files stored in the archive
    pub files: usize,
    pub bytes_written: u64,
}

/// A regular file stored in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub size: u64,
}

fn archive_error(path: &Path, err: impl std::fmt::Display) -> PtqError {
    PtqError::Archive {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

/// Pack `src_dir` into a gzip tar at `destination`, rooted at `./`.
pub fn write_archive(src_dir: &Path, destination: &Path) -> Result<ArchiveSummary> {
    if !src_dir.is_dir() {
        return Err(archive_error(src_dir, "source is not a directory"));
    }
    if destination.is_dir() {
        return Err(archive_error(destination, "destination is a directory"));
    }
    ensure_outside(src_dir, destination)?;

    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let staging = tempfile::Builder::new()
        .prefix(".ptq-archive-")
        .tempfile_in(parent)?;

    {
        let encoder = GzEncoder::new(BufWriter::new(staging.as_file()), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_dir_all(".", src_dir)
            .map_err(|e| archive_error(src_dir, e))?;
        let mut writer = builder
            .into_inner()
            .map_err(|e| archive_error(destination, e))?
            .finish()
            .map_err(|e| archive_error(destination, e))?;
        writer.flush()?;
    }

    staging
        .persist(destination)
        .map_err(|e| archive_error(destination, e.error))?;

    let summary = ArchiveSummary {
        path: destination.to_path_buf(),
        files: count_files(src_dir)?,
        bytes_written: fs::metadata(destination)?.len(),
    };
    debug!(
        archive = %summary.path.display(),
        files = summary.files,
        bytes = summary.bytes_written,
        "archive written"
    );
    Ok(summary)
}

/// Fail if `destination` lies inside `src_dir`, where packing would pick up the archive itself.
pub fn ensure_outside(src_dir: &Path, destination: &Path) -> Result<()> {
    let src = src_dir.canonicalize().map_err(|e| archive_error(src_dir, e))?;

    // Resolve through the deepest ancestor that exists; the rest is created later.
    let mut existing = destination;
    while !existing.exists() {
        match existing.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => existing = parent,
            _ => {
                existing = Path::new(".");
                break;
            }
        }
    }
    let resolved = existing
        .canonicalize()
        .map_err(|e| archive_error(destination, e))?;

    if resolved.starts_with(&src) {
        return Err(archive_error(
            destination,
            format!("destination is inside the source directory {}", src_dir.display()),
        ));
    }
    Ok(())
}

fn count_files(dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            count += count_files(&entry.path())?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}

/// Copy files into `dir`, keeping their file names. Returns the number copied.
///
/// A file already present in `dir` under the same name is never replaced.
pub fn copy_artifacts(files: &[PathBuf], dir: &Path) -> Result<usize> {
    for file in files {
        let name = file
            .file_name()
            .ok_or_else(|| archive_error(file, "artifact path has no file name"))?;
        if dir.join(name).exists() {
            return Err(archive_error(
                file,
                format!("{} already exists in the export directory", name.to_string_lossy()),
            ));
        }
        fs::copy(file, dir.join(name)).map_err(|e| archive_error(file, e))?;
    }
    Ok(files.len())
}

fn open_archive(path: &Path) -> Result<tar::Archive<GzDecoder<BufReader<File>>>> {
    let file = File::open(path)?;
    Ok(tar::Archive::new(GzDecoder::new(BufReader::new(file))))
}

/// Strip a leading `./` so entry names compare equal regardless of how they were packed.
fn normalize_entry_path(path: &Path) -> PathBuf {
    path.strip_prefix(".").unwrap_or(path).to_path_buf()
}

/// List the regular files of a packaged archive.
pub fn list_archive(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut archive = open_archive(path)?;
    let mut entries = Vec::new();

    for entry in archive.entries().map_err(|e| archive_error(path, e))? {
        let entry = entry.map_err(|e| archive_error(path, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        entries.push(ArchiveEntry {
            path: normalize_entry_path(&entry.path()?),
            size: entry.header().size()?,
        });
    }
    Ok(entries)
}

/// Read every regular file whose archive path satisfies `wanted`.
pub fn read_archive_files<F>(path: &Path, wanted: F) -> Result<Vec<(PathBuf, Vec<u8>)>>
where
    F: Fn(&Path) -> bool,
{
    let mut archive = open_archive(path)?;
    let mut files = Vec::new();

    for entry in archive.entries().map_err(|e| archive_error(path, e))? {
        let mut entry = entry.map_err(|e| archive_error(path, e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = normalize_entry_path(&entry.path()?);
        if !wanted(&entry_path) {
            continue;
        }
        let mut data = Vec::with_capacity(entry.header().size()? as usize);
        entry.read_to_end(&mut data)?;
        files.push((entry_path, data));
    }
    Ok(files)
}
