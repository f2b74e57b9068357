//! Streaming zip extraction with path sanitization.
//!
//! Every entry's output path is computed and checked against the destination
//! root before anything is written. A single entry that escapes the root
//! aborts the whole extraction with [`ExtractError::PathTraversal`].

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::installer::progress::{ProgressSink, RateLimiter};
use crate::paths::{clean_path, ensure_parent_dirs, is_within, to_linux_path};

/// Minimum wall-clock gap between per-entry progress updates
const PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

/// Extraction errors that callers may want to match on
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Illegal file path in archive: '{entry}' resolves to {} outside {}", path.display(), root.display())]
    PathTraversal {
        entry: String,
        path: PathBuf,
        root: PathBuf,
    },

    #[error("Not a zip archive: {}", path.display())]
    NotZip { path: PathBuf },
}

/// Where archive entries land relative to the destination root
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Placement {
    /// Entries go straight under the destination root
    #[default]
    Direct,
    /// Entries go under `destination/<name>` whatever the archive layout
    Subfolder(String),
    /// The leading `<prefix>/` is removed; entries outside it are skipped
    StripPrefix(String),
}

/// An archive and where to put it
#[derive(Debug, Clone)]
pub struct ExtractionTarget {
    pub archive_path: PathBuf,
    pub destination_root: PathBuf,
    pub placement: Placement,
}

impl ExtractionTarget {
    pub fn new(archive_path: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
            destination_root: destination_root.into(),
            placement: Placement::Direct,
        }
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Root every entry must stay under
    pub fn effective_root(&self) -> PathBuf {
        let root = match &self.placement {
            Placement::Subfolder(name) => self.destination_root.join(name),
            _ => self.destination_root.clone(),
        };
        clean_path(&root)
    }

    /// Map an archive entry name to a path relative to the effective root.
    /// `None` means the entry is skipped.
    fn relative_name(&self, entry_name: &str) -> Option<String> {
        let name = to_linux_path(entry_name);
        match &self.placement {
            Placement::Direct | Placement::Subfolder(_) => Some(name),
            Placement::StripPrefix(prefix) => {
                let prefix = to_linux_path(prefix);
                let prefix = prefix.trim_matches('/');
                let rest = name.strip_prefix(prefix)?.strip_prefix('/')?;
                if rest.is_empty() {
                    None
                } else {
                    Some(rest.to_string())
                }
            }
        }
    }
}

/// Extraction statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub entries: usize,
    pub files: usize,
    pub directories: usize,
    pub skipped: usize,
    pub bytes_written: u64,
}

/// One planned entry: archive index and checked output path
struct PlannedEntry {
    index: usize,
    name: String,
    output: Option<PathBuf>,
    is_dir: bool,
}

/// Check that `path` starts with a zip signature
pub fn ensure_zip(path: &Path) -> Result<()> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open archive: {}", path.display()))?;
    let mut magic = [0u8; 4];
    let bytes_read = file
        .read(&mut magic)
        .with_context(|| format!("Failed to read archive: {}", path.display()))?;
    // PK\x03\x04 or PK\x05\x06 (empty archive)
    if bytes_read == 4 && (magic == *b"PK\x03\x04" || magic == *b"PK\x05\x06") {
        Ok(())
    } else {
        Err(ExtractError::NotZip {
            path: path.to_path_buf(),
        }
        .into())
    }
}

/// Extract the whole archive described by `target`.
///
/// Blocking; run on `spawn_blocking` from async code. The first I/O error
/// aborts the extraction.
pub fn extract_archive(target: &ExtractionTarget, sink: &ProgressSink) -> Result<ExtractStats> {
    ensure_zip(&target.archive_path)?;

    let file = File::open(&target.archive_path)
        .with_context(|| format!("Failed to open ZIP: {}", target.archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Failed to read ZIP: {}", target.archive_path.display()))?;

    let root = target.effective_root();
    if let Placement::Subfolder(name) = &target.placement {
        if !is_within(&target.destination_root, &root) {
            return Err(ExtractError::PathTraversal {
                entry: name.clone(),
                path: root,
                root: clean_path(&target.destination_root),
            }
            .into());
        }
    }
    let plan = plan_entries(&mut archive, target, &root)?;
    let total = plan.len();

    info!(
        "Extracting {} ({} entries) to {}",
        target.archive_path.display(),
        total,
        root.display()
    );
    fs::create_dir_all(&root).with_context(|| format!("Failed to create {}", root.display()))?;

    let mut stats = ExtractStats::default();
    let mut limiter = RateLimiter::new(PROGRESS_INTERVAL);

    for (processed, planned) in plan.into_iter().enumerate() {
        if limiter.ready() {
            sink.fraction((processed + 1) as f64 / total as f64);
            sink.status(format!("Extracting {}", planned.name));
        }
        stats.entries += 1;

        let Some(output) = planned.output else {
            stats.skipped += 1;
            continue;
        };

        if planned.is_dir {
            fs::create_dir_all(&output)
                .with_context(|| format!("Failed to create directory {}", output.display()))?;
            stats.directories += 1;
            continue;
        }

        let mut entry = archive
            .by_index(planned.index)
            .with_context(|| format!("Failed to read entry '{}'", planned.name))?;

        ensure_parent_dirs(&output)
            .with_context(|| format!("Failed to create parent of {}", output.display()))?;
        let out_file = File::create(&output)
            .with_context(|| format!("Failed to create {}", output.display()))?;
        let mut writer = BufWriter::new(out_file);
        let written = std::io::copy(&mut entry, &mut writer)
            .with_context(|| format!("Failed to extract '{}'", planned.name))?;
        writer
            .flush()
            .with_context(|| format!("Failed to write {}", output.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            if let Some(mode) = entry.unix_mode() {
                let perms = mode & 0o777;
                if perms != 0 {
                    fs::set_permissions(&output, fs::Permissions::from_mode(perms))
                        .with_context(|| format!("Failed to set mode on {}", output.display()))?;
                }
            }
        }

        stats.files += 1;
        stats.bytes_written += written;
    }

    sink.fraction(1.0);
    sink.status(format!("Extracted {} entries", stats.entries));
    debug!("Extraction stats: {:?}", stats);
    Ok(stats)
}

/// Compute and check every output path before anything is written
fn plan_entries<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    target: &ExtractionTarget,
    root: &Path,
) -> Result<Vec<PlannedEntry>> {
    let mut plan = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .with_context(|| format!("Failed to read entry {} of ZIP", index))?;
        let name = entry.name().to_string();
        let is_dir = entry.is_dir();

        let output = match target.relative_name(&name) {
            Some(relative) => {
                let joined = root.join(&relative);
                if !is_within(root, &joined) {
                    return Err(ExtractError::PathTraversal {
                        entry: name,
                        path: clean_path(&joined),
                        root: root.to_path_buf(),
                    }
                    .into());
                }
                Some(clean_path(&joined))
            }
            None => None,
        };

        plan.push(PlannedEntry {
            index,
            name,
            output,
            is_dir,
        });
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use walkdir::WalkDir;

    fn write_zip(path: &Path, entries: &[(&str, Option<&[u8]>)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);
        for (name, data) in entries {
            match data {
                Some(data) => {
                    zip.start_file(*name, options).unwrap();
                    zip.write_all(data).unwrap();
                }
                None => {
                    zip.add_directory(*name, options).unwrap();
                }
            }
        }
        zip.finish().unwrap();
    }

    fn files_under(dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .collect()
    }

    #[test]
    fn test_extract_direct() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("livery.zip");
        write_zip(
            &zip_path,
            &[
                ("Air China/", None),
                ("Air China/objects/", None),
                ("Air China/objects/fuselage.png", Some(b"png data")),
                ("Air China/icon11.png", Some(b"icon")),
            ],
        );

        let dest = dir.path().join("liveries");
        let stats = extract_archive(&ExtractionTarget::new(&zip_path, &dest), &ProgressSink::disabled())?;

        assert_eq!(stats.entries, 4);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 2);
        assert_eq!(fs::read(dest.join("Air China/objects/fuselage.png"))?, b"png data");
        assert_eq!(fs::read(dest.join("Air China/icon11.png"))?, b"icon");
        Ok(())
    }

    #[test]
    fn test_extract_into_subfolder() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("aircraft.zip");
        write_zip(&zip_path, &[("a330.acf", Some(b"acf")), ("plugins/", None)]);

        let dest = dir.path().join("Laminar Research");
        let target = ExtractionTarget::new(&zip_path, &dest)
            .with_placement(Placement::Subfolder("AeroGennis Airbus A330-300".into()));
        extract_archive(&target, &ProgressSink::disabled())?;

        let package = dest.join("AeroGennis Airbus A330-300");
        assert_eq!(fs::read(package.join("a330.acf"))?, b"acf");
        assert!(package.join("plugins").is_dir());
        Ok(())
    }

    #[test]
    fn test_extract_strip_prefix() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("nested.zip");
        write_zip(
            &zip_path,
            &[
                ("release/", None),
                ("release/data/a.txt", Some(b"a")),
                ("README.txt", Some(b"outside")),
            ],
        );

        let dest = dir.path().join("out");
        let target = ExtractionTarget::new(&zip_path, &dest)
            .with_placement(Placement::StripPrefix("release".into()));
        let stats = extract_archive(&target, &ProgressSink::disabled())?;

        assert_eq!(fs::read(dest.join("data/a.txt"))?, b"a");
        assert!(!dest.join("README.txt").exists());
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.files, 1);
        Ok(())
    }

    #[test]
    fn test_path_traversal_rejected_before_any_write() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("evil.zip");
        write_zip(
            &zip_path,
            &[("ok.txt", Some(b"fine")), ("../../evil.txt", Some(b"gotcha"))],
        );

        let dest = dir.path().join("x").join("y");
        let err = extract_archive(&ExtractionTarget::new(&zip_path, &dest), &ProgressSink::disabled())
            .unwrap_err();

        match err.downcast_ref::<ExtractError>() {
            Some(ExtractError::PathTraversal { entry, .. }) => assert_eq!(entry, "../../evil.txt"),
            other => panic!("expected path traversal, got {:?}", other),
        }
        assert!(!dir.path().join("evil.txt").exists());
        assert_eq!(files_under(dir.path()), vec![zip_path]);
        Ok(())
    }

    #[test]
    fn test_backslash_traversal_rejected() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("evil.zip");
        write_zip(&zip_path, &[("..\\..\\evil.txt", Some(b"gotcha"))]);

        let dest = dir.path().join("x").join("y");
        let err = extract_archive(&ExtractionTarget::new(&zip_path, &dest), &ProgressSink::disabled())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::PathTraversal { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_subfolder_outside_destination_rejected() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("package.zip");
        write_zip(&zip_path, &[("evil.txt", Some(b"gotcha"))]);

        let dest = dir.path().join("a").join("b");
        let target = ExtractionTarget::new(&zip_path, &dest)
            .with_placement(Placement::Subfolder("../../escaped".into()));
        let err = extract_archive(&target, &ProgressSink::disabled()).unwrap_err();

        match err.downcast_ref::<ExtractError>() {
            Some(ExtractError::PathTraversal { entry, .. }) => assert_eq!(entry, "../../escaped"),
            other => panic!("expected path traversal, got {:?}", other),
        }
        assert!(!dir.path().join("escaped").exists());
        assert_eq!(files_under(dir.path()), vec![zip_path]);
        Ok(())
    }

    #[test]
    fn test_unreadable_archive_is_not_reported_as_not_zip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("folder.zip");
        fs::create_dir_all(&path).unwrap();

        let err = ensure_zip(&path).unwrap_err();
        assert!(err.downcast_ref::<ExtractError>().is_none());
        assert!(format!("{:#}", err).contains("folder.zip"));
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("page.zip");
        fs::write(&path, b"<html>Service unavailable</html>").unwrap();

        let err = extract_archive(&ExtractionTarget::new(&path, dir.path()), &ProgressSink::disabled())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::NotZip { .. })
        ));
    }

    #[test]
    fn test_reextract_overwrites() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("livery.zip");
        write_zip(&zip_path, &[("L/", None), ("L/a.txt", Some(b"new"))]);

        let dest = dir.path().join("liveries");
        fs::create_dir_all(dest.join("L"))?;
        fs::write(dest.join("L/a.txt"), b"old contents that are longer")?;

        extract_archive(&ExtractionTarget::new(&zip_path, &dest), &ProgressSink::disabled())?;
        assert_eq!(fs::read(dest.join("L/a.txt"))?, b"new");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_preserves_unix_mode() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let zip_path = dir.path().join("exec.zip");
        {
            let file = File::create(&zip_path)?;
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
            zip.start_file("bin/tool", options)?;
            zip.write_all(b"#!/bin/sh\n")?;
            zip.finish()?;
        }

        let dest = dir.path().join("out");
        extract_archive(&ExtractionTarget::new(&zip_path, &dest), &ProgressSink::disabled())?;
        let mode = fs::metadata(dest.join("bin/tool"))?.permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        Ok(())
    }

    #[tokio::test]
    async fn test_progress_ends_at_one() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("l.zip");
        write_zip(&zip_path, &[("a.txt", Some(b"a")), ("b.txt", Some(b"b"))]);

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let sink = ProgressSink::new(tx);
        extract_archive(&ExtractionTarget::new(&zip_path, dir.path().join("o")), &sink)?;
        drop(sink);

        let mut last_fraction = None;
        while let Some(event) = rx.recv().await {
            if let crate::installer::progress::ProgressKind::Fraction(f) = event.kind {
                last_fraction = Some(f);
            }
        }
        assert_eq!(last_fraction, Some(1.0));
        Ok(())
    }
}
