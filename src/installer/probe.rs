//! Installed-state detection for the aircraft package
//!
//! Nothing here is cached: every call looks at the filesystem again. The
//! size threshold stands in for a real manifest check and is an
//! approximation, not a correctness guarantee.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Directory under the X-Plane root that holds aircraft
pub const AIRCRAFT_DIR: &str = "Aircraft";

/// Case-insensitive marker in the package folder name
pub const PACKAGE_MARKER: &str = "aerogennis";

/// A fully extracted package is larger than this many bytes
pub const INSTALLED_SIZE_THRESHOLD: u64 = 1_395_864_371;

/// Outcome of a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub installed: bool,
    /// Candidate directory, whether or not it passed the size check
    pub resolved_path: Option<PathBuf>,
    pub size_on_disk: u64,
}

impl ProbeResult {
    fn not_found() -> Self {
        Self {
            installed: false,
            resolved_path: None,
            size_on_disk: 0,
        }
    }

    /// Package directory, only when installed
    pub fn package_dir(&self) -> Option<&Path> {
        if self.installed {
            self.resolved_path.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallationProbe {
    marker: String,
    threshold: u64,
}

impl Default for InstallationProbe {
    fn default() -> Self {
        Self::new(PACKAGE_MARKER, INSTALLED_SIZE_THRESHOLD)
    }
}

impl InstallationProbe {
    pub fn new(marker: impl Into<String>, threshold: u64) -> Self {
        Self {
            marker: marker.into().to_lowercase(),
            threshold,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Locate the package and decide whether it is installed.
    ///
    /// The override path wins when it is an existing directory; otherwise
    /// `root/Aircraft` is scanned by name. Walk errors are returned, not
    /// folded into "not installed".
    pub fn probe(&self, override_path: Option<&Path>, root: Option<&Path>) -> Result<ProbeResult> {
        let Some(candidate) = self.find_candidate(override_path, root) else {
            return Ok(ProbeResult::not_found());
        };

        let size = dir_size(&candidate)?;
        let installed = size > self.threshold;
        debug!(
            "Probe: candidate={} size={} threshold={} installed={}",
            candidate.display(),
            size,
            self.threshold,
            installed
        );

        Ok(ProbeResult {
            installed,
            resolved_path: Some(candidate),
            size_on_disk: size,
        })
    }

    fn find_candidate(&self, override_path: Option<&Path>, root: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = override_path {
            if path.is_dir() {
                return Some(path.to_path_buf());
            }
            debug!("Override path {} is not a directory, scanning", path.display());
        }
        self.scan(root?)
    }

    /// First directory in `root/Aircraft` whose name contains the marker
    fn scan(&self, root: &Path) -> Option<PathBuf> {
        let aircraft = root.join(AIRCRAFT_DIR);
        let entries = match std::fs::read_dir(&aircraft) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Could not read {}: {}", aircraft.display(), e);
                return None;
            }
        };

        entries.filter_map(|e| e.ok()).find_map(|entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().to_lowercase();
            (is_dir && name.contains(&self.marker)).then(|| entry.path())
        })
    }
}

/// Sum of the sizes of every regular file under `path`
pub fn dir_size(path: &Path) -> Result<u64> {
    let mut size = 0u64;
    for entry in WalkDir::new(path) {
        let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
        if entry.file_type().is_file() {
            let meta = entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
            size += meta.len();
        }
    }
    Ok(size)
}
