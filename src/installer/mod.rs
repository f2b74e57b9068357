//! Installation orchestrator
//!
//! Every user-facing action runs through [`Installer`], which owns the
//! configuration and the HTTP client:
//! 1. Status   : validate the X-Plane root, probe the package
//! 2. Package  : download, extract into `Aircraft/Laminar Research`, re-probe
//! 3. Liveries : batch install from the catalog, list, uninstall
//! 4. Upkeep   : refresh the catalog, fetch the updater, remove the package

pub mod batch;
pub mod config;
pub mod probe;
pub mod progress;

pub use batch::{run_batch, BatchJob, BatchOptions, BatchReport, JobFailure};
pub use config::{ConfigError, InstallerConfig};
pub use probe::{InstallationProbe, ProbeResult};
pub use progress::{ProgressEvent, ProgressKind, ProgressObserver, ProgressSink};

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::archive::{extract_archive, ExtractionTarget, Placement};
use crate::catalog::LiveryCatalog;
use crate::downloaders::{download_file, DownloadResult, HttpClient};
use crate::paths::{is_single_component, Validation};
use config::{LIVERIES_DIR, PACKAGE_FOLDER_NAME, UPDATER_FILE_NAME};

/// Installer errors that callers branch on
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("The aircraft package is not installed")]
    PackageNotInstalled,

    #[error("Invalid livery name '{0}'")]
    InvalidLiveryName(String),
}

/// Root validation plus package probe
#[derive(Debug, Clone, Serialize)]
pub struct InstallStatus {
    pub root_path: Option<PathBuf>,
    /// `None` when no root is configured
    pub root: Option<Validation>,
    pub package: ProbeResult,
}

impl InstallStatus {
    pub fn root_ok(&self) -> bool {
        self.root.as_ref().is_some_and(|v| v.ok)
    }
}

/// Outcome of removing liveries
#[derive(Debug, Clone, Default, Serialize)]
pub struct UninstallReport {
    pub removed: Vec<String>,
    pub failed: Vec<JobFailure>,
}

/// Main installer orchestrator
pub struct Installer {
    config: InstallerConfig,
    client: HttpClient,
    probe: InstallationProbe,
}

impl Installer {
    /// Create a new installer with the given configuration
    pub fn new(config: InstallerConfig) -> Result<Self> {
        config.validate()?;
        let client = HttpClient::new(config.policy.clone())?;
        let probe = InstallationProbe::new(&config.package_marker, config.installed_threshold);
        Ok(Self {
            config,
            client,
            probe,
        })
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// Give the config back, e.g. to persist an updated override path
    pub fn into_config(self) -> InstallerConfig {
        self.config
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Validate the root and probe the package
    pub fn status(&self) -> Result<InstallStatus> {
        let root = self.config.root_path.as_deref();
        let validation = root.map(|r| self.config.validator.validate(r));
        let package = self.probe()?;
        Ok(InstallStatus {
            root_path: root.map(Path::to_path_buf),
            root: validation,
            package,
        })
    }

    fn probe(&self) -> Result<ProbeResult> {
        self.probe.probe(
            self.config.override_path.as_deref(),
            self.config.root_path.as_deref(),
        )
    }

    /// The configured root, after it passes validation
    fn valid_root(&self) -> Result<&Path> {
        let root = self
            .config
            .root_path
            .as_deref()
            .ok_or(ConfigError::RootNotSet)?;
        self.config.validator.require(root)?;
        Ok(root)
    }

    /// Package directory of an installed package
    fn package_dir(&self) -> Result<PathBuf> {
        let probe = self.probe()?;
        probe
            .package_dir()
            .map(Path::to_path_buf)
            .ok_or_else(|| InstallError::PackageNotInstalled.into())
    }

    fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            concurrency: self.config.concurrency,
            temp_dir: self.config.temp_dir.clone(),
        }
    }

    /// Download and extract the aircraft package, then probe again.
    ///
    /// The package lands in `<root>/Aircraft/Laminar Research/<package>`,
    /// which the name scan does not reach, so that directory becomes the
    /// override path.
    pub async fn install_package(&mut self, sink: &ProgressSink) -> Result<ProbeResult> {
        let started = Instant::now();
        self.valid_root()?;
        let parent = self.config.package_parent()?;

        let temp_dir = batch::make_temp_dir(self.config.temp_dir.as_deref())?;
        let archive_path = temp_dir.path().join("package.zip");

        info!("Downloading aircraft package");
        sink.status("Downloading aircraft package");
        download_file(&self.client, &self.config.package_url, &archive_path, false, sink)
            .await
            .context("Failed to download the aircraft package")?;

        info!("Extracting aircraft package to {}", parent.display());
        sink.status("Extracting aircraft package");
        let target = ExtractionTarget::new(&archive_path, &parent)
            .with_placement(Placement::Subfolder(PACKAGE_FOLDER_NAME.to_string()));
        let package_dir = target.effective_root();
        let extract_sink = sink.clone();
        let stats = tokio::task::spawn_blocking(move || extract_archive(&target, &extract_sink))
            .await
            .context("Extraction task failed")?
            .context("Failed to extract the aircraft package")?;
        drop(temp_dir);

        self.config.override_path = Some(package_dir);
        let result = self.probe()?;
        info!(
            "Package install done: files={} bytes={} installed={} elapsed_ms={}",
            stats.files,
            stats.bytes_written,
            result.installed,
            started.elapsed().as_millis()
        );
        if !result.installed {
            warn!(
                "Package extracted but only {} bytes on disk (threshold {})",
                result.size_on_disk,
                self.probe.threshold()
            );
        }
        sink.status("Aircraft package installed");
        Ok(result)
    }

    /// Install the named liveries from `catalog` into the package.
    ///
    /// Names not in the catalog are reported as failures without stopping
    /// the rest of the batch.
    pub async fn install_liveries<O: ProgressObserver>(
        &self,
        names: &[String],
        catalog: &LiveryCatalog,
        observer: O,
    ) -> Result<(BatchReport, O)> {
        let destination = self.package_dir()?.join(LIVERIES_DIR);
        fs::create_dir_all(&destination)
            .with_context(|| format!("Failed to create {}", destination.display()))?;

        let mut jobs = Vec::new();
        let mut rejected = Vec::new();
        let mut unknown = HashSet::new();
        for name in names {
            match catalog.find(name) {
                Some(livery) => jobs.push(BatchJob {
                    id: livery.name.clone(),
                    url: livery.url.clone(),
                    destination: destination.clone(),
                    placement: Placement::Direct,
                }),
                None => {
                    if unknown.insert(name.as_str()) {
                        warn!("Livery '{}' is not in the catalog", name);
                        rejected.push(JobFailure {
                            id: name.clone(),
                            error: "Not found in the livery catalog".to_string(),
                        });
                    }
                }
            }
        }

        batch::run_batch_with_rejected(&self.client, jobs, rejected, self.batch_options(), observer)
            .await
    }

    /// Directory names under `<package>/liveries`, sorted
    pub fn installed_liveries(&self) -> Result<Vec<String>> {
        let dir = self.package_dir()?.join(LIVERIES_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", dir.display())),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Like [`Installer::installed_liveries`], but an absent package
    /// yields an empty list
    pub fn installed_liveries_if_present(&self) -> Result<Vec<String>> {
        match self.installed_liveries() {
            Err(e)
                if matches!(
                    e.downcast_ref::<InstallError>(),
                    Some(InstallError::PackageNotInstalled)
                ) =>
            {
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Remove the named livery directories
    pub fn uninstall_liveries(&self, names: &[String]) -> Result<UninstallReport> {
        let dir = self.package_dir()?.join(LIVERIES_DIR);
        let mut report = UninstallReport::default();

        for name in names {
            let outcome = if is_single_component(name) {
                let path = dir.join(name);
                fs::remove_dir_all(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))
            } else {
                Err(InstallError::InvalidLiveryName(name.clone()).into())
            };
            match outcome {
                Ok(()) => {
                    info!("Removed livery '{}'", name);
                    report.removed.push(name.clone());
                }
                Err(e) => {
                    warn!("Could not remove livery '{}': {:#}", name, e);
                    report.failed.push(JobFailure {
                        id: name.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Remove the package directory and clear the override path.
    ///
    /// Only an installed package is removed; a candidate below the size
    /// threshold is left alone.
    pub fn uninstall_package(&mut self) -> Result<PathBuf> {
        let dir = self.package_dir()?;
        fs::remove_dir_all(&dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
        info!("Removed aircraft package at {}", dir.display());
        self.config.override_path = None;
        Ok(dir)
    }

    /// Download a fresh catalog and replace the local one once it parses
    pub async fn update_catalog(&self, sink: &ProgressSink) -> Result<LiveryCatalog> {
        let catalog_path = self.config.catalog_path();
        let parent = match catalog_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        let temp = tempfile::Builder::new()
            .prefix(".LiveriesList")
            .suffix(".part")
            .tempfile_in(&parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?
            .into_temp_path();

        sink.status("Downloading livery catalog");
        download_file(&self.client, &self.config.catalog_url, &temp, false, sink)
            .await
            .context("Failed to download the livery catalog")?;

        let text = fs::read_to_string(&temp)
            .with_context(|| format!("Failed to read {}", temp.display()))?;
        let catalog = LiveryCatalog::parse(&text).context("Downloaded catalog is invalid")?;

        temp.persist(catalog_path)
            .with_context(|| format!("Failed to replace {}", catalog_path.display()))?;
        info!("Livery catalog updated: {} entries", catalog.len());
        Ok(catalog)
    }

    /// Download the updater executable into `dir`
    pub async fn fetch_updater(&self, dir: &Path, sink: &ProgressSink) -> Result<DownloadResult> {
        let path = dir.join(UPDATER_FILE_NAME);
        sink.status("Downloading updater");
        let result = download_file(&self.client, &self.config.updater_url, &path, false, sink)
            .await
            .context("Failed to download the updater")?;
        info!("Updater saved to {}", path.display());
        Ok(result)
    }
}
