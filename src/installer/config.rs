//! Installation configuration
//!
//! Defines the context every installer action runs against. Built from the
//! persisted [`Settings`](crate::settings::Settings) plus command-line flags;
//! nothing is read from globals.

use std::path::{Path, PathBuf};

use super::batch::DEFAULT_CONCURRENCY;
use super::probe::{INSTALLED_SIZE_THRESHOLD, PACKAGE_MARKER};
use crate::downloaders::DownloadPolicy;
use crate::paths::RootValidator;
use crate::settings::Settings;

/// Aircraft package archive
pub const PACKAGE_URL: &str = "https://files.zohopublic.com.cn/public/workdrive-public/download/dqd1m03114168cdbd47608183f4445c9b557c?x-cli-msg=%7B%22linkId%22%3A%221GNlXvxrBKN-36kFa%22%2C%22isFileOwner%22%3Afalse%2C%22version%22%3A%221.0%22%2C%22isWDSupport%22%3Afalse%7D";

/// Updater executable
pub const UPDATER_URL: &str = "https://files.zohopublic.com.cn/public/workdrive-public/download/dqd1ma5b2ddd90a0647ed918d5ec5fe42de34?x-cli-msg=%7B%22linkId%22%3A%221GNlXvxrBKN-36kFa%22%2C%22isFileOwner%22%3Afalse%2C%22version%22%3A%221.0%22%2C%22isWDSupport%22%3Afalse%7D";

/// Livery catalog
pub const CATALOG_URL: &str = "https://files.zohopublic.com.cn/public/workdrive-public/download/kpgnr1efdca4ab9ed48a280b91151e177fa0c?x-cli-msg=%7B%22linkId%22%3A%221GNlXvxrDQf-36kFa%22%2C%22isFileOwner%22%3Afalse%2C%22version%22%3A%221.0%22%2C%22isWDSupport%22%3Afalse%7D";

/// Folder the package is placed in, whatever the archive layout
pub const PACKAGE_FOLDER_NAME: &str = "AeroGennis Airbus A330-300";

/// Parent of the package folder, relative to the X-Plane root
pub const PACKAGE_PARENT: &[&str] = &["Aircraft", "Laminar Research"];

/// Livery folder inside the package
pub const LIVERIES_DIR: &str = "liveries";

/// File name for a downloaded updater executable
pub const UPDATER_FILE_NAME: &str = "AeroGennis_Updater_New.exe";

/// Configuration for installer actions
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// X-Plane installation root
    pub root_path: Option<PathBuf>,

    /// Manual package directory, wins over the name scan when it exists
    pub override_path: Option<PathBuf>,

    /// Aircraft package archive
    pub package_url: String,

    /// Updater executable
    pub updater_url: String,

    /// Livery catalog
    pub catalog_url: String,

    /// Local catalog file
    pub catalog_path: PathBuf,

    /// Hosts downloads may target
    pub policy: DownloadPolicy,

    /// Concurrent livery workers
    pub concurrency: usize,

    /// Base for temp dirs; system temp when `None`
    pub temp_dir: Option<PathBuf>,

    /// Name marker used to find the package under `Aircraft`
    pub package_marker: String,

    /// Size a package must exceed to count as installed
    pub installed_threshold: u64,

    /// Entries a valid X-Plane root must carry
    pub validator: RootValidator,
}

impl InstallerConfig {
    /// Defaults for everything, catalog stored at `catalog_path`
    pub fn new(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: None,
            override_path: None,
            package_url: PACKAGE_URL.to_string(),
            updater_url: UPDATER_URL.to_string(),
            catalog_url: CATALOG_URL.to_string(),
            catalog_path: catalog_path.into(),
            policy: DownloadPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            temp_dir: None,
            package_marker: PACKAGE_MARKER.to_string(),
            installed_threshold: INSTALLED_SIZE_THRESHOLD,
            validator: RootValidator::default(),
        }
    }

    /// Defaults with root and override taken from saved settings
    pub fn from_settings(settings: &Settings, catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: settings.root_path.clone(),
            override_path: settings.override_path.clone(),
            ..Self::new(catalog_path)
        }
    }

    /// Directory the package is extracted into (the subfolder's parent)
    pub fn package_parent(&self) -> Result<PathBuf, ConfigError> {
        let root = self.root_path.as_deref().ok_or(ConfigError::RootNotSet)?;
        Ok(PACKAGE_PARENT.iter().fold(root.to_path_buf(), |p, c| p.join(c)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if let Some(root) = &self.root_path {
            if !root.is_absolute() {
                return Err(ConfigError::RelativeRoot(root.clone()));
            }
        }
        for url in [&self.package_url, &self.updater_url, &self.catalog_url] {
            if let Err(e) = self.policy.check(url) {
                return Err(ConfigError::UntrustedUrl(e.to_string()));
            }
        }
        Ok(())
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("X-Plane directory is not set")]
    RootNotSet,

    #[error("X-Plane directory must be an absolute path: {}", .0.display())]
    RelativeRoot(PathBuf),

    #[error("Concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("Configured URL is not trusted: {0}")]
    UntrustedUrl(String),
}
