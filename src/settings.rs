//! Persisted user settings
//!
//! Stored as three plain lines in `Ag330UpdaterConf.txt` next to the
//! executable: X-Plane root, language tag, manual package override. A missing
//! file or missing line just means the field is unset.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of the settings file
pub const SETTINGS_FILE_NAME: &str = "Ag330UpdaterConf.txt";

/// User settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// X-Plane installation root
    pub root_path: Option<PathBuf>,

    /// UI language tag (e.g. "en-US", "zh-CN")
    pub language: Option<String>,

    /// Manual override for the package directory
    pub override_path: Option<PathBuf>,
}

impl Settings {
    /// Parse the three-line format; extra lines are ignored
    pub fn parse(text: &str) -> Self {
        let mut lines = text.split('\n').map(str::trim);
        let mut field = || lines.next().filter(|l| !l.is_empty()).map(str::to_string);
        let root_path = field().map(PathBuf::from);
        let language = field();
        let override_path = field().map(PathBuf::from);
        Self {
            root_path,
            language,
            override_path,
        }
    }

    /// Render the three-line format
    pub fn render(&self) -> String {
        fn path_line(path: &Option<PathBuf>) -> String {
            path.as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
        }
        format!(
            "{}\n{}\n{}",
            path_line(&self.root_path),
            self.language.as_deref().unwrap_or_default(),
            path_line(&self.override_path)
        )
    }
}

/// Reads and writes [`Settings`] at a fixed location
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store next to the running executable, or in the user config dir
    pub fn beside_executable() -> Result<Self> {
        Ok(Self::new(app_dir()?.join(SETTINGS_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, or return defaults if they cannot be read
    pub fn load(&self) -> Settings {
        match self.try_load() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Could not load settings: {:#}. Using defaults.", e);
                Settings::default()
            }
        }
    }

    /// Try to load settings; a missing file is not an error
    pub fn try_load(&self) -> Result<Settings> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Settings::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    /// Save settings to disk
    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&self.path, settings.render())
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

/// Directory holding the settings and catalog files.
///
/// Next to the executable; falls back to `~/.config/ag330` when the
/// executable path cannot be determined.
pub fn app_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        return Ok(dir);
    }
    Ok(dirs::config_dir()
        .context("Could not determine config directory")?
        .join("ag330"))
}
