use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::book::{BookOptions, DEFAULT_PREFETCH_RADIUS};
use crate::images::{ResizeFilter, Viewport};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "comicrat";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse settings {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("failed to write settings {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Pages on each side of the current one kept decoded and sized
    #[serde(default = "default_prefetch_radius")]
    pub prefetch_radius: usize,

    /// Background workers; 0 means one per CPU
    #[serde(default)]
    pub worker_threads: usize,

    #[serde(default)]
    pub resize_filter: ResizeFilter,

    #[serde(default)]
    pub initial_width: u32,

    #[serde(default)]
    pub initial_height: u32,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_prefetch_radius() -> usize {
    DEFAULT_PREFETCH_RADIUS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            prefetch_radius: default_prefetch_radius(),
            worker_threads: 0,
            resize_filter: ResizeFilter::default(),
            initial_width: 0,
            initial_height: 0,
        }
    }
}

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

impl Settings {
    /// Load from the default location, writing a default file when none exists.
    /// Problems are logged and fall back to defaults.
    pub fn load() -> Self {
        let Some(path) = preferred_config_path() else {
            warn!("Could not determine config directory, using default settings");
            return Self::default();
        };

        if !path.exists() {
            info!("Settings file not found, creating with defaults at {path:?}");
            let settings = Self::default();
            if let Err(e) = settings.save_to(&path) {
                error!("{e}");
            }
            return settings;
        }

        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                error!("{e}");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings =
            serde_yaml::from_str::<Settings>(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Loaded settings from {path:?}");

        if settings.version < CURRENT_VERSION {
            migrate_settings(&mut settings);
            if let Err(e) = settings.save_to(path) {
                warn!("{e}");
            }
        }

        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        fs::write(path, generate_settings_yaml(self)).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    pub fn book_options(&self) -> BookOptions {
        BookOptions::default()
            .with_radius(self.prefetch_radius)
            .with_workers(self.worker_threads)
            .with_filter(self.resize_filter)
            .with_viewport(Viewport::new(self.initial_width, self.initial_height))
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(SETTINGS_HEADER);
    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str("\n# Pages on each side of the current page kept decoded and sized.\n");
    content.push_str(&format!("prefetch_radius: {}\n", settings.prefetch_radius));
    content.push_str("\n# Background decode workers. 0 uses one per CPU.\n");
    content.push_str(&format!("worker_threads: {}\n", settings.worker_threads));
    content.push_str("\n# One of: nearest, bilinear, catmull_rom, lanczos3\n");
    content.push_str(&format!(
        "resize_filter: {}\n",
        settings.resize_filter.as_str()
    ));
    content.push_str("\n# Viewport used before the first resize. 0 keeps decoded size.\n");
    content.push_str(&format!("initial_width: {}\n", settings.initial_width));
    content.push_str(&format!("initial_height: {}\n", settings.initial_height));

    content
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# comicrat settings
# ============================================================================
"#;
