use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use atlas_backend::BackendConfig;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::upload::FilePolicy;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const SETTINGS_DIRECTORY_NAME: &str = "atlas";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "ATLAS_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtlasSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Appended to the built-in microscopy extension allow-list.
    #[serde(default)]
    pub extra_extensions: Vec<String>,
    /// Where execution archives are saved; the working directory when unset.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

impl Default for AtlasSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            username: String::new(),
            password: String::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            extra_extensions: Vec::new(),
            download_dir: None,
        }
    }
}

impl AtlasSettings {
    pub fn normalized(mut self) -> Self {
        self.endpoint = match self.endpoint.trim().trim_end_matches('/') {
            "" => default_endpoint(),
            endpoint => endpoint.to_string(),
        };
        self.username = self.username.trim().to_string();
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
        }

        let mut extensions: Vec<String> = self
            .extra_extensions
            .iter()
            .map(|extension| extension.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|extension| !extension.is_empty())
            .collect();
        extensions.sort();
        extensions.dedup();
        self.extra_extensions = extensions;

        self.download_dir = self
            .download_dir
            .filter(|dir| !dir.as_os_str().is_empty());
        self
    }

    pub fn to_backend_config(&self) -> BackendConfig {
        BackendConfig::new(&self.endpoint)
            .with_credentials(&self.username, &self.password)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
    }

    pub fn file_policy(&self) -> FilePolicy {
        FilePolicy::default().with_extra_extensions(&self.extra_extensions)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Live settings plus the file they persist to.
pub struct SettingsStore {
    settings: Arc<ArcSwap<AtlasSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".atlas"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Loads `config_path` layered under `ATLAS_` environment overrides.
    pub fn new(config_path: PathBuf) -> Self {
        Self::with_env_prefix(config_path, ENV_PREFIX)
    }

    pub fn with_env_prefix(config_path: PathBuf, env_prefix: &str) -> Self {
        let settings = Self::load_layered(&config_path, env_prefix);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<AtlasSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: AtlasSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_layered(path: &Path, env_prefix: &str) -> AtlasSettings {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(AtlasSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(env_prefix));

        match figment.extract::<AtlasSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                AtlasSettings::default()
            }
        }
    }

    fn persist(&self, settings: &AtlasSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
