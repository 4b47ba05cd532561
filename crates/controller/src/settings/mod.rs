mod state;

pub use state::{
    AtlasSettings, DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT_SECS, ENV_PREFIX, SETTINGS_FILE_NAME,
    SettingsError, SettingsStore,
};
