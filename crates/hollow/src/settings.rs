//! Optional `settings.toml` defaults, overridden by command-line flags.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Problems with the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but cannot be read.
    #[error("cannot read settings: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for this schema.
    #[error("malformed settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Recognized settings; everything is optional.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Server host for client mode.
    pub host: Option<String>,
    /// UDP game port.
    pub port: Option<u16>,
    /// TCP command console port.
    pub cmd_port: Option<u16>,
    /// Save directory.
    pub save_path: Option<String>,
    /// Asset directory.
    pub asset_path: Option<String>,
    /// World to load or create.
    pub world_name: Option<String>,
    /// Player name to log in under.
    pub player_name: Option<String>,
}

impl Settings {
    /// Loads settings; a missing file yields the defaults, a present but
    /// malformed one is an error the caller treats as exit code 1.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let settings =
            Settings::load(Path::new("/definitely/not/here/settings.toml")).expect("defaults");
        assert!(settings.host.is_none());
        assert!(settings.port.is_none());
    }

    #[test]
    fn test_parses_fields() {
        let dir = std::env::temp_dir().join(format!("hollow-settings-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");
        std::fs::write(&path, "host = \"play.example\"\nport = 4000\n").unwrap();
        let settings = Settings::load(&path).expect("parse");
        assert_eq!(settings.host.as_deref(), Some("play.example"));
        assert_eq!(settings.port, Some(4000));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let dir = std::env::temp_dir().join(format!("hollow-settings-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");
        std::fs::write(&path, "no_such_key = 1\n").unwrap();
        assert!(Settings::load(&path).is_err());
    }
}
