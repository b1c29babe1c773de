use serde::Deserialize;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credentials::SecretBackend;
use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = ".fsmail.yaml";

// Every key is optional; command-line flags take precedence. camelCase
// spellings are accepted too.
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub directory: Option<PathBuf>,
    #[serde(alias = "logLevel")]
    pub log_level: Option<String>,
    #[serde(alias = "imapServerAddress")]
    pub imap_server_address: Option<String>,
    #[serde(alias = "smtpServerAddress")]
    pub smtp_server_address: Option<String>,
    #[serde(alias = "secretBackend")]
    pub secret_backend: Option<SecretBackend>,
    #[serde(rename = "send_interval_ms", alias = "sendIntervalMs")]
    pub send_interval_millis: Option<u64>,
}

impl Config {
    pub fn send_interval(&self) -> Option<Duration> {
        self.send_interval_millis.map(Duration::from_millis)
    }
}

/// Reads `explicit` if given (it must exist); otherwise the first
/// `.fsmail.yaml` found in `working_dir` or the home directory. No file at
/// all means defaults.
pub fn load_settings(explicit: Option<&Path>, working_dir: &Path) -> Result<Config> {
    if let Some(path) = explicit {
        return read_config(path);
    }

    let candidates = std::iter::once(working_dir.join(CONFIG_FILE_NAME))
        .chain(home_dir().map(|home| home.join(CONFIG_FILE_NAME)));

    for path in candidates {
        if path.is_file() {
            return read_config(&path);
        }
    }

    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config> {
    let file = File::open(path).map_err(|e| Error::filesystem("opening", path, e))?;
    let reader = BufReader::new(file);

    serde_yaml::from_reader(reader).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}
