pub mod encrypted_file;
pub mod keyring_store;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

pub const CREDENTIALS_SECRET: &str = "credentials";
pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";
pub const IMAP_SERVER_ADDRESS_KEY: &str = "imap-server-address";
pub const SMTP_SERVER_ADDRESS_KEY: &str = "smtp-server-address";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("secret {secret:?} has no field {field:?}")]
    NotFound { secret: String, field: String },

    #[error("secret store: {0}")]
    Backend(String),

    #[error("invalid credentials: {0}")]
    Invalid(String),
}

/// Storage for named secrets made of string fields.
pub trait SecretStore: Send + Sync {
    fn put(&self, secret: &str, fields: &BTreeMap<String, String>) -> Result<(), CredentialError>;

    fn get(&self, secret: &str, field: &str) -> Result<String, CredentialError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SecretBackend {
    #[default]
    Keyring,
    EncryptedFile,
}

/// Opens the backend; `state_dir` only matters for the encrypted file.
pub fn open_store(backend: SecretBackend, state_dir: &Path) -> Box<dyn SecretStore> {
    match backend {
        SecretBackend::Keyring => Box::new(keyring_store::KeyringStore::new(keyring_store::SERVICE_NAME)),
        SecretBackend::EncryptedFile => Box::new(encrypted_file::EncryptedFileStore::new(state_dir)),
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub imap_server_address: String,
    pub smtp_server_address: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("imap_server_address", &self.imap_server_address)
            .field("smtp_server_address", &self.smtp_server_address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Username and password come from the store; configured addresses win
    /// over the ones saved at login.
    pub fn load(
        store: &dyn SecretStore,
        imap_server_address: Option<&str>,
        smtp_server_address: Option<&str>,
    ) -> Result<Self, CredentialError> {
        let imap_server_address = match imap_server_address {
            Some(address) => address.to_string(),
            None => store.get(CREDENTIALS_SECRET, IMAP_SERVER_ADDRESS_KEY)?,
        };
        let smtp_server_address = match smtp_server_address {
            Some(address) => address.to_string(),
            None => store.get(CREDENTIALS_SECRET, SMTP_SERVER_ADDRESS_KEY)?,
        };

        Ok(Credentials {
            imap_server_address,
            smtp_server_address,
            username: store.get(CREDENTIALS_SECRET, USERNAME_KEY)?,
            password: store.get(CREDENTIALS_SECRET, PASSWORD_KEY)?,
        })
    }
}

/// What `login` collects. Addresses are optional because they can also live
/// in the configuration file.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Login {
    pub username: String,
    pub password: String,
    pub imap_server_address: Option<String>,
    pub smtp_server_address: Option<String>,
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("imap_server_address", &self.imap_server_address)
            .field("smtp_server_address", &self.smtp_server_address)
            .finish()
    }
}

impl Login {
    pub fn store(&self, store: &dyn SecretStore) -> Result<(), CredentialError> {
        if self.username.is_empty() {
            return Err(CredentialError::Invalid("username is empty".to_string()));
        }
        if self.password.is_empty() {
            return Err(CredentialError::Invalid("password is empty".to_string()));
        }

        let mut fields = BTreeMap::new();
        fields.insert(USERNAME_KEY.to_string(), self.username.clone());
        fields.insert(PASSWORD_KEY.to_string(), self.password.clone());
        if let Some(address) = &self.imap_server_address {
            fields.insert(IMAP_SERVER_ADDRESS_KEY.to_string(), address.clone());
        }
        if let Some(address) = &self.smtp_server_address {
            fields.insert(SMTP_SERVER_ADDRESS_KEY.to_string(), address.clone());
        }

        store.put(CREDENTIALS_SECRET, &fields)
    }
}

/// Checks that username and password can be read back.
pub fn validate(store: &dyn SecretStore) -> Result<(), CredentialError> {
    store.get(CREDENTIALS_SECRET, USERNAME_KEY)?;
    store.get(CREDENTIALS_SECRET, PASSWORD_KEY)?;
    Ok(())
}
