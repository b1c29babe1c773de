use std::collections::BTreeMap;

use keyring::Entry;

use super::{CredentialError, SecretStore};

pub const SERVICE_NAME: &str = "fsmail";

/// Platform credential manager (Keychain, Credential Manager, kernel keyring).
/// Each field is one entry named `<secret>/<field>`.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, secret: &str, field: &str) -> Result<Entry, CredentialError> {
        Ok(Entry::new(&self.service, &format!("{secret}/{field}"))?)
    }
}

impl From<keyring::Error> for CredentialError {
    fn from(err: keyring::Error) -> Self {
        CredentialError::Backend(err.to_string())
    }
}

impl SecretStore for KeyringStore {
    fn put(&self, secret: &str, fields: &BTreeMap<String, String>) -> Result<(), CredentialError> {
        for (field, value) in fields {
            self.entry(secret, field)?.set_password(value)?;
        }
        Ok(())
    }

    fn get(&self, secret: &str, field: &str) -> Result<String, CredentialError> {
        match self.entry(secret, field)?.get_password() {
            Ok(value) => Ok(value),
            Err(keyring::Error::NoEntry) => Err(CredentialError::NotFound {
                secret: secret.to_string(),
                field: field.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }
}
