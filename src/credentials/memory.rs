use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{CredentialError, SecretStore};

/// Process-local store, used by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    secrets: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl SecretStore for MemoryStore {
    fn put(&self, secret: &str, fields: &BTreeMap<String, String>) -> Result<(), CredentialError> {
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|e| CredentialError::Backend(e.to_string()))?;
        secrets
            .entry(secret.to_string())
            .or_default()
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn get(&self, secret: &str, field: &str) -> Result<String, CredentialError> {
        let secrets = self
            .secrets
            .lock()
            .map_err(|e| CredentialError::Backend(e.to_string()))?;
        secrets
            .get(secret)
            .and_then(|fields| fields.get(field))
            .cloned()
            .ok_or_else(|| CredentialError::NotFound {
                secret: secret.to_string(),
                field: field.to_string(),
            })
    }
}
