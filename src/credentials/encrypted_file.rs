use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

use super::{CredentialError, SecretStore};

const KEY_FILE: &str = ".fsmail_key";
const SECRETS_FILE: &str = ".fsmail_secrets";
const NONCE_LEN: usize = 12;

type Secrets = BTreeMap<String, BTreeMap<String, String>>;

/// Secrets encrypted with AES-256-GCM next to a locally generated key.
/// For machines without a usable credential manager.
pub struct EncryptedFileStore {
    key_path: PathBuf,
    secrets_path: PathBuf,
}

impl EncryptedFileStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            key_path: dir.join(KEY_FILE),
            secrets_path: dir.join(SECRETS_FILE),
        }
    }

    fn cipher(&self) -> Result<Aes256Gcm, CredentialError> {
        let key_bytes = if self.key_path.exists() {
            fs::read(&self.key_path).map_err(backend)?
        } else {
            let mut key_bytes = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut key_bytes);
            write_private(&self.key_path, &key_bytes)?;
            key_bytes
        };

        Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| CredentialError::Backend(format!("creating cipher from key: {e}")))
    }

    fn load(&self) -> Result<Secrets, CredentialError> {
        if !self.secrets_path.exists() {
            return Ok(Secrets::new());
        }

        let encoded = fs::read_to_string(&self.secrets_path).map_err(backend)?;
        let combined = BASE64
            .decode(encoded.trim())
            .map_err(|e| CredentialError::Backend(format!("decoding base64: {e}")))?;
        if combined.len() < NONCE_LEN {
            return Err(CredentialError::Backend("secrets file is truncated".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CredentialError::Backend(format!("decrypting secrets: {e}")))?;

        serde_json::from_slice(&plaintext).map_err(|e| CredentialError::Backend(e.to_string()))
    }

    fn save(&self, secrets: &Secrets) -> Result<(), CredentialError> {
        let plaintext = serde_json::to_vec(secrets).map_err(|e| CredentialError::Backend(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|e| CredentialError::Backend(format!("encrypting secrets: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        write_private(&self.secrets_path, BASE64.encode(&combined).as_bytes())
    }
}

impl SecretStore for EncryptedFileStore {
    fn put(&self, secret: &str, fields: &BTreeMap<String, String>) -> Result<(), CredentialError> {
        let mut secrets = self.load()?;
        secrets
            .entry(secret.to_string())
            .or_default()
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.save(&secrets)
    }

    fn get(&self, secret: &str, field: &str) -> Result<String, CredentialError> {
        self.load()?
            .get(secret)
            .and_then(|fields| fields.get(field))
            .cloned()
            .ok_or_else(|| CredentialError::NotFound {
                secret: secret.to_string(),
                field: field.to_string(),
            })
    }
}

fn backend(err: std::io::Error) -> CredentialError {
    CredentialError::Backend(err.to_string())
}

// Owner-only from creation on; an existing file is tightened before the rewrite.
fn write_private(path: &Path, contents: &[u8]) -> Result<(), CredentialError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(0o600);
        if path.exists() {
            fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(backend)?;
        }
    }

    let mut file = options.open(path).map_err(backend)?;
    file.write_all(contents).map_err(backend)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_put_then_get_from_fresh_handle() {
        let dir = tempdir().unwrap();
        EncryptedFileStore::new(dir.path())
            .put("credentials", &fields(&[("username", "me"), ("password", "s3cret")]))
            .unwrap();

        let store = EncryptedFileStore::new(dir.path());

        assert_eq!(store.get("credentials", "username").unwrap(), "me");
        assert_eq!(store.get("credentials", "password").unwrap(), "s3cret");
    }

    #[test]
    fn test_secrets_are_not_stored_in_clear() {
        let dir = tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path());
        store.put("credentials", &fields(&[("password", "s3cret")])).unwrap();

        let on_disk = fs::read_to_string(dir.path().join(SECRETS_FILE)).unwrap();

        assert!(!on_disk.contains("s3cret"));
    }

    #[test]
    fn test_put_merges_fields() {
        let dir = tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path());
        store.put("credentials", &fields(&[("username", "me")])).unwrap();
        store.put("credentials", &fields(&[("password", "pw")])).unwrap();

        assert_eq!(store.get("credentials", "username").unwrap(), "me");
        assert_eq!(store.get("credentials", "password").unwrap(), "pw");
    }

    #[cfg(unix)]
    #[test]
    fn test_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path());
        store.put("credentials", &fields(&[("username", "me")])).unwrap();
        fs::set_permissions(dir.path().join(SECRETS_FILE), fs::Permissions::from_mode(0o644)).unwrap();
        store.put("credentials", &fields(&[("password", "s3cret")])).unwrap();

        for name in [KEY_FILE, SECRETS_FILE] {
            let mode = fs::metadata(dir.path().join(name)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{name}");
        }
    }

    #[test]
    fn test_missing_field_is_not_found() {
        let dir = tempdir().unwrap();
        let store = EncryptedFileStore::new(dir.path());

        assert!(matches!(
            store.get("credentials", "username"),
            Err(CredentialError::NotFound { .. })
        ));
    }
}
