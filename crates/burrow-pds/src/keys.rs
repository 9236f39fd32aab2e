//! secp256k1 key files
//!
//! Keys are stored as the raw 32-byte secret scalar, one file per key.

use std::io::Write;
use std::path::{Path, PathBuf};

use burrow_common::Did;
use burrow_repo::SigningKey as _;
use k256::ecdsa::SigningKey;

use crate::error::{PdsError, Result};

/// Fresh random secp256k1 key
pub fn generate_key() -> SigningKey {
    SigningKey::random(&mut rand::rngs::OsRng)
}

/// Write `key` to `path`, replacing the file atomically
pub fn write_key_file(path: &Path, key: &SigningKey) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&key.to_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Generate a key and write it to `path`
///
/// An existing file is only replaced when `overwrite` is set.
pub fn create_key_file(path: &Path, overwrite: bool) -> std::io::Result<SigningKey> {
    if !overwrite && path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        ));
    }
    let key = generate_key();
    write_key_file(path, &key)?;
    Ok(key)
}

/// Read a key written by [`write_key_file`]
pub fn read_key_file(path: &Path) -> std::io::Result<SigningKey> {
    let bytes = std::fs::read(path)?;
    SigningKey::from_slice(&bytes)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// `did:key` of the rotation key at `path`, or `None` when no key was created yet
pub async fn rotation_did_key(path: &Path) -> Result<Option<String>> {
    let path = path.to_path_buf();
    match tokio::task::spawn_blocking(move || read_key_file(&path)).await? {
        Ok(key) => Ok(Some(key.public_key().did_key())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Per-repository signing keys under one directory
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Key store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File holding the key for `did`
    pub fn key_path(&self, did: &Did) -> PathBuf {
        self.dir.join(format!("{}.key", did.as_str().replace([':', '%'], "_")))
    }

    /// Save the signing key for `did`, returning its `did:key`
    pub async fn store(&self, did: &Did, key: &SigningKey) -> Result<String> {
        let path = self.key_path(did);
        let key = key.clone();
        let did_key = key.public_key().did_key();
        tokio::task::spawn_blocking(move || write_key_file(&path, &key)).await??;
        Ok(did_key)
    }

    /// Generate and save a signing key for `did`, refusing to replace an existing one
    pub async fn generate(&self, did: &Did) -> Result<SigningKey> {
        let path = self.key_path(did);
        let shown = path.display().to_string();
        match tokio::task::spawn_blocking(move || create_key_file(&path, false)).await? {
            Ok(key) => Ok(key),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(PdsError::Signing {
                did: did.to_string(),
                reason: format!("key file {shown} already exists"),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the signing key for `did`
    ///
    /// A missing or unreadable key is a `Signing` error.
    pub async fn load(&self, did: &Did) -> Result<SigningKey> {
        let path = self.key_path(did);
        let shown = path.display().to_string();
        tokio::task::spawn_blocking(move || read_key_file(&path))
            .await?
            .map_err(|e| PdsError::Signing {
                did: did.to_string(),
                reason: match e.kind() {
                    std::io::ErrorKind::InvalidData => {
                        format!("key file {shown} is not a secp256k1 key")
                    }
                    _ => format!("cannot read key file {shown}: {e}"),
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rotation.key");
        let key = generate_key();
        write_key_file(&path, &key).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 32);
        assert_eq!(read_key_file(&path).unwrap(), key);
    }

    #[test]
    fn key_file_is_not_replaced_unless_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotation.key");
        let first = create_key_file(&path, false).unwrap();

        let err = create_key_file(&path, false).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(read_key_file(&path).unwrap(), first);

        let second = create_key_file(&path, true).unwrap();
        assert_ne!(second, first);
        assert_eq!(read_key_file(&path).unwrap(), second);
    }

    #[tokio::test]
    async fn rotation_key_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rotation.key");
        assert_eq!(rotation_did_key(&path).await.unwrap(), None);

        let key = create_key_file(&path, false).unwrap();
        assert_eq!(
            rotation_did_key(&path).await.unwrap(),
            Some(key.public_key().did_key())
        );
    }

    #[tokio::test]
    async fn generated_repo_key_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyStore::new(dir.path());
        let did = Did::raw("did:plc:fresh");

        let key = keys.generate(&did).await.unwrap();
        assert_eq!(keys.load(&did).await.unwrap(), key);

        let err = keys.generate(&did).await.unwrap_err();
        assert!(matches!(err, PdsError::Signing { .. }));
        assert_eq!(keys.load(&did).await.unwrap(), key);
    }

    #[tokio::test]
    async fn missing_or_corrupt_key_is_a_signing_error() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyStore::new(dir.path());
        let did = Did::raw("did:plc:keyless");

        let err = keys.load(&did).await.unwrap_err();
        assert_eq!(err.error_name(), "SigningError");

        std::fs::write(keys.key_path(&did), b"short").unwrap();
        let err = keys.load(&did).await.unwrap_err();
        assert!(matches!(err, PdsError::Signing { .. }));
    }

    #[tokio::test]
    async fn stored_key_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyStore::new(dir.path());
        let did = Did::raw("did:web:example.com%3A8080");
        let key = generate_key();

        let did_key = keys.store(&did, &key).await.unwrap();
        assert!(did_key.starts_with("did:key:z"));
        assert!(!keys.key_path(&did).to_string_lossy().contains(':'));
        assert_eq!(keys.load(&did).await.unwrap(), key);
    }
}
