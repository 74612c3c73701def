use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

use super::{Issuer, IssuerId, StoreError};

const NONCE_LEN: usize = 12;

/// Load the data key from `path`, creating a fresh random key on first use.
pub(crate) fn load_or_create_key(path: &Path) -> Result<[u8; 32], StoreError> {
    if path.exists() {
        let bytes = std::fs::read(path)?;
        return bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Corrupt(format!("{} is not 32 bytes", path.display())));
    }

    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    std::io::Write::write_all(&mut file, &key)?;
    tracing::info!(path = %path.display(), "Created store data key");
    Ok(key)
}

/// CBOR-encode, encrypt, and write `nonce || ciphertext` to `path`.
pub(crate) fn write_sealed<T: Serialize>(
    aes_key: &[u8; 32],
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(aes_key)
        .map_err(|e| StoreError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), buf.as_slice())
        .map_err(|e| StoreError::Encryption(e.to_string()))?;

    let mut file_bytes = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    file_bytes.extend_from_slice(&nonce_bytes);
    file_bytes.extend_from_slice(&ciphertext);

    // Records are replaced atomically via rename.
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, file_bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read, decrypt, and decode a record written by [`write_sealed`].
pub(crate) fn read_sealed<T: DeserializeOwned>(
    aes_key: &[u8; 32],
    path: &Path,
) -> Result<T, StoreError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < NONCE_LEN {
        return Err(StoreError::Corrupt("file too short".into()));
    }
    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(aes_key)
        .map_err(|e| StoreError::Encryption(e.to_string()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| StoreError::Encryption(e.to_string()))?;

    ciborium::from_reader(plaintext.as_slice())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn issuer_path(dir: &Path, id: &IssuerId) -> std::path::PathBuf {
    dir.join(format!("{}.bin", id.to_hex()))
}

pub(crate) fn write_issuer(aes_key: &[u8; 32], dir: &Path, issuer: &Issuer) -> Result<(), StoreError> {
    write_sealed(aes_key, &issuer_path(dir, &issuer.id()), issuer)
}

pub(crate) fn delete_issuer(dir: &Path, id: &IssuerId) -> Result<(), StoreError> {
    match std::fs::remove_file(issuer_path(dir, id)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Load all valid issuer files from `dir`. Logs and skips corrupt files.
pub(crate) fn load_issuers(aes_key: &[u8; 32], dir: &Path) -> Result<Vec<Issuer>, StoreError> {
    let mut issuers = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("bin") {
            continue;
        }
        match read_sealed::<Issuer>(aes_key, &path) {
            Ok(issuer) => issuers.push(issuer),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping corrupt issuer file");
            }
        }
    }
    Ok(issuers)
}
