use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use super::{
    CredentialStore, Endpoint, Issuer, IssuerId, ReaderIdentity, StoreError, disk,
};

const KEY_FILE: &str = "store.key";
const READER_FILE: &str = "reader.bin";
const ISSUERS_DIR: &str = "issuers";

struct State {
    reader:  ReaderIdentity,
    issuers: HashMap<IssuerId, Issuer>,
}

/// Encrypted on-disk store with an in-memory index.
///
/// Mutations write the affected record to disk before the index is updated, both under
/// the same lock.
pub struct FileStore {
    aes_key:     [u8; 32],
    data_dir:    PathBuf,
    issuers_dir: PathBuf,
    state:       Mutex<State>,
}

impl FileStore {
    /// Open (or initialise) the store rooted at `data_dir`.
    pub fn open(data_dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&data_dir)?;
        let aes_key = disk::load_or_create_key(&data_dir.join(KEY_FILE))?;
        Self::load(aes_key, data_dir)
    }

    /// Load all records from disk with an explicit data key.
    pub fn load(aes_key: [u8; 32], data_dir: PathBuf) -> Result<Self, StoreError> {
        let issuers_dir = data_dir.join(ISSUERS_DIR);
        std::fs::create_dir_all(&issuers_dir)?;

        let reader_path = data_dir.join(READER_FILE);
        let reader = if reader_path.exists() {
            disk::read_sealed(&aes_key, &reader_path)?
        } else {
            ReaderIdentity::default()
        };

        let issuers = disk::load_issuers(&aes_key, &issuers_dir)?
            .into_iter()
            .map(|issuer| (issuer.id(), issuer))
            .collect();

        Ok(Self {
            aes_key,
            data_dir,
            issuers_dir,
            state: Mutex::new(State { reader, issuers }),
        })
    }

    pub fn issuer_count(&self) -> usize {
        self.lock().map(|s| s.issuers.len()).unwrap_or_default()
    }

    pub fn endpoint_count(&self) -> usize {
        self.lock()
            .map(|s| s.issuers.values().map(|i| i.endpoints.len()).sum())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl CredentialStore for FileStore {
    fn reader_identity(&self) -> Result<ReaderIdentity, StoreError> {
        Ok(self.lock()?.reader.clone())
    }

    fn set_reader_identity(&self, identity: ReaderIdentity) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        disk::write_sealed(&self.aes_key, &self.data_dir.join(READER_FILE), &identity)?;
        state.reader = identity;
        Ok(())
    }

    fn issuers(&self) -> Result<Vec<Issuer>, StoreError> {
        let state = self.lock()?;
        let mut issuers: Vec<Issuer> = state.issuers.values().cloned().collect();
        issuers.sort_by_key(Issuer::id);
        Ok(issuers)
    }

    fn issuer_by_id(&self, id: &IssuerId) -> Result<Option<Issuer>, StoreError> {
        Ok(self.lock()?.issuers.get(id).cloned())
    }

    fn upsert_issuer(&self, issuer: Issuer) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        disk::write_issuer(&self.aes_key, &self.issuers_dir, &issuer)?;
        state.issuers.insert(issuer.id(), issuer);
        Ok(())
    }

    fn upsert_issuers(&self, issuers: &[Issuer]) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        for issuer in issuers {
            disk::write_issuer(&self.aes_key, &self.issuers_dir, issuer)?;
            state.issuers.insert(issuer.id(), issuer.clone());
        }
        Ok(())
    }

    fn remove_issuer(&self, id: &IssuerId) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if !state.issuers.contains_key(id) {
            return Ok(false);
        }
        disk::delete_issuer(&self.issuers_dir, id)?;
        state.issuers.remove(id);
        Ok(true)
    }

    fn endpoint_by_public_key(
        &self,
        public_key: &[u8],
    ) -> Result<Option<(IssuerId, Endpoint)>, StoreError> {
        let state = self.lock()?;
        Ok(state.issuers.iter().find_map(|(id, issuer)| {
            issuer
                .endpoint_by_public_key(public_key)
                .map(|endpoint| (*id, endpoint.clone()))
        }))
    }

    fn upsert_endpoint(&self, issuer: &IssuerId, endpoint: Endpoint) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let Some(stored) = state.issuers.get(issuer) else {
            return Ok(false);
        };
        let mut updated = stored.clone();
        updated.upsert_endpoint(endpoint);
        disk::write_issuer(&self.aes_key, &self.issuers_dir, &updated)?;
        state.issuers.insert(*issuer, updated);
        Ok(true)
    }
}
