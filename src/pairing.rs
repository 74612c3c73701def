use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::store::{CredentialStore, Issuer, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Paired set unchanged since the last successful pass.
    Skipped,
    Applied { added: usize, removed: usize },
}

/// Keeps the stored issuers equal to the set of paired controller keys.
pub struct PairingReconciler {
    store: Arc<dyn CredentialStore>,
    last:  Mutex<Option<BTreeSet<Vec<u8>>>>,
}

impl PairingReconciler {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store, last: Mutex::new(None) }
    }

    pub fn reconcile(&self, paired: &BTreeSet<Vec<u8>>) -> Result<ReconcileOutcome, StoreError> {
        let mut last = self.last.lock().map_err(|_| StoreError::Poisoned)?;
        if last.as_ref() == Some(paired) {
            return Ok(ReconcileOutcome::Skipped);
        }

        let stored = self.store.issuers()?;

        let mut removed = 0;
        for issuer in stored.iter().filter(|i| !paired.contains(&i.public_key)) {
            tracing::info!(issuer = %issuer.id(), "Removing issuer of unpaired controller");
            if self.store.remove_issuer(&issuer.id())? {
                removed += 1;
            }
        }

        let added: Vec<Issuer> = paired
            .iter()
            .filter(|key| !stored.iter().any(|i| &i.public_key == *key))
            .map(|key| Issuer::new(key.clone()))
            .collect();
        for issuer in &added {
            tracing::info!(issuer = %issuer.id(), "Adding issuer for paired controller");
        }
        if !added.is_empty() {
            self.store.upsert_issuers(&added)?;
        }

        *last = Some(paired.clone());
        tracing::debug!(added = added.len(), removed, "Pairings reconciled");
        Ok(ReconcileOutcome::Applied { added: added.len(), removed })
    }
}
