//! NFC Access service facade for the home-automation accessory layer.
//!
//! The accessory layer owns the pairing database; it hands this service a
//! [`PairingSource`] and forwards characteristic reads and writes here.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::CONFIGURATION_STATE;
use crate::control::{ControlPoint, HardwareFinish, info};
use crate::error::Result;
use crate::pairing::{PairingReconciler, ReconcileOutcome};
use crate::store::CredentialStore;

/// Public keys of the currently paired controllers.
pub trait PairingSource: Send + Sync {
    fn paired_public_keys(&self) -> BTreeSet<Vec<u8>>;
}

pub struct NfcAccessService {
    pairings:      Arc<dyn PairingSource>,
    reconciler:    PairingReconciler,
    control_point: ControlPoint,
    finish:        HardwareFinish,
}

impl NfcAccessService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        pairings: Arc<dyn PairingSource>,
        finish: HardwareFinish,
    ) -> Self {
        Self {
            pairings,
            reconciler: PairingReconciler::new(store.clone()),
            control_point: ControlPoint::new(store),
            finish,
        }
    }

    fn reconcile(&self) -> Result<ReconcileOutcome> {
        Ok(self.reconciler.reconcile(&self.pairings.paired_public_keys())?)
    }

    pub fn hardware_finish(&self) -> Result<String> {
        self.reconcile()?;
        Ok(self.finish.encode_base64())
    }

    pub fn supported_configuration(&self) -> Result<String> {
        self.reconcile()?;
        Ok(info::supported_configuration_base64())
    }

    /// Responses are delivered through the write, so a read is always empty.
    pub fn read_control_point(&self) -> Result<String> {
        self.reconcile()?;
        Ok(String::new())
    }

    pub fn write_control_point(&self, value: &str) -> Result<String> {
        self.reconcile()?;
        Ok(self.control_point.handle_base64(value)?)
    }

    pub fn configuration_state(&self) -> Result<u16> {
        self.reconcile()?;
        Ok(CONFIGURATION_STATE)
    }

    /// Called by the accessory layer after a controller was removed.
    pub fn on_unpair(&self) -> Result<ReconcileOutcome> {
        self.reconcile()
    }
}
