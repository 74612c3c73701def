use std::sync::Arc;
use std::time::Instant;

use super::{
    Activation, AuthenticationRequest, Authenticator, CancelToken, DiscoveryBeacon,
    EndpointObserver, Frontend, IsoDepTag, ReaderSettings, RemoteTarget, SupervisorError,
    TransactionType,
};
use crate::config::{PREFERRED_VERSIONS, SESSION_KEY_SIZE};
use crate::store::{CredentialStore, EndpointId, ReaderIdentity, hex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sensing,
    Activating,
    Authenticating,
    Cooldown,
    Stopped,
}

/// How one poll/transaction cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    NoTarget,
    Unsupported,
    ActivationFailed,
    Rejected,
    /// Endpoint state was persisted and observers notified (if an endpoint was returned).
    Authenticated(Option<EndpointId>),
    /// Authentication succeeded but the issuer delta could not be persisted.
    PersistFailed,
    Stopped,
}

/// Reader state snapshot taken at the start of a cycle.
struct Transaction {
    reader:            ReaderIdentity,
    group_identifier:  [u8; 8],
    reader_identifier: [u8; 16],
    started:           Instant,
}

enum State {
    Idle,
    Sensing(Transaction),
    Activating(Transaction, RemoteTarget),
    Authenticating(Transaction, Box<dyn IsoDepTag>),
    Cooldown(Box<dyn IsoDepTag>, CycleOutcome),
    Done(CycleOutcome),
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::Sensing(..) => Phase::Sensing,
            Self::Activating(..) => Phase::Activating,
            Self::Authenticating(..) => Phase::Authenticating,
            Self::Cooldown(..) => Phase::Cooldown,
            Self::Done(_) => Phase::Idle,
        }
    }
}

/// Poll → activate → authenticate → cooldown, one transaction at a time.
pub struct TransactionSupervisor<F, A> {
    frontend:      F,
    authenticator: A,
    store:         Arc<dyn CredentialStore>,
    observers:     Vec<Arc<dyn EndpointObserver>>,
    settings:      ReaderSettings,
}

impl<F: Frontend, A: Authenticator> TransactionSupervisor<F, A> {
    pub fn new(
        frontend: F,
        authenticator: A,
        store: Arc<dyn CredentialStore>,
        observers: Vec<Arc<dyn EndpointObserver>>,
        settings: ReaderSettings,
    ) -> Self {
        Self { frontend, authenticator, store, observers, settings }
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    /// Fails with [`SupervisorError::NotProvisioned`] while the reader key is unset.
    pub fn preflight(&self) -> Result<(), SupervisorError> {
        let reader = self.store.reader_identity()?;
        if reader.reader_identifier().is_none() {
            return Err(SupervisorError::NotProvisioned);
        }
        Ok(())
    }

    pub fn open(&mut self) -> Result<(), SupervisorError> {
        tracing::info!("Connecting to the NFC reader...");
        self.frontend.open().map_err(SupervisorError::Open)?;
        tracing::info!("NFC reader connected");
        Ok(())
    }

    /// Run cycles until the token is cancelled.
    pub fn run(&mut self, token: &CancelToken) -> Result<(), SupervisorError> {
        tracing::info!("Waiting for next device...");
        while token.is_alive() {
            self.cycle(token)?;
        }
        tracing::info!("Transaction supervisor stopped");
        Ok(())
    }

    /// Drive the state machine from `Idle` until the cycle is done.
    pub fn cycle(&mut self, token: &CancelToken) -> Result<CycleOutcome, SupervisorError> {
        let mut state = State::Idle;
        loop {
            if !token.is_alive() {
                tracing::trace!(phase = ?Phase::Stopped, "state");
                return Ok(CycleOutcome::Stopped);
            }
            tracing::trace!(phase = ?state.phase(), "state");
            state = match state {
                State::Idle => State::Sensing(self.begin()?),
                State::Sensing(tx) => self.sense(tx, token),
                State::Activating(tx, target) => self.activate(tx, target, token),
                State::Authenticating(tx, tag) => self.authenticate(tx, tag)?,
                State::Cooldown(tag, outcome) => self.cooldown(tag, outcome, token),
                State::Done(outcome) => return Ok(outcome),
            };
        }
    }

    fn begin(&self) -> Result<Transaction, SupervisorError> {
        let reader = self.store.reader_identity()?;
        let (Some(group_identifier), Some(reader_identifier)) =
            (reader.group_identifier(), reader.reader_identifier())
        else {
            return Err(SupervisorError::NotProvisioned);
        };
        Ok(Transaction {
            reader,
            group_identifier,
            reader_identifier,
            started: Instant::now(),
        })
    }

    fn sense(&mut self, mut tx: Transaction, token: &CancelToken) -> State {
        tx.started = Instant::now();
        let beacon = DiscoveryBeacon {
            group_identifier: tx.group_identifier,
            express: self.settings.express,
        };

        match self.frontend.sense(Some(&beacon)) {
            Ok(Some(target)) => return State::Activating(tx, target),
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "NFC sense failed"),
        }

        // Throttle polling to keep the RF frontend from overheating.
        let remaining = self.settings.throttle_polling.saturating_sub(tx.started.elapsed());
        token.sleep(remaining);
        State::Done(CycleOutcome::NoTarget)
    }

    fn activate(&mut self, tx: Transaction, target: RemoteTarget, token: &CancelToken) -> State {
        let outcome = match self.frontend.activate(&target) {
            Ok(Activation::IsoDep(tag)) => {
                tracing::info!(uid = %hex(tag.identifier()), "Got NFC tag");
                return State::Authenticating(tx, tag);
            }
            Ok(Activation::Unsupported { identifier }) => {
                tracing::info!(uid = %hex(&identifier), "Found non-ISODEP tag");
                CycleOutcome::Unsupported
            }
            Err(e) => {
                tracing::warn!(uid = %hex(&target.identifier), error = %e, "Tag activation failed");
                CycleOutcome::ActivationFailed
            }
        };
        self.await_departure(token);
        State::Done(outcome)
    }

    fn await_departure(&mut self, token: &CancelToken) {
        while let Ok(Some(_)) = self.frontend.sense(None) {
            tracing::debug!("Waiting for target to leave the field...");
            if !token.sleep(self.settings.field_poll_interval) {
                return;
            }
        }
    }

    fn authenticate(
        &mut self,
        tx: Transaction,
        mut tag: Box<dyn IsoDepTag>,
    ) -> Result<State, SupervisorError> {
        let issuers = self.store.issuers()?;
        let request = AuthenticationRequest {
            issuers: &issuers,
            preferred_versions: PREFERRED_VERSIONS,
            flow: self.settings.flow,
            transaction: TransactionType::Unlock,
            reader_identifier: tx.reader_identifier,
            reader_private_key: &tx.reader.private_key,
            key_size: SESSION_KEY_SIZE,
        };

        let outcome = match self.authenticator.authenticate(tag.as_mut(), request) {
            Ok(result) => {
                let elapsed_ms = tx.started.elapsed().as_millis();
                let endpoint_id = result.endpoint.as_ref().map(|e| e.id());
                tracing::info!(
                    flow = ?result.flow,
                    endpoint = ?endpoint_id.map(|id| id.to_string()),
                    elapsed_ms,
                    "Authenticated endpoint"
                );

                // Persist counters/enrollments before anyone hears about the endpoint.
                let persisted = result.issuers.is_empty()
                    || match self.store.upsert_issuers(&result.issuers) {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to persist issuer state");
                            false
                        }
                    };

                if !persisted {
                    CycleOutcome::PersistFailed
                } else {
                    if let Some(endpoint) = &result.endpoint {
                        for observer in &self.observers {
                            observer.on_endpoint_authenticated(endpoint);
                        }
                    }
                    CycleOutcome::Authenticated(endpoint_id)
                }
            }
            Err(e) => {
                tracing::info!(error = %e, "Could not authenticate device due to protocol error");
                CycleOutcome::Rejected
            }
        };

        Ok(State::Cooldown(tag, outcome))
    }

    fn cooldown(
        &mut self,
        mut tag: Box<dyn IsoDepTag>,
        outcome: CycleOutcome,
        token: &CancelToken,
    ) -> State {
        while tag.is_present() {
            tracing::debug!("Waiting for device to leave the field...");
            if !token.sleep(self.settings.field_poll_interval) {
                return State::Done(outcome);
            }
        }
        tracing::info!(
            settle_ms = self.settings.settle_delay.as_millis(),
            "Device left the field"
        );
        token.sleep(self.settings.settle_delay);
        tracing::info!("Waiting for next device...");
        State::Done(outcome)
    }
}
