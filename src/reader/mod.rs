//! NFC reader side: the transaction supervisor, its fault-isolating runner, and the
//! traits for the NFC frontend and the Home Key authenticator it drives.

pub mod runner;
pub mod supervisor;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::{EXCEPTION_DELAY_SECS, FIELD_POLL_INTERVAL_MS, SETTLE_DELAY_SECS};
use crate::store::{Endpoint, Issuer, StoreError};

pub use runner::{Runner, RunnerOptions};
pub use supervisor::{CycleOutcome, Phase, TransactionSupervisor};

#[derive(Debug, thiserror::Error)]
pub enum NfcError {
    #[error("NFC device unavailable: {0}")]
    Device(String),
    #[error("NFC communication: {0}")]
    Communication(String),
    #[error("NFC timeout")]
    Timeout,
}

/// Authentication rejected by the credential or failed mid-handshake.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ProtocolError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("device is not configured: reader private key is unset")]
    NotProvisioned,
    #[error("could not open NFC device: {0}")]
    Open(#[source] NfcError),
    #[error("Store: {0}")]
    Store(#[from] StoreError),
    #[error("could not spawn reader thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl SupervisorError {
    /// Errors that make [`start`] refuse to run. Once the runner is up, a cycle that
    /// finds the key unset returns `NotProvisioned` too; the runner logs it and retries
    /// after the exception delay.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotProvisioned | Self::Open(_))
    }
}

/// Authentication flow preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Fast,
    Standard,
    Attestation,
}

impl Flow {
    pub const FALLBACK: Self = Self::Fast;

    pub fn parse_or_fallback(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!(flow = name, fallback = ?Self::FALLBACK, "Unsupported Digital Key flow");
            Self::FALLBACK
        })
    }
}

impl std::str::FromStr for Flow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "standard" => Ok(Self::Standard),
            "attestation" => Ok(Self::Attestation),
            other => Err(format!("unknown flow '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionType {
    Unlock = 0x01,
}

/// Parameters for the ECP discovery frame broadcast while sensing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryBeacon {
    pub group_identifier: [u8; 8],
    pub express:          bool,
}

/// A target found by the frontend's NFC-A poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub identifier: Vec<u8>,
}

/// An activated ISO-DEP (ISO 14443-4) tag that carries APDUs.
pub trait IsoDepTag: Send {
    fn identifier(&self) -> &[u8];
    fn transceive(&mut self, apdu: &[u8]) -> Result<Vec<u8>, NfcError>;
    /// Whether the tag still answers in the field.
    fn is_present(&mut self) -> bool;
}

pub enum Activation {
    IsoDep(Box<dyn IsoDepTag>),
    /// Activated, but not a transport-capable tag.
    Unsupported { identifier: Vec<u8> },
}

/// Contactless frontend: RF polling and tag activation.
pub trait Frontend: Send {
    fn open(&mut self) -> Result<(), NfcError>;
    /// Single blocking poll. With a beacon, the discovery frame is broadcast when no
    /// target answers.
    fn sense(&mut self, beacon: Option<&DiscoveryBeacon>) -> Result<Option<RemoteTarget>, NfcError>;
    fn activate(&mut self, target: &RemoteTarget) -> Result<Activation, NfcError>;
}

pub struct AuthenticationRequest<'a> {
    pub issuers:            &'a [Issuer],
    pub preferred_versions: &'a [[u8; 2]],
    pub flow:               Flow,
    pub transaction:        TransactionType,
    /// `group_identifier || unique_identifier`
    pub reader_identifier:  [u8; 16],
    pub reader_private_key: &'a [u8; 32],
    pub key_size:           usize,
}

pub struct Authenticated {
    pub flow:     Flow,
    /// Issuers whose endpoint state changed during the transaction.
    pub issuers:  Vec<Issuer>,
    pub endpoint: Option<Endpoint>,
}

/// Home Key handshake against an activated tag.
pub trait Authenticator: Send {
    fn authenticate(
        &mut self,
        tag: &mut dyn IsoDepTag,
        request: AuthenticationRequest<'_>,
    ) -> Result<Authenticated, ProtocolError>;
}

/// Notified after an endpoint authenticated and its state was persisted.
pub trait EndpointObserver: Send + Sync {
    fn on_endpoint_authenticated(&self, endpoint: &Endpoint);
}

#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub express:             bool,
    pub flow:                Flow,
    pub throttle_polling:    Duration,
    pub field_poll_interval: Duration,
    pub settle_delay:        Duration,
    pub exception_delay:     Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            express: true,
            flow: Flow::Fast,
            throttle_polling: Duration::from_millis(100),
            field_poll_interval: Duration::from_millis(FIELD_POLL_INTERVAL_MS),
            settle_delay: Duration::from_secs(SETTLE_DELAY_SECS),
            exception_delay: Duration::from_secs(EXCEPTION_DELAY_SECS),
        }
    }
}

/// Cooperative stop signal shared between the runner and the supervisor.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep until `duration` has elapsed on the monotonic clock or the token is
    /// cancelled. Returns `false` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(50);
        let deadline = Instant::now() + duration;
        loop {
            if !self.is_alive() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLICE));
        }
    }
}

/// Check provisioning, open the frontend, and run the supervisor on a background
/// runner. Configuration errors are returned before any NFC I/O happens.
pub fn start<F, A>(
    mut supervisor: TransactionSupervisor<F, A>,
    token: CancelToken,
) -> Result<Runner, SupervisorError>
where
    F: Frontend + 'static,
    A: Authenticator + 'static,
{
    supervisor.preflight()?;
    supervisor.open()?;

    let options = RunnerOptions {
        delay: Duration::ZERO,
        exception_delay: supervisor.settings().exception_delay,
    };
    Runner::start("homekey", token, options, move |token| supervisor.run(token))
        .map_err(SupervisorError::Spawn)
}
