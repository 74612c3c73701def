use std::path::PathBuf;
use std::time::Duration;

use crate::control::HardwareFinish;
use crate::lock::LockState;
use crate::reader::{Flow, ReaderSettings};

pub const ISSUER_KEY_CAPACITY: u8 = 16;
pub const INACTIVE_CREDENTIAL_CAPACITY: u8 = 16;
pub const CONFIGURATION_STATE: u16 = 0;

pub const PREFERRED_VERSIONS: &[[u8; 2]] = &[[0x02, 0x00]];
pub const SESSION_KEY_SIZE: usize = 16;

pub const FIELD_POLL_INTERVAL_MS: u64 = 500;
pub const SETTLE_DELAY_SECS: u64 = 2;
pub const EXCEPTION_DELAY_SECS: u64 = 5;

pub const LOCK_VERSION: &str = "1.0.0";
pub const TRIGGER_PAYLOAD: &str = "trigger";
pub const TRIGGER_POLL_INTERVAL_MS: u64 = 250;

#[derive(clap::Parser, Debug, Clone)]
#[command(name = "homekey-reader", about = "Home Key NFC reader")]
pub struct Config {
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Store directory (defaults to the XDG data dir).
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Advertise express mode in the discovery beacon.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub express: bool,
    /// Preferred authentication flow: fast, standard or attestation.
    #[arg(long, default_value = "fast")]
    pub flow: String,
    /// Hardware finish reported to the controller: tan, gold, silver or black.
    #[arg(long, default_value = "silver")]
    pub finish: String,
    /// Lock target state at startup: locked or unlocked.
    #[arg(long, default_value = "locked")]
    pub lock_state_at_startup: String,
    /// Minimum period between two NFC polls.
    #[arg(long, default_value_t = 100)]
    pub throttle_polling_ms: u64,
    /// Delete the reader identity and all issuers, then exit.
    #[arg(long)]
    pub wipe: bool,
    /// Apply one base64 control-point request to the store and print the response.
    #[arg(long, value_name = "BASE64")]
    pub control_point: Option<String>,
}

impl Config {
    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        Ok(directories::ProjectDirs::from("", "", "homekey-reader")
            .ok_or_else(|| anyhow::anyhow!("cannot determine XDG data dir"))?
            .data_dir()
            .to_path_buf())
    }

    pub fn reader_settings(&self) -> ReaderSettings {
        ReaderSettings {
            express: self.express,
            flow: Flow::parse_or_fallback(&self.flow),
            throttle_polling: Duration::from_millis(self.throttle_polling_ms),
            ..ReaderSettings::default()
        }
    }

    pub fn hardware_finish(&self) -> HardwareFinish {
        HardwareFinish::parse_or_fallback(&self.finish)
    }

    pub fn lock_state_at_startup(&self) -> LockState {
        LockState::from_startup(&self.lock_state_at_startup)
    }
}
