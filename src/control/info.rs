//! Read-only NFC Access characteristics.

use base64::prelude::*;

use super::{tlv::Tlv8, types::*};
use crate::config::{INACTIVE_CREDENTIAL_CAPACITY, ISSUER_KEY_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareFinish {
    Tan,
    Gold,
    Silver,
    Black,
}

impl HardwareFinish {
    pub const FALLBACK: Self = Self::Black;

    /// RGBA color reported to the controller.
    pub fn color(self) -> [u8; 4] {
        match self {
            Self::Tan => [0xCE, 0xD5, 0xDA, 0x00],
            Self::Gold => [0xAA, 0xD6, 0xEC, 0x00],
            Self::Silver => [0xE3, 0xE3, 0xE3, 0x00],
            Self::Black => [0x00, 0x00, 0x00, 0x00],
        }
    }

    /// Parse a configured finish name, falling back to [`Self::FALLBACK`] with a warning.
    pub fn parse_or_fallback(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!(finish = name, fallback = ?Self::FALLBACK, "Unsupported hardware finish");
            Self::FALLBACK
        })
    }

    /// Base64 TLV value of the HardwareFinish characteristic.
    pub fn encode_base64(self) -> String {
        let mut tlv = Tlv8::new();
        tlv.set(HWF_COLOR, self.color());
        BASE64_STANDARD.encode(tlv.encode())
    }
}

impl std::str::FromStr for HardwareFinish {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tan" => Ok(Self::Tan),
            "gold" => Ok(Self::Gold),
            "silver" => Ok(Self::Silver),
            "black" => Ok(Self::Black),
            other => Err(format!("unknown hardware finish '{other}'")),
        }
    }
}

/// Base64 TLV value of the NFCAccessSupportedConfiguration characteristic.
pub fn supported_configuration_base64() -> String {
    let mut tlv = Tlv8::new();
    tlv.set_u8(SUP_NUMBER_OF_ISSUER_KEYS, ISSUER_KEY_CAPACITY);
    tlv.set_u8(SUP_NUMBER_OF_INACTIVE_CREDENTIALS, INACTIVE_CREDENTIAL_CAPACITY);
    BASE64_STANDARD.encode(tlv.encode())
}
