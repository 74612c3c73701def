pub mod dispatch;
pub mod info;
pub mod message;
pub mod tlv;
pub mod types;

pub use dispatch::ControlPoint;
pub use info::HardwareFinish;

#[derive(Debug, thiserror::Error)]
pub enum ControlPointError {
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("TLV: {0}")]
    Tlv(#[from] tlv::TlvError),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("{field}: expected {expected} bytes, got {actual}")]
    InvalidLength { field: &'static str, expected: usize, actual: usize },
    #[error("{field}: invalid value {value:#04x}")]
    InvalidValue { field: &'static str, value: u8 },
    #[error("reader private key is not a valid P-256 scalar")]
    InvalidReaderKey,
    #[error("request carries both a device credential and a reader key")]
    AmbiguousRequest,
    #[error("Store: {0}")]
    Store(#[from] crate::store::StoreError),
}
