// Envelope tags
pub const TAG_OPERATION: u8 = 0x01;
pub const TAG_DEVICE_CREDENTIAL_REQUEST: u8 = 0x04;
pub const TAG_DEVICE_CREDENTIAL_RESPONSE: u8 = 0x05;
pub const TAG_READER_KEY_REQUEST: u8 = 0x06;
pub const TAG_READER_KEY_RESPONSE: u8 = 0x07;

// Device credential request
pub const DCR_KEY_TYPE: u8 = 0x01;
pub const DCR_CREDENTIAL_PUBLIC_KEY: u8 = 0x02;
pub const DCR_ISSUER_KEY_IDENTIFIER: u8 = 0x03;
pub const DCR_KEY_STATE: u8 = 0x04;
pub const DCR_KEY_IDENTIFIER: u8 = 0x05;

// Device credential response
pub const DCS_KEY_IDENTIFIER: u8 = 0x01;
pub const DCS_ISSUER_KEY_IDENTIFIER: u8 = 0x02;
pub const DCS_STATUS: u8 = 0x03;

// Reader key request
pub const RKR_KEY_TYPE: u8 = 0x01;
pub const RKR_READER_PRIVATE_KEY: u8 = 0x02;
pub const RKR_UNIQUE_READER_IDENTIFIER: u8 = 0x03;
pub const RKR_KEY_IDENTIFIER: u8 = 0x04;

// Reader key response
pub const RKS_KEY_IDENTIFIER: u8 = 0x01;
pub const RKS_STATUS: u8 = 0x02;

// Informational characteristics
pub const HWF_COLOR: u8 = 0x01;
pub const SUP_NUMBER_OF_ISSUER_KEYS: u8 = 0x01;
pub const SUP_NUMBER_OF_INACTIVE_CREDENTIALS: u8 = 0x02;

pub const CREDENTIAL_PUBLIC_KEY_SIZE: usize = 64;
pub const POINT_FORMAT_UNCOMPRESSED: u8 = 0x04;
pub const KEY_IDENTIFIER_SIZE: usize = 8;
pub const ENDPOINT_IDENTIFIER_SIZE: usize = 6;
pub const READER_PRIVATE_KEY_SIZE: usize = 32;
pub const UNIQUE_READER_IDENTIFIER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    Get = 0x01,
    Add = 0x02,
    Remove = 0x03,
}

impl Operation {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Get),
            0x02 => Some(Self::Add),
            0x03 => Some(Self::Remove),
            _ => None,
        }
    }
}

/// Fixed NFC Access status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationStatus {
    Success = 0x00,
    OutOfResources = 0x01,
    Duplicate = 0x02,
    DoesNotExist = 0x03,
    NotSupported = 0x04,
}

impl OperationStatus {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Success),
            0x01 => Some(Self::OutOfResources),
            0x02 => Some(Self::Duplicate),
            0x03 => Some(Self::DoesNotExist),
            0x04 => Some(Self::NotSupported),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyState {
    Inactive = 0x00,
    Active = 0x01,
}

impl KeyState {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Inactive),
            0x01 => Some(Self::Active),
            _ => None,
        }
    }
}
