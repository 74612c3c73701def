use super::{ControlPointError, tlv::Tlv8, types::*};
use crate::store::KeyType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCredentialRequest {
    pub key_type:              Option<KeyType>,
    pub credential_public_key: Option<[u8; CREDENTIAL_PUBLIC_KEY_SIZE]>,
    pub issuer_key_identifier: Option<[u8; KEY_IDENTIFIER_SIZE]>,
    pub key_state:             Option<KeyState>,
    pub key_identifier:        Option<[u8; ENDPOINT_IDENTIFIER_SIZE]>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCredentialResponse {
    pub key_identifier:        Option<Vec<u8>>,
    pub issuer_key_identifier: Option<Vec<u8>>,
    pub status:                Option<OperationStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderKeyRequest {
    pub key_type:                 Option<KeyType>,
    pub reader_private_key:       Option<[u8; READER_PRIVATE_KEY_SIZE]>,
    pub unique_reader_identifier: Option<[u8; UNIQUE_READER_IDENTIFIER_SIZE]>,
    pub key_identifier:           Option<[u8; KEY_IDENTIFIER_SIZE]>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderKeyResponse {
    pub key_identifier: Option<Vec<u8>>,
    pub status:         Option<OperationStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPointPayload {
    DeviceCredential(DeviceCredentialRequest),
    ReaderKey(ReaderKeyRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPointRequest {
    pub operation: Operation,
    pub payload:   ControlPointPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPointResponse {
    DeviceCredential(DeviceCredentialResponse),
    ReaderKey(ReaderKeyResponse),
}

// Field helpers

fn fixed<const N: usize>(tlv: &Tlv8, tag: u8, field: &'static str) -> Result<Option<[u8; N]>, ControlPointError> {
    match tlv.get(tag) {
        None => Ok(None),
        Some(v) => v
            .try_into()
            .map(Some)
            .map_err(|_| ControlPointError::InvalidLength { field, expected: N, actual: v.len() }),
    }
}

fn byte(tlv: &Tlv8, tag: u8, field: &'static str) -> Result<Option<u8>, ControlPointError> {
    Ok(fixed::<1>(tlv, tag, field)?.map(|[b]| b))
}

fn key_type(tlv: &Tlv8, tag: u8) -> Result<Option<KeyType>, ControlPointError> {
    byte(tlv, tag, "key_type")?
        .map(|b| KeyType::from_byte(b).ok_or(ControlPointError::InvalidValue { field: "key_type", value: b }))
        .transpose()
}

impl DeviceCredentialRequest {
    pub fn decode(data: &[u8]) -> Result<Self, ControlPointError> {
        let tlv = Tlv8::parse(data)?;
        let key_state = byte(&tlv, DCR_KEY_STATE, "key_state")?
            .map(|b| KeyState::from_byte(b).ok_or(ControlPointError::InvalidValue { field: "key_state", value: b }))
            .transpose()?;
        Ok(Self {
            key_type: key_type(&tlv, DCR_KEY_TYPE)?,
            credential_public_key: fixed(&tlv, DCR_CREDENTIAL_PUBLIC_KEY, "credential_public_key")?,
            issuer_key_identifier: fixed(&tlv, DCR_ISSUER_KEY_IDENTIFIER, "issuer_key_identifier")?,
            key_state,
            key_identifier: fixed(&tlv, DCR_KEY_IDENTIFIER, "key_identifier")?,
        })
    }

    /// Re-encode the request; used as the enrollment payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut tlv = Tlv8::new();
        if let Some(key_type) = self.key_type {
            tlv.set_u8(DCR_KEY_TYPE, key_type as u8);
        }
        tlv.set_opt(DCR_CREDENTIAL_PUBLIC_KEY, self.credential_public_key);
        tlv.set_opt(DCR_ISSUER_KEY_IDENTIFIER, self.issuer_key_identifier);
        if let Some(state) = self.key_state {
            tlv.set_u8(DCR_KEY_STATE, state as u8);
        }
        tlv.set_opt(DCR_KEY_IDENTIFIER, self.key_identifier);
        tlv.encode()
    }
}

impl DeviceCredentialResponse {
    pub fn with_status(status: OperationStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut tlv = Tlv8::new();
        tlv.set_opt(DCS_KEY_IDENTIFIER, self.key_identifier.clone());
        tlv.set_opt(DCS_ISSUER_KEY_IDENTIFIER, self.issuer_key_identifier.clone());
        if let Some(status) = self.status {
            tlv.set_u8(DCS_STATUS, status as u8);
        }
        tlv.encode()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ControlPointError> {
        let tlv = Tlv8::parse(data)?;
        Ok(Self {
            key_identifier: tlv.get(DCS_KEY_IDENTIFIER).map(<[u8]>::to_vec),
            issuer_key_identifier: tlv.get(DCS_ISSUER_KEY_IDENTIFIER).map(<[u8]>::to_vec),
            status: decode_status(&tlv, DCS_STATUS)?,
        })
    }
}

impl ReaderKeyRequest {
    pub fn decode(data: &[u8]) -> Result<Self, ControlPointError> {
        let tlv = Tlv8::parse(data)?;
        Ok(Self {
            key_type: key_type(&tlv, RKR_KEY_TYPE)?,
            reader_private_key: fixed(&tlv, RKR_READER_PRIVATE_KEY, "reader_private_key")?,
            unique_reader_identifier: fixed(&tlv, RKR_UNIQUE_READER_IDENTIFIER, "unique_reader_identifier")?,
            key_identifier: fixed(&tlv, RKR_KEY_IDENTIFIER, "key_identifier")?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut tlv = Tlv8::new();
        if let Some(key_type) = self.key_type {
            tlv.set_u8(RKR_KEY_TYPE, key_type as u8);
        }
        tlv.set_opt(RKR_READER_PRIVATE_KEY, self.reader_private_key);
        tlv.set_opt(RKR_UNIQUE_READER_IDENTIFIER, self.unique_reader_identifier);
        tlv.set_opt(RKR_KEY_IDENTIFIER, self.key_identifier);
        tlv.encode()
    }
}

impl ReaderKeyResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut tlv = Tlv8::new();
        tlv.set_opt(RKS_KEY_IDENTIFIER, self.key_identifier.clone());
        if let Some(status) = self.status {
            tlv.set_u8(RKS_STATUS, status as u8);
        }
        tlv.encode()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ControlPointError> {
        let tlv = Tlv8::parse(data)?;
        Ok(Self {
            key_identifier: tlv.get(RKS_KEY_IDENTIFIER).map(<[u8]>::to_vec),
            status: decode_status(&tlv, RKS_STATUS)?,
        })
    }
}

fn decode_status(tlv: &Tlv8, tag: u8) -> Result<Option<OperationStatus>, ControlPointError> {
    byte(tlv, tag, "status")?
        .map(|b| OperationStatus::from_byte(b).ok_or(ControlPointError::InvalidValue { field: "status", value: b }))
        .transpose()
}

impl ControlPointRequest {
    pub fn decode(data: &[u8]) -> Result<Self, ControlPointError> {
        let tlv = Tlv8::parse(data)?;

        let op = byte(&tlv, TAG_OPERATION, "operation")?
            .ok_or(ControlPointError::MissingField("operation"))?;
        let operation = Operation::from_byte(op)
            .ok_or(ControlPointError::InvalidValue { field: "operation", value: op })?;

        let payload = match (
            tlv.get(TAG_DEVICE_CREDENTIAL_REQUEST),
            tlv.get(TAG_READER_KEY_REQUEST),
        ) {
            (Some(dcr), None) => ControlPointPayload::DeviceCredential(DeviceCredentialRequest::decode(dcr)?),
            (None, Some(rkr)) => ControlPointPayload::ReaderKey(ReaderKeyRequest::decode(rkr)?),
            (None, None) => return Err(ControlPointError::MissingField("request")),
            (Some(_), Some(_)) => return Err(ControlPointError::AmbiguousRequest),
        };

        Ok(Self { operation, payload })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut tlv = Tlv8::new();
        tlv.set_u8(TAG_OPERATION, self.operation as u8);
        match &self.payload {
            ControlPointPayload::DeviceCredential(r) => tlv.set(TAG_DEVICE_CREDENTIAL_REQUEST, r.encode()),
            ControlPointPayload::ReaderKey(r) => tlv.set(TAG_READER_KEY_REQUEST, r.encode()),
        }
        tlv.encode()
    }
}

impl ControlPointResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut tlv = Tlv8::new();
        match self {
            Self::DeviceCredential(r) => tlv.set(TAG_DEVICE_CREDENTIAL_RESPONSE, r.encode()),
            Self::ReaderKey(r) => tlv.set(TAG_READER_KEY_RESPONSE, r.encode()),
        }
        tlv.encode()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ControlPointError> {
        let tlv = Tlv8::parse(data)?;
        match (
            tlv.get(TAG_DEVICE_CREDENTIAL_RESPONSE),
            tlv.get(TAG_READER_KEY_RESPONSE),
        ) {
            (Some(dcs), None) => Ok(Self::DeviceCredential(DeviceCredentialResponse::decode(dcs)?)),
            (None, Some(rks)) => Ok(Self::ReaderKey(ReaderKeyResponse::decode(rks)?)),
            (None, None) => Err(ControlPointError::MissingField("response")),
            (Some(_), Some(_)) => Err(ControlPointError::AmbiguousRequest),
        }
    }
}
