use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const KEY_IDENTIFIER_LABEL: &[u8] = b"key-identifier";

/// First `N` bytes of `SHA-256("key-identifier" || data)`.
pub(crate) fn key_identifier<const N: usize>(data: &[u8]) -> [u8; N] {
    let digest = Sha256::new()
        .chain_update(KEY_IDENTIFIER_LABEL)
        .chain_update(data)
        .finalize();
    let mut out = [0u8; N];
    out.copy_from_slice(&digest[..N]);
    out
}

/// Lowercase hex, used for identifiers in logs, file names and dumps.
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssuerId(pub [u8; 8]);

impl IssuerId {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex(&self.0)
    }
}

impl std::fmt::Display for IssuerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub [u8; 6]);

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeyType {
    Curve25519 = 0x01,
    Secp256r1 = 0x02,
}

impl KeyType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Curve25519),
            0x02 => Some(Self::Secp256r1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub at:      u64,     // Unix timestamp
    pub payload: String,  // base64 of the re-encoded provisioning request
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollments {
    pub hap:         Option<Enrollment>,
    pub attestation: Option<Enrollment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub last_used_at:   u64,
    pub counter:        u32,
    pub key_type:       KeyType,
    pub public_key:     Vec<u8>,   // 0x04 || X || Y
    pub persistent_key: [u8; 32],
    pub enrollments:    Enrollments,
}

impl Endpoint {
    /// Identifier derived from the public key coordinates (tag byte excluded).
    pub fn id(&self) -> EndpointId {
        let coords = self.public_key.get(1..).unwrap_or_default();
        EndpointId(key_identifier(coords))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    pub public_key: Vec<u8>,
    pub endpoints:  Vec<Endpoint>,
}

impl Issuer {
    pub fn new(public_key: Vec<u8>) -> Self {
        Self { public_key, endpoints: Vec::new() }
    }

    pub fn id(&self) -> IssuerId {
        IssuerId(key_identifier(&self.public_key))
    }

    pub fn endpoint_by_public_key(&self, public_key: &[u8]) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.public_key == public_key)
    }

    /// Replace the endpoint with the same public key, or append it.
    pub fn upsert_endpoint(&mut self, endpoint: Endpoint) {
        match self
            .endpoints
            .iter_mut()
            .find(|e| e.public_key == endpoint.public_key)
        {
            Some(existing) => *existing = endpoint,
            None => self.endpoints.push(endpoint),
        }
    }
}

/// Reader key material provisioned through the control point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderIdentity {
    pub private_key:       [u8; 32],
    pub unique_identifier: [u8; 8],
}

impl ReaderIdentity {
    pub fn is_provisioned(&self) -> bool {
        self.private_key.iter().any(|&b| b != 0)
    }

    /// Whether `private_key` is a usable P-256 scalar (non-zero and below the curve order).
    pub fn is_valid_private_key(private_key: &[u8]) -> bool {
        p256::SecretKey::from_slice(private_key).is_ok()
    }

    /// Group identifier advertised to credentials, derived from the x-coordinate of the
    /// reader public key. `None` while the private key is unset or not a valid scalar.
    pub fn group_identifier(&self) -> Option<[u8; 8]> {
        use p256::elliptic_curve::sec1::ToEncodedPoint;

        if !self.is_provisioned() {
            return None;
        }
        let secret = p256::SecretKey::from_slice(&self.private_key).ok()?;
        let point = secret.public_key().to_encoded_point(false);
        Some(key_identifier(point.x()?))
    }

    /// `group_identifier || unique_identifier`, as presented during authentication.
    pub fn reader_identifier(&self) -> Option<[u8; 16]> {
        let group = self.group_identifier()?;
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&group);
        out[8..].copy_from_slice(&self.unique_identifier);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_reader_has_no_group_identifier() {
        let reader = ReaderIdentity::default();
        assert!(!reader.is_provisioned());
        assert_eq!(reader.group_identifier(), None);
        assert_eq!(reader.reader_identifier(), None);
    }

    #[test]
    fn test_group_identifier_is_stable_per_key() {
        let reader = ReaderIdentity { private_key: [0x11; 32], unique_identifier: [0x22; 8] };
        let group = reader.group_identifier().unwrap();
        assert_eq!(reader.group_identifier(), Some(group));

        let other = ReaderIdentity { private_key: [0x12; 32], ..reader.clone() };
        assert_ne!(other.group_identifier(), Some(group));

        let ident = reader.reader_identifier().unwrap();
        assert_eq!(&ident[..8], &group);
        assert_eq!(&ident[8..], &[0x22; 8]);
    }

    #[test]
    fn test_issuer_upsert_endpoint_replaces_by_public_key() {
        let mut issuer = Issuer::new(vec![0xAA; 32]);
        let mut endpoint = Endpoint {
            last_used_at: 0,
            counter: 0,
            key_type: KeyType::Secp256r1,
            public_key: [&[0x04][..], &[0x01; 64]].concat(),
            persistent_key: [0u8; 32],
            enrollments: Enrollments::default(),
        };
        issuer.upsert_endpoint(endpoint.clone());
        endpoint.counter = 7;
        issuer.upsert_endpoint(endpoint.clone());

        assert_eq!(issuer.endpoints.len(), 1);
        assert_eq!(issuer.endpoints[0].counter, 7);
        assert_eq!(issuer.id(), Issuer::new(vec![0xAA; 32]).id());
    }

    #[test]
    fn test_private_key_validation() {
        assert!(ReaderIdentity::is_valid_private_key(&[0x11; 32]));
        assert!(!ReaderIdentity::is_valid_private_key(&[0x00; 32]));
        // Above the P-256 group order.
        assert!(!ReaderIdentity::is_valid_private_key(&[0xFF; 32]));
    }

    #[test]
    fn test_hex_is_lowercase() {
        assert_eq!(hex(&[0x00, 0xAB, 0x7f]), "00ab7f");
    }
}
