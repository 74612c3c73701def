use base64::prelude::*;
use rand::Rng;
use std::sync::Arc;

use super::{
    ControlPointError,
    message::*,
    types::*,
};
use crate::store::{CredentialStore, Endpoint, Enrollment, Enrollments, IssuerId, ReaderIdentity, hex};

/// NFC Access control point: decodes a request, applies it to the store, encodes the
/// response.
pub struct ControlPoint {
    store: Arc<dyn CredentialStore>,
}

impl ControlPoint {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Handle one characteristic write: base64 TLV in, base64 TLV out.
    pub fn handle_base64(&self, value: &str) -> Result<String, ControlPointError> {
        tracing::debug!(value, "<-- control point (base64)");
        let bytes = BASE64_STANDARD.decode(value.trim())?;
        let response = self.handle_bytes(&bytes)?;
        let encoded = BASE64_STANDARD.encode(response);
        tracing::debug!(value = %encoded, "--> control point (base64)");
        Ok(encoded)
    }

    pub fn handle_bytes(&self, data: &[u8]) -> Result<Vec<u8>, ControlPointError> {
        let request = ControlPointRequest::decode(data)?;
        tracing::debug!(?request, "<-- control point");
        let response = self.handle(request)?;
        tracing::debug!(?response, "--> control point");
        Ok(response.encode())
    }

    pub fn handle(&self, request: ControlPointRequest) -> Result<ControlPointResponse, ControlPointError> {
        let op = request.operation;
        let response = match request.payload {
            ControlPointPayload::ReaderKey(req) => ControlPointResponse::ReaderKey(match op {
                Operation::Get => self.get_reader_key(&req)?,
                Operation::Add => self.add_reader_key(&req)?,
                Operation::Remove => self.remove_reader_key(&req)?,
            }),
            ControlPointPayload::DeviceCredential(req) => {
                ControlPointResponse::DeviceCredential(match op {
                    Operation::Get => self.get_device_credential(&req),
                    Operation::Add => self.add_device_credential(&req)?,
                    Operation::Remove => self.remove_device_credential(&req),
                })
            }
        };
        Ok(response)
    }

    fn get_reader_key(&self, _req: &ReaderKeyRequest) -> Result<ReaderKeyResponse, ControlPointError> {
        let group = self.store.reader_identity()?.group_identifier();
        let status = match group {
            Some(_) => OperationStatus::Success,
            None => OperationStatus::DoesNotExist,
        };
        Ok(ReaderKeyResponse {
            key_identifier: group.map(|g| g.to_vec()),
            status: Some(status),
        })
    }

    fn add_reader_key(&self, req: &ReaderKeyRequest) -> Result<ReaderKeyResponse, ControlPointError> {
        let private_key = req
            .reader_private_key
            .ok_or(ControlPointError::MissingField("reader_private_key"))?;
        let unique_identifier = req
            .unique_reader_identifier
            .ok_or(ControlPointError::MissingField("unique_reader_identifier"))?;
        if !ReaderIdentity::is_valid_private_key(&private_key) {
            return Err(ControlPointError::InvalidReaderKey);
        }

        let current = self.store.reader_identity()?;
        let changed =
            current.private_key != private_key || current.unique_identifier != unique_identifier;

        if changed {
            let identity = ReaderIdentity { private_key, unique_identifier };
            tracing::info!(
                group = ?identity.group_identifier().map(|g| hex(&g)),
                "Reader key provisioned"
            );
            self.store.set_reader_identity(identity)?;
        } else {
            tracing::debug!("Reader key unchanged");
        }

        Ok(ReaderKeyResponse {
            key_identifier: None,
            status: Some(if changed { OperationStatus::Success } else { OperationStatus::Duplicate }),
        })
    }

    fn remove_reader_key(&self, req: &ReaderKeyRequest) -> Result<ReaderKeyResponse, ControlPointError> {
        let current = self.store.reader_identity()?;
        let matches = match (current.group_identifier(), req.key_identifier) {
            (Some(group), Some(requested)) => group == requested,
            _ => false,
        };

        if matches {
            self.store.set_reader_identity(ReaderIdentity {
                private_key: [0u8; READER_PRIVATE_KEY_SIZE],
                ..current
            })?;
            tracing::info!("Reader key removed");
        }

        Ok(ReaderKeyResponse {
            key_identifier: None,
            status: Some(if matches { OperationStatus::Success } else { OperationStatus::DoesNotExist }),
        })
    }

    fn get_device_credential(&self, req: &DeviceCredentialRequest) -> DeviceCredentialResponse {
        tracing::info!(?req, "Device credential GET is not supported");
        DeviceCredentialResponse::with_status(OperationStatus::NotSupported)
    }

    fn remove_device_credential(&self, req: &DeviceCredentialRequest) -> DeviceCredentialResponse {
        tracing::info!(?req, "Device credential REMOVE is not supported");
        DeviceCredentialResponse::with_status(OperationStatus::NotSupported)
    }

    fn add_device_credential(
        &self,
        req: &DeviceCredentialRequest,
    ) -> Result<DeviceCredentialResponse, ControlPointError> {
        let key_type = req.key_type.ok_or(ControlPointError::MissingField("key_type"))?;
        let credential_public_key = req
            .credential_public_key
            .ok_or(ControlPointError::MissingField("credential_public_key"))?;
        let issuer_key_identifier = req
            .issuer_key_identifier
            .ok_or(ControlPointError::MissingField("issuer_key_identifier"))?;

        let mut public_key = Vec::with_capacity(1 + CREDENTIAL_PUBLIC_KEY_SIZE);
        public_key.push(POINT_FORMAT_UNCOMPRESSED);
        public_key.extend_from_slice(&credential_public_key);

        let group = self.store.reader_identity()?.group_identifier().map(|g| g.to_vec());

        // 1. Already enrolled: fill in a missing HAP enrollment, always DUPLICATE.
        if let Some((owner, mut endpoint)) = self.store.endpoint_by_public_key(&public_key)? {
            tracing::info!(issuer = %owner, endpoint = %endpoint.id(), "Device credential already known");
            if endpoint.enrollments.hap.is_none() {
                endpoint.enrollments.hap = Some(hap_enrollment(req));
                self.store.upsert_endpoint(&owner, endpoint)?;
            }
            return Ok(DeviceCredentialResponse {
                key_identifier: group,
                issuer_key_identifier: None,
                status: Some(OperationStatus::Duplicate),
            });
        }

        // 2. Unknown issuer.
        let issuer_id = IssuerId(issuer_key_identifier);
        let Some(issuer) = self.store.issuer_by_id(&issuer_id)? else {
            tracing::warn!(issuer = %issuer_id, "Device credential references unknown issuer");
            return Ok(DeviceCredentialResponse {
                key_identifier: group,
                issuer_key_identifier: None,
                status: Some(OperationStatus::DoesNotExist),
            });
        };

        // 3. New endpoint under the resolved issuer.
        let endpoint = Endpoint {
            last_used_at: 0,
            counter: 0,
            key_type,
            public_key,
            persistent_key: rand::thread_rng().r#gen(),
            enrollments: Enrollments {
                hap: Some(hap_enrollment(req)),
                attestation: None,
            },
        };
        tracing::info!(issuer = %issuer.id(), endpoint = %endpoint.id(), "Enrolled device credential");
        if !self.store.upsert_endpoint(&issuer.id(), endpoint)? {
            // Issuer vanished between lookup and write (pairing removed concurrently).
            return Ok(DeviceCredentialResponse {
                key_identifier: group,
                issuer_key_identifier: None,
                status: Some(OperationStatus::DoesNotExist),
            });
        }

        // Newly created endpoints also answer DUPLICATE.
        Ok(DeviceCredentialResponse {
            key_identifier: None,
            issuer_key_identifier: Some(issuer.id().0.to_vec()),
            status: Some(OperationStatus::Duplicate),
        })
    }
}

fn hap_enrollment(req: &DeviceCredentialRequest) -> Enrollment {
    Enrollment {
        at: unix_now(),
        payload: BASE64_STANDARD.encode(req.encode()),
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
