pub mod credential;
pub mod disk;
pub mod index;

pub use credential::{
    Endpoint, EndpointId, Enrollment, Enrollments, Issuer, IssuerId, KeyType, ReaderIdentity,
};
pub use index::FileStore;
pub(crate) use credential::hex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialize: {0}")]
    Serialization(String),
    #[error("Encrypt: {0}")]
    Encryption(String),
    #[error("Corrupt: {0}")]
    Corrupt(String),
    #[error("Lock poisoned")]
    Poisoned,
}

/// Durable issuer, endpoint and reader-identity state.
///
/// Every call is atomic with respect to other calls on the same store, so the reader
/// thread and the accessory callbacks may share one instance behind an `Arc`.
pub trait CredentialStore: Send + Sync {
    fn reader_identity(&self) -> Result<ReaderIdentity, StoreError>;
    fn set_reader_identity(&self, identity: ReaderIdentity) -> Result<(), StoreError>;

    fn issuers(&self) -> Result<Vec<Issuer>, StoreError>;
    fn issuer_by_id(&self, id: &IssuerId) -> Result<Option<Issuer>, StoreError>;
    fn upsert_issuer(&self, issuer: Issuer) -> Result<(), StoreError>;
    fn upsert_issuers(&self, issuers: &[Issuer]) -> Result<(), StoreError>;
    /// Returns `false` if no such issuer was stored.
    fn remove_issuer(&self, id: &IssuerId) -> Result<bool, StoreError>;

    /// Find an endpoint by its tagged public key, together with its owning issuer.
    fn endpoint_by_public_key(
        &self,
        public_key: &[u8],
    ) -> Result<Option<(IssuerId, Endpoint)>, StoreError>;
    /// Returns `false` if the issuer does not exist; the endpoint is not stored then.
    fn upsert_endpoint(&self, issuer: &IssuerId, endpoint: Endpoint) -> Result<bool, StoreError>;
}
