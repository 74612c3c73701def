use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use homekey_reader::reader::{
    self, Activation, Authenticated, AuthenticationRequest, Authenticator, CancelToken,
    CycleOutcome, DiscoveryBeacon, EndpointObserver, Flow, Frontend, IsoDepTag, NfcError,
    ProtocolError, ReaderSettings, RemoteTarget, SupervisorError, TransactionSupervisor,
};
use homekey_reader::store::{
    CredentialStore, Endpoint, EndpointId, Enrollments, FileStore, Issuer, IssuerId, KeyType,
    ReaderIdentity, StoreError,
};

const TAG_UID: [u8; 4] = [0x08, 0x01, 0x02, 0x03];

// ---------------------------------------------------------------------------
// Store

/// File store that can be told to fail issuer writes.
struct InstrumentedStore {
    inner:       FileStore,
    fail_writes: AtomicBool,
}

impl CredentialStore for InstrumentedStore {
    fn reader_identity(&self) -> Result<ReaderIdentity, StoreError> {
        self.inner.reader_identity()
    }

    fn set_reader_identity(&self, identity: ReaderIdentity) -> Result<(), StoreError> {
        self.inner.set_reader_identity(identity)
    }

    fn issuers(&self) -> Result<Vec<Issuer>, StoreError> {
        self.inner.issuers()
    }

    fn issuer_by_id(&self, id: &IssuerId) -> Result<Option<Issuer>, StoreError> {
        self.inner.issuer_by_id(id)
    }

    fn upsert_issuer(&self, issuer: Issuer) -> Result<(), StoreError> {
        self.inner.upsert_issuer(issuer)
    }

    fn upsert_issuers(&self, issuers: &[Issuer]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("disk full".into()));
        }
        self.inner.upsert_issuers(issuers)
    }

    fn remove_issuer(&self, id: &IssuerId) -> Result<bool, StoreError> {
        self.inner.remove_issuer(id)
    }

    fn endpoint_by_public_key(
        &self,
        public_key: &[u8],
    ) -> Result<Option<(IssuerId, Endpoint)>, StoreError> {
        self.inner.endpoint_by_public_key(public_key)
    }

    fn upsert_endpoint(&self, issuer: &IssuerId, endpoint: Endpoint) -> Result<bool, StoreError> {
        self.inner.upsert_endpoint(issuer, endpoint)
    }
}

fn endpoint_key() -> Vec<u8> {
    let mut key = vec![0x04];
    key.extend([0xE1; 64]);
    key
}

fn store(dir: &tempfile::TempDir, provisioned: bool) -> Arc<InstrumentedStore> {
    let inner = FileStore::load([0x10; 32], dir.path().to_path_buf()).unwrap();
    if provisioned {
        inner
            .set_reader_identity(ReaderIdentity { private_key: [0x11; 32], unique_identifier: [0x22; 8] })
            .unwrap();
    }
    let mut issuer = Issuer::new(vec![0xA1; 32]);
    issuer.upsert_endpoint(Endpoint {
        last_used_at: 0,
        counter: 0,
        key_type: KeyType::Secp256r1,
        public_key: endpoint_key(),
        persistent_key: [0x55; 32],
        enrollments: Enrollments::default(),
    });
    inner.upsert_issuer(issuer).unwrap();
    Arc::new(InstrumentedStore { inner, fail_writes: AtomicBool::new(false) })
}

// ---------------------------------------------------------------------------
// Frontend

#[derive(Default)]
struct FrontendStats {
    opens:            AtomicUsize,
    senses:           AtomicUsize,
    departure_checks: AtomicUsize,
    beacons:          Mutex<Vec<DiscoveryBeacon>>,
}

#[derive(Clone, Copy)]
enum Planned {
    Nothing,
    /// ISO-DEP tag that stays in the field for `lingers` presence checks.
    IsoDep { lingers: usize },
    /// Non-ISO-DEP target that stays for `lingers` departure polls.
    Unsupported { lingers: usize },
}

struct MockFrontend {
    stats:   Arc<FrontendStats>,
    plan:    VecDeque<Planned>,
    pending: Option<Planned>,
    lingers: usize,
}

impl MockFrontend {
    fn new(stats: Arc<FrontendStats>, plan: impl IntoIterator<Item = Planned>) -> Self {
        Self { stats, plan: plan.into_iter().collect(), pending: None, lingers: 0 }
    }
}

impl Frontend for MockFrontend {
    fn open(&mut self) -> Result<(), NfcError> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sense(&mut self, beacon: Option<&DiscoveryBeacon>) -> Result<Option<RemoteTarget>, NfcError> {
        let target = RemoteTarget { identifier: TAG_UID.to_vec() };
        let Some(beacon) = beacon else {
            self.stats.departure_checks.fetch_add(1, Ordering::SeqCst);
            if self.lingers > 0 {
                self.lingers -= 1;
                return Ok(Some(target));
            }
            return Ok(None);
        };

        self.stats.senses.fetch_add(1, Ordering::SeqCst);
        self.stats.beacons.lock().unwrap().push(beacon.clone());
        match self.plan.pop_front().unwrap_or(Planned::Nothing) {
            Planned::Nothing => Ok(None),
            planned => {
                self.pending = Some(planned);
                Ok(Some(target))
            }
        }
    }

    fn activate(&mut self, target: &RemoteTarget) -> Result<Activation, NfcError> {
        match self.pending.take() {
            Some(Planned::IsoDep { lingers }) => Ok(Activation::IsoDep(Box::new(MockTag {
                identifier: target.identifier.clone(),
                lingers,
            }))),
            Some(Planned::Unsupported { lingers }) => {
                self.lingers = lingers;
                Ok(Activation::Unsupported { identifier: target.identifier.clone() })
            }
            _ => Err(NfcError::Communication("no target".into())),
        }
    }
}

struct MockTag {
    identifier: Vec<u8>,
    lingers:    usize,
}

impl IsoDepTag for MockTag {
    fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    fn transceive(&mut self, _apdu: &[u8]) -> Result<Vec<u8>, NfcError> {
        Ok(vec![0x90, 0x00])
    }

    fn is_present(&mut self) -> bool {
        if self.lingers > 0 {
            self.lingers -= 1;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Authenticator

enum Reply {
    /// Bump the first endpoint's counter and report it.
    Bump,
    Reject,
    Panic,
}

struct Seen {
    issuers:            usize,
    reader_identifier:  [u8; 16],
    flow:               Flow,
    key_size:           usize,
    preferred_versions: Vec<[u8; 2]>,
}

struct ScriptedAuthenticator {
    replies:  VecDeque<Reply>,
    requests: Arc<Mutex<Vec<Seen>>>,
}

impl ScriptedAuthenticator {
    fn new(replies: impl IntoIterator<Item = Reply>) -> (Self, Arc<Mutex<Vec<Seen>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        (Self { replies: replies.into_iter().collect(), requests: requests.clone() }, requests)
    }
}

impl Authenticator for ScriptedAuthenticator {
    fn authenticate(
        &mut self,
        tag: &mut dyn IsoDepTag,
        request: AuthenticationRequest<'_>,
    ) -> Result<Authenticated, ProtocolError> {
        self.requests.lock().unwrap().push(Seen {
            issuers: request.issuers.len(),
            reader_identifier: request.reader_identifier,
            flow: request.flow,
            key_size: request.key_size,
            preferred_versions: request.preferred_versions.to_vec(),
        });
        tag.transceive(&[0x00, 0xA4, 0x04, 0x00])
            .map_err(|e| ProtocolError(e.to_string()))?;

        match self.replies.pop_front().unwrap_or(Reply::Reject) {
            Reply::Bump => {
                let mut issuer = request.issuers[0].clone();
                let endpoint = &mut issuer.endpoints[0];
                endpoint.counter += 1;
                endpoint.last_used_at = 1_700_000_123;
                let endpoint = endpoint.clone();
                Ok(Authenticated { flow: request.flow, issuers: vec![issuer], endpoint: Some(endpoint) })
            }
            Reply::Reject => Err(ProtocolError("no matching endpoint".into())),
            Reply::Panic => panic!("handshake bug"),
        }
    }
}

// ---------------------------------------------------------------------------
// Observer

/// Records the counter the store holds at the moment of notification.
struct StoreCheckingObserver {
    store: Arc<InstrumentedStore>,
    tx:    Mutex<mpsc::Sender<(EndpointId, u32)>>,
}

impl EndpointObserver for StoreCheckingObserver {
    fn on_endpoint_authenticated(&self, endpoint: &Endpoint) {
        let (_, stored) = self
            .store
            .endpoint_by_public_key(&endpoint.public_key)
            .unwrap()
            .expect("endpoint persisted before notification");
        let _ = self.tx.lock().unwrap().send((endpoint.id(), stored.counter));
    }
}

fn observer(
    store: &Arc<InstrumentedStore>,
) -> (Arc<dyn EndpointObserver>, mpsc::Receiver<(EndpointId, u32)>) {
    let (tx, rx) = mpsc::channel();
    (Arc::new(StoreCheckingObserver { store: store.clone(), tx: Mutex::new(tx) }), rx)
}

fn fast_settings() -> ReaderSettings {
    ReaderSettings {
        express: true,
        flow: Flow::Standard,
        throttle_polling: Duration::from_millis(10),
        field_poll_interval: Duration::from_millis(5),
        settle_delay: Duration::ZERO,
        exception_delay: Duration::from_millis(10),
    }
}

// ---------------------------------------------------------------------------
// Tests

#[test]
fn test_unprovisioned_reader_refuses_to_start_without_io() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, false);
    let stats = Arc::new(FrontendStats::default());
    let (auth, requests) = ScriptedAuthenticator::new([]);
    let supervisor = TransactionSupervisor::new(
        MockFrontend::new(stats.clone(), [Planned::IsoDep { lingers: 0 }]),
        auth,
        store,
        Vec::new(),
        fast_settings(),
    );

    let err = reader::start(supervisor, CancelToken::new()).unwrap_err();
    assert!(matches!(err, SupervisorError::NotProvisioned));
    assert!(err.is_configuration());
    assert_eq!(stats.opens.load(Ordering::SeqCst), 0);
    assert_eq!(stats.senses.load(Ordering::SeqCst), 0);
    assert!(requests.lock().unwrap().is_empty());
}

#[test]
fn test_empty_field_polls_are_throttled() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, true);
    let stats = Arc::new(FrontendStats::default());
    let (auth, _) = ScriptedAuthenticator::new([]);
    let settings = ReaderSettings { throttle_polling: Duration::from_millis(100), ..fast_settings() };
    let mut supervisor =
        TransactionSupervisor::new(MockFrontend::new(stats.clone(), []), auth, store, Vec::new(), settings);

    let token = CancelToken::new();
    let started = Instant::now();
    for _ in 0..10 {
        assert_eq!(supervisor.cycle(&token).unwrap(), CycleOutcome::NoTarget);
    }
    let elapsed = started.elapsed();

    assert_eq!(stats.senses.load(Ordering::SeqCst), 10);
    assert!(elapsed >= Duration::from_millis(1000), "took {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2000), "took {elapsed:?}");
}

#[test]
fn test_beacon_carries_group_identifier() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, true);
    let group = store.reader_identity().unwrap().group_identifier().unwrap();
    let stats = Arc::new(FrontendStats::default());
    let (auth, _) = ScriptedAuthenticator::new([]);
    let mut supervisor =
        TransactionSupervisor::new(MockFrontend::new(stats.clone(), []), auth, store, Vec::new(), fast_settings());

    supervisor.cycle(&CancelToken::new()).unwrap();
    let beacons = stats.beacons.lock().unwrap();
    assert_eq!(beacons.as_slice(), &[DiscoveryBeacon { group_identifier: group, express: true }]);
}

#[test]
fn test_endpoint_is_persisted_before_notification() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, true);
    let reader_identifier = store.reader_identity().unwrap().reader_identifier().unwrap();
    let stats = Arc::new(FrontendStats::default());
    let (auth, requests) = ScriptedAuthenticator::new([Reply::Bump]);
    let (observer, rx) = observer(&store);
    let mut supervisor = TransactionSupervisor::new(
        MockFrontend::new(stats.clone(), [Planned::IsoDep { lingers: 2 }]),
        auth,
        store.clone(),
        vec![observer],
        fast_settings(),
    );

    let outcome = supervisor.cycle(&CancelToken::new()).unwrap();
    let (_, stored) = store.endpoint_by_public_key(&endpoint_key()).unwrap().unwrap();
    assert_eq!(outcome, CycleOutcome::Authenticated(Some(stored.id())));
    assert_eq!(stored.counter, 1);
    assert_eq!(stored.last_used_at, 1_700_000_123);

    // The observer saw the bumped counter already in the store.
    assert_eq!(rx.try_recv().unwrap(), (stored.id(), 1));

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].issuers, 1);
    assert_eq!(requests[0].reader_identifier, reader_identifier);
    assert_eq!(requests[0].flow, Flow::Standard);
    assert_eq!(requests[0].key_size, 16);
    assert_eq!(requests[0].preferred_versions, vec![[0x02, 0x00]]);
}

#[test]
fn test_protocol_failure_does_not_notify_and_loop_continues() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, true);
    let before = store.issuers().unwrap();
    let stats = Arc::new(FrontendStats::default());
    let (auth, _) = ScriptedAuthenticator::new([Reply::Reject]);
    let (observer, rx) = observer(&store);
    let mut supervisor = TransactionSupervisor::new(
        MockFrontend::new(stats.clone(), [Planned::IsoDep { lingers: 0 }]),
        auth,
        store.clone(),
        vec![observer],
        fast_settings(),
    );

    let token = CancelToken::new();
    assert_eq!(supervisor.cycle(&token).unwrap(), CycleOutcome::Rejected);
    assert_eq!(supervisor.cycle(&token).unwrap(), CycleOutcome::NoTarget);
    assert!(rx.try_recv().is_err());
    assert_eq!(store.issuers().unwrap(), before);
}

#[test]
fn test_persist_failure_skips_notification() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, true);
    store.fail_writes.store(true, Ordering::SeqCst);
    let stats = Arc::new(FrontendStats::default());
    let (auth, _) = ScriptedAuthenticator::new([Reply::Bump]);
    let (observer, rx) = observer(&store);
    let mut supervisor = TransactionSupervisor::new(
        MockFrontend::new(stats, [Planned::IsoDep { lingers: 0 }]),
        auth,
        store.clone(),
        vec![observer],
        fast_settings(),
    );

    assert_eq!(supervisor.cycle(&CancelToken::new()).unwrap(), CycleOutcome::PersistFailed);
    assert!(rx.try_recv().is_err());
    let (_, stored) = store.endpoint_by_public_key(&endpoint_key()).unwrap().unwrap();
    assert_eq!(stored.counter, 0);
}

#[test]
fn test_unsupported_target_waits_for_departure() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, true);
    let stats = Arc::new(FrontendStats::default());
    let (auth, requests) = ScriptedAuthenticator::new([]);
    let mut supervisor = TransactionSupervisor::new(
        MockFrontend::new(stats.clone(), [Planned::Unsupported { lingers: 2 }]),
        auth,
        store,
        Vec::new(),
        fast_settings(),
    );

    assert_eq!(supervisor.cycle(&CancelToken::new()).unwrap(), CycleOutcome::Unsupported);
    assert_eq!(stats.departure_checks.load(Ordering::SeqCst), 3);
    assert!(requests.lock().unwrap().is_empty());
}

#[test]
fn test_cancelled_token_stops_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, true);
    let stats = Arc::new(FrontendStats::default());
    let (auth, _) = ScriptedAuthenticator::new([]);
    let mut supervisor =
        TransactionSupervisor::new(MockFrontend::new(stats.clone(), []), auth, store, Vec::new(), fast_settings());

    let token = CancelToken::new();
    token.cancel();
    assert_eq!(supervisor.cycle(&token).unwrap(), CycleOutcome::Stopped);
    assert_eq!(stats.senses.load(Ordering::SeqCst), 0);
}

#[test]
fn test_runner_survives_panicking_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, true);
    let stats = Arc::new(FrontendStats::default());
    let (auth, requests) = ScriptedAuthenticator::new([Reply::Panic, Reply::Bump]);
    let (observer, rx) = observer(&store);
    let supervisor = TransactionSupervisor::new(
        MockFrontend::new(
            stats.clone(),
            [Planned::IsoDep { lingers: 0 }, Planned::Nothing, Planned::IsoDep { lingers: 0 }],
        ),
        auth,
        store.clone(),
        vec![observer],
        fast_settings(),
    );

    let mut runner = reader::start(supervisor, CancelToken::new()).unwrap();
    let (_, counter) = rx.recv_timeout(Duration::from_secs(5)).expect("endpoint notification");
    assert_eq!(counter, 1);

    runner.stop();
    assert!(runner.is_finished());
    assert_eq!(stats.opens.load(Ordering::SeqCst), 1);
    assert_eq!(requests.lock().unwrap().len(), 2);
}

#[test]
fn test_key_removed_mid_run_is_retried_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir, true);
    let provisioned = store.reader_identity().unwrap();
    let stats = Arc::new(FrontendStats::default());
    let (auth, _) = ScriptedAuthenticator::new([]);
    let supervisor = TransactionSupervisor::new(
        MockFrontend::new(stats.clone(), []),
        auth,
        store.clone(),
        Vec::new(),
        fast_settings(),
    );
    let mut runner = reader::start(supervisor, CancelToken::new()).unwrap();

    // Every cycle now fails with NotProvisioned; the runner backs off instead of exiting.
    store.set_reader_identity(ReaderIdentity::default()).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(!runner.is_finished());
    let senses_while_unset = stats.senses.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(stats.senses.load(Ordering::SeqCst), senses_while_unset);

    store.set_reader_identity(provisioned).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while stats.senses.load(Ordering::SeqCst) == senses_while_unset && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(stats.senses.load(Ordering::SeqCst) > senses_while_unset);

    runner.stop();
    assert!(runner.is_finished());
}
