use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use clap::Parser;
use homekey_reader::accessory::PairingSource;
use homekey_reader::config::Config;
use homekey_reader::lock::{LockMechanism, LockState, TriggerError, TriggerSource, UnlockHook};
use homekey_reader::reader::{
    Activation, Authenticated, AuthenticationRequest, Authenticator, DiscoveryBeacon, Frontend,
    IsoDepTag, NfcError, ProtocolError, RemoteTarget,
};
use homekey_reader::store::{
    CredentialStore, Endpoint, EndpointId, Enrollments, FileStore, Issuer, KeyType, ReaderIdentity,
};
use homekey_reader::{Integration, NfcAccessService};

const ISSUER_KEY: [u8; 32] = [0xA1; 32];

fn config(dir: &tempfile::TempDir) -> Config {
    let data_dir = dir.path().to_str().unwrap();
    Config::parse_from(["homekey-reader", "--data-dir", data_dir, "--throttle-polling-ms", "10"])
}

fn endpoint() -> Endpoint {
    let mut public_key = vec![0x04];
    public_key.extend([0xE1; 64]);
    Endpoint {
        last_used_at: 0,
        counter: 0,
        key_type: KeyType::Secp256r1,
        public_key,
        persistent_key: [0x55; 32],
        enrollments: Enrollments::default(),
    }
}

fn prepare_store(dir: &tempfile::TempDir, provisioned: bool) {
    let store = FileStore::open(dir.path().to_path_buf()).unwrap();
    if provisioned {
        store
            .set_reader_identity(ReaderIdentity { private_key: [0x11; 32], unique_identifier: [0x22; 8] })
            .unwrap();
    }
    let mut issuer = Issuer::new(ISSUER_KEY.to_vec());
    issuer.upsert_endpoint(endpoint());
    store.upsert_issuer(issuer).unwrap();
}

struct Pairings;

impl PairingSource for Pairings {
    fn paired_public_keys(&self) -> BTreeSet<Vec<u8>> {
        BTreeSet::from([ISSUER_KEY.to_vec()])
    }
}

/// Presents one ISO-DEP tag on the first poll, then an empty field.
struct OneTagFrontend {
    presented: bool,
}

impl Frontend for OneTagFrontend {
    fn open(&mut self) -> Result<(), NfcError> {
        Ok(())
    }

    fn sense(&mut self, beacon: Option<&DiscoveryBeacon>) -> Result<Option<RemoteTarget>, NfcError> {
        if beacon.is_none() || self.presented {
            return Ok(None);
        }
        self.presented = true;
        Ok(Some(RemoteTarget { identifier: vec![0x08, 0x01, 0x02, 0x03] }))
    }

    fn activate(&mut self, target: &RemoteTarget) -> Result<Activation, NfcError> {
        Ok(Activation::IsoDep(Box::new(GoneTag(target.identifier.clone()))))
    }
}

struct GoneTag(Vec<u8>);

impl IsoDepTag for GoneTag {
    fn identifier(&self) -> &[u8] {
        &self.0
    }

    fn transceive(&mut self, _apdu: &[u8]) -> Result<Vec<u8>, NfcError> {
        Ok(vec![0x90, 0x00])
    }

    fn is_present(&mut self) -> bool {
        false
    }
}

struct AcceptFirstEndpoint;

impl Authenticator for AcceptFirstEndpoint {
    fn authenticate(
        &mut self,
        _tag: &mut dyn IsoDepTag,
        request: AuthenticationRequest<'_>,
    ) -> Result<Authenticated, ProtocolError> {
        let mut issuer = request.issuers.first().cloned().ok_or_else(|| ProtocolError("no issuers".into()))?;
        let endpoint = issuer.endpoints.first_mut().ok_or_else(|| ProtocolError("no endpoints".into()))?;
        endpoint.counter += 1;
        let endpoint = endpoint.clone();
        Ok(Authenticated { flow: request.flow, issuers: vec![issuer], endpoint: Some(endpoint) })
    }
}

struct RecordingHook(Mutex<mpsc::Sender<Option<EndpointId>>>);

impl UnlockHook for RecordingHook {
    fn on_unlock(&self, endpoint: Option<&Endpoint>) {
        let _ = self.0.lock().unwrap().send(endpoint.map(Endpoint::id));
    }
}

struct ChannelTriggers(mpsc::Receiver<String>);

impl TriggerSource for ChannelTriggers {
    fn recv(&mut self, timeout: Duration) -> Result<Option<String>, TriggerError> {
        match self.0.recv_timeout(timeout) {
            Ok(payload) => Ok(Some(payload)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(TriggerError("closed".into())),
        }
    }
}

fn integration(
    hooks: Vec<Arc<dyn UnlockHook>>,
    triggers: Option<Box<dyn TriggerSource>>,
) -> Integration<OneTagFrontend, AcceptFirstEndpoint> {
    Integration {
        frontend: OneTagFrontend { presented: false },
        authenticator: AcceptFirstEndpoint,
        observers: Vec::new(),
        pairings: Arc::new(Pairings),
        unlock_hooks: hooks,
        door: None,
        triggers,
    }
}

#[tokio::test]
async fn test_run_until_reaches_on_ready_and_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    prepare_store(&dir, true);

    let ready = AtomicBool::new(false);
    homekey_reader::run_until(
        config(&dir),
        integration(Vec::new(), None),
        |service: Arc<NfcAccessService>, lock: Arc<LockMechanism>| {
            assert_eq!(service.configuration_state().unwrap(), 0);
            assert_eq!(lock.target_state(), LockState::Secured);
            ready.store(true, Ordering::SeqCst);
        },
        async {},
    )
    .await
    .unwrap();

    assert!(ready.load(Ordering::SeqCst));

    let store = FileStore::open(dir.path().to_path_buf()).unwrap();
    assert_eq!(store.issuer_count(), 1);
}

#[tokio::test]
async fn test_run_until_refuses_unprovisioned_reader() {
    let dir = tempfile::tempdir().unwrap();
    prepare_store(&dir, false);

    let ready = AtomicBool::new(false);
    let result = homekey_reader::run_until(
        config(&dir),
        integration(Vec::new(), None),
        |_, _| ready.store(true, Ordering::SeqCst),
        async {},
    )
    .await;

    assert!(result.is_err());
    assert!(!ready.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_authentication_and_trigger_fire_the_same_unlock_hooks() {
    let dir = tempfile::tempdir().unwrap();
    prepare_store(&dir, true);

    let (unlocks_tx, unlocks) = mpsc::channel();
    let hook: Arc<dyn UnlockHook> = Arc::new(RecordingHook(Mutex::new(unlocks_tx)));
    let (trigger_tx, trigger_rx) = mpsc::channel();
    let lock_slot: Arc<Mutex<Option<Arc<LockMechanism>>>> = Arc::default();

    let slot = lock_slot.clone();
    let shutdown = async move {
        tokio::task::spawn_blocking(move || {
            let first = unlocks.recv_timeout(Duration::from_secs(5)).expect("unlock after authentication");
            assert_eq!(first, Some(endpoint().id()));

            let lock = slot.lock().unwrap().clone().expect("lock handed out by on_ready");
            // Ignored while secured.
            trigger_tx.send("trigger".to_string()).unwrap();
            assert!(unlocks.recv_timeout(Duration::from_millis(500)).is_err());

            lock.set_target_state(LockState::Unsecured);
            trigger_tx.send("trigger".to_string()).unwrap();
            let second = unlocks.recv_timeout(Duration::from_secs(5)).expect("unlock after trigger");
            assert_eq!(second, None);
        })
        .await
        .unwrap();
    };

    homekey_reader::run_until(
        config(&dir),
        integration(vec![hook], Some(Box::new(ChannelTriggers(trigger_rx)))),
        |_, lock| *lock_slot.lock().unwrap() = Some(lock),
        shutdown,
    )
    .await
    .unwrap();
}
