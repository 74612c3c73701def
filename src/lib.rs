pub mod accessory;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod error;
pub mod lock;
pub mod pairing;
pub mod reader;
pub mod store;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use accessory::{NfcAccessService, PairingSource};
pub use error::{Error, Result};
pub use lock::LockMechanism;

use lock::{DoorStatus, TriggerSource, UnlockHook};
use reader::{Authenticator, CancelToken, EndpointObserver, Frontend, TransactionSupervisor};
use store::{CredentialStore, FileStore, hex};

const LOCK_FILE: &str = "homekey-reader.lock";

/// Install the global `tracing` subscriber. A no-op if one is already installed.
pub fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .try_init();
}

fn open_lock(data_dir: &Path) -> anyhow::Result<fd_lock::RwLock<std::fs::File>> {
    std::fs::create_dir_all(data_dir)?;
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(data_dir.join(LOCK_FILE))?;
    Ok(fd_lock::RwLock::new(lock_file))
}

fn already_running(data_dir: &Path) -> anyhow::Error {
    anyhow::anyhow!(
        "homekey-reader is already running (lock: {})",
        data_dir.join(LOCK_FILE).display()
    )
}

async fn open_store(data_dir: PathBuf) -> anyhow::Result<Arc<FileStore>> {
    let store = tokio::task::spawn_blocking(move || FileStore::open(data_dir))
        .await?
        .map_err(|e| anyhow::anyhow!("Failed to load credential store: {e}"))?;
    tracing::info!(
        issuers = store.issuer_count(),
        endpoints = store.endpoint_count(),
        "Credential store loaded"
    );
    Ok(Arc::new(store))
}

/// Delete the reader identity and every issuer.
pub async fn wipe(cfg: config::Config) -> anyhow::Result<()> {
    let data_dir = cfg.data_dir()?;
    let mut lock = open_lock(&data_dir)?;
    let _guard = lock.try_write().map_err(|_| already_running(&data_dir))?;

    let store = open_store(data_dir.clone()).await?;
    let count = tokio::task::spawn_blocking(move || -> Result<usize> {
        let mut count = 0usize;
        for issuer in store.issuers()? {
            if store.remove_issuer(&issuer.id())? {
                count += 1;
            }
        }
        store.set_reader_identity(store::ReaderIdentity::default())?;
        Ok(count)
    })
    .await??;

    println!("Deleted {count} issuer(s) from {}", data_dir.display());
    println!("Reader key cleared (provision again through the control point)");
    Ok(())
}

/// Print the reader identity and the stored issuers.
pub async fn dump(cfg: config::Config) -> anyhow::Result<()> {
    let data_dir = cfg.data_dir()?;
    let mut lock = open_lock(&data_dir)?;
    let _guard = lock.try_write().map_err(|_| already_running(&data_dir))?;

    let store = open_store(data_dir).await?;
    let reader = store.reader_identity()?;
    match reader.group_identifier() {
        Some(group) => println!(
            "Reader group {} unique {}",
            hex(&group),
            hex(&reader.unique_identifier)
        ),
        None => println!("Reader key not provisioned"),
    }

    for issuer in store.issuers()? {
        println!("Issuer {} ({} endpoint(s))", issuer.id(), issuer.endpoints.len());
        for endpoint in &issuer.endpoints {
            println!(
                "  Endpoint {} counter={} last_used_at={} hap={}",
                endpoint.id(),
                endpoint.counter,
                endpoint.last_used_at,
                endpoint.enrollments.hap.is_some()
            );
        }
    }
    Ok(())
}

/// Apply one base64 control-point request offline and print the response.
pub async fn apply_control_point(cfg: config::Config, value: String) -> anyhow::Result<()> {
    let data_dir = cfg.data_dir()?;
    let mut lock = open_lock(&data_dir)?;
    let _guard = lock.try_write().map_err(|_| already_running(&data_dir))?;

    let store: Arc<dyn CredentialStore> = open_store(data_dir).await?;
    let response = tokio::task::spawn_blocking(move || {
        control::ControlPoint::new(store).handle_base64(&value)
    })
    .await?
    .map_err(|e| anyhow::anyhow!("Control point request rejected: {e}"))?;
    println!("{response}");
    Ok(())
}

/// Device-specific parts supplied by the integration.
pub struct Integration<F, A> {
    pub frontend:      F,
    pub authenticator: A,
    pub observers:     Vec<Arc<dyn EndpointObserver>>,
    pub pairings:      Arc<dyn PairingSource>,
    /// Run on every unlock, by NFC authentication or by remote trigger.
    pub unlock_hooks:  Vec<Arc<dyn UnlockHook>>,
    pub door:          Option<Arc<dyn DoorStatus>>,
    pub triggers:      Option<Box<dyn TriggerSource>>,
}

/// Run the reader until Ctrl-C.
pub async fn run<F, A>(
    cfg: config::Config,
    integration: Integration<F, A>,
    on_ready: impl FnOnce(Arc<NfcAccessService>, Arc<LockMechanism>),
) -> anyhow::Result<()>
where
    F: Frontend + 'static,
    A: Authenticator + 'static,
{
    run_until(cfg, integration, on_ready, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to wait for Ctrl-C");
        }
    })
    .await
}

/// Run the reader until `shutdown` resolves.
///
/// `on_ready` receives the NFC Access service and the lock once the store is loaded and
/// the reader thread is running; the accessory layer forwards characteristic access to
/// them.
pub async fn run_until<F, A>(
    cfg: config::Config,
    integration: Integration<F, A>,
    on_ready: impl FnOnce(Arc<NfcAccessService>, Arc<LockMechanism>),
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()>
where
    F: Frontend + 'static,
    A: Authenticator + 'static,
{
    init_tracing(cfg.verbose);
    tracing::info!("Starting homekey-reader");

    let data_dir = cfg.data_dir()?;
    diagnostics::check(&cfg, &data_dir)?;

    let mut lock_file = open_lock(&data_dir)?;
    let _guard = lock_file.try_write().map_err(|_| already_running(&data_dir))?;

    let store: Arc<dyn CredentialStore> = open_store(data_dir).await?;
    let service = Arc::new(NfcAccessService::new(
        store.clone(),
        integration.pairings,
        cfg.hardware_finish(),
    ));
    // Bring issuers in line with the pairings before the first transaction.
    service.on_unpair()?;

    let lock = Arc::new(LockMechanism::new(
        cfg.lock_state_at_startup(),
        integration.door,
        integration.unlock_hooks,
    ));
    let mut observers = integration.observers;
    observers.push(lock.clone());

    let supervisor = TransactionSupervisor::new(
        integration.frontend,
        integration.authenticator,
        store,
        observers,
        cfg.reader_settings(),
    );
    let mut runner = reader::start(supervisor, CancelToken::new())
        .map_err(|e| anyhow::anyhow!("Failed to start reader: {e}"))?;
    let listener = match integration.triggers {
        Some(source) => Some(
            lock::listen(source, lock.clone(), CancelToken::new())
                .map_err(|e| anyhow::anyhow!("Failed to start trigger listener: {e}"))?,
        ),
        None => None,
    };
    on_ready(service, lock);

    shutdown.await;
    tracing::info!("Shutting down");
    tokio::task::spawn_blocking(move || {
        if let Some(mut listener) = listener {
            listener.stop();
        }
        runner.stop();
    })
    .await?;
    Ok(())
}
