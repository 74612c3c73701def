//! Lock mechanism exposed next to the NFC Access service.
//!
//! The reader does not drive a physical bolt. The lock state is bookkeeping for the
//! home-automation layer; an unlock is an [`UnlockHook`] firing, either after an NFC
//! authentication or on a remote trigger message.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::{EXCEPTION_DELAY_SECS, LOCK_VERSION, TRIGGER_PAYLOAD, TRIGGER_POLL_INTERVAL_MS};
use crate::reader::{CancelToken, EndpointObserver, Runner, RunnerOptions};
use crate::store::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LockState {
    Unsecured = 0,
    Secured = 1,
}

impl LockState {
    /// Startup target: anything but `unlocked` starts secured.
    pub fn from_startup(name: &str) -> Self {
        if name.eq_ignore_ascii_case("unlocked") {
            Self::Unsecured
        } else {
            Self::Secured
        }
    }
}

/// Reports whether the door is physically closed. `None` when unknown, e.g. the
/// sensor could not be reached.
pub trait DoorStatus: Send + Sync {
    fn is_closed(&self) -> Option<bool>;
}

/// Side effect of an unlock, such as an outbound webhook.
pub trait UnlockHook: Send + Sync {
    /// `endpoint` is `None` when the unlock came from a remote trigger.
    fn on_unlock(&self, endpoint: Option<&Endpoint>);
}

#[derive(Debug, thiserror::Error)]
#[error("trigger source: {0}")]
pub struct TriggerError(pub String);

/// Inbound message channel (an MQTT subscription, a socket, ...).
pub trait TriggerSource: Send {
    /// Wait up to `timeout` for the next message payload.
    fn recv(&mut self, timeout: Duration) -> Result<Option<String>, TriggerError>;
}

#[derive(Debug, Clone, Copy)]
struct States {
    current: LockState,
    target:  LockState,
}

pub struct LockMechanism {
    states: Mutex<States>,
    door:   Option<Arc<dyn DoorStatus>>,
    hooks:  Vec<Arc<dyn UnlockHook>>,
}

impl LockMechanism {
    /// The current state starts secured whatever the startup target is.
    pub fn new(
        startup: LockState,
        door: Option<Arc<dyn DoorStatus>>,
        hooks: Vec<Arc<dyn UnlockHook>>,
    ) -> Self {
        Self {
            states: Mutex::new(States { current: LockState::Secured, target: startup }),
            door,
            hooks,
        }
    }

    fn states(&self) -> States {
        *self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A known door position overrides the stored state: closed reads as secured.
    pub fn current_state(&self) -> LockState {
        match self.door.as_ref().and_then(|door| door.is_closed()) {
            Some(true) => LockState::Secured,
            Some(false) => LockState::Unsecured,
            None => self.states().current,
        }
    }

    pub fn target_state(&self) -> LockState {
        self.states().target
    }

    /// There is no actuator, so the current state follows the target immediately.
    pub fn set_target_state(&self, state: LockState) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.target = state;
        states.current = state;
        tracing::info!(state = ?state, "Lock target state set");
    }

    pub fn version(&self) -> &'static str {
        LOCK_VERSION
    }

    /// Lock control point writes are accepted and logged, nothing else.
    pub fn set_control_point(&self, value: &str) {
        tracing::info!(value, "Lock control point write");
    }

    /// Fire the unlock hooks for a remote message. Only the trigger payload counts, and
    /// only while the lock is unsecured. Returns whether the hooks ran.
    pub fn handle_trigger(&self, payload: &str) -> bool {
        if payload.trim() != TRIGGER_PAYLOAD {
            tracing::debug!(payload, "Ignoring message");
            return false;
        }
        let current = self.states().current;
        if current != LockState::Unsecured {
            tracing::info!(state = ?current, "Ignoring trigger while the lock is secured");
            return false;
        }
        tracing::info!("Remote trigger");
        self.fire(None);
        true
    }

    fn fire(&self, endpoint: Option<&Endpoint>) {
        for hook in &self.hooks {
            hook.on_unlock(endpoint);
        }
    }
}

impl EndpointObserver for LockMechanism {
    fn on_endpoint_authenticated(&self, endpoint: &Endpoint) {
        tracing::info!(endpoint = %endpoint.id(), "Unlocking for authenticated endpoint");
        self.fire(Some(endpoint));
    }
}

/// Forward messages from `source` to `lock` on a background runner until `token` is
/// cancelled. A failing source is restarted after the exception delay.
pub fn listen(
    mut source: Box<dyn TriggerSource>,
    lock: Arc<LockMechanism>,
    token: CancelToken,
) -> std::io::Result<Runner> {
    let options = RunnerOptions {
        delay: Duration::ZERO,
        exception_delay: Duration::from_secs(EXCEPTION_DELAY_SECS),
    };
    let poll = Duration::from_millis(TRIGGER_POLL_INTERVAL_MS);
    Runner::start("trigger", token, options, move |token| {
        while token.is_alive() {
            if let Some(payload) = source.recv(poll)? {
                lock.handle_trigger(&payload);
            }
        }
        Ok::<(), TriggerError>(())
    })
}
