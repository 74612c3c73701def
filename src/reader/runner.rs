use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::Duration;

use super::CancelToken;

#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    /// Pause after a normal return before the target is invoked again.
    pub delay:           Duration,
    /// Pause after the target failed or panicked.
    pub exception_delay: Duration,
}

/// Runs a target on a dedicated thread and restarts it after errors or panics until
/// stopped.
#[derive(Debug)]
pub struct Runner {
    name:   String,
    token:  CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl Runner {
    pub fn start<F, E>(
        name: &str,
        token: CancelToken,
        options: RunnerOptions,
        mut target: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut(&CancelToken) -> Result<(), E> + Send + 'static,
        E: Display,
    {
        let thread_token = token.clone();
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new().name(name.to_string()).spawn(move || {
            tracing::info!(runner = %thread_name, "Runner started");
            while thread_token.is_alive() {
                let result = panic::catch_unwind(AssertUnwindSafe(|| target(&thread_token)));
                let delay = match result {
                    Ok(Ok(())) => options.delay,
                    Ok(Err(e)) => {
                        tracing::error!(
                            runner = %thread_name,
                            error = %e,
                            retry_in_ms = options.exception_delay.as_millis(),
                            "Runner target failed"
                        );
                        options.exception_delay
                    }
                    Err(payload) => {
                        tracing::error!(
                            runner = %thread_name,
                            panic = panic_message(&*payload),
                            retry_in_ms = options.exception_delay.as_millis(),
                            "Runner target panicked"
                        );
                        options.exception_delay
                    }
                };
                thread_token.sleep(delay);
            }
            tracing::info!(runner = %thread_name, "Runner stopped");
        })?;

        Ok(Self { name: name.to_string(), token, handle: Some(handle) })
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signal the worker to stop and wait for it. The in-flight iteration completes
    /// first.
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(runner = %self.name, "Runner thread panicked outside of its target");
            }
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
