//! Ctrl-C handling for the chat REPL.
//!
//! Installing a signal listener replaces the default SIGINT behavior for the
//! rest of the process, so one listener serves the whole session: Ctrl-C
//! cancels the turn in flight, or exits when the prompt is idle.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Exit status for termination by SIGINT.
const INTERRUPTED_EXIT: i32 = 130;

#[derive(Clone, Default)]
pub struct Interrupt {
    in_flight: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupt {
    /// Start the listener.
    pub fn install() -> Self {
        let interrupt = Self::default();
        let listener = interrupt.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !listener.cancel_in_flight() {
                    println!();
                    std::process::exit(INTERRUPTED_EXIT);
                }
            }
        });
        interrupt
    }

    /// Mark a turn as running; Ctrl-C cancels the returned token.
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.slot() = Some(token.clone());
        token
    }

    /// Back to idle.
    pub fn end(&self) {
        *self.slot() = None;
    }

    /// Cancel the running turn. False when idle.
    fn cancel_in_flight(&self) -> bool {
        match self.slot().as_ref() {
            Some(token) => {
                debug!("interrupting turn");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        // A poisoned slot still holds a usable token.
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
