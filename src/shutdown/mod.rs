// Process-exit teardown hooks
//
// One signal handler per process, fanning out to every registered hook.
// Hooks must be idempotent: the signal path and explicit teardown can race.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, Once, PoisonError};

use once_cell::sync::Lazy;
use tracing::{info, warn};

/// Token identifying one registered teardown hook.
///
/// Ids are never reused; unregistration consumes the token.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct HookId(u64);

type Hook = Box<dyn Fn() + Send>;

static HOOKS: Lazy<Mutex<HashMap<u64, Hook>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static INSTALL: Once = Once::new();

/// Register a teardown hook to run when the process receives an exit
/// signal. Installs the process-wide signal handler on first use.
pub fn register<F>(hook: F) -> HookId
where
    F: Fn() + Send + 'static,
{
    INSTALL.call_once(install_handler);

    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    HOOKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id, Box::new(hook));
    HookId(id)
}

/// Remove a previously registered hook. No-op if the hook already ran
/// (the signal path drains hooks as it invokes them).
pub fn unregister(id: HookId) {
    HOOKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id.0);
}

/// Invoke every registered hook, draining the registry.
///
/// The signal handler calls this before exiting; hosts that own their own
/// signal handling can call it from their shutdown path instead.
pub fn run_hooks() {
    let drained: Vec<Hook> = {
        let mut hooks = HOOKS.lock().unwrap_or_else(PoisonError::into_inner);
        hooks.drain().map(|(_, hook)| hook).collect()
    };

    for hook in drained {
        // One misbehaving hook must not block the rest of teardown
        if panic::catch_unwind(AssertUnwindSafe(&hook)).is_err() {
            warn!("Teardown hook panicked");
        }
    }
}

/// Install the Ctrl-C handler. The handler can only be claimed once per
/// process; if the host already owns it, teardown falls back to the
/// explicit and drop paths.
fn install_handler() {
    let result = ctrlc::set_handler(|| {
        info!("Exit signal received, running teardown hooks");
        run_hooks();
        std::process::exit(130);
    });

    if let Err(e) = result {
        warn!("Exit signal handler not installed: {}", e);
    }
}
