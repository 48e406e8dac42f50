//! SIGINT/SIGTERM handling
//!
//! The first signal cancels the run: the converger stops before its next
//! resource and [`crate::runner`] terminates the in-flight child. A terminal
//! SIGINT reaches the child through the process group as well; a SIGTERM
//! sent to our pid alone is forwarded by the runner.

use anyhow::{Result, bail};
use convergence::CancelToken;
use std::sync::OnceLock;

static TOKEN: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn on_signal(_signum: libc::c_int) {
    // Only an atomic store; safe inside a signal handler
    if let Some(token) = TOKEN.get() {
        token.cancel();
    }
}

/// The token signal handlers cancel, once [`install`] ran
pub fn token() -> Option<CancelToken> {
    TOKEN.get().cloned()
}

/// Install handlers and return the token they cancel
pub fn install() -> Result<CancelToken> {
    let token = TOKEN.get_or_init(CancelToken::new).clone();

    for signum in [libc::SIGINT, libc::SIGTERM] {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        // SAFETY: the handler only performs an atomic store
        let previous = unsafe { libc::signal(signum, handler) };
        if previous == libc::SIG_ERR {
            bail!("Failed to install handler for signal {signum}");
        }
    }
    Ok(token)
}
