//! Process hardening for key material.
//!
//! Disables core dumps via `setrlimit(RLIMIT_CORE, 0)` so that a crash never
//! writes the spending key to disk. Best-effort: containers and unprivileged
//! users may not permit it, in which case a warning is printed.

use std::sync::atomic::{AtomicBool, Ordering};

static CORE_DUMPS_DISABLED: AtomicBool = AtomicBool::new(false);

/// Disable core dumps for the current process.
///
/// Returns `true` if core dumps are disabled. Call early, before any key is
/// loaded.
pub fn disable_core_dumps() -> bool {
    if CORE_DUMPS_DISABLED.swap(true, Ordering::SeqCst) {
        return true; // Already disabled
    }

    #[cfg(unix)]
    {
        // SAFETY: setrlimit with RLIMIT_CORE=0 is a standard POSIX operation
        let result = unsafe {
            let rlim = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            libc::setrlimit(libc::RLIMIT_CORE, &rlim)
        };
        if result != 0 {
            eprintln!(
                "[tapmemo] Warning: failed to disable core dumps: {}",
                std::io::Error::last_os_error()
            );
            return false;
        }
        true
    }

    #[cfg(not(unix))]
    {
        eprintln!("[tapmemo] Warning: core dump prevention not supported on this platform");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_core_dumps() {
        // May fail in sandboxes; must not panic
        let result = disable_core_dumps();
        eprintln!("Core dump disable result: {}", result);

        let result2 = disable_core_dumps();
        assert!(result2, "second call should return true (already disabled)");
    }
}
