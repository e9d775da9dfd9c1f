//! Runtime diagnostics for production debugging.
//!
//! Provides a SIGQUIT (`kill -3`) handler that dumps GC, atom-pool, and
//! thread statistics to stderr, the way a JVM thread dump works — useful
//! for inspecting a stuck or misbehaving process without stopping it.
//!
//! Installed via `signal_hook` rather than `libc::signal` directly, same as
//! the rest of the signal-handling surface in this crate.

use std::sync::Once;

static SIGNAL_HANDLER_INIT: Once = Once::new();

/// Install the SIGQUIT signal handler for diagnostics. Called automatically
/// from `scheduler::init`, but safe to call directly and idempotent.
pub fn install_signal_handler() {
    SIGNAL_HANDLER_INIT.call_once(|| {
        #[cfg(unix)]
        unsafe {
            let _ = signal_hook::low_level::register(signal_hook::consts::SIGQUIT, || {
                dump_diagnostics();
            });
        }
    });
}

/// Dump runtime diagnostics to stderr. Callable directly or via SIGQUIT.
pub fn dump_diagnostics() {
    use std::io::Write;

    let mut out = std::io::stderr().lock();
    let _ = writeln!(out, "\n=== Runtime Diagnostics ===");
    let _ = writeln!(out, "Timestamp: {:?}", std::time::SystemTime::now());

    let _ = writeln!(out, "\n[Heap]");
    match lam_core::gc::heap().try_lock() {
        Ok(heap) => {
            let _ = writeln!(out, "  Live objects: {}", heap.all_objects.len());
            let _ = writeln!(out, "  Live bytes:   {}", heap.live_bytes);
            let _ = writeln!(out, "  Threshold:    {}", heap.threshold);
            let _ = writeln!(out, "  Atoms:        {}", heap.atoms.len());
        }
        Err(_) => {
            let _ = writeln!(out, "  (unavailable - heap locked)");
        }
    }

    let _ = writeln!(out, "\n[Threads]");
    let _ = writeln!(
        out,
        "  Active:    {}",
        crate::scheduler::ACTIVE_THREADS.load(std::sync::atomic::Ordering::Relaxed)
    );
    let _ = writeln!(out, "  Peak:      {}", crate::scheduler::peak_threads());
    let _ = writeln!(out, "  Spawned:   {}", crate::scheduler::total_spawned());
    let _ = writeln!(out, "  Completed: {}", crate::scheduler::total_completed());
    let _ = writeln!(out, "  Live ids:  {:?}", crate::scheduler::live_thread_ids());

    let _ = writeln!(out, "\n=== End Diagnostics ===\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_diagnostics_runs() {
        dump_diagnostics();
    }

    #[test]
    fn install_signal_handler_is_idempotent() {
        install_signal_handler();
        install_signal_handler();
    }
}
