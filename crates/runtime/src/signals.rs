//! Unix signal bridge.
//!
//! A signal handler is only ever allowed to flip an atomic flag, never to
//! run script code directly — running a `Func` from inside a signal handler
//! would reenter the allocator/GC mid-collection. `poll` drains the flags
//! at a safe point (the engine's tick, or an explicit embedder call) and
//! only then invokes any callable registered for that signal.
//!
//! Handler installation goes through `signal_hook::low_level::register`/
//! `unregister` rather than `libc::signal`. `ignore` is implemented as
//! registering a no-op handler — any registered handler already overrides a
//! signal's default disposition, so an empty one reads as "ignore" without
//! needing `SIG_IGN` directly. `default` removes the registration,
//! returning the signal to its OS default.

use crate::exec::ExecContext;
use crate::func;
use lam_core::header::ObjPtr;
use signal_hook::low_level::{SigId, register, unregister};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

/// Covers every standard Unix signal number.
const MAX_SIGNAL: usize = 32;

static SIGNAL_FLAGS: [AtomicBool; MAX_SIGNAL] = [const { AtomicBool::new(false) }; MAX_SIGNAL];

fn registrations() -> &'static Mutex<HashMap<i32, SigId>> {
    static REG: OnceLock<Mutex<HashMap<i32, SigId>>> = OnceLock::new();
    REG.get_or_init(|| Mutex::new(HashMap::new()))
}

fn callbacks() -> &'static Mutex<HashMap<i32, ObjPtr>> {
    static CB: OnceLock<Mutex<HashMap<i32, ObjPtr>>> = OnceLock::new();
    CB.get_or_init(|| Mutex::new(HashMap::new()))
}

fn check_sig(sig: i64) -> Result<usize, lam_core::LamError> {
    if sig < 0 || sig as usize >= MAX_SIGNAL {
        return Err(lam_core::LamError::new(
            lam_core::ErrorKind::OutOfRange,
            format!("signal number {sig} out of range"),
        ));
    }
    Ok(sig as usize)
}

fn install(sig: i32) -> std::io::Result<SigId> {
    unsafe { register(sig, move || flag(sig)) }
}

fn flag(sig: i32) {
    let idx = sig as usize;
    if idx < MAX_SIGNAL {
        SIGNAL_FLAGS[idx].store(true, Ordering::SeqCst);
    }
}

fn replace_registration(sig: i32, id: SigId) {
    let mut reg = registrations().lock().unwrap();
    if let Some(old) = reg.insert(sig, id) {
        unregister(old);
    }
}

/// Trap a signal: flip its flag on receipt and, if `handler` is given, run
/// it (with the signal number as its sole argument) the next time `poll` is
/// called.
pub fn trap(sig_num: i64, handler: Option<ObjPtr>) -> Result<(), lam_core::LamError> {
    let idx = check_sig(sig_num)?;
    let id = install(idx as i32)
        .map_err(|e| lam_core::LamError::new(lam_core::ErrorKind::IoFailure, e.to_string()))?;
    replace_registration(idx as i32, id);
    let mut cbs = callbacks().lock().unwrap();
    match handler {
        Some(f) => {
            cbs.insert(idx as i32, f);
        }
        None => {
            cbs.remove(&(idx as i32));
        }
    }
    Ok(())
}

/// Ignore a signal outright: installs a handler that never sets a flag and
/// drops any registered callback.
pub fn ignore(sig_num: i64) -> Result<(), lam_core::LamError> {
    let idx = check_sig(sig_num)?;
    let id = unsafe { register(idx as i32, || {}) }
        .map_err(|e| lam_core::LamError::new(lam_core::ErrorKind::IoFailure, e.to_string()))?;
    replace_registration(idx as i32, id);
    callbacks().lock().unwrap().remove(&(idx as i32));
    SIGNAL_FLAGS[idx].store(false, Ordering::SeqCst);
    Ok(())
}

/// Restore a signal's OS default disposition.
pub fn default(sig_num: i64) -> Result<(), lam_core::LamError> {
    let idx = check_sig(sig_num)?;
    if let Some(id) = registrations().lock().unwrap().remove(&(idx as i32)) {
        unregister(id);
    }
    callbacks().lock().unwrap().remove(&(idx as i32));
    SIGNAL_FLAGS[idx].store(false, Ordering::SeqCst);
    Ok(())
}

/// Check whether a signal was received since the last check, clearing its
/// flag.
pub fn received(sig_num: i64) -> Result<bool, lam_core::LamError> {
    let idx = check_sig(sig_num)?;
    Ok(SIGNAL_FLAGS[idx].swap(false, Ordering::SeqCst))
}

/// Check whether a signal is pending, without clearing its flag.
pub fn pending(sig_num: i64) -> Result<bool, lam_core::LamError> {
    let idx = check_sig(sig_num)?;
    Ok(SIGNAL_FLAGS[idx].load(Ordering::SeqCst))
}

/// Clear a signal's flag without otherwise inspecting it.
pub fn clear(sig_num: i64) -> Result<(), lam_core::LamError> {
    let idx = check_sig(sig_num)?;
    SIGNAL_FLAGS[idx].store(false, Ordering::SeqCst);
    Ok(())
}

/// Drain every flagged signal that has a registered callable, invoking each
/// one in turn. Called from the engine's periodic tick so that callbacks
/// only ever run at a well-defined bytecode boundary.
pub fn poll(ctx: &mut ExecContext) -> Result<(), lam_core::LamError> {
    let due: Vec<(i32, ObjPtr)> = {
        let cbs = callbacks().lock().unwrap();
        cbs.iter()
            .filter(|(sig, _)| SIGNAL_FLAGS[**sig as usize].load(Ordering::SeqCst))
            .map(|(sig, f)| (*sig, *f))
            .collect()
    };
    for (sig, f) in due {
        if SIGNAL_FLAGS[sig as usize].swap(false, Ordering::SeqCst) {
            ctx.os_push(lam_core::value::new_int(sig as i64));
            func::call(ctx, f, 1)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_and_pending_round_trip() {
        SIGNAL_FLAGS[3].store(true, Ordering::SeqCst);
        assert!(pending(3).unwrap());
        clear(3).unwrap();
        assert!(!pending(3).unwrap());
    }

    #[test]
    fn received_clears_the_flag() {
        SIGNAL_FLAGS[5].store(true, Ordering::SeqCst);
        assert!(received(5).unwrap());
        assert!(!received(5).unwrap());
    }

    #[test]
    fn out_of_range_signal_is_an_error() {
        assert!(check_sig(-1).is_err());
        assert!(check_sig(999).is_err());
    }
}
