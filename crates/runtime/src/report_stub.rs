//! Stub for report operations when the "diagnostics" feature is disabled.
//!
//! A no-op so linking succeeds regardless of feature flags.

/// No-op at-exit report when diagnostics is disabled.
///
/// # Safety
/// Always safe to call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_report() {}
