//! Environment-variable configuration, consolidated into one module.
//!
//! There is no config file: the external interface is a C ABI, so runtime
//! tuning is env vars and constructor parameters read inline wherever
//! they're needed. This module just gathers the parsing in one place
//! under the `LAM_*` names.

/// Default coroutine stack size (1 MiB) for May coroutines.
pub const DEFAULT_STACK_SIZE: usize = 0x100000;

/// `LAM_STACK_SIZE` — coroutine stack size in bytes, for every `go()`
/// thread. Missing, zero, or unparseable values warn and fall back to
/// `DEFAULT_STACK_SIZE`.
pub fn stack_size() -> usize {
    parse_stack_size(std::env::var("LAM_STACK_SIZE").ok())
}

fn parse_stack_size(env_value: Option<String>) -> usize {
    match env_value {
        Some(val) => match val.parse::<usize>() {
            Ok(0) => {
                eprintln!("Warning: LAM_STACK_SIZE=0 is invalid, using default {DEFAULT_STACK_SIZE}");
                DEFAULT_STACK_SIZE
            }
            Ok(size) => size,
            Err(_) => {
                eprintln!(
                    "Warning: LAM_STACK_SIZE='{val}' is not a valid number, using default {DEFAULT_STACK_SIZE}"
                );
                DEFAULT_STACK_SIZE
            }
        },
        None => DEFAULT_STACK_SIZE,
    }
}

/// `LAM_GC_THRESHOLD` — override the initial collection threshold in
/// bytes. The dynamic threshold still applies after the first collection;
/// this only seeds the starting point.
pub fn gc_threshold_override() -> Option<u64> {
    let val = std::env::var("LAM_GC_THRESHOLD").ok()?;
    match val.parse::<u64>() {
        Ok(0) => {
            eprintln!("Warning: LAM_GC_THRESHOLD=0 is invalid, ignoring");
            None
        }
        Ok(n) => Some(n),
        Err(_) => {
            eprintln!("Warning: LAM_GC_THRESHOLD='{val}' is not a valid number, ignoring");
            None
        }
    }
}

/// Default ceiling on scripted call nesting within a single exec context.
pub const DEFAULT_MAX_RECURSION: u32 = 10_000;

/// `LAM_MAX_RECURSION` — override how deep scripted calls may nest before
/// the engine refuses to re-enter and raises a resource-exhaustion error.
pub fn max_recursion() -> u32 {
    let val = match std::env::var("LAM_MAX_RECURSION") {
        Ok(v) => v,
        Err(_) => return DEFAULT_MAX_RECURSION,
    };
    match val.parse::<u32>() {
        Ok(0) => {
            eprintln!("Warning: LAM_MAX_RECURSION=0 is invalid, using default {DEFAULT_MAX_RECURSION}");
            DEFAULT_MAX_RECURSION
        }
        Ok(n) => n,
        Err(_) => {
            eprintln!(
                "Warning: LAM_MAX_RECURSION='{val}' is not a valid number, using default {DEFAULT_MAX_RECURSION}"
            );
            DEFAULT_MAX_RECURSION
        }
    }
}

/// Apply every `LAM_*`-driven override. Called once from `lam_init`
/// (`ffi.rs`) and from the scheduler's own init.
pub fn apply() {
    if let Some(bytes) = gc_threshold_override() {
        lam_core::gc::configure_threshold(bytes);
    }
    may::config().set_stack_size(stack_size());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parse_stack_size_valid() {
        assert_eq!(parse_stack_size(Some("2097152".to_string())), 2097152);
        assert_eq!(parse_stack_size(Some("1".to_string())), 1);
    }

    #[test]
    fn parse_stack_size_none_or_invalid_falls_back() {
        assert_eq!(parse_stack_size(None), DEFAULT_STACK_SIZE);
        assert_eq!(parse_stack_size(Some("0".to_string())), DEFAULT_STACK_SIZE);
        assert_eq!(parse_stack_size(Some("nope".to_string())), DEFAULT_STACK_SIZE);
    }

    #[test]
    #[serial]
    fn max_recursion_falls_back_without_env_override() {
        let orig = std::env::var("LAM_MAX_RECURSION").ok();
        // SAFETY: #[serial] keeps this test from racing other env mutators.
        unsafe {
            std::env::remove_var("LAM_MAX_RECURSION");
        }
        assert_eq!(max_recursion(), DEFAULT_MAX_RECURSION);
        unsafe {
            match orig {
                Some(v) => std::env::set_var("LAM_MAX_RECURSION", v),
                None => std::env::remove_var("LAM_MAX_RECURSION"),
            }
        }
    }
}
