//! Optional debugging hooks pluggable into the engine.
//!
//! Plain fields the engine consults, no-op (`None`) by default, a single
//! process-wide instance set once by an embedder that wants a debugger or
//! profiler — rather than threading a hook object through every call site.

use crate::exec::ExecContext;
use crate::src::ObjSrc;
use lam_core::header::ObjPtr;
use std::sync::{OnceLock, RwLock};

/// One hook per traced event: error, call, return, source-position change,
/// and assignment.
#[derive(Clone, Copy, Default)]
pub struct DebugHooks {
    /// Called when an error is about to propagate, with the formatted
    /// message and the most recent `src` marker, if any.
    pub on_error: Option<fn(message: &str, src: Option<ObjPtr>)>,
    /// Called just before a call is made, with the callable and the
    /// pushed actual arguments.
    pub on_fncall: Option<fn(callable: ObjPtr, args: &[ObjPtr])>,
    /// Called just after a call returns, with its result.
    pub on_fnresult: Option<fn(result: ObjPtr)>,
    /// Called whenever the engine crosses a `src` marker.
    pub on_src: Option<fn(src: ObjPtr)>,
    /// Called on every assignment: aggregate, key, new value.
    pub on_watch: Option<fn(aggregate: ObjPtr, key: ObjPtr, value: ObjPtr)>,
}

static HOOKS: OnceLock<RwLock<DebugHooks>> = OnceLock::new();

fn hooks() -> &'static RwLock<DebugHooks> {
    HOOKS.get_or_init(|| RwLock::new(DebugHooks::default()))
}

/// Install a new set of hooks, replacing whatever was installed before.
/// `None` fields mean "no-op for that event".
pub fn install(new_hooks: DebugHooks) {
    *hooks().write().unwrap() = new_hooks;
}

/// Remove all hooks, restoring the zero-overhead default.
pub fn clear() {
    install(DebugHooks::default());
}

pub fn notify_error(message: &str, src: Option<ObjPtr>) {
    if let Some(f) = hooks().read().unwrap().on_error {
        f(message, src);
    }
}

pub fn notify_fncall(callable: ObjPtr, args: &[ObjPtr]) {
    if let Some(f) = hooks().read().unwrap().on_fncall {
        f(callable, args);
    }
}

pub fn notify_fnresult(result: ObjPtr) {
    if let Some(f) = hooks().read().unwrap().on_fnresult {
        f(result);
    }
}

pub fn notify_src(src: ObjPtr) {
    if let Some(f) = hooks().read().unwrap().on_src {
        f(src);
    }
}

pub fn notify_watch(aggregate: ObjPtr, key: ObjPtr, value: ObjPtr) {
    if let Some(f) = hooks().read().unwrap().on_watch {
        f(aggregate, key, value);
    }
}

/// Read the exec context's current source marker as `(filename, lineno)`,
/// for an embedder's error hook to format a "file:line" prefix with.
pub fn current_position(ctx: &ExecContext) -> Option<(String, i32)> {
    let s = ctx.src?;
    let src_obj = unsafe { lam_core::header::downcast::<ObjSrc>(s).as_ref() };
    Some((
        lam_core::value::string_value(src_obj.filename).to_string(),
        src_obj.lineno,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lam_core::value::{init_primitives, intern_string, new_int};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Once;

    static SETUP: Once = Once::new();
    fn setup() {
        SETUP.call_once(|| {
            init_primitives();
            crate::src::init_src_type();
        });
    }

    #[test]
    fn default_hooks_are_no_ops() {
        setup();
        clear();
        notify_error("boom", None);
        notify_fncall(new_int(1), &[]);
        notify_fnresult(new_int(1));
        notify_watch(new_int(1), new_int(2), new_int(3));
    }

    #[test]
    fn installed_hook_fires() {
        setup();
        static FIRED: AtomicBool = AtomicBool::new(false);
        fn on_err(_msg: &str, _src: Option<ObjPtr>) {
            FIRED.store(true, Ordering::SeqCst);
        }
        install(DebugHooks {
            on_error: Some(on_err),
            ..DebugHooks::default()
        });
        notify_error("oops", None);
        assert!(FIRED.load(Ordering::SeqCst));
        clear();
    }

    #[test]
    fn current_position_reads_the_exec_contexts_src_marker() {
        setup();
        let mut ctx = ExecContext::new();
        let file = intern_string("demo.ici");
        ctx.src = Some(crate::src::new_src(12, file));
        let (name, line) = current_position(&ctx).unwrap();
        assert_eq!(name, "demo.ici");
        assert_eq!(line, 12);
    }
}
