//! The C embedder surface: every exported symbol follows the `lam_<op>`
//! convention already established by `lam_core::error`'s
//! `lam_has_error`/`lam_get_error`/`lam_take_error`/`lam_clear_error`.
//!
//! A handle crossing this boundary is a raw `*mut ObjHeader` (`LamObj`):
//! opaque to C, recoverable on this side via `lam_core::header::erase`/
//! `downcast` the same way every other module in this crate recovers a
//! concrete type from an `ObjPtr`. Null means "no value" wherever an
//! embedder would otherwise pass a sentinel.
//!
//! `lam_call`'s printf-like type-spec grammar (`"i"`, `"f"`, `"s"`, `"o"`, a
//! leading `"@"` for subject binding) is kept, but the varargs themselves
//! are a fixed `LamArg` array rather than true C varargs: defining a
//! variadic `extern "C" fn` is still nightly-only in Rust, and a
//! tagged-array ABI is the idiomatic stable substitute (noted in
//! DESIGN.md). `lam_new_cfunc` likewise takes `CfuncImpl` directly rather
//! than a separate C trampoline type — it is meant for embedders linked
//! into the same Rust binary, matching how the rest of this crate's
//! cfuncs are registered.

use crate::exec::ExecContext;
use crate::func::CfuncImpl;
use lam_core::header::{ObjPtr, erase};
use lam_core::typetab::TypeDesc;
use lam_core::{ErrorKind, LamError};
use std::ffi::{CStr, c_char, c_void};
use std::ptr::NonNull;
use std::sync::Mutex;

/// An opaque handle to a heap object, as seen across the FFI boundary.
pub type LamObj = *mut lam_core::header::ObjHeader;

fn to_obj(o: LamObj) -> Option<ObjPtr> {
    NonNull::new(o).map(|p| unsafe { erase(p) })
}

fn from_obj(o: ObjPtr) -> LamObj {
    o.as_ptr()
}

fn report_error(e: LamError) -> i32 {
    lam_core::error::set_error(e);
    -1
}

fn c_str_to_owned(s: *const c_char) -> Result<String, LamError> {
    if s.is_null() {
        return Err(LamError::new(ErrorKind::TypeMismatch, "null C string"));
    }
    Ok(unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned())
}

// --- init / uninit --------------------------------------------------------

static ATEXIT_HOOKS: Mutex<Vec<extern "C" fn()>> = Mutex::new(Vec::new());

/// Bring the runtime up: register every built-in type, apply `LAM_*` env
/// overrides, install the SIGQUIT diagnostics handler. Idempotent.
///
/// # Safety
/// Must be called before any other `lam_*` function, from a single thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_init() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        crate::init_types();
        crate::scheduler::init();
    });
}

/// Tear the runtime down: run every `lam_atexit` hook, wait for outstanding
/// `go()` threads, and force a final collection.
///
/// # Safety
/// No other `lam_*` function may be called concurrently with, or after,
/// this one.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_uninit() {
    crate::scheduler::wait_all();
    for hook in ATEXIT_HOOKS.lock().unwrap().drain(..) {
        hook();
    }
    unsafe { crate::report::lam_report() };
    let mut h = lam_core::gc::heap().lock().unwrap();
    lam_core::gc::collect(&mut h);
}

/// Register a callback to run during `lam_uninit`, in registration order.
///
/// # Safety
/// `callback` must be a valid, non-null `extern "C"` function pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_atexit(callback: extern "C" fn()) {
    ATEXIT_HOOKS.lock().unwrap().push(callback);
}

// --- typed constructors ----------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn lam_new_int(v: i64) -> LamObj {
    from_obj(lam_core::value::new_int(v))
}

#[unsafe(no_mangle)]
pub extern "C" fn lam_new_float(v: f64) -> LamObj {
    from_obj(lam_core::value::new_float(v))
}

/// # Safety
/// `s` must be a valid, NUL-terminated C string, or null (treated as an
/// error and reported through the error cell).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_new_str(s: *const c_char) -> LamObj {
    match c_str_to_owned(s) {
        Ok(s) => from_obj(lam_core::value::new_string(&s)),
        Err(e) => {
            report_error(e);
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn lam_new_map(super_: LamObj) -> LamObj {
    from_obj(crate::map::new_map(to_obj(super_)))
}

#[unsafe(no_mangle)]
pub extern "C" fn lam_new_array() -> LamObj {
    from_obj(crate::array::new_array())
}

/// # Safety
/// `code`, `args`, `autos` must be live objects of the right tcodes;
/// `name` a valid C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_new_func(
    code: LamObj,
    args: LamObj,
    autos: LamObj,
    name: *const c_char,
    vargs_slot: bool,
) -> LamObj {
    let (Some(code), Some(args), Some(autos)) = (to_obj(code), to_obj(args), to_obj(autos)) else {
        report_error(LamError::new(ErrorKind::TypeMismatch, "lam_new_func: null argument"));
        return std::ptr::null_mut();
    };
    let name = c_str_to_owned(name).unwrap_or_default();
    from_obj(crate::func::new_func(code, args, autos, name, vargs_slot))
}

/// Register a Rust-implemented cfunc visible to scripts as `name`.
///
/// # Safety
/// `name` must be a valid C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_new_cfunc(name: *const c_char, imp: CfuncImpl) -> LamObj {
    let name = c_str_to_owned(name).unwrap_or_default();
    from_obj(crate::func::new_cfunc(name, imp))
}

/// # Safety
/// `subject` and `callable` must be live objects.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_new_method(subject: LamObj, callable: LamObj) -> LamObj {
    let (Some(subject), Some(callable)) = (to_obj(subject), to_obj(callable)) else {
        report_error(LamError::new(ErrorKind::TypeMismatch, "lam_new_method: null argument"));
        return std::ptr::null_mut();
    };
    from_obj(crate::func::new_method(subject, callable))
}

/// # Safety
/// `aggregate` and `key` must be live objects.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_new_ptr(aggregate: LamObj, key: LamObj) -> LamObj {
    let (Some(aggregate), Some(key)) = (to_obj(aggregate), to_obj(key)) else {
        report_error(LamError::new(ErrorKind::TypeMismatch, "lam_new_ptr: null argument"));
        return std::ptr::null_mut();
    };
    from_obj(crate::func::new_langptr(aggregate, key))
}

/// Wrap an opaque native pointer for script visibility. `native` is never
/// dereferenced by this crate.
///
/// # Safety
/// `type_name` must be a valid C string; `members`, if non-null, a live map.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_new_handle(
    type_name: *const c_char,
    native: *mut c_void,
    members: LamObj,
) -> LamObj {
    let type_name = c_str_to_owned(type_name).unwrap_or_default();
    from_obj(crate::func::new_handle(type_name, native, to_obj(members)))
}

// --- atoms / fetch / assign -------------------------------------------------

/// Intern `obj`. `lone` means the caller holds the only reference and
/// `obj` may be interned in place rather than copied.
///
/// # Safety
/// `obj` must be a live object.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_atom(obj: LamObj, lone: bool) -> LamObj {
    let Some(obj) = to_obj(obj) else {
        return std::ptr::null_mut();
    };
    let mut h = lam_core::gc::heap().lock().unwrap();
    let tcode = unsafe { obj.as_ref() }.tcode;
    let copy_fn = lam_core::type_table().read().unwrap().get(tcode).copy;
    from_obj(h.atoms.atom(obj, lone, copy_fn))
}

fn caps_op<T>(
    o: ObjPtr,
    get: impl FnOnce(&TypeDesc) -> Option<T>,
) -> Result<T, LamError> {
    let hdr = unsafe { o.as_ref() };
    let tt = lam_core::type_table().read().unwrap();
    get(tt.get(hdr.tcode)).ok_or_else(|| {
        LamError::new(ErrorKind::TypeMismatch, format!("{} does not support this operation", tt.get(hdr.tcode).name))
    })
}

/// Dispatch-based fetch: `tt.get(tcode).fetch`.
///
/// # Safety
/// `aggregate` and `key` must be live objects.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_fetch(aggregate: LamObj, key: LamObj) -> LamObj {
    let (Some(agg), Some(key)) = (to_obj(aggregate), to_obj(key)) else {
        return std::ptr::null_mut();
    };
    match caps_op(agg, |d| d.fetch) {
        Ok(f) => f(agg, key).map(from_obj).unwrap_or(std::ptr::null_mut()),
        Err(e) => {
            report_error(e);
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `aggregate`, `key`, `value` must be live objects.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_assign(aggregate: LamObj, key: LamObj, value: LamObj) -> i32 {
    let (Some(agg), Some(key), Some(value)) = (to_obj(aggregate), to_obj(key), to_obj(value)) else {
        return report_error(LamError::new(ErrorKind::TypeMismatch, "lam_assign: null argument"));
    };
    match caps_op(agg, |d| d.assign) {
        Ok(f) => match f(agg, key, value) {
            Ok(()) => 0,
            Err(e) => report_error(e),
        },
        Err(e) => report_error(e),
    }
}

/// # Safety
/// `aggregate` and `key` must be live objects.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_fetch_base(aggregate: LamObj, key: LamObj) -> LamObj {
    let (Some(agg), Some(key)) = (to_obj(aggregate), to_obj(key)) else {
        return std::ptr::null_mut();
    };
    match caps_op(agg, |d| d.fetch_base) {
        Ok(f) => f(agg, key).map(from_obj).unwrap_or(std::ptr::null_mut()),
        Err(e) => {
            report_error(e);
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `aggregate`, `key`, `value` must be live objects.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_assign_base(aggregate: LamObj, key: LamObj, value: LamObj) -> i32 {
    let (Some(agg), Some(key), Some(value)) = (to_obj(aggregate), to_obj(key), to_obj(value)) else {
        return report_error(LamError::new(ErrorKind::TypeMismatch, "lam_assign_base: null argument"));
    };
    match caps_op(agg, |d| d.assign_base) {
        Ok(f) => match f(agg, key, value) {
            Ok(()) => 0,
            Err(e) => report_error(e),
        },
        Err(e) => report_error(e),
    }
}

/// # Safety
/// `aggregate` and `key` must be live objects.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_fetch_super(aggregate: LamObj, key: LamObj) -> LamObj {
    let (Some(agg), Some(key)) = (to_obj(aggregate), to_obj(key)) else {
        return std::ptr::null_mut();
    };
    match caps_op(agg, |d| d.fetch_super) {
        Ok(f) => f(agg, key).map(from_obj).unwrap_or(std::ptr::null_mut()),
        Err(e) => {
            report_error(e);
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `aggregate`, `key`, `value` must be live objects.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_assign_super(aggregate: LamObj, key: LamObj, value: LamObj) -> i32 {
    let (Some(agg), Some(key), Some(value)) = (to_obj(aggregate), to_obj(key), to_obj(value)) else {
        return report_error(LamError::new(ErrorKind::TypeMismatch, "lam_assign_super: null argument"));
    };
    match caps_op(agg, |d| d.assign_super) {
        Ok(f) => match f(agg, key, value) {
            Ok(()) => 0,
            Err(e) => report_error(e),
        },
        Err(e) => report_error(e),
    }
}

// --- call -------------------------------------------------------------------

/// One marshalled argument to `lam_call`, tagged by `type_spec`'s matching
/// character (`i`/`f`/`s`/`o`).
#[repr(C)]
pub struct LamArg {
    pub tag: u8,
    pub i: i64,
    pub f: f64,
    pub s: *const c_char,
    pub o: LamObj,
}

const TAG_INT: u8 = 0;
const TAG_FLOAT: u8 = 1;
const TAG_STR: u8 = 2;
const TAG_OBJ: u8 = 3;

fn arg_to_value(a: &LamArg, expect: u8) -> Result<ObjPtr, LamError> {
    if a.tag != expect {
        return Err(LamError::new(ErrorKind::TypeMismatch, "lam_call: type_spec does not match argv tag"));
    }
    Ok(match a.tag {
        TAG_INT => lam_core::value::new_int(a.i),
        TAG_FLOAT => lam_core::value::new_float(a.f),
        TAG_STR => lam_core::value::new_string(&c_str_to_owned(a.s)?),
        TAG_OBJ => to_obj(a.o).ok_or_else(|| LamError::new(ErrorKind::TypeMismatch, "lam_call: null object arg"))?,
        _ => return Err(LamError::new(ErrorKind::TypeMismatch, "lam_call: bad argv tag")),
    })
}

/// Marshalled call from C. `type_spec` is a sequence of
/// `i`/`f`/`s`/`o` characters, one per `argv` entry, optionally prefixed
/// with `@` to bind `argv[0]` as the method subject rather than a plain
/// argument. On success, writes the result to `*out` (nrefs already
/// incremented by the call machinery) and returns 0; on failure returns -1
/// and leaves the per-thread error cell set.
///
/// # Safety
/// `ctx`, `callable`, `type_spec` must be valid and live for the duration
/// of the call; `argv` must have at least as many entries as `type_spec`
/// has type characters; `out` must be a valid, writable `*mut LamObj`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_call(
    ctx: *mut ExecContext,
    callable: LamObj,
    type_spec: *const c_char,
    argv: *const LamArg,
    argc: usize,
    out: *mut LamObj,
) -> i32 {
    let ctx = match unsafe { ctx.as_mut() } {
        Some(ctx) => ctx,
        None => return report_error(LamError::new(ErrorKind::TypeMismatch, "lam_call: null ctx")),
    };
    let Some(callable) = to_obj(callable) else {
        return report_error(LamError::new(ErrorKind::TypeMismatch, "lam_call: null callable"));
    };
    let spec = match c_str_to_owned(type_spec) {
        Ok(s) => s,
        Err(e) => return report_error(e),
    };
    let (bind_subject, spec) = match spec.strip_prefix('@') {
        Some(rest) => (true, rest),
        None => (false, spec.as_str()),
    };

    let argv = if argv.is_null() || argc == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(argv, argc) }
    };
    if spec.len() > argv.len() {
        return report_error(LamError::new(ErrorKind::ArityMismatch, "lam_call: type_spec longer than argv"));
    }

    let mut values = Vec::with_capacity(spec.len());
    for (ch, a) in spec.chars().zip(argv) {
        let expect = match ch {
            'i' => TAG_INT,
            'f' => TAG_FLOAT,
            's' => TAG_STR,
            'o' => TAG_OBJ,
            _ => return report_error(LamError::new(ErrorKind::ProtocolViolation, "lam_call: bad type_spec character")),
        };
        match arg_to_value(a, expect) {
            Ok(v) => values.push(v),
            Err(e) => return report_error(e),
        }
    }

    let (subject, call_args) = if bind_subject {
        match values.split_first() {
            Some((s, rest)) => (Some(*s), rest),
            None => return report_error(LamError::new(ErrorKind::ArityMismatch, "lam_call: '@' needs a subject argument")),
        }
    } else {
        (None, values.as_slice())
    };

    for v in call_args {
        ctx.os_push(*v);
    }
    let result = crate::func::call_with_subject(ctx, callable, subject, call_args.len());
    match result {
        Ok(()) => {
            let v = ctx.os_pop().unwrap_or_else(lam_core::value::null_value);
            unsafe { v.as_ref() }.incref();
            if !out.is_null() {
                unsafe { *out = from_obj(v) };
            }
            0
        }
        Err(e) => report_error(e),
    }
}

/// Run the engine starting at `entry`'s current PC, `os_depth` operands
/// already pushed onto `ctx`'s operand stack. Returns the top of the
/// operand stack as the result, nrefs incremented.
///
/// # Safety
/// `ctx` and `entry` must be live; `entry` must be an `ObjCode`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_evaluate(ctx: *mut ExecContext, entry: LamObj, os_depth: usize) -> LamObj {
    let ctx = match unsafe { ctx.as_mut() } {
        Some(ctx) => ctx,
        None => {
            report_error(LamError::new(ErrorKind::TypeMismatch, "lam_evaluate: null ctx"));
            return std::ptr::null_mut();
        }
    };
    let Some(entry) = to_obj(entry) else {
        report_error(LamError::new(ErrorKind::TypeMismatch, "lam_evaluate: null entry"));
        return std::ptr::null_mut();
    };
    let scope = crate::map::new_map(None);
    if let Err(e) = ctx.push_call_frame(entry, scope) {
        report_error(e);
        return std::ptr::null_mut();
    }
    debug_assert!(ctx.os.len() >= os_depth);

    match crate::engine::run(ctx) {
        Ok(()) => {
            let v = ctx.os.last().copied().unwrap_or_else(lam_core::value::null_value);
            unsafe { v.as_ref() }.incref();
            from_obj(v)
        }
        Err(e) => {
            lam_core::error::set_error(e);
            std::ptr::null_mut()
        }
    }
}

// --- concurrency -------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn lam_enter() {
    crate::scheduler::enter();
}

#[unsafe(no_mangle)]
pub extern "C" fn lam_leave() {
    crate::scheduler::leave();
}

/// # Safety
/// `ctx` must be a live `ExecContext`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_yield(ctx: *mut ExecContext) {
    let critsect = unsafe { ctx.as_ref() }.map(|c| c.critsect).unwrap_or(0);
    crate::scheduler::yield_now(critsect);
}

/// # Safety
/// `ctx` must be a live `ExecContext`; `obj` must be a live object.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_waitfor(handle: *const crate::scheduler::ThreadHandle, ctx: *mut ExecContext, obj: LamObj) -> i32 {
    let (Some(handle), Some(ctx), Some(obj)) = (unsafe { handle.as_ref() }, unsafe { ctx.as_mut() }, to_obj(obj)) else {
        return report_error(LamError::new(ErrorKind::TypeMismatch, "lam_waitfor: null argument"));
    };
    crate::scheduler::waitfor(handle, ctx, obj);
    0
}

/// # Safety
/// `obj` must be a live object.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_wakeup(obj: LamObj) {
    if let Some(obj) = to_obj(obj) {
        crate::scheduler::wakeup(obj);
    }
}

// --- archive -----------------------------------------------------------------

/// Write `obj`'s reachable graph to `path`.
///
/// # Safety
/// `path` must be a valid C string; `obj` must be a live object.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_save(path: *const c_char, obj: LamObj) -> i32 {
    let path = match c_str_to_owned(path) {
        Ok(p) => p,
        Err(e) => return report_error(e),
    };
    let Some(obj) = to_obj(obj) else {
        return report_error(LamError::new(ErrorKind::TypeMismatch, "lam_save: null obj"));
    };
    let mut f = match std::fs::File::create(&path) {
        Ok(f) => f,
        Err(e) => return report_error(LamError::new(ErrorKind::IoFailure, e.to_string())),
    };
    match crate::archive::save(&mut f, obj) {
        Ok(()) => 0,
        Err(e) => report_error(e),
    }
}

/// Read one value from `path`. `scope`, if non-null, resolves any `cfunc`
/// names in the archived graph by name.
///
/// # Safety
/// `path` must be a valid C string; `scope`, if non-null, a live map.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_restore(path: *const c_char, scope: LamObj) -> LamObj {
    let path = match c_str_to_owned(path) {
        Ok(p) => p,
        Err(e) => {
            report_error(e);
            return std::ptr::null_mut();
        }
    };
    let mut f = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            report_error(LamError::new(ErrorKind::IoFailure, e.to_string()));
            return std::ptr::null_mut();
        }
    };
    match crate::archive::restore(&mut f, to_obj(scope)) {
        Ok(v) => from_obj(v),
        Err(e) => {
            report_error(e);
            std::ptr::null_mut()
        }
    }
}

// --- type registration ---------------------------------------------------

/// Register a plug-in type, returning its assigned tcode. Takes ownership
/// of a heap-boxed descriptor rather than
/// a by-value struct, since `TypeDesc` carries a `&'static str` and
/// function pointers that are not meaningfully `repr(C)`-stable across a
/// real language boundary — a plug-in embedder builds one with
/// `Box::into_raw` and hands over the pointer.
///
/// # Safety
/// `descriptor` must be a non-null pointer previously produced by
/// `Box::into_raw`, not used again after this call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_register_type(descriptor: *mut TypeDesc) -> u8 {
    let desc = *unsafe { Box::from_raw(descriptor) };
    lam_core::register_type(desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::Once;

    static SETUP: Once = Once::new();
    fn setup() {
        SETUP.call_once(|| unsafe {
            lam_init();
        });
    }

    #[test]
    fn init_is_idempotent_and_registers_types() {
        setup();
        unsafe { lam_init() };
        let i = lam_new_int(42);
        assert!(!i.is_null());
    }

    #[test]
    fn new_int_and_fetch_round_trip_through_a_map() {
        setup();
        let m = lam_new_map(std::ptr::null_mut());
        let key = unsafe { lam_new_str(CString::new("k").unwrap().as_ptr()) };
        let val = lam_new_int(7);
        let status = unsafe { lam_assign(m, key, val) };
        assert_eq!(status, 0);
        let found = unsafe { lam_fetch(m, key) };
        assert!(!found.is_null());
        let v = to_obj(found).unwrap();
        assert_eq!(lam_core::value::int_value(v), 7);
    }

    #[test]
    fn call_marshals_a_cfunc_with_one_int_argument() {
        setup();
        fn add_one(ctx: &mut ExecContext, nargs: usize) -> i32 {
            let args = ctx.os_pop_n(nargs);
            ctx.os_push(lam_core::value::new_int(lam_core::value::int_value(args[0]) + 1));
            0
        }
        let name = CString::new("add-one").unwrap();
        let cf = unsafe { lam_new_cfunc(name.as_ptr(), add_one) };
        let mut ctx = ExecContext::new();
        let spec = CString::new("i").unwrap();
        let argv = [LamArg {
            tag: TAG_INT,
            i: 41,
            f: 0.0,
            s: std::ptr::null(),
            o: std::ptr::null_mut(),
        }];
        let mut out: LamObj = std::ptr::null_mut();
        let status = unsafe { lam_call(&mut ctx, cf, spec.as_ptr(), argv.as_ptr(), argv.len(), &mut out) };
        assert_eq!(status, 0);
        assert_eq!(lam_core::value::int_value(to_obj(out).unwrap()), 42);
    }

    #[test]
    fn save_and_restore_round_trip_through_a_temp_file() {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.bin");
        let path_c = CString::new(path.to_str().unwrap()).unwrap();
        let obj = lam_new_int(99);
        let status = unsafe { lam_save(path_c.as_ptr(), obj) };
        assert_eq!(status, 0);
        let restored = unsafe { lam_restore(path_c.as_ptr(), std::ptr::null_mut()) };
        assert!(!restored.is_null());
        assert_eq!(lam_core::value::int_value(to_obj(restored).unwrap()), 99);
    }
}
