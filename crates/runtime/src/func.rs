//! Function types and the call protocol: scripted `Func`, `Cfunc`,
//! `Method`, `Ptr`, `Handle`.

use crate::array::{ObjArray, new_array};
use crate::exec::ExecContext;
use crate::map::ObjMap;
use lam_core::alloc::alloc_typed;
use lam_core::header::{ObjHeader, ObjPtr, downcast};
use lam_core::typetab::{
    Caps, TCODE_CFUNC, TCODE_FUNC, TCODE_HANDLE, TCODE_METHOD, TCODE_PTR, TypeDesc, register_builtin,
};
use lam_core::value::{intern_string, null_value};
use lam_core::{ErrorKind, LamError};
use std::sync::OnceLock;

/// The well-known binding names every scripted call may assign. Interned
/// once so that script code looking these names up by its own string
/// literal gets a pointer-equal key — see `map.rs`'s key_eq.
struct WellKnownNames {
    this_: ObjPtr,
    class: ObjPtr,
    vargs: ObjPtr,
}

static WELL_KNOWN: OnceLock<WellKnownNames> = OnceLock::new();

fn well_known() -> &'static WellKnownNames {
    WELL_KNOWN.get_or_init(|| WellKnownNames {
        this_: intern_string("this"),
        class: intern_string("class"),
        vargs: intern_string("vargs"),
    })
}

/// A C function implementation: receives the active exec context and the
/// argument count already on the operand stack, returns a pseudo-return
/// status (0 success, nonzero ⇒ error cell set).
pub type CfuncImpl = fn(&mut ExecContext, nargs: usize) -> i32;

#[repr(C)]
pub struct ObjFunc {
    pub header: ObjHeader,
    pub code: ObjPtr,   // atomic array of op/pc/value elements
    pub args: ObjPtr,   // array of formal-parameter name strings
    pub autos: ObjPtr,  // prototype map, copied per call
    pub name: String,
    pub vargs_slot: bool,
}

#[repr(C)]
pub struct ObjCfunc {
    pub header: ObjHeader,
    pub name: String,
    pub imp: CfuncImpl,
    /// Two opaque discriminator words, a `cf_arg1`/`cf_arg2` trick for
    /// sharing one implementation across many script-visible names. New
    /// cfunc trampolines should prefer a dedicated `CfuncImpl` per name
    /// instead; these fields exist only to host cfuncs that rely on the
    /// bundle-dispatch trick.
    pub cf_arg1: i64,
    pub cf_arg2: i64,
}

#[repr(C)]
pub struct ObjMethod {
    pub header: ObjHeader,
    pub subject: ObjPtr,
    pub callable: ObjPtr,
}

/// First-class `(aggregate, key)` reference. Never caches a raw slot
/// pointer — dereference always re-fetches, so pointers survive rehashing.
#[repr(C)]
pub struct ObjLangPtr {
    pub header: ObjHeader,
    pub aggregate: ObjPtr,
    pub key: ObjPtr,
}

#[repr(C)]
pub struct ObjHandle {
    pub header: ObjHeader,
    pub type_name: String,
    pub native: *mut std::ffi::c_void,
    pub members: Option<ObjPtr>, // optional member map
}

pub fn func_tcode() -> u8 {
    TCODE_FUNC
}
pub fn cfunc_tcode() -> u8 {
    TCODE_CFUNC
}
pub fn method_tcode() -> u8 {
    TCODE_METHOD
}
pub fn langptr_tcode() -> u8 {
    TCODE_PTR
}
pub fn handle_tcode() -> u8 {
    TCODE_HANDLE
}

fn leaf_desc(name: &'static str, size: usize) -> TypeDesc {
    TypeDesc {
        name,
        size,
        caps: Caps::CALL | Caps::OBJNAME,
        mark: |_| 0,
        free: |_| {},
        cmp: |a, b| a == b,
        hash: |o| o.as_ptr() as u64,
        copy: |o| o,
        objname: move |_| name.to_string(),
        fetch: None,
        assign: None,
        fetch_super: None,
        assign_super: None,
        fetch_base: None,
        assign_base: None,
    }
}

pub fn init_func_types() {
    register_builtin(
        TCODE_FUNC,
        TypeDesc {
            mark: |o| {
                let this = unsafe { downcast::<ObjFunc>(o).as_ref() };
                let tt = lam_core::type_table().read().unwrap();
                let mut total = std::mem::size_of::<ObjFunc>();
                for r in [this.code, this.args, this.autos] {
                    let h = unsafe { r.as_ref() };
                    if !h.is_marked() {
                        total += (tt.get(h.tcode).mark)(r);
                    }
                }
                total
            },
            free: |o| unsafe { drop(Box::from_raw(downcast::<ObjFunc>(o).as_ptr())) },
            ..leaf_desc("func", std::mem::size_of::<ObjFunc>())
        },
    );
    register_builtin(
        TCODE_CFUNC,
        TypeDesc {
            free: |o| unsafe { drop(Box::from_raw(downcast::<ObjCfunc>(o).as_ptr())) },
            ..leaf_desc("cfunc", std::mem::size_of::<ObjCfunc>())
        },
    );
    register_builtin(
        TCODE_METHOD,
        TypeDesc {
            mark: |o| {
                let this = unsafe { downcast::<ObjMethod>(o).as_ref() };
                let tt = lam_core::type_table().read().unwrap();
                let mut total = std::mem::size_of::<ObjMethod>();
                for r in [this.subject, this.callable] {
                    let h = unsafe { r.as_ref() };
                    if !h.is_marked() {
                        total += (tt.get(h.tcode).mark)(r);
                    }
                }
                total
            },
            free: |o| unsafe { drop(Box::from_raw(downcast::<ObjMethod>(o).as_ptr())) },
            ..leaf_desc("method", std::mem::size_of::<ObjMethod>())
        },
    );
    register_builtin(
        TCODE_PTR,
        TypeDesc {
            mark: |o| {
                let this = unsafe { downcast::<ObjLangPtr>(o).as_ref() };
                let tt = lam_core::type_table().read().unwrap();
                let mut total = std::mem::size_of::<ObjLangPtr>();
                for r in [this.aggregate, this.key] {
                    let h = unsafe { r.as_ref() };
                    if !h.is_marked() {
                        total += (tt.get(h.tcode).mark)(r);
                    }
                }
                total
            },
            free: |o| unsafe { drop(Box::from_raw(downcast::<ObjLangPtr>(o).as_ptr())) },
            ..leaf_desc("ptr", std::mem::size_of::<ObjLangPtr>())
        },
    );
    register_builtin(
        TCODE_HANDLE,
        TypeDesc {
            free: |o| unsafe { drop(Box::from_raw(downcast::<ObjHandle>(o).as_ptr())) },
            ..leaf_desc("handle", std::mem::size_of::<ObjHandle>())
        },
    );
}

pub fn new_func(code: ObjPtr, args: ObjPtr, autos: ObjPtr, name: String, vargs_slot: bool) -> ObjPtr {
    alloc_typed(|| ObjFunc {
        header: ObjHeader::new(func_tcode(), 0),
        code,
        args,
        autos,
        name,
        vargs_slot,
    })
}

pub fn new_cfunc(name: impl Into<String>, imp: CfuncImpl) -> ObjPtr {
    alloc_typed(|| ObjCfunc {
        header: ObjHeader::new(cfunc_tcode(), 0),
        name: name.into(),
        imp,
        cf_arg1: 0,
        cf_arg2: 0,
    })
}

pub fn new_method(subject: ObjPtr, callable: ObjPtr) -> ObjPtr {
    alloc_typed(|| ObjMethod {
        header: ObjHeader::new(method_tcode(), 0),
        subject,
        callable,
    })
}

pub fn new_langptr(aggregate: ObjPtr, key: ObjPtr) -> ObjPtr {
    alloc_typed(|| ObjLangPtr {
        header: ObjHeader::new(langptr_tcode(), 0),
        aggregate,
        key,
    })
}

/// Wrap an opaque native value for exposure to scripts. `native` is never
/// dereferenced by this crate; callers that
/// store a non-pointer discriminator (e.g. the scheduler's thread id) in it
/// must document that convention at the call site.
pub fn new_handle(type_name: impl Into<String>, native: *mut std::ffi::c_void, members: Option<ObjPtr>) -> ObjPtr {
    alloc_typed(|| ObjHandle {
        header: ObjHeader::new(handle_tcode(), 0),
        type_name: type_name.into(),
        native,
        members,
    })
}

/// The call protocol. `os` must already contain
/// `... arg[n-1] ... arg[0] n_actual callable` at the top; this function
/// consumes exactly that shape.
pub fn call(ctx: &mut ExecContext, callable: ObjPtr, nargs: usize) -> Result<(), LamError> {
    let hdr = unsafe { callable.as_ref() };
    if hdr.tcode == cfunc_tcode() {
        let cf = unsafe { downcast::<ObjCfunc>(callable).as_ref() };
        let status = (cf.imp)(ctx, nargs);
        if status != 0 {
            return Err(lam_core::take_error().unwrap_or_else(|| {
                LamError::new(ErrorKind::IoFailure, "cfunc failed without setting an error")
            }));
        }
        return Ok(());
    }

    if hdr.tcode == method_tcode() {
        let m = unsafe { downcast::<ObjMethod>(callable).as_ref() };
        return call_with_subject(ctx, m.callable, Some(m.subject), nargs);
    }

    if hdr.tcode == langptr_tcode() {
        let p = unsafe { downcast::<ObjLangPtr>(callable).as_ref() };
        let target = ObjMap::fetch(p.aggregate, p.key)
            .ok_or_else(|| LamError::new(ErrorKind::UndefinedName, "ptr dereferences to nothing"))?;
        return call_with_subject(ctx, target, Some(p.aggregate), nargs);
    }

    if hdr.tcode == func_tcode() {
        return call_scripted(ctx, callable, None, nargs);
    }

    Err(LamError::new(ErrorKind::TypeMismatch, "value is not callable"))
}

pub fn call_with_subject(
    ctx: &mut ExecContext,
    callable: ObjPtr,
    subject: Option<ObjPtr>,
    nargs: usize,
) -> Result<(), LamError> {
    let hdr = unsafe { callable.as_ref() };
    if hdr.tcode == func_tcode() {
        return call_scripted(ctx, callable, subject, nargs);
    }
    call(ctx, callable, nargs)
}

fn call_scripted(
    ctx: &mut ExecContext,
    callable: ObjPtr,
    subject: Option<ObjPtr>,
    nargs: usize,
) -> Result<(), LamError> {
    let func = unsafe { downcast::<ObjFunc>(callable).as_ref() };

    // 1. Copy the autos prototype to make the new scope.
    let scope = crate::map::copy_map(func.autos);
    if let Some(subj) = subject {
        let scope_map = unsafe { downcast::<ObjMap>(scope).as_mut() };
        scope_map.super_.set(Some(subj));
        ObjMap::assign_base(scope, well_known().this_, subj)?;
        if let Some(class) = unsafe { downcast::<ObjMap>(func.autos).as_ref() }.super_.get() {
            ObjMap::assign_base(scope, well_known().class, class)?;
        }
    }

    // 2. Bind formal parameters left-to-right.
    let args_arr = unsafe { downcast::<ObjArray>(func.args).as_ref() };
    let nformals = args_arr.len();
    let actuals: Vec<ObjPtr> = ctx.os_pop_n(nargs);
    for (i, name) in args_arr.iter().enumerate() {
        let value = actuals.get(i).copied().unwrap_or_else(null_value);
        ObjMap::assign_base(scope, name, value)?;
    }
    if nargs > nformals && func.vargs_slot {
        let vargs = new_array();
        let arr = unsafe { downcast::<ObjArray>(vargs).as_mut() };
        for extra in &actuals[nformals..] {
            arr.push(*extra)?;
        }
        ObjMap::assign_base(scope, well_known().vargs, vargs)?;
    }

    // 3/4. Push a mark + PC, push the scope.
    ctx.push_call_frame(func.code, scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ObjArray;
    use crate::exec::ExecContext;
    use lam_core::value::{init_primitives, int_value, new_int};
    use std::sync::Once;

    static INIT: Once = Once::new();
    fn setup() {
        INIT.call_once(|| {
            init_primitives();
            crate::map::init_map_type();
            crate::array::init_array_type();
            init_func_types();
        });
    }

    #[test]
    fn cfunc_call_runs_implementation() {
        setup();
        fn add_one(ctx: &mut ExecContext, nargs: usize) -> i32 {
            let args = ctx.os_pop_n(nargs);
            let v = int_value(args[0]);
            ctx.os_push(new_int(v + 1));
            0
        }
        let cf = new_cfunc("add-one", add_one);
        let mut ctx = ExecContext::new();
        ctx.os_push(new_int(41));
        call(&mut ctx, cf, 1).unwrap();
        assert_eq!(int_value(ctx.os_pop().unwrap()), 42);
    }

    #[test]
    fn method_call_binds_this_findable_by_a_fresh_string_literal() {
        setup();
        let obj = crate::map::new_map(None);
        let code = crate::op::new_code(Vec::new());
        let args = new_array();
        let autos = crate::map::new_map(None);
        let f = new_func(code, args, autos, "m".to_string(), false);
        let method = new_method(obj, f);

        let mut ctx = ExecContext::new();
        call(&mut ctx, method, 0).unwrap();

        // A lookup site that never saw the binding site's string object -
        // as a real call site compiled separately would construct - must
        // still find "this" via interning, not raw pointer luck.
        let lookup_key = intern_string("this");
        let scope = ctx.current_scope().unwrap();
        let found = ObjMap::fetch(scope, lookup_key).unwrap();
        assert_eq!(found, obj);
    }
}
