//! Compiled-pattern atom wrapping `regex::Regex`: compiled pattern atoms
//! plus sub-match state.
//!
//! A regexp is an atom like any other — equal pattern + options collapse to
//! one compiled instance via the atom pool — and exposes `pattern`/`options`
//! through `fetch`. It archives as a u32 options word followed by the
//! pattern string. `options` is a bitmask translated into the `(?ims...)`
//! inline-flag prefix `regex::Regex` understands, since this crate has no
//! PCRE binding to pass raw PCRE option bits to.

use crate::exec::ExecContext;
use lam_core::error::{ErrorKind, LamError};
use lam_core::gc::heap;
use lam_core::header::{ObjHeader, ObjPtr, downcast};
use lam_core::typetab::{Caps, TCODE_REGEXP, TypeDesc, register_builtin, type_table};
use lam_core::value::{intern_string, new_int, new_string, string_value};
use regex::Regex;
use std::sync::OnceLock;

pub const OPT_CASELESS: u32 = 1 << 0;
pub const OPT_MULTILINE: u32 = 1 << 1;
pub const OPT_DOTALL: u32 = 1 << 2;
pub const OPT_EXTENDED: u32 = 1 << 3;

#[repr(C)]
pub struct ObjRegexp {
    pub header: ObjHeader,
    pub pattern: ObjPtr,
    pub options: u32,
    pub re: Regex,
}

fn inline_flags(options: u32) -> String {
    let mut flags = String::new();
    if options & OPT_CASELESS != 0 {
        flags.push('i');
    }
    if options & OPT_MULTILINE != 0 {
        flags.push('m');
    }
    if options & OPT_DOTALL != 0 {
        flags.push('s');
    }
    if options & OPT_EXTENDED != 0 {
        flags.push('x');
    }
    if flags.is_empty() { String::new() } else { format!("(?{flags})") }
}

/// Compile and intern a regexp atom. Two calls with the same pattern text
/// and options return the same `ObjPtr`.
pub fn new_regexp(pattern: &str, options: u32) -> Result<ObjPtr, LamError> {
    let full = format!("{}{}", inline_flags(options), pattern);
    let re = Regex::new(&full)
        .map_err(|e| LamError::new(ErrorKind::ProtocolViolation, format!("invalid regexp '{pattern}': {e}")))?;
    let pattern_obj = intern_string(pattern);
    let candidate = lam_core::alloc::alloc_typed(|| ObjRegexp {
        header: ObjHeader::new(TCODE_REGEXP, 0),
        pattern: pattern_obj,
        options,
        re,
    });
    let mut h = heap().lock().unwrap();
    Ok(h.atoms.atom(candidate, true, |o| o))
}

pub fn pattern_of(o: ObjPtr) -> ObjPtr {
    unsafe { downcast::<ObjRegexp>(o).as_ref() }.pattern
}

pub fn options_of(o: ObjPtr) -> u32 {
    unsafe { downcast::<ObjRegexp>(o).as_ref() }.options
}

pub fn regex_of(o: ObjPtr) -> &'static Regex {
    // SAFETY: mirrors `value::string_value`'s borrow-outlives-the-call
    // convention — the regexp is interned and immutable for the rest of the
    // program's life under the GC's mutex discipline.
    unsafe { std::mem::transmute::<&Regex, &'static Regex>(&downcast::<ObjRegexp>(o).as_ref().re) }
}

struct WellKnownKeys {
    pattern: ObjPtr,
    options: ObjPtr,
}

fn well_known() -> &'static WellKnownKeys {
    static KEYS: OnceLock<WellKnownKeys> = OnceLock::new();
    KEYS.get_or_init(|| WellKnownKeys {
        pattern: intern_string("pattern"),
        options: intern_string("options"),
    })
}

fn fetch(o: ObjPtr, k: ObjPtr) -> Option<ObjPtr> {
    let keys = well_known();
    if k == keys.pattern {
        Some(pattern_of(o))
    } else if k == keys.options {
        Some(new_int(options_of(o) as i64))
    } else {
        None
    }
}

fn type_desc() -> TypeDesc {
    unsafe fn free(o: ObjPtr) {
        unsafe { drop(Box::from_raw(downcast::<ObjRegexp>(o).as_ptr())) };
    }
    fn cmp(a: ObjPtr, b: ObjPtr) -> bool {
        let (a, b) = unsafe { (downcast::<ObjRegexp>(a).as_ref(), downcast::<ObjRegexp>(b).as_ref()) };
        a.pattern == b.pattern && a.options == b.options
    }
    fn hash(o: ObjPtr) -> u64 {
        let r = unsafe { downcast::<ObjRegexp>(o).as_ref() };
        r.pattern.as_ptr() as u64 ^ (r.options as u64).wrapping_mul(0x9E3779B97F4A7C15)
    }
    fn copy(o: ObjPtr) -> ObjPtr {
        o
    }
    TypeDesc {
        name: "regexp",
        size: std::mem::size_of::<ObjRegexp>(),
        caps: Caps::OBJNAME | Caps::FETCH,
        mark: |o| {
            let r = unsafe { downcast::<ObjRegexp>(o).as_ref() };
            let mut total = std::mem::size_of::<ObjRegexp>();
            let phdr = unsafe { r.pattern.as_ref() };
            if !phdr.is_marked() {
                let tt = type_table().read().unwrap();
                total += (tt.get(phdr.tcode).mark)(r.pattern);
            }
            total
        },
        free,
        cmp,
        hash,
        copy,
        objname: |o| format!("regexp(\"{}\")", string_value(pattern_of(o))),
        fetch: Some(fetch),
        assign: None,
        fetch_super: None,
        assign_super: None,
        fetch_base: None,
        assign_base: None,
    }
}

pub fn init_regexp_type() {
    register_builtin(TCODE_REGEXP, type_desc());
}

/// `match(subject) -> bool`; `captures` below is the form that records
/// sub-match state.
pub fn matches(re: ObjPtr, subject: &str) -> bool {
    regex_of(re).is_match(subject)
}

/// `captures(subject) -> Option<Vec<Option<String>>>`: the full match
/// followed by each capture group, `None` for groups that did not
/// participate. Drives the `func::Cfunc` exposed to scripts by `ffi.rs`.
pub fn captures(re: ObjPtr, subject: &str) -> Option<Vec<Option<String>>> {
    let caps = regex_of(re).captures(subject)?;
    Some(caps.iter().map(|m| m.map(|m| m.as_str().to_string())).collect())
}

/// Native callable wired up for scripts: `re subject regexp.match?` leaves a
/// boolean. Wired via `func::new_cfunc` from `ffi.rs`'s builtin registration.
pub fn cf_match(ctx: &mut ExecContext, nargs: usize) -> i32 {
    let args = ctx.os_pop_n(nargs);
    if args.len() != 2 {
        return arity_error(ctx, 2, args.len());
    }
    let subject = string_value(args[0]);
    let result = matches(args[1], subject);
    ctx.os_push(if result { new_int(1) } else { new_int(0) });
    0
}

fn arity_error(ctx: &mut ExecContext, want: usize, got: usize) -> i32 {
    let _ = ctx;
    lam_core::error::set_error(LamError::new(
        ErrorKind::ArityMismatch,
        format!("regexp.match?: expected {want} args, got {got}"),
    ));
    1
}

/// `re subject regexp.captures` leaves an array of matched strings (`null`
/// where a group did not participate), or `null` if there was no match.
pub fn cf_captures(ctx: &mut ExecContext, nargs: usize) -> i32 {
    let args = ctx.os_pop_n(nargs);
    if args.len() != 2 {
        return arity_error(ctx, 2, args.len());
    }
    let subject = string_value(args[0]);
    match captures(args[1], subject) {
        Some(groups) => {
            let arr = crate::array::new_array();
            let a = unsafe { downcast::<crate::array::ObjArray>(arr).as_mut() };
            for g in groups {
                let v = match g {
                    Some(s) => new_string(&s),
                    None => lam_core::value::null_value(),
                };
                let _ = a.push(v);
            }
            ctx.os_push(arr);
        }
        None => ctx.os_push(lam_core::value::null_value()),
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use lam_core::value::init_primitives;
    use std::sync::Once;

    static SETUP: Once = Once::new();
    fn setup() {
        SETUP.call_once(|| {
            init_primitives();
            init_regexp_type();
            crate::array::init_array_type();
        });
    }

    #[test]
    fn equal_pattern_and_options_collapse_to_one_instance() {
        setup();
        let a = new_regexp("a+b", 0).unwrap();
        let b = new_regexp("a+b", 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_options_are_distinct_atoms() {
        setup();
        let a = new_regexp("abc", 0).unwrap();
        let b = new_regexp("abc", OPT_CASELESS).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn matches_respects_caseless_option() {
        setup();
        let re = new_regexp("ABC", OPT_CASELESS).unwrap();
        assert!(matches(re, "xxabcxx"));
    }

    #[test]
    fn captures_returns_groups() {
        setup();
        let re = new_regexp(r"(\d+)-(\d+)", 0).unwrap();
        let caps = captures(re, "42-7").unwrap();
        assert_eq!(caps[1].as_deref(), Some("42"));
        assert_eq!(caps[2].as_deref(), Some("7"));
    }

    #[test]
    fn invalid_pattern_is_a_protocol_violation() {
        setup();
        let err = new_regexp("(unclosed", 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProtocolViolation);
    }
}
