//! Primitive value objects: Int, Float, Null, String.

use crate::alloc::alloc_typed;
use crate::gc::heap;
use crate::header::{ObjHeader, ObjPtr, downcast};
use crate::typetab::{Caps, TCODE_FLOAT, TCODE_INT, TCODE_NULL, TCODE_STRING, TypeDesc, register_builtin};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Global lookaside-invalidation generation counter. Lives here (not in
/// `lam-runtime::map`) because `ObjString`'s lookaside
/// field must read it without a runtime->core dependency inversion; `map`
/// is the only writer.
pub static VSVER: AtomicU64 = AtomicU64::new(1);

pub fn bump_vsver() -> u64 {
    VSVER.fetch_add(1, Ordering::AcqRel) + 1
}

pub fn current_vsver() -> u64 {
    VSVER.load(Ordering::Acquire)
}

#[repr(C)]
pub struct ObjInt {
    pub header: ObjHeader,
    pub value: i64,
}

#[repr(C)]
pub struct ObjFloat {
    pub header: ObjHeader,
    pub value: f64,
}

#[repr(C)]
pub struct ObjNull {
    pub header: ObjHeader,
}

/// The lookup-lookaside cache embedded in every string: the last map that
/// satisfied a lookup using this string as key, the slot pointer, and a
/// generation counter. Kept embedded-and-mutable rather than moved to a
/// thread-local `(map, key)` cache — `map.rs`'s fast path reads and writes
/// this field directly on every lookup.
#[derive(Clone, Copy)]
pub struct Lookaside {
    pub map: Option<ObjPtr>,
    pub slot: usize,
    pub generation: u64,
}

impl Lookaside {
    const EMPTY: Lookaside = Lookaside {
        map: None,
        slot: 0,
        generation: 0,
    };

    pub fn is_valid_for(&self, map: ObjPtr) -> bool {
        self.map == Some(map) && self.generation == current_vsver()
    }
}

#[repr(C)]
pub struct ObjString {
    pub header: ObjHeader,
    pub bytes: Box<[u8]>,
    pub lookaside: Cell<Lookaside>,
}

impl ObjString {
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("<invalid utf8>")
    }
}

static NULL_SINGLETON: OnceLock<ObjPtr> = OnceLock::new();
static SMALL_INTS: OnceLock<Vec<ObjPtr>> = OnceLock::new();

/// Register the four primitive types and pre-intern the null singleton and
/// small integers [0, 255]. Idempotent; call once at startup.
pub fn init_primitives() {
    register_builtin(
        TCODE_NULL,
        TypeDesc {
            name: "null",
            size: std::mem::size_of::<ObjNull>(),
            caps: Caps::OBJNAME,
            mark: |o| unsafe { o.as_ref() }.leafz as usize,
            free: |_o| {},
            cmp: |_a, _b| true,
            hash: |_o| 0,
            copy: |o| o,
            objname: |_| "null".to_string(),
            fetch: None,
            assign: None,
            fetch_super: None,
            assign_super: None,
            fetch_base: None,
            assign_base: None,
        },
    );
    register_builtin(TCODE_INT, int_type_desc());
    register_builtin(TCODE_FLOAT, float_type_desc());
    register_builtin(TCODE_STRING, string_type_desc());

    NULL_SINGLETON.get_or_init(|| {
        let leafz = std::mem::size_of::<ObjNull>() as u8;
        let o = alloc_typed(|| ObjNull {
            header: ObjHeader::new(TCODE_NULL, leafz),
        });
        unsafe { o.as_ref() }.set_atom(true);
        o
    });

    SMALL_INTS.get_or_init(|| (0i64..256).map(new_int_uninterned).collect());
}

pub fn null_value() -> ObjPtr {
    *NULL_SINGLETON.get().expect("init_primitives not called")
}

fn new_int_uninterned(v: i64) -> ObjPtr {
    let leafz = std::mem::size_of::<ObjInt>() as u8;
    let o = alloc_typed(|| ObjInt {
        header: ObjHeader::new(TCODE_INT, leafz),
        value: v,
    });
    let mut h = heap().lock().unwrap();
    h.atoms.atom(o, true, |o| o)
}

/// Construct (and, for small values, return the pre-interned) integer
/// object.
pub fn new_int(v: i64) -> ObjPtr {
    if (0..256).contains(&v) {
        if let Some(table) = SMALL_INTS.get() {
            return table[v as usize];
        }
    }
    let leafz = std::mem::size_of::<ObjInt>() as u8;
    alloc_typed(|| ObjInt {
        header: ObjHeader::new(TCODE_INT, leafz),
        value: v,
    })
}

pub fn int_value(o: ObjPtr) -> i64 {
    unsafe { downcast::<ObjInt>(o).as_ref() }.value
}

pub fn new_float(v: f64) -> ObjPtr {
    let leafz = std::mem::size_of::<ObjFloat>() as u8;
    alloc_typed(|| ObjFloat {
        header: ObjHeader::new(TCODE_FLOAT, leafz),
        value: v,
    })
}

pub fn float_value(o: ObjPtr) -> f64 {
    unsafe { downcast::<ObjFloat>(o).as_ref() }.value
}

pub fn new_string(s: &str) -> ObjPtr {
    alloc_typed(|| ObjString {
        header: ObjHeader::new(TCODE_STRING, 0),
        bytes: s.as_bytes().into(),
        lookaside: Cell::new(Lookaside::EMPTY),
    })
}

/// Intern a string through the atom pool, so that every caller asking for
/// the same content gets back the same `ObjPtr`. Map lookups compare keys
/// by pointer, so any string used as a map key must go through here rather
/// than a bare `new_string`.
pub fn intern_string(s: &str) -> ObjPtr {
    let candidate = new_string(s);
    let mut h = heap().lock().unwrap();
    h.atoms.atom(candidate, true, |o| o)
}

pub fn string_value(o: ObjPtr) -> &'static str {
    // SAFETY: the returned &str borrows the heap object, which outlives the
    // call under the GC's mutex discipline; 'static here is a borrow-checker
    // fiction, not a claim of true static storage.
    unsafe {
        let s = downcast::<ObjString>(o).as_ref();
        std::mem::transmute::<&str, &'static str>(s.as_str())
    }
}

fn int_type_desc() -> TypeDesc {
    fn mark(o: ObjPtr) -> usize {
        unsafe { o.as_ref() }.leafz as usize
    }
    unsafe fn free(o: ObjPtr) {
        unsafe { drop(Box::from_raw(downcast::<ObjInt>(o).as_ptr())) };
    }
    fn cmp(a: ObjPtr, b: ObjPtr) -> bool {
        unsafe { downcast::<ObjInt>(a).as_ref().value == downcast::<ObjInt>(b).as_ref().value }
    }
    fn hash(o: ObjPtr) -> u64 {
        unsafe { downcast::<ObjInt>(o).as_ref().value as u64 }
    }
    fn copy(o: ObjPtr) -> ObjPtr {
        new_int(unsafe { downcast::<ObjInt>(o).as_ref().value })
    }
    TypeDesc {
        name: "int",
        size: std::mem::size_of::<ObjInt>(),
        caps: Caps::OBJNAME,
        mark,
        free,
        cmp,
        hash,
        copy,
        objname: |o| unsafe { downcast::<ObjInt>(o).as_ref().value.to_string() },
        fetch: None,
        assign: None,
        fetch_super: None,
        assign_super: None,
        fetch_base: None,
        assign_base: None,
    }
}

fn float_type_desc() -> TypeDesc {
    unsafe fn free(o: ObjPtr) {
        unsafe { drop(Box::from_raw(downcast::<ObjFloat>(o).as_ptr())) };
    }
    fn cmp(a: ObjPtr, b: ObjPtr) -> bool {
        unsafe { downcast::<ObjFloat>(a).as_ref().value == downcast::<ObjFloat>(b).as_ref().value }
    }
    fn hash(o: ObjPtr) -> u64 {
        unsafe { downcast::<ObjFloat>(o).as_ref().value.to_bits() }
    }
    fn copy(o: ObjPtr) -> ObjPtr {
        new_float(unsafe { downcast::<ObjFloat>(o).as_ref().value })
    }
    TypeDesc {
        name: "float",
        size: std::mem::size_of::<ObjFloat>(),
        caps: Caps::OBJNAME,
        mark: |o| unsafe { o.as_ref() }.leafz as usize,
        free,
        cmp,
        hash,
        copy,
        objname: |o| unsafe { downcast::<ObjFloat>(o).as_ref().value.to_string() },
        fetch: None,
        assign: None,
        fetch_super: None,
        assign_super: None,
        fetch_base: None,
        assign_base: None,
    }
}

fn string_type_desc() -> TypeDesc {
    unsafe fn free(o: ObjPtr) {
        unsafe { drop(Box::from_raw(downcast::<ObjString>(o).as_ptr())) };
    }
    fn cmp(a: ObjPtr, b: ObjPtr) -> bool {
        unsafe { downcast::<ObjString>(a).as_ref().bytes == downcast::<ObjString>(b).as_ref().bytes }
    }
    fn hash(o: ObjPtr) -> u64 {
        // FNV-1a.
        let s = unsafe { downcast::<ObjString>(o).as_ref() };
        let mut h: u64 = 0xcbf29ce484222325;
        for &b in s.bytes.iter() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        h
    }
    fn copy(o: ObjPtr) -> ObjPtr {
        let s = unsafe { downcast::<ObjString>(o).as_ref() };
        new_string(s.as_str())
    }
    TypeDesc {
        name: "string",
        size: std::mem::size_of::<ObjString>(),
        caps: Caps::OBJNAME,
        mark: |o| {
            let s = unsafe { downcast::<ObjString>(o).as_ref() };
            std::mem::size_of::<ObjString>() + s.bytes.len()
        },
        free,
        cmp,
        hash,
        copy,
        objname: |o| unsafe { downcast::<ObjString>(o).as_ref().as_str().to_string() },
        fetch: None,
        assign: None,
        fetch_super: None,
        assign_super: None,
        fetch_base: None,
        assign_base: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn setup() {
        INIT.call_once(init_primitives);
    }

    #[test]
    fn small_ints_are_preinterned() {
        setup();
        let a = new_int(42);
        let b = new_int(42);
        assert_eq!(a, b);
        assert!(unsafe { a.as_ref() }.is_atom());
    }

    #[test]
    fn large_ints_are_distinct_until_interned() {
        setup();
        let a = new_int(100_000);
        let b = new_int(100_000);
        assert_ne!(a, b);
        assert_eq!(int_value(a), int_value(b));
    }

    #[test]
    fn string_round_trips_bytes() {
        setup();
        let s = new_string("hello");
        assert_eq!(string_value(s), "hello");
    }

    #[test]
    fn null_is_singleton_and_atomic() {
        setup();
        let n1 = null_value();
        let n2 = null_value();
        assert_eq!(n1, n2);
        assert!(unsafe { n1.as_ref() }.is_atom());
    }
}
