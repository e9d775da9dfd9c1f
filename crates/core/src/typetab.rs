//! Process-wide type table: the dispatch mechanism every object operation
//! goes through instead of a `match` on a tagged enum.

use crate::header::ObjPtr;
use std::sync::{OnceLock, RwLock};

/// Built-in type codes. New types register dynamically starting at
/// `TCODE_DYNAMIC_BASE`.
pub const TCODE_NULL: u8 = 0;
pub const TCODE_INT: u8 = 1;
pub const TCODE_FLOAT: u8 = 2;
pub const TCODE_STRING: u8 = 3;
pub const TCODE_MAP: u8 = 4;
pub const TCODE_ARRAY: u8 = 5;
pub const TCODE_FUNC: u8 = 6;
pub const TCODE_CFUNC: u8 = 7;
pub const TCODE_METHOD: u8 = 8;
pub const TCODE_PTR: u8 = 9;
pub const TCODE_HANDLE: u8 = 10;
pub const TCODE_REGEXP: u8 = 11;
pub const TCODE_EXEC: u8 = 12;
pub const TCODE_OP: u8 = 13;
pub const TCODE_SRC: u8 = 14;
pub const TCODE_CATCHER: u8 = 15;
pub const TCODE_MARK: u8 = 16;

pub const TCODE_DYNAMIC_BASE: u8 = 32;

/// A minimal hand-rolled bitflags macro: pulling in the `bitflags` crate for
/// one small struct isn't worth a new dependency, so capability flags are a
/// plain `u16` newtype with associated consts.
macro_rules! bitflags_lite {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $ty);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub const NONE: $name = $name(0);

            pub const fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn union(self, other: $name) -> $name {
                $name(self.0 | other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                self.union(rhs)
            }
        }
    };
}

bitflags_lite! {
    /// Which optional operations a type supports. Calling an unsupported
    /// operation raises `ErrorKind::TypeMismatch` rather than panicking.
    pub struct Caps: u16 {
        const FORALL      = 1 << 0;
        const CALL        = 1 << 1;
        const OBJNAME     = 1 << 2;
        const FETCH       = 1 << 3;
        const ASSIGN      = 1 << 4;
        const FETCH_SUPER = 1 << 5;
        const ASSIGN_SUPER= 1 << 6;
        const FETCH_BASE  = 1 << 7;
        const ASSIGN_BASE = 1 << 8;
        const SAVE        = 1 << 9;
        const RESTORE     = 1 << 10;
    }
}

/// Function-pointer table for one registered type. Every field operates on
/// a type-erased `ObjPtr`; implementations downcast via `header::downcast`.
pub struct TypeDesc {
    pub name: &'static str,
    pub size: usize,
    pub caps: Caps,

    /// Mark this object (and transitively its referents) as reachable;
    /// returns the total byte size of the subtree for the GC threshold
    /// heuristic (kept fused with marking rather than a separate pass).
    pub mark: fn(ObjPtr) -> usize,
    /// Release a no-longer-reachable object's owned resources and the
    /// allocation itself.
    ///
    /// # Safety
    /// Must only be called by the sweeper on an object proven unreachable.
    pub free: unsafe fn(ObjPtr),
    /// Structural equality, used by the atom pool and `==`.
    pub cmp: fn(ObjPtr, ObjPtr) -> bool,
    /// Must agree with `cmp`: `cmp(a,b) ⇒ hash(a)==hash(b)`.
    pub hash: fn(ObjPtr) -> u64,
    /// Produce a fresh, non-atomic copy.
    pub copy: fn(ObjPtr) -> ObjPtr,
    /// Short human-readable description, used in error messages.
    pub objname: fn(ObjPtr) -> String,

    pub fetch: Option<fn(ObjPtr, ObjPtr) -> Option<ObjPtr>>,
    pub assign: Option<fn(ObjPtr, ObjPtr, ObjPtr) -> Result<(), crate::error::LamError>>,
    pub fetch_super: Option<fn(ObjPtr, ObjPtr) -> Option<ObjPtr>>,
    pub assign_super: Option<fn(ObjPtr, ObjPtr, ObjPtr) -> Result<(), crate::error::LamError>>,
    pub fetch_base: Option<fn(ObjPtr, ObjPtr) -> Option<ObjPtr>>,
    pub assign_base: Option<fn(ObjPtr, ObjPtr, ObjPtr) -> Result<(), crate::error::LamError>>,
}

pub struct TypeTable {
    descs: Vec<TypeDesc>,
}

impl TypeTable {
    fn new() -> Self {
        TypeTable { descs: Vec::new() }
    }

    pub fn get(&self, tcode: u8) -> &TypeDesc {
        self.descs
            .get(tcode as usize)
            .unwrap_or_else(|| panic!("unregistered tcode {tcode}"))
    }

    /// Register a type at a specific built-in slot. Used once at startup by
    /// `lam-core::value` and by `lam-runtime` for its aggregate types.
    pub fn register_at(&mut self, tcode: u8, desc: TypeDesc) {
        let idx = tcode as usize;
        if self.descs.len() <= idx {
            self.descs.resize_with(idx + 1, || desc_placeholder());
        }
        self.descs[idx] = desc;
    }

    /// Register a new type dynamically, returning its freshly-assigned
    /// tcode. New tcodes beyond the built-in range start at
    /// `TCODE_DYNAMIC_BASE`.
    pub fn register(&mut self, desc: TypeDesc) -> u8 {
        let tcode = self.descs.len().max(TCODE_DYNAMIC_BASE as usize) as u8;
        self.register_at(tcode, desc);
        tcode
    }
}

fn desc_placeholder() -> TypeDesc {
    TypeDesc {
        name: "<unregistered>",
        size: 0,
        caps: Caps::NONE,
        mark: |_| 0,
        free: |_| {},
        cmp: |a, b| a == b,
        hash: |o| o.as_ptr() as u64,
        copy: |o| o,
        objname: |_| "<unregistered>".to_string(),
        fetch: None,
        assign: None,
        fetch_super: None,
        assign_super: None,
        fetch_base: None,
        assign_base: None,
    }
}

static TYPE_TABLE: OnceLock<RwLock<TypeTable>> = OnceLock::new();

pub fn type_table() -> &'static RwLock<TypeTable> {
    TYPE_TABLE.get_or_init(|| RwLock::new(TypeTable::new()))
}

/// Register a type at a fixed built-in slot. Called from `lam-core::value`'s
/// module-init and from `lam-runtime`'s aggregate type modules.
pub fn register_builtin(tcode: u8, desc: TypeDesc) {
    type_table().write().unwrap().register_at(tcode, desc);
}

/// Register a new type at runtime, returning its assigned tcode.
pub fn register_type(desc: TypeDesc) -> u8 {
    type_table().write().unwrap().register(desc)
}
