//! lam-core: the language-agnostic foundation — object header, type table,
//! allocator, atom pool, garbage collector, and primitive value
//! representations.
//!
//! # Modules
//!
//! - `header`: the uniform 4-byte `ObjHeader` every heap object begins with
//! - `typetab`: process-wide type table (mark/free/cmp/hash/copy/fetch/...)
//! - `alloc`: typed and raw allocation paths through the heap accountant
//! - `atom`: the open-addressed atom (intern) pool
//! - `gc`: mark-and-sweep collector and the shared heap state
//! - `value`: Int, Float, Null, String primitive objects
//! - `error`: thread-local error cell and typed `ErrorKind`

pub mod alloc;
pub mod atom;
pub mod error;
pub mod gc;
pub mod header;
pub mod typetab;
pub mod value;

pub use error::{ErrorKind, LamError, clear_error, has_error, set_error, take_error};
pub use gc::{Heap, SuppressCollect, collect, heap};
pub use header::{FLAG_ATOM, FLAG_MARK, FLAG_OLD, FLAG_SUPER, ObjHeader, ObjPtr};
pub use typetab::{Caps, TypeDesc, register_type, type_table};
pub use value::{
    bump_vsver, current_vsver, float_value, init_primitives, int_value, intern_string, new_float,
    new_int, new_string, null_value, string_value, Lookaside, ObjFloat, ObjInt, ObjNull, ObjString,
    VSVER,
};
