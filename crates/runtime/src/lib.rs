//! lam-runtime: the tree-walking interpreter built on `lam-core`'s object
//! model — maps, arrays, functions, the opcode dispatch loop, the
//! coroutine scheduler, the archive protocol, and the C embedder surface.
//!
//! # Modules
//!
//! - `map`: Map/struct with single-inheritance super chains
//! - `array`: circular-buffer array, doubles as the interpreter stack
//! - `func`: Func/Cfunc/Method/Ptr/Handle and the call protocol
//! - `op`: compiled opcode representation (`Op`/`OpEcode`/`BinOp`/`ObjCode`)
//! - `exec`: per-thread `ExecContext` (the three stacks, src marker, tick)
//! - `engine`: the dispatch loop that drives an `ExecContext`
//! - `scheduler`: May-coroutine threads, GIL, enter/leave/yield/waitfor/wakeup
//! - `regexp`: atomic, interned `regex::Regex` wrapper
//! - `archive`: binary big-endian cycle-safe save/restore
//! - `src`: source-position markers for error expansion
//! - `signals`: Unix signal bridge, polled from the engine's tick
//! - `debug`: optional error/fncall/fnresult/src/watch hooks
//! - `config`: `LAM_*` environment-variable configuration
//! - `diagnostics` / `report` / `report_stub`: SIGQUIT dump and at-exit report
//! - `ffi`: the C embedder surface (the `lam_*` ABI)

pub mod archive;
pub mod array;
pub mod config;
pub mod debug;
pub mod diagnostics;
pub mod engine;
pub mod exec;
pub mod ffi;
pub mod func;
pub mod map;
pub mod op;
pub mod regexp;
pub mod scheduler;
pub mod signals;
pub mod src;

#[cfg(feature = "diagnostics")]
pub mod report;
#[cfg(not(feature = "diagnostics"))]
pub mod report_stub;
#[cfg(not(feature = "diagnostics"))]
pub use report_stub as report;

pub use archive::{restore, save};
pub use array::{ObjArray, init_array_type, new_array};
pub use config::{DEFAULT_STACK_SIZE, gc_threshold_override, stack_size};
pub use debug::{DebugHooks, current_position};
pub use engine::run;
pub use exec::{COUNT_QUANTUM, ExecContext, ExecState, Mark, PC};
pub use func::{
    CfuncImpl, ObjCfunc, ObjFunc, ObjHandle, ObjLangPtr, ObjMethod, call, call_with_subject,
    init_func_types, new_cfunc, new_func, new_handle, new_langptr, new_method,
};
pub use map::{ObjMap, copy_map, init_map_type, new_map};
pub use op::{BinOp, Op, ObjCode, OpEcode, code_tcode, init_code_type, new_code};
pub use regexp::{
    ObjRegexp, OPT_CASELESS, OPT_DOTALL, OPT_EXTENDED, OPT_MULTILINE, init_regexp_type, new_regexp,
};
pub use scheduler::{ThreadHandle, go, wait_all, waitfor, wakeup};
pub use src::{ObjSrc, filename_of, init_src_type, lineno_of, new_src};

/// Register every built-in type this crate defines. Called once from
/// `ffi::lam_init`, after `lam_core::init_primitives`.
pub fn init_types() {
    lam_core::value::init_primitives();
    map::init_map_type();
    array::init_array_type();
    op::init_code_type();
    func::init_func_types();
    regexp::init_regexp_type();
    src::init_src_type();
}
