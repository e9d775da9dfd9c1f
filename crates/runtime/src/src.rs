//! Source-position markers: a small heap object pairing a line number with
//! a filename string, emitted into a compiled code array by the (external,
//! out-of-scope) compiler at points where an error should be able to name
//! its origin. The engine never allocates these itself — it only notices
//! one going by (`engine::step`'s `Push` arm) and remembers it on
//! `ExecContext::src` for the error path to read.

use lam_core::alloc::alloc_typed;
use lam_core::header::{ObjHeader, ObjPtr, downcast};
use lam_core::typetab::{Caps, TCODE_SRC, TypeDesc, register_builtin};
use lam_core::value::string_value;

#[repr(C)]
pub struct ObjSrc {
    pub header: ObjHeader,
    pub lineno: i32,
    pub filename: ObjPtr,
}

pub fn new_src(lineno: i32, filename: ObjPtr) -> ObjPtr {
    alloc_typed(|| ObjSrc {
        header: ObjHeader::new(TCODE_SRC, 0),
        lineno,
        filename,
    })
}

pub fn lineno_of(o: ObjPtr) -> i32 {
    unsafe { downcast::<ObjSrc>(o).as_ref() }.lineno
}

pub fn filename_of(o: ObjPtr) -> ObjPtr {
    unsafe { downcast::<ObjSrc>(o).as_ref() }.filename
}

pub fn init_src_type() {
    unsafe fn free(o: ObjPtr) {
        unsafe { drop(Box::from_raw(downcast::<ObjSrc>(o).as_ptr())) };
    }
    fn mark(o: ObjPtr) -> usize {
        let this = unsafe { downcast::<ObjSrc>(o).as_ref() };
        unsafe { this.filename.as_ref() };
        std::mem::size_of::<ObjSrc>()
    }
    fn cmp(a: ObjPtr, b: ObjPtr) -> bool {
        let (a, b) = unsafe { (downcast::<ObjSrc>(a).as_ref(), downcast::<ObjSrc>(b).as_ref()) };
        a.lineno == b.lineno && a.filename == b.filename
    }
    fn hash(o: ObjPtr) -> u64 {
        let s = unsafe { downcast::<ObjSrc>(o).as_ref() };
        (s.lineno as u64) ^ (s.filename.as_ptr() as u64).wrapping_mul(0x9E3779B97F4A7C15)
    }
    register_builtin(
        TCODE_SRC,
        TypeDesc {
            name: "src",
            size: std::mem::size_of::<ObjSrc>(),
            caps: Caps::OBJNAME,
            mark,
            free,
            cmp,
            hash,
            copy: |o| o,
            objname: |o| format!("{}:{}", string_value(filename_of(o)), lineno_of(o)),
            fetch: None,
            assign: None,
            fetch_super: None,
            assign_super: None,
            fetch_base: None,
            assign_base: None,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use lam_core::value::{init_primitives, intern_string};
    use std::sync::Once;

    static SETUP: Once = Once::new();
    fn setup() {
        SETUP.call_once(|| {
            init_primitives();
            init_src_type();
        });
    }

    #[test]
    fn records_line_and_filename() {
        setup();
        let file = intern_string("demo.ici");
        let s = new_src(42, file);
        assert_eq!(lineno_of(s), 42);
        assert_eq!(filename_of(s), file);
    }

    #[test]
    fn objname_reads_as_file_colon_line() {
        setup();
        let file = intern_string("a.ici");
        let s = new_src(7, file);
        let tt = lam_core::type_table().read().unwrap();
        let name = (tt.get(TCODE_SRC).objname)(s);
        assert_eq!(name, "a.ici:7");
    }
}
