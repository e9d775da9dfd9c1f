//! The allocator: a typed path for fixed-size object structs and a raw-byte
//! path for variable-size payloads (string buffers, array backing stores),
//! both routed through the single heap accountant in `gc::Heap` so the GC
//! threshold sees every allocation.

use crate::gc::{heap, collect};
use crate::header::{ObjPtr, erase};
use std::ptr::NonNull;

/// Allocate and register a fixed-size, header-prefixed object.
///
/// `build` constructs the value (its first field must be `ObjHeader`,
/// already initialized with the correct tcode). The allocator checks the
/// GC threshold *before* allocating: every allocation checks whether
/// accumulated bytes exceed the dynamic GC threshold, and on breach a
/// collection runs synchronously before the allocation proceeds.
pub fn alloc_typed<T>(build: impl FnOnce() -> T) -> ObjPtr {
    let size = std::mem::size_of::<T>() as u64;
    maybe_collect(size);

    let boxed = Box::new(build());
    let ptr = unsafe { erase(NonNull::new_unchecked(Box::into_raw(boxed))) };

    let mut h = heap().lock().unwrap();
    h.register(ptr);
    h.live_bytes += size;
    ptr
}

/// Allocate a raw byte buffer (e.g. a string's backing store), tracked in
/// the same global byte counter but not itself a GC object.
pub fn alloc_raw(size: usize) -> Box<[u8]> {
    maybe_collect(size as u64);
    let mut h = heap().lock().unwrap();
    h.live_bytes += size as u64;
    vec![0u8; size].into_boxed_slice()
}

fn maybe_collect(pending: u64) {
    let mut h = heap().lock().unwrap();
    if h.should_collect(pending) {
        collect(&mut h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ObjHeader;
    use crate::typetab::{Caps, TypeDesc, register_builtin};

    #[repr(C)]
    struct Small {
        header: ObjHeader,
    }

    const SMALL_TCODE: u8 = 202;

    fn register_small() {
        register_builtin(
            SMALL_TCODE,
            TypeDesc {
                name: "small",
                size: std::mem::size_of::<Small>(),
                caps: Caps::NONE,
                mark: |o| unsafe { o.as_ref() }.leafz as usize,
                free: |o| unsafe { drop(Box::from_raw(o.cast::<Small>().as_ptr())) },
                cmp: |a, b| a == b,
                hash: |o| o.as_ptr() as u64,
                copy: |o| o,
                objname: |_| "small".into(),
                fetch: None,
                assign: None,
                fetch_super: None,
                assign_super: None,
                fetch_base: None,
                assign_base: None,
            },
        );
    }

    #[test]
    fn alloc_typed_registers_in_heap() {
        register_small();
        let before = heap().lock().unwrap().all_objects.len();
        let _o = alloc_typed(|| Small {
            header: ObjHeader::new(SMALL_TCODE, std::mem::size_of::<Small>() as u8),
        });
        let after = heap().lock().unwrap().all_objects.len();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn alloc_raw_tracks_bytes() {
        let before = heap().lock().unwrap().live_bytes;
        let buf = alloc_raw(128);
        assert_eq!(buf.len(), 128);
        let after = heap().lock().unwrap().live_bytes;
        assert_eq!(after, before + 128);
    }
}
