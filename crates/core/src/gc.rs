//! Mark-and-sweep garbage collector and the heap state it shares with the
//! allocator and atom pool.
//!
//! The all-objects list is a growable array (`Vec<ObjPtr>`), not an
//! intrusive linked list: the 4-byte `ObjHeader` has no room for a next
//! pointer.

use crate::atom::AtomPool;
use crate::header::ObjPtr;
use crate::typetab::type_table;
use std::sync::{Mutex, OnceLock};

const INITIAL_THRESHOLD: u64 = 256 * 1024;

/// All process-wide mutable GC/allocator state, guarded by one mutex — the
/// same global mutex the scheduler serializes execution behind doubles as
/// the heap lock here.
pub struct Heap {
    pub all_objects: Vec<ObjPtr>,
    pub atoms: AtomPool,
    pub live_bytes: u64,
    pub threshold: u64,
    pub suppress_collect: u32,
}

impl Heap {
    fn new() -> Self {
        Heap {
            all_objects: Vec::new(),
            atoms: AtomPool::new(),
            live_bytes: 0,
            threshold: INITIAL_THRESHOLD,
            suppress_collect: 0,
        }
    }

    /// Register a freshly allocated object in the all-objects list. Called
    /// by `alloc::alloc_typed`/`alloc_raw` immediately after construction.
    pub fn register(&mut self, o: ObjPtr) {
        self.all_objects.push(o);
    }

    pub fn should_collect(&self, pending_bytes: u64) -> bool {
        self.suppress_collect == 0 && self.live_bytes + pending_bytes > self.threshold
    }
}

static HEAP: OnceLock<Mutex<Heap>> = OnceLock::new();

pub fn heap() -> &'static Mutex<Heap> {
    HEAP.get_or_init(|| Mutex::new(Heap::new()))
}

/// Override the collection threshold, e.g. from `LAM_GC_THRESHOLD` at
/// startup (`lam-runtime::config`). A no-op once the heap has already grown
/// past the requested value on its own.
pub fn configure_threshold(bytes: u64) {
    heap().lock().unwrap().threshold = std::cmp::max(INITIAL_THRESHOLD, bytes);
}

/// RAII guard: increments `suppress_collect` on construction, decrements on
/// drop. Used around atom-pool growth, object construction before
/// registration, and the archiver's record step.
pub struct SuppressCollect;

impl SuppressCollect {
    pub fn enter() -> Self {
        heap().lock().unwrap().suppress_collect += 1;
        SuppressCollect
    }
}

impl Drop for SuppressCollect {
    fn drop(&mut self) {
        heap().lock().unwrap().suppress_collect -= 1;
    }
}

/// Root set: the set of all-objects-list entries with `nrefs > 0`. The
/// three active stacks (xs/os/vs) of every exec context hold their own
/// nrefs on the array objects themselves; contents are reached
/// transitively via those arrays' `mark` ops.
fn mark_phase(heap: &mut Heap) -> u64 {
    let tt = type_table().read().unwrap();
    let mut total = 0u64;
    for &o in &heap.all_objects {
        let hdr = unsafe { o.as_ref() };
        if hdr.nrefs() > 0 {
            let desc = tt.get(hdr.tcode);
            total += (desc.mark)(o) as u64;
        }
    }
    total
}

/// Sweep phase: free every unmarked object, clear MARK on survivors and set
/// OLD. Returns the number of objects freed.
fn sweep_phase(heap: &mut Heap) -> usize {
    let tt = type_table().read().unwrap();
    let mut survivors = Vec::with_capacity(heap.all_objects.len());
    let mut freed = 0usize;

    for &o in &heap.all_objects {
        let hdr = unsafe { o.as_ref() };
        if hdr.is_marked() {
            hdr.set_marked(false);
            hdr.set_old();
            survivors.push(o);
        } else {
            if hdr.is_atom() {
                if let Some(slot) = heap.atoms.slot_of(o) {
                    heap.atoms.remove_at(slot);
                }
            }
            let desc = tt.get(hdr.tcode);
            unsafe { (desc.free)(o) };
            freed += 1;
        }
    }

    heap.all_objects = survivors;
    freed
}

/// Run a full collection. Must be called with the heap mutex already held
/// by the caller's thread (the allocator calls this inline while holding
/// the lock it took for the allocation itself).
pub fn collect(heap: &mut Heap) -> u64 {
    let live = mark_phase(heap);
    sweep_phase(heap);
    heap.live_bytes = live;
    heap.threshold = std::cmp::max(INITIAL_THRESHOLD, live + live / 2);
    live
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{ObjHeader, erase};
    use crate::typetab::{Caps, TypeDesc, register_builtin};
    use std::ptr::NonNull;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[repr(C)]
    struct Leaf {
        header: ObjHeader,
    }

    const LEAF_TCODE: u8 = 201;
    static FREED: AtomicUsize = AtomicUsize::new(0);

    fn register_leaf() {
        unsafe fn free(o: ObjPtr) {
            FREED.fetch_add(1, Ordering::SeqCst);
            unsafe {
                drop(Box::from_raw(o.cast::<Leaf>().as_ptr()));
            }
        }
        register_builtin(
            LEAF_TCODE,
            TypeDesc {
                name: "leaf",
                size: std::mem::size_of::<Leaf>(),
                caps: Caps::NONE,
                mark: |o| unsafe { o.as_ref() }.leafz as usize,
                free,
                cmp: |a, b| a == b,
                hash: |o| o.as_ptr() as u64,
                copy: |o| o,
                objname: |_| "leaf".into(),
                fetch: None,
                assign: None,
                fetch_super: None,
                assign_super: None,
                fetch_base: None,
                assign_base: None,
            },
        );
    }

    fn make_leaf(rooted: bool) -> ObjPtr {
        let mut header = ObjHeader::new(LEAF_TCODE, std::mem::size_of::<Leaf>() as u8);
        if !rooted {
            header.nrefs.set(0);
        }
        let boxed = Box::new(Leaf { header });
        unsafe { erase(NonNull::new_unchecked(Box::into_raw(boxed))) }
    }

    #[test]
    fn unreferenced_unmarked_objects_are_freed() {
        register_leaf();
        FREED.store(0, Ordering::SeqCst);
        let mut heap = Heap::new();
        let rooted = make_leaf(true);
        let garbage = make_leaf(false);
        heap.register(rooted);
        heap.register(garbage);

        collect(&mut heap);

        assert_eq!(heap.all_objects.len(), 1);
        assert_eq!(heap.all_objects[0], rooted);
        assert!(FREED.load(Ordering::SeqCst) >= 1);
        assert!(unsafe { rooted.as_ref() }.flags.get() & crate::header::FLAG_OLD != 0);
    }

    #[test]
    fn threshold_grows_with_live_bytes() {
        register_leaf();
        let mut heap = Heap::new();
        for _ in 0..10 {
            heap.register(make_leaf(true));
        }
        let before = heap.threshold;
        collect(&mut heap);
        assert!(heap.threshold >= before);
    }
}
