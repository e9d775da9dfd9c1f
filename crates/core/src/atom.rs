//! The atom pool: an open-addressed hash table of interned, immutable
//! objects.
//!
//! Probing walks downward (`slot = (slot + size - 1) % size`) with
//! wraparound — the atom pool and `map.rs`'s slot tables share this same
//! probing discipline.

use crate::header::{ObjPtr, erase};
use crate::typetab::type_table;

pub struct AtomPool {
    slots: Vec<Option<ObjPtr>>,
    count: usize,
}

impl AtomPool {
    pub fn new() -> Self {
        AtomPool {
            slots: vec![None; 64],
            count: 0,
        }
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn step_down(&self, slot: usize) -> usize {
        if slot == 0 { self.mask() } else { slot - 1 }
    }

    fn hash_of(&self, o: ObjPtr) -> u64 {
        let tt = type_table().read().unwrap();
        (tt.get(unsafe { o.as_ref() }.tcode).hash)(o)
    }

    fn eq(&self, a: ObjPtr, b: ObjPtr) -> bool {
        let tt = type_table().read().unwrap();
        (tt.get(unsafe { a.as_ref() }.tcode).cmp)(a, b)
    }

    /// Non-inserting probe: returns the existing atom equal to `o`, or the
    /// slot index where insertion would go.
    pub fn atom_probe(&self, o: ObjPtr) -> Result<ObjPtr, usize> {
        let mut slot = (self.hash_of(o) as usize) & self.mask();
        loop {
            match self.slots[slot] {
                None => return Err(slot),
                Some(existing) if self.eq(existing, o) => return Ok(existing),
                Some(_) => slot = self.step_down(slot),
            }
        }
    }

    /// Intern `o`, returning the canonical atom equal to it.
    ///
    /// `lone` means the caller holds the only reference to `o` and it may
    /// be interned in place rather than copied.
    pub fn atom(&mut self, o: ObjPtr, lone: bool, copy: impl FnOnce(ObjPtr) -> ObjPtr) -> ObjPtr {
        let hdr = unsafe { o.as_ref() };
        if hdr.is_atom() {
            return o;
        }
        match self.atom_probe(o) {
            Ok(found) => {
                if lone {
                    let extra = hdr.nrefs();
                    let found_hdr = unsafe { found.as_ref() };
                    for _ in 0..extra {
                        found_hdr.incref();
                    }
                }
                found
            }
            Err(slot) => {
                let to_insert = if lone { o } else { copy(o) };
                self.insert_at(slot, to_insert);
                to_insert
            }
        }
    }

    fn insert_at(&mut self, slot: usize, o: ObjPtr) {
        self.slots[slot] = Some(o);
        unsafe { o.as_ref() }.set_atom(true);
        self.count += 1;
        if self.load_factor() > 0.5 {
            self.grow();
        }
    }

    fn load_factor(&self) -> f64 {
        self.count as f64 / self.slots.len() as f64
    }

    fn grow(&mut self) {
        let old = std::mem::replace(&mut self.slots, vec![None; self.slots.len() * 2]);
        self.count = 0;
        for slot in old.into_iter().flatten() {
            // Re-probe into the bigger table; every surviving atom is still
            // marked ATOM, so we just relocate it.
            match self.atom_probe(slot) {
                Err(idx) => {
                    self.slots[idx] = Some(slot);
                    self.count += 1;
                }
                Ok(_) => unreachable!("no duplicate atoms can exist in the pool"),
            }
        }
    }

    /// During sweep: drop an unmarked atom at `slot`, then bubble up later
    /// entries that want to live at or before the hole, preserving the
    /// open-addressing probe invariant without a full rehash.
    pub fn remove_at(&mut self, slot: usize) {
        self.slots[slot] = None;
        self.count -= 1;
        let mut hole = slot;
        let mut scan = self.step_down(slot);
        while let Some(candidate) = self.slots[scan] {
            let ideal = (self.hash_of(candidate) as usize) & self.mask();
            // Does `candidate` want to live at or before `hole`, walking
            // downward from `ideal`? If so it can move into the hole.
            if Self::wants_slot(ideal, scan, hole, self.slots.len()) {
                self.slots[hole] = Some(candidate);
                self.slots[scan] = None;
                hole = scan;
            }
            scan = self.step_down(scan);
            if scan == slot {
                break;
            }
        }
    }

    /// True if walking downward from `ideal`, `hole` is reached no later
    /// than `current`.
    fn wants_slot(ideal: usize, current: usize, hole: usize, size: usize) -> bool {
        let dist = |from: usize, to: usize| (from + size - to) % size;
        dist(ideal, hole) <= dist(ideal, current)
    }

    /// Find the slot index currently holding `o`, for use by the sweeper.
    pub fn slot_of(&self, o: ObjPtr) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(o))
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Count of atoms whose only references come from the pool itself
    /// (nrefs == 0 and — because the GC hasn't run yet — still live). Used
    /// by growth to decide whether a pre-growth collection is worthwhile.
    pub fn unreferenced_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|o| unsafe { o.as_ref() }.nrefs() == 0)
            .count()
    }
}

impl Default for AtomPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper for type `mark`/`free` implementations that need to erase a
/// concrete pointer before handing it to the pool.
pub fn erase_for_pool<T>(p: std::ptr::NonNull<T>) -> ObjPtr {
    unsafe { erase(p) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ObjHeader;
    use crate::typetab::{Caps, TypeDesc, register_builtin};
    use std::ptr::NonNull;

    #[repr(C)]
    struct TestObj {
        header: ObjHeader,
        v: i64,
    }

    const TEST_TCODE: u8 = 200;

    fn register_test_type() {
        fn mark(_o: ObjPtr) -> usize {
            std::mem::size_of::<TestObj>()
        }
        unsafe fn free(o: ObjPtr) {
            unsafe {
                drop(Box::from_raw(o.cast::<TestObj>().as_ptr()));
            }
        }
        fn cmp(a: ObjPtr, b: ObjPtr) -> bool {
            unsafe { a.cast::<TestObj>().as_ref().v == b.cast::<TestObj>().as_ref().v }
        }
        fn hash(o: ObjPtr) -> u64 {
            unsafe { o.cast::<TestObj>().as_ref().v as u64 }
        }
        fn copy(o: ObjPtr) -> ObjPtr {
            let v = unsafe { o.cast::<TestObj>().as_ref().v };
            make_test(v)
        }
        register_builtin(
            TEST_TCODE,
            TypeDesc {
                name: "test",
                size: std::mem::size_of::<TestObj>(),
                caps: Caps::NONE,
                mark,
                free,
                cmp,
                hash,
                copy,
                objname: |_| "test".into(),
                fetch: None,
                assign: None,
                fetch_super: None,
                assign_super: None,
                fetch_base: None,
                assign_base: None,
            },
        );
    }

    fn make_test(v: i64) -> ObjPtr {
        let boxed = Box::new(TestObj {
            header: ObjHeader::new(TEST_TCODE, 0),
            v,
        });
        unsafe { erase(NonNull::new_unchecked(Box::into_raw(boxed))) }
    }

    #[test]
    fn atom_collapses_equal_values() {
        register_test_type();
        let mut pool = AtomPool::new();
        let a = make_test(42);
        let b = make_test(42);
        let atom_a = pool.atom(a, true, |o| o);
        let atom_b = pool.atom(b, true, |o| o);
        assert_eq!(atom_a, atom_b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn atom_probe_finds_slot_for_new_value() {
        register_test_type();
        let mut pool = AtomPool::new();
        let a = make_test(7);
        pool.atom(a, true, |o| o);
        let b = make_test(8);
        assert!(pool.atom_probe(b).is_err());
    }
}
