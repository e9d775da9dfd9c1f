//! Map (a.k.a. struct): single-inheritance super chain, per-string
//! lookaside cache.

use lam_core::header::{ObjHeader, ObjPtr, downcast};
use lam_core::typetab::{Caps, TCODE_MAP, TypeDesc, register_builtin, type_table};
use lam_core::value::{ObjString, bump_vsver, current_vsver};
use lam_core::{ErrorKind, LamError, alloc::alloc_typed};
use std::cell::Cell;

#[repr(C)]
pub struct ObjMap {
    pub header: ObjHeader,
    slots: Vec<Option<(ObjPtr, ObjPtr)>>,
    nkeys: usize,
    pub super_: Cell<Option<ObjPtr>>,
}

fn key_hash(key: ObjPtr) -> u64 {
    let tt = type_table().read().unwrap();
    (tt.get(unsafe { key.as_ref() }.tcode).hash)(key)
}

fn key_eq(a: ObjPtr, b: ObjPtr) -> bool {
    // Keys are interned (atomic), so pointer equality is the fast, correct
    // comparison — no need to compare string contents.
    a == b
}

impl ObjMap {
    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn step_down(&self, slot: usize) -> usize {
        if slot == 0 { self.mask() } else { slot - 1 }
    }

    fn probe(&self, key: ObjPtr) -> Result<usize, usize> {
        let mut slot = (key_hash(key) as usize) & self.mask();
        loop {
            match self.slots[slot] {
                None => return Err(slot),
                Some((k, _)) if key_eq(k, key) => return Ok(slot),
                Some(_) => slot = self.step_down(slot),
            }
        }
    }

    fn load_factor(&self) -> f64 {
        self.nkeys as f64 / self.slots.len() as f64
    }

    fn grow(&mut self) {
        let old = std::mem::replace(&mut self.slots, vec![None; self.slots.len() * 2]);
        self.nkeys = 0;
        for entry in old.into_iter().flatten() {
            let slot = match self.probe(entry.0) {
                Err(idx) => idx,
                Ok(_) => unreachable!(),
            };
            self.slots[slot] = Some(entry);
            self.nkeys += 1;
        }
        bump_vsver();
    }

    /// Fetch from this map only, no super walk.
    pub fn fetch_base(&self, key: ObjPtr) -> Option<ObjPtr> {
        match self.probe(key) {
            Ok(slot) => self.slots[slot].map(|(_, v)| v),
            Err(_) => None,
        }
    }

    /// Fetch walking the lookaside fast path, then the base, then the
    /// super chain.
    pub fn fetch(self_ptr: ObjPtr, key: ObjPtr) -> Option<ObjPtr> {
        if let Some(key_str) = as_string(key) {
            let la = key_str.lookaside.get();
            if la.is_valid_for(self_ptr) {
                let this = unsafe { downcast::<ObjMap>(self_ptr).as_ref() };
                if let Some((k, v)) = this.slots.get(la.slot).copied().flatten() {
                    if key_eq(k, key) {
                        return Some(v);
                    }
                }
            }
        }

        let mut cur = self_ptr;
        loop {
            let this = unsafe { downcast::<ObjMap>(cur).as_ref() };
            if let Ok(slot) = this.probe(key) {
                if let Some(key_str) = as_string(key) {
                    key_str.lookaside.set(lam_core::value::Lookaside {
                        map: Some(self_ptr),
                        slot,
                        generation: current_vsver(),
                    });
                }
                return this.slots[slot].map(|(_, v)| v);
            }
            match this.super_.get() {
                Some(s) => cur = s,
                None => return None,
            }
        }
    }

    fn insert_base(&mut self, key: ObjPtr, value: ObjPtr) {
        let slot = match self.probe(key) {
            Ok(slot) => slot,
            Err(slot) => slot,
        };
        let is_new = self.slots[slot].is_none();
        self.slots[slot] = Some((key, value));
        if is_new {
            self.nkeys += 1;
        }
        if self.load_factor() > 0.75 {
            self.grow();
        }
    }

    /// Assignment policy: lookaside fast path, then probe the base map,
    /// then walk the super chain for an existing key, then insert into
    /// the base.
    pub fn assign(self_ptr: ObjPtr, key: ObjPtr, value: ObjPtr) -> Result<(), LamError> {
        let this_hdr = unsafe { self_ptr.as_ref() };
        if this_hdr.is_atom() {
            return Err(LamError::new(
                ErrorKind::AtomicityViolation,
                "assignment to an atomic (sealed) map",
            ));
        }

        // Step 1: validated lookaside fast path.
        if let Some(key_str) = as_string(key) {
            let la = key_str.lookaside.get();
            if la.is_valid_for(self_ptr) {
                let this = unsafe { downcast::<ObjMap>(self_ptr).as_mut() };
                if let Some(slot) = this.slots.get_mut(la.slot) {
                    if let Some((k, v)) = slot {
                        if key_eq(*k, key) {
                            *v = value;
                            return Ok(());
                        }
                    }
                }
            }
        }

        // Step 2: probe the base map.
        let this = unsafe { downcast::<ObjMap>(self_ptr).as_mut() };
        if let Ok(slot) = this.probe(key) {
            this.slots[slot] = Some((key, value));
            if let Some(key_str) = as_string(key) {
                key_str.lookaside.set(lam_core::value::Lookaside {
                    map: Some(self_ptr),
                    slot,
                    generation: current_vsver(),
                });
            }
            return Ok(());
        }

        // Step 3: walk the super chain for the first non-atomic map that
        // already contains the key.
        let mut cur = this.super_.get();
        while let Some(s) = cur {
            let s_hdr = unsafe { s.as_ref() };
            let s_map = unsafe { downcast::<ObjMap>(s).as_mut() };
            if !s_hdr.is_atom() {
                if let Ok(slot) = s_map.probe(key) {
                    s_map.slots[slot] = Some((key, value));
                    return Ok(());
                }
            }
            cur = s_map.super_.get();
        }

        // Step 4: insert into the base, if it is not atomic.
        this.insert_base(key, value);
        Ok(())
    }

    /// `assign_base`: always writes to this map regardless of super chain.
    pub fn assign_base(self_ptr: ObjPtr, key: ObjPtr, value: ObjPtr) -> Result<(), LamError> {
        let hdr = unsafe { self_ptr.as_ref() };
        if hdr.is_atom() {
            return Err(LamError::new(
                ErrorKind::AtomicityViolation,
                "assignment to an atomic (sealed) map",
            ));
        }
        let this = unsafe { downcast::<ObjMap>(self_ptr).as_mut() };
        this.insert_base(key, value);
        Ok(())
    }

    /// Bubble-up deletion: subsequent entries in the probe chain move
    /// back into the vacated hole so later lookups still terminate.
    pub fn remove(&mut self, key: ObjPtr) -> bool {
        let slot = match self.probe(key) {
            Ok(slot) => slot,
            Err(_) => return false,
        };
        self.slots[slot] = None;
        self.nkeys -= 1;
        bump_vsver();

        let mut hole = slot;
        let mut scan = self.step_down(slot);
        while let Some((k, v)) = self.slots[scan] {
            let ideal = (key_hash(k) as usize) & self.mask();
            if Self::wants_slot(ideal, scan, hole, self.slots.len()) {
                self.slots[hole] = Some((k, v));
                self.slots[scan] = None;
                hole = scan;
            }
            scan = self.step_down(scan);
            if scan == slot {
                break;
            }
        }
        true
    }

    fn wants_slot(ideal: usize, current: usize, hole: usize, size: usize) -> bool {
        let dist = |from: usize, to: usize| (from + size - to) % size;
        dist(ideal, hole) <= dist(ideal, current)
    }

    pub fn len(&self) -> usize {
        self.nkeys
    }

    pub fn is_empty(&self) -> bool {
        self.nkeys == 0
    }

    pub fn entries(&self) -> impl Iterator<Item = (ObjPtr, ObjPtr)> + '_ {
        self.slots.iter().filter_map(|s| *s)
    }
}

fn as_string(o: ObjPtr) -> Option<&'static ObjString> {
    let hdr = unsafe { o.as_ref() };
    if hdr.tcode == lam_core::typetab::TCODE_STRING {
        Some(unsafe { downcast::<ObjString>(o).as_ref() })
    } else {
        None
    }
}

pub fn new_map(super_: Option<ObjPtr>) -> ObjPtr {
    use lam_core::atom::erase_for_pool;
    let mut header = ObjHeader::new(TCODE_MAP, 0);
    if super_.is_some() {
        header.set_super(true);
    }
    let ptr = alloc_typed(|| ObjMap {
        header,
        slots: vec![None; 8],
        nkeys: 0,
        super_: Cell::new(super_),
    });
    let _ = erase_for_pool::<ObjMap>; // keep import honest for downcast symmetry
    ptr
}

/// Non-mutating copy: fresh non-atomic map sharing the same super.
pub fn copy_map(o: ObjPtr) -> ObjPtr {
    let this = unsafe { downcast::<ObjMap>(o).as_ref() };
    let copy = new_map(this.super_.get());
    let copy_map = unsafe { downcast::<ObjMap>(copy).as_mut() };
    for (k, v) in this.entries() {
        copy_map.insert_base(k, v);
    }
    copy
}

pub fn init_map_type() {
    fn mark(o: ObjPtr) -> usize {
        let hdr = unsafe { o.as_ref() };
        if hdr.is_marked() {
            return 0;
        }
        hdr.set_marked(true);
        let this = unsafe { downcast::<ObjMap>(o).as_ref() };
        let mut total = std::mem::size_of::<ObjMap>();
        let tt = type_table().read().unwrap();
        for (k, v) in this.entries() {
            for obj in [k, v] {
                let ohdr = unsafe { obj.as_ref() };
                if !ohdr.is_marked() {
                    total += (tt.get(ohdr.tcode).mark)(obj);
                }
            }
        }
        if let Some(s) = this.super_.get() {
            let shdr = unsafe { s.as_ref() };
            if !shdr.is_marked() {
                total += (tt.get(shdr.tcode).mark)(s);
            }
        }
        total
    }
    unsafe fn free(o: ObjPtr) {
        unsafe { drop(Box::from_raw(downcast::<ObjMap>(o).as_ptr())) };
    }
    fn cmp(a: ObjPtr, b: ObjPtr) -> bool {
        a == b
    }
    fn hash(o: ObjPtr) -> u64 {
        o.as_ptr() as u64
    }

    register_builtin(
        TCODE_MAP,
        TypeDesc {
            name: "map",
            size: std::mem::size_of::<ObjMap>(),
            caps: Caps::FORALL
                | Caps::FETCH
                | Caps::ASSIGN
                | Caps::FETCH_SUPER
                | Caps::ASSIGN_SUPER
                | Caps::FETCH_BASE
                | Caps::ASSIGN_BASE
                | Caps::OBJNAME,
            mark,
            free,
            cmp,
            hash,
            copy: copy_map,
            objname: |_| "map".to_string(),
            fetch: Some(ObjMap::fetch),
            assign: Some(ObjMap::assign),
            fetch_super: None,
            assign_super: None,
            fetch_base: Some(|o, k| unsafe { downcast::<ObjMap>(o).as_ref() }.fetch_base(k)),
            assign_base: Some(ObjMap::assign_base),
        },
    );
}
