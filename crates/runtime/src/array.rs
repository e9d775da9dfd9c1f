//! Array: a growable circular buffer that also serves as the interpreter's
//! operand/execution/variable stacks.

use lam_core::alloc::alloc_typed;
use lam_core::header::{ObjHeader, ObjPtr, downcast};
use lam_core::typetab::{Caps, TCODE_ARRAY, TypeDesc, register_builtin, type_table};
use lam_core::{ErrorKind, LamError};

#[repr(C)]
pub struct ObjArray {
    pub header: ObjHeader,
    buf: Vec<ObjPtr>,
    /// Index of the first live element.
    bot: usize,
    /// Index one past the last live element.
    top: usize,
}

impl ObjArray {
    fn len_raw(&self) -> usize {
        if self.top >= self.bot {
            self.top - self.bot
        } else {
            self.buf.len() - self.bot + self.top
        }
    }

    pub fn len(&self) -> usize {
        self.len_raw()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_atomic(&self) -> Result<(), LamError> {
        if self.header.is_atom() {
            Err(LamError::new(
                ErrorKind::AtomicityViolation,
                "mutation of an atomic array",
            ))
        } else {
            Ok(())
        }
    }

    fn grow_to(&mut self, min_extra: usize) {
        let needed = self.len_raw() + min_extra;
        let new_cap = std::cmp::max((self.buf.len() * 3) / 2, needed + 10).max(8);
        let mut new_buf = vec![lam_core::value::null_value(); new_cap];
        for (i, slot) in new_buf.iter_mut().enumerate().take(self.len_raw()) {
            *slot = self.buf[(self.bot + i) % self.buf.len().max(1)];
        }
        let len = self.len_raw();
        self.buf = new_buf;
        self.bot = 0;
        self.top = len;
    }

    /// Guarantee `n` contiguous free slots for hot push loops when this
    /// array is known to be used purely as a stack (`bot == 0`, never
    /// r-popped).
    pub fn stk_push_chk(&mut self, n: usize) -> Result<(), LamError> {
        self.check_atomic()?;
        if self.buf.is_empty() || self.top + n > self.buf.len() {
            self.grow_to(n);
        }
        Ok(())
    }

    pub fn push(&mut self, v: ObjPtr) -> Result<(), LamError> {
        self.check_atomic()?;
        if self.buf.is_empty() {
            self.grow_to(1);
        }
        if (self.top + 1) % self.buf.len() == self.bot && self.len_raw() + 1 >= self.buf.len() {
            self.grow_to(1);
        }
        self.buf[self.top] = v;
        self.top = (self.top + 1) % self.buf.len();
        Ok(())
    }

    pub fn pop(&mut self) -> Option<ObjPtr> {
        if self.is_empty() {
            return None;
        }
        self.top = if self.top == 0 { self.buf.len() - 1 } else { self.top - 1 };
        Some(self.buf[self.top])
    }

    pub fn rpush(&mut self, v: ObjPtr) -> Result<(), LamError> {
        self.check_atomic()?;
        if self.buf.is_empty() {
            self.grow_to(1);
        }
        if self.len_raw() + 1 >= self.buf.len() {
            self.grow_to(1);
        }
        self.bot = if self.bot == 0 { self.buf.len() - 1 } else { self.bot - 1 };
        self.buf[self.bot] = v;
        Ok(())
    }

    pub fn rpop(&mut self) -> Option<ObjPtr> {
        if self.is_empty() {
            return None;
        }
        let v = self.buf[self.bot];
        self.bot = (self.bot + 1) % self.buf.len();
        Some(v)
    }

    pub fn get(&self, i: usize) -> Option<ObjPtr> {
        if i >= self.len_raw() {
            return None;
        }
        Some(self.buf[(self.bot + i) % self.buf.len()])
    }

    pub fn set(&mut self, i: usize, v: ObjPtr) -> Result<(), LamError> {
        self.check_atomic()?;
        if i >= self.len_raw() {
            return Err(LamError::new(ErrorKind::OutOfRange, "array index out of range"));
        }
        let idx = (self.bot + i) % self.buf.len();
        self.buf[idx] = v;
        Ok(())
    }

    /// Extend with nulls and assign, for `find_slot`-style index writes
    /// past the current end.
    pub fn find_slot(&mut self, i: usize, v: ObjPtr) -> Result<(), LamError> {
        self.check_atomic()?;
        while self.len_raw() <= i {
            self.push(lam_core::value::null_value())?;
        }
        self.set(i, v)
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjPtr> + '_ {
        (0..self.len_raw()).map(move |i| self.buf[(self.bot + i) % self.buf.len()])
    }
}

pub fn new_array() -> ObjPtr {
    alloc_typed(|| ObjArray {
        header: ObjHeader::new(TCODE_ARRAY, 0),
        buf: Vec::new(),
        bot: 0,
        top: 0,
    })
}

pub fn init_array_type() {
    fn mark(o: ObjPtr) -> usize {
        let hdr = unsafe { o.as_ref() };
        if hdr.is_marked() {
            return 0;
        }
        hdr.set_marked(true);
        let this = unsafe { downcast::<ObjArray>(o).as_ref() };
        let mut total = std::mem::size_of::<ObjArray>();
        let tt = type_table().read().unwrap();
        for v in this.iter() {
            let vhdr = unsafe { v.as_ref() };
            if !vhdr.is_marked() {
                total += (tt.get(vhdr.tcode).mark)(v);
            }
        }
        total
    }
    unsafe fn free(o: ObjPtr) {
        unsafe { drop(Box::from_raw(downcast::<ObjArray>(o).as_ptr())) };
    }
    fn hash(o: ObjPtr) -> u64 {
        let this = unsafe { downcast::<ObjArray>(o).as_ref() };
        let tt = type_table().read().unwrap();
        let mut h = 0u64;
        for v in this.iter() {
            let vhdr = unsafe { v.as_ref() };
            h = h.wrapping_mul(31).wrapping_add((tt.get(vhdr.tcode).hash)(v));
        }
        h
    }
    fn cmp(a: ObjPtr, b: ObjPtr) -> bool {
        let ta = unsafe { downcast::<ObjArray>(a).as_ref() };
        let tb = unsafe { downcast::<ObjArray>(b).as_ref() };
        if ta.len() != tb.len() {
            return false;
        }
        let tt = type_table().read().unwrap();
        ta.iter().zip(tb.iter()).all(|(x, y)| {
            let xh = unsafe { x.as_ref() };
            (tt.get(xh.tcode).cmp)(x, y)
        })
    }
    fn copy(o: ObjPtr) -> ObjPtr {
        let this = unsafe { downcast::<ObjArray>(o).as_ref() };
        let new = new_array();
        let new_arr = unsafe { downcast::<ObjArray>(new).as_mut() };
        for v in this.iter() {
            let _ = new_arr.push(v);
        }
        new
    }

    register_builtin(
        TCODE_ARRAY,
        TypeDesc {
            name: "array",
            size: std::mem::size_of::<ObjArray>(),
            caps: Caps::FORALL | Caps::OBJNAME,
            mark,
            free,
            cmp,
            hash,
            copy,
            objname: |_| "array".to_string(),
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
    use lam_core::value::{init_primitives, int_value, new_int};
    use std::sync::Once;

    static INIT: Once = Once::new();
    fn setup() {
        INIT.call_once(|| {
            init_primitives();
            init_array_type();
        });
    }

    #[test]
    fn push_pop_is_lifo() {
        setup();
        let a = new_array();
        let arr = unsafe { downcast::<ObjArray>(a).as_mut() };
        arr.push(new_int(1)).unwrap();
        arr.push(new_int(2)).unwrap();
        arr.push(new_int(3)).unwrap();
        assert_eq!(int_value(arr.pop().unwrap()), 3);
        assert_eq!(int_value(arr.pop().unwrap()), 2);
        assert_eq!(arr.len(), 1);
    }

    #[test]
    fn stk_push_chk_guarantees_contiguous_slots() {
        setup();
        let a = new_array();
        let arr = unsafe { downcast::<ObjArray>(a).as_mut() };
        arr.stk_push_chk(100).unwrap();
        for i in 0..100 {
            arr.push(new_int(i)).unwrap();
        }
        assert_eq!(arr.len(), 100);
    }

    #[test]
    fn grows_past_wraparound() {
        setup();
        let a = new_array();
        let arr = unsafe { downcast::<ObjArray>(a).as_mut() };
        for i in 0..20 {
            arr.push(new_int(i)).unwrap();
        }
        for _ in 0..15 {
            arr.pop();
        }
        for i in 100..120 {
            arr.push(new_int(i)).unwrap();
        }
        assert_eq!(arr.len(), 25);
    }
}
