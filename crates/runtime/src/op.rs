//! Opcodes: each code element in a compiled function body is either a value
//! to push, or one of these control operators.

/// The full opcode set.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpEcode {
    Other,
    Call,
    NameLvalue,
    Dot,
    DotKeep,
    DotRKeep,
    Assign,
    AssignToName,
    AssignLocal,
    Exec,
    Loop,
    Rewind,
    EndCode,
    If,
    IfElse,
    IfNotBreak,
    IfBreak,
    Break,
    Quote,
    Binop,
    At,
    Swap,
    BinopForTemp,
    AggrKeyCall,
    Colon,
    ColonCaret,
    MethodCall,
    SuperCall,
    AssignLocalVar,
    CritSect,
    WaitFor,
    Pop,
    Continue,
    Looper,
    AndAnd,
    Switch,
    Switcher,
    Go,
}

/// A binary operator selector, carried as `Op`'s auxiliary code when
/// `ecode == Binop`/`BinopForTemp`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// One element of a compiled code array: either a plain value (pushed
/// as-is) or a control operator with an auxiliary operand.
///
/// Operators are a distinct Rust enum rather than function pointers, since
/// dispatch goes through `engine.rs`'s match rather than a jump table.
#[derive(Clone, Copy)]
pub enum Op {
    Push(lam_core::header::ObjPtr),
    Ctl { ecode: OpEcode, aux: i64 },
    Bin(BinOp),
}

impl Op {
    pub fn push(v: lam_core::header::ObjPtr) -> Self {
        Op::Push(v)
    }

    pub fn ctl(ecode: OpEcode) -> Self {
        Op::Ctl { ecode, aux: 0 }
    }

    pub fn ctl_aux(ecode: OpEcode, aux: i64) -> Self {
        Op::Ctl { ecode, aux }
    }

    pub fn bin(op: BinOp) -> Self {
        Op::Bin(op)
    }
}

use lam_core::alloc::alloc_typed;
use lam_core::header::{ObjHeader, ObjPtr, downcast};
use lam_core::typetab::{Caps, TCODE_OP, TypeDesc, register_builtin};

/// A compiled function body: a flat sequence of `Op`s. Kept as its own heap
/// type (rather than packed into a generic array of values) because an `Op`
/// is not itself a first-class language value — the header-and-type-table
/// model doesn't give `Op` a tcode, so it gets a dedicated container.
#[repr(C)]
pub struct ObjCode {
    pub header: ObjHeader,
    pub ops: Vec<Op>,
}

impl ObjCode {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<Op> {
        self.ops.get(i).copied()
    }
}

pub fn code_tcode() -> u8 {
    TCODE_OP
}

pub fn new_code(ops: Vec<Op>) -> ObjPtr {
    alloc_typed(|| ObjCode {
        header: ObjHeader::new(code_tcode(), 0),
        ops,
    })
}

pub fn init_code_type() {
    fn mark(o: ObjPtr) -> usize {
        let hdr = unsafe { o.as_ref() };
        if hdr.is_marked() {
            return 0;
        }
        hdr.set_marked(true);
        let this = unsafe { downcast::<ObjCode>(o).as_ref() };
        let tt = lam_core::type_table().read().unwrap();
        let mut total = std::mem::size_of::<ObjCode>();
        for op in &this.ops {
            if let Op::Push(v) = op {
                let vhdr = unsafe { v.as_ref() };
                if !vhdr.is_marked() {
                    total += (tt.get(vhdr.tcode).mark)(*v);
                }
            }
        }
        total
    }
    unsafe fn free(o: ObjPtr) {
        unsafe { drop(Box::from_raw(downcast::<ObjCode>(o).as_ptr())) };
    }
    register_builtin(
        TCODE_OP,
        TypeDesc {
            name: "code",
            size: std::mem::size_of::<ObjCode>(),
            caps: Caps::NONE,
            mark,
            free,
            cmp: |a, b| a == b,
            hash: |o| o.as_ptr() as u64,
            copy: |o| o,
            objname: |_| "code".to_string(),
            fetch: None,
            assign: None,
            fetch_super: None,
            assign_super: None,
            fetch_base: None,
            assign_base: None,
        },
    );
}
