//! Binary save/restore: big-endian, self-describing, cycle-safe
//! serialization of the object graph.
//!
//! A writer-side address→id map gives cycle safety; big-endian byte
//! swapping runs throughout; `save`/`restore` are the two public entry
//! points. Each type has its own body encoding below (`write_body`/
//! `read_body`), centralized as a single match over `tcode` rather than
//! a per-type vtable slot, since `TypeDesc`'s fields are otherwise
//! type-erased free functions with no room for a stateful cursor argument.

use crate::array::ObjArray;
use crate::func::ObjFunc;
use crate::map::ObjMap;
use crate::src::ObjSrc;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use lam_core::error::{ErrorKind, LamError};
use lam_core::header::{ObjPtr, downcast};
use lam_core::typetab::{
    TCODE_ARRAY, TCODE_CFUNC, TCODE_FLOAT, TCODE_FUNC, TCODE_INT, TCODE_MAP, TCODE_NULL, TCODE_REGEXP, TCODE_SRC,
    TCODE_STRING,
};
use lam_core::value::{float_value, int_value, intern_string, new_float, new_int, new_string, null_value, string_value};
use std::collections::HashMap;
use std::io::{Read, Write};

/// High bit of the tag byte: this object was atomic (interned) when saved.
const TAG_ATOM: u8 = 0x80;
/// Next bit: a pure back-reference record. The remaining six bits (and any
/// tcode they'd otherwise carry) are unused; the body is just a `u32` id.
const TAG_REF: u8 = 0x40;
const TAG_TCODE_MASK: u8 = 0x3f;

/// Types that participate in cycle tracking: maps, arrays, funcs, regexps.
/// Scalars, `src`, and `cfunc` re-serialize their full body on every
/// occurrence instead.
fn is_ref_tracked(tcode: u8) -> bool {
    tcode == TCODE_MAP || tcode == TCODE_ARRAY || tcode == TCODE_FUNC || tcode == TCODE_REGEXP
}

fn io_err(e: std::io::Error) -> LamError {
    LamError::new(ErrorKind::IoFailure, format!("archive I/O error: {e}"))
}

fn unsupported(tcode: u8) -> LamError {
    LamError::new(ErrorKind::ProtocolViolation, format!("tcode {tcode} is not archivable"))
}

struct Writer<'a, W: Write> {
    out: &'a mut W,
    ids: HashMap<usize, u32>,
    next_id: u32,
}

impl<'a, W: Write> Writer<'a, W> {
    fn new(out: &'a mut W) -> Self {
        Writer {
            out,
            ids: HashMap::new(),
            next_id: 0,
        }
    }

    fn write_raw_string(&mut self, s: &str) -> Result<(), LamError> {
        self.out.write_u32::<BigEndian>(s.len() as u32).map_err(io_err)?;
        self.out.write_all(s.as_bytes()).map_err(io_err)
    }

    fn write_value(&mut self, o: ObjPtr) -> Result<(), LamError> {
        let hdr = unsafe { o.as_ref() };
        let tcode = hdr.tcode;
        if tcode & !TAG_TCODE_MASK != 0 {
            return Err(unsupported(tcode));
        }

        if is_ref_tracked(tcode) {
            let key = o.as_ptr() as usize;
            if let Some(&id) = self.ids.get(&key) {
                self.out.write_u8(TAG_REF).map_err(io_err)?;
                self.out.write_u32::<BigEndian>(id).map_err(io_err)?;
                return Ok(());
            }
            let id = self.next_id;
            self.next_id += 1;
            self.ids.insert(key, id);

            let tag = tcode | if hdr.is_atom() { TAG_ATOM } else { 0 };
            self.out.write_u8(tag).map_err(io_err)?;
            self.out.write_u32::<BigEndian>(id).map_err(io_err)?;
            return self.write_body(tcode, o);
        }

        let tag = tcode | if hdr.is_atom() { TAG_ATOM } else { 0 };
        self.out.write_u8(tag).map_err(io_err)?;
        self.write_body(tcode, o)
    }

    fn write_body(&mut self, tcode: u8, o: ObjPtr) -> Result<(), LamError> {
        match tcode {
            TCODE_NULL => Ok(()),
            TCODE_INT => self.out.write_i64::<BigEndian>(int_value(o)).map_err(io_err),
            TCODE_FLOAT => self.out.write_f64::<BigEndian>(float_value(o)).map_err(io_err),
            TCODE_STRING => self.write_raw_string(string_value(o)),
            TCODE_REGEXP => {
                self.out
                    .write_u32::<BigEndian>(crate::regexp::options_of(o))
                    .map_err(io_err)?;
                self.write_raw_string(string_value(crate::regexp::pattern_of(o)))
            }
            TCODE_SRC => {
                let s = unsafe { downcast::<ObjSrc>(o).as_ref() };
                self.out.write_i32::<BigEndian>(s.lineno).map_err(io_err)?;
                self.write_raw_string(string_value(s.filename))
            }
            TCODE_ARRAY => {
                let a = unsafe { downcast::<ObjArray>(o).as_ref() };
                self.out.write_u32::<BigEndian>(a.len() as u32).map_err(io_err)?;
                let elems: Vec<ObjPtr> = a.iter().collect();
                for v in elems {
                    self.write_value(v)?;
                }
                Ok(())
            }
            TCODE_MAP => {
                let m = unsafe { downcast::<ObjMap>(o).as_ref() };
                match m.super_.get() {
                    Some(s) => {
                        self.out.write_u8(1).map_err(io_err)?;
                        self.write_value(s)?;
                    }
                    None => self.out.write_u8(0).map_err(io_err)?,
                }
                let entries: Vec<(ObjPtr, ObjPtr)> = m.entries().collect();
                self.out.write_u32::<BigEndian>(entries.len() as u32).map_err(io_err)?;
                for (k, v) in entries {
                    self.write_value(k)?;
                    self.write_value(v)?;
                }
                Ok(())
            }
            TCODE_FUNC => {
                let f = unsafe { downcast::<ObjFunc>(o).as_ref() };
                self.write_code(f.code)?;
                self.write_value(f.args)?;
                self.write_value(f.autos)?;
                self.write_raw_string(&f.name)?;
                let nautos = unsafe { downcast::<ObjMap>(f.autos).as_ref() }.len() as u32;
                self.out.write_u32::<BigEndian>(nautos).map_err(io_err)?;
                self.out.write_u8(f.vargs_slot as u8).map_err(io_err)
            }
            TCODE_CFUNC => {
                let cf = unsafe { downcast::<crate::func::ObjCfunc>(o).as_ref() };
                self.write_raw_string(&cf.name)
            }
            other => Err(unsupported(other)),
        }
    }

    /// Code arrays are not a first-class language value — `Op` carries no
    /// tcode of its own — so they get their own small encoding rather than
    /// going through `write_value`: a flat op count followed by one tagged
    /// record per op.
    fn write_code(&mut self, code: ObjPtr) -> Result<(), LamError> {
        let c = unsafe { downcast::<crate::op::ObjCode>(code).as_ref() };
        self.out.write_u32::<BigEndian>(c.len() as u32).map_err(io_err)?;
        for i in 0..c.len() {
            let op = c.get(i).expect("index within len");
            match op {
                crate::op::Op::Push(v) => {
                    self.out.write_u8(0).map_err(io_err)?;
                    self.write_value(v)?;
                }
                crate::op::Op::Ctl { ecode, aux } => {
                    self.out.write_u8(1).map_err(io_err)?;
                    self.out.write_u8(ecode as u8).map_err(io_err)?;
                    self.out.write_i64::<BigEndian>(aux).map_err(io_err)?;
                }
                crate::op::Op::Bin(b) => {
                    self.out.write_u8(2).map_err(io_err)?;
                    self.out.write_u8(b as u8).map_err(io_err)?;
                }
            }
        }
        Ok(())
    }
}

struct Reader<'a, R: Read> {
    input: &'a mut R,
    by_id: HashMap<u32, ObjPtr>,
    scope: Option<ObjPtr>,
}

impl<'a, R: Read> Reader<'a, R> {
    fn new(input: &'a mut R, scope: Option<ObjPtr>) -> Self {
        Reader {
            input,
            by_id: HashMap::new(),
            scope,
        }
    }

    fn read_raw_string(&mut self) -> Result<String, LamError> {
        let len = self.input.read_u32::<BigEndian>().map_err(io_err)? as usize;
        let mut buf = vec![0u8; len];
        self.input.read_exact(&mut buf).map_err(io_err)?;
        String::from_utf8(buf).map_err(|e| LamError::new(ErrorKind::ProtocolViolation, format!("non-UTF-8 string in archive: {e}")))
    }

    fn read_value(&mut self) -> Result<ObjPtr, LamError> {
        let tag = self.input.read_u8().map_err(io_err)?;
        if tag & TAG_REF != 0 {
            let id = self.input.read_u32::<BigEndian>().map_err(io_err)?;
            return self
                .by_id
                .get(&id)
                .copied()
                .ok_or_else(|| LamError::new(ErrorKind::ProtocolViolation, format!("archive: unknown back-reference id {id}")));
        }
        let atom = tag & TAG_ATOM != 0;
        let tcode = tag & TAG_TCODE_MASK;

        if is_ref_tracked(tcode) {
            let id = self.input.read_u32::<BigEndian>().map_err(io_err)?;
            // Publish a placeholder before decoding the body, so a nested
            // reference to this same id (a cycle) resolves immediately.
            let placeholder = match tcode {
                TCODE_MAP => crate::map::new_map(None),
                TCODE_ARRAY => crate::array::new_array(),
                TCODE_FUNC | TCODE_REGEXP => null_value(),
                _ => unreachable!("is_ref_tracked only returns these four"),
            };
            self.by_id.insert(id, placeholder);
            let built = match self.read_body(tcode, atom, placeholder) {
                Ok(v) => v,
                Err(e) => {
                    self.by_id.remove(&id);
                    return Err(e);
                }
            };
            self.by_id.insert(id, built);
            return Ok(built);
        }

        self.read_body(tcode, atom, null_value())
    }

    /// `placeholder` is the id's provisionally-published object, used (and
    /// mutated in place) for map/array so inner self-references see the
    /// same identity; func/regexp ignore it and build fresh, then the
    /// caller re-publishes the real object under the same id.
    fn read_body(&mut self, tcode: u8, atom: bool, placeholder: ObjPtr) -> Result<ObjPtr, LamError> {
        match tcode {
            TCODE_NULL => Ok(null_value()),
            TCODE_INT => Ok(new_int(self.input.read_i64::<BigEndian>().map_err(io_err)?)),
            TCODE_FLOAT => Ok(new_float(self.input.read_f64::<BigEndian>().map_err(io_err)?)),
            TCODE_STRING => {
                let s = self.read_raw_string()?;
                Ok(if atom { intern_string(&s) } else { new_string(&s) })
            }
            TCODE_REGEXP => {
                let options = self.input.read_u32::<BigEndian>().map_err(io_err)?;
                let pattern = self.read_raw_string()?;
                crate::regexp::new_regexp(&pattern, options)
            }
            TCODE_SRC => {
                let lineno = self.input.read_i32::<BigEndian>().map_err(io_err)?;
                let filename = self.read_raw_string()?;
                Ok(crate::src::new_src(lineno, intern_string(&filename)))
            }
            TCODE_ARRAY => {
                let n = self.input.read_u32::<BigEndian>().map_err(io_err)? as usize;
                let arr = unsafe { downcast::<ObjArray>(placeholder).as_mut() };
                for _ in 0..n {
                    let v = self.read_value()?;
                    arr.push(v)?;
                }
                if atom {
                    unsafe { placeholder.as_ref() }.set_atom(true);
                }
                Ok(placeholder)
            }
            TCODE_MAP => {
                let has_super = self.input.read_u8().map_err(io_err)? != 0;
                let super_ = if has_super { Some(self.read_value()?) } else { None };
                if let Some(s) = super_ {
                    unsafe { downcast::<ObjMap>(placeholder).as_mut() }.super_.set(Some(s));
                    unsafe { placeholder.as_ref() }.set_super(true);
                }
                let n = self.input.read_u32::<BigEndian>().map_err(io_err)? as usize;
                for _ in 0..n {
                    let k = self.read_value()?;
                    let v = self.read_value()?;
                    ObjMap::assign_base(placeholder, k, v)?;
                }
                if atom {
                    unsafe { placeholder.as_ref() }.set_atom(true);
                }
                Ok(placeholder)
            }
            TCODE_FUNC => {
                let code = self.read_code()?;
                let args = self.read_value()?;
                let autos = self.read_value()?;
                let name = self.read_raw_string()?;
                let _nautos_hint = self.input.read_u32::<BigEndian>().map_err(io_err)?;
                let vargs_slot = self.input.read_u8().map_err(io_err)? != 0;
                Ok(crate::func::new_func(code, args, autos, name, vargs_slot))
            }
            TCODE_CFUNC => {
                let name = self.read_raw_string()?;
                let scope = self.scope.ok_or_else(|| {
                    LamError::new(
                        ErrorKind::ProtocolViolation,
                        format!("cannot restore cfunc '{name}' without a scope"),
                    )
                })?;
                let key = intern_string(&name);
                let resolved = ObjMap::fetch(scope, key)
                    .ok_or_else(|| LamError::new(ErrorKind::ProtocolViolation, format!("cfunc '{name}' not found in restore scope")))?;
                let hdr = unsafe { resolved.as_ref() };
                if hdr.tcode != crate::func::cfunc_tcode() {
                    return Err(LamError::new(
                        ErrorKind::ProtocolViolation,
                        format!("'{name}' in restore scope is not a cfunc"),
                    ));
                }
                Ok(resolved)
            }
            other => Err(unsupported(other)),
        }
    }

    fn read_code(&mut self) -> Result<ObjPtr, LamError> {
        let n = self.input.read_u32::<BigEndian>().map_err(io_err)? as usize;
        let mut ops = Vec::with_capacity(n);
        for _ in 0..n {
            let kind = self.input.read_u8().map_err(io_err)?;
            let op = match kind {
                0 => crate::op::Op::Push(self.read_value()?),
                1 => {
                    let ecode = decode_ecode(self.input.read_u8().map_err(io_err)?)?;
                    let aux = self.input.read_i64::<BigEndian>().map_err(io_err)?;
                    crate::op::Op::Ctl { ecode, aux }
                }
                2 => crate::op::Op::Bin(decode_binop(self.input.read_u8().map_err(io_err)?)?),
                other => return Err(LamError::new(ErrorKind::ProtocolViolation, format!("bad op kind {other} in archive"))),
            };
            ops.push(op);
        }
        Ok(crate::op::new_code(ops))
    }
}

fn decode_ecode(b: u8) -> Result<crate::op::OpEcode, LamError> {
    use crate::op::OpEcode::*;
    const TABLE: &[crate::op::OpEcode] = &[
        Other, Call, NameLvalue, Dot, DotKeep, DotRKeep, Assign, AssignToName, AssignLocal, Exec, Loop, Rewind, EndCode, If,
        IfElse, IfNotBreak, IfBreak, Break, Quote, Binop, At, Swap, BinopForTemp, AggrKeyCall, Colon, ColonCaret, MethodCall,
        SuperCall, AssignLocalVar, CritSect, WaitFor, Pop, Continue, Looper, AndAnd, Switch, Switcher, Go,
    ];
    TABLE
        .get(b as usize)
        .copied()
        .ok_or_else(|| LamError::new(ErrorKind::ProtocolViolation, format!("bad opcode byte {b} in archive")))
}

fn decode_binop(b: u8) -> Result<crate::op::BinOp, LamError> {
    use crate::op::BinOp::*;
    const TABLE: &[crate::op::BinOp] = &[Add, Sub, Mul, Div, Mod, Eq, Ne, Lt, Le, Gt, Ge, And, Or, Xor, Shl, Shr];
    TABLE
        .get(b as usize)
        .copied()
        .ok_or_else(|| LamError::new(ErrorKind::ProtocolViolation, format!("bad binop byte {b} in archive")))
}

/// Serialize `obj`'s full reachable graph to `w`.
pub fn save<W: Write>(w: &mut W, obj: ObjPtr) -> Result<(), LamError> {
    Writer::new(w).write_value(obj)
}

/// Deserialize one value from `r`. `scope` resolves `cfunc` names
/// encountered anywhere in the graph; `None` restores pure-data graphs
/// only.
pub fn restore<R: Read>(r: &mut R, scope: Option<ObjPtr>) -> Result<ObjPtr, LamError> {
    Reader::new(r, scope).read_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lam_core::value::init_primitives;
    use std::io::Cursor;
    use std::sync::Once;

    static SETUP: Once = Once::new();
    fn setup() {
        SETUP.call_once(|| {
            init_primitives();
            crate::map::init_map_type();
            crate::array::init_array_type();
            crate::func::init_func_types();
            crate::op::init_code_type();
            crate::regexp::init_regexp_type();
            crate::src::init_src_type();
        });
    }

    fn round_trip(obj: ObjPtr) -> ObjPtr {
        let mut buf = Vec::new();
        save(&mut buf, obj).unwrap();
        let mut cursor = Cursor::new(buf);
        restore(&mut cursor, None).unwrap()
    }

    #[test]
    fn int_round_trips() {
        setup();
        let v = round_trip(new_int(123_456));
        assert_eq!(int_value(v), 123_456);
    }

    #[test]
    fn float_round_trips() {
        setup();
        let v = round_trip(new_float(3.5));
        assert_eq!(float_value(v), 3.5);
    }

    #[test]
    fn string_round_trips() {
        setup();
        let v = round_trip(new_string("hello archive"));
        assert_eq!(string_value(v), "hello archive");
    }

    #[test]
    fn array_of_ints_round_trips() {
        setup();
        let a = crate::array::new_array();
        {
            let arr = unsafe { downcast::<ObjArray>(a).as_mut() };
            arr.push(new_int(1)).unwrap();
            arr.push(new_int(2)).unwrap();
            arr.push(new_int(3)).unwrap();
        }
        let restored = round_trip(a);
        let arr = unsafe { downcast::<ObjArray>(restored).as_ref() };
        assert_eq!(arr.len(), 3);
        assert_eq!(int_value(arr.get(1).unwrap()), 2);
    }

    #[test]
    fn map_with_super_round_trips() {
        setup();
        let base = crate::map::new_map(None);
        let k = new_string("x");
        ObjMap::assign_base(base, k, new_int(10)).unwrap();
        let derived = crate::map::new_map(Some(base));
        let k2 = new_string("y");
        ObjMap::assign_base(derived, k2, new_int(20)).unwrap();

        let restored = round_trip(derived);
        assert_eq!(int_value(ObjMap::fetch(restored, k2).unwrap()), 20);
        assert_eq!(int_value(ObjMap::fetch(restored, k).unwrap()), 10);
    }

    #[test]
    fn cyclic_array_round_trips_without_looping_forever() {
        setup();
        let a = crate::array::new_array();
        {
            let arr = unsafe { downcast::<ObjArray>(a).as_mut() };
            arr.push(new_int(1)).unwrap();
        }
        {
            let arr = unsafe { downcast::<ObjArray>(a).as_mut() };
            arr.push(a).unwrap();
        }
        let restored = round_trip(a);
        let arr = unsafe { downcast::<ObjArray>(restored).as_ref() };
        assert_eq!(arr.len(), 2);
        assert_eq!(arr.get(1).unwrap(), restored);
    }

    #[test]
    fn regexp_round_trips_and_stays_usable() {
        setup();
        let re = crate::regexp::new_regexp("a+b", crate::regexp::OPT_CASELESS).unwrap();
        let restored = round_trip(re);
        assert!(crate::regexp::matches(restored, "AAAB"));
    }

    #[test]
    fn src_marker_round_trips() {
        setup();
        let file = intern_string("demo.ici");
        let s = crate::src::new_src(9, file);
        let restored = round_trip(s);
        assert_eq!(crate::src::lineno_of(restored), 9);
        assert_eq!(string_value(crate::src::filename_of(restored)), "demo.ici");
    }

    #[test]
    fn cfunc_resolves_by_name_through_scope() {
        setup();
        fn noop(_ctx: &mut crate::exec::ExecContext, _n: usize) -> i32 {
            0
        }
        let cf = crate::func::new_cfunc("my-native", noop);
        let scope = crate::map::new_map(None);
        ObjMap::assign_base(scope, intern_string("my-native"), cf).unwrap();

        let mut buf = Vec::new();
        save(&mut buf, cf).unwrap();
        let mut cursor = Cursor::new(buf);
        let restored = restore(&mut cursor, Some(scope)).unwrap();
        assert_eq!(restored, cf);
    }

    #[test]
    fn cfunc_without_scope_is_a_protocol_violation() {
        setup();
        fn noop(_ctx: &mut crate::exec::ExecContext, _n: usize) -> i32 {
            0
        }
        let cf = crate::func::new_cfunc("orphan", noop);
        let mut buf = Vec::new();
        save(&mut buf, cf).unwrap();
        let mut cursor = Cursor::new(buf);
        let err = restore(&mut cursor, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProtocolViolation);
    }

    #[test]
    fn func_round_trips_and_runs() {
        setup();
        // Identifier keys must be interned: the same content
        // written from two places (here, the formal-parameter array and the
        // `Dot` op's key) needs to restore to the same pointer, and
        // strings only collapse to one instance across separate restores
        // when the ATOM flag carries through (see `read_body`'s
        // `TCODE_STRING` arm).
        let n_key = intern_string("n");
        let code = crate::op::new_code(vec![
            crate::op::Op::push(n_key),
            crate::op::Op::ctl(crate::op::OpEcode::Dot),
            crate::op::Op::ctl(crate::op::OpEcode::EndCode),
        ]);
        let args = crate::array::new_array();
        {
            let a = unsafe { downcast::<ObjArray>(args).as_mut() };
            a.push(n_key).unwrap();
        }
        let autos = crate::map::new_map(None);
        let f = crate::func::new_func(code, args, autos, "identity".to_string(), false);

        let restored = round_trip(f);

        let mut ctx = crate::exec::ExecContext::new();
        ctx.os_push(new_int(7));
        crate::func::call(&mut ctx, restored, 1).unwrap();
        crate::engine::run(&mut ctx).unwrap();
        assert_eq!(int_value(ctx.os_pop().unwrap()), 7);
    }
}
