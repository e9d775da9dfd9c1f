//! The dispatch loop: drives an `ExecContext` through a compiled `ObjCode`
//! body, one `Op` at a time.

use crate::exec::ExecContext;
use crate::func;
use crate::map::ObjMap;
use crate::op::{BinOp, Op, ObjCode, OpEcode};
use lam_core::header::downcast;
use lam_core::value::{float_value, int_value, new_float, new_int, null_value};
use lam_core::{ErrorKind, LamError};

/// Run `ctx` until its execution stack empties (the outermost call
/// returns) or an error propagates out uncaught.
pub fn run(ctx: &mut ExecContext) -> Result<(), LamError> {
    loop {
        let Some(frame) = ctx.xs.last().copied() else {
            return Ok(());
        };
        let code = unsafe { downcast::<ObjCode>(frame.code).as_ref() };
        let Some(op) = code.get(frame.index) else {
            // Fell off the end of the body: implicit return.
            ctx.unwind_to_mark_keep_top();
            continue;
        };

        if ctx.tick() {
            {
                let mut h = lam_core::heap().lock().unwrap();
                if h.should_collect(0) {
                    lam_core::collect(&mut h);
                }
            }
            if let Err(e) = crate::signals::poll(ctx) {
                crate::debug::notify_error(&e.to_string(), ctx.src);
                if !unwind_to_handler(ctx, &e) {
                    ctx.state = crate::exec::ExecState::Failed;
                    ctx.error = Some(e.clone());
                    return Err(e);
                }
                continue;
            }
            crate::scheduler::yield_now(ctx.critsect);
        }

        match step(ctx, op) {
            Ok(Flow::Advance) => advance(ctx),
            Ok(Flow::Jump(target)) => {
                if let Some(top) = ctx.xs.last_mut() {
                    top.index = target;
                }
            }
            Ok(Flow::Handled) => {}
            Ok(Flow::Return) => {
                ctx.unwind_to_mark_keep_top();
            }
            Err(e) => {
                crate::debug::notify_error(&e.to_string(), ctx.src);
                if !unwind_to_handler(ctx, &e) {
                    ctx.state = crate::exec::ExecState::Failed;
                    ctx.error = Some(e.clone());
                    return Err(e);
                }
            }
        }
    }
}

fn advance(ctx: &mut ExecContext) {
    if let Some(top) = ctx.xs.last_mut() {
        top.index += 1;
    }
}

enum Flow {
    Advance,
    Jump(usize),
    Return,
    /// The step already left `xs`'s top frame exactly where it should be,
    /// e.g. a call that pushed a fresh callee frame after manually
    /// advancing the caller's own index past the call site. The generic
    /// `advance()`/`Jump` handling must not touch whatever is now on top.
    Handled,
}

fn unwind_to_handler(ctx: &mut ExecContext, err: &LamError) -> bool {
    while let Some(mark) = ctx.marks.last() {
        if let Some(handler) = mark.handler {
            let mark = ctx.marks.pop().unwrap();
            ctx.os.truncate(mark.os_depth);
            ctx.vs.truncate(mark.vs_depth);
            ctx.xs.pop();
            ctx.n_engine_recurse = ctx.vs.len() as u32;
            let msg = lam_core::value::new_string(&err.to_string());
            ctx.os.push(msg);
            let _ = func::call(ctx, handler, 1);
            return true;
        }
        ctx.marks.pop();
        ctx.xs.pop();
    }
    false
}

fn step(ctx: &mut ExecContext, op: Op) -> Result<Flow, LamError> {
    match op {
        Op::Push(v) => {
            let hdr = unsafe { v.as_ref() };
            if hdr.tcode == lam_core::typetab::TCODE_SRC {
                ctx.src = Some(v);
                crate::debug::notify_src(v);
            } else {
                ctx.os_push(v);
            }
            Ok(Flow::Advance)
        }
        Op::Bin(b) => {
            let rhs = ctx.os_pop().ok_or_else(stack_underflow)?;
            let lhs = ctx.os_pop().ok_or_else(stack_underflow)?;
            ctx.os_push(apply_binop(b, lhs, rhs)?);
            Ok(Flow::Advance)
        }
        Op::Ctl { ecode, aux } => step_ctl(ctx, ecode, aux),
    }
}

fn stack_underflow() -> LamError {
    LamError::new(ErrorKind::OutOfRange, "operand stack underflow")
}

fn is_truthy(v: lam_core::header::ObjPtr) -> bool {
    let hdr = unsafe { v.as_ref() };
    if hdr.tcode == lam_core::typetab::TCODE_NULL {
        return false;
    }
    if hdr.tcode == lam_core::typetab::TCODE_INT {
        return int_value(v) != 0;
    }
    true
}

fn step_ctl(ctx: &mut ExecContext, ecode: OpEcode, aux: i64) -> Result<Flow, LamError> {
    match ecode {
        OpEcode::Other | OpEcode::Quote => Ok(Flow::Advance),

        OpEcode::Pop => {
            ctx.os_pop();
            Ok(Flow::Advance)
        }

        OpEcode::Swap => {
            let a = ctx.os_pop().ok_or_else(stack_underflow)?;
            let b = ctx.os_pop().ok_or_else(stack_underflow)?;
            ctx.os_push(a);
            ctx.os_push(b);
            Ok(Flow::Advance)
        }

        OpEcode::NameLvalue | OpEcode::Dot => {
            let name = ctx.os_pop().ok_or_else(stack_underflow)?;
            let value = ctx
                .lookup(name)
                .ok_or_else(|| LamError::new(ErrorKind::UndefinedName, "undefined name"))?;
            ctx.os_push(value);
            Ok(Flow::Advance)
        }

        OpEcode::DotKeep | OpEcode::DotRKeep => {
            let name = *ctx.os.last().ok_or_else(stack_underflow)?;
            let value = ctx
                .lookup(name)
                .ok_or_else(|| LamError::new(ErrorKind::UndefinedName, "undefined name"))?;
            ctx.os_push(value);
            Ok(Flow::Advance)
        }

        OpEcode::Assign | OpEcode::AssignToName => {
            let value = ctx.os_pop().ok_or_else(stack_underflow)?;
            let name = ctx.os_pop().ok_or_else(stack_underflow)?;
            let scope = ctx
                .current_scope()
                .ok_or_else(|| LamError::new(ErrorKind::UndefinedName, "no active scope"))?;
            ObjMap::assign(scope, name, value)?;
            ctx.os_push(value);
            Ok(Flow::Advance)
        }

        OpEcode::AssignLocal | OpEcode::AssignLocalVar => {
            let value = ctx.os_pop().ok_or_else(stack_underflow)?;
            let name = ctx.os_pop().ok_or_else(stack_underflow)?;
            let scope = ctx
                .current_scope()
                .ok_or_else(|| LamError::new(ErrorKind::UndefinedName, "no active scope"))?;
            ObjMap::assign_base(scope, name, value)?;
            ctx.os_push(value);
            Ok(Flow::Advance)
        }

        OpEcode::At => {
            let key = ctx.os_pop().ok_or_else(stack_underflow)?;
            let aggr = ctx.os_pop().ok_or_else(stack_underflow)?;
            let ptr = func::new_langptr(aggr, key);
            ctx.os_push(ptr);
            Ok(Flow::Advance)
        }

        // `func::call*` may push a fresh callee frame onto `xs` (a scripted
        // function). The generic post-step `advance()` only ever touches
        // whatever is on top of `xs`, so the caller's own resume point must
        // be set before that push happens. Otherwise `advance()` would bump
        // the callee's brand-new PC from 0 to 1, skipping its first
        // instruction, while the caller's index stays stuck on the call
        // site forever.
        OpEcode::Call | OpEcode::AggrKeyCall => {
            let callable = ctx.os_pop().ok_or_else(stack_underflow)?;
            let n = ctx.os_pop().ok_or_else(stack_underflow)?;
            let nargs = int_value(n) as usize;
            advance(ctx);
            func::call(ctx, callable, nargs)?;
            Ok(Flow::Handled)
        }

        OpEcode::MethodCall | OpEcode::Colon | OpEcode::ColonCaret => {
            let callable = ctx.os_pop().ok_or_else(stack_underflow)?;
            let n = ctx.os_pop().ok_or_else(stack_underflow)?;
            let nargs = int_value(n) as usize;
            let subject = *ctx.os.last().ok_or_else(stack_underflow)?;
            advance(ctx);
            func::call_with_subject(ctx, callable, Some(subject), nargs)?;
            Ok(Flow::Handled)
        }

        OpEcode::SuperCall => {
            let callable = ctx.os_pop().ok_or_else(stack_underflow)?;
            let n = ctx.os_pop().ok_or_else(stack_underflow)?;
            let nargs = int_value(n) as usize;
            advance(ctx);
            func::call(ctx, callable, nargs)?;
            Ok(Flow::Handled)
        }

        OpEcode::Exec => {
            let v = ctx.os_pop().ok_or_else(stack_underflow)?;
            let hdr = unsafe { v.as_ref() };
            if hdr.tcode == crate::op::code_tcode() {
                advance(ctx);
                ctx.marks.push(crate::exec::Mark {
                    os_depth: ctx.os.len(),
                    vs_depth: ctx.vs.len(),
                    handler: None,
                });
                ctx.xs.push(crate::exec::PC { code: v, index: 0 });
                Ok(Flow::Handled)
            } else {
                ctx.os_push(v);
                Ok(Flow::Advance)
            }
        }

        OpEcode::EndCode => Ok(Flow::Return),

        OpEcode::If => {
            let cond = ctx.os_pop().ok_or_else(stack_underflow)?;
            if is_truthy(cond) {
                Ok(Flow::Advance)
            } else {
                Ok(Flow::Jump(aux as usize))
            }
        }

        OpEcode::IfElse => {
            let cond = ctx.os_pop().ok_or_else(stack_underflow)?;
            if is_truthy(cond) {
                Ok(Flow::Advance)
            } else {
                Ok(Flow::Jump(aux as usize))
            }
        }

        OpEcode::IfBreak => {
            let cond = ctx.os_pop().ok_or_else(stack_underflow)?;
            if is_truthy(cond) {
                Ok(Flow::Jump(aux as usize))
            } else {
                Ok(Flow::Advance)
            }
        }

        OpEcode::IfNotBreak => {
            let cond = ctx.os_pop().ok_or_else(stack_underflow)?;
            if !is_truthy(cond) {
                Ok(Flow::Jump(aux as usize))
            } else {
                Ok(Flow::Advance)
            }
        }

        OpEcode::AndAnd => {
            let v = *ctx.os.last().ok_or_else(stack_underflow)?;
            if is_truthy(v) {
                ctx.os_pop();
                Ok(Flow::Advance)
            } else {
                Ok(Flow::Jump(aux as usize))
            }
        }

        OpEcode::Go | OpEcode::Loop | OpEcode::Looper => Ok(Flow::Jump(aux as usize)),

        OpEcode::Rewind | OpEcode::Break | OpEcode::Continue => Ok(Flow::Jump(aux as usize)),

        OpEcode::Switch | OpEcode::Switcher => {
            let key = ctx.os_pop().ok_or_else(stack_underflow)?;
            let table = *ctx.os.last().ok_or_else(stack_underflow)?;
            let target = ObjMap::fetch(table, key);
            ctx.os_pop();
            match target {
                Some(v) => Ok(Flow::Jump(int_value(v) as usize)),
                None => Ok(Flow::Jump(aux as usize)),
            }
        }

        OpEcode::CritSect => {
            if aux >= 0 {
                ctx.critsect += 1;
            } else {
                ctx.critsect = ctx.critsect.saturating_sub(1);
            }
            Ok(Flow::Advance)
        }

        OpEcode::WaitFor => {
            let what = ctx.os_pop().ok_or_else(stack_underflow)?;
            ctx.waitfor = Some(what);
            Ok(Flow::Advance)
        }

        OpEcode::BinopForTemp => Ok(Flow::Advance),
    }
}

fn apply_binop(
    b: BinOp,
    lhs: lam_core::header::ObjPtr,
    rhs: lam_core::header::ObjPtr,
) -> Result<lam_core::header::ObjPtr, LamError> {
    let lhs_hdr = unsafe { lhs.as_ref() };
    let rhs_hdr = unsafe { rhs.as_ref() };
    let both_int =
        lhs_hdr.tcode == lam_core::typetab::TCODE_INT && rhs_hdr.tcode == lam_core::typetab::TCODE_INT;

    if both_int {
        let a = int_value(lhs);
        let c = int_value(rhs);
        return Ok(match b {
            BinOp::Add => new_int(a.wrapping_add(c)),
            BinOp::Sub => new_int(a.wrapping_sub(c)),
            BinOp::Mul => new_int(a.wrapping_mul(c)),
            BinOp::Div => {
                if c == 0 {
                    return Err(LamError::new(ErrorKind::OutOfRange, "division by zero"));
                }
                new_int(a / c)
            }
            BinOp::Mod => {
                if c == 0 {
                    return Err(LamError::new(ErrorKind::OutOfRange, "division by zero"));
                }
                new_int(a % c)
            }
            BinOp::Eq => bool_int(a == c),
            BinOp::Ne => bool_int(a != c),
            BinOp::Lt => bool_int(a < c),
            BinOp::Le => bool_int(a <= c),
            BinOp::Gt => bool_int(a > c),
            BinOp::Ge => bool_int(a >= c),
            BinOp::And => new_int(a & c),
            BinOp::Or => new_int(a | c),
            BinOp::Xor => new_int(a ^ c),
            BinOp::Shl => new_int(a << (c & 63)),
            BinOp::Shr => new_int(a >> (c & 63)),
        });
    }

    let as_f = |v: lam_core::header::ObjPtr| -> Result<f64, LamError> {
        let hdr = unsafe { v.as_ref() };
        if hdr.tcode == lam_core::typetab::TCODE_FLOAT {
            Ok(float_value(v))
        } else if hdr.tcode == lam_core::typetab::TCODE_INT {
            Ok(int_value(v) as f64)
        } else {
            Err(LamError::new(ErrorKind::TypeMismatch, "binop expects a number"))
        }
    };
    let a = as_f(lhs)?;
    let c = as_f(rhs)?;
    Ok(match b {
        BinOp::Add => new_float(a + c),
        BinOp::Sub => new_float(a - c),
        BinOp::Mul => new_float(a * c),
        BinOp::Div => new_float(a / c),
        BinOp::Mod => new_float(a % c),
        BinOp::Eq => bool_int(a == c),
        BinOp::Ne => bool_int(a != c),
        BinOp::Lt => bool_int(a < c),
        BinOp::Le => bool_int(a <= c),
        BinOp::Gt => bool_int(a > c),
        BinOp::Ge => bool_int(a >= c),
        BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Shl | BinOp::Shr => {
            return Err(LamError::new(ErrorKind::TypeMismatch, "bitwise op requires integers"));
        }
    })
}

fn bool_int(v: bool) -> lam_core::header::ObjPtr {
    if v { new_int(1) } else { null_value() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::new_array;
    use crate::func::new_func;
    use crate::map::new_map;
    use crate::op::new_code;
    use lam_core::value::{init_primitives, new_string, string_value};
    use std::sync::Once;

    static INIT: Once = Once::new();
    fn setup() {
        INIT.call_once(|| {
            init_primitives();
            crate::map::init_map_type();
            crate::array::init_array_type();
            crate::func::init_func_types();
            crate::op::init_code_type();
        });
    }

    fn zero_arg_func(name: &str, ops: Vec<Op>) -> lam_core::header::ObjPtr {
        let code = new_code(ops);
        let args = new_array();
        let autos = new_map(None);
        new_func(code, args, autos, name.to_string(), false)
    }

    #[test]
    fn arithmetic_add_then_return() {
        setup();
        let f = zero_arg_func(
            "add",
            vec![
                Op::push(new_int(2)),
                Op::push(new_int(3)),
                Op::bin(BinOp::Add),
                Op::ctl(OpEcode::EndCode),
            ],
        );
        let mut ctx = ExecContext::new();
        func::call(&mut ctx, f, 0).unwrap();
        run(&mut ctx).unwrap();
        assert_eq!(int_value(ctx.os_pop().unwrap()), 5);
    }

    #[test]
    fn conditional_takes_true_branch_and_skips_false_branch() {
        setup();
        // if (1) "yes" else "no"
        let f = zero_arg_func(
            "cond",
            vec![
                Op::push(new_int(1)),               // 0
                Op::ctl_aux(OpEcode::If, 4),         // 1: jump to 4 if falsy
                Op::push(new_string("yes")),         // 2
                Op::ctl_aux(OpEcode::Go, 5),         // 3: skip the else branch
                Op::push(new_string("no")),          // 4
                Op::ctl(OpEcode::EndCode),           // 5
            ],
        );
        let mut ctx = ExecContext::new();
        func::call(&mut ctx, f, 0).unwrap();
        run(&mut ctx).unwrap();
        assert_eq!(string_value(ctx.os_pop().unwrap()), "yes");
    }

    #[test]
    fn call_binds_formal_parameter_and_reads_it() {
        setup();
        // identity(n) { n }
        //
        // The parameter name must be the *same* interned string object used
        // both as the formal in `args` and as the lookup key in `code`: map
        // keys compare by pointer identity, so two separate
        // `new_string("n")` calls would not be the same key.
        let n_key = new_string("n");
        let code = new_code(vec![
            Op::push(n_key),
            Op::ctl(OpEcode::Dot),
            Op::ctl(OpEcode::EndCode),
        ]);
        let args = new_array();
        {
            let a = unsafe { downcast::<crate::array::ObjArray>(args).as_mut() };
            a.push(n_key).unwrap();
        }
        let autos = new_map(None);
        let f = new_func(code, args, autos, "identity".to_string(), false);

        let mut ctx = ExecContext::new();
        ctx.os_push(new_int(42));
        func::call(&mut ctx, f, 1).unwrap();
        run(&mut ctx).unwrap();
        assert_eq!(int_value(ctx.os_pop().unwrap()), 42);
    }
}
