//! End-to-end interpreter scenarios exercising the call protocol, the
//! binop dispatch, and the GC threshold heuristic together, rather than
//! any one module in isolation.

use lam_core::header::downcast;
use lam_core::value::{init_primitives, int_value, new_int, new_string};
use lam_runtime::{
    BinOp, ExecContext, ObjArray, Op, OpEcode, call, init_types, new_array, new_code, new_func,
    new_map,
};
use std::sync::Once;

static INIT: Once = Once::new();
fn setup() {
    INIT.call_once(|| {
        init_primitives();
        init_types();
    });
}

/// Build `fib(n) { if (n < 2) n else fib(n - 1) + fib(n - 2) }` as a
/// hand-assembled code array, with `fib` itself reachable through the
/// function's autos super chain so the recursive calls resolve by name.
/// There is no compiler in scope to emit this from source text.
fn make_fib() -> lam_core::header::ObjPtr {
    let n_key = new_string("n");
    let fib_key = new_string("fib");

    let global = new_map(None);
    let autos = new_map(Some(global));

    let args = new_array();
    unsafe { downcast::<ObjArray>(args).as_mut() }.push(n_key).unwrap();

    // The recursive call looks `fib` up through the scope's super chain
    // (the global map below), rather than capturing a pointer to the
    // not-yet-built function object.
    let ops = vec![
        /*0*/ Op::push(n_key),
        /*1*/ Op::ctl(OpEcode::Dot),
        /*2*/ Op::push(new_int(2)),
        /*3*/ Op::bin(BinOp::Lt),
        /*4*/ Op::ctl_aux(OpEcode::If, 8), // n<2 false -> jump to recursive branch at 8
        /*5*/ Op::push(n_key),
        /*6*/ Op::ctl(OpEcode::Dot), // push n
        /*7*/ Op::ctl(OpEcode::EndCode),
        // recursive branch: fib(n-1) + fib(n-2)
        /*8*/ Op::push(fib_key),
        /*9*/ Op::ctl(OpEcode::Dot), // push fib (callable)
        /*10*/ Op::push(n_key),
        /*11*/ Op::ctl(OpEcode::Dot),
        /*12*/ Op::push(new_int(1)),
        /*13*/ Op::bin(BinOp::Sub), // n-1
        /*14*/ Op::push(new_int(1)), // n_actual
        /*15*/ Op::push(fib_key),
        /*16*/ Op::ctl(OpEcode::Dot), // callable
        /*17*/ Op::ctl(OpEcode::Call), // fib(n-1)
        /*18*/ Op::push(fib_key),
        /*19*/ Op::ctl(OpEcode::Dot),
        /*20*/ Op::push(n_key),
        /*21*/ Op::ctl(OpEcode::Dot),
        /*22*/ Op::push(new_int(2)),
        /*23*/ Op::bin(BinOp::Sub), // n-2
        /*24*/ Op::push(new_int(1)),
        /*25*/ Op::push(fib_key),
        /*26*/ Op::ctl(OpEcode::Dot),
        /*27*/ Op::ctl(OpEcode::Call), // fib(n-2)
        /*28*/ Op::bin(BinOp::Add),
        /*29*/ Op::ctl(OpEcode::EndCode),
    ];
    let code = new_code(ops);

    let f = new_func(code, args, autos, "fib".to_string(), false);
    lam_runtime::ObjMap::assign_base(global, fib_key, f).unwrap();
    f
}

#[test]
fn fibonacci_by_mutual_recursion() {
    setup();
    let f = make_fib();

    let mut ctx = ExecContext::new();
    ctx.os_push(new_int(10));
    call(&mut ctx, f, 1).unwrap();
    lam_runtime::run(&mut ctx).unwrap();
    assert_eq!(int_value(ctx.os_pop().unwrap()), 55);

    let mut ctx = ExecContext::new();
    ctx.os_push(new_int(20));
    call(&mut ctx, f, 1).unwrap();
    lam_runtime::run(&mut ctx).unwrap();
    assert_eq!(int_value(ctx.os_pop().unwrap()), 6765);
}

/// Allocate a large number of transient, unretained arrays; the GC
/// threshold heuristic (`max(256KiB, 1.5 * live)`) must keep total live
/// bytes from growing without bound across the run.
fn alloc_and_release_transient_array() {
    let a = new_array();
    let arr = unsafe { downcast::<ObjArray>(a).as_mut() };
    for i in 0..10 {
        arr.push(new_int(i)).unwrap();
    }
    // `new_array` returns with nrefs=1 (caller-owned); this stands in for
    // the compiler/engine releasing a value that nothing else in the
    // object graph points at, matching how the embedder would `decref` a
    // value it is done with.
    unsafe { a.as_ref() }.decref();
}

#[test]
fn gc_reclaims_transient_allocations_under_load() {
    setup();
    for _ in 0..100_000 {
        alloc_and_release_transient_array();
    }

    let mut h = lam_core::gc::heap().lock().unwrap();
    lam_core::gc::collect(&mut h);
    let steady_state = h.live_bytes;
    drop(h);

    for _ in 0..100_000 {
        alloc_and_release_transient_array();
    }
    let mut h = lam_core::gc::heap().lock().unwrap();
    lam_core::gc::collect(&mut h);
    assert!(
        h.live_bytes <= steady_state.max(1) * 2 + 4096,
        "live bytes grew unboundedly: steady={} now={}",
        steady_state,
        h.live_bytes
    );
}
