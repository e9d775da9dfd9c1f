//! Concurrency: parallel `go()` threads scheduled as May coroutines over a
//! single global mutex, plus critical sections and wait/wake.
//!
//! Each spawned thread gets its own `ExecContext` and runs as a coroutine,
//! holding the global mutex except while blocked in `waitfor` or
//! cooperatively yielding. There is no CSP channel type in this language;
//! threads coordinate only through `waitfor`/`wakeup` on arbitrary values
//! and through `join`.

use crate::engine;
use crate::func;
use lam_core::LamError;
use lam_core::header::ObjPtr;
use lam_core::value::null_value;
use may::coroutine;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once};

static INIT: Once = Once::new();

static NEXT_ID: AtomicU64 = AtomicU64::new(1);
pub static ACTIVE_THREADS: AtomicUsize = AtomicUsize::new(0);
static PEAK_THREADS: AtomicUsize = AtomicUsize::new(0);
static TOTAL_SPAWNED: AtomicU64 = AtomicU64::new(0);
static TOTAL_COMPLETED: AtomicU64 = AtomicU64::new(0);

static SHUTDOWN_MUTEX: Mutex<()> = Mutex::new(());
static SHUTDOWN_CONDVAR: Condvar = Condvar::new();

/// The single global mutex serializing script execution, modeled as a
/// boolean + condvar rather than a held `MutexGuard` so that `enter`/`leave`
/// can straddle a cooperative block (`waitfor`) without tying the guard to
/// whichever OS thread May happens to resume this coroutine on.
struct Gil {
    locked: Mutex<bool>,
    cv: Condvar,
}

static GIL: Gil = Gil {
    locked: Mutex::new(false),
    cv: Condvar::new(),
};

/// Acquire the global mutex, blocking until it is free.
pub fn enter() {
    let mut l = GIL.locked.lock().unwrap();
    while *l {
        l = GIL.cv.wait(l).unwrap();
    }
    *l = true;
}

/// Release the global mutex.
pub fn leave() {
    let mut l = GIL.locked.lock().unwrap();
    *l = false;
    GIL.cv.notify_one();
}

/// Release and immediately try to reacquire the global mutex, giving other
/// ready coroutines a chance to run. A no-op inside a critical section.
pub fn yield_now(critsect: u32) {
    if critsect > 0 {
        coroutine::yield_now();
        return;
    }
    leave();
    coroutine::yield_now();
    enter();
}

/// What a `go()` thread leaves behind once it stops running.
enum Outcome {
    Running,
    Returned(ObjPtr),
    Failed(LamError),
}

/// A spawned thread's join point: the value to `waitfor` on (its own
/// identity, handed back to the caller as a `Handle`) plus the condvar
/// `wakeup` uses to signal completion.
pub struct ThreadHandle {
    pub id: u64,
    /// This thread's identity as a script-visible value — what callers
    /// `waitfor` on to join it.
    pub identity: ObjPtr,
    waitfor: Mutex<Option<ObjPtr>>,
    wake: Mutex<bool>,
    wake_cv: Condvar,
    outcome: Mutex<Outcome>,
}

impl ThreadHandle {
    fn new(id: u64) -> Self {
        let identity = func::new_handle("thread", id as *mut std::ffi::c_void, None);
        ThreadHandle {
            id,
            identity,
            waitfor: Mutex::new(None),
            wake: Mutex::new(false),
            wake_cv: Condvar::new(),
            outcome: Mutex::new(Outcome::Running),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.outcome.lock().unwrap(), Outcome::Running)
    }

    /// Block the calling thread (cooperatively) until this thread
    /// completes, then return its result.
    pub fn join(&self) -> Result<ObjPtr, LamError> {
        let mut w = self.wake.lock().unwrap();
        while self.is_running() {
            w = self.wake_cv.wait(w).unwrap();
        }
        drop(w);
        match std::mem::replace(&mut *self.outcome.lock().unwrap(), Outcome::Running) {
            Outcome::Returned(v) => Ok(v),
            Outcome::Failed(e) => Err(e),
            Outcome::Running => unreachable!("join woke before outcome was recorded"),
        }
    }
}

fn registry() -> &'static Mutex<Vec<Arc<ThreadHandle>>> {
    static REGISTRY: std::sync::OnceLock<Mutex<Vec<Arc<ThreadHandle>>>> = std::sync::OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Snapshot the live thread ids for diagnostics.
pub fn live_thread_ids() -> Vec<u64> {
    registry().lock().unwrap().iter().map(|h| h.id).collect()
}

pub fn peak_threads() -> usize {
    PEAK_THREADS.load(Ordering::Relaxed)
}

pub fn total_spawned() -> u64 {
    TOTAL_SPAWNED.load(Ordering::Relaxed)
}

pub fn total_completed() -> u64 {
    TOTAL_COMPLETED.load(Ordering::Relaxed)
}

/// Idempotent scheduler bring-up: coroutine stack size, SIGQUIT diagnostics
/// dump. Called once, lazily, from `go()` and from `ffi::lam_init`.
pub fn init() {
    INIT.call_once(|| {
        crate::config::apply();
        #[cfg(feature = "diagnostics")]
        {
            crate::report::mark_start();
            crate::diagnostics::install_signal_handler();
        }
    });
}

/// Block the given exec context waiting for `wakeup(obj)` to be called
/// elsewhere. Releases the global mutex while blocked unless inside a
/// critical section.
pub fn waitfor(handle: &ThreadHandle, ctx: &mut crate::exec::ExecContext, obj: ObjPtr) {
    ctx.waitfor = Some(obj);
    *handle.waitfor.lock().unwrap() = Some(obj);
    let release = ctx.critsect == 0;
    if release {
        leave();
    }
    {
        let mut w = handle.wake.lock().unwrap();
        while !*w {
            w = handle.wake_cv.wait(w).unwrap();
        }
        *w = false;
    }
    if release {
        enter();
    }
    ctx.waitfor = None;
    *handle.waitfor.lock().unwrap() = None;
}

/// Wake every registered thread whose `waitfor` target is `obj`.
pub fn wakeup(obj: ObjPtr) {
    let reg = registry().lock().unwrap();
    for h in reg.iter() {
        let mut wf = h.waitfor.lock().unwrap();
        if *wf == Some(obj) {
            *wf = None;
            drop(wf);
            *h.wake.lock().unwrap() = true;
            h.wake_cv.notify_all();
        }
    }
}

/// Spawn a new thread running `callable(args...)` as a May coroutine.
/// Returns its handle; the caller may `waitfor` on `handle.identity` or
/// call `handle.join()` directly.
pub fn go(callable: ObjPtr, args: Vec<ObjPtr>) -> Arc<ThreadHandle> {
    init();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let handle = Arc::new(ThreadHandle::new(id));
    registry().lock().unwrap().push(handle.clone());

    let active = ACTIVE_THREADS.fetch_add(1, Ordering::AcqRel) + 1;
    TOTAL_SPAWNED.fetch_add(1, Ordering::Relaxed);
    let mut peak = PEAK_THREADS.load(Ordering::Acquire);
    while active > peak {
        match PEAK_THREADS.compare_exchange_weak(peak, active, Ordering::Release, Ordering::Relaxed) {
            Ok(_) => break,
            Err(cur) => peak = cur,
        }
    }

    let worker = handle.clone();
    unsafe {
        coroutine::spawn(move || {
            enter();
            let mut ctx = crate::exec::ExecContext::new();
            let nargs = args.len();
            for a in &args {
                ctx.os_push(*a);
            }
            let result = func::call(&mut ctx, callable, nargs).and_then(|_| engine::run(&mut ctx));
            let outcome = match result {
                Ok(()) => Outcome::Returned(ctx.os.pop().unwrap_or_else(null_value)),
                Err(e) => Outcome::Failed(e),
            };
            *worker.outcome.lock().unwrap() = outcome;
            leave();

            registry().lock().unwrap().retain(|h| h.id != worker.id);
            let remaining = ACTIVE_THREADS.fetch_sub(1, Ordering::AcqRel) - 1;
            TOTAL_COMPLETED.fetch_add(1, Ordering::Relaxed);

            *worker.wake.lock().unwrap() = true;
            worker.wake_cv.notify_all();
            wakeup(worker.identity);

            if remaining == 0 {
                let _guard = SHUTDOWN_MUTEX.lock().unwrap();
                SHUTDOWN_CONDVAR.notify_all();
            }
        });
    }
    handle
}

/// Block until every spawned thread has completed. Used by the embedder's
/// top-level `lam_evaluate`/shutdown path.
pub fn wait_all() {
    let mut guard = SHUTDOWN_MUTEX.lock().unwrap();
    while ACTIVE_THREADS.load(Ordering::Acquire) > 0 {
        guard = SHUTDOWN_CONDVAR.wait(guard).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lam_core::value::{init_primitives, int_value, new_int};
    use serial_test::serial;
    use std::sync::Once as StdOnce;

    static SETUP: StdOnce = StdOnce::new();
    fn setup() {
        SETUP.call_once(|| {
            init_primitives();
            crate::map::init_map_type();
            crate::array::init_array_type();
            crate::func::init_func_types();
            crate::op::init_code_type();
        });
    }

    #[test]
    #[serial]
    fn go_runs_a_cfunc_and_join_returns_its_result() {
        setup();
        fn double(ctx: &mut crate::exec::ExecContext, nargs: usize) -> i32 {
            let args = ctx.os_pop_n(nargs);
            ctx.os_push(new_int(int_value(args[0]) * 2));
            0
        }
        let cf = func::new_cfunc("double", double);
        let handle = go(cf, vec![new_int(21)]);
        let result = handle.join().unwrap();
        assert_eq!(int_value(result), 42);
    }

    #[test]
    #[serial]
    fn wakeup_releases_a_waiting_thread() {
        setup();
        let token = new_int(999_999);
        let h = Arc::new(ThreadHandle::new(NEXT_ID.fetch_add(1, Ordering::Relaxed)));
        registry().lock().unwrap().push(h.clone());

        let waiter = h.clone();
        let woke = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let woke2 = woke.clone();
        unsafe {
            coroutine::spawn(move || {
                let mut ctx = crate::exec::ExecContext::new();
                waitfor(&waiter, &mut ctx, token);
                woke2.store(true, Ordering::SeqCst);
            });
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
        wakeup(token);
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(woke.load(Ordering::SeqCst));
        registry().lock().unwrap().retain(|x| x.id != h.id);
    }
}
