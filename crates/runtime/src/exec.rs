//! Execution context: the per-thread interpreter state.

use crate::array::{ObjArray, new_array};
use crate::map::ObjMap;
use lam_core::LamError;
use lam_core::error::ErrorKind;
use lam_core::header::{ObjPtr, downcast};
use std::sync::{Condvar, Mutex};

/// A single frame of "where to resume": the code array plus an index into
/// it, rather than a raw pointer into the body, since the code array can
/// move under the GC.
#[derive(Clone, Copy)]
pub struct PC {
    pub code: ObjPtr,
    pub index: usize,
}

/// A catch point pushed onto the execution stack: operand/variable stack
/// depths to unwind to, plus the handler to run.
pub struct Mark {
    pub os_depth: usize,
    pub vs_depth: usize,
    pub handler: Option<ObjPtr>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExecState {
    Active,
    Returned,
    Failed,
}

/// How many ticks elapse between signal/GC/yield checks.
pub const COUNT_QUANTUM: i64 = 1000;

pub struct ExecContext {
    /// Execution stack: return points and catch marks.
    pub xs: Vec<PC>,
    /// Marks interleaved with `xs`, indexed by operand/variable depth at
    /// push time.
    pub marks: Vec<Mark>,
    /// Operand stack.
    pub os: Vec<ObjPtr>,
    /// Variable (scope) stack: innermost scope last.
    pub vs: Vec<ObjPtr>,
    /// Current source-position marker, for error reporting.
    pub src: Option<ObjPtr>,
    /// Countdown to the next periodic check.
    pub count: i64,
    /// Number of ticks consumed since the thread started, for fairness
    /// accounting across cooperative yields.
    pub yield_count: u64,
    /// Saved PC for a suspended function awaiting re-entry (closet), used
    /// by generators/coroutine-style resumption.
    pub pc_closet: Option<PC>,
    /// Scratch operand cache reused across calls to avoid a `Vec`
    /// allocation per call on the hot path.
    pub os_temp_cache: Vec<ObjPtr>,
    /// Critical-section nesting depth.
    pub critsect: u32,
    /// What this thread is blocked waiting for, if anything.
    pub waitfor: Option<ObjPtr>,
    pub n_engine_recurse: u32,
    pub state: ExecState,
    pub result: Option<ObjPtr>,
    pub error: Option<LamError>,
    /// Condition variable pairing for `waitfor`/`wakeup`.
    pub wake: Mutex<bool>,
    pub wake_cv: Condvar,
}

impl ExecContext {
    pub fn new() -> Self {
        ExecContext {
            xs: Vec::new(),
            marks: Vec::new(),
            os: Vec::new(),
            vs: Vec::new(),
            src: None,
            count: COUNT_QUANTUM,
            yield_count: 0,
            pc_closet: None,
            os_temp_cache: Vec::new(),
            critsect: 0,
            waitfor: None,
            n_engine_recurse: 0,
            state: ExecState::Active,
            result: None,
            error: None,
            wake: Mutex::new(false),
            wake_cv: Condvar::new(),
        }
    }

    pub fn os_push(&mut self, v: ObjPtr) {
        self.os.push(v);
    }

    pub fn os_pop(&mut self) -> Option<ObjPtr> {
        self.os.pop()
    }

    /// Pop the top `n` operands, returned in push order (`arg[0]` first).
    pub fn os_pop_n(&mut self, n: usize) -> Vec<ObjPtr> {
        let at = self.os.len().saturating_sub(n);
        self.os.split_off(at)
    }

    pub fn vs_top(&self) -> Option<ObjPtr> {
        self.vs.last().copied()
    }

    pub fn push_scope(&mut self, scope: ObjPtr) {
        self.vs.push(scope);
    }

    pub fn pop_scope(&mut self) -> Option<ObjPtr> {
        self.vs.pop()
    }

    /// Enter a scripted call: push a return mark, then the code's start
    /// PC, then the new scope.
    ///
    /// Refuses to push past `n_engine_recurse`'s configured limit, the
    /// engine's own analogue of a C-stack-depth guard: this evaluator
    /// never recurses through the Rust call stack per script call, so the
    /// variable-stack depth (one scope per live scripted call) stands in
    /// for it.
    pub fn push_call_frame(&mut self, code: ObjPtr, scope: ObjPtr) -> Result<(), LamError> {
        if self.vs.len() as u32 >= crate::config::max_recursion() {
            return Err(LamError::new(
                ErrorKind::ResourceExhaustion,
                format!(
                    "call depth exceeded LAM_MAX_RECURSION ({})",
                    crate::config::max_recursion()
                ),
            ));
        }
        self.marks.push(Mark {
            os_depth: self.os.len(),
            vs_depth: self.vs.len(),
            handler: None,
        });
        self.xs.push(PC { code, index: 0 });
        self.vs.push(scope);
        self.n_engine_recurse = self.vs.len() as u32;
        Ok(())
    }

    /// Unwind to the nearest mark, discarding any operands pushed since.
    pub fn unwind_to_mark(&mut self) -> Option<Mark> {
        let mark = self.marks.pop()?;
        self.os.truncate(mark.os_depth);
        self.vs.truncate(mark.vs_depth);
        self.xs.pop();
        self.n_engine_recurse = self.vs.len() as u32;
        Some(mark)
    }

    /// As `unwind_to_mark`, but preserves the single value on top of the
    /// operand stack (the call's return value) across the unwind.
    pub fn unwind_to_mark_keep_top(&mut self) -> Option<Mark> {
        let top = self.os.pop();
        let mark = self.unwind_to_mark()?;
        if let Some(v) = top {
            self.os.push(v);
        }
        Some(mark)
    }

    pub fn current_scope(&self) -> Option<ObjPtr> {
        self.vs.last().copied()
    }

    /// Resolve a name by searching the innermost scope then its super
    /// chain, matching how `NAMELVALUE`/`DOT` opcodes resolve identifiers.
    pub fn lookup(&self, name: ObjPtr) -> Option<ObjPtr> {
        let scope = self.current_scope()?;
        ObjMap::fetch(scope, name)
    }

    /// Tick the periodic counter; returns `true` when a signal/GC/yield
    /// check is due.
    pub fn tick(&mut self) -> bool {
        self.count -= 1;
        self.yield_count += 1;
        if self.count <= 0 {
            self.count = COUNT_QUANTUM;
            true
        } else {
            false
        }
    }

    pub fn os_array_snapshot(&self) -> ObjPtr {
        let arr = new_array();
        let a = unsafe { downcast::<ObjArray>(arr).as_mut() };
        for v in &self.os {
            let _ = a.push(*v);
        }
        arr
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
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
            crate::map::init_map_type();
            crate::array::init_array_type();
        });
    }

    #[test]
    fn unwind_discards_operands_pushed_since_mark() {
        setup();
        let mut ctx = ExecContext::new();
        ctx.os_push(new_int(1));
        ctx.marks.push(Mark {
            os_depth: ctx.os.len(),
            vs_depth: ctx.vs.len(),
            handler: None,
        });
        ctx.xs.push(PC {
            code: crate::array::new_array(),
            index: 0,
        });
        ctx.os_push(new_int(2));
        ctx.os_push(new_int(3));
        ctx.unwind_to_mark();
        assert_eq!(ctx.os.len(), 1);
        assert_eq!(int_value(ctx.os[0]), 1);
    }

    #[test]
    fn tick_fires_once_per_quantum() {
        setup();
        let mut ctx = ExecContext::new();
        let mut fires = 0;
        for _ in 0..(COUNT_QUANTUM * 2) {
            if ctx.tick() {
                fires += 1;
            }
        }
        assert_eq!(fires, 2);
    }

    #[test]
    fn push_call_frame_refuses_past_the_configured_depth() {
        setup();
        let mut ctx = ExecContext::new();
        let limit = crate::config::max_recursion();
        for _ in 0..limit {
            let code = crate::array::new_array();
            let scope = crate::map::new_map(None);
            ctx.push_call_frame(code, scope).unwrap();
        }
        let code = crate::array::new_array();
        let scope = crate::map::new_map(None);
        let err = ctx.push_call_frame(code, scope).unwrap_err();
        assert_eq!(err.kind, lam_core::error::ErrorKind::ResourceExhaustion);
        assert_eq!(ctx.vs.len() as u32, limit);
    }

    #[test]
    fn unwind_to_mark_keeps_recursion_counter_accurate() {
        setup();
        let mut ctx = ExecContext::new();
        for _ in 0..5 {
            let code = crate::array::new_array();
            let scope = crate::map::new_map(None);
            ctx.push_call_frame(code, scope).unwrap();
        }
        assert_eq!(ctx.n_engine_recurse, 5);
        ctx.unwind_to_mark();
        ctx.unwind_to_mark();
        assert_eq!(ctx.n_engine_recurse, 3);
        assert_eq!(ctx.vs.len(), 3);
    }
}
