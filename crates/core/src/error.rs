//! Thread-local error cell.
//!
//! Every fallible operation in the runtime returns `Result<T, LamError>`
//! internally; at the FFI boundary that collapses to the C convention of
//! "0 on success, nonzero on failure, details in the thread-local cell",
//! exposed through the `lam_*_error` accessors below and a typed
//! `ErrorKind` for embedders that want to branch on failure category.

use std::cell::RefCell;
use std::ffi::CString;
use std::fmt;
use std::ptr;

/// The error categories embedders can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TypeMismatch,
    ArityMismatch,
    OutOfRange,
    AtomicityViolation,
    UndefinedName,
    ResourceExhaustion,
    IoFailure,
    ProtocolViolation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::ArityMismatch => "arity mismatch",
            ErrorKind::OutOfRange => "out of range",
            ErrorKind::AtomicityViolation => "atomicity violation",
            ErrorKind::UndefinedName => "undefined name",
            ErrorKind::ResourceExhaustion => "resource exhaustion",
            ErrorKind::IoFailure => "i/o failure",
            ErrorKind::ProtocolViolation => "protocol violation",
        };
        f.write_str(s)
    }
}

/// A runtime error: a kind, a message, and the most recent source-line
/// marker (file, line) if the expansion hook has run.
#[derive(Debug, Clone)]
pub struct LamError {
    pub kind: ErrorKind,
    pub message: String,
    pub src: Option<(String, u32)>,
}

impl LamError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        LamError {
            kind,
            message: message.into(),
            src: None,
        }
    }

    /// Attach a file/line marker so propagation through a parse/eval
    /// boundary reports where execution was, not just what failed.
    pub fn with_src(mut self, file: impl Into<String>, line: u32) -> Self {
        self.src = Some((file.into(), line));
        self
    }

    pub fn formatted(&self) -> String {
        match &self.src {
            Some((file, line)) => format!("{}:{}: {}", file, line, self.message),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for LamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.formatted())
    }
}

impl std::error::Error for LamError {}

thread_local! {
    static LAST_ERROR: RefCell<Option<LamError>> = const { RefCell::new(None) };
    static ERROR_CSTRING: RefCell<Option<CString>> = const { RefCell::new(None) };
}

pub fn set_error(err: LamError) {
    ERROR_CSTRING.with(|cs| *cs.borrow_mut() = None);
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(err));
}

pub fn take_error() -> Option<LamError> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

pub fn has_error() -> bool {
    LAST_ERROR.with(|e| e.borrow().is_some())
}

pub fn clear_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
    ERROR_CSTRING.with(|e| *e.borrow_mut() = None);
}

/// Format a panic payload crossing the FFI boundary into an error message.
pub fn format_panic_payload(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// --- FFI-safe accessors, named per the `lam_<op>` convention -------------

#[unsafe(no_mangle)]
pub extern "C" fn lam_has_error() -> bool {
    has_error()
}

/// Returns a pointer valid until the next call to any `lam_*_error`
/// function on this thread. Callers must copy immediately if retaining.
#[unsafe(no_mangle)]
pub extern "C" fn lam_get_error() -> *const i8 {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(err) => cache_and_return(err.formatted()),
        None => ptr::null(),
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn lam_take_error() -> *const i8 {
    match take_error() {
        Some(err) => cache_and_return(err.formatted()),
        None => ptr::null(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn lam_clear_error() {
    clear_error();
}

fn cache_and_return(msg: String) -> *const i8 {
    let safe: String = msg.chars().map(|c| if c == '\0' { '?' } else { c }).collect();
    ERROR_CSTRING.with(|cs| {
        let cstring = CString::new(safe).expect("null bytes already replaced");
        let ptr = cstring.as_ptr();
        *cs.borrow_mut() = Some(cstring);
        ptr
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_take_roundtrip() {
        clear_error();
        assert!(!has_error());
        set_error(LamError::new(ErrorKind::UndefinedName, "x"));
        assert!(has_error());
        let e = take_error().unwrap();
        assert_eq!(e.kind, ErrorKind::UndefinedName);
        assert!(!has_error());
    }

    #[test]
    fn src_expansion_formats_file_and_line() {
        let e = LamError::new(ErrorKind::TypeMismatch, "bad op").with_src("prog.lam", 12);
        assert_eq!(e.formatted(), "prog.lam:12: bad op");
    }

    #[test]
    fn panic_payload_formats_str_and_string() {
        let p: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(format_panic_payload(&*p), "boom");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("boom2"));
        assert_eq!(format_panic_payload(&*p), "boom2");
    }
}
