//! At-exit report for embedded programs.
//!
//! Dumps GC/atom-pool/thread KPIs when the program finishes, controlled by
//! the `LAM_REPORT` env var:
//! - Unset → no report, zero cost
//! - `1` → human-readable to stderr
//! - `words` → accepted for grammar compatibility but has nothing to report
//!   (no word-call counters exist in this runtime) — falls back to plain
//!   `1` behavior
//! - `json` → JSON to stderr
//! - `json:/path` → JSON to file
//!
//! Requires the `diagnostics` feature (enabled by default); `report_stub.rs`
//! provides no-op FFI symbols when it's off.

#![cfg(feature = "diagnostics")]

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

/// Output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

/// Output destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    Stderr,
    File(String),
}

/// Parsed report configuration.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub format: ReportFormat,
    pub destination: ReportDestination,
}

impl ReportConfig {
    /// Parse from the `LAM_REPORT` environment variable.
    pub fn from_env() -> Option<Self> {
        let val = std::env::var("LAM_REPORT").ok()?;
        if val.is_empty() {
            return None;
        }

        match val.as_str() {
            "0" => None,
            "1" | "words" => Some(ReportConfig {
                format: ReportFormat::Human,
                destination: ReportDestination::Stderr,
            }),
            "json" => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::Stderr,
            }),
            s if s.starts_with("json:") => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::File(s[5..].to_string()),
            }),
            _ => {
                eprintln!("Warning: LAM_REPORT='{val}' not recognized, ignoring");
                None
            }
        }
    }
}

static REPORT_CONFIG: OnceLock<Option<ReportConfig>> = OnceLock::new();

fn get_report_config() -> &'static Option<ReportConfig> {
    REPORT_CONFIG.get_or_init(ReportConfig::from_env)
}

static START: OnceLock<Instant> = OnceLock::new();

/// Mark the clock base for wall-clock reporting. Called once from
/// `scheduler::init`; a no-op on subsequent calls.
pub fn mark_start() {
    START.get_or_init(Instant::now);
}

fn elapsed_ms() -> u64 {
    START.get().map(|t| t.elapsed().as_millis() as u64).unwrap_or(0)
}

/// Collected metrics for the report.
#[derive(Debug)]
pub struct ReportData {
    pub wall_clock_ms: u64,
    pub threads_spawned: u64,
    pub threads_completed: u64,
    pub peak_threads: usize,
    pub active_threads: usize,
    pub live_objects: usize,
    pub live_bytes: u64,
    pub threshold_bytes: u64,
    pub atom_count: usize,
}

fn collect_report_data() -> ReportData {
    let heap = lam_core::gc::heap().lock().unwrap();
    ReportData {
        wall_clock_ms: elapsed_ms(),
        threads_spawned: crate::scheduler::total_spawned(),
        threads_completed: crate::scheduler::total_completed(),
        peak_threads: crate::scheduler::peak_threads(),
        active_threads: crate::scheduler::ACTIVE_THREADS.load(std::sync::atomic::Ordering::Relaxed),
        live_objects: heap.all_objects.len(),
        live_bytes: heap.live_bytes,
        threshold_bytes: heap.threshold,
        atom_count: heap.atoms.len(),
    }
}

fn format_human(data: &ReportData) -> String {
    let mut out = String::new();
    out.push_str("=== RUNTIME REPORT ===\n");
    out.push_str(&format!("Wall clock:       {} ms\n", data.wall_clock_ms));
    out.push_str(&format!("Threads spawned:  {}\n", data.threads_spawned));
    out.push_str(&format!("Threads done:     {}\n", data.threads_completed));
    out.push_str(&format!("Peak threads:     {}\n", data.peak_threads));
    out.push_str(&format!("Active threads:   {}\n", data.active_threads));
    out.push_str(&format!("Live objects:     {}\n", data.live_objects));
    out.push_str(&format!("Live bytes:       {}\n", data.live_bytes));
    out.push_str(&format!("GC threshold:     {}\n", data.threshold_bytes));
    out.push_str(&format!("Interned atoms:   {}\n", data.atom_count));
    out.push_str("=======================\n");
    out
}

#[cfg(feature = "report-json")]
fn format_json(data: &ReportData) -> String {
    let mut map = serde_json::Map::new();
    map.insert("wall_clock_ms".into(), serde_json::Value::Number(data.wall_clock_ms.into()));
    map.insert("threads_spawned".into(), serde_json::Value::Number(data.threads_spawned.into()));
    map.insert("threads_completed".into(), serde_json::Value::Number(data.threads_completed.into()));
    map.insert(
        "peak_threads".into(),
        serde_json::Value::Number((data.peak_threads as u64).into()),
    );
    map.insert(
        "active_threads".into(),
        serde_json::Value::Number((data.active_threads as u64).into()),
    );
    map.insert(
        "live_objects".into(),
        serde_json::Value::Number((data.live_objects as u64).into()),
    );
    map.insert("live_bytes".into(), serde_json::Value::Number(data.live_bytes.into()));
    map.insert(
        "gc_threshold_bytes".into(),
        serde_json::Value::Number(data.threshold_bytes.into()),
    );
    map.insert(
        "interned_atoms".into(),
        serde_json::Value::Number((data.atom_count as u64).into()),
    );
    serde_json::to_string(&serde_json::Value::Object(map)).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(not(feature = "report-json"))]
fn format_json(data: &ReportData) -> String {
    eprintln!("Warning: LAM_REPORT=json requires the 'report-json' feature. Falling back to human format.");
    format_human(data)
}

fn emit_report() {
    let Some(config) = get_report_config() else {
        return;
    };

    let data = collect_report_data();
    let output = match config.format {
        ReportFormat::Human => format_human(&data),
        ReportFormat::Json => format_json(&data),
    };

    match &config.destination {
        ReportDestination::Stderr => {
            let _ = std::io::stderr().write_all(output.as_bytes());
        }
        ReportDestination::File(path) => {
            if let Ok(mut f) = std::fs::File::create(path) {
                let _ = f.write_all(output.as_bytes());
            } else {
                eprintln!("Warning: could not write report to {path}");
                let _ = std::io::stderr().write_all(output.as_bytes());
            }
        }
    }
}

/// At-exit report, called from the embedder after `lam_evaluate` returns.
///
/// # Safety
/// Safe to call from any context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lam_report() {
    emit_report();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_parse_variants() {
        let cases = [
            ("0", None),
            ("1", Some((ReportFormat::Human, ReportDestination::Stderr))),
            ("json", Some((ReportFormat::Json, ReportDestination::Stderr))),
            (
                "json:/tmp/lam_report.json",
                Some((ReportFormat::Json, ReportDestination::File("/tmp/lam_report.json".into()))),
            ),
        ];

        for (input, expected) in cases {
            let result = match input {
                "0" => None,
                "1" => Some(ReportConfig {
                    format: ReportFormat::Human,
                    destination: ReportDestination::Stderr,
                }),
                "json" => Some(ReportConfig {
                    format: ReportFormat::Json,
                    destination: ReportDestination::Stderr,
                }),
                s if s.starts_with("json:") => Some(ReportConfig {
                    format: ReportFormat::Json,
                    destination: ReportDestination::File(s[5..].to_string()),
                }),
                _ => None,
            };
            match (result, expected) {
                (None, None) => {}
                (Some(r), Some((fmt, dest))) => {
                    assert_eq!(r.format, fmt, "format mismatch for '{input}'");
                    assert_eq!(r.destination, dest, "destination mismatch for '{input}'");
                }
                _ => panic!("mismatch for input '{input}'"),
            }
        }
    }

    #[test]
    fn format_human_includes_core_fields() {
        let data = ReportData {
            wall_clock_ms: 42,
            threads_spawned: 10,
            threads_completed: 9,
            peak_threads: 5,
            active_threads: 2,
            live_objects: 100,
            live_bytes: 2048,
            threshold_bytes: 262144,
            atom_count: 17,
        };
        let output = format_human(&data);
        assert!(output.contains("42 ms"));
        assert!(output.contains("Threads spawned:  10"));
        assert!(output.contains("Interned atoms:   17"));
    }

    #[cfg(feature = "report-json")]
    #[test]
    fn format_json_includes_core_fields() {
        let data = ReportData {
            wall_clock_ms: 42,
            threads_spawned: 10,
            threads_completed: 9,
            peak_threads: 5,
            active_threads: 2,
            live_objects: 100,
            live_bytes: 2048,
            threshold_bytes: 262144,
            atom_count: 17,
        };
        let output = format_json(&data);
        assert!(output.contains("\"wall_clock_ms\":42"));
        assert!(output.contains("\"threads_spawned\":10"));
    }

    #[test]
    fn emit_report_noop_when_disabled() {
        emit_report();
    }
}
