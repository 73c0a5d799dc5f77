//! Serialised stdout for the line-oriented progress protocol.
//!
//! The GUI shell parses our stdout line by line, so concurrent workers
//! must never interleave partial lines. All protocol output goes through
//! a single process-wide mutex.

use std::io::Write;
use std::sync::Mutex;

static PRINT_LOCK: Mutex<()> = Mutex::new(());

/// Print a full protocol line, holding the print lock for the duration.
pub fn print_line(msg: &str) {
    let _guard = PRINT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{}", msg);
    let _ = out.flush();
}

/// Print an in-place progress update (carriage return, no newline).
///
/// Used for byte-level download progress; the caller terminates the
/// sequence with [`print_line`] or [`finish_inline`].
pub fn print_inline(msg: &str) {
    let _guard = PRINT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "\r{}", msg);
    let _ = out.flush();
}

/// Terminate an inline progress sequence with a newline.
pub fn finish_inline() {
    let _guard = PRINT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out);
    let _ = out.flush();
}
