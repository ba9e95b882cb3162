//! Bounded retry for filesystem calls that can fail transiently.
//!
//! Virus scanners and indexers on Windows briefly hold handles on freshly
//! created files, which surfaces as sharing violations or permission errors.
//! These helpers retry such calls a few times with exponential backoff and
//! return the last error if the condition persists.

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Maximum number of attempts (including the first).
pub const MAX_ATTEMPTS: u32 = 5;

/// Delay before the second attempt; doubled for each further attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Returns true if `err` is worth retrying.
#[must_use]
pub fn is_transient(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::PermissionDenied
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => true,
        _ => is_transient_os_error(err.raw_os_error()),
    }
}

#[cfg(unix)]
fn is_transient_os_error(code: Option<i32>) -> bool {
    // EBUSY
    code == Some(16)
}

#[cfg(windows)]
fn is_transient_os_error(code: Option<i32>) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(code, Some(32 | 33))
}

#[cfg(not(any(unix, windows)))]
fn is_transient_os_error(_code: Option<i32>) -> bool {
    false
}

/// Run `op`, retrying transient failures with exponential backoff.
///
/// # Errors
/// Returns the first non-transient error, or the last transient error once
/// [`MAX_ATTEMPTS`] is exhausted.
pub fn with_retry<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut delay = INITIAL_BACKOFF;
    let mut attempt = 1;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < MAX_ATTEMPTS && is_transient(&e) => {
                thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// `fs::create_dir_all` with retry.
///
/// # Errors
/// Returns an error if the folder cannot be created.
pub fn create_dir_all_with_retry(path: &Path) -> io::Result<()> {
    with_retry(|| fs::create_dir_all(path))
}

/// [`crate::fs::remove_path`] with retry.
///
/// # Errors
/// Returns an error if the entry exists and cannot be removed.
pub fn remove_path_with_retry(path: &Path) -> io::Result<()> {
    with_retry(|| crate::fs::remove_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_with_retry_succeeds_after_transient_errors() {
        let calls = Cell::new(0);
        let result = with_retry(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            } else {
                Ok(calls.get())
            }
        });

        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_with_retry_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: io::Result<()> = with_retry(|| {
            calls.set(calls.get() + 1);
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), MAX_ATTEMPTS);
    }

    #[test]
    fn test_with_retry_does_not_retry_permanent_errors() {
        let calls = Cell::new(0);
        let result: io::Result<()> = with_retry(|| {
            calls.set(calls.get() + 1);
            Err(io::Error::from(io::ErrorKind::NotFound))
        });

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_create_dir_all_with_retry() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        create_dir_all_with_retry(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
