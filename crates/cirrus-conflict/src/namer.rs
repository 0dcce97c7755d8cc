//! Conflict naming for keep-both resolution
//!
//! Generates names for conflict copies, following the pattern:
//! `stem (Conflicted Copy YYYY-MM-DD HH-MM-SS).ext`

use chrono::{DateTime, Utc};

/// Highest numeric suffix tried before falling back to a millisecond stamp
const MAX_SUFFIX: u32 = 999;

/// Generates conflict copy file names
pub struct ConflictNamer;

impl ConflictNamer {
    /// Generates a conflict copy filename for a conflict detected at `at`
    ///
    /// Given "report.docx", produces
    /// "report (Conflicted Copy 2026-02-07 14-03-59).docx"
    pub fn generate(original_name: &str, at: DateTime<Utc>) -> String {
        Self::candidate(original_name, at, 1)
    }

    /// The `n`-th candidate name; `n > 1` appends a numeric suffix
    pub fn candidate(original_name: &str, at: DateTime<Utc>, n: u32) -> String {
        let timestamp = at.format("%Y-%m-%d %H-%M-%S");
        let marker = if n > 1 {
            format!("Conflicted Copy {timestamp} {n}")
        } else {
            format!("Conflicted Copy {timestamp}")
        };

        let (stem, ext) = split_extension(original_name);
        format!("{stem} ({marker}){ext}")
    }

    /// First candidate for which `exists` returns false
    pub fn generate_unique<F>(original_name: &str, at: DateTime<Utc>, mut exists: F) -> String
    where
        F: FnMut(&str) -> bool,
    {
        for n in 1..=MAX_SUFFIX {
            let candidate = Self::candidate(original_name, at, n);
            if !exists(&candidate) {
                return candidate;
            }
        }
        Self::fallback(original_name, at)
    }

    /// Name used once every numbered candidate is taken
    pub fn fallback(original_name: &str, at: DateTime<Utc>) -> String {
        let (stem, ext) = split_extension(original_name);
        format!("{stem} (Conflicted Copy {}){ext}", at.timestamp_millis())
    }

    /// Upper bound of the numbered candidates
    pub fn max_suffix() -> u32 {
        MAX_SUFFIX
    }
}

/// Split "name.ext" into ("name", ".ext"); dotfiles have no extension
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}
