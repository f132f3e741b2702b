//! Session root and directory layout.
//!
//! Layout per session:
//! `<root>/<course_name>/<YYYYMMDD>_<session_number>/{metadata,history,summary,vocabulary}.json`
//! plus `report.md`.

use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.json";
pub const HISTORY_FILE: &str = "history.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const VOCABULARY_FILE: &str = "vocabulary.json";
pub const REPORT_FILE: &str = "report.md";

/// Resolve the session root: explicit override, else `UNIVOICE_DATA_PATH`,
/// else `~/UniVoice`, else `./UniVoice` on systems with no home directory.
pub fn resolve_root(override_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path;
    }
    if let Some(env) = std::env::var_os("UNIVOICE_DATA_PATH") {
        return PathBuf::from(env);
    }
    dirs::home_dir()
        .map(|home| home.join("UniVoice"))
        .unwrap_or_else(|| PathBuf::from("UniVoice"))
}

/// Course names become directory names; path separators and control
/// characters are replaced so a course called `CS/101` cannot escape the
/// root.
pub fn sanitize_course_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0'..='\x1f' => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

pub fn course_dir(root: &Path, course_name: &str) -> PathBuf {
    root.join(sanitize_course_name(course_name))
}

/// Parse a session directory name `<YYYYMMDD>_<n>`.
pub fn parse_session_dir_name(name: &str) -> Option<(chrono::NaiveDate, u32)> {
    let (date_part, number_part) = name.split_once('_')?;
    let date = chrono::NaiveDate::parse_from_str(date_part, "%Y%m%d").ok()?;
    let number = number_part.parse().ok()?;
    Some((date, number))
}
