//! Sandboxed filesystem access for scripts.
//!
//! Page-processing scripts only ever see a narrow relative-path world:
//! plain names built from a conservative character set, no leading dots,
//! no doubled separators, no traversal, and the Windows device names
//! refused in every segment so a path vetted on one platform stays safe
//! on the others.

use crate::error::{Result, RuntimeError};
use std::fs;
use std::path::Path;

/// Windows device names that must not appear as a segment stem.
fn is_forbidden_name(segment: &str) -> bool {
    let stem = segment.split('.').next().unwrap_or(segment);
    if !(3..=4).contains(&stem.len()) {
        return false;
    }
    let upper = stem.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    match bytes.len() {
        3 => matches!(upper.as_str(), "CON" | "PRN" | "AUX" | "NUL"),
        _ => {
            (upper.starts_with("COM") || upper.starts_with("LPT"))
                && bytes[3].is_ascii_digit()
        }
    }
}

/// Validates a script-supplied relative path.
pub fn is_valid_path(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    for segment in path.split('/') {
        if segment.is_empty() {
            // leading slash or doubled separator
            return false;
        }
        if segment.starts_with('.') {
            return false;
        }
        if segment.ends_with('.') {
            return false;
        }
        if is_forbidden_name(segment) {
            return false;
        }
        let ok = segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ' ' | '.'));
        if !ok {
            return false;
        }
    }
    true
}

fn checked(path: &str) -> Result<&Path> {
    if is_valid_path(path) {
        Ok(Path::new(path))
    } else {
        Err(RuntimeError::invalid_argument(format!(
            "invalid file name '{path}'"
        )))
    }
}

/// Reads a whole file.
pub fn file_read(path: &str) -> Result<Vec<u8>> {
    Ok(fs::read(checked(path)?)?)
}

/// Writes a whole file, replacing any previous content.
pub fn file_write(path: &str, data: &[u8]) -> Result<()> {
    Ok(fs::write(checked(path)?, data)?)
}

/// Lists a directory: entries sorted by name, `.`/`..` excluded,
/// directories suffixed with `/`.
pub fn file_list(path: &str) -> Result<Vec<String>> {
    let dir = checked(path)?;
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if name == "." || name == ".." {
            continue;
        }
        if entry.file_type()?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_validation() {
        assert!(is_valid_path("a/b c/d-e_f.txt"));
        assert!(is_valid_path("file.tar.gz"));
        assert!(!is_valid_path(""));
        assert!(!is_valid_path("../x"));
        assert!(!is_valid_path("a//b"));
        assert!(!is_valid_path(".hidden"));
        assert!(!is_valid_path("/abs"));
        assert!(!is_valid_path("dir/.hidden"));
        assert!(!is_valid_path("trailing."));
        assert!(!is_valid_path("a\\b"));
        assert!(!is_valid_path("name?"));
    }

    #[test]
    fn device_names_are_refused_in_any_segment() {
        assert!(!is_valid_path("CON"));
        assert!(!is_valid_path("con.txt"));
        assert!(!is_valid_path("COM1.txt"));
        assert!(!is_valid_path("logs/LPT9"));
        assert!(is_valid_path("console.txt"));
        assert!(is_valid_path("common/file"));
    }

    #[test]
    fn read_write_list_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let old = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        file_write("data.bin", b"\x01\x02\x03").unwrap();
        fs::create_dir("sub").unwrap();
        file_write("sub/inner.txt", b"x").unwrap();

        assert_eq!(file_read("data.bin").unwrap(), b"\x01\x02\x03");
        let listing = file_list("sub").unwrap();
        assert_eq!(listing, vec!["inner.txt".to_string()]);
        let top = file_list("sub/..").err();
        assert!(top.is_some(), "traversal must be rejected");

        std::env::set_current_dir(old).unwrap();
    }

    #[test]
    fn missing_file_reports_io_error() {
        assert!(matches!(
            file_read("no-such-file.bin"),
            Err(RuntimeError::Io(_))
        ));
    }
}
