// src/utils/paths.rs
//! Checks for names taken from run records and used as file names

use std::path::{Component, Path};

/// Whether `name` is exactly one plain path segment (no separators, no
/// `.`/`..`, not absolute)
pub fn is_single_segment(name: &str) -> bool {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_accepted() {
        for name in ["model", "accuracy.json", "run-1", "..hidden", "a..b"] {
            assert!(is_single_segment(name), "{}", name);
        }
    }

    #[test]
    fn test_escaping_names_rejected() {
        for name in ["", ".", "..", "../x", "/abs", "a/b", "a\\b", "x/../y"] {
            assert!(!is_single_segment(name), "{}", name);
        }
    }
}
