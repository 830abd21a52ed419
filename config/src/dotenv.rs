//! Minimal `.env` parser: KEY=VALUE lines into a map.
//!
//! Lines are trimmed; empty lines and `#` comments are skipped. Values may
//! be single- or double-quoted; double quotes support the `\"` escape. No
//! multiline values or line continuations.

use std::collections::HashMap;
use std::path::Path;

fn strip_quotes(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return value[1..value.len() - 1].replace("\\\"", "\"");
    }
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].to_string();
    }
    value.to_string()
}

pub(crate) fn parse(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), strip_quotes(value.trim()));
    }
    out
}

/// Loads `<dir>/.env` into a map. A missing file yields an empty map.
pub(crate) fn load(dir: &Path) -> std::io::Result<HashMap<String, String>> {
    let path = dir.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    Ok(parse(&std::fs::read_to_string(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let map = parse("# creds\n\nGITHUB_TOKEN=abc\nBAD LINE\n");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("GITHUB_TOKEN").map(String::as_str), Some("abc"));
    }

    #[test]
    fn parse_strips_quotes_and_keeps_escapes() {
        let map = parse("A=\"x \\\"y\\\"\"\nB='raw $val'\nC=plain\n");
        assert_eq!(map.get("A").map(String::as_str), Some("x \"y\""));
        assert_eq!(map.get("B").map(String::as_str), Some("raw $val"));
        assert_eq!(map.get("C").map(String::as_str), Some("plain"));
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_empty());
    }
}
