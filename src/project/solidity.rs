//! project/solidity.rs
//!
//! Lightweight, regex-level facts about a Solidity source file.

use std::sync::OnceLock;

use regex::Regex;

pub const DEFAULT_PRAGMA: &str = "^0.8.0";

const DECLARATION_PREFIXES: [&str; 4] = ["contract ", "library ", "interface ", "abstract contract "];

/// Text preceding the first type declaration line.
///
/// Empty when the file declares no contract, library or interface.
pub fn pre_declaration(code: &str) -> String {
    let lines: Vec<&str> = code.split('\n').collect();

    let start = lines.iter().position(|line| {
        let t = line.trim_start();
        DECLARATION_PREFIXES.iter().any(|p| t.starts_with(p))
    });

    match start {
        Some(i) => lines[..i].join("\n"),
        None => String::new(),
    }
}

/// Version constraint of the first `pragma solidity` directive.
pub fn pragma_version(code: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"pragma\s+solidity\s+([^;]+);").unwrap());

    re.captures(code)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Name of the first declared contract, library or interface.
pub fn primary_name(code: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:abstract\s+)?(?:contract|library|interface)\s+([A-Za-z_$][A-Za-z0-9_$]*)")
            .unwrap()
    });

    re.captures(code)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
