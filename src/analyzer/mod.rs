//! Static write analyzer — detects whether a file defines one of GAS's
//! reserved trigger entry points (`doGet`, `doPost`, `onOpen`, `onEdit`,
//! `onInstall`) as a true top-level binding, after stripping comments, so a
//! write tool can warn when an edit accidentally shadows or removes one
//! (spec §11 supplemental feature).
//!
//! Recognizes three top-level forms: a function declaration, a function
//! expression assigned to `const`/`let`/`var`, and an arrow function
//! assigned the same way. It does not attempt full JS parsing — string and
//! template-literal contents are not distinguished from code, so a trigger
//! name appearing only inside a string is a (rare, accepted) false
//! positive rather than a silent miss.

use once_cell::sync::Lazy;
use regex::Regex;

pub const TRIGGER_NAMES: [&str; 5] = ["doGet", "doPost", "onOpen", "onEdit", "onInstall"];

static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)//[^\n]*").unwrap());
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

static FUNCTION_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:async\s+)?function\s+(\w+)\s*\(").unwrap());
static ASSIGNED_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?function\s*\(").unwrap()
});
static ASSIGNED_ARROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s*)?\(?[\w,\s]*\)?\s*=>").unwrap()
});

fn strip_comments(source: &str) -> String {
    let without_block = BLOCK_COMMENT.replace_all(source, "");
    LINE_COMMENT.replace_all(&without_block, "").into_owned()
}

/// Every name among [`TRIGGER_NAMES`] that `source` defines at the top
/// level, in source order with duplicates removed.
pub fn detect_trigger_handlers(source: &str) -> Vec<&'static str> {
    let cleaned = strip_comments(source);
    let mut found = Vec::new();

    for re in [&*FUNCTION_DECL, &*ASSIGNED_FUNCTION, &*ASSIGNED_ARROW] {
        for caps in re.captures_iter(&cleaned) {
            let name = &caps[1];
            if let Some(trigger) = TRIGGER_NAMES.iter().find(|t| **t == name) {
                if !found.contains(trigger) {
                    found.push(*trigger);
                }
            }
        }
    }
    found
}

pub fn defines_trigger(source: &str, name: &str) -> bool {
    detect_trigger_handlers(source).contains(&name)
}
