//! CommonJSShim (spec §4.B) — the in-GAS runtime, injected into every
//! project at a known position.
//!
//! The shim itself is plain GAS-runtime JavaScript (`shim.js`, embedded
//! verbatim); this module only owns the host-side bookkeeping around it:
//! the fixed file names and the load-order invariant the write tools must
//! enforce via `GasApi::reorder` (spec: "File load order matters").

/// The shim's GAS logical file name. Always `SERVER_JS`.
pub const SHIM_FILE_NAME: &str = "__mcp_shim";

/// The execution-bootstrap module name, loaded immediately after the shim
/// and before any user module.
pub const EXEC_BOOTSTRAP_FILE_NAME: &str = "__mcp_exec";

/// The shim's source, injected verbatim into every project.
pub const SHIM_SOURCE: &str = include_str!("shim.js");

/// `__mcp_exec`'s source — a thin bootstrap that lets the `exec` tool run an
/// arbitrary JS statement inside the project's deployment by calling back
/// into the shim's module registry. Kept separate from the shim itself so a
/// future exec protocol change doesn't require reinjecting the whole shim.
pub const EXEC_BOOTSTRAP_SOURCE: &str = r#"
function __mcp_exec__(js_statement) {
  try {
    var result = eval(js_statement);
    return { success: true, result: result, logger_output: Logger.getLog() };
  } catch (e) {
    return { success: false, result: null, error: String(e), logger_output: Logger.getLog() };
  }
}
"#;

/// Names that must always occupy the first two execution-order slots, in
/// this order — the write tools enforce this via `GasApi::reorder` whenever
/// they touch a project's file list (spec §4.B "File load order matters").
pub fn required_leading_order() -> [&'static str; 2] {
    [SHIM_FILE_NAME, EXEC_BOOTSTRAP_FILE_NAME]
}

/// Given a project's current file name order, compute the reordering
/// needed to satisfy `required_leading_order`, preserving the relative
/// order of everything else. Returns `None` if no reorder is needed.
pub fn enforce_load_order(current: &[String]) -> Option<Vec<String>> {
    let required = required_leading_order();
    let already_ok = current.len() >= required.len()
        && required.iter().enumerate().all(|(i, name)| current[i] == *name);
    if already_ok {
        return None;
    }

    let mut reordered: Vec<String> = required.iter().map(|s| s.to_string()).collect();
    for name in current {
        if !required.contains(&name.as_str()) {
            reordered.push(name.clone());
        }
    }
    // Any required name missing from `current` is a project that has not
    // yet had the shim installed — the caller is responsible for creating
    // those files before reordering; we still return the desired order so
    // it can be applied once they exist.
    Some(reordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_reorder_needed_when_already_leading() {
        let current = vec![
            SHIM_FILE_NAME.to_string(),
            EXEC_BOOTSTRAP_FILE_NAME.to_string(),
            "UserCode".to_string(),
        ];
        assert!(enforce_load_order(&current).is_none());
    }

    #[test]
    fn reorders_shim_to_front() {
        let current = vec![
            "UserCode".to_string(),
            EXEC_BOOTSTRAP_FILE_NAME.to_string(),
            SHIM_FILE_NAME.to_string(),
        ];
        let reordered = enforce_load_order(&current).unwrap();
        assert_eq!(
            reordered,
            vec![
                SHIM_FILE_NAME.to_string(),
                EXEC_BOOTSTRAP_FILE_NAME.to_string(),
                "UserCode".to_string(),
            ]
        );
    }

    #[test]
    fn shim_source_defines_require_and_define_module() {
        assert!(SHIM_SOURCE.contains("function require("));
        assert!(SHIM_SOURCE.contains("function __defineModule__("));
    }
}
