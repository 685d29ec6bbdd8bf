//! Small argument-extraction helpers shared by every tool handler in
//! [`super::super::dispatch`].

use anyhow::{anyhow, Result};
use serde_json::Value;

pub fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("MCP_INVALID_PARAMS: missing required field '{}'", key))
}

pub fn opt_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

pub fn opt_bool(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn str_array(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn str_arg_reports_missing_field_name() {
        let err = str_arg(&json!({}), "scriptId").unwrap_err();
        assert!(err.to_string().contains("scriptId"));
    }

    #[test]
    fn str_array_defaults_to_empty() {
        assert!(str_array(&json!({}), "includeGlobs").is_empty());
    }
}
