//! `tools/list` catalogue — the stable, client-facing tool surface (§6).
//!
//! Search/grep/sed-style tools are out of scope (§1 non-goals): they reuse
//! the same file view without adding architectural novelty, so they aren't
//! part of this catalogue.

use serde_json::{json, Value};

pub mod dispatch_support;

#[derive(Debug, Clone, serde::Serialize)]
pub struct McpToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl McpToolDef {
    fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// The full tool catalogue this server advertises over `tools/list`.
pub fn gasmcp_tools() -> Vec<McpToolDef> {
    vec![
        McpToolDef::new(
            "cat",
            "Read a file from a Google Apps Script project's local mirror, falling back to the remote copy. SERVER_JS is returned unwrapped.",
            json!({
                "type": "object",
                "properties": {
                    "scriptId": { "type": "string" },
                    "path": { "type": "string" },
                    "raw": { "type": "boolean", "description": "bypass wrap/unwrap, return system bytes" },
                },
                "required": ["scriptId", "path"],
                "additionalProperties": false,
            }),
        ),
        McpToolDef::new(
            "write",
            "Create or overwrite a file's content. SERVER_JS content is wrapped before it reaches the remote project. Routes through GitOperationManager when a project repo exists.",
            json!({
                "type": "object",
                "properties": {
                    "scriptId": { "type": "string" },
                    "path": { "type": "string" },
                    "content": { "type": "string" },
                    "fileType": { "type": "string", "enum": ["SERVER_JS", "HTML", "JSON"] },
                    "moduleOptions": { "type": "object" },
                    "changeReason": { "type": "string" },
                    "raw": { "type": "boolean", "description": "write content verbatim, skipping wrap (system files only)" },
                },
                "required": ["scriptId", "path", "content"],
                "additionalProperties": false,
            }),
        ),
        McpToolDef::new(
            "edit",
            "Exact search-and-replace against a file's unwrapped content. Fails if searchText does not match exactly once (unless replaceAll).",
            json!({
                "type": "object",
                "properties": {
                    "scriptId": { "type": "string" },
                    "path": { "type": "string" },
                    "searchText": { "type": "string" },
                    "replaceText": { "type": "string" },
                    "replaceAll": { "type": "boolean" },
                    "changeReason": { "type": "string" },
                    "raw": { "type": "boolean", "description": "match against wrapped system content instead of unwrapped form" },
                },
                "required": ["scriptId", "path", "searchText", "replaceText"],
                "additionalProperties": false,
            }),
        ),
        McpToolDef::new(
            "aider",
            "Fuzzy search-and-replace batch, tolerant of minor drift between remembered and actual file text. Edits whose matched regions overlap are rejected.",
            json!({
                "type": "object",
                "properties": {
                    "scriptId": { "type": "string" },
                    "edits": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": { "type": "string" },
                                "searchText": { "type": "string" },
                                "replaceText": { "type": "string" },
                                "similarityThreshold": { "type": "number" },
                            },
                            "required": ["path", "searchText", "replaceText"],
                            "additionalProperties": false,
                        },
                    },
                    "dryRun": { "type": "boolean" },
                },
                "required": ["scriptId", "edits"],
                "additionalProperties": false,
            }),
        ),
        McpToolDef::new(
            "cp",
            "Copy a file within a project's mirror. Fails if the destination already exists.",
            json!({
                "type": "object",
                "properties": {
                    "scriptId": { "type": "string" },
                    "from": { "type": "string" },
                    "to": { "type": "string" },
                    "changeReason": { "type": "string" },
                },
                "required": ["scriptId", "from", "to"],
                "additionalProperties": false,
            }),
        ),
        McpToolDef::new(
            "mv",
            "Move (rename) a file within a project's mirror.",
            json!({
                "type": "object",
                "properties": {
                    "scriptId": { "type": "string" },
                    "from": { "type": "string" },
                    "to": { "type": "string" },
                    "changeReason": { "type": "string" },
                },
                "required": ["scriptId", "from", "to"],
                "additionalProperties": false,
            }),
        ),
        McpToolDef::new(
            "rm",
            "Delete a file from a project's mirror and remote copy.",
            json!({
                "type": "object",
                "properties": {
                    "scriptId": { "type": "string" },
                    "path": { "type": "string" },
                    "changeReason": { "type": "string" },
                },
                "required": ["scriptId", "path"],
                "additionalProperties": false,
            }),
        ),
        McpToolDef::new(
            "ls",
            "List a project's files with metadata. Optionally includes multi-algorithm checksums.",
            json!({
                "type": "object",
                "properties": {
                    "scriptId": { "type": "string" },
                    "path": { "type": "string" },
                    "checksums": { "type": "boolean" },
                },
                "required": ["scriptId"],
                "additionalProperties": false,
            }),
        ),
        McpToolDef::new(
            "file_status",
            "Report update times and optional checksums for a set of paths, for detecting drift between the mirror and remote.",
            json!({
                "type": "object",
                "properties": {
                    "scriptId": { "type": "string" },
                    "paths": { "type": "array", "items": { "type": "string" } },
                    "hashTypes": {
                        "type": "array",
                        "items": { "type": "string", "enum": ["git-sha1", "sha256", "md5"] },
                    },
                },
                "required": ["scriptId", "paths"],
                "additionalProperties": false,
            }),
        ),
        McpToolDef::new(
            "rsync",
            "Diff and optionally apply changes between the local mirror and the remote project, in either direction.",
            json!({
                "type": "object",
                "properties": {
                    "scriptId": { "type": "string" },
                    "direction": { "type": "string", "enum": ["pull", "push"] },
                    "dryRun": { "type": "boolean" },
                    "confirmDeletions": { "type": "boolean" },
                    "includeGlobs": { "type": "array", "items": { "type": "string" } },
                    "excludeGlobs": { "type": "array", "items": { "type": "string" } },
                },
                "required": ["scriptId", "direction"],
                "additionalProperties": false,
            }),
        ),
        McpToolDef::new(
            "exec",
            "Execute a single JS statement inside the project's runtime via the exec-bootstrap shim and return its result plus captured Logger output.",
            json!({
                "type": "object",
                "properties": {
                    "scriptId": { "type": "string" },
                    "jsStatement": { "type": "string" },
                },
                "required": ["scriptId", "jsStatement"],
                "additionalProperties": false,
            }),
        ),
        McpToolDef::new(
            "deploy",
            "Inspect or change a project's dev/staging/prod deployment state.",
            json!({
                "type": "object",
                "properties": {
                    "scriptId": { "type": "string" },
                    "operation": { "type": "string", "enum": ["promote", "rollback", "status", "reset"] },
                    "environment": { "type": "string", "enum": ["staging", "prod"] },
                    "description": { "type": "string" },
                    "toVersion": { "type": "integer" },
                },
                "required": ["scriptId", "operation"],
                "additionalProperties": false,
            }),
        ),
    ]
}

pub fn handle_tools_list() -> Value {
    json!({ "tools": gasmcp_tools() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_has_unique_names() {
        let tools = gasmcp_tools();
        let mut names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), tools.len());
    }

    #[test]
    fn every_tool_requires_script_id() {
        for tool in gasmcp_tools() {
            let required = tool.input_schema["required"].as_array().unwrap();
            assert!(
                required.iter().any(|v| v == "scriptId"),
                "{} is missing scriptId",
                tool.name
            );
        }
    }

    #[test]
    fn handle_tools_list_wraps_in_tools_key() {
        let v = handle_tools_list();
        assert!(v["tools"].is_array());
    }
}
