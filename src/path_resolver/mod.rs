//! PathResolver (spec §4.A) — pure, total, deterministic translation between
//! GAS logical names and local filesystem paths. Holds no state; every
//! function here is a plain associated function.

use crate::errors::CoreError;
use once_cell::sync::Lazy;
use regex::Regex;

/// A GAS file's storage type (spec §3 `GasFile`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GasFileType {
    ServerJs,
    Html,
    Json,
}

impl GasFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GasFileType::ServerJs => "SERVER_JS",
            GasFileType::Html => "HTML",
            GasFileType::Json => "JSON",
        }
    }
}

/// Names with a fixed local/GAS mapping regardless of type inference (spec
/// §3 `PathMapping`).
const README_GAS_NAME: &str = "README";
const README_LOCAL_NAME: &str = "README.md";
const APPSSCRIPT_GAS_NAME: &str = "appsscript";
const APPSSCRIPT_LOCAL_NAME: &str = "appsscript.json";

static VALID_NAME_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._/-]+$").unwrap());

/// Maximum legal path length (spec §4.A `validate`).
const MAX_PATH_LEN: usize = 255;

pub struct PathResolver;

impl PathResolver {
    /// GAS logical name + type → local relative path.
    pub fn gas_to_local(name: &str, file_type: GasFileType) -> Result<String, CoreError> {
        Self::validate(name)?;

        if name == APPSSCRIPT_GAS_NAME && file_type == GasFileType::Json {
            return Ok(APPSSCRIPT_LOCAL_NAME.to_string());
        }
        if name == README_GAS_NAME && file_type == GasFileType::Html {
            return Ok(README_LOCAL_NAME.to_string());
        }

        let local = match file_type {
            GasFileType::ServerJs => format!("{name}.js"),
            GasFileType::Html => format!("{name}.html"),
            GasFileType::Json => format!("{name}.json"),
        };
        Ok(local)
    }

    /// Local relative path → GAS logical name + type. Inverse of
    /// `gas_to_local`.
    pub fn local_to_gas(rel_path: &str) -> Result<(String, GasFileType), CoreError> {
        Self::validate(rel_path)?;

        if rel_path == APPSSCRIPT_LOCAL_NAME {
            return Ok((APPSSCRIPT_GAS_NAME.to_string(), GasFileType::Json));
        }
        if rel_path == README_LOCAL_NAME {
            return Ok((README_GAS_NAME.to_string(), GasFileType::Html));
        }

        if let Some(stem) = rel_path.strip_suffix(".js") {
            return Ok((stem.to_string(), GasFileType::ServerJs));
        }
        if let Some(stem) = rel_path.strip_suffix(".html") {
            return Ok((stem.to_string(), GasFileType::Html));
        }
        if let Some(stem) = rel_path.strip_suffix(".json") {
            return Ok((stem.to_string(), GasFileType::Json));
        }

        // Dotfiles (e.g. `.gitignore`) round-trip with no suffix change and
        // are treated as SERVER_JS-adjacent plain text; GAS has no native
        // "dotfile" type so the canonical scheme stores them verbatim as
        // their local name with SERVER_JS semantics never applied to them —
        // callers that need a type for these should use `infer_type`.
        Err(CoreError::Validation(format!(
            "cannot infer GAS type for local path '{rel_path}' — no recognized extension"
        )))
    }

    /// Infer a file's GAS type from its name and, optionally, its content.
    /// Order: known-name overrides, explicit extension, content signature.
    pub fn infer_type(name: &str, content: Option<&str>) -> GasFileType {
        if name == APPSSCRIPT_GAS_NAME || name == APPSSCRIPT_LOCAL_NAME {
            return GasFileType::Json;
        }
        if name == README_GAS_NAME || name == README_LOCAL_NAME {
            return GasFileType::Html;
        }
        if name.ends_with(".html") {
            return GasFileType::Html;
        }
        if name.ends_with(".json") {
            return GasFileType::Json;
        }
        if name.ends_with(".js") {
            return GasFileType::ServerJs;
        }

        if let Some(c) = content {
            let trimmed = c.trim_start();
            if trimmed.starts_with("<?") || trimmed.to_ascii_lowercase().starts_with("<!doctype") {
                return GasFileType::Html;
            }
            if serde_json::from_str::<serde_json::Value>(c).is_ok() {
                return GasFileType::Json;
            }
        }

        GasFileType::ServerJs
    }

    /// Reject `..`, absolute paths, embedded NULs, length > 255, and any
    /// character outside GAS's accepted set.
    pub fn validate(rel_path: &str) -> Result<(), CoreError> {
        if rel_path.is_empty() {
            return Err(CoreError::Validation("path must not be empty".to_string()));
        }
        if rel_path.len() > MAX_PATH_LEN {
            return Err(CoreError::Validation(format!(
                "path exceeds {MAX_PATH_LEN} characters: '{rel_path}'"
            )));
        }
        if rel_path.contains('\0') {
            return Err(CoreError::Validation("path contains a NUL byte".to_string()));
        }
        if rel_path.starts_with('/') || rel_path.starts_with('\\') {
            return Err(CoreError::Validation(format!(
                "path must be relative: '{rel_path}'"
            )));
        }
        if rel_path.split(['/', '\\']).any(|seg| seg == "..") {
            return Err(CoreError::Validation(format!(
                "path must not contain '..': '{rel_path}'"
            )));
        }
        if !VALID_NAME_CHARS.is_match(rel_path) {
            return Err(CoreError::Validation(format!(
                "path contains characters outside GAS's accepted set: '{rel_path}'"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_js_round_trip() {
        let local = PathResolver::gas_to_local("Foo/Bar", GasFileType::ServerJs).unwrap();
        assert_eq!(local, "Foo/Bar.js");
        let (name, ty) = PathResolver::local_to_gas(&local).unwrap();
        assert_eq!(name, "Foo/Bar");
        assert_eq!(ty, GasFileType::ServerJs);
    }

    #[test]
    fn html_round_trip() {
        let local = PathResolver::gas_to_local("Page", GasFileType::Html).unwrap();
        assert_eq!(local, "Page.html");
        let (name, ty) = PathResolver::local_to_gas(&local).unwrap();
        assert_eq!(name, "Page");
        assert_eq!(ty, GasFileType::Html);
    }

    #[test]
    fn appsscript_round_trip() {
        let local = PathResolver::gas_to_local("appsscript", GasFileType::Json).unwrap();
        assert_eq!(local, "appsscript.json");
        let (name, ty) = PathResolver::local_to_gas("appsscript.json").unwrap();
        assert_eq!(name, "appsscript");
        assert_eq!(ty, GasFileType::Json);
    }

    #[test]
    fn readme_round_trip_is_lossless() {
        let local = PathResolver::gas_to_local("README", GasFileType::Html).unwrap();
        assert_eq!(local, "README.md");
        let (name, ty) = PathResolver::local_to_gas("README.md").unwrap();
        assert_eq!(name, "README");
        assert_eq!(ty, GasFileType::Html);
    }

    #[test]
    fn rejects_parent_traversal() {
        assert!(PathResolver::validate("../etc/passwd").is_err());
        assert!(PathResolver::validate("a/../../b").is_err());
    }

    #[test]
    fn rejects_absolute_paths() {
        assert!(PathResolver::validate("/etc/passwd").is_err());
    }

    #[test]
    fn rejects_nul_byte() {
        assert!(PathResolver::validate("foo\0bar").is_err());
    }

    #[test]
    fn rejects_overlong_path() {
        let long = "a".repeat(300);
        assert!(PathResolver::validate(&long).is_err());
    }

    #[test]
    fn infer_type_by_content_signature() {
        assert_eq!(
            PathResolver::infer_type("Unknown", Some("<!DOCTYPE html><html></html>")),
            GasFileType::Html
        );
        assert_eq!(
            PathResolver::infer_type("Unknown", Some("{\"a\": 1}")),
            GasFileType::Json
        );
        assert_eq!(
            PathResolver::infer_type("Unknown", Some("function f() {}")),
            GasFileType::ServerJs
        );
    }

    #[test]
    fn infer_type_by_known_name_override() {
        assert_eq!(PathResolver::infer_type("appsscript", None), GasFileType::Json);
        assert_eq!(PathResolver::infer_type("README", None), GasFileType::Html);
    }

    proptest::proptest! {
        #[test]
        fn round_trip_holds_for_arbitrary_segment_names(
            segment in "[A-Za-z][A-Za-z0-9_]{0,20}"
        ) {
            for ty in [GasFileType::ServerJs, GasFileType::Html, GasFileType::Json] {
                // Avoid colliding with the fixed-mapping names under this type.
                if (segment == "appsscript" && ty == GasFileType::Json)
                    || (segment == "README" && ty == GasFileType::Html)
                {
                    continue;
                }
                let local = PathResolver::gas_to_local(&segment, ty).unwrap();
                let (name, got_ty) = PathResolver::local_to_gas(&local).unwrap();
                prop_assert_eq!(&name, &segment);
                prop_assert_eq!(got_ty, ty);
            }
        }
    }
}
