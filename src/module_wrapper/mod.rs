//! ModuleWrapper (spec §4.C) — host-side transformer between a user's plain
//! SERVER_JS source and the CommonJS shim's `_main(module, exports,
//! require)` envelope. Pure: two total functions over strings, no I/O.

pub mod readme;

use serde::{Deserialize, Serialize};

/// One hoisted top-level stub (spec §3 `ModuleOptions.hoistedFunctions`),
/// needed to give a GAS Sheets custom function (`=MYFN(...)`) visibility —
/// GAS only treats genuinely top-level functions as custom functions, and
/// user code lives inside `_main` after wrapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoistedFunction {
    pub name: String,
    pub params: Vec<String>,
    pub jsdoc: Option<String>,
}

/// Per-file metadata that survives across read/edit/write cycles (spec §3
/// `ModuleOptions`). `None` fields mean "omit on write = preserve existing"
/// — the write path is responsible for read-before-write when a caller
/// doesn't supply an explicit override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleOptions {
    /// `true` = eager (`_main` runs at script startup); `false`/`None` =
    /// lazy (runs on first `require`).
    pub load_now: Option<bool>,
    pub hoisted_functions: Vec<HoistedFunction>,
    /// The module's own registered name, used both as `__defineModule__`'s
    /// explicit name and to address it from hoisted stubs. Not itself part
    /// of spec §3's `ModuleOptions` fields, but required here because
    /// `ModuleWrapper` has no other way to know a file's GAS logical name.
    pub explicit_name: Option<String>,
}

const HEADER: &str =
    "function _main(module = globalThis.__getCurrentModule(), exports = module.exports, require = globalThis.require) {\n";
const FOOTER_MARKER: &str = "\n}\n__defineModule__(_main";
const FOOTER_TAIL: &str = ");\n";

fn render_hoisted_stub(hf: &HoistedFunction, module_name: &str) -> String {
    let mut out = String::new();
    if let Some(doc) = &hf.jsdoc {
        out.push_str("/**\n");
        for line in doc.lines() {
            out.push_str(" * ");
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(" */\n");
    }
    out.push_str(&format!("function {}({}) {{\n", hf.name, hf.params.join(", ")));
    out.push_str(&format!(
        "  return require('{}').{}.apply(null, arguments);\n",
        module_name, hf.name
    ));
    out.push_str("}\n");
    out
}

fn load_now_sentinel(load_now: bool) -> String {
    format!("// @mcp-loadNow: {load_now}\n")
}

pub struct ModuleWrapper;

impl ModuleWrapper {
    /// Wrap plain user SERVER_JS source into the shim's envelope.
    pub fn wrap(user_source: &str, opts: &ModuleOptions) -> String {
        let mut out = String::new();

        if let Some(load_now) = opts.load_now {
            out.push_str(&load_now_sentinel(load_now));
        }

        let module_name = opts.explicit_name.as_deref().unwrap_or("<module>");
        for hf in &opts.hoisted_functions {
            out.push_str(&render_hoisted_stub(hf, module_name));
            out.push('\n');
        }

        out.push_str(HEADER);
        out.push_str(user_source);
        out.push_str(FOOTER_MARKER);
        // `__defineModule__`'s `explicitName` is how a module is addressed
        // by `require(name)`; GAS gives the shim no reliable way to infer
        // "which file is this" on its own, so the host always supplies it
        // here when known (spec §4.B `inferFromCurrentFile()` is, in
        // practice, this call site).
        if let Some(name) = &opts.explicit_name {
            out.push_str(", ");
            out.push_str(&serde_json::to_string(name).expect("string always serializes"));
        }
        out.push_str(FOOTER_TAIL);
        out
    }

    /// Unwrap a wrapped source back to the user's plain body. Returns the
    /// input unchanged if it was not produced by `wrap` (e.g. a
    /// user-authored file with no envelope, or a system file like the shim
    /// itself).
    pub fn unwrap(wrapped: &str) -> String {
        match Self::split_envelope(wrapped) {
            Some((_, body, _, _)) => body.to_string(),
            None => wrapped.to_string(),
        }
    }

    /// `true` if `content` matches the exact envelope `wrap` produces.
    pub fn is_wrapped(content: &str) -> bool {
        Self::split_envelope(content).is_some()
    }

    /// Recover the `ModuleOptions` a wrapped source was produced with, by
    /// parsing the sentinel comment and hoisted stubs in its preamble. Used
    /// by the write path to preserve options across an edit that only has
    /// the unwrapped body in hand (spec §4.C "Preservation across edits").
    pub fn extract_options(wrapped: &str) -> ModuleOptions {
        let (preamble, explicit_name) = match Self::split_envelope(wrapped) {
            Some((preamble, _, _, name)) => (preamble, name),
            None => return ModuleOptions::default(),
        };

        let mut opts = ModuleOptions::default();
        opts.explicit_name = explicit_name;
        for line in preamble.lines() {
            if let Some(rest) = line.strip_prefix("// @mcp-loadNow: ") {
                opts.load_now = rest.trim().parse::<bool>().ok();
            }
        }

        static STUB_RE: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
            regex::Regex::new(r"(?m)^function (\w+)\(([^)]*)\) \{\n  return require\('([^']*)'\)").unwrap()
        });
        for caps in STUB_RE.captures_iter(preamble) {
            let name = caps[1].to_string();
            let params: Vec<String> = caps[2]
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            if opts.explicit_name.is_none() {
                opts.explicit_name = Some(caps[3].to_string());
            }
            opts.hoisted_functions.push(HoistedFunction {
                name,
                params,
                jsdoc: None,
            });
        }

        opts
    }

    /// If `content` is a `wrap`-produced envelope, returns
    /// `(preamble, body, explicit_trailing, explicit_name)` — the text
    /// before `HEADER`, the inner body, whatever (normally empty) text
    /// follows the `__defineModule__` call, and the name it was registered
    /// under, if any.
    fn split_envelope(content: &str) -> Option<(&str, &str, &str, Option<String>)> {
        let header_pos = content.find(HEADER)?;
        let body_start = header_pos + HEADER.len();
        let marker_rel = content[body_start..].rfind(FOOTER_MARKER)?;
        let body_end = body_start + marker_rel;
        let after_marker = body_end + FOOTER_MARKER.len();
        let rest = &content[after_marker..];

        let (name, after_call) = if let Some(r) = rest.strip_prefix(FOOTER_TAIL) {
            (None, r)
        } else if let Some(r) = rest.strip_prefix(", ") {
            let close = r.find(FOOTER_TAIL)?;
            let name: String = serde_json::from_str(&r[..close]).ok()?;
            (Some(name), &r[close + FOOTER_TAIL.len()..])
        } else {
            return None;
        };

        Some((&content[..header_pos], &content[body_start..body_end], after_call, name))
    }
}
