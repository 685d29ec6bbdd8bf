//! README.md ↔ README (HTML) transform (spec §3 `PathMapping`, §6 "virtual
//! file translation rules").
//!
//! The transform is the identity function on bytes: GAS has no Markdown
//! file type, so a project's `README.md` is stored remotely as a file named
//! `README` tagged `HTML` but containing the same Markdown text unmodified.
//! The "lossy-looking but reversible" framing in the spec refers to the
//! *type tag* (HTML) looking wrong for Markdown content, not to any byte
//! transformation — there isn't one.

pub fn local_to_remote(markdown: &str) -> String {
    markdown.to_string()
}

pub fn remote_to_local(html_tagged_source: &str) -> String {
    html_tagged_source.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_identity() {
        let md = "# Title\n\nSome *text*.\n";
        assert_eq!(remote_to_local(&local_to_remote(md)), md);
    }
}
