//! Aider strategy — fuzzy search-and-replace tolerant of minor drift
//! between the snippet an LLM remembers and the file's actual current
//! text. Unlike [`super::edit::EditStrategy`], the search text need not
//! match exactly: candidate windows are scored with normalized Levenshtein
//! similarity and the best-scoring one above `similarity_threshold` wins.
//!
//! Multiple edits in a single call are computed independently and then
//! checked against each other — edits whose matched regions overlap are
//! rejected outright rather than applied in an unspecified order.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use strsim::normalized_levenshtein;

use crate::errors::CoreError;

use super::{FileChange, FileOperationStrategy, StrategyContext};

#[derive(Debug, Clone)]
pub struct AiderEdit {
    pub search: String,
    pub replace: String,
}

pub struct AiderStrategy {
    rel_path: String,
    edits: Vec<AiderEdit>,
}

impl AiderStrategy {
    pub fn new(rel_path: impl Into<String>, edits: Vec<AiderEdit>) -> Self {
        Self {
            rel_path: rel_path.into(),
            edits,
        }
    }
}

/// A fuzzy match's location, as a byte range into the original content.
struct MatchSpan {
    start: usize,
    end: usize,
    score: f64,
}

/// Normalizes a snippet before similarity scoring (spec §4.H Aider):
/// normalizes line endings, trims each line's leading whitespace, and
/// collapses runs of whitespace to a single space. This is a known source
/// of false positives (spec §9 open question) — it does not preserve
/// relative indentation — but it's what the spec asks for.
fn normalize_for_match(s: &str) -> String {
    s.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(|line| {
            let mut out = String::with_capacity(line.len());
            let mut prev_ws = false;
            for c in line.trim_start().chars() {
                if c.is_whitespace() {
                    if !prev_ws {
                        out.push(' ');
                    }
                    prev_ws = true;
                } else {
                    out.push(c);
                    prev_ws = false;
                }
            }
            out.trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Find the best-scoring contiguous run of lines in `content` against
/// `search`, using a sliding window the same number of lines long as
/// `search`. Returns `None` if `content` has fewer lines than `search`.
fn best_match(content: &str, search: &str) -> Option<MatchSpan> {
    let search_line_count = search.lines().count().max(1);
    let normalized_search = normalize_for_match(search);

    // Byte offset where each line starts, plus one past the end so windows
    // can be sliced as `content[line_starts[i]..line_starts[i+n]]`.
    let mut line_starts = vec![0usize];
    for (i, _) in content.match_indices('\n') {
        line_starts.push(i + 1);
    }
    line_starts.push(content.len() + 1); // sentinel, trimmed below

    let total_lines = line_starts.len() - 1;
    if total_lines < search_line_count {
        return None;
    }

    let mut best: Option<MatchSpan> = None;
    for start_line in 0..=(total_lines - search_line_count) {
        let start = line_starts[start_line];
        let end_line = start_line + search_line_count;
        let end = (line_starts[end_line]).min(content.len());
        if start > end {
            continue;
        }
        let window = &content[start..end];
        let normalized_window = normalize_for_match(window.trim_end_matches('\n'));
        let score = normalized_levenshtein(&normalized_window, &normalized_search);
        if best.as_ref().map(|b| score > b.score).unwrap_or(true) {
            best = Some(MatchSpan { start, end, score });
        }
    }
    best
}

fn ranges_overlap(a: &(usize, usize), b: &(usize, usize)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

#[async_trait]
impl FileOperationStrategy for AiderStrategy {
    fn name(&self) -> &'static str {
        "aider"
    }

    async fn compute_changes(&self, ctx: &StrategyContext<'_>) -> Result<Vec<FileChange>> {
        if !ctx.mirror.exists(&self.rel_path).await {
            return Err(anyhow!(CoreError::NotFound(format!(
                "'{}' does not exist",
                self.rel_path
            ))));
        }
        if self.edits.is_empty() {
            return Err(anyhow!(CoreError::Validation("no edits given".to_string())));
        }

        let content = ctx.mirror.read_to_string(&self.rel_path).await?;

        let mut matches: Vec<(MatchSpan, &AiderEdit)> = Vec::with_capacity(self.edits.len());
        for edit in &self.edits {
            let m = best_match(&content, &edit.search).ok_or_else(|| {
                anyhow!(CoreError::Conflict(format!(
                    "'{}' has fewer lines than the search text for one edit",
                    self.rel_path
                )))
            })?;
            if m.score < ctx.similarity_threshold {
                return Err(anyhow!(CoreError::Conflict(format!(
                    "no sufficiently similar match for an edit in '{}' (best score {:.2}, need >= {:.2})",
                    self.rel_path, m.score, ctx.similarity_threshold
                ))));
            }
            matches.push((m, edit));
        }

        for i in 0..matches.len() {
            for j in (i + 1)..matches.len() {
                if ranges_overlap(&(matches[i].0.start, matches[i].0.end), &(matches[j].0.start, matches[j].0.end)) {
                    return Err(anyhow!(CoreError::Conflict(format!(
                        "two edits in '{}' match overlapping regions of the file",
                        self.rel_path
                    ))));
                }
            }
        }

        // Apply from the end of the file backward so earlier offsets stay
        // valid as later (in file order) replacements shrink or grow the
        // content.
        matches.sort_by(|a, b| b.0.start.cmp(&a.0.start));
        let mut new_content = content;
        for (span, edit) in &matches {
            new_content.replace_range(span.start..span.end, &edit.replace);
        }

        Ok(vec![FileChange::write(self.rel_path.clone(), new_content.into_bytes())])
    }

    fn describe(&self) -> String {
        format!("aider-edit {} ({} hunk(s))", self.rel_path, self.edits.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_mirror::LocalMirror;

    async fn ctx_with(mirror: &LocalMirror) -> StrategyContext<'_> {
        StrategyContext {
            mirror,
            similarity_threshold: 0.8,
        }
    }

    #[tokio::test]
    async fn tolerates_minor_whitespace_drift() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        mirror
            .write("A.js", b"function add(a, b) {\n  return a + b;\n}\n")
            .await
            .unwrap();
        let ctx = ctx_with(&mirror).await;
        let strategy = AiderStrategy::new(
            "A.js",
            vec![AiderEdit {
                search: "function add(a, b) {\n return a+b;\n}".to_string(),
                replace: "function add(a, b) {\n  return a + b + 1;\n}".to_string(),
            }],
        );
        let changes = strategy.compute_changes(&ctx).await.unwrap();
        let content = String::from_utf8(changes[0].new_content.clone().unwrap()).unwrap();
        assert!(content.contains("a + b + 1"));
    }

    #[tokio::test]
    async fn s3_overlapping_edits_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        mirror
            .write("A.js", b"function f() {\n  return 1;\n}\n")
            .await
            .unwrap();
        let ctx = ctx_with(&mirror).await;
        let strategy = AiderStrategy::new(
            "A.js",
            vec![
                AiderEdit {
                    search: "function f() {\n  return 1;\n}".to_string(),
                    replace: "function f() {\n  return 2;\n}".to_string(),
                },
                AiderEdit {
                    search: "  return 1;\n}".to_string(),
                    replace: "  return 3;\n}".to_string(),
                },
            ],
        );
        let result = strategy.compute_changes(&ctx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dissimilar_search_text_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        mirror.write("A.js", b"var x = 1;\n").await.unwrap();
        let ctx = ctx_with(&mirror).await;
        let strategy = AiderStrategy::new(
            "A.js",
            vec![AiderEdit {
                search: "completely unrelated text that matches nothing here".to_string(),
                replace: "y".to_string(),
            }],
        );
        assert!(strategy.compute_changes(&ctx).await.is_err());
    }
}
