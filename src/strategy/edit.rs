//! Edit strategy — exact literal search-and-replace within one file. Unlike
//! [`super::aider::AiderStrategy`], requires a byte-exact match; ambiguity
//! (zero or multiple matches without `replace_all`) is a validation error,
//! not a best guess.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::errors::CoreError;

use super::{FileChange, FileOperationStrategy, StrategyContext};

pub struct EditStrategy {
    rel_path: String,
    find: String,
    replace: String,
    replace_all: bool,
}

impl EditStrategy {
    pub fn new(rel_path: impl Into<String>, find: impl Into<String>, replace: impl Into<String>, replace_all: bool) -> Self {
        Self {
            rel_path: rel_path.into(),
            find: find.into(),
            replace: replace.into(),
            replace_all,
        }
    }
}

#[async_trait]
impl FileOperationStrategy for EditStrategy {
    fn name(&self) -> &'static str {
        "edit"
    }

    async fn compute_changes(&self, ctx: &StrategyContext<'_>) -> Result<Vec<FileChange>> {
        if !ctx.mirror.exists(&self.rel_path).await {
            return Err(anyhow!(CoreError::NotFound(format!(
                "'{}' does not exist",
                self.rel_path
            ))));
        }
        let content = ctx.mirror.read_to_string(&self.rel_path).await?;
        let match_count = content.matches(self.find.as_str()).count();

        if match_count == 0 {
            return Err(anyhow!(CoreError::Validation(format!(
                "search text not found in '{}'",
                self.rel_path
            ))));
        }
        if match_count > 1 && !self.replace_all {
            return Err(anyhow!(CoreError::Validation(format!(
                "search text matches {match_count} locations in '{}' — pass replace_all or narrow the search text",
                self.rel_path
            ))));
        }

        let new_content = if self.replace_all {
            content.replace(self.find.as_str(), &self.replace)
        } else {
            content.replacen(self.find.as_str(), &self.replace, 1)
        };

        Ok(vec![FileChange::write(self.rel_path.clone(), new_content.into_bytes())])
    }

    fn describe(&self) -> String {
        format!("edit {}", self.rel_path)
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
    async fn replaces_single_unambiguous_match() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        mirror.write("A.js", b"var x = 1;").await.unwrap();
        let ctx = ctx_with(&mirror).await;
        let strategy = EditStrategy::new("A.js", "x = 1", "x = 2", false);
        let changes = strategy.compute_changes(&ctx).await.unwrap();
        assert_eq!(
            changes[0].new_content.as_deref(),
            Some(&b"var x = 2;"[..])
        );
    }

    #[tokio::test]
    async fn ambiguous_match_without_replace_all_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        mirror.write("A.js", b"foo(); foo();").await.unwrap();
        let ctx = ctx_with(&mirror).await;
        let strategy = EditStrategy::new("A.js", "foo()", "bar()", false);
        assert!(strategy.compute_changes(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn replace_all_handles_multiple_matches() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        mirror.write("A.js", b"foo(); foo();").await.unwrap();
        let ctx = ctx_with(&mirror).await;
        let strategy = EditStrategy::new("A.js", "foo()", "bar()", true);
        let changes = strategy.compute_changes(&ctx).await.unwrap();
        assert_eq!(
            changes[0].new_content.as_deref(),
            Some(&b"bar(); bar();"[..])
        );
    }

    #[tokio::test]
    async fn no_match_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        mirror.write("A.js", b"var x = 1;").await.unwrap();
        let ctx = ctx_with(&mirror).await;
        let strategy = EditStrategy::new("A.js", "nope", "x", false);
        assert!(strategy.compute_changes(&ctx).await.is_err());
    }
}
