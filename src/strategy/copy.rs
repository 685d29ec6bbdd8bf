//! Copy strategy — duplicate an existing file's content under a new name,
//! leaving the source untouched.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::errors::CoreError;

use super::{FileChange, FileOperationStrategy, StrategyContext};

pub struct CopyStrategy {
    src: String,
    dest: String,
}

impl CopyStrategy {
    pub fn new(src: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
        }
    }
}

#[async_trait]
impl FileOperationStrategy for CopyStrategy {
    fn name(&self) -> &'static str {
        "copy"
    }

    async fn compute_changes(&self, ctx: &StrategyContext<'_>) -> Result<Vec<FileChange>> {
        if !ctx.mirror.exists(&self.src).await {
            return Err(anyhow!(CoreError::NotFound(format!("'{}' does not exist", self.src))));
        }
        if ctx.mirror.exists(&self.dest).await {
            return Err(anyhow!(CoreError::Conflict(format!(
                "'{}' already exists",
                self.dest
            ))));
        }
        let content = ctx.mirror.read(&self.src).await?;
        Ok(vec![FileChange::write(self.dest.clone(), content)])
    }

    fn describe(&self) -> String {
        format!("copy {} -> {}", self.src, self.dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_mirror::LocalMirror;

    #[tokio::test]
    async fn copies_content_without_touching_source() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        mirror.write("A.js", b"content").await.unwrap();
        let ctx = StrategyContext {
            mirror: &mirror,
            similarity_threshold: 0.8,
        };
        let strategy = CopyStrategy::new("A.js", "B.js");
        let changes = strategy.compute_changes(&ctx).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].rel_path, "B.js");
        assert_eq!(changes[0].new_content.as_deref(), Some(&b"content"[..]));
    }

    #[tokio::test]
    async fn rejects_overwriting_an_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        mirror.write("A.js", b"1").await.unwrap();
        mirror.write("B.js", b"2").await.unwrap();
        let ctx = StrategyContext {
            mirror: &mirror,
            similarity_threshold: 0.8,
        };
        let strategy = CopyStrategy::new("A.js", "B.js");
        assert!(strategy.compute_changes(&ctx).await.is_err());
    }
}
