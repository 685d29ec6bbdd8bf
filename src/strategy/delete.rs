//! Delete strategy — removes one existing file.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::errors::CoreError;

use super::{FileChange, FileOperationStrategy, StrategyContext};

pub struct DeleteStrategy {
    rel_path: String,
}

impl DeleteStrategy {
    pub fn new(rel_path: impl Into<String>) -> Self {
        Self {
            rel_path: rel_path.into(),
        }
    }
}

#[async_trait]
impl FileOperationStrategy for DeleteStrategy {
    fn name(&self) -> &'static str {
        "delete"
    }

    async fn compute_changes(&self, ctx: &StrategyContext<'_>) -> Result<Vec<FileChange>> {
        if !ctx.mirror.exists(&self.rel_path).await {
            return Err(anyhow!(CoreError::NotFound(format!(
                "'{}' does not exist",
                self.rel_path
            ))));
        }
        Ok(vec![FileChange::delete(self.rel_path.clone())])
    }

    fn describe(&self) -> String {
        format!("delete {}", self.rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_mirror::LocalMirror;

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        let ctx = StrategyContext {
            mirror: &mirror,
            similarity_threshold: 0.8,
        };
        let strategy = DeleteStrategy::new("Missing.js");
        assert!(strategy.compute_changes(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn existing_file_produces_a_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        mirror.write("Code.js", b"x").await.unwrap();
        let ctx = StrategyContext {
            mirror: &mirror,
            similarity_threshold: 0.8,
        };
        let strategy = DeleteStrategy::new("Code.js");
        let changes = strategy.compute_changes(&ctx).await.unwrap();
        assert_eq!(changes[0].new_content, None);
    }
}
