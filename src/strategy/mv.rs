//! Move strategy — rename a file: write the destination, delete the source,
//! as a single atomic-looking multi-file change set.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::errors::CoreError;

use super::{FileChange, FileOperationStrategy, StrategyContext};

pub struct MoveStrategy {
    src: String,
    dest: String,
}

impl MoveStrategy {
    pub fn new(src: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
        }
    }
}

#[async_trait]
impl FileOperationStrategy for MoveStrategy {
    fn name(&self) -> &'static str {
        "move"
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
        Ok(vec![
            FileChange::write(self.dest.clone(), content),
            FileChange::delete(self.src.clone()),
        ])
    }

    fn describe(&self) -> String {
        format!("move {} -> {}", self.src, self.dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_mirror::LocalMirror;

    #[tokio::test]
    async fn produces_write_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        mirror.write("A.js", b"content").await.unwrap();
        let ctx = StrategyContext {
            mirror: &mirror,
            similarity_threshold: 0.8,
        };
        let strategy = MoveStrategy::new("A.js", "B.js");
        let changes = strategy.compute_changes(&ctx).await.unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].rel_path, "B.js");
        assert_eq!(changes[1].rel_path, "A.js");
        assert_eq!(changes[1].new_content, None);
    }
}
