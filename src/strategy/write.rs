//! Write strategy — unconditional full-content overwrite, the simplest
//! `FileOperationStrategy` (spec §4.H strategy table).

use anyhow::Result;
use async_trait::async_trait;

use super::{FileChange, FileOperationStrategy, StrategyContext};

pub struct WriteStrategy {
    rel_path: String,
    content: Vec<u8>,
}

impl WriteStrategy {
    pub fn new(rel_path: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            rel_path: rel_path.into(),
            content,
        }
    }
}

#[async_trait]
impl FileOperationStrategy for WriteStrategy {
    fn name(&self) -> &'static str {
        "write"
    }

    async fn compute_changes(&self, _ctx: &StrategyContext<'_>) -> Result<Vec<FileChange>> {
        Ok(vec![FileChange::write(self.rel_path.clone(), self.content.clone())])
    }

    fn describe(&self) -> String {
        format!("overwrite {}", self.rel_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_mirror::LocalMirror;

    #[tokio::test]
    async fn produces_a_single_write_change() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().to_path_buf());
        let ctx = StrategyContext {
            mirror: &mirror,
            similarity_threshold: 0.8,
        };
        let strategy = WriteStrategy::new("Code.js", b"var x = 1;".to_vec());
        let changes = strategy.compute_changes(&ctx).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new_content.as_deref(), Some(&b"var x = 1;"[..]));
    }
}
