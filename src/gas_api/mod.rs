//! GasApi (spec §4.E) — the only component allowed to speak to
//! `script.googleapis.com`. Every other component depends on the trait, not
//! on `HttpGasApi`, so tests can substitute `FakeGasApi`.
//!
//! The real Apps Script API exposes exactly two content endpoints:
//! `projects.getContent` (full file list) and `projects.updateContent`
//! (replaces the full file list). There is no granular per-file PATCH, so
//! `update_file`/`delete_file`/`reorder` are all read-modify-write over the
//! whole project from the host's side — mirrored here rather than pretended
//! away.

mod http;

pub use http::HttpGasApi;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path_resolver::GasFileType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasFile {
    pub name: String,
    pub file_type: GasFileType,
    pub source: String,
    pub update_time: DateTime<Utc>,
}

/// Result of running `__mcp_exec__` inside a project's runtime (spec §6
/// `exec`). `execution_type` names which deployment mode actually ran the
/// statement — always `"head"` today, since `exec` only ever targets the
/// project's HEAD deployment via `devMode`, but kept as a field rather than
/// a constant so a future staging/prod exec path doesn't need a schema
/// change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub logger_output: String,
    pub execution_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub deployment_id: String,
    pub version_number: Option<i64>,
    pub description: String,
    /// `true` for the always-present "HEAD" deployment, which tracks the
    /// project's latest saved content rather than a pinned version (spec
    /// §4.J "head-deployment invariant").
    pub is_head: bool,
}

#[async_trait]
pub trait GasApi: Send + Sync {
    async fn list_content(&self, script_id: &str) -> Result<Vec<GasFile>>;

    async fn get_file(&self, script_id: &str, name: &str) -> Result<Option<GasFile>> {
        Ok(self
            .list_content(script_id)
            .await?
            .into_iter()
            .find(|f| f.name == name))
    }

    /// Create or overwrite a single file, preserving every other file's
    /// content and relative order.
    async fn update_file(
        &self,
        script_id: &str,
        name: &str,
        file_type: GasFileType,
        source: &str,
    ) -> Result<GasFile>;

    async fn delete_file(&self, script_id: &str, name: &str) -> Result<()>;

    /// Replace the project's execution order. `order` must be a permutation
    /// of the project's current file names; the shim and exec-bootstrap
    /// files' required leading position (spec §4.B) is the caller's
    /// responsibility, not this layer's.
    async fn reorder(&self, script_id: &str, order: &[String]) -> Result<()>;

    async fn create_version(&self, script_id: &str, description: &str) -> Result<i64>;

    async fn create_deployment(
        &self,
        script_id: &str,
        version_number: i64,
        description: &str,
    ) -> Result<Deployment>;

    async fn update_deployment(
        &self,
        script_id: &str,
        deployment_id: &str,
        version_number: i64,
        description: &str,
    ) -> Result<Deployment>;

    async fn list_deployments(&self, script_id: &str) -> Result<Vec<Deployment>>;

    async fn find_head_deployment(&self, script_id: &str) -> Result<Option<Deployment>> {
        Ok(self
            .list_deployments(script_id)
            .await?
            .into_iter()
            .find(|d| d.is_head))
    }

    /// Runs `js_statement` inside the project's HEAD deployment via the
    /// `__mcp_exec__` bootstrap (spec §6 `exec`). Requires the project to
    /// already be deployed as an API executable — callers surface a
    /// `CoreError::Validation` otherwise.
    async fn execute(&self, script_id: &str, js_statement: &str) -> Result<ExecutionResult>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// In-memory `GasApi` used by component tests that need the full
    /// read-modify-write contract without a network call.
    pub struct FakeGasApi {
        projects: Mutex<std::collections::HashMap<String, ProjectState>>,
    }

    #[derive(Default, Clone)]
    struct ProjectState {
        files: Vec<GasFile>,
        next_version: i64,
        deployments: Vec<Deployment>,
    }

    impl FakeGasApi {
        pub fn new() -> Self {
            Self {
                projects: Mutex::new(std::collections::HashMap::new()),
            }
        }

        pub fn seed(&self, script_id: &str, files: Vec<GasFile>) {
            let mut projects = self.projects.lock().unwrap();
            let entry = projects.entry(script_id.to_string()).or_default();
            entry.files = files;
        }
    }

    impl Default for FakeGasApi {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl GasApi for FakeGasApi {
        async fn list_content(&self, script_id: &str) -> Result<Vec<GasFile>> {
            let projects = self.projects.lock().unwrap();
            Ok(projects.get(script_id).map(|p| p.files.clone()).unwrap_or_default())
        }

        async fn update_file(
            &self,
            script_id: &str,
            name: &str,
            file_type: GasFileType,
            source: &str,
        ) -> Result<GasFile> {
            let mut projects = self.projects.lock().unwrap();
            let project = projects.entry(script_id.to_string()).or_default();
            let file = GasFile {
                name: name.to_string(),
                file_type,
                source: source.to_string(),
                update_time: Utc::now(),
            };
            match project.files.iter_mut().find(|f| f.name == name) {
                Some(existing) => *existing = file.clone(),
                None => project.files.push(file.clone()),
            }
            Ok(file)
        }

        async fn delete_file(&self, script_id: &str, name: &str) -> Result<()> {
            let mut projects = self.projects.lock().unwrap();
            if let Some(project) = projects.get_mut(script_id) {
                project.files.retain(|f| f.name != name);
            }
            Ok(())
        }

        async fn reorder(&self, script_id: &str, order: &[String]) -> Result<()> {
            let mut projects = self.projects.lock().unwrap();
            let Some(project) = projects.get_mut(script_id) else {
                return Ok(());
            };
            let mut reordered = Vec::with_capacity(project.files.len());
            for name in order {
                if let Some(pos) = project.files.iter().position(|f| &f.name == name) {
                    reordered.push(project.files.remove(pos));
                }
            }
            reordered.extend(project.files.drain(..));
            project.files = reordered;
            Ok(())
        }

        async fn create_version(&self, script_id: &str, _description: &str) -> Result<i64> {
            let mut projects = self.projects.lock().unwrap();
            let project = projects.entry(script_id.to_string()).or_default();
            project.next_version += 1;
            Ok(project.next_version)
        }

        async fn create_deployment(
            &self,
            script_id: &str,
            version_number: i64,
            description: &str,
        ) -> Result<Deployment> {
            let mut projects = self.projects.lock().unwrap();
            let project = projects.entry(script_id.to_string()).or_default();
            let deployment = Deployment {
                deployment_id: uuid::Uuid::new_v4().to_string(),
                version_number: Some(version_number),
                description: description.to_string(),
                is_head: false,
            };
            project.deployments.push(deployment.clone());
            Ok(deployment)
        }

        async fn update_deployment(
            &self,
            script_id: &str,
            deployment_id: &str,
            version_number: i64,
            description: &str,
        ) -> Result<Deployment> {
            let mut projects = self.projects.lock().unwrap();
            let project = projects.entry(script_id.to_string()).or_default();
            let deployment = project
                .deployments
                .iter_mut()
                .find(|d| d.deployment_id == deployment_id)
                .ok_or_else(|| anyhow::anyhow!("unknown deployment '{deployment_id}'"))?;
            deployment.version_number = Some(version_number);
            deployment.description = description.to_string();
            Ok(deployment.clone())
        }

        async fn list_deployments(&self, script_id: &str) -> Result<Vec<Deployment>> {
            let mut projects = self.projects.lock().unwrap();
            let project = projects.entry(script_id.to_string()).or_default();
            if project.deployments.iter().all(|d| !d.is_head) {
                project.deployments.push(Deployment {
                    deployment_id: format!("head-{script_id}"),
                    version_number: None,
                    description: "HEAD".to_string(),
                    is_head: true,
                });
            }
            Ok(project.deployments.clone())
        }

        /// Doesn't actually evaluate `js_statement` — there is no JS runtime
        /// to call into here. Echoes the statement back as `result` so
        /// dispatch-layer tests can assert on the envelope shape without a
        /// network dependency.
        async fn execute(&self, script_id: &str, js_statement: &str) -> Result<ExecutionResult> {
            let projects = self.projects.lock().unwrap();
            if !projects
                .get(script_id)
                .map(|p| p.files.iter().any(|f| f.name == crate::commonjs_shim::EXEC_BOOTSTRAP_FILE_NAME))
                .unwrap_or(false)
            {
                return Err(anyhow::anyhow!(crate::errors::CoreError::Validation(format!(
                    "project '{script_id}' has no exec bootstrap installed"
                ))));
            }
            Ok(ExecutionResult {
                success: true,
                result: Some(serde_json::Value::String(js_statement.to_string())),
                logger_output: String::new(),
                execution_type: "head".to_string(),
                error: None,
            })
        }
    }

    #[tokio::test]
    async fn round_trips_file_content() {
        let api = FakeGasApi::new();
        api.update_file("s1", "Code", GasFileType::ServerJs, "var x = 1;")
            .await
            .unwrap();
        let files = api.list_content("s1").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].source, "var x = 1;");
    }

    #[tokio::test]
    async fn reorder_moves_named_files_to_front() {
        let api = FakeGasApi::new();
        api.update_file("s1", "A", GasFileType::ServerJs, "a")
            .await
            .unwrap();
        api.update_file("s1", "B", GasFileType::ServerJs, "b")
            .await
            .unwrap();
        api.reorder("s1", &["B".to_string()]).await.unwrap();
        let files = api.list_content("s1").await.unwrap();
        assert_eq!(files[0].name, "B");
    }

    #[tokio::test]
    async fn head_deployment_is_always_present() {
        let api = FakeGasApi::new();
        let head = api.find_head_deployment("s1").await.unwrap();
        assert!(head.is_some());
        assert!(head.unwrap().is_head);
    }

    #[tokio::test]
    async fn execute_requires_bootstrap_to_be_installed() {
        let api = FakeGasApi::new();
        assert!(api.execute("s1", "1+1").await.is_err());
    }

    #[tokio::test]
    async fn execute_succeeds_once_bootstrap_present() {
        let api = FakeGasApi::new();
        api.update_file(
            "s1",
            crate::commonjs_shim::EXEC_BOOTSTRAP_FILE_NAME,
            GasFileType::ServerJs,
            "",
        )
        .await
        .unwrap();
        let result = api.execute("s1", "1+1").await.unwrap();
        assert!(result.success);
        assert_eq!(result.execution_type, "head");
    }
}
