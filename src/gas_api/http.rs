//! `HttpGasApi` — the default `GasApi` backed by `script.googleapis.com`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::AuthProvider;
use crate::errors::CoreError;
use crate::path_resolver::GasFileType;

use super::{Deployment, GasApi, GasFile};

const API_BASE: &str = "https://script.googleapis.com/v1";
const MAX_ATTEMPTS: u32 = 3;

pub struct HttpGasApi {
    client: reqwest::Client,
    auth: Arc<dyn AuthProvider>,
    base_url: String,
}

impl HttpGasApi {
    pub fn new(auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            auth,
            base_url: API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    fn with_base_url(auth: Arc<dyn AuthProvider>, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth,
            base_url,
        }
    }

    async fn authed_request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder> {
        let token = self.auth.bearer_token().await.context("resolving bearer token")?;
        Ok(self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token))
    }

    /// Runs `attempt` up to `MAX_ATTEMPTS` times, retrying only on errors
    /// classified as transient (429/5xx); anything else (4xx other than
    /// 429) is returned immediately (spec §4.E "bounded exponential
    /// backoff for transient/quota errors only").
    async fn with_retries<T, F, Fut>(&self, op: &str, attempt: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_millis(250);
        let mut last_err = None;
        for attempt_no in 1..=MAX_ATTEMPTS {
            match attempt().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let transient = e
                        .downcast_ref::<CoreError>()
                        .map(|c| matches!(c, CoreError::Quota(_)))
                        .unwrap_or(false);
                    if !transient || attempt_no == MAX_ATTEMPTS {
                        return Err(e);
                    }
                    warn!(op, attempt_no, "transient GasApi error, retrying: {e:#}");
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("{op} exhausted retries with no recorded error")))
    }

    async fn fetch_content(&self, script_id: &str) -> Result<ContentResponse> {
        let resp = self
            .authed_request(reqwest::Method::GET, &format!("/projects/{script_id}/content"))
            .await?
            .send()
            .await
            .context("sending getContent request")?;
        handle_response(resp).await
    }

    async fn push_content(&self, script_id: &str, files: Vec<ApiFile>) -> Result<ContentResponse> {
        let resp = self
            .authed_request(reqwest::Method::PUT, &format!("/projects/{script_id}/content"))
            .await?
            .json(&ContentResponse { files })
            .send()
            .await
            .context("sending updateContent request")?;
        handle_response(resp).await
    }
}

#[async_trait]
impl GasApi for HttpGasApi {
    async fn list_content(&self, script_id: &str) -> Result<Vec<GasFile>> {
        let resp = self
            .with_retries("list_content", || self.fetch_content(script_id))
            .await?;
        resp.files.into_iter().map(ApiFile::into_domain).collect()
    }

    async fn update_file(
        &self,
        script_id: &str,
        name: &str,
        file_type: GasFileType,
        source: &str,
    ) -> Result<GasFile> {
        let mut current = self.fetch_content(script_id).await?.files;
        let now = Utc::now();
        match current.iter_mut().find(|f| f.name == name) {
            Some(existing) => {
                existing.source = source.to_string();
                existing.file_type = file_type.as_str().to_string();
                existing.update_time = Some(now.to_rfc3339());
            }
            None => current.push(ApiFile {
                name: name.to_string(),
                file_type: file_type.as_str().to_string(),
                source: source.to_string(),
                create_time: Some(now.to_rfc3339()),
                update_time: Some(now.to_rfc3339()),
            }),
        }
        let pushed = self
            .with_retries("update_file", || self.push_content(script_id, current.clone()))
            .await?;
        pushed
            .files
            .into_iter()
            .find(|f| f.name == name)
            .ok_or_else(|| anyhow!(CoreError::Internal(format!(
                "updateContent did not echo back file '{name}'"
            ))))?
            .into_domain()
    }

    async fn delete_file(&self, script_id: &str, name: &str) -> Result<()> {
        let mut current = self.fetch_content(script_id).await?.files;
        let before = current.len();
        current.retain(|f| f.name != name);
        if current.len() == before {
            return Err(anyhow!(CoreError::NotFound(format!(
                "no file named '{name}' in project '{script_id}'"
            ))));
        }
        self.with_retries("delete_file", || self.push_content(script_id, current.clone()))
            .await?;
        Ok(())
    }

    async fn reorder(&self, script_id: &str, order: &[String]) -> Result<()> {
        let current = self.fetch_content(script_id).await?.files;
        if order.len() != current.len() {
            return Err(anyhow!(CoreError::Validation(
                "reorder's name list must be a permutation of the project's current files".to_string()
            )));
        }
        let mut by_name: std::collections::HashMap<String, ApiFile> =
            current.into_iter().map(|f| (f.name.clone(), f)).collect();
        let mut reordered = Vec::with_capacity(order.len());
        for name in order {
            let file = by_name.remove(name).ok_or_else(|| {
                anyhow!(CoreError::Validation(format!(
                    "reorder references unknown file '{name}'"
                )))
            })?;
            reordered.push(file);
        }
        self.with_retries("reorder", || self.push_content(script_id, reordered.clone()))
            .await?;
        Ok(())
    }

    async fn create_version(&self, script_id: &str, description: &str) -> Result<i64> {
        #[derive(Deserialize)]
        struct VersionResponse {
            #[serde(rename = "versionNumber")]
            version_number: i64,
        }
        let resp = self
            .with_retries("create_version", || async {
                let resp = self
                    .authed_request(reqwest::Method::POST, &format!("/projects/{script_id}/versions"))
                    .await?
                    .json(&serde_json::json!({ "description": description }))
                    .send()
                    .await
                    .context("sending createVersion request")?;
                handle_response::<VersionResponse>(resp).await
            })
            .await?;
        Ok(resp.version_number)
    }

    async fn create_deployment(
        &self,
        script_id: &str,
        version_number: i64,
        description: &str,
    ) -> Result<Deployment> {
        let resp = self
            .with_retries("create_deployment", || async {
                let resp = self
                    .authed_request(reqwest::Method::POST, &format!("/projects/{script_id}/deployments"))
                    .await?
                    .json(&serde_json::json!({
                        "versionNumber": version_number,
                        "manifestFileName": "appsscript",
                        "description": description,
                    }))
                    .send()
                    .await
                    .context("sending createDeployment request")?;
                handle_response::<ApiDeployment>(resp).await
            })
            .await?;
        Ok(resp.into_domain())
    }

    async fn update_deployment(
        &self,
        script_id: &str,
        deployment_id: &str,
        version_number: i64,
        description: &str,
    ) -> Result<Deployment> {
        let resp = self
            .with_retries("update_deployment", || async {
                let resp = self
                    .authed_request(
                        reqwest::Method::PUT,
                        &format!("/projects/{script_id}/deployments/{deployment_id}"),
                    )
                    .await?
                    .json(&serde_json::json!({
                        "deploymentConfig": {
                            "versionNumber": version_number,
                            "manifestFileName": "appsscript",
                            "description": description,
                        }
                    }))
                    .send()
                    .await
                    .context("sending updateDeployment request")?;
                handle_response::<ApiDeployment>(resp).await
            })
            .await?;
        Ok(resp.into_domain())
    }

    async fn list_deployments(&self, script_id: &str) -> Result<Vec<Deployment>> {
        #[derive(Deserialize)]
        struct ListResponse {
            #[serde(default)]
            deployments: Vec<ApiDeployment>,
        }
        let resp = self
            .with_retries("list_deployments", || async {
                let resp = self
                    .authed_request(reqwest::Method::GET, &format!("/projects/{script_id}/deployments"))
                    .await?
                    .send()
                    .await
                    .context("sending listDeployments request")?;
                handle_response::<ListResponse>(resp).await
            })
            .await?;
        Ok(resp.deployments.into_iter().map(ApiDeployment::into_domain).collect())
    }

    async fn execute(&self, script_id: &str, js_statement: &str) -> Result<super::ExecutionResult> {
        #[derive(Deserialize)]
        struct RunResponse {
            #[serde(default)]
            done: bool,
            #[serde(default)]
            response: Option<RunResponseBody>,
            #[serde(default)]
            error: Option<RunError>,
        }
        #[derive(Deserialize)]
        struct RunResponseBody {
            result: Option<serde_json::Value>,
        }
        #[derive(Deserialize)]
        struct RunError {
            #[serde(default)]
            message: String,
        }

        let resp = self
            .with_retries("execute", || async {
                let resp = self
                    .authed_request(reqwest::Method::POST, &format!("/scripts/{script_id}:run"))
                    .await?
                    .json(&serde_json::json!({
                        "function": "__mcp_exec__",
                        "parameters": [js_statement],
                        "devMode": true,
                    }))
                    .send()
                    .await
                    .context("sending scripts.run request")?;
                handle_response::<RunResponse>(resp).await
            })
            .await?;

        if let Some(err) = resp.error {
            return Ok(super::ExecutionResult {
                success: false,
                result: None,
                logger_output: String::new(),
                execution_type: "head".to_string(),
                error: Some(err.message),
            });
        }

        let body = resp
            .response
            .and_then(|r| r.result)
            .unwrap_or(serde_json::Value::Null);
        let success = body.get("success").and_then(|v| v.as_bool()).unwrap_or(resp.done);
        let result = body.get("result").cloned();
        let logger_output = body
            .get("logger_output")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let error = body
            .get("error")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(super::ExecutionResult {
            success,
            result,
            logger_output,
            execution_type: "head".to_string(),
            error,
        })
    }
}

async fn handle_response<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return resp.json::<T>().await.context("decoding GasApi response body");
    }

    let body = resp.text().await.unwrap_or_default();
    debug!(%status, %body, "GasApi error response");
    let err = match status.as_u16() {
        401 | 403 => CoreError::Auth(format!("GasApi rejected credentials ({status}): {body}")),
        404 => CoreError::NotFound(format!("GasApi resource not found: {body}")),
        409 => CoreError::Conflict(format!("GasApi reported a conflict: {body}")),
        429 => CoreError::Quota(format!("GasApi rate limit: {body}")),
        s if s >= 500 => CoreError::Quota(format!("GasApi server error ({status}): {body}")),
        _ => CoreError::Internal(format!("unexpected GasApi response ({status}): {body}")),
    };
    Err(anyhow!(err))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiFile {
    name: String,
    #[serde(rename = "type")]
    file_type: String,
    #[serde(default)]
    source: String,
    #[serde(rename = "createTime", skip_serializing_if = "Option::is_none")]
    create_time: Option<String>,
    #[serde(rename = "updateTime", skip_serializing_if = "Option::is_none")]
    update_time: Option<String>,
}

impl ApiFile {
    fn into_domain(self) -> Result<GasFile> {
        let file_type = match self.file_type.as_str() {
            "SERVER_JS" => GasFileType::ServerJs,
            "HTML" => GasFileType::Html,
            "JSON" => GasFileType::Json,
            other => return Err(anyhow!(CoreError::Internal(format!("unknown GAS file type '{other}'")))),
        };
        let update_time: DateTime<Utc> = self
            .update_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Ok(GasFile {
            name: self.name,
            file_type,
            source: self.source,
            update_time,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentResponse {
    files: Vec<ApiFile>,
}

#[derive(Debug, Deserialize)]
struct ApiDeployment {
    #[serde(rename = "deploymentId")]
    deployment_id: String,
    #[serde(default)]
    #[serde(rename = "deploymentConfig")]
    config: Option<ApiDeploymentConfig>,
}

#[derive(Debug, Deserialize)]
struct ApiDeploymentConfig {
    #[serde(rename = "versionNumber")]
    version_number: Option<i64>,
    #[serde(default)]
    description: String,
}

impl ApiDeployment {
    fn into_domain(self) -> Deployment {
        let config = self.config.unwrap_or(ApiDeploymentConfig {
            version_number: None,
            description: String::new(),
        });
        Deployment {
            is_head: config.version_number.is_none(),
            deployment_id: self.deployment_id,
            version_number: config.version_number,
            description: config.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthProvider;

    #[tokio::test]
    async fn deployment_with_no_pinned_version_is_head() {
        let api = ApiDeployment {
            deployment_id: "d1".to_string(),
            config: Some(ApiDeploymentConfig {
                version_number: None,
                description: "HEAD".to_string(),
            }),
        };
        assert!(api.into_domain().is_head);
    }

    #[tokio::test]
    async fn http_gas_api_constructs_with_auth_provider() {
        let auth: Arc<dyn AuthProvider> = Arc::new(StaticAuthProvider::new("tok"));
        let api = HttpGasApi::with_base_url(auth, "http://127.0.0.1:0".to_string());
        assert_eq!(api.base_url, "http://127.0.0.1:0");
    }
}
