//! DeploymentManager (spec §4.J) — dev/staging/prod environment state
//! machine. `dev` always tracks the project's live HEAD (no pinned
//! version); `staging`/`prod` are deployments pinned to a specific version
//! number, advanced only by an explicit promote.
//!
//! Promotion direction matters: `staging` is cut from a fresh version of
//! the project's current HEAD, but `prod` never mints its own version — it
//! is pinned to whatever version `staging` is *currently* pinned to, so
//! "promote to prod" always means "what's in staging now", never "whatever
//! HEAD happens to be at promote time" (spec §4.J promote contract).

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::gas_api::{Deployment, GasApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }

    /// The description tag every deployment description for this
    /// environment is prefixed with (spec §4.J: `"[STAGING] " + description`
    /// / `"[PROD] " + description`).
    fn tag(&self) -> &'static str {
        match self {
            Environment::Dev => "[DEV]",
            Environment::Staging => "[STAGING]",
            Environment::Prod => "[PROD]",
        }
    }

    fn description_prefix(&self) -> &'static str {
        match self {
            Environment::Dev => "dev (HEAD)",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentStatus {
    pub environment: Environment,
    pub deployment_id: Option<String>,
    pub version_number: Option<i64>,
    /// `true` when this environment has been promoted at least once since
    /// the last commit observed by the caller — surfaced to the MCP client
    /// as the `deploy` response's staleness hint (spec §6 "deploy hint").
    pub stale: bool,
}

/// One prior pin per environment, recorded on every successful promote, so
/// `rollback` without an explicit `toVersion` has something to fall back
/// to (spec §4.J "tag last-known-good prior ... version").
#[derive(Default)]
struct PriorVersions {
    staging: Option<i64>,
    prod: Option<i64>,
}

/// Prior-version bookkeeping shared across every `DeploymentManager` built
/// for the lifetime of the server process. A `DeploymentManager` is
/// constructed fresh per tool call (it borrows `GasApi` and this store by
/// reference), but the store itself must outlive any single call — a
/// `rollback` needs to see the prior recorded by an *earlier, separate*
/// `promote` call (spec §4.J). Keeping the priors on a throwaway
/// per-call `Mutex` instead of here means rollback-without-`toVersion`
/// only ever works inside a single `DeploymentManager` instance, which in
/// real use (one call per manager) is never.
#[derive(Default)]
pub struct DeploymentPriorStore {
    priors: Mutex<HashMap<String, PriorVersions>>,
}

impl DeploymentPriorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct DeploymentManager<'a> {
    gas_api: &'a dyn GasApi,
    priors: &'a DeploymentPriorStore,
}

impl<'a> DeploymentManager<'a> {
    pub fn new(gas_api: &'a dyn GasApi, priors: &'a DeploymentPriorStore) -> Self {
        Self { gas_api, priors }
    }

    /// Current state of every environment. `dev` always resolves to the
    /// always-present HEAD deployment (spec §4.J "head-deployment
    /// invariant": a project always has exactly one HEAD deployment and it
    /// is never itself promoted or reset).
    pub async fn status(&self, script_id: &str) -> Result<Vec<EnvironmentStatus>> {
        let deployments = self.gas_api.list_deployments(script_id).await?;
        let mut out = Vec::with_capacity(3);
        for env in [Environment::Dev, Environment::Staging, Environment::Prod] {
            let found = self.find_for(&deployments, env);
            out.push(EnvironmentStatus {
                environment: env,
                deployment_id: found.map(|d| d.deployment_id.clone()),
                version_number: found.and_then(|d| d.version_number),
                stale: false,
            });
        }
        Ok(out)
    }

    fn find_for<'d>(&self, deployments: &'d [Deployment], env: Environment) -> Option<&'d Deployment> {
        match env {
            Environment::Dev => deployments.iter().find(|d| d.is_head),
            _ => deployments
                .iter()
                .find(|d| !d.is_head && d.description.contains(env.tag())),
        }
    }

    fn record_prior(&self, script_id: &str, env: Environment, version: Option<i64>) {
        let mut priors = self.priors.priors.lock().unwrap();
        let entry = priors.entry(script_id.to_string()).or_default();
        match env {
            Environment::Staging => entry.staging = version,
            Environment::Prod => entry.prod = version,
            Environment::Dev => {}
        }
    }

    fn prior_for(&self, script_id: &str, env: Environment) -> Option<i64> {
        let priors = self.priors.priors.lock().unwrap();
        let entry = priors.get(script_id)?;
        match env {
            Environment::Staging => entry.staging,
            Environment::Prod => entry.prod,
            Environment::Dev => None,
        }
    }

    /// `env=staging`: cuts a fresh version from HEAD and points staging at
    /// it. `env=prod`: never mints a version — it re-pins to whatever
    /// version `staging` is *currently* pinned to (spec §4.J "read
    /// staging's pinned version"), and fails if staging has no deployment
    /// yet. `env=dev` is rejected — HEAD always tracks live content.
    pub async fn promote(&self, script_id: &str, env: Environment, description: &str) -> Result<EnvironmentStatus> {
        if env == Environment::Dev {
            return Err(anyhow!(CoreError::Validation(
                "dev always tracks HEAD and cannot be promoted to".to_string()
            )));
        }

        let version = match env {
            Environment::Staging => self.gas_api.create_version(script_id, description).await?,
            Environment::Prod => {
                let deployments = self.gas_api.list_deployments(script_id).await?;
                let staging = self.find_for(&deployments, Environment::Staging).ok_or_else(|| {
                    anyhow!(CoreError::Validation(
                        "prod can only be promoted from a staging deployment that already exists".to_string()
                    ))
                })?;
                staging.version_number.ok_or_else(|| {
                    anyhow!(CoreError::Internal(
                        "staging deployment has no pinned version number".to_string()
                    ))
                })?
            }
            Environment::Dev => unreachable!(),
        };

        let tagged_description = format!("{} {}", env.tag(), description);
        let deployments = self.gas_api.list_deployments(script_id).await?;
        let existing = self.find_for(&deployments, env);
        self.record_prior(script_id, env, existing.and_then(|d| d.version_number));

        let deployment = match existing {
            Some(existing) => {
                self.gas_api
                    .update_deployment(script_id, &existing.deployment_id, version, &tagged_description)
                    .await?
            }
            None => {
                self.gas_api
                    .create_deployment(script_id, version, &tagged_description)
                    .await?
            }
        };

        Ok(EnvironmentStatus {
            environment: env,
            deployment_id: Some(deployment.deployment_id),
            version_number: deployment.version_number,
            stale: false,
        })
    }

    /// Roll `env` back to an explicit `to_version`, or — if omitted — the
    /// version recorded before the most recent promote. Fails, naming the
    /// current pin, if neither an explicit version nor a recorded prior is
    /// available (spec §4.J "Fails clearly if no prior is known, surfacing
    /// the current pin").
    pub async fn rollback(
        &self,
        script_id: &str,
        env: Environment,
        to_version: Option<i64>,
    ) -> Result<EnvironmentStatus> {
        if env == Environment::Dev {
            return Err(anyhow!(CoreError::Validation(
                "dev always tracks HEAD and cannot be rolled back".to_string()
            )));
        }
        let deployments = self.gas_api.list_deployments(script_id).await?;
        let existing = self
            .find_for(&deployments, env)
            .ok_or_else(|| anyhow!(CoreError::NotFound(format!("{} has no deployment yet", env.as_str()))))?;

        let version = match to_version.or_else(|| self.prior_for(script_id, env)) {
            Some(v) => v,
            None => {
                return Err(anyhow!(CoreError::Validation(format!(
                    "no prior version known for {} (currently pinned to v{}); pass toVersion explicitly",
                    env.as_str(),
                    existing
                        .version_number
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "none".to_string())
                ))));
            }
        };

        let tagged_description = format!("{} v{version}: rollback", env.tag());
        let deployment = self
            .gas_api
            .update_deployment(script_id, &existing.deployment_id, version, &tagged_description)
            .await?;
        // A rollback that succeeds makes the version it rolled back *from*
        // the new prior, so a second rollback can undo the first.
        self.record_prior(script_id, env, existing.version_number);
        Ok(EnvironmentStatus {
            environment: env,
            deployment_id: Some(deployment.deployment_id),
            version_number: deployment.version_number,
            stale: false,
        })
    }

    /// Destructive escape hatch (spec §4.J): repoints staging and prod at a
    /// fresh version cut from current HEAD, clearing any recorded prior so
    /// a subsequent rollback can't resurrect a pin from before the reset.
    /// `GasApi`'s contract (§4.E) has no deployment-delete operation, so
    /// "destroy and recreate" is expressed as create-or-repoint, matching
    /// what every other promote/rollback call here already does.
    pub async fn reset(&self, script_id: &str) -> Result<Vec<EnvironmentStatus>> {
        let version = self
            .gas_api
            .create_version(script_id, "reset baseline")
            .await?;

        let mut out = Vec::with_capacity(3);
        let dev_status = self.status(script_id).await?;
        out.push(
            dev_status
                .into_iter()
                .find(|s| s.environment == Environment::Dev)
                .expect("status always reports dev"),
        );

        for env in [Environment::Staging, Environment::Prod] {
            let deployments = self.gas_api.list_deployments(script_id).await?;
            let existing = self.find_for(&deployments, env);
            let tagged_description = format!("{} reset", env.tag());
            let deployment = match existing {
                Some(existing) => {
                    self.gas_api
                        .update_deployment(script_id, &existing.deployment_id, version, &tagged_description)
                        .await?
                }
                None => {
                    self.gas_api
                        .create_deployment(script_id, version, &tagged_description)
                        .await?
                }
            };
            self.priors.priors.lock().unwrap().remove(script_id);
            out.push(EnvironmentStatus {
                environment: env,
                deployment_id: Some(deployment.deployment_id),
                version_number: deployment.version_number,
                stale: false,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas_api::fake::FakeGasApi;

    #[tokio::test]
    async fn dev_always_resolves_to_head() {
        let api = FakeGasApi::new();
        let priors = DeploymentPriorStore::new();
        let manager = DeploymentManager::new(&api, &priors);
        let status = manager.status("s1").await.unwrap();
        let dev = status.iter().find(|s| s.environment == Environment::Dev).unwrap();
        assert!(dev.deployment_id.is_some());
        assert!(dev.version_number.is_none());
    }

    #[tokio::test]
    async fn promote_cannot_target_dev() {
        let api = FakeGasApi::new();
        let priors = DeploymentPriorStore::new();
        let manager = DeploymentManager::new(&api, &priors);
        assert!(manager.promote("s1", Environment::Dev, "x").await.is_err());
    }

    #[tokio::test]
    async fn prod_cannot_be_promoted_before_staging_exists() {
        let api = FakeGasApi::new();
        let priors = DeploymentPriorStore::new();
        let manager = DeploymentManager::new(&api, &priors);
        assert!(manager.promote("s1", Environment::Prod, "x").await.is_err());
    }

    #[tokio::test]
    async fn s5_promote_sequence_pins_prod_to_stagings_version() {
        let api = FakeGasApi::new();
        let priors = DeploymentPriorStore::new();
        let manager = DeploymentManager::new(&api, &priors);

        let staging = manager.promote("s1", Environment::Staging, "v1").await.unwrap();
        assert_eq!(staging.version_number, Some(1));

        let prod = manager.promote("s1", Environment::Prod, "v1").await.unwrap();
        // Prod mints no version of its own — it inherits staging's.
        assert_eq!(prod.version_number, staging.version_number);

        // Rollback with no prior known (prod has never been promoted
        // before this) surfaces the current pin rather than guessing.
        let err = manager.rollback("s1", Environment::Prod, None).await.unwrap_err();
        assert!(err.to_string().contains("v1"));
    }

    #[tokio::test]
    async fn staging_promotes_mint_successive_versions() {
        let api = FakeGasApi::new();
        let priors = DeploymentPriorStore::new();
        let manager = DeploymentManager::new(&api, &priors);

        let first = manager.promote("s1", Environment::Staging, "initial").await.unwrap();
        assert_eq!(first.version_number, Some(1));

        let second = manager.promote("s1", Environment::Staging, "follow-up").await.unwrap();
        assert_eq!(second.version_number, Some(2));
        assert_eq!(second.deployment_id, first.deployment_id);
    }

    #[tokio::test]
    async fn rollback_requires_an_existing_deployment() {
        let api = FakeGasApi::new();
        let priors = DeploymentPriorStore::new();
        let manager = DeploymentManager::new(&api, &priors);
        assert!(manager.rollback("s1", Environment::Prod, Some(1)).await.is_err());
    }

    #[tokio::test]
    async fn rollback_uses_recorded_prior_when_to_version_omitted() {
        let api = FakeGasApi::new();
        let priors = DeploymentPriorStore::new();
        let manager = DeploymentManager::new(&api, &priors);
        manager.promote("s1", Environment::Staging, "v1").await.unwrap();
        manager.promote("s1", Environment::Prod, "v1").await.unwrap();
        // Staging advances to v2, prod is re-promoted to match.
        manager.promote("s1", Environment::Staging, "v2").await.unwrap();
        let prod_v2 = manager.promote("s1", Environment::Prod, "v2").await.unwrap();
        assert_eq!(prod_v2.version_number, Some(2));

        let rolled_back = manager.rollback("s1", Environment::Prod, None).await.unwrap();
        assert_eq!(rolled_back.version_number, Some(1));
    }

    #[tokio::test]
    async fn reset_repoints_staging_and_prod_and_clears_priors() {
        let api = FakeGasApi::new();
        let priors = DeploymentPriorStore::new();
        let manager = DeploymentManager::new(&api, &priors);
        manager.promote("s1", Environment::Staging, "v1").await.unwrap();
        manager.promote("s1", Environment::Prod, "v1").await.unwrap();

        let statuses = manager.reset("s1").await.unwrap();
        assert_eq!(statuses.len(), 3);
        let staging = statuses.iter().find(|s| s.environment == Environment::Staging).unwrap();
        let prod = statuses.iter().find(|s| s.environment == Environment::Prod).unwrap();
        assert_eq!(staging.version_number, prod.version_number);

        // Priors were cleared, so a rollback with no explicit version fails.
        assert!(manager.rollback("s1", Environment::Prod, None).await.is_err());
    }
}
