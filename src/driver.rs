//! Periodic driver for the update controller
//!
//! Reads the desired cluster version from the cluster ConfigMap and invokes
//! the controller on a fixed interval. The controller takes at most one step
//! per invocation, so the driver is what turns single steps into a complete
//! rollout. After a failure the next attempt is delayed by an exponential,
//! jittered backoff.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::controller::{UpdateController, UpdateOutcome};
use crate::metrics::{self, TickResult};
use crate::retry::{Backoff, RetryConfig};
use crate::version::Version;
use crate::Result;

/// Source of the version the cluster should be running
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DesiredVersionSource: Send + Sync {
    /// The desired version, or `None` if none is configured
    async fn desired_version(&self) -> Result<Option<Version>>;
}

/// Reads the desired version from a key of a ConfigMap
pub struct ConfigMapVersionSource {
    api: Api<ConfigMap>,
    name: String,
    key: String,
}

impl ConfigMapVersionSource {
    /// Read `key` of ConfigMap `name` in `namespace`
    pub fn new(
        client: Client,
        namespace: &str,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl DesiredVersionSource for ConfigMapVersionSource {
    async fn desired_version(&self) -> Result<Option<Version>> {
        match self.api.get_opt(&self.name).await? {
            Some(cm) => desired_version_from(&cm, &self.key),
            None => {
                debug!(config_map = %self.name, "Cluster ConfigMap not found");
                Ok(None)
            }
        }
    }
}

/// Extract the desired version from a ConfigMap.
///
/// A missing or blank key means no version is configured; a present but
/// malformed value is an error.
pub fn desired_version_from(cm: &ConfigMap, key: &str) -> Result<Option<Version>> {
    match cm.data.as_ref().and_then(|data| data.get(key)) {
        Some(value) if !value.trim().is_empty() => Version::parse(value).map(Some),
        _ => Ok(None),
    }
}

/// Timing of the driver loop
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Delay between invocations while things are healthy
    pub interval: Duration,
    /// Backoff applied after failed invocations
    pub retry: RetryConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// What a single driver tick did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tick {
    /// No desired version is configured
    Skipped,
    /// The controller ran with this outcome
    Ran {
        /// The version the controller was asked to reach
        target: Version,
        /// What the controller did
        outcome: UpdateOutcome,
    },
}

/// Read the desired version and invoke the controller once
pub async fn run_once(
    controller: &UpdateController,
    source: &dyn DesiredVersionSource,
) -> Result<Tick> {
    let Some(target) = source.desired_version().await? else {
        return Ok(Tick::Skipped);
    };
    let outcome = controller.update_to_version(&target).await?;
    Ok(Tick::Ran { target, outcome })
}

/// Invoke the controller forever.
///
/// Healthy ticks are spaced by `config.interval`; after a failure the next
/// attempt waits for the backoff delay instead.
pub async fn run(
    controller: &UpdateController,
    source: &dyn DesiredVersionSource,
    config: DriverConfig,
) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut backoff = Backoff::new(config.retry);

    info!(interval_secs = config.interval.as_secs(), "Update driver started");

    loop {
        interval.tick().await;
        match run_once(controller, source).await {
            Ok(Tick::Skipped) => {
                metrics::record_tick(TickResult::Skipped);
                backoff.reset();
                debug!("No desired cluster version configured, skipping");
            }
            Ok(Tick::Ran { target, outcome }) => {
                metrics::record_tick(TickResult::Ran);
                backoff.reset();
                match outcome {
                    UpdateOutcome::Updated { name, kind } => {
                        info!(target = %target, component = %name, kind = %kind, "Update step taken");
                    }
                    UpdateOutcome::InProgress { name, kind } => {
                        debug!(target = %target, component = %name, kind = %kind, "Waiting on rollout");
                    }
                    UpdateOutcome::Converged => {
                        debug!(target = %target, "Cluster converged");
                    }
                }
            }
            Err(e) => {
                metrics::record_tick(TickResult::Error);
                let delay = backoff.next_delay();
                warn!(
                    error = %e,
                    failures = backoff.failures(),
                    delay_ms = delay.as_millis() as u64,
                    "Update attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                interval.reset();
            }
        }
    }
}
