//! Command-line and environment configuration

use std::time::Duration;

use clap::Args;

use crate::driver::DriverConfig;
use crate::retry::RetryConfig;
use crate::{
    Error, Result, CLUSTER_CONFIG_MAP_NAME, CLUSTER_VERSION_KEY, DEFAULT_NAMESPACE,
};

/// Settings shared by every subcommand that talks to the cluster
#[derive(Args, Clone, Debug)]
pub struct ControllerArgs {
    /// Namespace holding the managed workloads and the cluster ConfigMap
    #[arg(long, env = "CLUSTER_UPDATER_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Name of the ConfigMap holding the desired cluster version
    #[arg(long, env = "CLUSTER_UPDATER_CONFIG_MAP", default_value = CLUSTER_CONFIG_MAP_NAME)]
    pub config_map: String,

    /// Key in the ConfigMap holding the desired cluster version
    #[arg(long, env = "CLUSTER_UPDATER_VERSION_KEY", default_value = CLUSTER_VERSION_KEY)]
    pub version_key: String,

    /// Seconds between update attempts while healthy
    #[arg(long, env = "CLUSTER_UPDATER_INTERVAL_SECS", default_value_t = 30)]
    pub interval_secs: u64,

    /// Upper bound in seconds for the backoff after failed attempts
    #[arg(long, env = "CLUSTER_UPDATER_MAX_BACKOFF_SECS", default_value_t = 300)]
    pub max_backoff_secs: u64,

    /// Emit logs as JSON
    #[arg(long, env = "CLUSTER_UPDATER_JSON_LOGS")]
    pub json_logs: bool,
}

impl ControllerArgs {
    /// Validate the timing settings and build the driver configuration
    pub fn driver_config(&self) -> Result<DriverConfig> {
        if self.interval_secs == 0 {
            return Err(Error::config("interval must be at least one second"));
        }
        if self.max_backoff_secs < self.interval_secs {
            return Err(Error::config(format!(
                "max backoff ({}s) must not be shorter than the interval ({}s)",
                self.max_backoff_secs, self.interval_secs
            )));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }

        Ok(DriverConfig {
            interval: Duration::from_secs(self.interval_secs),
            retry: RetryConfig {
                initial_delay: Duration::from_secs(self.interval_secs),
                ..RetryConfig::with_max_delay(Duration::from_secs(self.max_backoff_secs))
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        args: ControllerArgs,
    }

    fn parse(argv: &[&str]) -> ControllerArgs {
        let mut full = vec!["cluster-updater"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    #[test]
    fn defaults_follow_cluster_conventions() {
        let args = parse(&[]);
        assert_eq!(args.namespace, "kube-system");
        assert_eq!(args.config_map, "cluster-config");
        assert_eq!(args.version_key, "cluster.version");
        assert_eq!(args.interval_secs, 30);
        assert_eq!(args.max_backoff_secs, 300);
        assert!(!args.json_logs);
    }

    #[test]
    fn driver_config_from_flags() {
        let args = parse(&["--interval-secs", "10", "--max-backoff-secs", "120"]);
        let config = args.driver_config().unwrap();
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.retry.initial_delay, Duration::from_secs(10));
        assert_eq!(config.retry.max_delay, Duration::from_secs(120));
    }

    #[test]
    fn rejects_zero_interval() {
        let args = parse(&["--interval-secs", "0"]);
        assert!(matches!(
            args.driver_config().unwrap_err(),
            Error::Config { .. }
        ));
    }

    #[test]
    fn rejects_backoff_shorter_than_interval() {
        let args = parse(&["--interval-secs", "60", "--max-backoff-secs", "30"]);
        let err = args.driver_config().unwrap_err();
        assert!(err.to_string().contains("max backoff"));
    }
}
