//! Provisioning configuration, saved and loaded as JSON.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::addons::{AddonsConfig, cni_plugin_manifest};
use crate::combinators::RetryPolicy;
use crate::kubectl::RemoteKubectl;

/// Retries for kubectl commands that run with an uploaded kubeconfig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval_ms: 1000,
        }
    }
}

/// Everything a provisioning run needs besides the target itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Run remote commands through `sudo`
    pub sudo: bool,
    /// kubectl binary on the target
    pub kubectl: String,
    /// Local kubeconfig used until the target has its own admin.conf
    pub kubeconfig: Option<PathBuf>,
    pub retry: RetryConfig,
    pub addons: AddonsConfig,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            sudo: false,
            kubectl: "kubectl".to_string(),
            kubeconfig: None,
            retry: RetryConfig::default(),
            addons: AddonsConfig::default(),
        }
    }
}

impl ProvisionConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.kubectl.trim().is_empty() {
            anyhow::bail!("kubectl binary must be specified");
        }

        if self.retry.attempts == 0 {
            anyhow::bail!("Retry attempts must be at least 1");
        }

        let plugin = self
            .addons
            .cni_plugin
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let manifest = self
            .addons
            .cni_plugin_manifest
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if plugin.is_some() && manifest.is_some() {
            anyhow::bail!("Only one of cni_plugin and cni_plugin_manifest can be specified");
        }
        if let Some(plugin) = plugin
            && cni_plugin_manifest(plugin).is_none()
        {
            anyhow::bail!("Unknown CNI plugin {:?}", plugin);
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.attempts,
            Duration::from_millis(self.retry.interval_ms),
        )
    }

    /// Remote kubectl configured from this file
    pub fn kubectl(&self) -> RemoteKubectl {
        RemoteKubectl::new(self.kubectl.trim())
            .with_kubeconfig(self.kubeconfig.clone())
            .with_retry(self.retry_policy())
    }
}
