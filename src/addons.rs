//! Cluster addons loaded after the control plane is up
//!
//! The CNI plugin, the dashboard and any extra manifests are all applied with
//! [`RemoteKubectl::apply`]. An addon that is disabled or not configured is
//! reported with a warning and skipped.

use crate::action::Action;
use crate::combinators::{message_info, message_warn};
use crate::error::ActionError;
use crate::kubectl::RemoteKubectl;
use crate::manifest::Manifest;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Manifest URLs for the CNI plugins known by name
pub const KNOWN_CNI_PLUGINS: &[(&str, &str)] = &[
    (
        "flannel",
        "https://raw.githubusercontent.com/coreos/flannel/master/Documentation/kube-flannel.yml",
    ),
    (
        "weave",
        "https://github.com/weaveworks/weave/releases/download/v2.8.1/weave-daemonset-k8s.yaml",
    ),
    (
        "calico",
        "https://docs.projectcalico.org/manifests/calico.yaml",
    ),
];

pub const DEFAULT_DASHBOARD_MANIFEST: &str =
    "https://raw.githubusercontent.com/kubernetes/dashboard/v2.0.0/aio/deploy/recommended.yaml";

/// Which addons to load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddonsConfig {
    /// Name of a known CNI plugin
    pub cni_plugin: Option<String>,
    /// URL or local file with a CNI manifest
    pub cni_plugin_manifest: Option<String>,
    pub dashboard_enabled: bool,
    /// Extra manifests: URLs, local files or inline text
    pub manifests: Vec<String>,
}

/// Manifest URL for a known CNI plugin, matched case-insensitively
pub fn cni_plugin_manifest(name: &str) -> Option<&'static str> {
    let name = name.trim().to_lowercase();
    KNOWN_CNI_PLUGINS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, url)| *url)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Load the CNI plugin, preferring an explicit manifest over a plugin name
pub fn load_cni(config: &AddonsConfig, kubectl: &RemoteKubectl) -> Action {
    if let Some(source) = non_empty(&config.cni_plugin_manifest) {
        let manifest = Manifest::parse(source);
        if manifest.is_inline() {
            return Action::error(format!(
                "{:?} not recognized as URL or local filename",
                source
            ));
        }
        return Action::list([
            message_info(format!("Loading CNI plugin from {:?}", source)),
            kubectl.apply([manifest]),
        ]);
    }

    let Some(plugin) = non_empty(&config.cni_plugin) else {
        return message_warn("no CNI driver is going to be loaded");
    };
    debug!(plugin, "verifying CNI plugin");
    let Some(url) = cni_plugin_manifest(plugin) else {
        // validation rejects unknown plugins before any workflow is built
        return Action::Error(ActionError::fatal(format!(
            "unknown CNI driver {:?}",
            plugin
        )));
    };
    Action::list([
        message_info(format!("Loading CNI plugin {:?}", plugin)),
        kubectl.apply([Manifest::Url(url.to_string())]),
    ])
}

/// Load the dashboard when enabled
pub fn load_dashboard(config: &AddonsConfig, kubectl: &RemoteKubectl) -> Action {
    if !config.dashboard_enabled {
        return message_warn("the Dashboard will not be loaded");
    }
    Action::list([
        message_info(format!(
            "Loading Dashboard from {:?}",
            DEFAULT_DASHBOARD_MANIFEST
        )),
        kubectl.apply([Manifest::Url(DEFAULT_DASHBOARD_MANIFEST.to_string())]),
    ])
}

/// Load every extra manifest, in order
pub fn load_extra_manifests(manifests: &[String], kubectl: &RemoteKubectl) -> Action {
    let manifests = manifests
        .iter()
        .filter(|m| !m.trim().is_empty())
        .map(|m| Manifest::parse(m))
        .collect::<Vec<_>>();
    if manifests.is_empty() {
        return Action::NoOp;
    }
    Action::list([
        message_info(format!("Loading {} extra manifests", manifests.len())),
        kubectl.apply(manifests),
    ])
}

/// CNI, dashboard, then extra manifests
pub fn load_addons(config: &AddonsConfig, kubectl: &RemoteKubectl) -> Action {
    Action::list([
        load_cni(config, kubectl),
        load_dashboard(config, kubectl),
        load_extra_manifests(&config.manifests, kubectl),
    ])
}
