//! kubectl on the target machine
//!
//! Commands prefer the cluster's own `admin.conf`. Before `kubeadm init` has
//! produced it, a local kubeconfig is uploaded to a temporary path for the
//! duration of each command instead.

use crate::action::Action;
use crate::checks::check_file_exists_once;
use crate::combinators::{RetryPolicy, if_else, retry, try_action, with_cleanup};
use crate::error::ActionError;
use crate::exec::exec;
use crate::files::{delete_file, temp_filename, upload_file_to_file};
use crate::manifest::{Manifest, deliver_manifests};
use std::path::PathBuf;
use std::rc::Rc;

/// Path of the admin kubeconfig written by `kubeadm init`
pub const DEFAULT_ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";

/// Builder for kubectl invocations on the target
#[derive(Debug, Clone)]
pub struct RemoteKubectl {
    binary: String,
    kubeconfig: Option<PathBuf>,
    retry: RetryPolicy,
}

impl RemoteKubectl {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            kubeconfig: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Local kubeconfig used when the target has no admin.conf
    pub fn with_kubeconfig(mut self, kubeconfig: Option<PathBuf>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    /// Retry policy for commands run with an uploaded kubeconfig
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// `kubectl <args>` on the target
    pub fn run<I, S>(&self, args: I) -> Action
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = args
            .into_iter()
            .map(|arg| arg.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(" ");

        // admin.conf is never removed once created, so caching its existence is safe
        let with_admin_conf = exec(format!(
            "{} --kubeconfig={} {}",
            self.binary, DEFAULT_ADMIN_KUBECONFIG, args
        ));

        let binary = self.binary.clone();
        let kubeconfig = self.kubeconfig.clone();
        let policy = self.retry;
        let with_uploaded_conf = Action::deferred(move |_| {
            let Some(local) = &kubeconfig else {
                return Action::Error(ActionError::precondition(
                    "no kubeconfig provided, and no remote admin.conf found",
                ));
            };
            let remote = temp_filename();
            retry(
                policy,
                with_cleanup(
                    try_action(delete_file(&remote)),
                    Action::list([
                        upload_file_to_file(local, &remote),
                        exec(format!("{} --kubeconfig={} {}", binary, remote, args)),
                    ]),
                ),
            )
        });

        if_else(
            check_file_exists_once(DEFAULT_ADMIN_KUBECONFIG),
            with_admin_conf,
            with_uploaded_conf,
        )
    }

    /// `kubectl apply -f` every manifest, in order
    pub fn apply(&self, manifests: impl IntoIterator<Item = Manifest>) -> Action {
        let kubectl = self.clone();
        deliver_manifests(
            manifests,
            Rc::new(move |path: &str| kubectl.run(["apply", "-f", path])),
        )
    }
}
