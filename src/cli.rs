use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

use crate::action::Action;
use crate::addons::{load_addons, load_extra_manifests};
use crate::checker::Checker;
use crate::checks::{check_binary_exists, check_file_exists};
use crate::config::ProvisionConfig;
use crate::context::{Context, NullSink, OutputSink, StdoutSink, TracingSink};
use crate::error::Result;
use crate::exec::{exec, exec_script};
use crate::files::cleanup_leftovers;
use crate::transport::Transport;

/// kubeprov - provision Kubernetes nodes with composable remote actions
#[derive(Parser)]
#[command(name = "kubeprov")]
#[command(about = "Run provisioning actions against a node")]
#[command(version)]
pub struct Cli {
    /// Run every command through `sudo --non-interactive`
    #[arg(long, global = true)]
    pub sudo: bool,

    /// Only print command output through the log
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command on the node
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Upload a script to the node and run it
    Script {
        file: PathBuf,
    },
    /// Evaluate a condition on the node and print true or false
    Check {
        #[command(subcommand)]
        check: CheckCommands,
    },
    /// Load the addons from a configuration file plus any extra manifests
    Apply {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Extra manifests: URLs, local files or inline YAML
        manifests: Vec<String>,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum CheckCommands {
    /// A regular file exists
    File { path: String },
    /// A binary is on the PATH
    Binary { name: String },
}

impl CheckCommands {
    pub fn checker(&self) -> Checker {
        match self {
            Self::File { path } => check_file_exists(path.as_str()),
            Self::Binary { name } => check_binary_exists(name.as_str()),
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Context over `transport` with output routed per `--quiet`
    pub fn context(&self, transport: Arc<dyn Transport>) -> Context {
        let (user, exec): (Arc<dyn OutputSink>, Arc<dyn OutputSink>) = if self.quiet {
            (Arc::new(NullSink), Arc::new(TracingSink))
        } else {
            (Arc::new(StdoutSink), Arc::new(StdoutSink))
        };
        Context::new(transport)
            .with_sudo(self.sudo)
            .with_user_output(user)
            .with_exec_output(exec)
    }
}

/// `kubeprov exec`
pub fn exec_workflow(command: &[String]) -> Action {
    exec(command.join(" "))
}

/// `kubeprov script`
pub fn script_workflow(file: &Path) -> Result<Action> {
    Ok(exec_script(fs::read(file)?))
}

/// `kubeprov apply`
pub fn apply_workflow(config: &ProvisionConfig, manifests: &[String]) -> Action {
    let kubectl = config.kubectl();
    Action::list([
        load_addons(&config.addons, &kubectl),
        load_extra_manifests(manifests, &kubectl),
    ])
}

/// Apply `workflow`, then remove leftovers whatever the outcome
pub fn run_workflow(ctx: &mut Context, workflow: Action) -> Result<()> {
    let res = workflow.apply(ctx);
    cleanup_leftovers().apply(ctx);
    match res {
        Action::Error(err) => {
            error!("workflow failed: {}", err);
            Err(err.into())
        }
        _ => {
            debug!("workflow finished");
            Ok(())
        }
    }
}

/// Evaluate `checker`, then remove leftovers
pub fn run_check(ctx: &mut Context, checker: &Checker) -> Result<bool> {
    let res = checker.check(ctx);
    cleanup_leftovers().apply(ctx);
    Ok(res?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ActionError, ProvisionError};
    use crate::files::add_leftover;
    use crate::testing::{MockResponse, MockTransport, test_context};

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["kubeprov"]).is_err());
    }

    #[test]
    fn test_cli_exec_collects_words() {
        let cli = Cli::try_parse_from(["kubeprov", "--sudo", "exec", "kubeadm", "reset", "-f"])
            .expect("parse");
        assert!(cli.sudo);
        match cli.command {
            Commands::Exec { command } => assert_eq!(command, ["kubeadm", "reset", "-f"]),
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["kubeprov", "check", "file", "/etc/hosts", "--quiet"])
            .expect("parse");
        assert!(cli.quiet);
        assert!(matches!(
            cli.command,
            Commands::Check {
                check: CheckCommands::File { .. }
            }
        ));
    }

    #[test]
    fn test_cli_apply_with_manifests() {
        let cli = Cli::try_parse_from([
            "kubeprov",
            "apply",
            "--config",
            "kubeprov.json",
            "https://example.com/a.yaml",
            "extra.yaml",
        ])
        .expect("parse");
        match cli.command {
            Commands::Apply { config, manifests } => {
                assert_eq!(config, PathBuf::from("kubeprov.json"));
                assert_eq!(manifests.len(), 2);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_cli_validate() {
        let result = Cli::try_parse_from(["kubeprov", "validate", "kubeprov.json"]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_run_workflow_cleans_leftovers_after_failure() {
        let transport = MockTransport::new();
        transport.push_response(MockResponse::exit(2, "boom\n"));
        let (mut ctx, _) = test_context(transport.clone());

        let err = run_workflow(
            &mut ctx,
            Action::list([add_leftover("/tmp/kubeprov-state"), exec("false")]),
        )
        .unwrap_err();

        match err {
            ProvisionError::Action(err) => assert_eq!(err.exit_code(), Some(2)),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(
            transport.commands(),
            vec![
                "false 2>&1".to_string(),
                "rm -f '/tmp/kubeprov-state' 2>&1".to_string()
            ]
        );
    }

    #[test]
    fn test_script_workflow_missing_file() {
        let err = script_workflow(Path::new("/no/such/script.sh")).unwrap_err();
        assert!(matches!(err, ProvisionError::Io(_)));
    }

    #[test]
    fn test_run_check_binary() {
        let transport = MockTransport::new();
        transport.push_response(MockResponse::output("kubeadm\n"));
        let (mut ctx, _) = test_context(transport);

        let check = CheckCommands::Binary {
            name: "kubeadm".to_string(),
        };
        assert!(run_check(&mut ctx, &check.checker()).expect("check"));
    }

    #[test]
    fn test_run_check_failure_is_an_action_error() {
        let transport = MockTransport::new();
        transport.push_response(MockResponse::connection_lost("reset by peer"));
        let (mut ctx, _) = test_context(transport);

        let check = CheckCommands::File {
            path: "/etc/kubernetes/admin.conf".to_string(),
        };
        let err = run_check(&mut ctx, &check.checker()).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Action(ActionError::Check { .. })
        ));
    }
}
