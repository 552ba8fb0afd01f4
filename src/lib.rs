//! kubeprov library
//!
//! Provisioning workflows are built as trees of [`Action`]s and evaluated
//! against a [`Context`] that owns the transport to the target node.

pub mod action;
pub mod addons;
pub mod checker;
pub mod checks;
pub mod cli;
pub mod combinators;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod files;
pub mod kubectl;
pub mod manifest;
pub mod process_guard;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use action::Action;
pub use checker::Checker;
pub use combinators::{
    RetryPolicy, if_else, if_then, message_info, message_warn, retry, try_action, with_cleanup,
    with_exec_output,
};
pub use config::ProvisionConfig;
pub use context::{CaptureSink, Context, NullSink, OutputSink, StdoutSink, TracingSink};
pub use error::{ActionError, ProvisionError};
pub use kubectl::RemoteKubectl;
pub use manifest::Manifest;
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use transport::{LocalShellTransport, Transport, TransportError};
