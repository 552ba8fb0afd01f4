//! Per-workflow execution state
//!
//! One [`Context`] is built at the start of a workflow and dropped at the end.
//! It is passed by `&mut` into every action, so nothing here is shared between
//! concurrent workflows.

use crate::transport::Transport;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Destination for line-oriented output.
///
/// Lines from a running command arrive from reader threads, so sinks must be
/// shareable across threads.
pub trait OutputSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Prints every line to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&self, line: &str) {
        println!("{}", line);
    }
}

/// Forwards every line as a tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn emit(&self, line: &str) {
        info!(target: "kubeprov::output", "{}", line);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn emit(&self, _line: &str) {}
}

/// Keeps every line in memory.
///
/// Checkers run their probe commands into one of these instead of the live
/// output; tests use it to assert on what a workflow printed.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// All captured lines joined with newlines
    pub fn contents(&self) -> String {
        self.lines().join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().map(|lines| lines.is_empty()).unwrap_or(true)
    }
}

impl OutputSink for CaptureSink {
    fn emit(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

/// Mutable state for one workflow invocation
pub struct Context {
    transport: Arc<dyn Transport>,
    sudo: bool,
    user_output: Arc<dyn OutputSink>,
    exec_output: Arc<dyn OutputSink>,
    check_cache: HashMap<String, bool>,
    leftovers: Vec<String>,
}

impl Context {
    /// Create a context that prints user messages and command output to stdout
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sudo: false,
            user_output: Arc::new(StdoutSink),
            exec_output: Arc::new(StdoutSink),
            check_cache: HashMap::new(),
            leftovers: Vec::new(),
        }
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn with_user_output(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.user_output = sink;
        self
    }

    pub fn with_exec_output(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.exec_output = sink;
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn sudo(&self) -> bool {
        self.sudo
    }

    pub fn user_output(&self) -> &Arc<dyn OutputSink> {
        &self.user_output
    }

    pub fn exec_output(&self) -> &Arc<dyn OutputSink> {
        &self.exec_output
    }

    /// Swap the exec output sink, returning the previous one
    pub fn replace_exec_output(&mut self, sink: Arc<dyn OutputSink>) -> Arc<dyn OutputSink> {
        std::mem::replace(&mut self.exec_output, sink)
    }

    /// Emit a progress line on the user output
    pub fn say(&self, line: &str) {
        self.user_output.emit(line);
    }

    pub fn cached_check(&self, key: &str) -> Option<bool> {
        self.check_cache.get(key).copied()
    }

    /// Store a check result. Entries are write-once: an existing value wins.
    pub fn cache_check(&mut self, key: &str, value: bool) {
        self.check_cache.entry(key.to_string()).or_insert(value);
    }

    /// Register a remote path for deletion at the end of the workflow
    pub fn add_leftover(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.leftovers.contains(&path) {
            debug!(path = %path, "registered leftover");
            self.leftovers.push(path);
        }
    }

    pub fn leftovers(&self) -> &[String] {
        &self.leftovers
    }

    /// Drain the leftover registry
    pub fn take_leftovers(&mut self) -> Vec<String> {
        std::mem::take(&mut self.leftovers)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("sudo", &self.sudo)
            .field("check_cache", &self.check_cache)
            .field("leftovers", &self.leftovers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalShellTransport;

    fn context() -> Context {
        Context::new(Arc::new(LocalShellTransport::new())).with_user_output(Arc::new(NullSink))
    }

    #[test]
    fn test_check_cache_is_write_once() {
        let mut ctx = context();
        assert_eq!(ctx.cached_check("test -f /etc/kubernetes/admin.conf"), None);

        ctx.cache_check("test -f /etc/kubernetes/admin.conf", true);
        ctx.cache_check("test -f /etc/kubernetes/admin.conf", false);
        assert_eq!(
            ctx.cached_check("test -f /etc/kubernetes/admin.conf"),
            Some(true)
        );
    }

    #[test]
    fn test_leftovers_are_deduplicated_and_drained() {
        let mut ctx = context();
        ctx.add_leftover("/tmp/a");
        ctx.add_leftover("/tmp/b");
        ctx.add_leftover("/tmp/a");
        assert_eq!(ctx.leftovers().to_vec(), vec!["/tmp/a".to_string(), "/tmp/b".to_string()]);

        let drained = ctx.take_leftovers();
        assert_eq!(drained, vec!["/tmp/a".to_string(), "/tmp/b".to_string()]);
        assert!(ctx.leftovers().is_empty());
    }

    #[test]
    fn test_capture_sink_collects_lines() {
        let sink = CaptureSink::new();
        sink.emit("one");
        sink.emit("two");
        assert_eq!(sink.contents(), "one\ntwo");
        assert!(!sink.is_empty());
    }

    #[test]
    fn test_replace_exec_output_returns_previous() {
        let capture = CaptureSink::new();
        let mut ctx = context().with_exec_output(Arc::new(capture.clone()));
        let previous = ctx.replace_exec_output(Arc::new(NullSink));
        previous.emit("routed");
        assert_eq!(capture.lines(), vec!["routed".to_string()]);
    }
}
