//! The process-scoped root context.
//!
//! A [`Broker`] is created once at startup and passed (or cloned) into
//! every component that needs console access. It owns the root session —
//! bound to the real process streams by default — and forwards the common
//! operations to it, so simple callers never touch [`Session`] directly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::promise::Promise;
use crate::session::{Session, SessionConfig, WriteOptions};
use crate::stream::{
    InputStream, OutputStream, PasswordPrompt, StderrStream, StdinStream, StdoutStream,
    TtyPasswordPrompt,
};

/// Process-wide defaults supplied by the root session.
pub struct BrokerConfig {
    /// Flush after every write. Defaults to `true`.
    pub autoflush: bool,
    /// How long an idle session worker lingers before exiting.
    pub idle_grace: Duration,
    pub input: Arc<dyn InputStream>,
    pub output: Arc<dyn OutputStream>,
    pub error: Arc<dyn OutputStream>,
    pub password: Arc<dyn PasswordPrompt>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            autoflush: true,
            idle_grace: Duration::from_millis(10),
            input: Arc::new(StdinStream),
            output: Arc::new(StdoutStream),
            error: Arc::new(StderrStream),
            password: Arc::new(TtyPasswordPrompt),
        }
    }
}

/// The root console-access context. Clones share the same root session.
#[derive(Clone)]
pub struct Broker {
    root: Session,
}

impl Broker {
    /// A broker over the real process streams with autoflush enabled.
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    pub fn with_config(config: BrokerConfig) -> Self {
        Self {
            root: Session::new_root(
                config.autoflush,
                config.idle_grace,
                config.input,
                config.output,
                config.error,
                config.password,
            ),
        }
    }

    /// The root session. It can never be closed or entered.
    pub fn root(&self) -> &Session {
        &self.root
    }

    pub fn read(&self, n: usize) -> Promise<String> {
        self.root.read(n)
    }

    pub fn read_all(&self) -> Promise<String> {
        self.root.read_all()
    }

    pub fn read_line(&self) -> Promise<String> {
        self.root.read_line()
    }

    pub fn password(&self, prompt: &str) -> Promise<String> {
        self.root.password(prompt)
    }

    pub fn write<I>(&self, parts: I) -> Promise<usize>
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        self.root.write(parts)
    }

    pub fn write_with<I>(&self, parts: I, opts: WriteOptions) -> Promise<usize>
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        self.root.write_with(parts, opts)
    }

    pub fn write_line<I>(&self, parts: I) -> Promise<usize>
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        self.root.write_line(parts)
    }

    pub fn write_line_with<I>(&self, parts: I, opts: WriteOptions) -> Promise<usize>
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        self.root.write_line_with(parts, opts)
    }

    pub fn flush(&self, output: bool, error: bool) -> Promise<()> {
        self.root.flush(output, error)
    }

    /// Open an exclusive scope over the root streams.
    pub fn subsession(&self, config: SessionConfig) -> Promise<Session> {
        self.root.subsession(config)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
