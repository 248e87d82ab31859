//! Stream capability contracts and their standard implementations.
//!
//! The broker core never touches `stdin`/`stdout` directly; it speaks to
//! these traits. [`StdinStream`], [`StdoutStream`] and [`StderrStream`] wrap
//! the real process streams, while [`BufferInput`] and [`BufferOutput`] are
//! in-memory implementations for capturing a session's traffic (and for
//! tests).

use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex};

/// Produces one line of available input text per call.
///
/// A call may block the invoking (worker) thread until input arrives. The
/// returned line includes its trailing newline when one was read; an empty
/// string signals end of input.
pub trait InputStream: Send + Sync {
    fn read_line(&self) -> io::Result<String>;
}

/// Accepts text and can be flushed.
///
/// `write_str` returns the number of characters written.
pub trait OutputStream: Send + Sync {
    fn write_str(&self, text: &str) -> io::Result<usize>;
    fn flush(&self) -> io::Result<()>;
}

/// Captures one line of unechoed input from the controlling terminal.
///
/// The prompt is written to the session's error stream before reading, so
/// redirected output does not swallow it.
pub trait PasswordPrompt: Send + Sync {
    fn read_password(&self, prompt: &str, error: &dyn OutputStream) -> io::Result<String>;
}

/// The real process standard input.
pub struct StdinStream;

impl InputStream for StdinStream {
    fn read_line(&self) -> io::Result<String> {
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        Ok(line)
    }
}

/// The real process standard output.
pub struct StdoutStream;

impl OutputStream for StdoutStream {
    fn write_str(&self, text: &str) -> io::Result<usize> {
        let mut out = io::stdout().lock();
        out.write_all(text.as_bytes())?;
        Ok(text.chars().count())
    }

    fn flush(&self) -> io::Result<()> {
        io::stdout().lock().flush()
    }
}

/// The real process standard error.
pub struct StderrStream;

impl OutputStream for StderrStream {
    fn write_str(&self, text: &str) -> io::Result<usize> {
        let mut err = io::stderr().lock();
        err.write_all(text.as_bytes())?;
        Ok(text.chars().count())
    }

    fn flush(&self) -> io::Result<()> {
        io::stderr().lock().flush()
    }
}

/// Hidden-input capability backed by the controlling terminal.
pub struct TtyPasswordPrompt;

impl PasswordPrompt for TtyPasswordPrompt {
    fn read_password(&self, prompt: &str, error: &dyn OutputStream) -> io::Result<String> {
        error.write_str(prompt)?;
        error.flush()?;
        rpassword::read_password()
    }
}

/// In-memory output stream; clones share the same buffer.
#[derive(Clone, Default)]
pub struct BufferOutput {
    inner: Arc<Mutex<String>>,
}

impl BufferOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// The text written so far.
    pub fn contents(&self) -> String {
        match self.inner.lock() {
            Ok(buf) => buf.clone(),
            Err(_) => String::new(),
        }
    }

    /// Drain and return the text written so far.
    pub fn take(&self) -> String {
        match self.inner.lock() {
            Ok(mut buf) => std::mem::take(&mut *buf),
            Err(_) => String::new(),
        }
    }
}

impl OutputStream for BufferOutput {
    fn write_str(&self, text: &str) -> io::Result<usize> {
        let mut buf = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "output buffer poisoned"))?;
        buf.push_str(text);
        Ok(text.chars().count())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

struct BufferInputState {
    data: String,
    eof: bool,
}

/// In-memory input stream; `read_line` blocks until text is pushed or the
/// stream is closed. Clones share the same buffer.
#[derive(Clone)]
pub struct BufferInput {
    state: Arc<(Mutex<BufferInputState>, Condvar)>,
}

impl BufferInput {
    pub fn new() -> Self {
        Self {
            state: Arc::new((
                Mutex::new(BufferInputState {
                    data: String::new(),
                    eof: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Append input text and wake any blocked reader.
    pub fn push(&self, text: &str) {
        let (lock, cond) = &*self.state;
        if let Ok(mut state) = lock.lock() {
            state.data.push_str(text);
            cond.notify_all();
        }
    }

    /// Mark end of input; blocked and future reads return an empty line
    /// once the buffer drains.
    pub fn close(&self) {
        let (lock, cond) = &*self.state;
        if let Ok(mut state) = lock.lock() {
            state.eof = true;
            cond.notify_all();
        }
    }

    /// The text not yet consumed by `read_line`.
    pub fn remaining(&self) -> String {
        let (lock, _) = &*self.state;
        match lock.lock() {
            Ok(state) => state.data.clone(),
            Err(_) => String::new(),
        }
    }
}

impl Default for BufferInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputStream for BufferInput {
    fn read_line(&self) -> io::Result<String> {
        let (lock, cond) = &*self.state;
        let guard = lock
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "input buffer poisoned"))?;
        let mut state = cond
            .wait_while(guard, |state| state.data.is_empty() && !state.eof)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "input buffer poisoned"))?;

        // One line per call: up to and including the first newline, or
        // everything that is buffered when no newline is present.
        let line = match state.data.find('\n') {
            Some(idx) => {
                let rest = state.data.split_off(idx + 1);
                std::mem::replace(&mut state.data, rest)
            }
            None => std::mem::take(&mut state.data),
        };
        Ok(line)
    }
}
