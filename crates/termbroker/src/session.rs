//! Session lifecycle, worker threads, and request execution.
//!
//! A [`Session`] is an exclusive-access scope over a set of console streams.
//! Callers enqueue typed requests from any thread or async task; a single
//! worker thread owned by the session pops them in FIFO order and executes
//! them one at a time, so the buffer and streams are never touched
//! concurrently. Opening a subsession hands the streams to the child until
//! it closes, giving nested scopes the semantics of a recursive critical
//! section.

use std::fmt;
use std::io;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::Duration;

use crate::error::BrokerError;
use crate::promise::{self, Promise, Resolver};
use crate::queue::RequestQueue;
use crate::request::{join_parts, Request};
use crate::stream::{InputStream, OutputStream, PasswordPrompt};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-session overrides for [`Session::subsession`]. Unset fields inherit
/// the parent's resolved value.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Flush after every write.
    pub autoflush: Option<bool>,
    pub input: Option<Arc<dyn InputStream>>,
    pub output: Option<Arc<dyn OutputStream>>,
    pub error: Option<Arc<dyn OutputStream>>,
    /// Hidden-input capability used by `password`.
    pub password: Option<Arc<dyn PasswordPrompt>>,
    /// How long an idle worker lingers before exiting.
    pub idle_grace: Option<Duration>,
}

/// Options for `write_with` / `write_line_with`.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Separator joined between parts.
    pub sep: String,
    /// Target the error stream instead of the output stream.
    pub to_stderr: bool,
    /// Override the session's autoflush setting for this write only.
    pub autoflush: Option<bool>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            sep: " ".to_string(),
            to_stderr: false,
            autoflush: None,
        }
    }
}

/// Fires exactly once, when the session closes. Observable by the parent
/// worker and any number of `wait()` callers.
struct CloseSignal {
    closed: Mutex<bool>,
    cond: Condvar,
}

impl CloseSignal {
    fn new() -> Self {
        Self {
            closed: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn set(&self) {
        if let Ok(mut closed) = self.closed.lock() {
            *closed = true;
            self.cond.notify_all();
        }
    }

    fn is_set(&self) -> bool {
        match self.closed.lock() {
            Ok(closed) => *closed,
            Err(_) => true,
        }
    }

    fn wait(&self) {
        let closed = match self.closed.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        let _unused = self.cond.wait_while(closed, |closed| !*closed);
    }
}

/// What the worker should do after executing one request.
enum Flow {
    Continue,
    /// An interrupt surfaced mid-request; stop processing immediately.
    Interrupted,
}

struct SessionInner {
    id: u64,
    /// Back-reference for subsession registration checks; `None` for the
    /// root session. Non-owning.
    parent: Option<Weak<SessionInner>>,
    autoflush: bool,
    idle_grace: Duration,
    input: Arc<dyn InputStream>,
    output: Arc<dyn OutputStream>,
    error: Arc<dyn OutputStream>,
    password: Arc<dyn PasswordPrompt>,
    /// Unconsumed input text. Only the worker touches this.
    buffer: Mutex<String>,
    pending: RequestQueue,
    /// The one open child, owned exclusively while open.
    subsession: Mutex<Option<Session>>,
    /// Whether a worker thread is currently live for this session.
    worker_live: Mutex<bool>,
    closed: CloseSignal,
}

/// Handle to one broker session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("root", &self.inner.parent.is_none())
            .field("closed", &self.inner.closed.is_set())
            .finish()
    }
}

impl Session {
    pub(crate) fn new_root(
        autoflush: bool,
        idle_grace: Duration,
        input: Arc<dyn InputStream>,
        output: Arc<dyn OutputStream>,
        error: Arc<dyn OutputStream>,
        password: Arc<dyn PasswordPrompt>,
    ) -> Session {
        Session {
            inner: Arc::new(SessionInner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                parent: None,
                autoflush,
                idle_grace,
                input,
                output,
                error,
                password,
                buffer: Mutex::new(String::new()),
                pending: RequestQueue::new(),
                subsession: Mutex::new(None),
                worker_live: Mutex::new(false),
                closed: CloseSignal::new(),
            }),
        }
    }

    /// Build a child whose unset config fields inherit the parent's
    /// resolved values.
    fn new_child(parent: &Arc<SessionInner>, config: SessionConfig) -> Session {
        Session {
            inner: Arc::new(SessionInner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                parent: Some(Arc::downgrade(parent)),
                autoflush: config.autoflush.unwrap_or(parent.autoflush),
                idle_grace: config.idle_grace.unwrap_or(parent.idle_grace),
                input: config.input.unwrap_or_else(|| Arc::clone(&parent.input)),
                output: config.output.unwrap_or_else(|| Arc::clone(&parent.output)),
                error: config.error.unwrap_or_else(|| Arc::clone(&parent.error)),
                password: config
                    .password
                    .unwrap_or_else(|| Arc::clone(&parent.password)),
                buffer: Mutex::new(String::new()),
                pending: RequestQueue::new(),
                subsession: Mutex::new(None),
                worker_live: Mutex::new(false),
                closed: CloseSignal::new(),
            }),
        }
    }

    /// Read at most `n` characters from the buffer, refilling once from the
    /// input stream if the buffer is empty. A short refill yields a short
    /// result; this never loops waiting for more input.
    pub fn read(&self, n: usize) -> Promise<String> {
        let (resolver, promise) = promise::channel();
        self.commit(Request::Read {
            n,
            promise: resolver,
        });
        promise
    }

    /// Read the entire buffer content, refilling once if it is empty.
    pub fn read_all(&self) -> Promise<String> {
        let (resolver, promise) = promise::channel();
        self.commit(Request::ReadAll { promise: resolver });
        promise
    }

    /// Read up to and including the first newline after at most one refill;
    /// without a newline, the whole remaining buffer.
    pub fn read_line(&self) -> Promise<String> {
        let (resolver, promise) = promise::channel();
        self.commit(Request::ReadLine { promise: resolver });
        promise
    }

    /// Prompt on the error stream and capture one line without echo.
    pub fn password(&self, prompt: &str) -> Promise<String> {
        let (resolver, promise) = promise::channel();
        self.commit(Request::Password {
            prompt: prompt.to_string(),
            promise: resolver,
        });
        promise
    }

    /// Write `parts` joined with spaces to the output stream. Resolves to
    /// the number of characters written.
    pub fn write<I>(&self, parts: I) -> Promise<usize>
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        self.write_with(parts, WriteOptions::default())
    }

    /// `write` with an explicit separator, stream selection, or autoflush
    /// override.
    pub fn write_with<I>(&self, parts: I, opts: WriteOptions) -> Promise<usize>
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        let msg = join_parts(parts, &opts.sep);
        self.commit_write(msg, opts)
    }

    /// `write` with a trailing newline.
    pub fn write_line<I>(&self, parts: I) -> Promise<usize>
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        self.write_line_with(parts, WriteOptions::default())
    }

    /// `write_line` with an explicit separator, stream selection, or
    /// autoflush override.
    pub fn write_line_with<I>(&self, parts: I, opts: WriteOptions) -> Promise<usize>
    where
        I: IntoIterator,
        I::Item: fmt::Display,
    {
        let mut msg = join_parts(parts, &opts.sep);
        msg.push('\n');
        self.commit_write(msg, opts)
    }

    fn commit_write(&self, msg: String, opts: WriteOptions) -> Promise<usize> {
        let (resolver, promise) = promise::channel();
        self.commit(Request::Write {
            msg,
            to_stderr: opts.to_stderr,
            autoflush: opts.autoflush.unwrap_or(self.inner.autoflush),
            promise: resolver,
        });
        promise
    }

    /// Flush the selected stream(s).
    pub fn flush(&self, output: bool, error: bool) -> Promise<()> {
        let (resolver, promise) = promise::channel();
        self.commit(Request::Flush {
            output,
            error,
            promise: resolver,
        });
        promise
    }

    /// Open a child session inheriting unset config fields.
    ///
    /// The promise resolves with the child handle as soon as the worker
    /// reaches this request, not when the child closes. From that moment
    /// until the child closes, this session's worker is paused: requests
    /// enqueued before the open drain first, requests enqueued after wait
    /// behind the child's entire lifetime.
    pub fn subsession(&self, config: SessionConfig) -> Promise<Session> {
        let child = Session::new_child(&self.inner, config);
        let (resolver, promise) = promise::channel();
        self.commit(Request::OpenSubsession {
            child,
            promise: resolver,
        });
        promise
    }

    /// Close this session: discard queued-but-unexecuted requests and fire
    /// the completion signal, waking the parent worker and any `wait()`
    /// callers. Discarded requests settle their promises as abandoned.
    ///
    /// Fails on the root session, which lives as long as the broker.
    pub fn close(&self) -> Result<(), BrokerError> {
        if self.inner.parent.is_none() {
            return Err(BrokerError::InvalidState(
                "cannot close the root session".to_string(),
            ));
        }
        let dropped = self.inner.pending.clear();
        if dropped > 0 {
            log::debug!(
                "session {}: dropping {dropped} queued requests on close",
                self.inner.id
            );
        }
        self.inner.closed.set();
        Ok(())
    }

    /// Block the calling thread until this session closes.
    pub fn wait(&self) {
        self.inner.closed.wait();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_set()
    }

    /// The session's resolved autoflush setting.
    pub fn autoflush(&self) -> bool {
        self.inner.autoflush
    }

    /// Claim this session as the caller's current scope.
    ///
    /// Only the exact session returned by the parent's `subsession` call
    /// can be entered, and only while it is still the parent's active
    /// subsession. Dropping the guard closes the session.
    pub fn enter(&self) -> Result<SessionGuard, BrokerError> {
        let parent = match &self.inner.parent {
            Some(weak) => weak.upgrade().ok_or_else(|| {
                BrokerError::InvalidState("parent session no longer exists".to_string())
            })?,
            None => {
                return Err(BrokerError::InvalidState(
                    "cannot enter the root session".to_string(),
                ))
            }
        };

        let registered = match parent.subsession.lock() {
            Ok(active) => active
                .as_ref()
                .map_or(false, |s| Arc::ptr_eq(&s.inner, &self.inner)),
            Err(_) => false,
        };
        if !registered {
            return Err(BrokerError::InvalidState(
                "session is not its parent's active subsession".to_string(),
            ));
        }

        Ok(SessionGuard {
            session: self.clone(),
        })
    }

    /// Enqueue a request and make sure a worker is alive to serve it.
    fn commit(&self, req: Request) {
        self.inner.pending.push(req);
        SessionInner::ensure_worker(&self.inner);
    }
}

/// Scoped-use guard returned by [`Session::enter`]. Closes the session on
/// drop.
pub struct SessionGuard {
    session: Session,
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let _ = self.session.close();
    }
}

impl SessionInner {
    /// Spawn the worker thread unless one is already live. The flag flips
    /// back under the same lock on the exit path, so a concurrent enqueue
    /// either sees the live worker or spawns a fresh one.
    fn ensure_worker(inner: &Arc<SessionInner>) {
        let mut live = match inner.worker_live.lock() {
            Ok(live) => live,
            Err(_) => return,
        };
        if *live {
            return;
        }
        *live = true;

        let worker = Arc::clone(inner);
        thread::Builder::new()
            .name(format!("session-worker-{}", inner.id))
            .spawn(move || run_worker(worker))
            .expect("failed to spawn session worker");
    }

    /// Execute one request against the session's buffer and streams.
    fn execute(&self, req: Request) -> Flow {
        match req {
            Request::Read { n, promise } => self.execute_read(promise, move |buffer| {
                match buffer.char_indices().nth(n) {
                    Some((idx, _)) => {
                        let rest = buffer.split_off(idx);
                        std::mem::replace(buffer, rest)
                    }
                    None => std::mem::take(buffer),
                }
            }),
            Request::ReadAll { promise } => self.execute_read(promise, std::mem::take),
            Request::ReadLine { promise } => {
                self.execute_read(promise, |buffer| match buffer.find('\n') {
                    Some(idx) => {
                        let rest = buffer.split_off(idx + 1);
                        std::mem::replace(buffer, rest)
                    }
                    None => std::mem::take(buffer),
                })
            }
            Request::Password { prompt, promise } => {
                match self.password.read_password(&prompt, self.error.as_ref()) {
                    Ok(line) => {
                        promise.resolve(line);
                        Flow::Continue
                    }
                    Err(err) => self.fail(promise, err),
                }
            }
            Request::Write {
                msg,
                to_stderr,
                autoflush,
                promise,
            } => {
                let stream = if to_stderr { &self.error } else { &self.output };
                let result = stream.write_str(&msg).and_then(|written| {
                    if autoflush {
                        stream.flush()?;
                    }
                    Ok(written)
                });
                match result {
                    Ok(written) => {
                        promise.resolve(written);
                        Flow::Continue
                    }
                    Err(err) => self.fail(promise, err),
                }
            }
            Request::Flush {
                output,
                error,
                promise,
            } => {
                let result = self.flush_streams(output, error);
                match result {
                    Ok(()) => {
                        promise.resolve(());
                        Flow::Continue
                    }
                    Err(err) => self.fail(promise, err),
                }
            }
            Request::OpenSubsession { child, promise } => {
                if let Ok(mut slot) = self.subsession.lock() {
                    *slot = Some(child.clone());
                }
                log::debug!("session {}: opened subsession {}", self.id, child.inner.id);
                promise.resolve(child.clone());

                // The child owns the streams now; resume only once it closes.
                child.wait();

                if let Ok(mut slot) = self.subsession.lock() {
                    *slot = None;
                }
                log::debug!("session {}: subsession {} closed", self.id, child.inner.id);
                Flow::Continue
            }
        }
    }

    /// Shared body of the read variants: refill the buffer once if empty,
    /// then let `take` slice its result out of it.
    fn execute_read<F>(&self, promise: Resolver<String>, take: F) -> Flow
    where
        F: FnOnce(&mut String) -> String,
    {
        let mut buffer = match self.buffer.lock() {
            Ok(buffer) => buffer,
            Err(_) => {
                promise.reject(BrokerError::InvalidState(
                    "session buffer poisoned".to_string(),
                ));
                return Flow::Continue;
            }
        };
        if buffer.is_empty() {
            match self.input.read_line() {
                Ok(line) => buffer.push_str(&line),
                Err(err) => return self.fail(promise, err),
            }
        }
        promise.resolve(take(&mut buffer));
        Flow::Continue
    }

    fn flush_streams(&self, output: bool, error: bool) -> io::Result<()> {
        if output {
            self.output.flush()?;
        }
        if error {
            self.error.flush()?;
        }
        Ok(())
    }

    /// Settle a failed request. An interrupt is the operator terminating
    /// the process: it abandons the promise and stops the worker instead
    /// of becoming a caller-recoverable rejection.
    fn fail<T>(&self, promise: Resolver<T>, err: io::Error) -> Flow {
        if err.kind() == io::ErrorKind::Interrupted {
            log::warn!("session {}: interrupted mid-request, stopping worker", self.id);
            promise.abandon();
            Flow::Interrupted
        } else {
            promise.reject(BrokerError::Io(err));
            Flow::Continue
        }
    }
}

/// The session worker loop: drain the queue in FIFO order, then linger for
/// the idle grace period before exiting.
fn run_worker(inner: Arc<SessionInner>) {
    log::debug!("session {}: worker started", inner.id);

    // A freshly spawned worker may find a child already open (its
    // predecessor was interrupted mid-lifetime). Stay off the queue until
    // the child closes.
    loop {
        let child = match inner.subsession.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        match child {
            Some(child) => child.wait(),
            None => break,
        }
    }

    loop {
        match inner.pending.pop(inner.idle_grace) {
            Some(req) => {
                if let Flow::Interrupted = inner.execute(req) {
                    if let Ok(mut live) = inner.worker_live.lock() {
                        *live = false;
                    }
                    return;
                }
            }
            None => {
                // Re-check under the worker-slot lock so an enqueue racing
                // the timeout either sees this worker or spawns a new one.
                let mut live = match inner.worker_live.lock() {
                    Ok(live) => live,
                    Err(_) => return,
                };
                if inner.pending.is_empty() {
                    *live = false;
                    log::debug!("session {}: worker idle, exiting", inner.id);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{BufferInput, BufferOutput};
    use std::fmt::Display;
    use std::io::ErrorKind;
    use std::time::Instant;

    struct FakePrompt {
        reply: String,
    }

    impl PasswordPrompt for FakePrompt {
        fn read_password(&self, prompt: &str, error: &dyn OutputStream) -> io::Result<String> {
            error.write_str(prompt)?;
            Ok(self.reply.clone())
        }
    }

    struct FailingInput {
        kind: ErrorKind,
    }

    impl InputStream for FailingInput {
        fn read_line(&self) -> io::Result<String> {
            Err(io::Error::new(self.kind, "stream fault"))
        }
    }

    struct Fixture {
        session: Session,
        input: BufferInput,
        output: BufferOutput,
        error: BufferOutput,
    }

    fn fixture() -> Fixture {
        let input = BufferInput::new();
        let output = BufferOutput::new();
        let error = BufferOutput::new();
        let session = Session::new_root(
            true,
            Duration::from_millis(10),
            Arc::new(input.clone()),
            Arc::new(output.clone()),
            Arc::new(error.clone()),
            Arc::new(FakePrompt {
                reply: "hunter2".to_string(),
            }),
        );
        Fixture {
            session,
            input,
            output,
            error,
        }
    }

    #[test]
    fn test_write_joins_with_spaces() {
        let fx = fixture();
        let parts: [&dyn Display; 4] = [&"test", &1, &2, &3];
        fx.session.write(parts).blocking_wait().unwrap();
        let parts: [&dyn Display; 3] = [&",", &123, &456];
        fx.session.write(parts).blocking_wait().unwrap();
        assert_eq!(fx.output.take(), "test 1 2 3, 123 456");
    }

    #[test]
    fn test_write_line_appends_newline() {
        let fx = fixture();
        let parts: [&dyn Display; 4] = [&"test", &1, &2, &3];
        fx.session.write_line(parts).blocking_wait().unwrap();
        fx.session
            .write_line_with(
                [123, 456, 789],
                WriteOptions {
                    sep: "_".to_string(),
                    ..Default::default()
                },
            )
            .blocking_wait()
            .unwrap();
        assert_eq!(fx.output.take(), "test 1 2 3\n123_456_789\n");
    }

    #[test]
    fn test_write_reports_character_count() {
        let fx = fixture();
        let written = fx.session.write(["héllo"]).blocking_wait().unwrap();
        assert_eq!(written, 5);
    }

    #[test]
    fn test_write_to_error_stream() {
        let fx = fixture();
        fx.session
            .write_with(
                ["oops"],
                WriteOptions {
                    to_stderr: true,
                    ..Default::default()
                },
            )
            .blocking_wait()
            .unwrap();
        assert_eq!(fx.output.contents(), "");
        assert_eq!(fx.error.take(), "oops");
    }

    #[test]
    fn test_writes_observed_in_enqueue_order() {
        let fx = fixture();
        let promises: Vec<_> = (0..50).map(|i| fx.session.write([i])).collect();
        for promise in promises {
            promise.blocking_wait().unwrap();
        }
        let expected: String = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(fx.output.take(), expected);
    }

    #[test]
    fn test_read_caps_at_n_and_single_refill() {
        let fx = fixture();
        fx.input.push("test");
        assert_eq!(fx.session.read(2).blocking_wait().unwrap(), "te");
        assert_eq!(fx.session.read(2).blocking_wait().unwrap(), "st");
    }

    #[test]
    fn test_read_short_result_when_refill_is_short() {
        let fx = fixture();
        fx.input.push("ab");
        assert_eq!(fx.session.read(10).blocking_wait().unwrap(), "ab");
    }

    #[test]
    fn test_read_respects_char_boundaries() {
        let fx = fixture();
        fx.input.push("héllo");
        assert_eq!(fx.session.read(2).blocking_wait().unwrap(), "hé");
        assert_eq!(fx.session.read(3).blocking_wait().unwrap(), "llo");
    }

    #[test]
    fn test_read_all_drains_buffer() {
        let fx = fixture();
        fx.input.push("everything here");
        assert_eq!(
            fx.session.read_all().blocking_wait().unwrap(),
            "everything here"
        );
    }

    #[test]
    fn test_read_line_splits_at_newline() {
        let fx = fixture();
        fx.input.push("test\n123\n456");
        assert_eq!(fx.session.read_line().blocking_wait().unwrap(), "test\n");
        assert_eq!(fx.session.read_line().blocking_wait().unwrap(), "123\n");
        assert_eq!(fx.input.remaining(), "456");
    }

    #[test]
    fn test_read_line_without_newline_returns_rest() {
        let fx = fixture();
        fx.input.push("no newline here");
        assert_eq!(
            fx.session.read_line().blocking_wait().unwrap(),
            "no newline here"
        );
    }

    #[test]
    fn test_password_prompts_on_error_stream() {
        let fx = fixture();
        let secret = fx.session.password("Secret: ").blocking_wait().unwrap();
        assert_eq!(secret, "hunter2");
        assert_eq!(fx.error.take(), "Secret: ");
        assert_eq!(fx.output.contents(), "");
    }

    #[test]
    fn test_close_root_is_invalid() {
        let fx = fixture();
        assert!(matches!(
            fx.session.close(),
            Err(BrokerError::InvalidState(_))
        ));
    }

    #[test]
    fn test_enter_root_is_invalid() {
        let fx = fixture();
        assert!(matches!(
            fx.session.enter(),
            Err(BrokerError::InvalidState(_))
        ));
    }

    #[test]
    fn test_subsession_gates_later_parent_requests() {
        let fx = fixture();
        let first = fx.session.write(["A"]);
        let sub = fx
            .session
            .subsession(SessionConfig::default())
            .blocking_wait()
            .unwrap();
        first.blocking_wait().unwrap();

        // Enqueued after the open: must wait for the child's whole lifetime.
        let gated = fx.session.write(["C"]);
        sub.write(["B"]).blocking_wait().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(fx.output.contents(), "AB");

        sub.close().unwrap();
        gated.blocking_wait().unwrap();
        assert_eq!(fx.output.take(), "ABC");
    }

    #[test]
    fn test_subsessions_nest() {
        let fx = fixture();
        let sub = fx
            .session
            .subsession(SessionConfig::default())
            .blocking_wait()
            .unwrap();
        let subsub = sub
            .subsession(SessionConfig::default())
            .blocking_wait()
            .unwrap();

        subsub.write(["inner"]).blocking_wait().unwrap();
        let gated = sub.write(["outer"]);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(fx.output.contents(), "inner");

        subsub.close().unwrap();
        gated.blocking_wait().unwrap();
        sub.close().unwrap();
        assert_eq!(fx.output.take(), "innerouter");
    }

    #[test]
    fn test_enter_registered_subsession() {
        let fx = fixture();
        let sub = fx
            .session
            .subsession(SessionConfig::default())
            .blocking_wait()
            .unwrap();
        {
            let guard = sub.enter().unwrap();
            guard.write(["scoped"]).blocking_wait().unwrap();
        }
        // Dropping the guard closed the child.
        assert!(sub.is_closed());
        assert_eq!(fx.output.take(), "scoped");
    }

    #[test]
    fn test_enter_closed_subsession_is_invalid() {
        let fx = fixture();
        let sub = fx
            .session
            .subsession(SessionConfig::default())
            .blocking_wait()
            .unwrap();
        sub.close().unwrap();

        // Parent worker clears the slot once the child's signal fires.
        thread::sleep(Duration::from_millis(50));
        assert!(matches!(sub.enter(), Err(BrokerError::InvalidState(_))));
    }

    #[test]
    fn test_close_abandons_queued_requests() {
        let fx = fixture();
        let sub = fx
            .session
            .subsession(SessionConfig::default())
            .blocking_wait()
            .unwrap();
        // Block the child's worker behind a grandchild, then queue work.
        let inner = sub
            .subsession(SessionConfig::default())
            .blocking_wait()
            .unwrap();
        let stranded = sub.write(["never"]);

        sub.close().unwrap();
        assert!(matches!(
            stranded.blocking_wait(),
            Err(BrokerError::Abandoned)
        ));
        assert!(!fx.output.contents().contains("never"));
        inner.close().unwrap();
    }

    #[test]
    fn test_wait_unblocks_on_close() {
        let fx = fixture();
        let sub = fx
            .session
            .subsession(SessionConfig::default())
            .blocking_wait()
            .unwrap();
        assert!(!sub.is_closed());

        let waiter = sub.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || waiter.wait());
        thread::sleep(Duration::from_millis(30));
        sub.close().unwrap();
        handle.join().unwrap();

        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(sub.is_closed());
    }

    #[test]
    fn test_config_inheritance() {
        let fx = fixture();
        let inherits = fx
            .session
            .subsession(SessionConfig::default())
            .blocking_wait()
            .unwrap();
        assert!(inherits.autoflush());
        inherits.close().unwrap();
        thread::sleep(Duration::from_millis(50));

        let overridden = fx
            .session
            .subsession(SessionConfig {
                autoflush: Some(false),
                ..Default::default()
            })
            .blocking_wait()
            .unwrap();
        assert!(!overridden.autoflush());
        overridden.close().unwrap();
    }

    #[test]
    fn test_stream_override_routes_child_output() {
        let fx = fixture();
        let side = BufferOutput::new();
        let sub = fx
            .session
            .subsession(SessionConfig {
                output: Some(Arc::new(side.clone())),
                ..Default::default()
            })
            .blocking_wait()
            .unwrap();
        sub.write(["diverted"]).blocking_wait().unwrap();
        sub.close().unwrap();

        assert_eq!(side.take(), "diverted");
        assert_eq!(fx.output.contents(), "");
    }

    #[test]
    fn test_stream_fault_rejects_promise_and_worker_continues() {
        let output = BufferOutput::new();
        let session = Session::new_root(
            true,
            Duration::from_millis(10),
            Arc::new(FailingInput {
                kind: ErrorKind::Other,
            }),
            Arc::new(output.clone()),
            Arc::new(BufferOutput::new()),
            Arc::new(FakePrompt {
                reply: String::new(),
            }),
        );

        assert!(matches!(
            session.read(4).blocking_wait(),
            Err(BrokerError::Io(_))
        ));
        // The worker survives an operation failure.
        session.write(["still alive"]).blocking_wait().unwrap();
        assert_eq!(output.take(), "still alive");
    }

    #[test]
    fn test_interrupt_abandons_request_and_stops_worker() {
        let output = BufferOutput::new();
        let session = Session::new_root(
            true,
            Duration::from_millis(10),
            Arc::new(FailingInput {
                kind: ErrorKind::Interrupted,
            }),
            Arc::new(output.clone()),
            Arc::new(BufferOutput::new()),
            Arc::new(FakePrompt {
                reply: String::new(),
            }),
        );

        let interrupted = session.read(4);
        let queued = session.write(["after"]);
        assert!(matches!(
            interrupted.blocking_wait(),
            Err(BrokerError::Abandoned)
        ));

        // The queued request stays queued until the next enqueue revives a
        // worker; then both drain in order.
        thread::sleep(Duration::from_millis(50));
        session.write([" more"]).blocking_wait().unwrap();
        queued.blocking_wait().unwrap();
        assert_eq!(output.take(), "after more");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_promises_awaitable_from_async_tasks() {
        let fx = fixture();
        let session = fx.session.clone();
        let writer = tokio::spawn(async move {
            session.write_line(["from a task"]).await.unwrap();
        });
        writer.await.unwrap();
        assert_eq!(fx.output.take(), "from a task\n");
    }
}
