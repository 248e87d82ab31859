//! termbroker: serialized, promise-based access to shared console streams.
//!
//! Many concurrently scheduled tasks — OS threads, async tasks, or any mix —
//! can issue reads and writes against the same console without interleaving:
//! every operation on a session is queued and executed in submission order
//! by that session's single worker thread, and the result travels back to
//! the caller through a one-shot promise it can await from its own
//! scheduling context.
//!
//! # Architecture
//!
//! - [`Broker`] — The explicit process-scoped root context; owns the root
//!   session over the real process streams.
//! - [`Session`] — An exclusive-access scope with its own input buffer,
//!   request queue, and lazily spawned worker thread. Subsessions nest:
//!   while a child is open, the parent's own processing is paused.
//! - [`Promise`] — The outcome handle for one queued operation; a `Future`
//!   resolved exactly once from the worker thread.
//! - [`InputStream`] / [`OutputStream`] / [`PasswordPrompt`] — Capability
//!   contracts for the streams a session arbitrates.

pub mod broker;
pub mod error;
pub mod promise;
pub mod session;
pub mod stream;

mod queue;
mod request;

pub use broker::{Broker, BrokerConfig};
pub use error::BrokerError;
pub use promise::Promise;
pub use session::{Session, SessionConfig, SessionGuard, WriteOptions};
pub use stream::{
    BufferInput, BufferOutput, InputStream, OutputStream, PasswordPrompt, StderrStream,
    StdinStream, StdoutStream, TtyPasswordPrompt,
};
