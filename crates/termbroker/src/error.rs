/// Errors from broker operations.
///
/// Invalid-state errors are returned synchronously from the call site;
/// I/O errors travel back through the request's promise.
#[derive(Debug)]
pub enum BrokerError {
    /// The operation is not legal for the session's current state, e.g.
    /// closing the root session or entering an unregistered subsession.
    InvalidState(String),
    /// A stream fault while the request executed.
    Io(std::io::Error),
    /// The request was dropped without ever executing: its session was
    /// closed while the request was still queued, or the worker was
    /// interrupted mid-request.
    Abandoned,
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::InvalidState(msg) => write!(f, "invalid session state: {msg}"),
            BrokerError::Io(err) => write!(f, "stream I/O error: {err}"),
            BrokerError::Abandoned => write!(f, "request abandoned before completion"),
        }
    }
}

impl std::error::Error for BrokerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrokerError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        BrokerError::Io(err)
    }
}
