/// Core error type for the ingestion engine.
///
/// Adapter crates map their specific errors into this type so the poll loops
/// can decide between "back off and retry" and "log and drop".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The upstream API answered, but with a structured failure.
    #[error("api error {code}: {description}")]
    Api { code: i32, description: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("identity resolution failed: {0}")]
    Identity(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Failures that are retried through the poll loop's backoff state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Api { .. } | Error::Network(_) | Error::MalformedResponse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_transient() {
        assert!(Error::Network("reset".into()).is_transient());
        assert!(Error::MalformedResponse("null".into()).is_transient());
        assert!(Error::Api {
            code: 502,
            description: "Bad Gateway".into()
        }
        .is_transient());
        assert!(!Error::Storage("disk full".into()).is_transient());
        assert!(!Error::Config("missing".into()).is_transient());
    }
}
