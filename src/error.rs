#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("ERR command '{0}' is not supported by proxy")]
    Forbidden(String),

    #[error("{0}")]
    Backend(String),

    #[error("ERR unsupported command '{0}'")]
    UnsupportedCommand(String),

    #[error("ERR unexpected {found} reply for '{command}'")]
    ShapeMismatch { command: String, found: &'static str },

    #[error("ERR internal error while processing '{0}'")]
    Internal(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Text of the `-` error line sent to the client.
    pub fn to_resp_error(&self) -> String {
        match self {
            ProxyError::Io(e) => format!("ERR {e}"),
            other => format!("{other}"),
        }
    }
}

impl From<redis::RedisError> for ProxyError {
    fn from(err: redis::RedisError) -> Self {
        match (err.code(), err.detail()) {
            (Some(code), Some(detail)) => ProxyError::Backend(format!("{code} {detail}")),
            (Some(code), None) => ProxyError::Backend(code.to_string()),
            _ => ProxyError::Backend(format!("ERR {err}")),
        }
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
