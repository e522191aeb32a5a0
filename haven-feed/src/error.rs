use thiserror::Error;

/// Why an inbound message or endpoint was rejected. Message errors stay
/// inside the processing task and only reach the log; endpoint errors are
/// returned from `fetch`.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected message shape: {0}")]
    Envelope(&'static str),

    #[error("invalid endpoint '{url}': {source}")]
    Endpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported endpoint scheme '{0}', expected ws or wss")]
    Scheme(String),
}
