/// Failures constructing a remote collaborator. Call-time failures are
/// reported through `ClassifierError` / `CapabilityError` instead.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Parse and validate an http(s) endpoint.
pub(crate) fn parse_endpoint(raw: &str) -> Result<reqwest::Url> {
    let url = reqwest::Url::parse(raw).map_err(|e| RemoteError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RemoteError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}
