/// Terminal outcome of a failed turn. Its `Display` text is what callers see
/// in the result envelope's `error`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("no capability matched the request")]
    NoCapabilityMatched,

    /// Handler failure, with the handler's own message kept verbatim.
    #[error("{message}")]
    Handler { capability: String, message: String },

    #[error("chain limit of {limit} dispatches exceeded: {}", .chain.join(" -> "))]
    ChainLimitExceeded { limit: u32, chain: Vec<String> },

    #[error("workflow cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("capability name must not be empty")]
    EmptyName,

    #[error("capability already registered: {0}")]
    Duplicate(String),
}
