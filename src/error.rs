use thiserror::Error;

/// Problems with the survey parameters. Always fatal, raised before any request is sent.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown site '{site}' (available: {available})")]
    UnknownSite { site: String, available: String },

    #[error("invalid value for --{name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("no sites requested")]
    NoSites,
}

impl ConfigError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
