use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

impl CoreError {
    pub(crate) fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        CoreError::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
