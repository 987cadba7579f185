use std::fmt::{self, Display};

/// Errors produced by model constructors and parsing routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidItemId(String),
    InvalidStoreKey(String),
    InvalidJobKey(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidItemId(raw) => {
                write!(f, "invalid item id: {raw}")
            }
            ModelError::InvalidStoreKey(raw) => {
                write!(f, "invalid store key: {raw}")
            }
            ModelError::InvalidJobKey(raw) => {
                write!(f, "invalid job key: {raw}")
            }
        }
    }
}

impl std::error::Error for ModelError {}
