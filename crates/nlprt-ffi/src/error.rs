//! Errors raised at the C boundary.

use thiserror::Error;

use nlprt_core::NlpError;

#[derive(Error, Debug)]
pub enum FfiError {
    /// A required pointer argument was null.
    #[error("argument `{0}` is null")]
    NullArgument(&'static str),

    #[error("argument `{0}` is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// The handle was never issued or has already been freed.
    #[error("unknown or released model handle {0}")]
    UnknownHandle(u64),

    #[error("panic during call: {0}")]
    Panic(String),

    #[error(transparent)]
    Nlp(#[from] NlpError),
}

impl FfiError {
    /// Numeric code reported in [`ErrorRecord`](crate::records::ErrorRecord).
    ///
    /// Library errors keep their own codes; stale handles report the same
    /// code as a closed model.
    pub fn code(&self) -> i32 {
        match self {
            FfiError::Nlp(e) => e.code(),
            FfiError::UnknownHandle(_) => NlpError::ModelClosed.code(),
            FfiError::NullArgument(_) => 100,
            FfiError::InvalidUtf8(_) => 101,
            FfiError::Panic(_) => 102,
        }
    }
}

pub type Result<T> = std::result::Result<T, FfiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_handle_reports_closed_model() {
        assert_eq!(FfiError::UnknownHandle(7).code(), 5);
        assert_eq!(FfiError::from(NlpError::EmptyLabelSet).code(), 6);
        assert_eq!(
            FfiError::NullArgument("text").to_string(),
            "argument `text` is null"
        );
    }
}
