//! Uniform failure translation for operations.
//!
//! Every operation can either abort with an error ("throw" mode) or
//! return a structured completion value carrying the failure text. An
//! optional override replaces the natural message without discarding
//! the underlying cause.

use crate::errors::{Error, Result};

/// How a failed operation is surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePolicy {
    /// When true (the default), failures abort the call with an error.
    /// When false, they are folded into the returned [`Completion`].
    pub throw_on_failure: bool,
    /// Replaces (throw mode) or prefixes (structured mode) the natural
    /// error message.
    pub error_message_override: Option<String>,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy {
            throw_on_failure: true,
            error_message_override: None,
        }
    }
}

/// Operation result under a [`FailurePolicy`] with
/// `throw_on_failure = false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error_message: Option<String>,
}

impl<T> Completion<T> {
    fn succeeded(data: T) -> Self {
        Completion {
            success: true,
            data: Some(data),
            error_message: None,
        }
    }

    fn failed(message: String) -> Self {
        Completion {
            success: false,
            data: None,
            error_message: Some(message),
        }
    }
}

/// Applies the failure policy to an operation result.
pub fn settle<T>(result: Result<T>, policy: &FailurePolicy) -> Result<Completion<T>> {
    match result {
        Ok(data) => Ok(Completion::succeeded(data)),
        Err(err) if policy.throw_on_failure => match &policy.error_message_override {
            Some(message) if !message.trim().is_empty() => Err(Error::Overridden {
                message: message.clone(),
                source: Box::new(err),
            }),
            _ => Err(err),
        },
        Err(err) => {
            let message = match &policy.error_message_override {
                Some(prefix) if !prefix.trim().is_empty() => format!("{}: {}", prefix, err),
                _ => err.to_string(),
            };
            Ok(Completion::failed(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing() -> Result<()> {
        Err(Error::PassphraseRequired)
    }

    #[test]
    fn success_passes_through() {
        let completion = settle(Ok(42), &FailurePolicy::default()).unwrap();
        assert!(completion.success);
        assert_eq!(completion.data, Some(42));
        assert_eq!(completion.error_message, None);
    }

    #[test]
    fn throw_mode_propagates() {
        let err = settle(failing(), &FailurePolicy::default()).unwrap_err();
        assert!(matches!(err, Error::PassphraseRequired));
    }

    #[test]
    fn throw_mode_override_replaces_message_keeps_cause() {
        let policy = FailurePolicy {
            throw_on_failure: true,
            error_message_override: Some("transfer step 3 failed".to_string()),
        };
        let err = settle(failing(), &policy).unwrap_err();
        assert_eq!(err.to_string(), "transfer step 3 failed");
        assert!(matches!(
            err,
            Error::Overridden { ref source, .. } if matches!(**source, Error::PassphraseRequired)
        ));
    }

    #[test]
    fn structured_mode_prefixes_message() {
        let policy = FailurePolicy {
            throw_on_failure: false,
            error_message_override: Some("transfer step 3 failed".to_string()),
        };
        let completion = settle(failing(), &policy).unwrap();
        assert!(!completion.success);
        assert_eq!(
            completion.error_message.as_deref(),
            Some("transfer step 3 failed: a private key passphrase is required for signing")
        );
    }

    #[test]
    fn structured_mode_without_override_uses_original() {
        let policy = FailurePolicy {
            throw_on_failure: false,
            error_message_override: None,
        };
        let completion = settle(failing(), &policy).unwrap();
        assert_eq!(
            completion.error_message.as_deref(),
            Some("a private key passphrase is required for signing")
        );
    }
}
