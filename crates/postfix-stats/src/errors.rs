// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Error raised for a log line that matched a rule but carried an unusable field.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("invalid message size {size:?} for queue id {queue_id}")]
    InvalidSize { queue_id: String, size: String },
}

/// Error raised when a listen address cannot be interpreted.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ListenAddrError {
    #[error("listen address cannot be empty")]
    Empty,
    #[error("unix socket path cannot be empty")]
    EmptySocketPath,
}

/// Error raised when a socket owner cannot be parsed or resolved.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OwnerParseError {
    #[error("incorrect socket owner {0:?}, expected OWNER[:GROUP]")]
    Malformed(String),
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("unknown group {0:?}")]
    UnknownGroup(String),
    #[error("cannot look up {name:?}: {reason}")]
    Lookup { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ClassifyError::InvalidSize {
            queue_id: "AD1".to_string(),
            size: "99999999999999999999999".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "invalid message size \"99999999999999999999999\" for queue id AD1"
        );
        assert_eq!(
            ListenAddrError::EmptySocketPath.to_string(),
            "unix socket path cannot be empty"
        );
        assert_eq!(
            OwnerParseError::Malformed("a:b:c".to_string()).to_string(),
            "incorrect socket owner \"a:b:c\", expected OWNER[:GROUP]"
        );
        assert_eq!(
            OwnerParseError::UnknownGroup("postdrop".to_string()).to_string(),
            "unknown group \"postdrop\""
        );
    }
}
