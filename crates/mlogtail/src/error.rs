// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors that stop the mlogtail process.
#[derive(Debug, thiserror::Error)]
pub enum MlogtailError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Command can be one of \"{0}\"")]
    UnknownCommand(String),

    #[error("Cannot open query listener: {0}")]
    ListenerStart(std::io::Error),

    #[error("Cannot read mail log: {0}")]
    LogSource(std::io::Error),

    #[error("Cannot query log reader process: {0}")]
    Query(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = MlogtailError::InvalidConfig("socket mode 1777 is above 777".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: socket mode 1777 is above 777"
        );

        let error = MlogtailError::Query(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert_eq!(error.to_string(), "Cannot query log reader process: refused");
    }

    #[test]
    fn test_error_debug() {
        let error = MlogtailError::UnknownCommand("stats|reset".to_string());
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("UnknownCommand"));
    }
}
