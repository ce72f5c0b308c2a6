//! Errors produced while loading and validating collector configuration.

use std::fmt;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub enum ConfigError {
    EnvVarNotFound { key: String, hint: Option<String> },
    ParseError { key: String, message: String, kind: String },
    InvalidValue { key: String, value: String, expected: String, kind: String },
    ValidationFailed { message: String, kind: String, remedy: String, fields: Vec<(String, String)> },
}

impl ConfigError {
    pub fn env_var_not_found(key: impl Into<String>, hint: Option<&str>) -> Self {
        Self::EnvVarNotFound { key: key.into(), hint: hint.map(String::from) }
    }

    pub fn parse_error(message: impl Into<String>, kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ParseError { key: key.into(), message: message.into(), kind: kind.into() }
    }

    pub fn invalid_value(
        key: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            expected: expected.into(),
            kind: kind.into(),
        }
    }

    pub fn validation_failed(
        message: impl Into<String>,
        kind: impl Into<String>,
        remedy: impl Into<String>,
        fields: Vec<(String, String)>,
    ) -> Self {
        Self::ValidationFailed {
            message: message.into(),
            kind: kind.into(),
            remedy: remedy.into(),
            fields,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvVarNotFound { key, hint } => {
                write!(f, "missing environment variable {key}")?;
                if let Some(hint) = hint {
                    write!(f, " ({hint})")?;
                }
                Ok(())
            }
            Self::ParseError { key, message, kind } => {
                write!(f, "could not parse {kind} {key}: {message}")
            }
            Self::InvalidValue { key, value, expected, kind } => {
                write!(f, "invalid {kind} {key}={value}, expected {expected}")
            }
            Self::ValidationFailed { message, kind, remedy, fields } => {
                write!(f, "{kind} validation failed: {message} ({remedy})")?;
                for (field, reason) in fields {
                    write!(f, " [{field}: {reason}]")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::error::CollectorError {
    fn from(err: ConfigError) -> Self {
        crate::error::CollectorError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_key_and_hint() {
        let e = ConfigError::env_var_not_found("VMWARE_URL", Some("set it in .env"));
        let msg = e.to_string();
        assert!(msg.contains("VMWARE_URL"));
        assert!(msg.contains("set it in .env"));
    }

    #[test]
    fn converts_into_collector_error() {
        let e: crate::error::CollectorError = ConfigError::env_var_not_found("X", None).into();
        assert!(matches!(e, crate::error::CollectorError::Config(_)));
    }
}
