use std::fmt;

/// Configuration and parse failures raised while setting up a VIB
/// training step. They are fatal: nothing is retried and no optimizer
/// state is touched once one of these is returned.
///
/// Carried inside `anyhow::Error`, so callers can recover the variant
/// with `err.downcast_ref::<ConfigError>()`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// learning-rate schedule name not recognized
    UnknownSchedule(String),
    /// strategy/schedule combination that was never validated
    UnsupportedSchedule { strategy: String, schedule: String },
    UnknownStrategy(String),
    UnknownDataset(String),
    MissingHyperparameter { context: String, name: String },
    InvalidHyperparameter { name: String, value: String },
    /// malformed `key:value|key:value` specification
    MalformedSpec { spec: String, reason: String },
}

impl ConfigError {
    pub fn is_parse_error(&self) -> bool {
        matches!(self, ConfigError::MalformedSpec { .. })
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownSchedule(mode) => write!(f, "no lr_schedule: {}", mode),
            ConfigError::UnsupportedSchedule { strategy, schedule } => write!(
                f,
                "{} does not support lr_schedule {} (use constant)",
                strategy, schedule
            ),
            ConfigError::UnknownStrategy(name) => write!(f, "unknown strategy: {}", name),
            ConfigError::UnknownDataset(name) => write!(f, "unknown dataset: {}", name),
            ConfigError::MissingHyperparameter { context, name } => {
                write!(f, "{} requires hyperparameter `{}`", context, name)
            }
            ConfigError::InvalidHyperparameter { name, value } => {
                write!(f, "invalid value for `{}`: {}", name, value)
            }
            ConfigError::MalformedSpec { spec, reason } => {
                write!(f, "malformed spec \"{}\": {}", spec, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_error_names_the_mode() {
        let err = ConfigError::UnknownSchedule("cosine".to_string());
        assert!(err.to_string().contains("cosine"));
        assert!(!err.is_parse_error());
    }

    #[test]
    fn downcast_through_anyhow() {
        let err: anyhow::Error = ConfigError::MalformedSpec {
            spec: "d".into(),
            reason: "missing ':'".into(),
        }
        .into();
        let inner = err.downcast_ref::<ConfigError>().unwrap();
        assert!(inner.is_parse_error());
    }
}
