use crate::errors::ConfigError;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Hyperparameters written as `key:value` pairs joined by `|`
///
/// * `d:5|e:1` - algo1 update periods
/// * `k:2` - algo2 decoder step factor
/// * `e1:1024|e2:1024|z:2` - reference network widths
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchSpec {
    spec: Box<str>,
    values: BTreeMap<Box<str>, f64>,
}

impl ArchSpec {
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let malformed = |reason: String| ConfigError::MalformedSpec {
            spec: spec.to_string(),
            reason,
        };

        let spec = spec.trim();
        if spec.is_empty() {
            return Err(malformed("empty specification".to_string()));
        }

        let mut values = BTreeMap::new();

        for token in spec.split('|') {
            let (key, value) = token
                .split_once(':')
                .ok_or_else(|| malformed(format!("`{}` has no ':'", token)))?;

            let key = key.trim();
            if key.is_empty() {
                return Err(malformed(format!("`{}` has an empty name", token)));
            }

            let value: f64 = value
                .trim()
                .parse()
                .map_err(|_| malformed(format!("`{}` is not a number", value.trim())))?;

            if !value.is_finite() {
                return Err(malformed(format!("`{}` is not finite", key)));
            }

            if values.insert(key.into(), value).is_some() {
                return Err(malformed(format!("`{}` appears twice", key)));
            }
        }

        Ok(Self {
            spec: spec.into(),
            values,
        })
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Only non-negative whole numbers convert
    pub fn get_usize(&self, key: &str) -> Option<Result<usize, ConfigError>> {
        self.get_f64(key).map(|v| {
            if v >= 0.0 && v.fract() == 0.0 && v <= usize::MAX as f64 {
                Ok(v as usize)
            } else {
                Err(ConfigError::InvalidHyperparameter {
                    name: key.to_string(),
                    value: format!("{} (expected a non-negative integer)", v),
                })
            }
        })
    }

    pub fn require_f64(&self, context: &str, key: &str) -> Result<f64, ConfigError> {
        self.get_f64(key)
            .ok_or_else(|| ConfigError::MissingHyperparameter {
                context: context.to_string(),
                name: key.to_string(),
            })
    }

    pub fn require_usize(&self, context: &str, key: &str) -> Result<usize, ConfigError> {
        self.get_usize(key)
            .unwrap_or_else(|| {
                Err(ConfigError::MissingHyperparameter {
                    context: context.to_string(),
                    name: key.to_string(),
                })
            })
    }
}

impl FromStr for ArchSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(Self::parse(s)?)
    }
}

impl std::fmt::Display for ArchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_update_periods() {
        let spec = ArchSpec::parse("d:5|e:1").unwrap();
        assert_eq!(spec.require_usize("algo1", "d").unwrap(), 5);
        assert_eq!(spec.require_usize("algo1", "e").unwrap(), 1);
        assert_eq!(spec.to_string(), "d:5|e:1");
    }

    #[test]
    fn parse_network_widths() {
        let spec = ArchSpec::parse("e1:1024|e2:512|z:2").unwrap();
        assert_eq!(spec.get_usize("z").unwrap().unwrap(), 2);
        assert_eq!(spec.get_f64("e2"), Some(512.0));
        assert_eq!(spec.get_f64("d"), None);
    }

    #[test]
    fn fractional_step_factor() {
        let spec = ArchSpec::parse("k:0.5").unwrap();
        assert_eq!(spec.require_f64("algo2", "k").unwrap(), 0.5);
        assert!(spec.require_usize("algo2", "k").is_err());
    }

    #[test]
    fn malformed_specs() {
        for bad in ["", "d", "d:", ":3", "d:x", "d:1|d:2", "d:1||e:2", "d:inf"] {
            let err = ArchSpec::parse(bad).unwrap_err();
            assert!(err.is_parse_error(), "{} should not parse", bad);
        }
    }

    #[test]
    fn missing_key() {
        let spec = ArchSpec::parse("d:2").unwrap();
        let err = spec.require_usize("algo1", "e").unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingHyperparameter {
                context: "algo1".into(),
                name: "e".into()
            }
        );
    }
}
