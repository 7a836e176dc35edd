use std::{collections::HashMap, fmt::Display, str::FromStr};

use thiserror::Error;

/// Key/value settings of one configuration section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleConfig {
    inner: HashMap<String, String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("field {field} is required")]
    RequiredValue { field: String },
    #[error("{value} is not a valid value for field {field}: {err}")]
    InvalidValue {
        field: String,
        value: String,
        err: String,
    },
}

impl ModuleConfig {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.inner.insert(key.into(), value.into())
    }

    pub fn get_raw(&self, config_name: &str) -> Option<&str> {
        self.inner.get(config_name).map(String::as_str)
    }

    /// Typed value, missing keys are an error.
    pub fn required<T>(&self, config_name: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        self.optional(config_name)?
            .ok_or_else(|| ConfigError::RequiredValue {
                field: config_name.to_string(),
            })
    }

    pub fn optional<T>(&self, config_name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        self.inner
            .get(config_name)
            .map(|value| parse(value.trim(), config_name))
            .transpose()
    }

    pub fn with_default<T>(&self, config_name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        Ok(self.optional(config_name)?.unwrap_or(default))
    }

    /// Boolean switch. Accepts `true/false`, `yes/no`, `on/off` and `1/0`.
    pub fn flag(&self, config_name: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.get_raw(config_name) else {
            return Ok(default);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                field: config_name.to_string(),
                value: value.to_string(),
                err: "expected a boolean".to_string(),
            }),
        }
    }

    /// Comma separated list of values, empty if the field is missing.
    pub fn get_list<T>(&self, config_name: &str) -> Result<Vec<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        self.inner
            .get(config_name)
            .iter()
            .flat_map(|config| config.split(','))
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| parse(item, config_name))
            .collect()
    }

    /// Comma separated list of values, `default` if the field is missing.
    pub fn get_list_with_default<T>(
        &self,
        config_name: &str,
        default: Vec<T>,
    ) -> Result<Vec<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        if self.inner.contains_key(config_name) {
            self.get_list(config_name)
        } else {
            Ok(default)
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ModuleConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn parse<T>(value: &str, config_name: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    T::from_str(value).map_err(|err| ConfigError::InvalidValue {
        field: config_name.to_string(),
        value: value.to_string(),
        err: err.to_string(),
    })
}
