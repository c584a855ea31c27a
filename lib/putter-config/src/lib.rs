//! Primitives for loading typed and untyped configuration.
#![deny(missing_docs)]

use std::{borrow::Cow, sync::Arc};

use figment::{
    error::Kind,
    providers::Env,
    Figment,
};
use putter_error::GenericError;
use serde::Deserialize;
use snafu::Snafu;
use tracing::debug;

mod provider;
use self::provider::YamlSnapshot;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// Requested field was missing from the configuration.
    #[snafu(display("Missing field '{}' in configuration. {}", field, help_text))]
    MissingField {
        /// Help text describing how to set the missing field.
        ///
        /// Includes the environment variable spelling of the key when environment variables were loaded.
        help_text: String,

        /// Name of the missing field.
        field: Cow<'static, str>,
    },

    /// Requested field's value did not have the expected data type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Period-separated path to the invalid field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Generic configuration error.
    #[snafu(display("Failed to query configuration."))]
    Generic {
        /// Error source.
        source: GenericError,
    },
}

/// Returns the environment variable spelling of `key` under `prefix`.
///
/// The prefix is already uppercased and carries its trailing underscore.
fn environment_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key.replace('.', "_").to_uppercase())
}

/// Layered configuration, loaded from a YAML file and the environment.
///
/// Sources added later take precedence over sources added earlier. Once loaded, the merged values are queried through
/// [`GenericConfiguration`], either whole or section by section.
#[derive(Default)]
pub struct ConfigurationLoader {
    figment: Figment,
    env_prefixes: Vec<String>,
}

impl ConfigurationLoader {
    /// Attempts to load the given YAML configuration file, ignoring any errors.
    ///
    /// Errors include the file not existing, not being readable, and not being valid YAML.
    pub fn try_from_yaml<P>(mut self, path: P) -> Self
    where
        P: AsRef<std::path::Path>,
    {
        match YamlSnapshot::read(&path) {
            Ok(snapshot) => self.figment = self.figment.admerge(snapshot),
            Err(e) => {
                debug!(error = %e, file_path = %path.as_ref().display(), "Unable to read YAML configuration file. Ignoring.");
            }
        }
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// The prefix has an underscore appended to it if it does not already end with one: with a prefix of `putter`, any
    /// environment variable starting with `PUTTER_` is matched. The prefix is case-insensitive.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error will be returned.
    pub fn from_environment(mut self, prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let mut prefix = prefix.to_uppercase();
        if !prefix.ends_with('_') {
            prefix.push('_');
        }

        self.figment = self.figment.admerge(Env::prefixed(&prefix));
        self.env_prefixes.push(prefix);
        Ok(self)
    }

    /// Consumes the loader and wraps the merged configuration in a generic wrapper.
    pub fn into_generic(self) -> GenericConfiguration {
        GenericConfiguration {
            inner: Arc::new(Inner {
                figment: self.figment,
                env_prefixes: self.env_prefixes,
            }),
        }
    }
}

#[derive(Debug)]
struct Inner {
    figment: Figment,
    env_prefixes: Vec<String>,
}

/// A generic configuration object.
///
/// The merged configuration derived from [`ConfigurationLoader`] in raw form. Values can be queried by key, and keys
/// use `a.b.c` notation for nested values.
#[derive(Clone, Debug)]
pub struct GenericConfiguration {
    inner: Arc<Inner>,
}

impl GenericConfiguration {
    fn get<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.inner.figment.extract_inner(key) {
            Ok(value) => Ok(value),
            Err(e) if matches!(e.kind, Kind::MissingField(_)) => {
                // Nested keys such as `encoder.metric` only exist as `encoder_metric` when they came from the
                // environment, so retry with the separators flattened.
                let fallback_key = key.replace('.', "_");
                self.inner
                    .figment
                    .extract_inner(&fallback_key)
                    .map_err(|fallback_e| from_figment_error(&self.inner.env_prefixes, fallback_e))
            }
            Err(e) => Err(from_figment_error(&self.inner.env_prefixes, e)),
        }
    }

    /// Gets a configuration value by key.
    ///
    /// # Errors
    ///
    /// If the key does not exist, or the value could not be deserialized into `T`, an error is returned.
    pub fn get_typed<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.get(key)
    }

    /// Gets a configuration value by key, if it exists.
    ///
    /// # Errors
    ///
    /// If the key exists but the value could not be deserialized into `T`, an error will be returned.
    pub fn try_get_typed<'a, T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(ConfigurationError::MissingField { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Deserializes the entire configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration could not be deserialized into `T`, an error will be returned.
    pub fn as_typed<'a, T>(&self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.inner
            .figment
            .extract()
            .map_err(|e| from_figment_error(&self.inner.env_prefixes, e))
    }
}

fn from_figment_error(env_prefixes: &[String], e: figment::Error) -> ConfigurationError {
    match e.kind {
        Kind::MissingField(field) => {
            let keys = std::iter::once(field.to_string())
                .chain(env_prefixes.iter().map(|prefix| environment_key(prefix, &field)))
                .collect::<Vec<_>>();
            let help_text = format!("Try setting `{}`.", keys.join("` or `"));

            ConfigurationError::MissingField { help_text, field }
        }
        Kind::InvalidType(actual_ty, expected_ty) => ConfigurationError::InvalidFieldType {
            field: e.path.join("."),
            expected_ty,
            actual_ty: actual_ty.to_string(),
        },
        _ => ConfigurationError::Generic { source: e.into() },
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Shipping {
        url: String,
        #[serde(default)]
        tsdb_writing_size: usize,
    }

    fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn yaml_values_are_typed() {
        let file = yaml_file("url: http://tsdb:4242\ntsdb_writing_size: 50\n");
        let config: Shipping = ConfigurationLoader::default()
            .try_from_yaml(file.path())
            .into_generic()
            .as_typed()
            .unwrap();

        assert_eq!(config.url, "http://tsdb:4242");
        assert_eq!(config.tsdb_writing_size, 50);
    }

    #[test]
    fn environment_overrides_file() {
        std::env::set_var("PUTTERCFGTEST_URL", "http://override:4242");

        let file = yaml_file("url: http://tsdb:4242\n");
        let config: Shipping = ConfigurationLoader::default()
            .try_from_yaml(file.path())
            .from_environment("puttercfgtest")
            .unwrap()
            .into_generic()
            .as_typed()
            .unwrap();

        std::env::remove_var("PUTTERCFGTEST_URL");
        assert_eq!(config.url, "http://override:4242");
    }

    #[test]
    fn missing_yaml_file_is_ignored_when_optional() {
        let generic = ConfigurationLoader::default()
            .try_from_yaml("/nonexistent/putter.yaml")
            .into_generic();
        assert_eq!(generic.try_get_typed::<String>("url").unwrap(), None);
    }

    #[test]
    fn missing_field_help_mentions_environment_key() {
        std::env::set_var("PUTTERHELPTEST_UNRELATED", "1");

        let generic = ConfigurationLoader::default()
            .from_environment("putterhelptest")
            .unwrap()
            .into_generic();

        std::env::remove_var("PUTTERHELPTEST_UNRELATED");
        match generic.get_typed::<String>("url") {
            Err(ConfigurationError::MissingField { help_text, .. }) => {
                assert!(help_text.contains("PUTTERHELPTEST_URL"), "help text: {}", help_text);
            }
            other => panic!("expected missing field error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn nested_lookup_falls_back_to_flattened_key() {
        let file = yaml_file("encoder_metric: host\n");
        let generic = ConfigurationLoader::default().try_from_yaml(file.path()).into_generic();
        assert_eq!(generic.get_typed::<String>("encoder.metric").unwrap(), "host");
    }

    #[test]
    fn malformed_yaml_file_is_ignored() {
        let file = yaml_file("url: [unterminated\n");
        let generic = ConfigurationLoader::default().try_from_yaml(file.path()).into_generic();
        assert_eq!(generic.try_get_typed::<String>("url").unwrap(), None);
    }

    #[test]
    fn empty_prefix_rejected() {
        assert!(matches!(
            ConfigurationLoader::default().from_environment(""),
            Err(ConfigurationError::EmptyPrefix)
        ));
    }

    #[test]
    fn invalid_type_is_reported_with_path() {
        let file = yaml_file("url: http://tsdb:4242\ntsdb_writing_size: lots\n");
        let result: Result<Shipping, _> = ConfigurationLoader::default()
            .try_from_yaml(file.path())
            .into_generic()
            .as_typed();
        assert!(matches!(result, Err(ConfigurationError::InvalidFieldType { .. })));
    }
}
