//! Configuration loader with environment variable expansion

use std::path::Path;

use super::{Config, ConfigError};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR_NAME}` (keeps the placeholder when the variable is not
/// set) and `${VAR_NAME:-default}`. Variable names must start with a letter
/// or underscore and contain only uppercase letters, digits and underscores.
fn expand_env_vars(s: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}").unwrap();
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let full_match = cap.get(0).unwrap();
        let var_name = cap.get(1).unwrap().as_str();

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => {
                if let Some(default) = cap.get(2) {
                    default.as_str().to_string()
                } else {
                    // No env var and no default. Keep the original placeholder.
                    full_match.as_str().to_string()
                }
            }
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SAMPLE: &str = r#"
server:
  address: "127.0.0.1:8080"
upload:
  base_url: "http://localhost:8080/files"
  max_memory_size: 2048
  groups:
    - name: images
      mime_types: ["image/png", "image/jpeg"]
      max_upload_size: 10485760
      folder: images
  defaults:
    allow_any_mime_type: true
    max_upload_size: 5242880
    folder: other
storage:
  backend: local
  local:
    root: /tmp/spoolgate-data
"#;

    #[test]
    fn parses_sample_config() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.address, "127.0.0.1:8080");
        assert_eq!(config.upload.groups.len(), 1);
        assert_eq!(config.upload.groups[0].folder, "images");
        assert_eq!(config.upload.groups[0].mime_types.len(), 2);
        assert!(config.upload.defaults.allow_any_mime_type);
        assert_eq!(config.max_body_size(), 10485760);
    }

    #[test]
    #[serial]
    fn expands_set_variable() {
        std::env::set_var("SPOOLGATE_TEST_VAR", "expanded");
        let result = expand_env_vars("prefix-${SPOOLGATE_TEST_VAR}-suffix");
        assert_eq!(result, "prefix-expanded-suffix");
        std::env::remove_var("SPOOLGATE_TEST_VAR");
    }

    #[test]
    #[serial]
    fn missing_variable_uses_default() {
        std::env::remove_var("SPOOLGATE_MISSING_VAR");
        let result = expand_env_vars("${SPOOLGATE_MISSING_VAR:-fallback}");
        assert_eq!(result, "fallback");
    }

    #[test]
    #[serial]
    fn missing_variable_without_default_keeps_placeholder() {
        std::env::remove_var("SPOOLGATE_MISSING_VAR");
        let result = expand_env_vars("${SPOOLGATE_MISSING_VAR}");
        assert_eq!(result, "${SPOOLGATE_MISSING_VAR}");
    }
}
