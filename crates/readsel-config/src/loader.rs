//! Configuration loader.

use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a file, falling back to defaults when the file
    /// does not exist. Parse errors in an existing file are still reported.
    pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => Ok(Config::default()),
            other => other,
        }
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::InvalidValue {
            field: "env".to_string(),
            message: e.to_string(),
        })?;

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.readsel/logs`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.selectors.block, ".AnswerItem");
        assert_eq!(config.timing.retry_attempts, 3);
    }

    #[test]
    fn test_load_selectors() {
        let content = r#"
            [selectors]
            block = "article.post"
            header = "header"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.selectors.block, "article.post");
        assert_eq!(config.selectors.header, "header");
        assert_eq!(config.selectors.content, ".RichContent-inner .RichText");
    }

    #[test]
    fn test_load_timing_and_control() {
        let content = r#"
            [timing]
            mutation_debounce_ms = 250
            retry_attempts = 5

            [control]
            label = "Select all"
            shortcut = "Ctrl+Shift+A"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.timing.mutation_debounce_ms, 250);
        assert_eq!(config.timing.retry_attempts, 5);
        assert_eq!(config.timing.retry_delay_ms, 500);
        assert_eq!(config.control.label, "Select all");
        assert_eq!(config.control.shortcut, "Ctrl+Shift+A");
        assert_eq!(config.control.class_name, "zh-select-btn");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[browser]").unwrap();
        writeln!(file, "page_url = \"example.org/thread\"").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.browser.page_url, "example.org/thread");
        assert_eq!(config.browser.endpoint, "http://localhost:9222");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/readsel.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ConfigLoader::load_or_default(Path::new("/nonexistent/readsel.toml")).unwrap();
        assert_eq!(config.control.shortcut, "Alt+S");
    }

    #[test]
    fn test_load_or_default_reports_parse_errors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[timing").unwrap();
        let result = ConfigLoader::load_or_default(file.path());
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("invalid = [unclosed");
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: the variable name is unique to this test
        unsafe {
            std::env::set_var("READSEL_TEST_ENDPOINT", "http://10.0.0.2:9222");
        }
        let content = "[browser]\nendpoint = \"${READSEL_TEST_ENDPOINT}\"";
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.browser.endpoint, "http://10.0.0.2:9222");
        unsafe {
            std::env::remove_var("READSEL_TEST_ENDPOINT");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${READSEL_NONEXISTENT_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = ConfigLoader::expand_path("~/logs");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("/logs"));
    }
}
