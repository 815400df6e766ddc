//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Convert the first error into a [`ConfigError`], if any.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
///
/// Checks shape and ranges only; selector syntax is checked when the
/// patterns are compiled at startup.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_browser(config, &mut result);
        Self::validate_selectors(config, &mut result);
        Self::validate_timing(config, &mut result);
        Self::validate_control(config, &mut result);

        result
    }

    fn validate_browser(config: &Config, result: &mut ValidationResult) {
        let endpoint = &config.browser.endpoint;
        let schemes = ["http://", "https://", "ws://", "wss://"];
        if !schemes.iter().any(|s| endpoint.starts_with(s)) {
            result.add_error(ValidationError::new(
                "browser.endpoint",
                "endpoint must start with http://, https://, ws:// or wss://",
            ));
        }

        if config.browser.page_url.trim().is_empty() {
            result.add_warning(ValidationWarning::new(
                "browser.page_url",
                "page_url is empty, the first open page will be used",
            ));
        }
    }

    fn validate_selectors(config: &Config, result: &mut ValidationResult) {
        let selectors = &config.selectors;
        let fields = [
            ("selectors.block", &selectors.block),
            ("selectors.content", &selectors.content),
            ("selectors.header", &selectors.header),
            ("selectors.expand", &selectors.expand),
            ("selectors.collapse", &selectors.collapse),
        ];

        for (path, value) in fields {
            if value.trim().is_empty() {
                result.add_error(ValidationError::new(path, "selector cannot be empty"));
            }
        }
    }

    fn validate_timing(config: &Config, result: &mut ValidationResult) {
        let timing = &config.timing;

        if timing.retry_attempts == 0 {
            result.add_error(ValidationError::new(
                "timing.retry_attempts",
                "retry_attempts must be at least 1",
            ));
        } else if timing.retry_attempts > 10 {
            result.add_warning(ValidationWarning::new(
                "timing.retry_attempts",
                "retry_attempts is very high (>10), failing blocks will be retried for a long time",
            ));
        }

        for (path, value) in [
            ("timing.mutation_debounce_ms", timing.mutation_debounce_ms),
            ("timing.activation_debounce_ms", timing.activation_debounce_ms),
        ] {
            if value == 0 {
                result.add_error(ValidationError::new(path, "debounce must be greater than 0"));
            } else if value > 2000 {
                result.add_warning(ValidationWarning::new(
                    path,
                    "debounce above 2000ms will make the page feel unresponsive",
                ));
            }
        }

        let anchor = timing.scroll_anchor;
        if !(anchor > 0.0 && anchor <= 1.0) {
            result.add_error(ValidationError::new(
                "timing.scroll_anchor",
                "scroll_anchor must be in (0, 1]",
            ));
        }
    }

    fn validate_control(config: &Config, result: &mut ValidationResult) {
        let control = &config.control;

        if control.class_name.is_empty() || control.class_name.chars().any(char::is_whitespace) {
            result.add_error(ValidationError::new(
                "control.class_name",
                "class_name must be a single non-empty class",
            ));
        }

        if control.label.trim().is_empty() {
            result.add_error(ValidationError::new("control.label", "label cannot be empty"));
        }

        let key = control.shortcut.rsplit('+').next().unwrap_or("").trim();
        if key.is_empty() {
            result.add_error(ValidationError::new(
                "control.shortcut",
                format!("shortcut '{}' has no key", control.shortcut),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
