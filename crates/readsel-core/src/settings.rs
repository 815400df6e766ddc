//! Runtime settings compiled from configuration.

use std::time::Duration;

use readsel_config::{Config, ConfigValidator};
use tracing::warn;

use crate::document::ControlSpec;
use crate::error::{CoreError, CoreResult};
use crate::retry::RetryPolicy;
use crate::selector::Selector;
use crate::shortcut::Shortcut;

/// Compiled structural patterns.
#[derive(Debug, Clone)]
pub struct Patterns {
    pub block: Selector,
    pub content: Selector,
    pub header: Selector,
    pub expand: Selector,
    pub collapse: Selector,
    /// Matches control elements by their class.
    pub control: Selector,
}

/// Everything the augmenter needs, validated and parsed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub patterns: Patterns,
    pub control: ControlSpec,
    pub shortcut: Shortcut,
    pub retry: RetryPolicy,
    pub mutation_debounce: Duration,
    pub activation_debounce: Duration,
    pub scroll_settle: Duration,
    pub scroll_anchor: f64,
}

impl Settings {
    /// Validate `config` and compile its patterns and shortcut.
    ///
    /// Validation warnings are logged; the first validation error, an
    /// unparsable pattern, or an unparsable shortcut fails the call.
    pub fn from_config(config: &Config) -> CoreResult<Self> {
        let warnings = ConfigValidator::validate(config).into_result()?;
        for warning in warnings {
            warn!("Config warning at {}: {}", warning.path, warning.message);
        }

        let selectors = &config.selectors;
        let patterns = Patterns {
            block: compile("selectors.block", &selectors.block)?,
            content: compile("selectors.content", &selectors.content)?,
            header: compile("selectors.header", &selectors.header)?,
            expand: compile("selectors.expand", &selectors.expand)?,
            collapse: compile("selectors.collapse", &selectors.collapse)?,
            control: Selector::class(&config.control.class_name),
        };

        let timing = &config.timing;
        Ok(Self {
            patterns,
            control: ControlSpec {
                class_name: config.control.class_name.clone(),
                label: config.control.label.clone(),
                title: config.control.title.clone(),
                style: config.control.style.clone(),
            },
            shortcut: config.control.shortcut.parse()?,
            retry: RetryPolicy::new(
                timing.retry_attempts,
                Duration::from_millis(timing.retry_delay_ms),
            ),
            mutation_debounce: Duration::from_millis(timing.mutation_debounce_ms),
            activation_debounce: Duration::from_millis(timing.activation_debounce_ms),
            scroll_settle: Duration::from_millis(timing.scroll_settle_ms),
            scroll_anchor: timing.scroll_anchor,
        })
    }
}

fn compile(field: &str, source: &str) -> CoreResult<Selector> {
    Selector::parse(source).map_err(|e| CoreError::InvalidPattern {
        field: field.to_string(),
        source_text: source.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_compiles() {
        let settings = Settings::from_config(&Config::default()).unwrap();
        assert_eq!(settings.patterns.block.source(), ".AnswerItem");
        assert_eq!(settings.patterns.control.source(), ".zh-select-btn");
        assert_eq!(settings.shortcut.to_string(), "Alt+S");
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(settings.mutation_debounce, Duration::from_millis(100));
        assert_eq!(settings.activation_debounce, Duration::from_millis(200));
        assert_eq!(settings.scroll_settle, Duration::from_millis(300));
        assert_eq!(settings.scroll_anchor, 0.66);
        assert_eq!(settings.control.class_name, "zh-select-btn");
    }

    #[test]
    fn test_invalid_pattern_names_field() {
        let mut config = Config::default();
        config.selectors.header = ".ContentItem-meta >".to_string();

        let err = Settings::from_config(&config).unwrap_err();
        match err {
            CoreError::InvalidPattern { field, source_text, .. } => {
                assert_eq!(field, "selectors.header");
                assert_eq!(source_text, ".ContentItem-meta >");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_invalid_shortcut() {
        let mut config = Config::default();
        config.control.shortcut = "Hyper+S".to_string();

        assert!(matches!(
            Settings::from_config(&config),
            Err(CoreError::InvalidShortcut(_))
        ));
    }

    #[test]
    fn test_validation_error_surfaces() {
        let mut config = Config::default();
        config.timing.retry_attempts = 0;

        assert!(matches!(
            Settings::from_config(&config),
            Err(CoreError::Config(_))
        ));
    }
}
