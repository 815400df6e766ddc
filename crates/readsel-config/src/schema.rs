//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub selectors: SelectorsConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Browser connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Chrome remote debugging endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Attach to the first page whose URL contains this fragment.
    #[serde(default = "default_page_url")]
    pub page_url: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            page_url: default_page_url(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:9222".to_string()
}

fn default_page_url() -> String {
    "zhihu.com".to_string()
}

/// Structural patterns identifying content blocks and their parts.
///
/// Values are CSS selectors as understood by the host page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorsConfig {
    /// Root of an expandable content block.
    #[serde(default = "default_block_selector")]
    pub block: String,

    /// Element whose text gets selected.
    #[serde(default = "default_content_selector")]
    pub content: String,

    /// Element hosting the action control.
    #[serde(default = "default_header_selector")]
    pub header: String,

    /// Present while the block is still collapsed.
    #[serde(default = "default_expand_selector")]
    pub expand: String,

    /// Present while the block is expanded.
    #[serde(default = "default_collapse_selector")]
    pub collapse: String,
}

impl Default for SelectorsConfig {
    fn default() -> Self {
        Self {
            block: default_block_selector(),
            content: default_content_selector(),
            header: default_header_selector(),
            expand: default_expand_selector(),
            collapse: default_collapse_selector(),
        }
    }
}

fn default_block_selector() -> String {
    ".AnswerItem".to_string()
}

fn default_content_selector() -> String {
    ".RichContent-inner .RichText".to_string()
}

fn default_header_selector() -> String {
    ".ContentItem-meta".to_string()
}

fn default_expand_selector() -> String {
    ".ContentItem-expandButton, .ContentItem-more".to_string()
}

fn default_collapse_selector() -> String {
    "[data-zop-retract-question=\"true\"]".to_string()
}

/// Debounce, retry and scroll timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Quiet period before a burst of mutation notifications is reconciled.
    #[serde(default = "default_mutation_debounce_ms")]
    pub mutation_debounce_ms: u64,

    /// Quiet period before a burst of control activations selects content.
    #[serde(default = "default_activation_debounce_ms")]
    pub activation_debounce_ms: u64,

    /// Maximum attempts of one attachment step.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between attachment attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Delay between the scroll request and the selection.
    #[serde(default = "default_scroll_settle_ms")]
    pub scroll_settle_ms: u64,

    /// Fraction of the viewport height at which the block bottom is placed,
    /// measured from the viewport bottom.
    #[serde(default = "default_scroll_anchor")]
    pub scroll_anchor: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            mutation_debounce_ms: default_mutation_debounce_ms(),
            activation_debounce_ms: default_activation_debounce_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            scroll_settle_ms: default_scroll_settle_ms(),
            scroll_anchor: default_scroll_anchor(),
        }
    }
}

fn default_mutation_debounce_ms() -> u64 {
    100
}

fn default_activation_debounce_ms() -> u64 {
    200
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_scroll_settle_ms() -> u64 {
    300
}

fn default_scroll_anchor() -> f64 {
    0.66
}

/// Action control appearance and keyboard shortcut.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Class name marking control elements; also used to find existing ones.
    #[serde(default = "default_class_name")]
    pub class_name: String,

    /// Visible label.
    #[serde(default = "default_label")]
    pub label: String,

    /// Tooltip.
    #[serde(default = "default_title")]
    pub title: String,

    /// Keyboard shortcut, e.g. `Alt+S`.
    #[serde(default = "default_shortcut")]
    pub shortcut: String,

    /// Inline style applied to the control.
    #[serde(default = "default_style", skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            class_name: default_class_name(),
            label: default_label(),
            title: default_title(),
            shortcut: default_shortcut(),
            style: default_style(),
        }
    }
}

fn default_class_name() -> String {
    "zh-select-btn".to_string()
}

fn default_label() -> String {
    "全选内容".to_string()
}

fn default_title() -> String {
    "快捷键: Alt + S".to_string()
}

fn default_shortcut() -> String {
    "Alt+S".to_string()
}

fn default_style() -> Option<String> {
    Some(
        "position: absolute; right: 20px; top: 50%; transform: translateY(-50%); \
         z-index: 1000; cursor: pointer; user-select: none;"
            .to_string(),
    )
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rotated log files.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    /// Number of daily log files to keep.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
            max_files: default_max_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".readsel")
        .join("logs")
}

fn default_max_files() -> usize {
    7
}
