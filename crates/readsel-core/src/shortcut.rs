//! Keyboard shortcut parsing and matching.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::KeyPress;
use crate::error::CoreError;

/// A key combination such as `Alt+S`.
///
/// Matching requires every listed modifier and compares the key
/// case-insensitively. Modifiers that are not listed are ignored, so `Alt+S`
/// also fires on `Alt+Shift+S`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortcut {
    pub key: String,
    pub alt: bool,
    pub ctrl: bool,
    pub shift: bool,
    pub meta: bool,
}

impl Shortcut {
    pub fn matches(&self, press: &KeyPress) -> bool {
        (!self.alt || press.alt)
            && (!self.ctrl || press.ctrl)
            && (!self.shift || press.shift)
            && (!self.meta || press.meta)
            && press.key.to_lowercase() == self.key
    }
}

impl FromStr for Shortcut {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidShortcut(s.to_string());

        let mut parts: Vec<&str> = s.split('+').map(str::trim).collect();
        let key = parts.pop().filter(|k| !k.is_empty()).ok_or_else(invalid)?;

        let mut shortcut = Shortcut {
            key: key.to_lowercase(),
            alt: false,
            ctrl: false,
            shift: false,
            meta: false,
        };

        for modifier in parts {
            match modifier.to_ascii_lowercase().as_str() {
                "alt" | "option" => shortcut.alt = true,
                "ctrl" | "control" => shortcut.ctrl = true,
                "shift" => shortcut.shift = true,
                "meta" | "cmd" | "command" | "super" => shortcut.meta = true,
                _ => return Err(invalid()),
            }
        }

        Ok(shortcut)
    }
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (held, name) in [
            (self.ctrl, "Ctrl"),
            (self.alt, "Alt"),
            (self.shift, "Shift"),
            (self.meta, "Meta"),
        ] {
            if held {
                write!(f, "{}+", name)?;
            }
        }
        write!(f, "{}", self.key.to_uppercase())
    }
}
