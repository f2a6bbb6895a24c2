//! Modifier-key parsing.
//!
//! Symbolic names map onto a fixed flag set. Unknown names are skipped
//! with a warning and reported back to the caller.

use bitflags::bitflags;
use serde::Serialize;
use serde_json::Value;

bitflags! {
    /// Modifier keys held during a pointer or key action.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CONTROL = 1 << 1;
        const OPTION = 1 << 2;
        const COMMAND = 1 << 3;
        const FUNCTION = 1 << 4;
        const CAPS_LOCK = 1 << 5;
    }
}

impl Modifiers {
    /// Look up one symbolic name (case-insensitive, with synonyms).
    pub fn from_symbolic_name(name: &str) -> Option<Self> {
        let flag = match name.trim().to_ascii_lowercase().as_str() {
            "shift" => Self::SHIFT,
            "control" | "ctrl" => Self::CONTROL,
            "option" | "alt" | "opt" => Self::OPTION,
            "command" | "cmd" | "meta" | "super" => Self::COMMAND,
            "function" | "fn" => Self::FUNCTION,
            "caps_lock" | "capslock" | "caps" => Self::CAPS_LOCK,
            _ => return None,
        };
        Some(flag)
    }

    /// Canonical names of the flags in this set.
    pub fn names(&self) -> Vec<&'static str> {
        let table = [
            (Self::SHIFT, "shift"),
            (Self::CONTROL, "control"),
            (Self::OPTION, "option"),
            (Self::COMMAND, "command"),
            (Self::FUNCTION, "function"),
            (Self::CAPS_LOCK, "caps_lock"),
        ];
        table
            .into_iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
            .collect()
    }
}

impl Serialize for Modifiers {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

/// Result of parsing a modifier list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedModifiers {
    pub flags: Modifiers,
    /// Entries that were not recognized.
    pub unknown: Vec<String>,
}

/// Parse a list of modifier names. Never fails.
pub fn parse_modifiers(values: &[Value]) -> ParsedModifiers {
    let mut parsed = ParsedModifiers::default();
    for value in values {
        let name = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match Modifiers::from_symbolic_name(&name) {
            Some(flag) => parsed.flags |= flag,
            None => {
                tracing::warn!(modifier = %name, "unknown modifier, skipping");
                parsed.unknown.push(name);
            }
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_synonyms_fold_to_one_flag() {
        let parsed = parse_modifiers(&[json!("cmd"), json!("Command"), json!("ctrl")]);
        assert_eq!(parsed.flags, Modifiers::COMMAND | Modifiers::CONTROL);
        assert!(parsed.unknown.is_empty());
    }

    #[test]
    fn test_unknown_names_are_skipped_and_reported() {
        let parsed = parse_modifiers(&[json!("shift"), json!("hyper"), json!(3)]);
        assert_eq!(parsed.flags, Modifiers::SHIFT);
        assert_eq!(parsed.unknown, vec!["hyper", "3"]);
    }

    #[test]
    fn test_names_and_serialization() {
        let flags = Modifiers::SHIFT | Modifiers::OPTION;
        assert_eq!(flags.names(), vec!["shift", "option"]);
        assert_eq!(serde_json::to_value(flags).unwrap(), json!(["shift", "option"]));
        assert_eq!(serde_json::to_value(Modifiers::empty()).unwrap(), json!([]));
    }
}
