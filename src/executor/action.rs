//! Action composition — validated parameters in, `ActionDescriptor` and
//! `ActionOptions` out.

use std::time::Duration;

use serde::Serialize;

use super::config::ExecutorConfig;
use super::errors::ExecutorError;
use super::modifiers::{parse_modifiers, Modifiers};
use super::params::Params;
use super::subject::{resolve_subject, Subject, SubjectSource};
use super::tools;

// ─── Action Kinds ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "left" | "primary" => Some(Self::Left),
            "right" | "secondary" => Some(Self::Right),
            "middle" | "center" => Some(Self::Middle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WindowOperation {
    Focus,
    Minimize,
    Maximize,
    Restore,
    Close,
    Move { x: f64, y: f64 },
    Resize { width: f64, height: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptLanguage {
    Shell,
    Python,
    AppleScript,
}

impl ScriptLanguage {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "shell" | "sh" | "bash" => Some(Self::Shell),
            "python" | "python3" | "py" => Some(Self::Python),
            "applescript" | "osascript" => Some(Self::AppleScript),
            _ => None,
        }
    }

    /// AppleScript needs `osascript`, which only ships with macOS.
    pub fn available(self) -> bool {
        self != Self::AppleScript || cfg!(target_os = "macos")
    }

    /// Interpreter and the flag that passes inline source.
    pub fn interpreter(self) -> (&'static str, &'static str) {
        match self {
            Self::Shell => ("sh", "-c"),
            Self::Python => ("python3", "-c"),
            Self::AppleScript => ("osascript", "-e"),
        }
    }
}

/// What to do, with kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    OpenTarget {
        identifier: String,
        activate: bool,
    },
    Pointer {
        x: f64,
        y: f64,
        button: MouseButton,
        clicks: u32,
        modifiers: Modifiers,
    },
    TypeText {
        text: String,
    },
    Key {
        key: String,
        modifiers: Modifiers,
    },
    Scroll {
        dx: f64,
        dy: f64,
    },
    Window {
        operation: WindowOperation,
    },
    Script {
        language: ScriptLanguage,
        source: String,
        timeout_ms: u64,
    },
}

impl ActionKind {
    /// Whether the action changes what is on screen.
    pub fn touches_ui(&self) -> bool {
        !matches!(self, Self::Script { .. })
    }
}

/// A fully composed action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionDescriptor {
    pub tool: String,
    #[serde(flatten)]
    pub kind: ActionKind,
    pub subject: Option<Subject>,
}

// ─── Options ─────────────────────────────────────────────────────────────────

/// How to run an action. Every field has a default and can be set per call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOptions {
    pub snapshot_before: bool,
    pub snapshot_after: bool,
    pub visual_feedback: bool,
    #[serde(serialize_with = "serialize_ms")]
    pub feedback_duration: Duration,
    #[serde(serialize_with = "serialize_ms")]
    pub step_delay: Duration,
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self {
            snapshot_before: false,
            snapshot_after: false,
            visual_feedback: false,
            feedback_duration: Duration::from_millis(500),
            step_delay: Duration::ZERO,
        }
    }
}

impl ActionOptions {
    /// Delays above `config.max_delay_ms` are clamped, since UI actions hold
    /// the execution lane while they wait.
    fn from_params(params: &Params, config: &ExecutorConfig) -> Result<Self, ExecutorError> {
        let defaults = Self::default();
        let cap = Duration::from_millis(config.max_delay_ms);
        Ok(Self {
            snapshot_before: params.optional_bool("snapshot_before")?.unwrap_or(defaults.snapshot_before),
            snapshot_after: params.optional_bool("snapshot_after")?.unwrap_or(defaults.snapshot_after),
            visual_feedback: params.optional_bool("visual_feedback")?.unwrap_or(defaults.visual_feedback),
            feedback_duration: millis(params, "feedback_duration_ms")?
                .unwrap_or(defaults.feedback_duration)
                .min(cap),
            step_delay: millis(params, "step_delay_ms")?.unwrap_or(defaults.step_delay).min(cap),
        })
    }
}

fn serialize_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

fn millis(params: &Params, name: &str) -> Result<Option<Duration>, ExecutorError> {
    match params.optional_i64(name)? {
        Some(ms) if ms < 0 => Err(ExecutorError::invalid(name, "must not be negative")),
        Some(ms) => Ok(Some(Duration::from_millis(ms as u64))),
        None => Ok(None),
    }
}

// ─── Composition ─────────────────────────────────────────────────────────────

/// A composed call, ready to execute.
#[derive(Debug, Clone)]
pub struct ComposedAction {
    pub descriptor: ActionDescriptor,
    pub options: ActionOptions,
    /// Modifier names that were skipped.
    pub ignored_modifiers: Vec<String>,
}

/// Build the action for `tool` from its parameters.
pub fn compose(
    tool: &str,
    params: &Params,
    subjects: &dyn SubjectSource,
    config: &ExecutorConfig,
) -> Result<ComposedAction, ExecutorError> {
    let mut ignored_modifiers = Vec::new();
    let mut modifiers = |params: &Params| -> Result<Modifiers, ExecutorError> {
        let listed = params.optional_array("modifiers")?;
        let parsed = parse_modifiers(listed.map(Vec::as_slice).unwrap_or_default());
        ignored_modifiers.extend(parsed.unknown);
        Ok(parsed.flags)
    };

    let kind = match tool {
        tools::OPEN_APP => ActionKind::OpenTarget {
            identifier: non_empty(params, "identifier")?,
            activate: params.optional_bool("activate")?.unwrap_or(true),
        },
        tools::CLICK => {
            let button = match params.optional_str("button")? {
                None => MouseButton::Left,
                Some(name) => MouseButton::parse(name).ok_or_else(|| {
                    ExecutorError::invalid("button", format!("unknown button '{name}'"))
                })?,
            };
            let clicks = params.optional_i64("clicks")?.unwrap_or(1);
            if !(1..=3).contains(&clicks) {
                return Err(ExecutorError::invalid("clicks", "must be between 1 and 3"));
            }
            ActionKind::Pointer {
                x: params.required_f64("x")?,
                y: params.required_f64("y")?,
                button,
                clicks: clicks as u32,
                modifiers: modifiers(params)?,
            }
        }
        tools::TYPE_TEXT => ActionKind::TypeText {
            text: params.required_str("text")?.to_string(),
        },
        tools::PRESS_KEY => ActionKind::Key {
            key: non_empty(params, "key")?,
            modifiers: modifiers(params)?,
        },
        tools::SCROLL => {
            let dx = params.optional_f64("dx")?.unwrap_or(0.0);
            let dy = params.optional_f64("dy")?.unwrap_or(0.0);
            if dx == 0.0 && dy == 0.0 {
                return Err(ExecutorError::invalid("dy", "scroll amount must be non-zero"));
            }
            ActionKind::Scroll { dx, dy }
        }
        tools::WINDOW => ActionKind::Window {
            operation: window_operation(params)?,
        },
        tools::RUN_SCRIPT => {
            let language = match params.optional_str("language")? {
                None => ScriptLanguage::Shell,
                Some(name) => ScriptLanguage::parse(name).ok_or_else(|| {
                    ExecutorError::invalid("language", format!("unsupported language '{name}'"))
                })?,
            };
            let timeout_ms = match params.optional_i64("timeout_ms")? {
                None => config.default_script_timeout_ms,
                Some(ms) if ms <= 0 => {
                    return Err(ExecutorError::invalid("timeout_ms", "must be positive"));
                }
                Some(ms) if ms as u64 > config.max_script_timeout_ms => {
                    return Err(ExecutorError::invalid(
                        "timeout_ms",
                        format!("must not exceed {}", config.max_script_timeout_ms),
                    ));
                }
                Some(ms) => ms as u64,
            };
            ActionKind::Script {
                language,
                source: non_empty(params, "source")?,
                timeout_ms,
            }
        }
        other => {
            return Err(ExecutorError::MethodNotFound {
                name: other.to_string(),
            })
        }
    };

    let options = ActionOptions::from_params(params, config)?;
    let subject = if tools::targets_subject(tool) {
        Some(resolve_subject(params, subjects)?)
    } else {
        None
    };

    Ok(ComposedAction {
        descriptor: ActionDescriptor {
            tool: tool.to_string(),
            kind,
            subject,
        },
        options,
        ignored_modifiers,
    })
}

fn non_empty(params: &Params, name: &str) -> Result<String, ExecutorError> {
    let value = params.required_str(name)?;
    if value.trim().is_empty() {
        return Err(ExecutorError::invalid(name, "must not be empty"));
    }
    Ok(value.to_string())
}

fn window_operation(params: &Params) -> Result<WindowOperation, ExecutorError> {
    let name = params.required_str("operation")?;
    let op = match name.to_ascii_lowercase().as_str() {
        "focus" | "activate" | "raise" => WindowOperation::Focus,
        "minimize" => WindowOperation::Minimize,
        "maximize" | "zoom" => WindowOperation::Maximize,
        "restore" => WindowOperation::Restore,
        "close" => WindowOperation::Close,
        "move" => WindowOperation::Move {
            x: params.required_f64("x")?,
            y: params.required_f64("y")?,
        },
        "resize" => {
            let width = params.required_f64("width")?;
            let height = params.required_f64("height")?;
            if width <= 0.0 {
                return Err(ExecutorError::invalid("width", "must be positive"));
            }
            if height <= 0.0 {
                return Err(ExecutorError::invalid("height", "must be positive"));
            }
            WindowOperation::Resize { width, height }
        }
        other => {
            return Err(ExecutorError::invalid(
                "operation",
                format!("unknown window operation '{other}'"),
            ))
        }
    };
    Ok(op)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::subject::tests::FixedSubjects;
    use serde_json::json;

    fn compose_json(tool: &str, args: serde_json::Value) -> Result<ComposedAction, ExecutorError> {
        let params = Params::from_value(args).unwrap();
        compose(tool, &params, &FixedSubjects, &ExecutorConfig::default())
    }

    fn invalid_field(err: ExecutorError) -> String {
        match err {
            ExecutorError::InvalidParams { field, .. } => field,
            other => panic!("expected InvalidParams, got {other:?}"),
        }
    }

    #[test]
    fn test_click_defaults_subject_and_options() {
        let composed = compose_json("click", json!({"x": 10, "y": 20})).unwrap();
        let descriptor = composed.descriptor;
        assert_eq!(
            descriptor.kind,
            ActionKind::Pointer {
                x: 10.0,
                y: 20.0,
                button: MouseButton::Left,
                clicks: 1,
                modifiers: Modifiers::empty(),
            }
        );
        let subject = descriptor.subject.unwrap();
        assert_eq!(subject.pid, 4242);
        assert!(subject.defaulted);
        assert_eq!(composed.options, ActionOptions::default());
        assert_eq!(composed.options.feedback_duration, Duration::from_millis(500));
    }

    #[test]
    fn test_options_override() {
        let composed = compose_json(
            "type_text",
            json!({"text": "hi", "snapshot_after": true, "step_delay_ms": 25}),
        )
        .unwrap();
        assert!(composed.options.snapshot_after);
        assert!(!composed.options.snapshot_before);
        assert_eq!(composed.options.step_delay, Duration::from_millis(25));
    }

    #[test]
    fn test_delays_are_clamped() {
        let config = ExecutorConfig {
            max_delay_ms: 2_000,
            ..ExecutorConfig::default()
        };
        let params = Params::from_value(json!({
            "text": "hi",
            "feedback_duration_ms": 3_600_000,
            "step_delay_ms": 86_400_000,
        }))
        .unwrap();
        let composed = compose("type_text", &params, &FixedSubjects, &config).unwrap();
        assert_eq!(composed.options.feedback_duration, Duration::from_secs(2));
        assert_eq!(composed.options.step_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_unknown_modifiers_reported() {
        let composed = compose_json(
            "press_key",
            json!({"key": "s", "modifiers": ["cmd", "hyper"]}),
        )
        .unwrap();
        match composed.descriptor.kind {
            ActionKind::Key { modifiers, .. } => assert_eq!(modifiers, Modifiers::COMMAND),
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(composed.ignored_modifiers, vec!["hyper"]);
    }

    #[test]
    fn test_open_app_has_no_subject() {
        let composed = compose_json("open_app", json!({"identifier": "Notes"})).unwrap();
        assert!(composed.descriptor.subject.is_none());
        assert_eq!(
            composed.descriptor.kind,
            ActionKind::OpenTarget {
                identifier: "Notes".into(),
                activate: true
            }
        );
    }

    #[test]
    fn test_validation_names_fields() {
        assert_eq!(invalid_field(compose_json("click", json!({"x": 1})).unwrap_err()), "y");
        assert_eq!(
            invalid_field(compose_json("click", json!({"x": 1, "y": 2, "clicks": 2.5})).unwrap_err()),
            "clicks"
        );
        assert_eq!(
            invalid_field(compose_json("open_app", json!({"identifier": "  "})).unwrap_err()),
            "identifier"
        );
        assert_eq!(
            invalid_field(compose_json("window", json!({"operation": "resize", "width": 0, "height": 5})).unwrap_err()),
            "width"
        );
        assert_eq!(invalid_field(compose_json("scroll", json!({})).unwrap_err()), "dy");
    }

    #[test]
    fn test_script_timeout_bounds() {
        let composed = compose_json("run_script", json!({"source": "echo hi"})).unwrap();
        match composed.descriptor.kind {
            ActionKind::Script { timeout_ms, language, .. } => {
                assert_eq!(timeout_ms, 30_000);
                assert_eq!(language, ScriptLanguage::Shell);
            }
            other => panic!("unexpected kind {other:?}"),
        }
        let err = compose_json("run_script", json!({"source": "x", "timeout_ms": 999_999_999})).unwrap_err();
        assert_eq!(invalid_field(err), "timeout_ms");
    }

    #[test]
    fn test_unknown_tool() {
        let err = compose_json("teleport", json!({})).unwrap_err();
        assert!(matches!(err, ExecutorError::MethodNotFound { .. }));
    }

    #[test]
    fn test_descriptor_serialization() {
        let composed = compose_json("window", json!({"operation": "move", "x": 1, "y": 2, "pid": 77})).unwrap();
        let value = serde_json::to_value(&composed.descriptor).unwrap();
        assert_eq!(value["kind"], "window");
        assert_eq!(value["operation"]["op"], "move");
        assert_eq!(value["subject"]["name"], "Notes");
    }
}
