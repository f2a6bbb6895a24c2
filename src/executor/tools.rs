//! Tools this executor serves, with their input schemas.

use serde_json::{json, Value};

use crate::protocol::ToolDescriptor;

pub const OPEN_APP: &str = "open_app";
pub const CLICK: &str = "click";
pub const TYPE_TEXT: &str = "type_text";
pub const PRESS_KEY: &str = "press_key";
pub const SCROLL: &str = "scroll";
pub const WINDOW: &str = "window";
pub const RUN_SCRIPT: &str = "run_script";

const ALL: [&str; 7] = [OPEN_APP, CLICK, TYPE_TEXT, PRESS_KEY, SCROLL, WINDOW, RUN_SCRIPT];

pub fn is_known(tool: &str) -> bool {
    ALL.contains(&tool)
}

/// Tools aimed at a process. The rest ignore `pid`.
pub fn targets_subject(tool: &str) -> bool {
    !matches!(tool, OPEN_APP | RUN_SCRIPT)
}

/// Descriptors returned by `initialize` and `tools/list`.
pub fn descriptors() -> Vec<ToolDescriptor> {
    ALL.iter()
        .map(|name| ToolDescriptor {
            name: (*name).to_string(),
            description: description(name).to_string(),
            input_schema: input_schema(name),
        })
        .collect()
}

fn description(tool: &str) -> &'static str {
    match tool {
        OPEN_APP => "Open an application, file or URL",
        CLICK => "Click at a screen position",
        TYPE_TEXT => "Type text into the focused element",
        PRESS_KEY => "Press a key with optional modifiers",
        SCROLL => "Scroll by a horizontal and vertical amount",
        WINDOW => "Focus, move, resize or close a window",
        RUN_SCRIPT => "Run a short script and capture its output",
        _ => "",
    }
}

fn input_schema(tool: &str) -> Value {
    let (mut properties, required) = match tool {
        OPEN_APP => (
            json!({
                "identifier": {"type": "string", "description": "Application name, path or URL"},
                "activate": {"type": "boolean", "default": true}
            }),
            vec!["identifier"],
        ),
        CLICK => (
            json!({
                "x": {"type": "number"},
                "y": {"type": "number"},
                "button": {"type": "string", "enum": ["left", "right", "middle"]},
                "clicks": {"type": "integer", "minimum": 1, "maximum": 3},
                "modifiers": {"type": "array", "items": {"type": "string"}}
            }),
            vec!["x", "y"],
        ),
        TYPE_TEXT => (json!({"text": {"type": "string"}}), vec!["text"]),
        PRESS_KEY => (
            json!({
                "key": {"type": "string"},
                "modifiers": {"type": "array", "items": {"type": "string"}}
            }),
            vec!["key"],
        ),
        SCROLL => (
            json!({"dx": {"type": "number"}, "dy": {"type": "number"}}),
            vec![],
        ),
        WINDOW => (
            json!({
                "operation": {
                    "type": "string",
                    "enum": ["focus", "minimize", "maximize", "restore", "close", "move", "resize"]
                },
                "x": {"type": "number"},
                "y": {"type": "number"},
                "width": {"type": "number"},
                "height": {"type": "number"}
            }),
            vec!["operation"],
        ),
        RUN_SCRIPT => (
            json!({
                "source": {"type": "string"},
                "language": {"type": "string", "enum": ["shell", "python", "applescript"]},
                "timeout_ms": {"type": "integer", "minimum": 1}
            }),
            vec!["source"],
        ),
        _ => (json!({}), vec![]),
    };

    if let Value::Object(props) = &mut properties {
        if targets_subject(tool) {
            props.insert(
                "pid".into(),
                json!({"type": "integer", "description": "Target process; 0 or -1 for the foreground process"}),
            );
        }
        for flag in ["snapshot_before", "snapshot_after", "visual_feedback"] {
            props.insert(flag.into(), json!({"type": "boolean", "default": false}));
        }
        props.insert("feedback_duration_ms".into(), json!({"type": "integer", "default": 500}));
        props.insert("step_delay_ms".into(), json!({"type": "integer", "default": 0}));
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tool_has_a_schema() {
        let tools = descriptors();
        assert_eq!(tools.len(), 7);
        for tool in &tools {
            assert!(!tool.description.is_empty(), "{} has no description", tool.name);
            assert_eq!(tool.input_schema["type"], "object");
        }
    }

    #[test]
    fn test_subject_param_only_where_targeted() {
        let tools = descriptors();
        let click = tools.iter().find(|t| t.name == CLICK).unwrap();
        assert!(click.input_schema["properties"]["pid"].is_object());
        assert_eq!(click.input_schema["required"], json!(["x", "y"]));
        let open = tools.iter().find(|t| t.name == OPEN_APP).unwrap();
        assert!(open.input_schema["properties"]["pid"].is_null());
    }

    #[test]
    fn test_is_known() {
        assert!(is_known("run_script"));
        assert!(!is_known("teleport"));
    }
}
