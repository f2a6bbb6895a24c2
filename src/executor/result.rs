//! Result assembly.
//!
//! The action and the optional before/after snapshots each keep their own
//! outcome. One failing slot never discards data from the others, and
//! failure reasons are carried verbatim.

use serde::Serialize;
use serde_json::{json, Value};

use super::subject::Subject;
use crate::protocol::{CallToolResult, Content};

pub type Slot = Result<Value, String>;

#[derive(Debug, Clone)]
pub struct ActionResult {
    pub tool: String,
    pub action: Slot,
    pub before: Option<Slot>,
    pub after: Option<Slot>,
    pub subject: Option<Subject>,
    pub ignored_modifiers: Vec<String>,
    /// The action was cut off by its time limit.
    pub timed_out: bool,
    pub duration_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Wire<'a> {
    tool: &'a str,
    is_error: bool,
    action: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    after: Option<Value>,
    subject: &'a Option<Subject>,
    #[serde(skip_serializing_if = "no_entries")]
    ignored_modifiers: &'a [String],
    duration_ms: u64,
}

fn no_entries(list: &&[String]) -> bool {
    list.is_empty()
}

fn slot_json(slot: &Slot) -> Value {
    match slot {
        Ok(value) => json!({ "ok": true, "value": value }),
        Err(reason) => json!({ "ok": false, "error": reason }),
    }
}

impl ActionResult {
    /// True if the action or any requested snapshot failed.
    pub fn is_error(&self) -> bool {
        self.action.is_err()
            || matches!(self.before, Some(Err(_)))
            || matches!(self.after, Some(Err(_)))
    }

    pub fn to_json(&self) -> Value {
        let wire = Wire {
            tool: &self.tool,
            is_error: self.is_error(),
            action: slot_json(&self.action),
            before: self.before.as_ref().map(slot_json),
            after: self.after.as_ref().map(slot_json),
            subject: &self.subject,
            ignored_modifiers: &self.ignored_modifiers,
            duration_ms: self.duration_ms,
        };
        serde_json::to_value(wire).unwrap_or(Value::Null)
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let mut text = match &self.action {
            Ok(_) => format!("{} succeeded", self.tool),
            Err(reason) => format!("{} failed: {reason}", self.tool),
        };
        if let Some(subject) = &self.subject {
            match &subject.name {
                Some(name) => text.push_str(&format!(" (subject {} {name})", subject.pid)),
                None => text.push_str(&format!(" (subject {})", subject.pid)),
            }
        }
        for (label, slot) in [("before", &self.before), ("after", &self.after)] {
            if let Some(Err(reason)) = slot {
                text.push_str(&format!("; {label} snapshot failed: {reason}"));
            }
        }
        if !self.ignored_modifiers.is_empty() {
            text.push_str(&format!(
                "; ignored modifiers: {}",
                self.ignored_modifiers.join(", ")
            ));
        }
        text
    }

    pub fn into_call_result(self) -> CallToolResult {
        CallToolResult {
            content: vec![Content::text(self.summary()), Content::json(self.to_json())],
            is_error: self.is_error(),
        }
    }
}
