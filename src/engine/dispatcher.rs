//! Tool dispatcher — resolves a loose action name and raw arguments into
//! exactly one (server, tool, validated arguments) triple.
//!
//! Resolution order:
//! 1. Exact canonical id, then the normalized id, then the synonym index
//! 2. Schema fetch
//! 3. Auto-fill of missing fields from aliases
//! 4. Type coercion, collecting every failure
//! 5. Server selection (priority → fallback, or owner → next tier)
//!
//! Dispatch never performs I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;

use super::coercion::{coerce, field_aliases, type_name};
use super::errors::{EngineError, FieldError};
use super::registry::{normalize_action_name, SchemaRegistry};
use super::types::{ParamType, ServerDescriptor, SynonymEntry, ToolSchema};

// ─── Resolution ──────────────────────────────────────────────────────────────

/// How an action name reached its canonical tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum ResolvedVia {
    Canonical,
    Synonym { alias: String },
}

/// A fully resolved, validated call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub server: String,
    pub tool: String,
    /// Validated argument object.
    pub arguments: Value,
    #[serde(flatten)]
    pub via: ResolvedVia,
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

pub struct Dispatcher {
    registry: Arc<SchemaRegistry>,
    /// Server id → end of its cool-down window.
    unavailable: Mutex<HashMap<String, Instant>>,
    cooldown: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        let cooldown = Duration::from_millis(registry.engine_config().unavailable_cooldown_ms);
        Self {
            registry,
            unavailable: Mutex::new(HashMap::new()),
            cooldown,
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Resolve on behalf of an anonymous caller.
    pub fn resolve(&self, action: &str, raw_args: &Value) -> Result<Resolution, EngineError> {
        self.resolve_as(None, action, raw_args)
    }

    /// Resolve on behalf of `caller`; servers not visible to it are skipped.
    pub fn resolve_as(
        &self,
        caller: Option<&str>,
        action: &str,
        raw_args: &Value,
    ) -> Result<Resolution, EngineError> {
        let (tool_id, synonym) = self.lookup(action)?;
        let schema = self.registry.get_tool_schema(&tool_id)?;
        let arguments = validate_arguments(&schema, raw_args)?;
        let server = self.select_server(&schema, synonym, caller)?;

        let via = match synonym {
            Some(entry) => ResolvedVia::Synonym {
                alias: entry.alias.clone(),
            },
            None => ResolvedVia::Canonical,
        };

        tracing::debug!(action, tool = %tool_id, server = %server, ?via, "action resolved");

        Ok(Resolution {
            server,
            tool: tool_id,
            arguments,
            via,
        })
    }

    // ─── Availability ────────────────────────────────────────────────────

    /// Take a server out of routing for the cool-down window.
    pub fn mark_unavailable(&self, server: &str) {
        let until = Instant::now() + self.cooldown;
        if let Ok(mut map) = self.unavailable.lock() {
            map.insert(server.to_string(), until);
        }
        tracing::warn!(server, cooldown_ms = self.cooldown.as_millis() as u64, "server marked unavailable");
    }

    /// Put a server back into routing.
    pub fn mark_available(&self, server: &str) {
        if let Ok(mut map) = self.unavailable.lock() {
            if map.remove(server).is_some() {
                tracing::info!(server, "server available again");
            }
        }
    }

    /// Whether `server` can take calls from `caller` right now.
    pub fn is_available(&self, server: &ServerDescriptor, caller: Option<&str>) -> bool {
        if !server.enabled || !server.visible_to(caller) {
            return false;
        }
        let Ok(mut map) = self.unavailable.lock() else {
            return true;
        };
        match map.get(&server.id) {
            Some(until) if Instant::now() < *until => false,
            Some(_) => {
                map.remove(&server.id);
                true
            }
            None => true,
        }
    }

    // ─── Steps ───────────────────────────────────────────────────────────

    fn lookup(&self, action: &str) -> Result<(String, Option<&SynonymEntry>), EngineError> {
        if self.registry.contains_tool(action) {
            return Ok((action.to_string(), None));
        }
        let normalized = normalize_action_name(action);
        if self.registry.contains_tool(&normalized) {
            return Ok((normalized, None));
        }
        if let Some(entry) = self.registry.synonym(action) {
            return Ok((entry.tool.clone(), Some(entry)));
        }
        Err(EngineError::tool_not_found(
            action,
            self.registry.find_similar(action, 3),
        ))
    }

    fn select_server(
        &self,
        schema: &ToolSchema,
        synonym: Option<&SynonymEntry>,
        caller: Option<&str>,
    ) -> Result<String, EngineError> {
        let routed = synonym.filter(|s| s.priority.is_some() || s.fallback.is_some());

        if let Some(entry) = routed {
            for candidate in entry.priority.iter().chain(entry.fallback.iter()) {
                if let Some(server) = self.registry.get_server(candidate) {
                    if self.is_available(&server, caller) {
                        return Ok(server.id.clone());
                    }
                }
            }
            return Err(no_server_for(&schema.id));
        }

        let mut candidates = self.registry.servers_for_tool(&schema.id);
        // Owner first, then the rest by tier; the sort is stable.
        if let Some(rest) = candidates.get_mut(1..) {
            rest.sort_by_key(|s| s.tier);
        }
        candidates
            .iter()
            .find(|s| self.is_available(s, caller))
            .map(|s| s.id.clone())
            .ok_or_else(|| no_server_for(&schema.id))
    }
}

fn no_server_for(tool: &str) -> EngineError {
    EngineError::NotFound {
        what: "available server for tool",
        name: tool.to_string(),
        suggestions: Vec::new(),
    }
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Fill, coerce and check arguments against a schema.
///
/// Every missing and every invalid field is reported in one error.
fn validate_arguments(schema: &ToolSchema, raw_args: &Value) -> Result<Value, EngineError> {
    let mut args = match raw_args {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(EngineError::Validation {
                tool: schema.id.clone(),
                missing: Vec::new(),
                invalid: vec![FieldError {
                    field: "arguments".into(),
                    reason: format!("expected object, got {}", type_name(other)),
                }],
            });
        }
    };

    let declared: Vec<&str> = schema
        .required
        .iter()
        .map(|p| p.name.as_str())
        .chain(schema.optional.iter().map(|p| p.name.as_str()))
        .collect();

    let mut missing = Vec::new();
    let mut invalid = Vec::new();

    for param in &schema.required {
        match take_field(&mut args, &param.name, &param.aliases, &declared) {
            Some(value) => apply_coercion(&mut args, &param.name, &value, param.ty, &mut invalid),
            None => missing.push(param.name.clone()),
        }
    }

    for param in &schema.optional {
        match take_field(&mut args, &param.name, &param.aliases, &declared) {
            Some(value) => apply_coercion(&mut args, &param.name, &value, param.ty, &mut invalid),
            None => {
                args.remove(&param.name);
                if let Some(default) = &param.default {
                    args.insert(param.name.clone(), default.clone());
                }
            }
        }
    }

    if !missing.is_empty() || !invalid.is_empty() {
        return Err(EngineError::Validation {
            tool: schema.id.clone(),
            missing,
            invalid,
        });
    }

    Ok(Value::Object(args))
}

/// Value for `name`, falling back to schema aliases then the fixed table.
///
/// Null counts as absent. An alias that is itself a declared parameter is
/// never borrowed.
fn take_field(
    args: &mut Map<String, Value>,
    name: &str,
    schema_aliases: &[String],
    declared: &[&str],
) -> Option<Value> {
    if let Some(value) = args.get(name).filter(|v| !v.is_null()) {
        return Some(value.clone());
    }

    let candidates = schema_aliases
        .iter()
        .map(String::as_str)
        .chain(field_aliases(name).iter().copied());

    for alias in candidates {
        if declared.contains(&alias) {
            continue;
        }
        if let Some(value) = args.remove(alias).filter(|v| !v.is_null()) {
            tracing::debug!(field = name, alias, "auto-filled field from alias");
            return Some(value);
        }
    }
    None
}

fn apply_coercion(
    args: &mut Map<String, Value>,
    name: &str,
    value: &Value,
    ty: ParamType,
    invalid: &mut Vec<FieldError>,
) {
    match coerce(value, ty) {
        Ok(coerced) => {
            args.insert(name.to_string(), coerced);
        }
        Err(reason) => invalid.push(FieldError {
            field: name.to_string(),
            reason,
        }),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::errors::ErrorKind;
    use crate::engine::registry::tests::sample_catalog;
    use crate::engine::types::{LaunchSpec, ParamSpec};
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(SchemaRegistry::load(&sample_catalog()).unwrap()))
    }

    #[test]
    fn test_resolve_canonical() {
        let d = dispatcher();
        let r = d.resolve("open_app", &json!({"identifier": "Notes"})).unwrap();
        assert_eq!(r.server, "desktop");
        assert_eq!(r.tool, "open_app");
        assert_eq!(r.via, ResolvedVia::Canonical);
        assert_eq!(r.arguments["identifier"], "Notes");
        assert_eq!(r.arguments["activate"], true);
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let d = dispatcher();
        let args = json!({"x": 1, "y": 2});
        let first = d.resolve("tap", &args).unwrap();
        for _ in 0..5 {
            assert_eq!(d.resolve("tap", &args).unwrap(), first);
        }
        assert_eq!(first.tool, "click");
        assert_eq!(
            first.via,
            ResolvedVia::Synonym {
                alias: "tap".into()
            }
        );
    }

    #[test]
    fn test_resolve_normalizes_name() {
        let d = dispatcher();
        let r = d.resolve("Open-App", &json!({"identifier": "Mail"})).unwrap();
        assert_eq!(r.tool, "open_app");
    }

    #[test]
    fn test_unknown_action_is_not_found_with_suggestion() {
        let d = dispatcher();
        let err = d.resolve("opn_app", &json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        match err {
            EngineError::NotFound { suggestions, .. } => {
                assert!(suggestions.contains(&"open_app".to_string()));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_missing_field_filled_from_alias() {
        let d = dispatcher();
        let r = d.resolve("open_app", &json!({"app_name": "Notes"})).unwrap();
        assert_eq!(r.arguments["identifier"], "Notes");
        assert!(r.arguments.get("app_name").is_none());
    }

    #[test]
    fn test_schema_alias_for_optional() {
        let d = dispatcher();
        let r = d
            .resolve("open_app", &json!({"identifier": "Notes", "focus": "no"}))
            .unwrap();
        assert_eq!(r.arguments["activate"], false);
    }

    #[test]
    fn test_every_missing_field_reported() {
        let d = dispatcher();
        let err = d.resolve("send_mail", &json!({"subject": "hi"})).unwrap_err();
        match err {
            EngineError::Validation { missing, invalid, .. } => {
                assert_eq!(missing, vec!["to", "body"]);
                assert!(invalid.is_empty());
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_and_invalid_accumulate() {
        let d = dispatcher();
        let err = d
            .resolve("click", &json!({"x": "left edge", "pid": 1.5}))
            .unwrap_err();
        match err {
            EngineError::Validation { missing, invalid, .. } => {
                assert_eq!(missing, vec!["y"]);
                let fields: Vec<&str> = invalid.iter().map(|f| f.field.as_str()).collect();
                assert_eq!(fields, vec!["x", "pid"]);
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_list_and_map_coercion() {
        let d = dispatcher();
        let r = d
            .resolve(
                "send_mail",
                &json!({
                    "to": "a@x.com, b@y.com",
                    "subject": "hi",
                    "message": "hello",
                    "headers": "{\"X-Tag\": \"1\"}"
                }),
            )
            .unwrap();
        assert_eq!(r.arguments["to"], json!(["a@x.com", "b@y.com"]));
        assert_eq!(r.arguments["body"], "hello");
        assert_eq!(r.arguments["headers"]["X-Tag"], "1");
    }

    #[test]
    fn test_declared_param_never_borrowed_as_alias() {
        let mut catalog = sample_catalog();
        catalog.tools[0].required.push(ParamSpec {
            name: "name".into(),
            ty: ParamType::String,
            aliases: vec![],
        });
        let d = Dispatcher::new(Arc::new(SchemaRegistry::load(&catalog).unwrap()));
        let err = d.resolve("open_app", &json!({"name": "Notes"})).unwrap_err();
        match err {
            EngineError::Validation { missing, .. } => assert_eq!(missing, vec!["identifier"]),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let d = dispatcher();
        let err = d.resolve("click", &json!([1, 2])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_synonym_priority_then_fallback() {
        let d = dispatcher();
        let args = json!({"identifier": "Notes"});
        assert_eq!(d.resolve("launch", &args).unwrap().server, "desktop");

        d.mark_unavailable("desktop");
        assert_eq!(d.resolve("launch", &args).unwrap().server, "desktop_backup");

        d.mark_unavailable("desktop_backup");
        let err = d.resolve("launch", &args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        d.mark_available("desktop");
        assert_eq!(d.resolve("launch", &args).unwrap().server, "desktop");
    }

    #[test]
    fn test_owner_then_next_tier_without_routing() {
        let d = dispatcher();
        let args = json!({"identifier": "Notes"});
        d.mark_unavailable("desktop");
        assert_eq!(d.resolve("open_app", &args).unwrap().server, "desktop_backup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expires() {
        let d = dispatcher();
        let args = json!({"identifier": "Notes"});
        d.mark_unavailable("desktop");
        assert_eq!(d.resolve("open_app", &args).unwrap().server, "desktop_backup");

        tokio::time::advance(Duration::from_millis(30_001)).await;
        assert_eq!(d.resolve("open_app", &args).unwrap().server, "desktop");
    }

    #[test]
    fn test_visibility_and_enabled() {
        let mut catalog = sample_catalog();
        catalog.servers[0].visibility = vec!["planner".into()];
        catalog.servers[1].enabled = false;
        let d = Dispatcher::new(Arc::new(SchemaRegistry::load(&catalog).unwrap()));
        let args = json!({"identifier": "Notes"});

        assert_eq!(
            d.resolve_as(Some("planner"), "open_app", &args).unwrap().server,
            "desktop"
        );
        let err = d.resolve_as(Some("chat"), "open_app", &args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_servers_by_tier_skip_owner_order() {
        let mut catalog = sample_catalog();
        catalog.servers.push(ServerDescriptor {
            id: "desktop_fast".into(),
            launch: LaunchSpec {
                command: "actionbridge".into(),
                ..LaunchSpec::default()
            },
            tier: 0,
            enabled: true,
            visibility: vec![],
        });
        catalog.tools[0].also_served_by = vec!["desktop_backup".into(), "desktop_fast".into()];
        let d = Dispatcher::new(Arc::new(SchemaRegistry::load(&catalog).unwrap()));

        d.mark_unavailable("desktop");
        let r = d.resolve("open_app", &json!({"identifier": "Notes"})).unwrap();
        assert_eq!(r.server, "desktop_fast");
    }
}
