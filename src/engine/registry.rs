//! Schema registry — the catalog of servers, tool schemas and synonyms.
//!
//! Provides:
//! - One-shot loading and validation of the catalog
//! - Tool schema lookup by canonical id, with hit/miss counters
//! - Owning-server lookup
//! - The alias index used by the dispatcher
//! - Similar-name suggestions for unknown tools

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::config::CatalogSource;
use super::errors::EngineError;
use super::types::{Catalog, EngineConfig, ServerDescriptor, SynonymEntry, ToolSchema};

// ─── CacheStats ──────────────────────────────────────────────────────────────

/// Snapshot of schema lookup counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

// ─── SchemaRegistry ──────────────────────────────────────────────────────────

/// Read-only registry built once from a catalog.
///
/// There is no mutation API; share it behind an `Arc`.
#[derive(Debug)]
pub struct SchemaRegistry {
    servers: HashMap<String, Arc<ServerDescriptor>>,
    tools: HashMap<String, Arc<ToolSchema>>,
    /// Normalized alias → entry.
    synonyms: HashMap<String, SynonymEntry>,
    engine: EngineConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SchemaRegistry {
    /// Read the catalog from `source` (exactly once) and build the registry.
    ///
    /// Fails fast on a malformed catalog.
    pub fn load(source: &dyn CatalogSource) -> Result<Self, EngineError> {
        let catalog = source.read()?;
        Self::from_catalog(catalog)
    }

    /// Validate a parsed catalog and build the lookup maps.
    pub fn from_catalog(catalog: Catalog) -> Result<Self, EngineError> {
        let mut servers = HashMap::new();
        for server in catalog.servers {
            if server.id.trim().is_empty() {
                return Err(EngineError::catalog("server with empty id"));
            }
            if server.launch.command.trim().is_empty() {
                return Err(EngineError::catalog(format!(
                    "server '{}' has no launch command",
                    server.id
                )));
            }
            let id = server.id.clone();
            if servers.insert(id.clone(), Arc::new(server)).is_some() {
                return Err(EngineError::catalog(format!("duplicate server id '{id}'")));
            }
        }

        let mut tools = HashMap::new();
        for tool in catalog.tools {
            validate_tool(&tool, &servers)?;
            let id = tool.id.clone();
            if tools.insert(id.clone(), Arc::new(tool)).is_some() {
                return Err(EngineError::catalog(format!("duplicate tool id '{id}'")));
            }
        }

        let mut synonyms = HashMap::new();
        for entry in catalog.routing {
            let key = normalize_action_name(&entry.alias);
            if key.is_empty() {
                return Err(EngineError::catalog("routing entry with empty alias"));
            }
            let Some(tool) = tools.get(&entry.tool) else {
                return Err(EngineError::catalog(format!(
                    "alias '{}' points at unknown tool '{}'",
                    entry.alias, entry.tool
                )));
            };
            if tools.contains_key(&entry.alias) && entry.alias != entry.tool {
                return Err(EngineError::catalog(format!(
                    "alias '{}' shadows a canonical tool id",
                    entry.alias
                )));
            }
            for server in entry.priority.iter().chain(entry.fallback.iter()) {
                if !tool.serving_servers().any(|s| s == server) {
                    return Err(EngineError::catalog(format!(
                        "alias '{}' routes to server '{server}', which does not serve '{}'",
                        entry.alias, entry.tool
                    )));
                }
            }
            if let Some(previous) = synonyms.insert(key, entry) {
                return Err(EngineError::catalog(format!(
                    "alias '{}' declared more than once",
                    previous.alias
                )));
            }
        }

        tracing::info!(
            servers = servers.len(),
            tools = tools.len(),
            aliases = synonyms.len(),
            "schema registry loaded"
        );

        Ok(Self {
            servers,
            tools,
            synonyms,
            engine: catalog.engine,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    // ─── Lookups ─────────────────────────────────────────────────────────

    /// Look up a tool schema by canonical id. Counts a hit or a miss.
    pub fn get_tool_schema(&self, tool_id: &str) -> Result<Arc<ToolSchema>, EngineError> {
        match self.tools.get(tool_id) {
            Some(schema) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::clone(schema))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(EngineError::tool_not_found(tool_id, self.find_similar(tool_id, 3)))
            }
        }
    }

    /// Get the server that owns a tool.
    pub fn get_server_for_tool(&self, tool_id: &str) -> Result<String, EngineError> {
        self.tools
            .get(tool_id)
            .map(|schema| schema.server.clone())
            .ok_or_else(|| EngineError::tool_not_found(tool_id, Vec::new()))
    }

    /// Every server able to serve a tool, owning server first.
    pub fn servers_for_tool(&self, tool_id: &str) -> Vec<Arc<ServerDescriptor>> {
        let Some(schema) = self.tools.get(tool_id) else {
            return Vec::new();
        };
        schema
            .serving_servers()
            .filter_map(|id| self.servers.get(id).cloned())
            .collect()
    }

    /// Whether a canonical tool id exists. Does not touch the counters.
    pub fn contains_tool(&self, tool_id: &str) -> bool {
        self.tools.contains_key(tool_id)
    }

    pub fn get_server(&self, server_id: &str) -> Option<Arc<ServerDescriptor>> {
        self.servers.get(server_id).cloned()
    }

    /// Look up a synonym by alias (normalized).
    pub fn synonym(&self, alias: &str) -> Option<&SynonymEntry> {
        self.synonyms.get(&normalize_action_name(alias))
    }

    /// All tool schemas, sorted by id.
    pub fn tools(&self) -> Vec<Arc<ToolSchema>> {
        let mut tools: Vec<Arc<ToolSchema>> = self.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }

    /// All servers, sorted by tier then id.
    pub fn servers(&self) -> Vec<Arc<ServerDescriptor>> {
        let mut servers: Vec<Arc<ServerDescriptor>> = self.servers.values().cloned().collect();
        servers.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.id.cmp(&b.id)));
        servers
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry has no tools.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Find up to `max_results` tool ids or aliases similar to `name`.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let query = normalize_action_name(name);

        let mut scored: Vec<(String, f64)> = self
            .tools
            .keys()
            .chain(self.synonyms.values().map(|s| &s.alias))
            .map(|candidate| (candidate.clone(), similarity(&query, candidate)))
            .filter(|(_, score)| *score > 0.3)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.dedup_by(|a, b| a.0 == b.0);
        scored.truncate(max_results);
        scored.into_iter().map(|(name, _)| name).collect()
    }
}

fn validate_tool(
    tool: &ToolSchema,
    servers: &HashMap<String, Arc<ServerDescriptor>>,
) -> Result<(), EngineError> {
    if tool.id.trim().is_empty() {
        return Err(EngineError::catalog("tool with empty id"));
    }
    for server in tool.serving_servers() {
        if !servers.contains_key(server) {
            return Err(EngineError::catalog(format!(
                "tool '{}' references unknown server '{server}'",
                tool.id
            )));
        }
    }

    let mut seen = HashSet::new();
    let names = tool
        .required
        .iter()
        .map(|p| p.name.as_str())
        .chain(tool.optional.iter().map(|p| p.name.as_str()));
    for name in names {
        if !seen.insert(name) {
            return Err(EngineError::catalog(format!(
                "tool '{}' declares parameter '{name}' twice",
                tool.id
            )));
        }
    }
    Ok(())
}

/// Normalize an action name for alias lookup: trimmed, lowercase, with
/// `-`, `.` and spaces folded to `_`.
pub(crate) fn normalize_action_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' | '.' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    let n = b_bytes.len();

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for (i, a_byte) in a_bytes.iter().enumerate() {
        curr[0] = i + 1;
        for j in 1..=n {
            let cost = usize::from(*a_byte != b_bytes[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized similarity between two strings (0.0 = completely different, 1.0 = identical).
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::engine::types::{LaunchSpec, OptionalParam, ParamSpec, ParamType};

    pub(crate) fn server(id: &str, tier: u32) -> ServerDescriptor {
        ServerDescriptor {
            id: id.into(),
            launch: LaunchSpec {
                command: "actionbridge".into(),
                args: vec!["serve".into()],
                ..LaunchSpec::default()
            },
            tier,
            enabled: true,
            visibility: vec![],
        }
    }

    fn required(name: &str, ty: ParamType) -> ParamSpec {
        ParamSpec {
            name: name.into(),
            ty,
            aliases: vec![],
        }
    }

    /// Catalog used across the engine tests: a desktop server, a backup
    /// desktop server and a mail server.
    pub(crate) fn sample_catalog() -> Catalog {
        Catalog {
            servers: vec![server("desktop", 0), server("desktop_backup", 1), server("mail", 0)],
            tools: vec![
                ToolSchema {
                    id: "open_app".into(),
                    server: "desktop".into(),
                    also_served_by: vec!["desktop_backup".into()],
                    required: vec![required("identifier", ParamType::String)],
                    optional: vec![OptionalParam {
                        name: "activate".into(),
                        ty: ParamType::Boolean,
                        default: Some(serde_json::json!(true)),
                        aliases: vec!["focus".into()],
                    }],
                    description: "Open an application".into(),
                },
                ToolSchema {
                    id: "click".into(),
                    server: "desktop".into(),
                    also_served_by: vec![],
                    required: vec![
                        required("x", ParamType::Float),
                        required("y", ParamType::Float),
                    ],
                    optional: vec![
                        OptionalParam {
                            name: "pid".into(),
                            ty: ParamType::Integer,
                            default: None,
                            aliases: vec![],
                        },
                        OptionalParam {
                            name: "modifiers".into(),
                            ty: ParamType::Array,
                            default: None,
                            aliases: vec![],
                        },
                    ],
                    description: "Click at a point".into(),
                },
                ToolSchema {
                    id: "send_mail".into(),
                    server: "mail".into(),
                    also_served_by: vec![],
                    required: vec![
                        required("to", ParamType::Array),
                        required("subject", ParamType::String),
                        required("body", ParamType::String),
                    ],
                    optional: vec![OptionalParam {
                        name: "headers".into(),
                        ty: ParamType::Object,
                        default: None,
                        aliases: vec![],
                    }],
                    description: "Send an email".into(),
                },
            ],
            routing: vec![
                SynonymEntry {
                    alias: "launch".into(),
                    tool: "open_app".into(),
                    priority: Some("desktop".into()),
                    fallback: Some("desktop_backup".into()),
                },
                SynonymEntry {
                    alias: "tap".into(),
                    tool: "click".into(),
                    priority: None,
                    fallback: None,
                },
            ],
            engine: EngineConfig::default(),
        }
    }

    /// Counts how often the catalog is read.
    struct CountingSource {
        catalog: Catalog,
        reads: Cell<u32>,
    }

    impl CatalogSource for CountingSource {
        fn read(&self) -> Result<Catalog, EngineError> {
            self.reads.set(self.reads.get() + 1);
            Ok(self.catalog.clone())
        }
    }

    #[test]
    fn test_load_and_lookup() {
        let registry = SchemaRegistry::load(&sample_catalog()).unwrap();
        assert_eq!(registry.len(), 3);
        let schema = registry.get_tool_schema("open_app").unwrap();
        assert_eq!(schema.server, "desktop");
        assert_eq!(registry.get_server_for_tool("send_mail").unwrap(), "mail");
    }

    #[test]
    fn test_repeated_lookups_hit_cache_and_read_catalog_once() {
        let source = CountingSource {
            catalog: sample_catalog(),
            reads: Cell::new(0),
        };
        let registry = SchemaRegistry::load(&source).unwrap();

        let first = registry.get_tool_schema("click").unwrap();
        for _ in 0..10 {
            let again = registry.get_tool_schema("click").unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }

        assert_eq!(source.reads.get(), 1);
        assert_eq!(registry.cache_stats(), CacheStats { hits: 11, misses: 0 });
    }

    #[test]
    fn test_unknown_tool_counts_miss_and_suggests() {
        let registry = SchemaRegistry::load(&sample_catalog()).unwrap();
        let err = registry.get_tool_schema("clik").unwrap_err();
        match err {
            EngineError::NotFound { what, suggestions, .. } => {
                assert_eq!(what, "tool");
                assert_eq!(suggestions.first().map(String::as_str), Some("click"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert_eq!(registry.cache_stats().misses, 1);
    }

    #[test]
    fn test_synonym_lookup_is_normalized() {
        let registry = SchemaRegistry::load(&sample_catalog()).unwrap();
        assert_eq!(registry.synonym("Launch").unwrap().tool, "open_app");
        assert!(registry.synonym("nope").is_none());
    }

    #[test]
    fn test_duplicate_server_rejected() {
        let mut catalog = sample_catalog();
        catalog.servers.push(server("desktop", 3));
        let err = SchemaRegistry::load(&catalog).unwrap_err();
        assert!(err.to_string().contains("duplicate server id 'desktop'"));
    }

    #[test]
    fn test_tool_with_unknown_server_rejected() {
        let mut catalog = sample_catalog();
        catalog.tools[0].also_served_by.push("ghost".into());
        let err = SchemaRegistry::load(&catalog).unwrap_err();
        assert!(err.to_string().contains("unknown server 'ghost'"));
    }

    #[test]
    fn test_alias_to_unknown_tool_rejected() {
        let mut catalog = sample_catalog();
        catalog.routing.push(SynonymEntry {
            alias: "fly".into(),
            tool: "teleport".into(),
            priority: None,
            fallback: None,
        });
        assert!(SchemaRegistry::load(&catalog).is_err());
    }

    #[test]
    fn test_alias_shadowing_tool_rejected() {
        let mut catalog = sample_catalog();
        catalog.routing.push(SynonymEntry {
            alias: "click".into(),
            tool: "open_app".into(),
            priority: None,
            fallback: None,
        });
        let err = SchemaRegistry::load(&catalog).unwrap_err();
        assert!(err.to_string().contains("shadows"));
    }

    #[test]
    fn test_priority_server_must_serve_tool() {
        let mut catalog = sample_catalog();
        catalog.routing[0].fallback = Some("mail".into());
        let err = SchemaRegistry::load(&catalog).unwrap_err();
        assert!(err.to_string().contains("does not serve"));
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let mut catalog = sample_catalog();
        catalog.tools[1].required.push(required("x", ParamType::Float));
        assert!(SchemaRegistry::load(&catalog).is_err());
    }

    #[test]
    fn test_servers_sorted_by_tier() {
        let registry = SchemaRegistry::load(&sample_catalog()).unwrap();
        let ids: Vec<String> = registry.servers().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["desktop", "mail", "desktop_backup"]);
    }

    #[test]
    fn test_levenshtein_basic() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_similarity_range() {
        assert!((similarity("abc", "abc") - 1.0).abs() < f64::EPSILON);
        assert!(similarity("abc", "xyz") < 0.1);
    }

    #[test]
    fn test_normalize_action_name() {
        assert_eq!(normalize_action_name(" Open-App "), "open_app");
        assert_eq!(normalize_action_name("window.focus"), "window_focus");
    }
}
