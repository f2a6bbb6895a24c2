//! Catalog loading.
//!
//! Reads the catalog file (YAML or JSON) and resolves environment variables.
//! The catalog is the single source of truth for servers, tool schemas,
//! routing and engine tuning.

use std::path::{Path, PathBuf};

use super::errors::EngineError;
use super::types::Catalog;

// ─── Constants ───────────────────────────────────────────────────────────────

/// File name searched for when no path is given.
pub const CATALOG_FILE_NAME: &str = "actionbridge.yaml";

/// Environment variable pointing at the catalog file.
pub const CATALOG_ENV_VAR: &str = "ACTIONBRIDGE_CATALOG";

// ─── Sources ─────────────────────────────────────────────────────────────────

/// Something the registry can read a catalog from.
///
/// The registry calls [`CatalogSource::read`] exactly once.
pub trait CatalogSource {
    fn read(&self) -> Result<Catalog, EngineError>;
}

/// Catalog stored in a file on disk.
#[derive(Debug, Clone)]
pub struct CatalogFile {
    path: PathBuf,
}

impl CatalogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogSource for CatalogFile {
    fn read(&self) -> Result<Catalog, EngineError> {
        load_catalog(&self.path)
    }
}

/// Catalog already held in memory (tests, embedding).
impl CatalogSource for Catalog {
    fn read(&self) -> Result<Catalog, EngineError> {
        Ok(self.clone())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the catalog file.
///
/// Checks `ACTIONBRIDGE_CATALOG` first, then walks upward from `start`
/// looking for `actionbridge.yaml`.
pub fn find_catalog_path(start: &Path) -> Result<PathBuf, EngineError> {
    if let Ok(path) = std::env::var(CATALOG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CATALOG_ENV_VAR} points at a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CATALOG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(EngineError::catalog(format!("could not find {CATALOG_FILE_NAME}")))
}

/// Load and parse a catalog file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing. JSON files parse as YAML.
pub fn load_catalog(path: &Path) -> Result<Catalog, EngineError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EngineError::catalog(format!("failed to read {}: {e}", path.display())))?;

    parse_catalog(&raw)
        .map_err(|e| EngineError::catalog(format!("failed to parse {}: {e}", path.display())))
}

/// Parse catalog text after env-var interpolation.
pub fn parse_catalog(raw: &str) -> Result<Catalog, serde_yaml::Error> {
    let interpolated = interpolate_env_vars(raw);
    serde_yaml::from_str(&interpolated)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
