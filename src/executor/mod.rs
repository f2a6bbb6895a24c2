//! Action executor — the server side of a tool call.
//!
//! This module handles:
//! - Typed parameter extraction and subject resolution
//! - Composing actions and their options from validated parameters
//! - Running UI actions on one execution lane and scripts under a timer
//! - Assembling results where each slot fails independently

pub mod action;
pub mod config;
pub mod errors;
pub mod handler;
pub mod history;
pub mod lane;
pub mod modifiers;
pub mod params;
pub mod provider;
pub mod race;
pub mod result;
pub mod script;
pub mod subject;
pub mod tools;

pub use action::{ActionDescriptor, ActionKind, ActionOptions};
pub use config::ExecutorConfig;
pub use errors::{ExecutorError, ProviderError};
pub use handler::ActionExecutor;
pub use modifiers::Modifiers;
pub use provider::{CapabilityProvider, HeadlessProvider};
pub use result::ActionResult;
pub use subject::{ProcessSubjects, Subject, SubjectSource};
