//! Deterministic compiler from contract questions to parameterized SQL.
//!
//! A question (free text or a structured `key: value;` comment) is read into
//! a dialect-free `QueryIntent`, optionally enriched with rules learned from
//! feedback, and rendered as a single SELECT with named binds.

pub mod aliases;
pub mod bool_groups;
pub mod comment;
pub mod compiler;
pub mod config;
pub mod context;
pub mod dates;
pub mod error;
pub mod fuzzy_matcher;
pub mod intent;
pub mod intent_builder;
pub mod normalize;
pub mod rules;
pub mod signature;
pub mod sql;
pub mod synonyms;
pub mod terms;

pub use compiler::{compile, compile_with_rules, CompileOutput};
pub use config::Settings;
pub use context::AppContext;
pub use error::{Degradation, NlqError, Result};
pub use intent::QueryIntent;
