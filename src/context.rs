//! Process-wide state: the settings snapshot and the rule store.

use crate::compiler::{self, CompileOutput};
use crate::config::{Settings, SettingsHandle};
use crate::error::{NlqError, Result};
use crate::rules::{self, Feedback, PatchRecord, RateOutcome, RuleRecord, RuleStore, SqliteRuleStore};
use crate::signature::Signature;
use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Stand-in when no database is configured; every call fails, which the
/// feedback path reports without failing.
struct NoRuleStore;

impl NoRuleStore {
    fn err<T>() -> Result<T> {
        Err(NlqError::RuleStore("no rule store configured".to_string()))
    }
}

impl RuleStore for NoRuleStore {
    fn rules_by_signature(&self, _: &str, _: &Signature) -> Result<Vec<RuleRecord>> {
        Self::err()
    }

    fn rules_by_question(&self, _: &str, _: &str) -> Result<Vec<RuleRecord>> {
        Self::err()
    }

    fn insert_rule(&self, _: &RuleRecord) -> Result<i64> {
        Self::err()
    }

    fn insert_patch(&self, _: &PatchRecord) -> Result<i64> {
        Self::err()
    }
}

pub struct AppContext {
    settings: SettingsHandle,
    store: Option<Arc<dyn RuleStore>>,
}

impl AppContext {
    pub fn new(settings: Settings, store: Option<Arc<dyn RuleStore>>) -> Result<Self> {
        Ok(Self {
            settings: SettingsHandle::new(settings)?,
            store,
        })
    }

    /// Settings from a JSON file (built-in profile when absent) and an
    /// optional SQLite rules database
    pub fn from_paths(settings_path: Option<&Path>, rules_db: Option<&Path>) -> Result<Self> {
        let settings = match settings_path {
            Some(path) => Settings::from_json_file(path)?,
            None => Settings::contracts_default(),
        };
        let store: Option<Arc<dyn RuleStore>> = match rules_db {
            Some(path) => Some(Arc::new(SqliteRuleStore::open(path)?)),
            None => None,
        };
        info!(
            "Context ready: table {}, dialect {}, rule store {}",
            settings.table,
            settings.dialect.name(),
            if store.is_some() { "enabled" } else { "disabled" }
        );
        Self::new(settings, store)
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.snapshot()
    }

    /// Swap the settings snapshot; in-flight compiles keep the old one
    pub fn reload_settings(&self, settings: Settings) -> Result<()> {
        self.settings.replace(settings)
    }

    pub fn compile(&self, text: &str, structured: bool, today: NaiveDate) -> Result<CompileOutput> {
        let settings = self.settings();
        match &self.store {
            Some(store) => compiler::compile_with_rules(text, structured, &settings, store.as_ref(), today),
            None => compiler::compile(text, structured, &settings, today),
        }
    }

    pub fn rate(&self, feedback: &Feedback, today: NaiveDate) -> Result<RateOutcome> {
        let settings = self.settings();
        match &self.store {
            Some(store) => rules::rate(store.as_ref(), &settings, feedback, today),
            None => rules::rate(&NoRuleStore, &settings, feedback, today),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 2, 10).unwrap()
    }

    #[test]
    fn test_rate_without_store_reports_error() {
        let ctx = AppContext::new(Settings::contracts_default(), None).unwrap();
        let outcome = ctx
            .rate(
                &Feedback {
                    inquiry_id: 1,
                    rating: 1,
                    question: "contracts last month".to_string(),
                    comment: Some("wrong".to_string()),
                },
                today(),
            )
            .unwrap();
        assert!(outcome.patch_id.is_none());
        assert_eq!(outcome.store_errors.len(), 1);
    }

    #[test]
    fn test_compile_without_store_has_no_store_degradation() {
        let ctx = AppContext::new(Settings::contracts_default(), None).unwrap();
        let out = ctx.compile("contracts last month", false, today()).unwrap();
        assert!(!out
            .degradations
            .iter()
            .any(|d| matches!(d, crate::error::Degradation::RuleStoreUnavailable(_))));
    }
}
