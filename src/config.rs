//! Typed settings for the contracts compiler.
//!
//! One `Settings` value replaces the per-call key lookups of a namespace
//! settings store. It is deserialized from JSON, normalized (column names
//! upper-cased) and validated eagerly so that a bad configuration fails at
//! startup instead of degrading silently per question.

use crate::error::{NlqError, Result};
use crate::normalize::{canonical_column, is_safe_identifier};
use crate::signature::SignatureKnobs;
use crate::sql::Dialect;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Rule-store namespace, e.g. `dw::common`
    pub namespace: String,

    /// Analytic table name as it appears in FROM (quoted when rendered)
    pub table: String,

    /// Every physical column that may appear in generated SQL
    pub columns: Vec<String>,

    /// Logical or physical columns accepted in `COL = value` filters
    pub eq_filter_columns: Vec<String>,

    #[serde(default = "default_date_column")]
    pub date_column: String,

    #[serde(default)]
    pub dialect: Dialect,

    #[serde(default)]
    pub fts: FtsSettings,

    /// Logical name -> ordered physical columns (slot families)
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,

    /// Human phrase -> logical column. A trailing `*` on the target marks a
    /// slot family (`"stakeholders": "STAKEHOLDER*"`).
    #[serde(default = "default_column_phrases")]
    pub column_phrases: BTreeMap<String, String>,

    /// `Table.COLUMN` -> canonical value -> synonym rule
    #[serde(default)]
    pub enum_synonyms: BTreeMap<String, BTreeMap<String, SynonymRule>>,

    /// Canonical status -> spellings accepted in questions
    #[serde(default = "default_status_synonyms")]
    pub status_synonyms: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub overlap: OverlapSettings,

    #[serde(default)]
    pub signature: SignatureKnobs,

    /// Column list for detail projections; empty means `SELECT *`
    #[serde(default)]
    pub detail_columns: Vec<String>,

    #[serde(default)]
    pub window_columns: WindowColumns,

    #[serde(default)]
    pub measure: MeasureColumns,

    #[serde(default)]
    pub contact: ContactColumns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FtsEngine {
    #[default]
    Like,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsSettings {
    #[serde(default)]
    pub engine: FtsEngine,

    #[serde(default = "default_min_token_len")]
    pub min_token_len: usize,

    /// Table name (or `*`) -> searchable columns
    #[serde(default)]
    pub columns: BTreeMap<String, Vec<String>>,
}

impl Default for FtsSettings {
    fn default() -> Self {
        Self {
            engine: FtsEngine::Like,
            min_token_len: default_min_token_len(),
            columns: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynonymRule {
    #[serde(default)]
    pub equals: Vec<String>,
    #[serde(default)]
    pub prefix: Vec<String>,
    #[serde(default)]
    pub contains: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OverlapSettings {
    /// Both START and END must be non-null for a row to overlap
    #[serde(default = "default_true")]
    pub require_both: bool,
    /// When false (and `require_both` is false) a null bound is open-ended
    #[serde(default = "default_true")]
    pub strict: bool,
}

impl Default for OverlapSettings {
    fn default() -> Self {
        Self {
            require_both: true,
            strict: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowColumns {
    pub start: String,
    pub end: String,
    pub request: String,
}

impl Default for WindowColumns {
    fn default() -> Self {
        Self {
            start: "START_DATE".to_string(),
            end: "END_DATE".to_string(),
            request: "REQUEST_DATE".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureColumns {
    pub net: String,
    pub vat: String,
}

impl Default for MeasureColumns {
    fn default() -> Self {
        Self {
            net: "CONTRACT_VALUE_NET_OF_VAT".to_string(),
            vat: "VAT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactColumns {
    pub email: String,
    pub phone: String,
}

impl Default for ContactColumns {
    fn default() -> Self {
        Self {
            email: "REPRESENTATIVE_EMAIL".to_string(),
            phone: "REPRESENTATIVE_PHONE".to_string(),
        }
    }
}

fn default_date_column() -> String {
    "REQUEST_DATE".to_string()
}

fn default_min_token_len() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_column_phrases() -> BTreeMap<String, String> {
    [
        ("department", "DEPARTMENT"),
        ("departments", "DEPARTMENT"),
        ("dept", "DEPARTMENT"),
        ("owner department", "OWNER_DEPARTMENT"),
        ("owner_department", "OWNER_DEPARTMENT"),
        ("oul", "DEPARTMENT_OUL"),
        ("department oul", "DEPARTMENT_OUL"),
        ("department_oul", "DEPARTMENT_OUL"),
        ("request type", "REQUEST_TYPE"),
        ("request_type", "REQUEST_TYPE"),
        ("requester", "REQUESTER"),
        ("status", "CONTRACT_STATUS"),
        ("contract status", "CONTRACT_STATUS"),
        ("contract_status", "CONTRACT_STATUS"),
        ("owner", "CONTRACT_OWNER"),
        ("contract owner", "CONTRACT_OWNER"),
        ("contract_owner", "CONTRACT_OWNER"),
        ("entity", "ENTITY"),
        ("entity no", "ENTITY_NO"),
        ("entity_no", "ENTITY_NO"),
        ("contract id", "CONTRACT_ID"),
        ("contract_id", "CONTRACT_ID"),
        ("email", "REPRESENTATIVE_EMAIL"),
        ("representative email", "REPRESENTATIVE_EMAIL"),
        ("representative_email", "REPRESENTATIVE_EMAIL"),
        ("phone", "REPRESENTATIVE_PHONE"),
        ("representative_phone", "REPRESENTATIVE_PHONE"),
        ("stakeholder", "STAKEHOLDER*"),
        ("stakeholders", "STAKEHOLDER*"),
        ("stackholder", "STAKEHOLDER*"),
        ("stackholders", "STAKEHOLDER*"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_status_synonyms() -> BTreeMap<String, Vec<String>> {
    [
        ("EXPIRED", vec!["EXPIRE", "EXPIRED", "ENDED", "FINISHED"]),
        ("ACTIVE", vec!["ACTIVE", "RUNNING"]),
        ("PENDING", vec!["PENDING", "WAITING"]),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.into_iter().map(String::from).collect()))
    .collect()
}

impl Settings {
    /// Load settings from a JSON file, normalizing and validating them
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(NlqError::Config(format!(
                "settings file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_json_str(&content)?;
        info!(
            "Loaded settings for namespace '{}' ({} columns) from {}",
            settings.namespace,
            settings.columns.len(),
            path.display()
        );
        Ok(settings)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: Settings = serde_json::from_str(content)?;
        let settings = raw.normalized();
        settings.validate()?;
        Ok(settings)
    }

    /// Upper-case and de-space every column reference
    pub fn normalized(mut self) -> Self {
        fn canon_all(list: &mut Vec<String>) {
            let mut seen = HashSet::new();
            list.retain_mut(|c| {
                *c = canonical_column(c);
                !c.is_empty() && seen.insert(c.clone())
            });
        }

        canon_all(&mut self.columns);
        canon_all(&mut self.eq_filter_columns);
        canon_all(&mut self.detail_columns);
        self.date_column = canonical_column(&self.date_column);
        self.window_columns.start = canonical_column(&self.window_columns.start);
        self.window_columns.end = canonical_column(&self.window_columns.end);
        self.window_columns.request = canonical_column(&self.window_columns.request);
        self.measure.net = canonical_column(&self.measure.net);
        self.measure.vat = canonical_column(&self.measure.vat);
        self.contact.email = canonical_column(&self.contact.email);
        self.contact.phone = canonical_column(&self.contact.phone);

        self.aliases = std::mem::take(&mut self.aliases)
            .into_iter()
            .map(|(k, mut v)| {
                canon_all(&mut v);
                (canonical_column(&k), v)
            })
            .collect();
        for cols in self.fts.columns.values_mut() {
            canon_all(cols);
        }
        self.column_phrases = std::mem::take(&mut self.column_phrases)
            .into_iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_uppercase()))
            .collect();
        self.status_synonyms = std::mem::take(&mut self.status_synonyms)
            .into_iter()
            .map(|(k, v)| {
                (
                    k.trim().to_uppercase(),
                    v.into_iter().map(|s| s.trim().to_uppercase()).collect(),
                )
            })
            .collect();
        self.enum_synonyms = std::mem::take(&mut self.enum_synonyms)
            .into_iter()
            .map(|(k, v)| {
                let key = match k.split_once('.') {
                    Some((table, col)) => format!("{}.{}", table.trim(), canonical_column(col)),
                    None => canonical_column(&k),
                };
                let buckets = v
                    .into_iter()
                    .map(|(canon, rule)| (canon.trim().to_uppercase(), rule))
                    .collect();
                (key, buckets)
            })
            .collect();
        self
    }

    /// Fail fast on anything that would otherwise surface as broken SQL
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(NlqError::Config("namespace must not be empty".to_string()));
        }
        let table_ok = !self.table.is_empty()
            && self.table.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && self.table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !table_ok {
            return Err(NlqError::Config(format!("invalid table name '{}'", self.table)));
        }
        if self.columns.is_empty() {
            return Err(NlqError::Config("columns allow-list must not be empty".to_string()));
        }
        for col in &self.columns {
            if !is_safe_identifier(col) {
                return Err(NlqError::Config(format!("invalid column identifier '{}'", col)));
            }
        }

        let physical: HashSet<&str> = self.columns.iter().map(String::as_str).collect();
        let require = |what: &str, col: &str| -> Result<()> {
            if physical.contains(col) {
                Ok(())
            } else {
                Err(NlqError::Config(format!(
                    "{} '{}' is not in the columns allow-list",
                    what, col
                )))
            }
        };

        require("date_column", &self.date_column)?;
        require("window start column", &self.window_columns.start)?;
        require("window end column", &self.window_columns.end)?;
        require("window request column", &self.window_columns.request)?;
        require("net value column", &self.measure.net)?;
        require("VAT column", &self.measure.vat)?;
        require("email column", &self.contact.email)?;
        require("phone column", &self.contact.phone)?;
        for col in &self.detail_columns {
            require("detail column", col)?;
        }
        for (logical, cols) in &self.aliases {
            if !is_safe_identifier(logical) {
                return Err(NlqError::Config(format!("invalid alias name '{}'", logical)));
            }
            if cols.is_empty() {
                return Err(NlqError::Config(format!("alias '{}' maps to no columns", logical)));
            }
            for col in cols {
                require("alias target", col)?;
            }
        }
        for (table, cols) in &self.fts.columns {
            for col in cols {
                require(&format!("FTS column for '{}'", table), col)?;
            }
        }
        for col in &self.eq_filter_columns {
            if !physical.contains(col.as_str()) && !self.aliases.contains_key(col) {
                return Err(NlqError::Config(format!(
                    "eq filter column '{}' is neither a column nor an alias",
                    col
                )));
            }
        }
        for (phrase, target) in &self.column_phrases {
            let logical = target.trim_end_matches('*');
            if !physical.contains(logical) && !self.aliases.contains_key(logical) {
                return Err(NlqError::Config(format!(
                    "column phrase '{}' targets unknown column '{}'",
                    phrase, target
                )));
            }
        }
        for key in self.enum_synonyms.keys() {
            let col = key.rsplit('.').next().unwrap_or(key.as_str());
            if !physical.contains(col) {
                return Err(NlqError::Config(format!(
                    "enum synonyms '{}' reference an unknown column",
                    key
                )));
            }
        }
        if self.fts.min_token_len == 0 {
            return Err(NlqError::Config("fts.min_token_len must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.signature.eq_list_min_coverage) {
            return Err(NlqError::Config(
                "signature.eq_list_min_coverage must be within 0..=1".to_string(),
            ));
        }
        Ok(())
    }

    /// FTS columns for the configured table, falling back to the `*` entry
    pub fn fts_columns(&self) -> Vec<String> {
        self.fts
            .columns
            .get(&self.table)
            .or_else(|| self.fts.columns.get("*"))
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_physical_column(&self, col: &str) -> bool {
        self.columns.iter().any(|c| c == col)
    }

    /// Columns a structured comment may name
    pub fn is_filterable(&self, col: &str) -> bool {
        self.eq_filter_columns.iter().any(|c| c == col) || self.aliases.contains_key(col)
    }

    /// Synonym buckets configured for a column of the analytic table
    pub fn synonyms_for(&self, column: &str) -> Option<&BTreeMap<String, SynonymRule>> {
        self.enum_synonyms
            .get(&format!("{}.{}", self.table, column))
            .or_else(|| self.enum_synonyms.get(column))
    }

    /// Built-in profile of the contracts table
    pub fn contracts_default() -> Self {
        let mut columns: Vec<String> = [
            "CONTRACT_ID",
            "CONTRACT_OWNER",
            "OWNER_DEPARTMENT",
            "DEPARTMENT_OUL",
            "CONTRACT_VALUE_NET_OF_VAT",
            "VAT",
            "CONTRACT_PURPOSE",
            "CONTRACT_SUBJECT",
            "LEGAL_NAME_OF_THE_COMPANY",
            "START_DATE",
            "END_DATE",
            "REQUEST_DATE",
            "REQUEST_TYPE",
            "CONTRACT_STATUS",
            "DURATION",
            "ENTITY",
            "ENTITY_NO",
            "REQUESTER",
            "REPRESENTATIVE_EMAIL",
            "REPRESENTATIVE_PHONE",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let stakeholders: Vec<String> =
            (1..=8).map(|i| format!("CONTRACT_STAKEHOLDER_{}", i)).collect();
        let departments: Vec<String> = (1..=8).map(|i| format!("DEPARTMENT_{}", i)).collect();
        columns.extend(stakeholders.iter().cloned());
        columns.extend(departments.iter().cloned());

        let mut aliases = BTreeMap::new();
        let mut dept_cols = departments;
        dept_cols.push("OWNER_DEPARTMENT".to_string());
        aliases.insert("DEPARTMENT".to_string(), dept_cols);
        aliases.insert("STAKEHOLDER".to_string(), stakeholders);

        let mut fts_columns = BTreeMap::new();
        fts_columns.insert(
            "*".to_string(),
            vec![
                "CONTRACT_SUBJECT".to_string(),
                "CONTRACT_PURPOSE".to_string(),
                "LEGAL_NAME_OF_THE_COMPANY".to_string(),
                "ENTITY".to_string(),
            ],
        );

        let mut request_types = BTreeMap::new();
        request_types.insert(
            "RENEWAL".to_string(),
            SynonymRule {
                equals: vec![
                    "Renewal".to_string(),
                    "Renew".to_string(),
                    "Renew Contract".to_string(),
                    "Renewed".to_string(),
                    "Contract Renewal".to_string(),
                ],
                prefix: vec!["Renew".to_string(), "Extens".to_string()],
                contains: vec![],
            },
        );
        request_types.insert(
            "NEW".to_string(),
            SynonymRule {
                equals: vec!["New".to_string(), "New Contract".to_string()],
                prefix: vec![],
                contains: vec![],
            },
        );
        request_types.insert(
            "ADDENDUM".to_string(),
            SynonymRule {
                equals: vec![
                    "Addendum".to_string(),
                    "Amendment".to_string(),
                    "Appendix".to_string(),
                ],
                prefix: vec![],
                contains: vec![],
            },
        );
        let mut enum_synonyms = BTreeMap::new();
        enum_synonyms.insert("Contract.REQUEST_TYPE".to_string(), request_types);

        Settings {
            namespace: "dw::common".to_string(),
            table: "Contract".to_string(),
            columns,
            eq_filter_columns: [
                "CONTRACT_STATUS",
                "REQUEST_TYPE",
                "ENTITY",
                "ENTITY_NO",
                "OWNER_DEPARTMENT",
                "DEPARTMENT_OUL",
                "CONTRACT_OWNER",
                "CONTRACT_ID",
                "REQUESTER",
                "REPRESENTATIVE_EMAIL",
                "REPRESENTATIVE_PHONE",
                "DEPARTMENT",
                "STAKEHOLDER",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            date_column: default_date_column(),
            dialect: Dialect::Oracle,
            fts: FtsSettings {
                engine: FtsEngine::Like,
                min_token_len: default_min_token_len(),
                columns: fts_columns,
            },
            aliases,
            column_phrases: default_column_phrases(),
            enum_synonyms,
            status_synonyms: default_status_synonyms(),
            overlap: OverlapSettings::default(),
            signature: SignatureKnobs::default(),
            detail_columns: [
                "CONTRACT_ID",
                "CONTRACT_OWNER",
                "OWNER_DEPARTMENT",
                "ENTITY",
                "REQUEST_TYPE",
                "CONTRACT_STATUS",
                "REQUEST_DATE",
                "START_DATE",
                "END_DATE",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            window_columns: WindowColumns::default(),
            measure: MeasureColumns::default(),
            contact: ContactColumns::default(),
        }
    }
}

/// Copy-on-write settings snapshot. Readers clone the `Arc`; a reload
/// validates the new value and swaps it in under the write lock.
#[derive(Debug)]
pub struct SettingsHandle {
    current: RwLock<Arc<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(settings)),
        })
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace(&self, settings: Settings) -> Result<()> {
        let settings = settings.normalized();
        settings.validate()?;
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(settings);
        info!("Settings snapshot replaced");
        Ok(())
    }
}
