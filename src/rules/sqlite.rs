//! SQLite-backed rule store (`dw_rules`, `dw_patches`).

use super::{PatchRecord, PatchStatus, RuleKeys, RuleKind, RuleRecord, RuleStore};
use crate::error::{NlqError, Result};
use crate::signature::Signature;
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

pub struct SqliteRuleStore {
    db: Mutex<Connection>,
}

const RULE_COLUMNS: &str = "id, namespace, question_norm, rule_kind, rule_payload, enabled, \
     rule_signature, signature_sha256, signature_sha1, created_at";

impl SqliteRuleStore {
    /// Open or create the database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            db: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;
        info!("Rule store opened at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            db: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| NlqError::RuleStore("rule store connection lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.conn()?;
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS dw_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                namespace TEXT NOT NULL,
                question_norm TEXT NOT NULL,
                rule_kind TEXT NOT NULL,
                rule_payload TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                rule_signature TEXT,
                signature_sha256 TEXT,
                signature_sha1 TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_dw_rules_sha256 ON dw_rules(signature_sha256);
            CREATE INDEX IF NOT EXISTS idx_dw_rules_sha1 ON dw_rules(signature_sha1);
            CREATE INDEX IF NOT EXISTS idx_dw_rules_question ON dw_rules(namespace, question_norm);

            CREATE TABLE IF NOT EXISTS dw_patches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                namespace TEXT NOT NULL,
                inquiry_id INTEGER NOT NULL,
                question_norm TEXT NOT NULL,
                rating INTEGER NOT NULL,
                comment TEXT,
                patch_payload TEXT,
                status TEXT NOT NULL DEFAULT 'pending'
            );
            "#,
        )?;
        Ok(())
    }

    fn query_rules(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<RuleRecord>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {} FROM dw_rules WHERE enabled = 1 AND {} ORDER BY id DESC",
            RULE_COLUMNS, filter
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(args, read_rule)?;
        let mut rules = Vec::new();
        for row in rows {
            rules.push(row?.into_record()?);
        }
        Ok(rules)
    }

    /// Admin toggle; false when no rule has that id
    pub fn set_rule_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE dw_rules SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        Ok(changed > 0)
    }

    /// Admin review of a patch; false when no patch has that id
    pub fn set_patch_status(&self, id: i64, status: PatchStatus) -> Result<bool> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE dw_patches SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(changed > 0)
    }

    /// Patches of a namespace, newest first
    pub fn patches(&self, namespace: &str) -> Result<Vec<PatchRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, namespace, inquiry_id, question_norm, rating, comment, patch_payload, status, created_at
             FROM dw_patches WHERE namespace = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![namespace], |row| {
            let payload: Option<String> = row.get(6)?;
            let status: String = row.get(7)?;
            Ok((
                PatchRecord {
                    id: Some(row.get(0)?),
                    namespace: row.get(1)?,
                    inquiry_id: row.get(2)?,
                    question_norm: row.get(3)?,
                    rating: row.get(4)?,
                    comment: row.get(5)?,
                    delta: serde_json::Value::Null,
                    status: PatchStatus::Pending,
                    created_at: row.get(8)?,
                },
                payload,
                status,
            ))
        })?;
        let mut patches = Vec::new();
        for row in rows {
            let (mut patch, payload, status) = row?;
            if let Some(payload) = payload {
                patch.delta = serde_json::from_str(&payload)?;
            }
            patch.status = status.parse()?;
            patches.push(patch);
        }
        Ok(patches)
    }

    /// All rules of a namespace, enabled or not, newest first
    pub fn rules(&self, namespace: &str) -> Result<Vec<RuleRecord>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {} FROM dw_rules WHERE namespace = ?1 ORDER BY id DESC",
            RULE_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![namespace], read_rule)?;
        let mut rules = Vec::new();
        for row in rows {
            rules.push(row?.into_record()?);
        }
        Ok(rules)
    }
}

/// Raw `dw_rules` row; kind and payload are decoded by `into_record`
struct RuleRow {
    id: i64,
    namespace: String,
    question_norm: String,
    kind: String,
    payload: String,
    enabled: bool,
    signature: Option<String>,
    sha256: Option<String>,
    sha1: Option<String>,
    created_at: Option<String>,
}

fn read_rule(row: &Row<'_>) -> rusqlite::Result<RuleRow> {
    Ok(RuleRow {
        id: row.get(0)?,
        namespace: row.get(1)?,
        question_norm: row.get(2)?,
        kind: row.get(3)?,
        payload: row.get(4)?,
        enabled: row.get(5)?,
        signature: row.get(6)?,
        sha256: row.get(7)?,
        sha1: row.get(8)?,
        created_at: row.get(9)?,
    })
}

impl RuleRow {
    fn into_record(self) -> Result<RuleRecord> {
        Ok(RuleRecord {
            id: Some(self.id),
            namespace: self.namespace,
            question_norm: self.question_norm,
            kind: self.kind.parse::<RuleKind>()?,
            payload: serde_json::from_str(&self.payload)?,
            enabled: self.enabled,
            keys: RuleKeys {
                json: self.signature.unwrap_or_default(),
                sha256: self.sha256.unwrap_or_default(),
                sha1: self.sha1.unwrap_or_default(),
            },
            created_at: self.created_at,
        })
    }
}

impl RuleStore for SqliteRuleStore {
    fn rules_by_signature(&self, namespace: &str, signature: &Signature) -> Result<Vec<RuleRecord>> {
        self.query_rules(
            "namespace = ?1 AND (signature_sha256 = ?2 OR signature_sha1 = ?3 OR rule_signature = ?4)",
            &[&namespace, &signature.sha256, &signature.sha1, &signature.json],
        )
    }

    fn rules_by_question(&self, namespace: &str, question_norm: &str) -> Result<Vec<RuleRecord>> {
        self.query_rules(
            "namespace = ?1 AND question_norm = ?2",
            &[&namespace, &question_norm],
        )
    }

    fn insert_rule(&self, rule: &RuleRecord) -> Result<i64> {
        let db = self.conn()?;
        let created_at = rule
            .created_at
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        db.execute(
            "INSERT INTO dw_rules (created_at, namespace, question_norm, rule_kind, rule_payload, enabled,
                                   rule_signature, signature_sha256, signature_sha1)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                created_at,
                rule.namespace,
                rule.question_norm,
                rule.kind.as_str(),
                serde_json::to_string(&rule.payload)?,
                rule.enabled,
                rule.keys.json,
                rule.keys.sha256,
                rule.keys.sha1,
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    fn insert_patch(&self, patch: &PatchRecord) -> Result<i64> {
        let db = self.conn()?;
        let created_at = patch
            .created_at
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        db.execute(
            "INSERT INTO dw_patches (created_at, namespace, inquiry_id, question_norm, rating, comment,
                                     patch_payload, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                created_at,
                patch.namespace,
                patch.inquiry_id,
                patch.question_norm,
                patch.rating,
                patch.comment,
                serde_json::to_string(&patch.delta)?,
                patch.status.as_str(),
            ],
        )?;
        Ok(db.last_insert_rowid())
    }
}
