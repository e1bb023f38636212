use chrono::NaiveDate;
use contracts_nlq::rules::{
    rate, Feedback, PatchRecord, PatchStatus, RuleRecord, RuleStore, SqliteRuleStore,
};
use contracts_nlq::signature::Signature;
use contracts_nlq::{compile, compile_with_rules, AppContext, Degradation, NlqError, Settings};
use tempfile::TempDir;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 2, 10).unwrap()
}

fn feedback(rating: u8, question: &str, comment: Option<&str>) -> Feedback {
    Feedback {
        inquiry_id: 42,
        rating,
        question: question.to_string(),
        comment: comment.map(str::to_string),
    }
}

struct BrokenStore;

impl RuleStore for BrokenStore {
    fn rules_by_signature(&self, _: &str, _: &Signature) -> contracts_nlq::Result<Vec<RuleRecord>> {
        Err(NlqError::RuleStore("connection refused".to_string()))
    }

    fn rules_by_question(&self, _: &str, _: &str) -> contracts_nlq::Result<Vec<RuleRecord>> {
        Err(NlqError::RuleStore("connection refused".to_string()))
    }

    fn insert_rule(&self, _: &RuleRecord) -> contracts_nlq::Result<i64> {
        Err(NlqError::RuleStore("read-only".to_string()))
    }

    fn insert_patch(&self, _: &PatchRecord) -> contracts_nlq::Result<i64> {
        Err(NlqError::RuleStore("read-only".to_string()))
    }
}

#[test]
fn positive_feedback_is_replayed_idempotently() {
    let settings = Settings::contracts_default();
    let store = SqliteRuleStore::open_in_memory().unwrap();
    let question = "contracts last month";

    let outcome = rate(
        &store,
        &settings,
        &feedback(5, question, Some("eq: ENTITY = Jeddah")),
        today(),
    )
    .unwrap();
    assert_eq!(outcome.rules_saved.len(), 1);
    assert!(outcome.store_errors.is_empty());

    let first = compile_with_rules(question, false, &settings, &store, today()).unwrap();
    let second = compile_with_rules(question, false, &settings, &store, today()).unwrap();
    assert_eq!(first.applied_rules, outcome.rules_saved);
    assert_eq!(first.intent.eq_values("ENTITY").unwrap(), &["Jeddah".to_string()]);
    assert_eq!(first.sql, second.sql);
    assert_eq!(first.binds, second.binds);

    let plain = compile(question, false, &settings, today()).unwrap();
    assert_ne!(plain.sql, first.sql);
    assert_eq!(first.binds.len(), plain.binds.len() + 1);
}

#[test]
fn rating_thresholds_decide_what_is_stored() {
    let settings = Settings::contracts_default();
    let store = SqliteRuleStore::open_in_memory().unwrap();
    let question = "contracts for entity Riyadh";

    let low = rate(&store, &settings, &feedback(1, question, Some("eq: ENTITY = Jeddah")), today()).unwrap();
    assert!(low.patch_id.is_some());
    assert!(low.rules_saved.is_empty());

    let neutral = rate(&store, &settings, &feedback(3, question, Some("eq: ENTITY = Jeddah")), today()).unwrap();
    assert!(neutral.patch_id.is_none());
    assert!(neutral.rules_saved.is_empty());

    let patches = store.patches(&settings.namespace).unwrap();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].status, PatchStatus::Pending);
    assert_eq!(patches[0].inquiry_id, 42);
    assert!(store.rules(&settings.namespace).unwrap().is_empty());
}

#[test]
fn disabled_rules_are_not_applied() {
    let settings = Settings::contracts_default();
    let store = SqliteRuleStore::open_in_memory().unwrap();
    let question = "contracts last month";
    let outcome = rate(
        &store,
        &settings,
        &feedback(4, question, Some("eq: ENTITY = Jeddah")),
        today(),
    )
    .unwrap();
    for id in &outcome.rules_saved {
        assert!(store.set_rule_enabled(*id, false).unwrap());
    }
    let out = compile_with_rules(question, false, &settings, &store, today()).unwrap();
    assert!(out.applied_rules.is_empty());
    assert!(out.intent.eq_values("ENTITY").is_none());
}

#[test]
fn broken_store_never_fails_the_call() {
    let settings = Settings::contracts_default();
    let outcome = rate(
        &BrokenStore,
        &settings,
        &feedback(5, "contracts last month", Some("eq: ENTITY = Jeddah")),
        today(),
    )
    .unwrap();
    assert!(outcome.rules_saved.is_empty());
    assert_eq!(outcome.store_errors.len(), 1);
    assert_eq!(outcome.output.intent.eq_values("ENTITY").unwrap(), &["Jeddah".to_string()]);

    let out = compile_with_rules("contracts last month", false, &settings, &BrokenStore, today()).unwrap();
    assert!(out
        .degradations
        .iter()
        .any(|d| matches!(d, Degradation::RuleStoreUnavailable(_))));
    let plain = compile("contracts last month", false, &settings, today()).unwrap();
    assert_eq!(out.sql, plain.sql);
}

#[test]
fn unknown_column_in_feedback_comment_is_reported() {
    let settings = Settings::contracts_default();
    let store = SqliteRuleStore::open_in_memory().unwrap();
    let err = rate(
        &store,
        &settings,
        &feedback(5, "contracts last month", Some("eq: ENTTY_NAME_X = Jeddah")),
        today(),
    )
    .unwrap_err();
    assert!(matches!(err, NlqError::UnknownColumn { .. }));
}

#[test]
fn context_with_file_backed_store_learns_across_reopen() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("rules").join("nlq.db");
    let question = "contracts last month";
    {
        let ctx = AppContext::from_paths(None, Some(&db)).unwrap();
        let outcome = ctx
            .rate(&feedback(5, question, Some("eq: ENTITY = Jeddah")), today())
            .unwrap();
        assert_eq!(outcome.rules_saved.len(), 1);
    }
    let ctx = AppContext::from_paths(None, Some(&db)).unwrap();
    let out = ctx.compile(question, false, today()).unwrap();
    assert!(!out.applied_rules.is_empty());
    assert_eq!(out.intent.eq_values("ENTITY").unwrap(), &["Jeddah".to_string()]);
}

#[test]
fn settings_reload_takes_effect_for_next_compile() {
    let ctx = AppContext::new(Settings::contracts_default(), None).unwrap();
    let mut settings = Settings::contracts_default();
    settings.fts.columns.clear();
    ctx.reload_settings(settings).unwrap();
    let out = ctx.compile("fts: home care", true, today()).unwrap();
    assert!(out.degradations.contains(&Degradation::NoFtsColumnsConfigured));
}
