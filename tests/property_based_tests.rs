//! Property-based tests for fingerprints and task identity
//!
//! Fingerprints must depend only on the canonical form of the summary, and task
//! ids on the full (user, report type, fingerprint, language) key.

use proptest::prelude::*;
use reportgen::engine::TaskKey;
use reportgen::engine::test_support::ScriptedBackend;
use reportgen::{
    ContentCache, OrchestratorSettings, PassthroughSummarizer, ReportOrchestrator, ReportRegistry,
    ReportRequest,
};
use reportgen::canonicalization::Fingerprinter;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::sync::Arc;

fn summary_strategy() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::vec(("[a-z]{1,8}", any::<i64>()), 1..8)
}

/// Build a JSON object by inserting fields in the given order
fn object_from(fields: &[(String, i64)]) -> Value {
    let mut map = Map::new();
    for (key, value) in fields {
        map.insert(key.clone(), json!(value));
    }
    Value::Object(map)
}

/// The same object as text, fields in reverse insertion order.
///
/// Later duplicates win in `object_from`, so only the last occurrence of a key
/// is written.
fn reversed_text(fields: &[(String, i64)]) -> String {
    let mut seen = HashSet::new();
    let body: Vec<String> = fields
        .iter()
        .rev()
        .filter(|(k, _)| seen.insert(k.clone()))
        .map(|(k, v)| format!("\"{k}\": {v}"))
        .collect();
    format!("{{ {} }}", body.join(", "))
}

proptest! {
    #[test]
    fn fingerprint_ignores_field_order_and_whitespace(fields in summary_strategy()) {
        let fp = Fingerprinter::new();
        let ordered = object_from(&fields);
        let reparsed: Value = serde_json::from_str(&reversed_text(&fields)).unwrap();

        let a = fp.hash(&ordered).unwrap();
        let b = fp.hash(&reparsed).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.len(), 64);
        prop_assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn task_id_separates_every_key_component(
        user in "[a-z0-9]{1,12}",
        fingerprint in "[0-9a-f]{64}",
        language in "[a-z]{2}",
    ) {
        let key = TaskKey {
            user_id: user.clone(),
            report_type: "personal-profile".to_string(),
            fingerprint: fingerprint.clone(),
            language: language.clone(),
        };
        let id = key.task_id().unwrap();
        prop_assert!(id.starts_with("task_"));
        prop_assert_eq!(id.len(), "task_".len() + 32);
        prop_assert_eq!(&id, &key.task_id().unwrap());

        let other_user = TaskKey { user_id: format!("{user}x"), ..key.clone() };
        let other_type = TaskKey { report_type: "compatibility".to_string(), ..key.clone() };
        let other_lang = TaskKey { language: format!("{language}-x"), ..key.clone() };
        prop_assert_ne!(&id, &other_user.task_id().unwrap());
        prop_assert_ne!(&id, &other_type.task_id().unwrap());
        prop_assert_ne!(&id, &other_lang.task_id().unwrap());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn equivalent_inputs_resolve_to_one_task(fields in summary_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let orch = ReportOrchestrator::new(
                ReportRegistry::builtin(),
                Arc::new(PassthroughSummarizer),
                Arc::new(ScriptedBackend::new()),
                ContentCache::in_memory(),
                OrchestratorSettings::default(),
            );
            let reparsed: Value = serde_json::from_str(&reversed_text(&fields)).unwrap();

            let first = orch
                .create(&ReportRequest::new("u1", "compatibility", object_from(&fields)))
                .await
                .unwrap();
            let second = orch
                .create(&ReportRequest::new("u1", "compatibility", reparsed))
                .await
                .unwrap();
            orch.wait_idle().await;

            assert!(first.is_new);
            assert!(!second.is_new);
            assert_eq!(first.task_id, second.task_id);
        });
    }
}
