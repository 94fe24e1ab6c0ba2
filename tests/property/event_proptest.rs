//! Property-based tests for request building

use std::collections::BTreeMap;

use campo_sync::offline::ApiClient;
use campo_sync::shared::{Method, QueuedEvent, SyncConfig};
use chrono::Utc;
use proptest::prelude::*;

fn event(key: &str, headers: BTreeMap<String, String>, target: &str) -> QueuedEvent {
    let now = Utc::now();
    QueuedEvent {
        id: "evt-1".to_string(),
        kind: "UPSERT_ATIVIDADE".to_string(),
        target: target.to_string(),
        method: Method::Put,
        headers,
        payload: None,
        idempotency_key: key.to_string(),
        enqueued_at: now,
        updated_at: now,
        attempts: 0,
        last_error: None,
    }
}

fn client(defaults: &[(String, String)]) -> ApiClient {
    let mut builder = SyncConfig::builder().api_base_url("https://api.campo.example/v1");
    for (name, value) in defaults {
        builder = builder.default_header(name.clone(), value.clone());
    }
    ApiClient::new(&builder.build().unwrap()).unwrap()
}

proptest! {
    #[test]
    fn test_idempotency_key_is_always_sent(key in "[A-Za-z0-9-]{1,40}") {
        let headers = client(&[]).build_headers(&event(&key, BTreeMap::new(), "/x")).unwrap();

        prop_assert_eq!(headers.get("idempotency-key").and_then(|v| v.to_str().ok()), Some(key.as_str()));
        prop_assert_eq!(
            headers.get("content-type").and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
    }

    #[test]
    fn test_event_headers_win_over_defaults(
        suffix in "[a-z]{1,12}",
        default_value in "[a-z0-9]{1,20}",
        event_value in "[a-z0-9]{1,20}",
    ) {
        let default_name = format!("X-{}", suffix.to_uppercase());
        let event_name = format!("x-{}", suffix);
        let client = client(&[(default_name, default_value)]);

        let mut own = BTreeMap::new();
        own.insert(event_name.clone(), event_value.clone());
        let headers = client.build_headers(&event("k", own, "/x")).unwrap();

        prop_assert_eq!(headers.get_all(event_name.as_str()).iter().count(), 1);
        prop_assert_eq!(headers.get(event_name.as_str()).and_then(|v| v.to_str().ok()), Some(event_value.as_str()));
    }

    #[test]
    fn test_relative_targets_stay_under_api_base(segments in prop::collection::vec("[a-z0-9]{1,10}", 1..4)) {
        let target = format!("/{}", segments.join("/"));
        let url = client(&[]).resolve_target(&target).unwrap();

        prop_assert_eq!(url.host_str(), Some("api.campo.example"));
        prop_assert_eq!(url.path(), format!("/v1{}", target));
    }

    #[test]
    fn test_method_names_parse_back(method in prop_oneof![
        Just(Method::Get),
        Just(Method::Post),
        Just(Method::Put),
        Just(Method::Patch),
        Just(Method::Delete),
    ]) {
        prop_assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        prop_assert_eq!(method.as_str().to_lowercase().parse::<Method>().unwrap(), method);
    }
}
