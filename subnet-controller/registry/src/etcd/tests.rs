use super::*;

fn response(json: &str) -> KeysResponse {
    serde_json::from_str(json).expect("response must parse")
}

#[test]
fn flattens_recursive_listing() {
    let rsp = response(
        r#"{
            "action": "get",
            "node": {
                "key": "/registry/sdn/services",
                "dir": true,
                "nodes": [
                    {
                        "key": "/registry/sdn/services/default",
                        "dir": true,
                        "nodes": [
                            {"key": "/registry/sdn/services/default/web", "value": "{}", "modifiedIndex": 7}
                        ]
                    },
                    {"key": "/registry/sdn/services/other", "dir": true}
                ]
            }
        }"#,
    );

    let mut entries = Vec::new();
    flatten(rsp.node.unwrap(), &mut entries);
    assert_eq!(
        entries,
        vec![Entry {
            key: "/registry/sdn/services/default/web".to_string(),
            value: "{}".to_string(),
            revision: 7,
        }]
    );
}

#[test]
fn set_is_added() {
    let ev = into_event(response(
        r#"{
            "action": "set",
            "node": {"key": "/registry/sdn/subnets/node-a", "value": "v2", "modifiedIndex": 12},
            "prevNode": {"key": "/registry/sdn/subnets/node-a", "value": "v1", "modifiedIndex": 9}
        }"#,
    ))
    .unwrap();
    assert_eq!(ev.kind, EventType::Added);
    assert_eq!(ev.value.as_deref(), Some("v2"));
    assert_eq!(ev.revision, 12);
}

#[test]
fn delete_carries_previous_value() {
    let ev = into_event(response(
        r#"{
            "action": "delete",
            "node": {"key": "/registry/sdn/subnets/node-a", "modifiedIndex": 13},
            "prevNode": {"key": "/registry/sdn/subnets/node-a", "value": "v2", "modifiedIndex": 12}
        }"#,
    ))
    .unwrap();
    assert_eq!(ev.kind, EventType::Deleted);
    assert_eq!(ev.key, "/registry/sdn/subnets/node-a");
    assert_eq!(ev.value.as_deref(), Some("v2"));
    assert_eq!(ev.revision, 13);
}

#[test]
fn directory_events_are_dropped() {
    let ev = into_event(response(
        r#"{"action": "create", "node": {"key": "/registry/sdn/subnets", "dir": true, "modifiedIndex": 3}}"#,
    ));
    assert!(ev.is_none());
}

#[test]
fn classifies_error_codes() {
    let err = |code: u32| ErrorResponse {
        error_code: code,
        message: "error".to_string(),
        cause: None,
        index: 42,
    };
    assert!(classify("/k", err(KEY_NOT_FOUND)).is_not_found());
    assert!(classify("/k", err(NODE_EXISTS)).is_already_exists());
    assert!(matches!(
        classify("/k", err(EVENT_INDEX_CLEARED)),
        Error::Compacted(42)
    ));
    assert!(classify("/k", err(300)).is_transient());
}

#[test]
fn keys_url_joins_endpoint() {
    let store = EtcdStore::new("http://127.0.0.1:2379/".parse().unwrap()).unwrap();
    assert_eq!(
        store.keys_url("/registry/sdn/subnets").unwrap().as_str(),
        "http://127.0.0.1:2379/v2/keys/registry/sdn/subnets"
    );
}
