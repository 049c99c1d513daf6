mod common;

use ankilink::config::AppConfig;
use common::{RunningServer, exchange, exchange_parts, post};
use serde_json::{Value, json};

fn body_json(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("json body")
}

#[test]
fn empty_request_gets_banner() {
    let server = RunningServer::start(AppConfig::default());

    let (head, body) = exchange(server.addr, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");

    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Access-Control-Allow-Origin: http://localhost"));
    assert_eq!(body, b"AnkiLink v.6");
    server.stop();
}

#[test]
fn replies_follow_requested_version() {
    let server = RunningServer::start(AppConfig::default());

    let (_, current) = exchange(server.addr, &post(r#"{"action":"version","version":6}"#, None));
    assert_eq!(body_json(&current), json!({ "result": 6, "error": null }));

    let (_, legacy) = exchange(server.addr, &post(r#"{"action":"version"}"#, None));
    assert_eq!(body_json(&legacy), json!(6));

    let (_, unknown) = exchange(server.addr, &post(r#"{"action":"nope","version":6}"#, None));
    assert_eq!(
        body_json(&unknown),
        json!({ "result": null, "error": "unsupported action" })
    );
    server.stop();
}

#[test]
fn legacy_errors_keep_the_envelope() {
    let server = RunningServer::start(AppConfig::default());

    let (_, unknown) = exchange(server.addr, &post(r#"{"action":"nope"}"#, None));
    assert_eq!(
        body_json(&unknown),
        json!({ "result": null, "error": "unsupported action" })
    );

    let (_, empty_deck) = exchange(
        server.addr,
        &post(r#"{"action":"createDeck","version":4,"params":{"deck":"A::"}}"#, None),
    );
    let reply = body_json(&empty_deck);
    assert_eq!(reply["result"], Value::Null);
    assert!(reply["error"].is_string());
    server.stop();
}

#[test]
fn fragmented_request_is_reassembled() {
    let server = RunningServer::start(AppConfig::default());
    let request = post(r#"{"action":"deckNames","version":6}"#, None);
    let (first, rest) = request.as_bytes().split_at(20);
    let (second, third) = rest.split_at(rest.len() - 5);

    let (head, body) = exchange_parts(server.addr, &[first, second, third]);

    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body_json(&body), json!({ "result": ["Default"], "error": null }));
    server.stop();
}

#[test]
fn foreign_origin_is_forbidden() {
    let server = RunningServer::start(AppConfig::default());

    let (head, body) = exchange(
        server.addr,
        &post(r#"{"action":"deckNames","version":6}"#, Some("http://evil.example")),
    );

    assert!(head.starts_with("HTTP/1.1 403 Forbidden"));
    assert!(head.contains("Access-Control-Allow-Origin: http://localhost"));
    assert!(head.contains("Content-Length: 0"));
    assert!(!head.contains("Content-Type"));
    assert!(body.is_empty());
    server.stop();
}

#[test]
fn loopback_origin_is_trusted() {
    let server = RunningServer::start(AppConfig::default());

    let (head, body) = exchange(
        server.addr,
        &post(r#"{"action":"version","version":6}"#, Some("http://127.0.0.1:3000")),
    );

    assert!(head.contains("Access-Control-Allow-Origin: http://127.0.0.1:3000"));
    assert_eq!(body_json(&body)["result"], json!(6));
    server.stop();
}

#[test]
fn preflight_echoes_private_network_access() {
    let server = RunningServer::start(AppConfig::default());

    let (head, body) = exchange(
        server.addr,
        "OPTIONS / HTTP/1.1\r\nOrigin: http://evil.example\r\nAccess-Control-Request-Private-Network: true\r\n\r\n",
    );

    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Access-Control-Allow-Private-Network: true"));
    assert!(head.contains("Access-Control-Allow-Headers: *"));
    assert!(body.is_empty());
    server.stop();
}

#[test]
fn permission_request_from_foreign_origin_is_denied_by_default() {
    let server = RunningServer::start(AppConfig::default());

    let (head, body) = exchange(
        server.addr,
        &post(
            r#"{"action":"requestPermission","version":6}"#,
            Some("https://app.example"),
        ),
    );

    assert!(head.contains("Access-Control-Allow-Origin: https://app.example"));
    assert_eq!(
        body_json(&body),
        json!({ "result": { "permission": "denied" }, "error": null })
    );
    server.stop();
}

#[test]
fn granted_origin_is_served_afterwards() {
    let server = RunningServer::start(AppConfig {
        grant_permission_requests: true,
        ..AppConfig::default()
    });
    let origin = Some("https://app.example");

    let (_, body) = exchange(
        server.addr,
        &post(r#"{"action":"requestPermission","version":6}"#, origin),
    );
    assert_eq!(body_json(&body)["result"]["permission"], "granted");

    let (head, body) = exchange(
        server.addr,
        &post(r#"{"action":"deckNames","version":6}"#, origin),
    );
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Access-Control-Allow-Origin: https://app.example"));
    assert_eq!(body_json(&body)["result"], json!(["Default"]));
    server.stop();
}

#[test]
fn api_key_is_required_when_configured() {
    let server = RunningServer::start(AppConfig {
        api_key: Some("secret".to_string()),
        ..AppConfig::default()
    });

    let (_, body) = exchange(server.addr, &post(r#"{"action":"deckNames","version":6}"#, None));
    assert_eq!(body_json(&body)["error"], "valid api key must be provided");

    let (_, body) = exchange(
        server.addr,
        &post(r#"{"action":"deckNames","version":6,"key":"secret"}"#, None),
    );
    assert_eq!(body_json(&body)["result"], json!(["Default"]));

    let (_, body) = exchange(
        server.addr,
        &post(r#"{"action":"requestPermission","version":6}"#, None),
    );
    assert_eq!(body_json(&body)["result"]["requireApikey"], json!(true));
    server.stop();
}

#[test]
fn malformed_body_gets_error_envelope() {
    let server = RunningServer::start(AppConfig::default());

    let (head, body) = exchange(server.addr, &post("not json", None));

    assert!(head.starts_with("HTTP/1.1 200 OK"));
    let reply = body_json(&body);
    assert_eq!(reply["result"], Value::Null);
    assert!(reply["error"].is_string());
    server.stop();
}

#[test]
fn server_state_survives_across_connections() {
    let server = RunningServer::start(AppConfig::default());

    exchange(
        server.addr,
        &post(r#"{"action":"createDeck","version":6,"params":{"deck":"Kept"}}"#, None),
    );
    let server = server.stop();

    let decks = server.pipeline().handler().state().collection.deck_names();
    assert_eq!(decks, ["Default", "Kept"]);
    assert_eq!(server.connection_count(), 0);
}
