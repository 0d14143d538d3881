//! HTTP collaborators against a mock remote service.

use serde_json::json;
use soql_copilot::error::CopilotError;
use soql_copilot::execution::{RestConnection, RestQueryEngine, StatementExecutor};
use soql_copilot::execution_loop::{ErrorClass, ErrorClassifier};
use soql_copilot::llm::{LlmClient, TextGenerator};
use soql_copilot::schema::{RestSchemaProvider, SchemaProvider};
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connection(server: &MockServer) -> Arc<RestConnection> {
    Arc::new(
        RestConnection::new(server.uri(), "test-token".to_string(), "v59.0".to_string()).unwrap(),
    )
}

#[tokio::test]
async fn test_llm_client_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer mock-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "SELECT Id FROM Account"},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LlmClient::new("mock-key".to_string(), "gpt-4o-mini".to_string(), server.uri());
    let reply = client.complete("list accounts").await.unwrap();
    assert_eq!(reply, "SELECT Id FROM Account");
}

#[tokio::test]
async fn test_llm_client_surfaces_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let client = LlmClient::new("mock-key".to_string(), "gpt-4o-mini".to_string(), server.uri());
    let err = client.complete("list accounts").await.unwrap_err();
    assert!(matches!(err, CopilotError::Llm(ref msg) if msg.contains("upstream down")));
}

#[tokio::test]
async fn test_query_engine_follows_next_records_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/data/v59.0/query"))
        .and(query_param("q", "SELECT Id FROM Account"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 3,
            "done": false,
            "nextRecordsUrl": "/services/data/v59.0/query/01gD-2000",
            "records": [{"Id": "001000000000001"}, {"Id": "001000000000002"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/data/v59.0/query/01gD-2000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 3,
            "done": true,
            "records": [{"Id": "001000000000003"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = RestQueryEngine::new(connection(&server), 100);
    let rows = engine.execute("SELECT Id FROM Account").await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.total_count, 3);
    assert_eq!(
        rows.identifiers("Id", 200),
        vec!["001000000000001", "001000000000002", "001000000000003"]
    );
}

#[tokio::test]
async fn test_query_engine_stops_at_row_cap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/data/v59.0/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 5000,
            "done": false,
            "nextRecordsUrl": "/services/data/v59.0/query/01gD-2000",
            "records": [{"Id": "a"}, {"Id": "b"}, {"Id": "c"}]
        })))
        .mount(&server)
        .await;

    let engine = RestQueryEngine::new(connection(&server), 2);
    let rows = engine.execute("SELECT Id FROM Lead").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.total_count, 5000);
}

#[tokio::test]
async fn test_query_engine_error_payload_is_classifiable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/data/v59.0/query"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!([{
            "message": "\nSELECT Id, Phonee FROM Account\n       ^\nERROR at Row:1:Column:12\nNo such column 'Phonee' on entity 'Account'.",
            "errorCode": "INVALID_FIELD"
        }])))
        .mount(&server)
        .await;

    let engine = RestQueryEngine::new(connection(&server), 100);
    let err = engine.execute("SELECT Id, Phonee FROM Account").await.unwrap_err();
    assert!(err.message.starts_with("INVALID_FIELD:"));
    assert_eq!(ErrorClassifier::default().classify(&err.message), ErrorClass::Structural);
}

#[tokio::test]
async fn test_query_engine_expired_session_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/data/v59.0/query"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!([{
            "message": "Session expired or invalid",
            "errorCode": "INVALID_SESSION_ID"
        }])))
        .mount(&server)
        .await;

    let engine = RestQueryEngine::new(connection(&server), 100);
    let err = engine.execute("SELECT Id FROM Account").await.unwrap_err();
    assert_eq!(ErrorClassifier::default().classify(&err.message), ErrorClass::Fatal);
}

#[tokio::test]
async fn test_schema_provider_describe_and_catalogue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/data/v59.0/sobjects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sobjects": [
                {"name": "Account", "queryable": true},
                {"name": "AccountHistoryShadow", "queryable": false},
                {"name": "Contact", "queryable": true}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/data/v59.0/sobjects/Contact/describe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Contact",
            "fields": [
                {"name": "Id", "type": "id", "referenceTo": []},
                {"name": "AccountId", "type": "reference", "referenceTo": ["Account"]}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/data/v59.0/sobjects/Widget/describe"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!([{
            "message": "The requested resource does not exist",
            "errorCode": "NOT_FOUND"
        }])))
        .mount(&server)
        .await;

    let provider = RestSchemaProvider::new(connection(&server));

    let catalogue = provider.schema(None).await.unwrap();
    let names: Vec<&str> = catalogue.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["Account", "Contact"]);

    let contact = provider.schema(Some("Contact")).await.unwrap();
    assert_eq!(contact[0].relationship_to("Account").unwrap().field, "AccountId");

    assert!(provider.schema(Some("Widget")).await.unwrap().is_empty());
}
