//! Tests for the Namespace control-plane client against a mocked HTTP API.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;

use super::*;
use crate::namespace::types::{ContainerRequest, InstanceShape};

const BEARER: &str = "Bearer nsct_test";

fn method_path(method: &str) -> String {
    format!("/{COMPUTE_SERVICE}/{method}")
}

/// Registers a mock for one authenticated JSON call to `method`.
async fn mock_call(
    server: &mut ServerGuard,
    method: &str,
    body: Matcher,
    status: usize,
    response: &str,
) -> Mock {
    server
        .mock("POST", method_path(method).as_str())
        .match_header("authorization", BEARER)
        .match_header("content-type", "application/json")
        .match_body(body)
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(response)
        .expect(1)
        .create_async()
        .await
}

async fn open_client(endpoint: &str) -> Arc<dyn ComputeClient> {
    let api = NamespaceApi::new(endpoint, Duration::from_secs(5))
        .unwrap_or_else(|err| panic!("api: {err}"));
    api.open(&Token::new("nsct_test"))
        .await
        .unwrap_or_else(|err| panic!("open: {err}"))
}

fn sample_request() -> CreateInstanceRequest {
    CreateInstanceRequest {
        shape: InstanceShape {
            virtual_cpu: 2,
            memory_megabytes: 4096,
            machine_arch: String::from("amd64"),
        },
        documented_purpose: String::from("Dagger engine 0.11.4"),
        interactive: true,
        deadline: Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("valid timestamp")),
        containers: vec![ContainerRequest {
            name: String::from("dagger-engine"),
            image_ref: String::from("registry.dagger.io/engine:v0.11.4"),
            args: Vec::new(),
            privileged: true,
            docker_sock_path: String::from("/var/run/docker.sock"),
            nsc_state_path: String::from("/var/run/nsc"),
            volumes: Vec::new(),
            experimental: None,
        }],
        experimental: None,
    }
}

#[test]
fn endpoint_is_normalised() {
    let api = NamespaceApi::new(" https://example.test/ ", Duration::from_secs(1))
        .unwrap_or_else(|err| panic!("api: {err}"));
    assert_eq!(api.endpoint(), "https://example.test");
}

#[tokio::test]
async fn create_instance_posts_json_with_bearer_token() {
    let mut server = Server::new_async().await;
    let expected_body = serde_json::to_value(sample_request())
        .unwrap_or_else(|err| panic!("serialise request: {err}"));
    let mock = mock_call(
        &mut server,
        CREATE_INSTANCE,
        Matcher::AllOf(vec![
            Matcher::Json(expected_body),
            Matcher::PartialJson(json!({
                "documentedPurpose": "Dagger engine 0.11.4",
                "shape": {"virtualCpu": 2, "memoryMegabytes": 4096},
            })),
        ]),
        200,
        r#"{"metadata":{"instanceId":"inst-1","region":"eu"},"instanceUrl":"https://dash/inst-1"}"#,
    )
    .await;
    let client = open_client(&server.url()).await;

    let response = client
        .create_instance(&sample_request())
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    mock.assert_async().await;
    assert_eq!(response.metadata.instance_id, "inst-1");
    assert_eq!(response.instance_url, "https://dash/inst-1");
    assert_eq!(
        response.metadata.extra.get("region"),
        Some(&serde_json::Value::from("eu"))
    );
}

#[tokio::test]
async fn error_status_maps_to_status_error() {
    let mut server = Server::new_async().await;
    let mock = mock_call(
        &mut server,
        WAIT_INSTANCE,
        Matcher::Json(json!({"instanceId": "inst-1"})),
        403,
        r#"{"code":"permission_denied","message":"token expired"}"#,
    )
    .await;
    let client = open_client(&server.url()).await;

    let err = client
        .wait_instance("inst-1")
        .await
        .expect_err("403 should fail");

    mock.assert_async().await;
    assert_eq!(
        err,
        ComputeError::Status {
            method: String::from("WaitInstance"),
            code: String::from("permission_denied"),
            message: String::from("token expired"),
        }
    );
}

#[tokio::test]
async fn non_json_error_body_is_kept_verbatim() {
    let mut server = Server::new_async().await;
    let mock = mock_call(
        &mut server,
        DESTROY_INSTANCE,
        Matcher::Json(json!({"instanceId": "inst-1"})),
        502,
        "upstream down",
    )
    .await;
    let client = open_client(&server.url()).await;

    let err = client
        .destroy_instance("inst-1")
        .await
        .expect_err("502 should fail");

    mock.assert_async().await;
    assert_eq!(
        err,
        ComputeError::Status {
            method: String::from("DestroyInstance"),
            code: String::from("502"),
            message: String::from("upstream down"),
        }
    );
}

#[tokio::test]
async fn destroy_accepts_empty_object() {
    let mut server = Server::new_async().await;
    let mock = mock_call(
        &mut server,
        DESTROY_INSTANCE,
        Matcher::Json(json!({"instanceId": "inst-1"})),
        200,
        "{}",
    )
    .await;
    let client = open_client(&server.url()).await;

    let result = client.destroy_instance("inst-1").await;

    mock.assert_async().await;
    assert_eq!(result, Ok(()));
}

#[tokio::test]
async fn closed_client_rejects_calls() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let client = open_client(&server.url()).await;
    client.close();

    let err = client
        .wait_instance("inst-1")
        .await
        .expect_err("closed client should fail");

    mock.assert_async().await;
    assert_eq!(err, ComputeError::Closed);
}
