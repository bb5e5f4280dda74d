//! Admin REST client tests against a wiremock server
//!
//! Checks the wire shape of each admin call, status mapping, and a full provisioning
//! run including a conflict retry.


use pulsar_bench_driver::client::{
    AdminClient, AdminError, BacklogQuota, HttpAdminClient, PersistencePolicies, TenantInfo,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use pulsar_bench_driver::config::OAuth2Credentials;
use pulsar_bench_driver::driver::provision;
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn policies() -> PersistencePolicies {
    PersistencePolicies {
        ensemble_size: 3,
        write_quorum: 3,
        ack_quorum: 2,
        max_mark_delete_rate: 1.0,
    }
}

#[tokio::test]
async fn test_list_tenants_with_bearer_token() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/v2/tenants"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["public", "bench"])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpAdminClient::from_url(&mock_server.uri(), Some("secret-token".to_string()));
    let tenants = client.list_tenants().await.unwrap();

    assert_eq!(tenants, vec!["public".to_string(), "bench".to_string()]);
}

fn oauth2_credentials(issuer: &str) -> OAuth2Credentials {
    let key = STANDARD.encode(r#"{"client_id": "bench-client", "client_secret": "bench-secret"}"#);
    OAuth2Credentials {
        issuer_url: issuer.to_string(),
        private_key: format!("data:application/json;base64,{key}"),
        audience: Some("urn:sn:pulsar:bench".to_string()),
        scope: None,
    }
}

async fn mount_issuer(mock_server: &MockServer, token_status: u16) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": mock_server.uri(),
            "token_endpoint": format!("{}/oauth/token", mock_server.uri())
        })))
        .mount(mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=bench-client"))
        .and(body_string_contains("audience=urn%3Asn%3Apulsar%3Abench"))
        .respond_with(ResponseTemplate::new(token_status).set_body_json(json!({
            "access_token": "issued-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn test_oauth2_token_fetched_once_and_reused() {
    let mock_server = MockServer::start().await;
    mount_issuer(&mock_server, 200).await;
    Mock::given(method("GET"))
        .and(path("/admin/v2/tenants"))
        .and(header("authorization", "Bearer issued-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["bench"])))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = HttpAdminClient::with_oauth2(&mock_server.uri(), oauth2_credentials(&mock_server.uri()));

    assert_eq!(client.list_tenants().await.unwrap(), vec!["bench".to_string()]);
    assert_eq!(client.list_tenants().await.unwrap(), vec!["bench".to_string()]);
}

#[tokio::test]
async fn test_oauth2_rejected_token_request() {
    let mock_server = MockServer::start().await;
    mount_issuer(&mock_server, 401).await;

    let client = HttpAdminClient::with_oauth2(&mock_server.uri(), oauth2_credentials(&mock_server.uri()));
    let result = client.list_tenants().await;

    assert!(matches!(result, Err(AdminError::Status { status: 401, .. })));
}

#[tokio::test]
async fn test_create_tenant_payload() {
    let mock_server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/admin/v2/tenants/bench"))
        .and(body_json(json!({"adminRoles": [], "allowedClusters": ["standalone"]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpAdminClient::from_url(&mock_server.uri(), None);
    let info = TenantInfo {
        admin_roles: vec![],
        allowed_clusters: vec!["standalone".to_string()],
    };

    client.create_tenant("bench", &info).await.unwrap();
}

#[tokio::test]
async fn test_conflict_status_maps_to_conflict() {
    let mock_server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/admin/v2/namespaces/bench/ns"))
        .respond_with(ResponseTemplate::new(409).set_body_string("Namespace already exists"))
        .mount(&mock_server)
        .await;

    let client = HttpAdminClient::from_url(&mock_server.uri(), None);
    let error = client.create_namespace("bench/ns").await.unwrap_err();

    assert!(error.is_conflict());
    assert!(error.to_string().contains("Namespace already exists"));
}

#[tokio::test]
async fn test_other_statuses_map_to_status_errors() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/v2/namespaces/bench/ns/deduplication"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/v2/namespaces/bench/missing/deduplication"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = HttpAdminClient::from_url(&mock_server.uri(), None);

    assert!(matches!(
        client.set_deduplication("bench/ns", true).await,
        Err(AdminError::Status { status: 403, .. })
    ));
    assert!(matches!(
        client.set_deduplication("bench/missing", true).await,
        Err(AdminError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_namespace_policy_payloads() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/v2/namespaces/bench/ns/persistence"))
        .and(body_json(json!({
            "bookkeeperEnsemble": 3,
            "bookkeeperWriteQuorum": 3,
            "bookkeeperAckQuorum": 2,
            "managedLedgerMaxMarkDeleteRate": 1.0
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/v2/namespaces/bench/ns/backlogQuota"))
        .and(body_json(json!({"limitSize": i64::MAX, "policy": "producer_exception"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/v2/namespaces/bench/ns/deduplication"))
        .and(body_json(json!(false)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpAdminClient::from_url(&mock_server.uri(), None);

    client.set_persistence("bench/ns", &policies()).await.unwrap();
    client
        .set_backlog_quota("bench/ns", &BacklogQuota::unbounded())
        .await
        .unwrap();
    client.set_deduplication("bench/ns", false).await.unwrap();
}

#[tokio::test]
async fn test_create_partitioned_topic() {
    let mock_server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/admin/v2/persistent/bench/ns/topic-0/partitions"))
        .and(body_json(json!(8)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpAdminClient::from_url(&mock_server.uri(), None);

    client
        .create_partitioned_topic("persistent://bench/ns/topic-0", 8)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_admin_is_request_error() {
    // Nothing listens on the discard port
    let client = HttpAdminClient::from_url("http://127.0.0.1:9", None);
    assert!(matches!(
        client.list_tenants().await,
        Err(AdminError::Request(_))
    ));
}

#[tokio::test]
async fn test_provisioning_over_http_retries_conflict() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/admin/v2/tenants"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["public"])))
        .expect(2)
        .mount(&mock_server)
        .await;
    // Another worker wins the tenant race
    Mock::given(method("PUT"))
        .and(path("/admin/v2/tenants/bench-tenant"))
        .respond_with(ResponseTemplate::new(409))
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(
            r"^/admin/v2/namespaces/bench-tenant/bench-ns-[A-Za-z0-9_-]{7}$",
        ))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;
    // First persistence update conflicts, the retry succeeds
    Mock::given(method("POST"))
        .and(path_regex(r"/persistence$"))
        .respond_with(ResponseTemplate::new(409))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"/persistence$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"/(backlogQuota|deduplication)$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&mock_server)
        .await;

    let mut config = test_helpers::test_config();
    config.client.http_url = mock_server.uri();
    let client = HttpAdminClient::new(&config.client).unwrap();

    let provisioned = provision(&client, &config.client, &policies())
        .await
        .unwrap();

    assert_eq!(provisioned.attempts, 2);
    assert!(provisioned.namespace.starts_with("bench-tenant/bench-ns-"));
}
