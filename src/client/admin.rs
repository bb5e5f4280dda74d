//! Pulsar admin REST client
//!
//! Implements [`AdminClient`] over the broker's HTTP admin API (v2 paths, with the
//! v1 path shape for cluster-qualified topic names). HTTP 409 is reported as
//! [`AdminError::Conflict`] so the provisioning loop can tell benign races apart
//! from real failures.

use super::oauth2::OAuth2TokenSource;
use super::{
    AdminClient, AdminError, BacklogQuota, ClientError, PersistencePolicies, TenantInfo,
};
use crate::admin_span;
use crate::config::{ClientSection, Credentials, OAuth2Credentials};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, Instrument};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug)]
enum AdminAuth {
    None,
    Token(String),
    OAuth2(OAuth2TokenSource),
}

/// Admin client backed by reqwest
#[derive(Debug)]
pub struct HttpAdminClient {
    base_url: String,
    http: reqwest::Client,
    auth: AdminAuth,
    closed: AtomicBool,
}

impl HttpAdminClient {
    /// Build an admin client with TLS and authentication taken from the client section
    pub fn new(config: &ClientSection) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);

        if config.admin_uses_tls() {
            builder = builder
                .danger_accept_invalid_certs(config.tls_allow_insecure_connection)
                .danger_accept_invalid_hostnames(!config.tls_enable_hostname_verification);

            if let Some(path) = &config.tls_trust_certs_file_path {
                let pem = std::fs::read(path).map_err(|e| ClientError::Connection(Box::new(e)))?;
                let certificate = reqwest::Certificate::from_pem(&pem)
                    .map_err(|e| ClientError::Connection(Box::new(e)))?;
                builder = builder.add_root_certificate(certificate);
            }
        }

        let http = builder
            .build()
            .map_err(|e| ClientError::Connection(Box::new(e)))?;

        let auth = match config
            .credentials()
            .map_err(|e| ClientError::Connection(Box::new(e)))?
        {
            None => AdminAuth::None,
            Some(Credentials::Token(token)) => AdminAuth::Token(token),
            Some(Credentials::OAuth2(oauth)) => {
                AdminAuth::OAuth2(OAuth2TokenSource::new(oauth, http.clone()))
            }
        };

        Ok(Self {
            base_url: config.http_url.trim_end_matches('/').to_string(),
            http,
            auth,
            closed: AtomicBool::new(false),
        })
    }

    /// Plain HTTP client against `base_url`, optionally with a bearer token
    pub fn from_url(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            auth: token.map(AdminAuth::Token).unwrap_or(AdminAuth::None),
            closed: AtomicBool::new(false),
        }
    }

    /// Plain HTTP client authenticating through the OAuth2 client credentials flow
    pub fn with_oauth2(base_url: &str, credentials: OAuth2Credentials) -> Self {
        let http = reqwest::Client::new();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: AdminAuth::OAuth2(OAuth2TokenSource::new(credentials, http.clone())),
            http,
            closed: AtomicBool::new(false),
        }
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, AdminError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdminError::Closed);
        }

        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        Ok(match &self.auth {
            AdminAuth::None => builder,
            AdminAuth::Token(token) => builder.bearer_auth(token),
            AdminAuth::OAuth2(source) => builder.bearer_auth(source.token().await?),
        })
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Response, AdminError> {
        let builder = self.request(method, path).await?;
        self.execute(builder.json(body), path).await
    }

    async fn execute(&self, builder: RequestBuilder, path: &str) -> Result<Response, AdminError> {
        let response = async {
            debug!("Sending admin request");
            builder.send().await
        }
        .instrument(admin_span!(path = %path))
        .await
        .map_err(|e| AdminError::Request(Box::new(e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            format!("{path}: {status}")
        } else {
            format!("{path}: {body}")
        };

        Err(match status {
            StatusCode::CONFLICT => AdminError::Conflict(message),
            StatusCode::NOT_FOUND => AdminError::NotFound(message),
            _ => AdminError::Status {
                status: status.as_u16(),
                message,
            },
        })
    }
}

/// REST path for the partitions resource of a fully qualified topic name
///
/// `persistent://tenant/ns/topic` maps to the v2 API; names with a cluster segment
/// (`persistent://tenant/cluster/ns/topic`) map to the v1 API. Bare names fall back to
/// `persistent://public/default/<name>` like the broker does.
pub fn partitions_path(topic: &str) -> String {
    let (domain, rest) = match topic.split_once("://") {
        Some((domain, rest)) => (domain, rest.trim_matches('/').to_string()),
        None => ("persistent", format!("public/default/{}", topic.trim_matches('/'))),
    };

    if rest.split('/').count() > 3 {
        format!("/admin/{domain}/{rest}/partitions")
    } else {
        format!("/admin/v2/{domain}/{rest}/partitions")
    }
}

#[async_trait]
impl AdminClient for HttpAdminClient {
    async fn list_tenants(&self) -> Result<Vec<String>, AdminError> {
        let path = "/admin/v2/tenants";
        let response = self
            .execute(self.request(Method::GET, path).await?, path)
            .await?;
        response
            .json::<Vec<String>>()
            .await
            .map_err(|e| AdminError::Request(Box::new(e)))
    }

    async fn create_tenant(&self, tenant: &str, info: &TenantInfo) -> Result<(), AdminError> {
        self.send_json(Method::PUT, &format!("/admin/v2/tenants/{tenant}"), info)
            .await?;
        Ok(())
    }

    async fn create_namespace(&self, namespace: &str) -> Result<(), AdminError> {
        let path = format!("/admin/v2/namespaces/{namespace}");
        self.execute(self.request(Method::PUT, &path).await?, &path)
            .await?;
        Ok(())
    }

    async fn set_persistence(
        &self,
        namespace: &str,
        policies: &PersistencePolicies,
    ) -> Result<(), AdminError> {
        self.send_json(
            Method::POST,
            &format!("/admin/v2/namespaces/{namespace}/persistence"),
            policies,
        )
        .await?;
        Ok(())
    }

    async fn set_backlog_quota(
        &self,
        namespace: &str,
        quota: &BacklogQuota,
    ) -> Result<(), AdminError> {
        self.send_json(
            Method::POST,
            &format!("/admin/v2/namespaces/{namespace}/backlogQuota"),
            quota,
        )
        .await?;
        Ok(())
    }

    async fn set_deduplication(&self, namespace: &str, enabled: bool) -> Result<(), AdminError> {
        self.send_json(
            Method::POST,
            &format!("/admin/v2/namespaces/{namespace}/deduplication"),
            &enabled,
        )
        .await?;
        Ok(())
    }

    async fn create_partitioned_topic(
        &self,
        topic: &str,
        partitions: u32,
    ) -> Result<(), AdminError> {
        self.send_json(Method::PUT, &partitions_path(topic), &partitions)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), AdminError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
