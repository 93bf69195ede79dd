//! DNS provider API client.
//!
//! [`DnsProvider`] is the seam the record manager talks through. The shipped
//! [`CloudflareClient`] speaks the Cloudflare v4 REST API: every response is an
//! envelope `{success, errors, result}` and calls authenticate with a bearer
//! token.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use relay_fleet_core::NodeIp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DnsError, Result};

/// A DNS record as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DnsRecord {
    /// Provider record id.
    pub id: String,
    /// Fully-qualified record name.
    pub name: String,
    /// Record content (the target IP for A records).
    pub content: String,
    /// Time to live in seconds.
    pub ttl: u32,
}

/// Operations the record manager needs from a DNS provider.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Resolve the zone id for a base domain (e.g. `example.com`).
    ///
    /// # Errors
    ///
    /// Returns `DnsError::ZoneNotFound` if the account has no such zone.
    async fn find_zone(&self, base_domain: &str) -> Result<String>;

    /// List A records in the zone pointing at `ip`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider call fails.
    async fn list_a_records(&self, zone_id: &str, ip: &NodeIp) -> Result<Vec<DnsRecord>>;

    /// Create an unproxied A record.
    ///
    /// # Errors
    ///
    /// Returns `DnsError::Provider` if the provider rejects the record.
    async fn create_a_record(
        &self,
        zone_id: &str,
        name: &str,
        ip: &NodeIp,
        ttl: u32,
    ) -> Result<DnsRecord>;

    /// Delete a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider call fails.
    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()>;
}

/// Configuration for the Cloudflare client.
#[derive(Debug, Clone)]
pub struct CloudflareConfig {
    /// API base URL, without trailing slash.
    pub api_base: String,
    /// API token. Calls fail with `NotConfigured` when absent.
    pub api_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for CloudflareConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.cloudflare.com/client/v4".to_string(),
            api_token: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DeletedRecord {
    #[allow(dead_code)]
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    content: String,
    ttl: u32,
    proxied: bool,
}

/// Client for the Cloudflare DNS API.
///
/// Zone ids are cached for the life of the client since zones are not
/// expected to move.
pub struct CloudflareClient {
    config: CloudflareConfig,
    client: reqwest::Client,
    zones: RwLock<HashMap<String, String>>,
}

impl CloudflareClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `DnsError::Transport` if the HTTP client cannot be built.
    pub fn new(config: CloudflareConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DnsError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            zones: RwLock::new(HashMap::new()),
        })
    }

    fn token(&self) -> Result<&str> {
        self.config
            .api_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DnsError::NotConfigured("CLOUDFLARE_API_TOKEN is not set".to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_base.trim_end_matches('/'))
    }

    /// Send a request and unwrap the response envelope.
    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(self.token()?)
            .send()
            .await
            .map_err(|e| DnsError::Transport(e.to_string()))?;

        let status = response.status();
        let envelope: Envelope<T> = match response.json().await {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(DnsError::Provider {
                    code: i64::from(status.as_u16()),
                    message: format!("HTTP {status}"),
                });
            }
            Err(e) => return Err(DnsError::InvalidResponse(e.to_string())),
        };

        if !envelope.success || !status.is_success() {
            let (code, message) = envelope.errors.into_iter().next().map_or_else(
                || (i64::from(status.as_u16()), format!("HTTP {status}")),
                |e| (e.code, e.message),
            );
            tracing::debug!(code, message = %message, "DNS provider rejected request");
            return Err(DnsError::Provider { code, message });
        }

        envelope
            .result
            .ok_or_else(|| DnsError::InvalidResponse("missing result".to_string()))
    }
}

#[async_trait]
impl DnsProvider for CloudflareClient {
    async fn find_zone(&self, base_domain: &str) -> Result<String> {
        if let Some(id) = self.zones.read().get(base_domain) {
            return Ok(id.clone());
        }

        let request = self
            .client
            .get(self.url("/zones"))
            .query(&[("name", base_domain)]);
        let zones: Vec<Zone> = self.send(request).await?;

        let zone = zones
            .into_iter()
            .find(|z| z.name == base_domain)
            .ok_or_else(|| DnsError::ZoneNotFound(base_domain.to_string()))?;

        tracing::debug!(domain = %base_domain, zone_id = %zone.id, "Resolved DNS zone");
        self.zones
            .write()
            .insert(base_domain.to_string(), zone.id.clone());
        Ok(zone.id)
    }

    async fn list_a_records(&self, zone_id: &str, ip: &NodeIp) -> Result<Vec<DnsRecord>> {
        let request = self
            .client
            .get(self.url(&format!("/zones/{zone_id}/dns_records")))
            .query(&[("type", "A".to_string()), ("content", ip.to_string())]);
        self.send(request).await
    }

    async fn create_a_record(
        &self,
        zone_id: &str,
        name: &str,
        ip: &NodeIp,
        ttl: u32,
    ) -> Result<DnsRecord> {
        let body = CreateRecordRequest {
            record_type: "A",
            name,
            content: ip.to_string(),
            ttl,
            proxied: false,
        };
        let request = self
            .client
            .post(self.url(&format!("/zones/{zone_id}/dns_records")))
            .json(&body);
        self.send(request).await
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.url(&format!("/zones/{zone_id}/dns_records/{record_id}")));
        let _: DeletedRecord = self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CloudflareClient {
        CloudflareClient::new(CloudflareConfig {
            api_base: server.uri(),
            api_token: Some("test-token".to_string()),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn ip() -> NodeIp {
        NodeIp::parse("10.0.0.5").unwrap()
    }

    #[tokio::test]
    async fn find_zone_matches_name_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .and(query_param("name", "example.com"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": [{"id": "zone-1", "name": "example.com"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.find_zone("example.com").await.unwrap(), "zone-1");
        // Second lookup is served from the cache.
        assert_eq!(client.find_zone("example.com").await.unwrap(), "zone-1");
    }

    #[tokio::test]
    async fn find_zone_reports_missing_zone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": []
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).find_zone("example.org").await.unwrap_err();
        assert!(matches!(err, DnsError::ZoneNotFound(d) if d == "example.org"));
    }

    #[tokio::test]
    async fn create_sends_unproxied_a_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/zones/zone-1/dns_records"))
            .and(body_partial_json(json!({
                "type": "A",
                "name": "a.example.com",
                "content": "10.0.0.5",
                "ttl": 120,
                "proxied": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": {"id": "rec-1", "name": "a.example.com", "content": "10.0.0.5", "ttl": 120}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let record = client_for(&server)
            .create_a_record("zone-1", "a.example.com", &ip(), 120)
            .await
            .unwrap();
        assert_eq!(record.id, "rec-1");
    }

    #[tokio::test]
    async fn provider_errors_carry_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "errors": [{"code": 81057, "message": "Record already exists."}],
                "result": null
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_a_record("zone-1", "a.example.com", &ip(), 120)
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn list_filters_by_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .and(query_param("type", "A"))
            .and(query_param("content", "10.0.0.5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": [{"id": "rec-1", "name": "a.example.com", "content": "10.0.0.5", "ttl": 120}]
            })))
            .mount(&server)
            .await;

        let records = client_for(&server)
            .list_a_records("zone-1", &ip())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "a.example.com");
    }

    #[tokio::test]
    async fn delete_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/zones/zone-1/dns_records/rec-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": {"id": "rec-1"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .delete_record("zone-1", "rec-1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_token_fails_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = CloudflareClient::new(CloudflareConfig {
            api_base: server.uri(),
            api_token: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap();

        let err = client.find_zone("example.com").await.unwrap_err();
        assert!(matches!(err, DnsError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn non_json_error_maps_to_status_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client_for(&server).find_zone("example.com").await.unwrap_err();
        assert!(matches!(err, DnsError::Provider { code: 502, .. }));
    }
}
