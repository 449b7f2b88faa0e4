//! HTTP client for a Web3Signer-compatible remote signer.
//!
//! Uses the signing service's liveness and key listing endpoints plus the
//! keymanager keystore import/delete API. The signer reports one status
//! per keystore on import; anything other than `imported` or `duplicate`
//! is a rejection the pool must react to.

use std::time::Duration;

use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use async_trait::async_trait;
use stakeops_types::{normalize_public_key, KeyOpsError, KeyOpsResult};

use crate::{ImportStatus, KeystoreImport, RemoteSigner};

/// Client for one signer instance.
#[derive(Clone)]
pub struct Web3SignerClient {
    base_url: String,
    client: HttpClient,
}

impl Web3SignerClient {
    pub fn new(base_url: String, timeout_secs: u64) -> KeyOpsResult<Self> {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| KeyOpsError::InvalidConfig {
                reason: format!("failed to create http client: {}", e),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn check_status(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> KeyOpsResult<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let reason = response.text().await.unwrap_or_default();
            return Err(KeyOpsError::PermissionDenied {
                service: "signer".to_string(),
                reason,
            });
        }
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(KeyOpsError::SignerUnavailable {
                reason: format!("{} failed with {}: {}", context, status, reason),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteSigner for Web3SignerClient {
    async fn upcheck(&self) -> KeyOpsResult<()> {
        let url = format!("{}/upcheck", self.base_url);
        let response = self.client.get(&url).send().await.map_err(connect_error)?;
        self.check_status(response, "upcheck").await?;
        Ok(())
    }

    async fn list_public_keys(&self) -> KeyOpsResult<Vec<String>> {
        let url = format!("{}/api/v1/eth2/publicKeys", self.base_url);
        let response = self.client.get(&url).send().await.map_err(connect_error)?;
        let response = self.check_status(response, "public key listing").await?;
        let keys: Vec<String> = response
            .json()
            .await
            .map_err(|e| KeyOpsError::Serialization(format!("public key listing: {}", e)))?;

        let mut normalized = Vec::with_capacity(keys.len());
        for key in keys {
            match normalize_public_key(&key) {
                Ok(canonical) => normalized.push(canonical),
                Err(_) => warn!(key = %key, "signer reported a malformed public key, skipping"),
            }
        }
        normalized.sort_unstable();
        Ok(normalized)
    }

    async fn import_keystores(&self, imports: &[KeystoreImport]) -> KeyOpsResult<Vec<ImportStatus>> {
        let url = format!("{}/eth/v1/keystores", self.base_url);
        let request = KeystoresImportRequest {
            keystores: imports.iter().map(|i| i.keystore_json.clone()).collect(),
            passwords: imports.iter().map(|i| i.password.clone()).collect(),
        };
        debug!(count = imports.len(), "importing keystores into signer");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(connect_error)?;
        let response = self.check_status(response, "keystore import").await?;
        let body: StatusListResponse = response
            .json()
            .await
            .map_err(|e| KeyOpsError::Serialization(format!("keystore import response: {}", e)))?;

        if body.data.len() != imports.len() {
            return Err(KeyOpsError::Serialization(format!(
                "signer acknowledged {} keystores for {} imported",
                body.data.len(),
                imports.len()
            )));
        }
        Ok(body.data.iter().map(import_status).collect())
    }

    async fn remove_keys(&self, public_keys: &[String]) -> KeyOpsResult<()> {
        if public_keys.is_empty() {
            return Ok(());
        }
        let url = format!("{}/eth/v1/keystores", self.base_url);
        let request = KeystoresDeleteRequest {
            pubkeys: public_keys.iter().map(|pk| prefixed(pk)).collect(),
        };
        debug!(count = public_keys.len(), "removing keys from signer");

        let response = self
            .client
            .delete(&url)
            .json(&request)
            .send()
            .await
            .map_err(connect_error)?;
        let response = self.check_status(response, "keystore removal").await?;
        let body: StatusListResponse = response
            .json()
            .await
            .map_err(|e| KeyOpsError::Serialization(format!("keystore removal response: {}", e)))?;

        for (entry, public_key) in body.data.iter().zip(public_keys) {
            // absent keys are fine; rollback must be repeatable
            if entry.status.eq_ignore_ascii_case("error") {
                return Err(KeyOpsError::SignerUnavailable {
                    reason: format!("removal rejected for {}: {}", public_key, entry.message),
                });
            }
        }
        Ok(())
    }
}

fn connect_error(e: reqwest::Error) -> KeyOpsError {
    KeyOpsError::SignerUnavailable {
        reason: e.to_string(),
    }
}

fn prefixed(public_key: &str) -> String {
    if public_key.starts_with("0x") {
        public_key.to_string()
    } else {
        format!("0x{}", public_key)
    }
}

fn import_status(entry: &StatusEntry) -> ImportStatus {
    match entry.status.to_lowercase().as_str() {
        "imported" => ImportStatus::Imported,
        "duplicate" => ImportStatus::Duplicate,
        _ if entry.message.is_empty() => ImportStatus::Rejected(entry.status.clone()),
        _ => ImportStatus::Rejected(entry.message.clone()),
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct KeystoresImportRequest {
    keystores: Vec<String>,
    passwords: Vec<String>,
}

#[derive(Debug, Serialize)]
struct KeystoresDeleteRequest {
    pubkeys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StatusListResponse {
    data: Vec<StatusEntry>,
}

#[derive(Debug, Deserialize)]
struct StatusEntry {
    status: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_status_mapping() {
        let entry = |status: &str, message: &str| StatusEntry {
            status: status.to_string(),
            message: message.to_string(),
        };
        assert_eq!(import_status(&entry("imported", "")), ImportStatus::Imported);
        assert_eq!(import_status(&entry("IMPORTED", "")), ImportStatus::Imported);
        assert_eq!(import_status(&entry("duplicate", "")), ImportStatus::Duplicate);
        assert_eq!(
            import_status(&entry("error", "bad password")),
            ImportStatus::Rejected("bad password".to_string())
        );
        assert_eq!(
            import_status(&entry("error", "")),
            ImportStatus::Rejected("error".to_string())
        );
        assert!(import_status(&entry("duplicate", "")).is_acknowledged());
        assert!(!import_status(&entry("error", "x")).is_acknowledged());
    }

    #[test]
    fn test_prefixed() {
        assert_eq!(prefixed("aabb"), "0xaabb");
        assert_eq!(prefixed("0xaabb"), "0xaabb");
    }

    #[test]
    fn test_import_request_shape() {
        let request = KeystoresImportRequest {
            keystores: vec!["{}".to_string()],
            passwords: vec!["pw".to_string()],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["keystores"][0], "{}");
        assert_eq!(value["passwords"][0], "pw");
    }

    #[test]
    fn test_status_response_parse() {
        let body = r#"{"data":[{"status":"imported"},{"status":"error","message":"boom"}]}"#;
        let parsed: StatusListResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[1].message, "boom");
    }
}
