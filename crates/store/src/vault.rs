//! KV v2 secret-store client over HTTP.
//!
//! Each key occupies one versioned secret at `{prefix}/{short_hash}`, where
//! `short_hash` is the first 16 hex chars of SHA-256 over the canonical
//! public key hex. The data payload carries the lifecycle record and the
//! material together; a summary of the record is mirrored into the secret's
//! custom metadata so listings (and soft-deleted or destroyed keys, whose
//! data can no longer be read) stay identifiable without touching material.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use async_trait::async_trait;
use stakeops_types::{KeyFilter, KeyOpsError, KeyOpsResult, KeyRecord, StoreLifecycle};

use crate::{SecretMaterial, SecretStore, StoreHealth, StoredKey};

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

/// HTTP client for a KV v2 mount.
#[derive(Clone)]
pub struct VaultClient {
    addr: String,
    mount: String,
    prefix: String,
    token: String,
    client: HttpClient,
}

impl VaultClient {
    /// Create a client for `{addr}/v1/{mount}` with key records under
    /// `prefix`.
    pub fn new(
        addr: String,
        mount: String,
        prefix: String,
        token: String,
        timeout_secs: u64,
    ) -> KeyOpsResult<Self> {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| KeyOpsError::InvalidConfig {
                reason: format!("failed to create http client: {}", e),
            })?;

        Ok(Self {
            addr: addr.trim_end_matches('/').to_string(),
            mount,
            prefix: prefix.trim_matches('/').to_string(),
            token,
            client,
        })
    }

    /// Storage path for a public key.
    fn store_path(&self, public_key: &str) -> String {
        format!("{}/{}", self.prefix, short_hash(public_key))
    }

    fn data_url(&self, path: &str) -> String {
        format!("{}/v1/{}/data/{}", self.addr, self.mount, path)
    }

    fn metadata_url(&self, path: &str) -> String {
        format!("{}/v1/{}/metadata/{}", self.addr, self.mount, path)
    }

    /// Map 403 and server-side failures; pass everything else through.
    async fn check_status(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> KeyOpsResult<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(KeyOpsError::PermissionDenied {
                service: "vault".to_string(),
                reason: error_text(response).await,
            });
        }
        if status.is_server_error() {
            return Err(KeyOpsError::StoreUnavailable {
                reason: format!("{} failed with {}: {}", context, status, error_text(response).await),
            });
        }
        Ok(response)
    }

    /// Read one secret's data payload. `public_key` is only used to label
    /// errors; `path` is already derived.
    async fn read_payload(&self, path: &str, public_key: &str) -> KeyOpsResult<(SecretPayload, u64)> {
        let response = self
            .client
            .get(self.data_url(path))
            .header(VAULT_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(connect_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_missing(public_key, &body));
        }
        let response = self.check_status(response, "secret read").await?;
        let body: VaultReadResponse = response
            .json()
            .await
            .map_err(|e| KeyOpsError::Serialization(format!("secret read response: {}", e)))?;

        let version = body.data.metadata.version;
        let raw = body.data.data.ok_or_else(|| KeyOpsError::Gone {
            public_key: public_key.to_string(),
            destroyed: body.data.metadata.destroyed,
        })?;
        let payload: SecretPayload =
            serde_json::from_value(raw).map_err(|e| KeyOpsError::CorruptedRecord {
                public_key: public_key.to_string(),
                reason: format!("payload decode failed: {}", e),
            })?;
        Ok((payload, version))
    }

    async fn read_metadata(&self, path: &str, public_key: &str) -> KeyOpsResult<VaultMetadata> {
        let response = self
            .client
            .get(self.metadata_url(path))
            .header(VAULT_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(connect_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(KeyOpsError::NotFound {
                public_key: public_key.to_string(),
            });
        }
        let response = self.check_status(response, "metadata read").await?;
        let body: VaultMetadataResponse = response
            .json()
            .await
            .map_err(|e| KeyOpsError::Serialization(format!("metadata response: {}", e)))?;
        Ok(body.data)
    }

    /// Mirror the record summary into custom metadata so the key stays
    /// identifiable after its data is deleted.
    async fn write_custom_metadata(&self, path: &str, record: &KeyRecord) -> KeyOpsResult<()> {
        let request = VaultMetadataWrite {
            custom_metadata: custom_metadata_for(record),
        };
        let response = self
            .client
            .post(self.metadata_url(path))
            .header(VAULT_TOKEN_HEADER, &self.token)
            .json(&request)
            .send()
            .await
            .map_err(connect_error)?;
        self.check_status(response, "metadata write").await?;
        Ok(())
    }

    /// Build the listing record for one hashed key name.
    async fn record_for_entry(&self, key: &str) -> KeyOpsResult<Option<KeyRecord>> {
        let path = format!("{}/{}", self.prefix, key);
        let meta = match self.read_metadata(&path, key).await {
            Ok(meta) => meta,
            // deleted between list and read
            Err(KeyOpsError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let lifecycle = meta.current_lifecycle();

        if lifecycle == StoreLifecycle::Present {
            match self.read_payload(&path, key).await {
                Ok((payload, version)) => {
                    let mut record = payload.record;
                    record.version = version;
                    record.store_lifecycle = StoreLifecycle::Present;
                    return Ok(Some(record));
                }
                Err(KeyOpsError::CorruptedRecord { reason, .. }) => {
                    warn!(entry = key, %reason, "unreadable payload, listing from custom metadata");
                }
                Err(KeyOpsError::NotFound { .. }) | Err(KeyOpsError::Gone { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        match synthesize_record(&meta, lifecycle) {
            Some(record) => Ok(Some(record)),
            None => {
                warn!(entry = key, "store entry has no custom metadata, skipping");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn put(
        &self,
        record: &KeyRecord,
        material: &SecretMaterial,
        cas: Option<u64>,
    ) -> KeyOpsResult<u64> {
        let path = self.store_path(&record.public_key);
        let request = VaultWriteRequest {
            data: SecretPayload::new(record, material),
            options: cas.map(|v| WriteOptions { cas: v }),
        };
        debug!(public_key = %record.short_public_key(), ?cas, "writing key record");

        let response = self
            .client
            .post(self.data_url(&path))
            .header(VAULT_TOKEN_HEADER, &self.token)
            .json(&request)
            .send()
            .await
            .map_err(connect_error)?;

        if response.status() == StatusCode::BAD_REQUEST {
            let text = error_text(response).await;
            if text.contains("check-and-set") {
                return Err(KeyOpsError::VersionConflict {
                    public_key: record.public_key.clone(),
                    expected: cas.unwrap_or(0),
                });
            }
            return Err(KeyOpsError::Serialization(format!(
                "store rejected write: {}",
                text
            )));
        }
        let response = self.check_status(response, "secret write").await?;
        let body: VaultWriteResponse = response
            .json()
            .await
            .map_err(|e| KeyOpsError::Serialization(format!("secret write response: {}", e)))?;

        self.write_custom_metadata(&path, record).await?;
        Ok(body.data.version)
    }

    async fn get(&self, public_key: &str) -> KeyOpsResult<StoredKey> {
        let path = self.store_path(public_key);
        let (payload, version) = self.read_payload(&path, public_key).await?;

        let secret = hex::decode(&payload.secret_key).map_err(|e| KeyOpsError::CorruptedRecord {
            public_key: public_key.to_string(),
            reason: format!("secret key decode failed: {}", e),
        })?;
        let mut record = payload.record;
        record.version = version;
        record.store_lifecycle = StoreLifecycle::Present;
        Ok(StoredKey {
            record,
            material: SecretMaterial {
                secret_key: Zeroizing::new(secret),
                keystore_json: payload.keystore,
                keystore_password: payload.keystore_password,
            },
        })
    }

    async fn list(&self, filter: &KeyFilter) -> KeyOpsResult<Vec<KeyRecord>> {
        let url = format!("{}?list=true", self.metadata_url(&self.prefix));
        let response = self
            .client
            .get(&url)
            .header(VAULT_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(connect_error)?;

        // no keys written yet
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = self.check_status(response, "list").await?;
        let body: VaultListResponse = response
            .json()
            .await
            .map_err(|e| KeyOpsError::Serialization(format!("list response: {}", e)))?;

        let mut records = Vec::new();
        for key in &body.data.keys {
            if key.ends_with('/') {
                continue;
            }
            if let Some(record) = self.record_for_entry(key).await? {
                if filter.matches(&record) {
                    records.push(record);
                }
            }
        }
        records.sort_by(|a, b| {
            (a.created_at, a.public_key.as_str()).cmp(&(b.created_at, b.public_key.as_str()))
        });
        Ok(records)
    }

    async fn soft_delete(&self, public_key: &str) -> KeyOpsResult<()> {
        let path = self.store_path(public_key);
        let response = self
            .client
            .delete(self.data_url(&path))
            .header(VAULT_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(connect_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(KeyOpsError::NotFound {
                public_key: public_key.to_string(),
            });
        }
        self.check_status(response, "soft delete").await?;
        Ok(())
    }

    async fn destroy(&self, public_key: &str) -> KeyOpsResult<()> {
        let path = self.store_path(public_key);
        let meta = self.read_metadata(&path, public_key).await?;
        let versions: Vec<u64> = meta.version_numbers();
        if versions.is_empty() {
            return Ok(());
        }

        let url = format!("{}/v1/{}/destroy/{}", self.addr, self.mount, path);
        let response = self
            .client
            .post(&url)
            .header(VAULT_TOKEN_HEADER, &self.token)
            .json(&VersionsRequest { versions })
            .send()
            .await
            .map_err(connect_error)?;
        self.check_status(response, "destroy").await?;
        Ok(())
    }

    async fn undelete(&self, public_key: &str) -> KeyOpsResult<()> {
        let path = self.store_path(public_key);
        let meta = self.read_metadata(&path, public_key).await?;
        if meta.current_lifecycle() == StoreLifecycle::Destroyed {
            return Err(KeyOpsError::Gone {
                public_key: public_key.to_string(),
                destroyed: true,
            });
        }

        let url = format!("{}/v1/{}/undelete/{}", self.addr, self.mount, path);
        let response = self
            .client
            .post(&url)
            .header(VAULT_TOKEN_HEADER, &self.token)
            .json(&VersionsRequest {
                versions: vec![meta.current_version],
            })
            .send()
            .await
            .map_err(connect_error)?;
        self.check_status(response, "undelete").await?;
        Ok(())
    }

    async fn delete_all_versions(&self, public_key: &str) -> KeyOpsResult<()> {
        let path = self.store_path(public_key);
        let response = self
            .client
            .delete(self.metadata_url(&path))
            .header(VAULT_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(connect_error)?;

        // removing an absent record is a no-op
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.check_status(response, "metadata delete").await?;
        Ok(())
    }

    async fn health(&self) -> KeyOpsResult<StoreHealth> {
        let url = format!("{}/v1/sys/health", self.addr);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(connect_error)?;

        // the health endpoint encodes state in the status code but always
        // returns a describing body
        let body: VaultHealthResponse = response
            .json()
            .await
            .map_err(|e| KeyOpsError::StoreUnavailable {
                reason: format!("unexpected health response: {}", e),
            })?;
        Ok(StoreHealth {
            initialized: body.initialized,
            sealed: body.sealed,
            version: body.version,
        })
    }
}

fn connect_error(e: reqwest::Error) -> KeyOpsError {
    KeyOpsError::StoreUnavailable {
        reason: e.to_string(),
    }
}

/// First 16 hex chars of SHA-256 over the canonical public key hex.
fn short_hash(public_key: &str) -> String {
    let digest = Sha256::digest(public_key.as_bytes());
    hex::encode(digest)[..16].to_string()
}

async fn error_text(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<VaultErrorBody>(&text) {
        Ok(body) if !body.errors.is_empty() => body.errors.join("; "),
        _ if text.is_empty() => "unknown error".to_string(),
        _ => text,
    }
}

/// Decide what a 404 on a data read means: soft-deleted and destroyed
/// versions still return version metadata, a missing record does not.
fn classify_missing(public_key: &str, body: &str) -> KeyOpsError {
    if let Ok(resp) = serde_json::from_str::<VaultReadResponse>(body) {
        let meta = resp.data.metadata;
        if meta.destroyed {
            return KeyOpsError::Gone {
                public_key: public_key.to_string(),
                destroyed: true,
            };
        }
        if !meta.deletion_time.is_empty() {
            return KeyOpsError::Gone {
                public_key: public_key.to_string(),
                destroyed: false,
            };
        }
    }
    KeyOpsError::NotFound {
        public_key: public_key.to_string(),
    }
}

fn custom_metadata_for(record: &KeyRecord) -> HashMap<String, String> {
    let mut custom = HashMap::new();
    custom.insert("public_key".to_string(), record.public_key.clone());
    custom.insert(
        "mnemonic_index".to_string(),
        record.mnemonic_index.to_string(),
    );
    custom.insert("batch_id".to_string(), record.batch_id.clone());
    custom.insert("status".to_string(), record.status.to_string());
    custom.insert("created_at".to_string(), record.created_at.to_rfc3339());
    custom.insert("updated_at".to_string(), record.updated_at.to_rfc3339());
    if let Some(client_type) = &record.client_type {
        custom.insert("client_type".to_string(), client_type.clone());
    }
    if let Some(notes) = &record.notes {
        custom.insert("notes".to_string(), notes.clone());
    }
    custom
}

/// Rebuild a listing record from custom metadata alone. Used for keys
/// whose data can no longer (or not currently) be read.
fn synthesize_record(meta: &VaultMetadata, lifecycle: StoreLifecycle) -> Option<KeyRecord> {
    let custom = meta.custom_metadata.as_ref()?;
    let public_key = custom.get("public_key")?.clone();
    let parse_ts = |field: &str| {
        custom
            .get(field)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    };
    Some(KeyRecord {
        public_key,
        mnemonic_index: custom
            .get("mnemonic_index")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        batch_id: custom.get("batch_id").cloned().unwrap_or_default(),
        status: custom
            .get("status")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
        store_lifecycle: lifecycle,
        client_type: custom.get("client_type").cloned(),
        created_at: parse_ts("created_at"),
        updated_at: parse_ts("updated_at"),
        notes: custom.get("notes").cloned(),
        version: meta.current_version,
    })
}

// ============================================================================
// Wire Types
// ============================================================================

/// Stored data payload: the lifecycle record plus the material. The
/// record's `version` and `store_lifecycle` fields inside the payload are
/// advisory; the store's version metadata is authoritative and overwrites
/// them on every read.
#[derive(Debug, Serialize, Deserialize)]
struct SecretPayload {
    record: KeyRecord,
    /// Hex-encoded secret scalar.
    secret_key: String,
    /// Serialized keystore JSON.
    keystore: String,
    keystore_password: String,
}

impl SecretPayload {
    fn new(record: &KeyRecord, material: &SecretMaterial) -> Self {
        Self {
            record: record.clone(),
            secret_key: hex::encode(material.secret_key.as_slice()),
            keystore: material.keystore_json.clone(),
            keystore_password: material.keystore_password.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct VaultWriteRequest {
    data: SecretPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<WriteOptions>,
}

#[derive(Debug, Serialize)]
struct WriteOptions {
    cas: u64,
}

#[derive(Debug, Deserialize)]
struct VaultWriteResponse {
    data: VaultVersionMetadata,
}

#[derive(Debug, Deserialize)]
struct VaultReadResponse {
    data: VaultReadData,
}

#[derive(Debug, Deserialize)]
struct VaultReadData {
    #[serde(default)]
    data: Option<serde_json::Value>,
    metadata: VaultVersionMetadata,
}

#[derive(Debug, Deserialize)]
struct VaultVersionMetadata {
    #[serde(default)]
    deletion_time: String,
    #[serde(default)]
    destroyed: bool,
    version: u64,
}

#[derive(Debug, Deserialize)]
struct VaultListResponse {
    data: VaultListData,
}

#[derive(Debug, Deserialize)]
struct VaultListData {
    keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VaultMetadataResponse {
    data: VaultMetadata,
}

#[derive(Debug, Deserialize)]
struct VaultMetadata {
    current_version: u64,
    #[serde(default)]
    versions: HashMap<String, VaultVersionInfo>,
    #[serde(default)]
    custom_metadata: Option<HashMap<String, String>>,
}

impl VaultMetadata {
    fn current_lifecycle(&self) -> StoreLifecycle {
        match self.versions.get(&self.current_version.to_string()) {
            Some(info) if info.destroyed => StoreLifecycle::Destroyed,
            Some(info) if !info.deletion_time.is_empty() => StoreLifecycle::SoftDeleted,
            _ => StoreLifecycle::Present,
        }
    }

    fn version_numbers(&self) -> Vec<u64> {
        let mut versions: Vec<u64> = self.versions.keys().filter_map(|k| k.parse().ok()).collect();
        versions.sort_unstable();
        versions
    }
}

#[derive(Debug, Deserialize)]
struct VaultVersionInfo {
    #[serde(default)]
    deletion_time: String,
    #[serde(default)]
    destroyed: bool,
}

#[derive(Debug, Serialize)]
struct VaultMetadataWrite {
    custom_metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct VersionsRequest {
    versions: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct VaultErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VaultHealthResponse {
    initialized: bool,
    sealed: bool,
    #[serde(default)]
    version: String,
}
