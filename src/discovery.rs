//! Discovery registry: a catalog of merchant resources observed through
//! successful settlements.
//!
//! Registration is opportunistic and never blocks or fails a settlement. Records
//! live in an external [`ResourceStore`]; when no store is configured the
//! registry degrades to a no-op and listings return empty pages.
//!
//! Resource URLs are screened both at registration and again at query time, so a
//! record that slipped in under a more permissive configuration is still not
//! served.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use url::{Host, Url};
use uuid::Uuid;

use crate::timestamp::UnixTimestamp;
use crate::types::{PaymentRequirements, X402Version};

/// Records older than this many days are invisible to listings.
const TTL_DAYS: u64 = 7;
/// Re-registrations within this window are skipped unless something changed.
const DEBOUNCE_SECS: u64 = 24 * 60 * 60;
/// Soft-deleted records are purged after this many days.
const PURGE_AFTER_DAYS: u64 = 30;

const DEFAULT_PAGE_LIMIT: u64 = 100;
const MAX_PAGE_LIMIT: u64 = 1000;

/// A catalogued resource and the payment requirements it accepts.
///
/// The accepts list is keyed by `(payTo, asset, network)`: re-registration
/// replaces the matching entry and appends new triples.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResource {
    pub id: String,
    pub resource: Url,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub x402_version: X402Version,
    pub accepts: Vec<PaymentRequirements>,
    pub last_updated: UnixTimestamp,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<UnixTimestamp>,
    pub created_at: UnixTimestamp,
    pub updated_at: UnixTimestamp,
}

#[derive(Debug, thiserror::Error)]
#[error("resource store failure: {0}")]
pub struct ResourceStoreError(pub String);

/// CRUD port over the persisted record set, keyed by resource URL.
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_by_resource(
        &self,
        resource: &Url,
    ) -> Result<Option<DiscoveryResource>, ResourceStoreError>;

    /// Insert or replace the record with the same resource URL.
    async fn upsert(&self, record: DiscoveryResource) -> Result<(), ResourceStoreError>;

    async fn list(&self) -> Result<Vec<DiscoveryResource>, ResourceStoreError>;

    /// Remove soft-deleted records whose `deleted_at` is before `cutoff`.
    /// Returns the number of purged records.
    async fn purge_deleted_before(
        &self,
        cutoff: UnixTimestamp,
    ) -> Result<u64, ResourceStoreError>;
}

/// Reference in-memory [`ResourceStore`], used in tests and storeless deployments
/// that still want same-process listings.
#[derive(Default)]
pub struct InMemoryResourceStore {
    records: tokio::sync::Mutex<HashMap<String, DiscoveryResource>>,
}

#[async_trait::async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get_by_resource(
        &self,
        resource: &Url,
    ) -> Result<Option<DiscoveryResource>, ResourceStoreError> {
        let records = self.records.lock().await;
        Ok(records.get(resource.as_str()).cloned())
    }

    async fn upsert(&self, record: DiscoveryResource) -> Result<(), ResourceStoreError> {
        let mut records = self.records.lock().await;
        records.insert(record.resource.as_str().to_string(), record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DiscoveryResource>, ResourceStoreError> {
        let records = self.records.lock().await;
        Ok(records.values().cloned().collect())
    }

    async fn purge_deleted_before(
        &self,
        cutoff: UnixTimestamp,
    ) -> Result<u64, ResourceStoreError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| {
            record
                .deleted_at
                .map(|deleted_at| deleted_at >= cutoff)
                .unwrap_or(true)
        });
        Ok((before - records.len()) as u64)
    }
}

/// Query filters for [`DiscoveryRegistry::list`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilters {
    /// Exact match on the record type (e.g. `http`).
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    /// JSON object; every key must be present in the record's metadata with an
    /// equal value.
    pub metadata: Option<serde_json::Value>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryListResponse {
    pub x402_version: X402Version,
    pub items: Vec<DiscoveryResource>,
    pub pagination: Pagination,
}

/// Resource catalog with debounced upsert, TTL-based visibility, and URL
/// screening.
pub struct DiscoveryRegistry {
    store: Option<Arc<dyn ResourceStore>>,
    allow_localhost: bool,
}

impl DiscoveryRegistry {
    pub fn new(store: Option<Arc<dyn ResourceStore>>, allow_localhost: bool) -> Self {
        Self {
            store,
            allow_localhost,
        }
    }

    /// Record a resource after a successful settlement.
    ///
    /// Never fails the caller: all errors are logged and swallowed.
    pub async fn register(&self, requirements: &PaymentRequirements) {
        let Some(store) = &self.store else {
            return;
        };
        if !resource_url_allowed(&requirements.resource, self.allow_localhost) {
            tracing::debug!(
                resource = %requirements.resource,
                "discovery registration skipped: resource URL not allowed"
            );
            return;
        }

        let now = UnixTimestamp::now();
        let existing = match store.get_by_resource(&requirements.resource).await {
            Ok(existing) => existing,
            Err(error) => {
                tracing::warn!(error = %error, "discovery lookup failed");
                return;
            }
        };

        let record = match existing {
            None => DiscoveryResource {
                id: Uuid::new_v4().to_string(),
                resource: requirements.resource.clone(),
                resource_type: "http".to_string(),
                x402_version: X402Version::V1,
                accepts: vec![requirements.clone()],
                last_updated: now,
                metadata: serde_json::json!({}),
                deleted_at: None,
                created_at: now,
                updated_at: now,
            },
            Some(mut record) => {
                let matching = record.accepts.iter().position(|entry| {
                    entry.pay_to == requirements.pay_to
                        && entry.asset == requirements.asset
                        && entry.network == requirements.network
                });
                let should_update = match matching {
                    // New (payTo, asset, network) triple.
                    None => true,
                    Some(index) => {
                        // payTo/asset/network already match (they are the key);
                        // the remaining critical fields bypass the debounce.
                        let entry = &record.accepts[index];
                        let critical_changed = entry.scheme != requirements.scheme
                            || entry.max_amount_required != requirements.max_amount_required;
                        critical_changed
                            || now.secs_since(record.last_updated) >= DEBOUNCE_SECS
                    }
                };
                if !should_update {
                    tracing::trace!(
                        resource = %requirements.resource,
                        "discovery registration debounced"
                    );
                    return;
                }
                match matching {
                    Some(index) => record.accepts[index] = requirements.clone(),
                    None => record.accepts.push(requirements.clone()),
                }
                record.last_updated = now;
                record.updated_at = now;
                record.deleted_at = None;
                record
            }
        };

        if let Err(error) = store.upsert(record).await {
            tracing::warn!(error = %error, "discovery upsert failed");
        }
    }

    /// Visible resources ordered by recency, paginated.
    pub async fn list(&self, filters: &ListFilters) -> DiscoveryListResponse {
        let limit = filters
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let offset = filters.offset.unwrap_or(0);

        let Some(store) = &self.store else {
            return DiscoveryListResponse {
                x402_version: X402Version::V1,
                items: Vec::new(),
                pagination: Pagination {
                    limit,
                    offset,
                    total: 0,
                },
            };
        };

        let records = match store.list().await {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(error = %error, "discovery list failed");
                Vec::new()
            }
        };

        let now = UnixTimestamp::now();
        let horizon = now - TTL_DAYS * 24 * 60 * 60;
        let mut visible: Vec<DiscoveryResource> = records
            .into_iter()
            .filter(|record| record.deleted_at.is_none() && record.last_updated >= horizon)
            .filter(|record| {
                filters
                    .resource_type
                    .as_ref()
                    .is_none_or(|wanted| record.resource_type == *wanted)
            })
            .filter(|record| metadata_matches(&record.metadata, filters.metadata.as_ref()))
            .filter(|record| resource_url_allowed(&record.resource, self.allow_localhost))
            .collect();
        visible.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));

        let total = visible.len() as u64;
        let items = visible
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        DiscoveryListResponse {
            x402_version: X402Version::V1,
            items,
            pagination: Pagination {
                limit,
                offset,
                total,
            },
        }
    }

    /// Purge records soft-deleted more than thirty days ago.
    pub async fn cleanup(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let cutoff = UnixTimestamp::now() - PURGE_AFTER_DAYS * 24 * 60 * 60;
        match store.purge_deleted_before(cutoff).await {
            Ok(purged) if purged > 0 => {
                tracing::info!(purged, "discovery cleanup removed deleted records");
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(error = %error, "discovery cleanup failed"),
        }
    }
}

fn metadata_matches(metadata: &serde_json::Value, wanted: Option<&serde_json::Value>) -> bool {
    let Some(wanted) = wanted else {
        return true;
    };
    let Some(wanted) = wanted.as_object() else {
        return true;
    };
    wanted
        .iter()
        .all(|(key, value)| metadata.get(key) == Some(value))
}

/// Whether a resource URL may enter or leave the catalog.
///
/// Production: HTTPS to public hosts only. Allow-localhost mode: additionally
/// HTTP, but only to loopback/private-range hosts. Plain HTTP to public hosts is
/// never accepted.
pub fn resource_url_allowed(url: &Url, allow_localhost: bool) -> bool {
    let private = match url.host() {
        None => return false,
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => is_private_ipv4(ip),
        Some(Host::Ipv6(ip)) => is_private_ipv6(ip),
    };
    match url.scheme() {
        "https" => allow_localhost || !private,
        "http" => allow_localhost && private,
        _ => false,
    }
}

fn is_private_ipv4(ip: std::net::Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_private_ipv6(ip: std::net::Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    // fe80::/10 link-local and fc00::/7 unique-local.
    let first = ip.segments()[0];
    (first & 0xffc0) == 0xfe80 || (first & 0xfe00) == 0xfc00
}
