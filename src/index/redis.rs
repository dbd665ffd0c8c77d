// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! RediSearch index gateway.
//!
//! Each indexed entity is one RedisJSON document:
//! ```json
//! { "kind": "item", "id": 7, "payload": {"title": "Oak table", "price": 120.0} }
//! ```
//! stored under `{prefix}{kind}:{id}` and covered by the per-type index
//! created with `FT.CREATE {prefix}idx:{kind} ON JSON PREFIX 1 {prefix}{kind}: ...`.
//!
//! Queries run `FT.SEARCH ... NOCONTENT LIMIT offset num`, which returns the
//! total match count followed by the matching keys in relevance order.
//!
//! A gateway built with [`RediSearchIndex::lazy`] holds no connection yet.
//! Every call tries to establish one and reports `Unavailable` until Redis
//! answers; after that the connection manager reconnects on its own.

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{cmd, AsyncCommands, Client, RedisError};
use serde_json::json;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::entity::EntityId;
use crate::metrics;
use crate::registry::{FieldSnapshot, IndexableType};
use crate::resilience::retry::{retry, retry_when, RetryConfig};
use super::traits::{IndexError, IndexGateway, IndexHit};

pub struct RediSearchIndex {
    client: Client,
    /// Set by `connect`, or on first successful use of a lazy gateway
    connection: OnceCell<ConnectionManager>,
    /// Optional key prefix for namespacing (e.g., "catalog:" → "catalog:item:7")
    prefix: String,
    retry: RetryConfig,
}

impl RediSearchIndex {
    /// Connect to Redis Stack.
    ///
    /// `attempts` is the per-call budget for index operations once connected.
    pub async fn connect(url: &str, prefix: Option<&str>, attempts: usize) -> Result<Self, IndexError> {
        let index = Self::lazy(url, prefix, attempts)?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || {
            ConnectionManager::new_with_config(index.client.clone(), manager_config())
        })
        .await
        .map_err(|e| {
            metrics::record_connection_error("redis");
            IndexError::Unavailable(e.to_string())
        })?;

        metrics::set_backend_healthy("redis", true);
        info!(url = %url, "Connected to RediSearch");

        Ok(Self {
            connection: OnceCell::new_with(Some(connection)),
            ..index
        })
    }

    /// Gateway that connects on first use instead of at construction.
    ///
    /// Only a malformed URL fails here.
    pub fn lazy(url: &str, prefix: Option<&str>, attempts: usize) -> Result<Self, IndexError> {
        let client = Client::open(url).map_err(|e| IndexError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            prefix: prefix.unwrap_or("").to_string(),
            retry: RetryConfig::query().with_max_attempts(attempts),
        })
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    async fn connection(&self) -> Result<ConnectionManager, IndexError> {
        self.connection
            .get_or_try_init(|| async {
                let connection = ConnectionManager::new_with_config(self.client.clone(), manager_config())
                    .await
                    .map_err(|e| {
                        metrics::record_connection_error("redis");
                        metrics::set_backend_healthy("redis", false);
                        IndexError::Unavailable(e.to_string())
                    })?;
                metrics::set_backend_healthy("redis", true);
                info!("RediSearch reachable, connection established");
                Ok::<_, IndexError>(connection)
            })
            .await
            .cloned()
    }

    fn doc_key(&self, kind: &str, id: EntityId) -> String {
        format!("{}{}:{}", self.prefix, kind, id)
    }

    fn index_name(&self, kind: &str) -> String {
        format!("{}idx:{}", self.prefix, kind)
    }

    fn id_from_key(&self, kind: &str, key: &str) -> Option<EntityId> {
        key.strip_prefix(&self.prefix)?
            .strip_prefix(kind)?
            .strip_prefix(':')?
            .parse()
            .ok()
    }

    fn map_error(kind: &str, err: RedisError) -> IndexError {
        if is_transient(&err) {
            metrics::set_backend_healthy("redis", false);
            return IndexError::Unavailable(err.to_string());
        }
        let message = err.to_string();
        if is_unknown_index(&message) {
            IndexError::UnknownNamespace(kind.to_string())
        } else {
            IndexError::Backend(message)
        }
    }
}

/// One quick connection attempt per call; retries belong to `retry_when`.
fn manager_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_secs(2))
}

/// Connection trouble worth another attempt; server replies are final.
fn is_transient(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout()
}

fn is_unknown_index(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("unknown index name") || lower.contains("no such index")
}

/// Escape RediSearch query syntax, keeping spaces so terms stay separate.
///
/// `*` on its own is passed through as the match-all query.
pub fn escape_expression(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed == "*" {
        return trimmed.to_string();
    }
    let mut escaped = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            '@' | ':' | '|' | '(' | ')' | '[' | ']' | '{' | '}' | '*' | '%' | '-' | '+' | '~' | '"'
            | '\'' | '$' | '!' | ';' | ',' | '.' | '<' | '>' | '=' | '^' | '/' | '&' | '#' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

#[async_trait]
impl IndexGateway for RediSearchIndex {
    async fn upsert(&self, kind: &str, id: EntityId, fields: &FieldSnapshot) -> Result<(), IndexError> {
        let key = self.doc_key(kind, id);
        let doc = json!({ "kind": kind, "id": id, "payload": fields }).to_string();
        let conn = self.connection().await?;

        retry_when("redis_json_set", &self.retry, is_transient, || {
            let mut conn = conn.clone();
            let key = key.clone();
            let doc = doc.clone();
            async move {
                // JSON.SET key $ <json>
                let _: () = cmd("JSON.SET")
                    .arg(&key)
                    .arg("$")
                    .arg(&doc)
                    .query_async(&mut conn)
                    .await?;
                Ok(())
            }
        })
        .await
        .map_err(|e: RedisError| Self::map_error(kind, e))
    }

    async fn remove(&self, kind: &str, id: EntityId) -> Result<(), IndexError> {
        let key = self.doc_key(kind, id);
        let conn = self.connection().await?;

        retry_when("redis_delete", &self.retry, is_transient, || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                // DEL of a missing key returns 0, which is fine
                let _: i64 = conn.del(&key).await?;
                Ok(())
            }
        })
        .await
        .map_err(|e: RedisError| Self::map_error(kind, e))
    }

    async fn query(
        &self,
        kind: &str,
        expression: &str,
        page: u32,
        per_page: u32,
    ) -> Result<IndexHit, IndexError> {
        let index = self.index_name(kind);
        let query = escape_expression(expression);
        let offset = u64::from(page.max(1) - 1) * u64::from(per_page);
        let conn = self.connection().await?;
        debug!(index = %index, query = %query, offset, per_page, "FT.SEARCH");
        let _timer = metrics::LatencyTimer::new("redisearch", "ft_search");

        let reply: Vec<redis::Value> = retry_when("redis_ft_search", &self.retry, is_transient, || {
            let mut conn = conn.clone();
            let index = index.clone();
            let query = query.clone();
            async move {
                cmd("FT.SEARCH")
                    .arg(&index)
                    .arg(&query)
                    .arg("NOCONTENT")
                    .arg("LIMIT")
                    .arg(offset)
                    .arg(per_page)
                    .query_async(&mut conn)
                    .await
            }
        })
        .await
        .map_err(|e: RedisError| Self::map_error(kind, e))?;

        let Some((head, keys)) = reply.split_first() else {
            return Err(IndexError::Backend("empty FT.SEARCH reply".into()));
        };
        let total: u64 = redis::from_redis_value(head)
            .map_err(|e| IndexError::Backend(format!("bad FT.SEARCH total: {}", e)))?;

        let mut ids = Vec::with_capacity(keys.len());
        for value in keys {
            let key: String = redis::from_redis_value(value)
                .map_err(|e| IndexError::Backend(format!("bad FT.SEARCH key: {}", e)))?;
            match self.id_from_key(kind, &key) {
                Some(id) => ids.push(id),
                None => warn!(key = %key, kind = %kind, "Skipping index key with no entity id"),
            }
        }

        Ok(IndexHit::new(ids, total))
    }

    async fn ensure_namespace(&self, indexable: &IndexableType) -> Result<(), IndexError> {
        let prefix = (!self.prefix.is_empty()).then_some(self.prefix.as_str());
        let args = indexable.to_ft_create_args(prefix);
        let conn = self.connection().await?;

        let result = retry_when("redis_ft_create", &self.retry, is_transient, || {
            let mut conn = conn.clone();
            let args = args.clone();
            async move {
                let _: () = cmd("FT.CREATE").arg(&args).query_async(&mut conn).await?;
                Ok(())
            }
        })
        .await;

        match result {
            Ok(()) => {
                metrics::record_index_operation("create", true);
                info!(index = %args[0], "Search index created");
                Ok(())
            }
            Err(e) if e.to_string().contains("Index already exists") => {
                debug!(index = %args[0], "Search index already exists");
                Ok(())
            }
            Err(e) => {
                metrics::record_index_operation("create", false);
                Err(Self::map_error(&indexable.name, e))
            }
        }
    }

    async fn clear(&self, indexable: &IndexableType) -> Result<(), IndexError> {
        let index = self.index_name(&indexable.name);
        let conn = self.connection().await?;

        // DD also deletes the documents the index covers
        let dropped = retry_when("redis_ft_dropindex", &self.retry, is_transient, || {
            let mut conn = conn.clone();
            let index = index.clone();
            async move {
                let _: () = cmd("FT.DROPINDEX").arg(&index).arg("DD").query_async(&mut conn).await?;
                Ok(())
            }
        })
        .await;

        match dropped {
            Ok(()) => metrics::record_index_operation("clear", true),
            Err(e) if is_unknown_index(&e.to_string()) => {
                debug!(index = %index, "Nothing to clear, index did not exist");
            }
            Err(e) => {
                metrics::record_index_operation("clear", false);
                return Err(Self::map_error(&indexable.name, e));
            }
        }

        self.ensure_namespace(indexable).await
    }
}
