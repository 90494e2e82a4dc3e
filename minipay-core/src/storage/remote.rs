//! Remote durable store speaking the PostgREST dialect (as exposed by Supabase).
//!
//! Every table is addressed as `{base_url}/rest/v1/{table}` and rows are
//! selected with `{key_column}=eq.{key}`. Upserts rely on
//! `Prefer: resolution=merge-duplicates` against the key column; plain inserts
//! surface a unique-key violation as HTTP 409.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;

use super::error::{StoreError, StoreResult};
use super::traits::{DurableStore, InsertOutcome};
use super::Table;
use crate::config::DurableBackendConfig;
use crate::error::{MiniPayResult, ValidationKind};
use crate::http_request::Request;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RETRIES: u32 = 3; // total attempts = 4

/// HTTP client for the remote durable store.
pub struct RemoteDurableStore {
    base_url: String,
    api_key: String,
    request: Request,
}

impl RemoteDurableStore {
    /// Creates a client for a configured backend.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the backend is not fully configured
    /// (https URL, real API key).
    pub fn new(config: &DurableBackendConfig) -> MiniPayResult<Self> {
        if !config.is_configured() {
            return Err(ValidationKind::Config(
                "durable backend requires an https url and an api key".to_string(),
            )
            .into());
        }
        Ok(Self::with_base_url(&config.url, &config.api_key))
    }

    /// Creates a client without configuration checks (plain-http test servers).
    #[must_use]
    pub fn with_base_url(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            request: Request::new(DEFAULT_TIMEOUT, DEFAULT_MAX_RETRIES),
        }
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn fetch_rows(&self, builder: RequestBuilder) -> StoreResult<Vec<Value>> {
        let response = self.request.handle(self.authorize(builder)).await?;
        let response = ensure_success(response).await?;
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|err| StoreError::Serialization(format!("invalid rows: {err}")))
    }
}

async fn ensure_success(response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unknown error"));
    Err(StoreError::Rejected(format!(
        "{url} (status {}): {body}",
        status.as_u16()
    )))
}

fn with_key(table: Table, key: &str, record: Value) -> Value {
    match record {
        Value::Object(mut fields) => {
            fields.insert(table.key_column().to_string(), Value::String(key.to_string()));
            Value::Object(fields)
        }
        other => other,
    }
}

#[async_trait]
impl DurableStore for RemoteDurableStore {
    async fn get(&self, table: Table, key: &str) -> StoreResult<Option<Value>> {
        let builder = self.request.get(&self.table_url(table)).query(&[
            (table.key_column(), format!("eq.{key}")),
            ("select", "*".to_string()),
            ("limit", "1".to_string()),
        ]);
        Ok(self.fetch_rows(builder).await?.into_iter().next())
    }

    async fn upsert(&self, table: Table, key: &str, record: Value) -> StoreResult<()> {
        let builder = self
            .request
            .post(&self.table_url(table))
            .query(&[("on_conflict", table.key_column())])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&with_key(table, key, record));
        let response = self.request.handle(self.authorize(builder)).await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn insert_unique(
        &self,
        table: Table,
        key: &str,
        record: Value,
    ) -> StoreResult<InsertOutcome> {
        let builder = self
            .request
            .post(&self.table_url(table))
            .header("Prefer", "return=minimal")
            .json(&with_key(table, key, record));
        let response = self.request.handle(self.authorize(builder)).await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(InsertOutcome::AlreadyExists);
        }
        ensure_success(response).await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn delete(&self, table: Table, key: &str) -> StoreResult<()> {
        let builder = self
            .request
            .delete(&self.table_url(table))
            .query(&[(table.key_column(), format!("eq.{key}"))])
            .header("Prefer", "return=minimal");
        let response = self.request.handle(self.authorize(builder)).await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn any(&self, table: Table) -> StoreResult<bool> {
        let builder = self.request.get(&self.table_url(table)).query(&[
            ("select", table.key_column()),
            ("limit", "1"),
        ]);
        Ok(!self.fetch_rows(builder).await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn test_get_selects_by_key_column() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex("^/rest/v1/handles".to_string()))
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("handle".into(), "eq.alice".into()),
                Matcher::UrlEncoded("select".into(), "*".into()),
            ]))
            .match_header("apikey", "test-key")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_body(r#"[{"handle": "alice", "wallet_address": "GABC"}]"#)
            .create_async()
            .await;

        let store = RemoteDurableStore::with_base_url(&server.url(), "test-key");
        let row = store.get(Table::Handles, "alice").await.unwrap().unwrap();

        mock.assert_async().await;
        assert_eq!(row["wallet_address"], "GABC");
    }

    #[tokio::test]
    async fn test_get_without_rows_is_none() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex("^/rest/v1/encrypted_vaults".to_string()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let store = RemoteDurableStore::with_base_url(&server.url(), "test-key");
        assert!(store.get(Table::Vaults, "deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_merges_on_key_column() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex("^/rest/v1/encrypted_vaults".to_string()))
            .match_query(Matcher::UrlEncoded(
                "on_conflict".into(),
                "nullifier_hash".into(),
            ))
            .match_header(
                "prefer",
                Matcher::Regex("resolution=merge-duplicates".to_string()),
            )
            .match_body(Matcher::PartialJson(json!({
                "nullifier_hash": "abc",
                "ciphertext": "nonce.ct",
            })))
            .with_status(201)
            .create_async()
            .await;

        let store = RemoteDurableStore::with_base_url(&server.url(), "test-key");
        store
            .upsert(Table::Vaults, "abc", json!({"ciphertext": "nonce.ct"}))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_filters_by_key_column() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("DELETE", Matcher::Regex("^/rest/v1/handle_owners".to_string()))
            .match_query(Matcher::UrlEncoded(
                "wallet_address".into(),
                "eq.GABC".into(),
            ))
            .match_header("apikey", "test-key")
            .with_status(204)
            .create_async()
            .await;

        let store = RemoteDurableStore::with_base_url(&server.url(), "test-key");
        store.delete(Table::HandleOwners, "GABC").await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_insert_unique_maps_conflict() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", Matcher::Regex("^/rest/v1/handles".to_string()))
            .with_status(409)
            .with_body(r#"{"code": "23505", "message": "duplicate key value"}"#)
            .create_async()
            .await;

        let store = RemoteDurableStore::with_base_url(&server.url(), "test-key");
        let outcome = store
            .insert_unique(Table::Handles, "alice", json!({"wallet_address": "GABC"}))
            .await
            .unwrap();

        assert_eq!(outcome, InsertOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_client_error_is_rejected_not_unavailable() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex("^/rest/v1/identities".to_string()))
            .with_status(401)
            .with_body("invalid api key")
            .create_async()
            .await;

        let store = RemoteDurableStore::with_base_url(&server.url(), "bad-key");
        let err = store.get(Table::Identities, "abc").await.unwrap_err();

        assert!(matches!(err, StoreError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_unavailable() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Regex("^/rest/v1/identities".to_string()))
            .with_status(503)
            .expect(4)
            .create_async()
            .await;

        let store = RemoteDurableStore::with_base_url(&server.url(), "test-key");
        let err = store.any(Table::Identities).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn test_unconfigured_backend_is_refused() {
        let config = DurableBackendConfig {
            url: "http://localhost:54321".to_string(),
            api_key: "short".to_string(),
        };
        assert!(RemoteDurableStore::new(&config).is_err());
    }
}
