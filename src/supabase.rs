use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{error::DbError, query::TableQuery};

/// Row reads and named function calls against the hosted database.
#[async_trait]
pub trait Database: Send + Sync {
    async fn select(&self, query: &TableQuery) -> Result<Vec<Value>, DbError>;

    async fn rpc(&self, function: &str, args: Map<String, Value>) -> Result<Value, DbError>;
}

/// PostgREST client for a Supabase project, authenticated with the
/// service-role key.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    http: Client,
}

impl SupabaseClient {
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> reqwest::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            http,
        })
    }

    async fn read_json(&self, target: &str, response: Response) -> Result<Value, DbError> {
        let status = response.status();
        let body = response.text().await.map_err(|source| DbError::Transport {
            target: target.to_string(),
            source,
        })?;

        if !status.is_success() {
            return Err(DbError::Remote {
                status: status.as_u16(),
                target: target.to_string(),
                message: remote_message(&body),
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|source| DbError::Decode {
            target: target.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Database for SupabaseClient {
    async fn select(&self, query: &TableQuery) -> Result<Vec<Value>, DbError> {
        let url = format!("{}/rest/v1/{}", self.base_url, query.table);
        debug!(table = %query.table, offset = ?query.offset, limit = ?query.limit, "PostgREST select");

        let response = self
            .http
            .get(&url)
            .query(&query.to_query_pairs())
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .send()
            .await
            .map_err(|source| DbError::Transport {
                target: query.table.clone(),
                source,
            })?;

        match self.read_json(&query.table, response).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }

    async fn rpc(&self, function: &str, args: Map<String, Value>) -> Result<Value, DbError> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, function);
        debug!(function, "PostgREST rpc");

        let response = self
            .http
            .post(&url)
            .json(&args)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .send()
            .await
            .map_err(|source| DbError::Transport {
                target: function.to_string(),
                source,
            })?;

        self.read_json(function, response).await
    }
}

/// PostgREST errors carry a JSON `message`; anything else is passed through.
fn remote_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

pub fn decode_rows<T: DeserializeOwned>(target: &str, rows: Vec<Value>) -> Result<Vec<T>, DbError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|source| DbError::Decode {
                target: target.to_string(),
                source,
            })
        })
        .collect()
}

/// Set-returning functions answer with an array; `null` means no rows.
pub fn decode_rpc_rows<T: DeserializeOwned>(target: &str, value: Value) -> Result<Vec<T>, DbError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(rows) => decode_rows(target, rows),
        other => decode_rows(target, vec![other]),
    }
}


#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Named {
        id: i64,
        name: String,
    }

    #[test]
    fn remote_message_prefers_postgrest_message() {
        assert_eq!(
            remote_message(r#"{"message":"function not found","code":"42883"}"#),
            "function not found"
        );
        assert_eq!(remote_message("  bad gateway "), "bad gateway");
    }

    #[test]
    fn rpc_rows_decode_null_array_and_object() {
        let none: Vec<Named> = decode_rpc_rows("f", Value::Null).expect("null");
        assert!(none.is_empty());

        let many: Vec<Named> =
            decode_rpc_rows("f", json!([{ "id": 1, "name": "a" }])).expect("array");
        assert_eq!(many, vec![Named { id: 1, name: "a".into() }]);

        let one: Vec<Named> = decode_rpc_rows("f", json!({ "id": 2, "name": "b" })).expect("obj");
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn decode_rows_reports_target_on_failure() {
        let err = decode_rows::<Named>("exporters", vec![json!({ "id": "x" })]).unwrap_err();
        assert!(err.to_string().contains("exporters"));
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = SupabaseClient::new("https://x.supabase.co/", "key", Duration::from_secs(5))
            .expect("client");
        assert_eq!(client.base_url, "https://x.supabase.co");
    }
}
