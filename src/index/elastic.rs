//! Elasticsearch client over the REST API.
//!
//! Bulk bodies are newline-delimited JSON; every request that fails below the HTTP layer is
//! classified by [`IndexerError::from_http`].

use std::fmt::Write as _;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::{Value, json};

use super::client::{
    AliasAction, BulkDocument, BulkOutcome, IndexClient, IndexSettings, ScriptedUpdate,
    UpdateScript,
};
use crate::constants::{BULK_UPDATE_TIMEOUT, BULK_WRITE_TIMEOUT, REQUEST_TIMEOUT};
use crate::error::{IndexerError, Result};

const NDJSON: &str = "application/x-ndjson";

#[derive(Debug, Clone)]
pub struct ElasticClient {
    base: String,
    http: Client,
}

impl ElasticClient {
    /// Client for the cluster at `host`, e.g. `http://localhost:9200`.
    pub fn new(host: &str) -> Result<Self> {
        let base = host.trim().trim_end_matches('/').to_string();
        if base.is_empty() {
            return Err(IndexerError::Config("search engine host is empty".into()));
        }
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| IndexerError::Http(err.to_string()))?;
        Ok(Self { base, http })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn send(&self, index: &str, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .map_err(|err| IndexerError::from_http(index, &err))
    }

    fn bulk(&self, index: &str, body: String, timeout: Duration) -> Result<BulkOutcome> {
        let request = self
            .http
            .post(self.url(&format!("{index}/_bulk")))
            .header(reqwest::header::CONTENT_TYPE, NDJSON)
            .timeout(timeout)
            .body(body);
        let response = self.send(index, request)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(IndexerError::Bulk {
                index: index.to_string(),
                reason: format!("{status}: {}", truncate(&text, 512)),
            });
        }
        let text = response
            .text()
            .map_err(|err| IndexerError::from_http(index, &err))?;
        Ok(bulk_outcome(&serde_json::from_str(&text)?))
    }
}

/// Body of a successful response; anything else becomes an error carrying the engine's text.
fn expect_success(index: &str, response: Response) -> Result<Value> {
    let status = response.status();
    let text = response
        .text()
        .map_err(|err| IndexerError::from_http(index, &err))?;
    if !status.is_success() {
        return Err(IndexerError::Http(format!(
            "{index}: {status}: {}",
            truncate(&text, 512)
        )));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Count per-item results in a `_bulk` response.
fn bulk_outcome(response: &Value) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for item in items {
        let Some(result) = item.as_object().and_then(|op| op.values().next()) else {
            continue;
        };
        let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
        if (200..300).contains(&status) {
            outcome.succeeded += 1;
        } else {
            let reason = result
                .get("error")
                .and_then(|error| error.get("reason"))
                .and_then(Value::as_str)
                .unwrap_or("unknown bulk item failure");
            outcome.record_failure(format!("status {status}: {reason}"));
        }
    }
    outcome
}

fn write_line(body: &mut String, value: &Value) {
    // Writing into a String cannot fail.
    let _ = writeln!(body, "{value}");
}

pub(crate) fn bulk_write_body(docs: &[BulkDocument]) -> String {
    let mut body = String::new();
    for doc in docs {
        write_line(&mut body, &json!({ "index": { "_id": doc.id } }));
        write_line(&mut body, &doc.body);
    }
    body
}

pub(crate) fn bulk_update_body(script: UpdateScript, updates: &[ScriptedUpdate]) -> String {
    let mut body = String::new();
    for update in updates {
        write_line(
            &mut body,
            &json!({ "update": { "_id": update.id, "retry_on_conflict": 3 } }),
        );
        write_line(
            &mut body,
            &json!({
                "script": {
                    "source": script.painless(),
                    "lang": "painless",
                    "params": update.params,
                }
            }),
        );
    }
    body
}

pub(crate) fn index_body(settings: &IndexSettings) -> Value {
    json!({
        "settings": { "index": { "max_result_window": settings.max_result_window } },
        "mappings": { "date_detection": settings.date_detection },
    })
}

pub(crate) fn alias_actions_body(actions: &[AliasAction]) -> Value {
    let actions: Vec<Value> = actions
        .iter()
        .map(|action| match action {
            AliasAction::Add { index, alias } => {
                json!({ "add": { "index": index, "alias": alias } })
            }
            AliasAction::Remove { index, alias } => {
                json!({ "remove": { "index": index, "alias": alias } })
            }
        })
        .collect();
    json!({ "actions": actions })
}

impl IndexClient for ElasticClient {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    fn create_index(&self, name: &str, settings: &IndexSettings) -> Result<()> {
        let request = self.http.put(self.url(name)).json(&index_body(settings));
        let response = self.send(name, request)?;
        expect_success(name, response)
            .map_err(|err| IndexerError::Lifecycle(format!("creating {name}: {err}")))?;
        Ok(())
    }

    fn bulk_write(&self, index: &str, docs: &[BulkDocument]) -> Result<BulkOutcome> {
        if docs.is_empty() {
            return Ok(BulkOutcome::default());
        }
        self.bulk(index, bulk_write_body(docs), BULK_WRITE_TIMEOUT)
    }

    fn bulk_update(
        &self,
        index: &str,
        script: UpdateScript,
        updates: &[ScriptedUpdate],
    ) -> Result<BulkOutcome> {
        if updates.is_empty() {
            return Ok(BulkOutcome::default());
        }
        self.bulk(index, bulk_update_body(script, updates), BULK_UPDATE_TIMEOUT)
    }

    fn refresh(&self, index: &str) -> Result<()> {
        let request = self.http.post(self.url(&format!("{index}/_refresh")));
        let response = self.send(index, request)?;
        expect_success(index, response)?;
        Ok(())
    }

    fn list_aliases(&self, pattern: &str) -> Result<Vec<(String, String)>> {
        let request = self.http.get(self.url(&format!("_alias/{pattern}")));
        let response = self.send(pattern, request)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body = expect_success(pattern, response)?;
        let mut bindings = Vec::new();
        if let Some(indices) = body.as_object() {
            for (index, entry) in indices {
                if let Some(aliases) = entry.get("aliases").and_then(Value::as_object) {
                    bindings.extend(aliases.keys().map(|alias| (index.clone(), alias.clone())));
                }
            }
        }
        Ok(bindings)
    }

    fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }
        let request = self
            .http
            .post(self.url("_aliases"))
            .json(&alias_actions_body(actions));
        let response = self.send("_aliases", request)?;
        let body = expect_success("_aliases", response)
            .map_err(|err| IndexerError::Lifecycle(err.to_string()))?;
        if body.get("acknowledged").and_then(Value::as_bool) != Some(true) {
            return Err(IndexerError::Lifecycle(
                "alias update was not acknowledged".to_string(),
            ));
        }
        Ok(())
    }

    fn list_indices(&self, pattern: &str) -> Result<Vec<String>> {
        let request = self
            .http
            .get(self.url(&format!("_cat/indices/{pattern}")))
            .query(&[("format", "json"), ("h", "index")]);
        let response = self.send(pattern, request)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body = expect_success(pattern, response)?;
        let mut names: Vec<String> = body
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|row| row.get("index").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    fn delete_index(&self, name: &str) -> Result<()> {
        let request = self.http.delete(self.url(name));
        let response = self.send(name, request)?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(target = "lifecourse::index", index = name, "index already gone");
            return Ok(());
        }
        expect_success(name, response)?;
        Ok(())
    }

    fn create_snapshot_repository(&self, repository: &str, bucket: &str) -> Result<()> {
        let request = self
            .http
            .put(self.url(&format!("_snapshot/{repository}")))
            .json(&json!({ "type": "s3", "settings": { "bucket": bucket } }));
        let response = self.send(repository, request)?;
        let body = expect_success(repository, response)
            .map_err(|err| IndexerError::Lifecycle(err.to_string()))?;
        if body.get("acknowledged").and_then(Value::as_bool) != Some(true) {
            return Err(IndexerError::Lifecycle(format!(
                "snapshot repository {repository} was not acknowledged"
            )));
        }
        Ok(())
    }

    fn create_snapshot(&self, repository: &str, snapshot: &str, indices: &[String]) -> Result<()> {
        let request = self
            .http
            .put(self.url(&format!("_snapshot/{repository}/{snapshot}")))
            .json(&json!({
                "indices": indices.join(","),
                "include_global_state": false,
            }));
        let response = self.send(repository, request)?;
        let body = expect_success(repository, response)
            .map_err(|err| IndexerError::Lifecycle(err.to_string()))?;
        if body.get("accepted").and_then(Value::as_bool) != Some(true)
            && body.get("snapshot").is_none()
        {
            return Err(IndexerError::Lifecycle(format!(
                "snapshot {snapshot} was not accepted"
            )));
        }
        Ok(())
    }

    fn get_document(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let request = self.http.get(self.url(&format!("{index}/_doc/{id}")));
        let response = self.send(index, request)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = expect_success(index, response)?;
        Ok(body.get("_source").cloned())
    }
}
