//! HTTP-backed record stores
//!
//! Loads per-domain endpoint definitions from a JSON file and implements
//! [`RecordStore`] by calling them with template substitution.
//!
//! ```json
//! {
//!   "stores": [{
//!     "domain": "task",
//!     "endpoints": {
//!       "find":   { "url": "${NOTES_API}/tasks", "query": { "q": "{{query}}", "limit": "{{limit}}" },
//!                   "response_path": "$.results" },
//!       "update": { "url": "${NOTES_API}/tasks/{{id}}", "method": "PATCH", "body": "{{patch}}" }
//!     }
//!   }]
//! }
//! ```
//!
//! A body string that is exactly one `{{name}}` placeholder is replaced by the
//! raw JSON value, so `"{{fields}}"` sends the whole creation map.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::MutationError;
use crate::ports::{ListFilter, RecordStore, Stores};
use crate::types::{Domain, Record};

// ============================================================================
// Configuration
// ============================================================================

/// Root of the stores file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpStoresConfig {
    pub stores: Vec<StoreDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDef {
    pub domain: Domain,
    pub endpoints: HashMap<Operation, EndpointConfig>,
}

/// Store operations an endpoint can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    List,
    Find,
    Get,
    Create,
    Update,
    Archive,
    MarkDone,
    MoveToDeprecated,
    AppendDescription,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Find => "find",
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Archive => "archive",
            Operation::MarkDone => "mark_done",
            Operation::MoveToDeprecated => "move_to_deprecated",
            Operation::AppendDescription => "append_description",
        }
    }
}

/// HTTP endpoint of one operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// URL template (supports {{arg}} and ${ENV} substitution)
    pub url: String,

    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub query: HashMap<String, String>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request body template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Where the record (or record list) sits in the response, e.g. "$.data.items"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_path: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> u64 {
    30
}

// ============================================================================
// Template Substitution
// ============================================================================

fn arg_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("Invalid regex"))
}

fn env_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{(\w+)\}").expect("Invalid regex"))
}

fn arg_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => value.to_string(),
    }
}

/// Substitute {{arg}} placeholders, optionally URL-encoding the values
fn substitute_args(template: &str, args: &Value, encode: bool) -> Result<String> {
    let mut result = template.to_string();
    for cap in arg_regex().captures_iter(template) {
        let full_match = &cap[0];
        let arg_name = &cap[1];
        let value = args
            .get(arg_name)
            .ok_or_else(|| anyhow!("Missing required argument: {}", arg_name))?;
        let replacement = arg_to_string(value);
        let replacement = if encode {
            urlencoding::encode(&replacement).into_owned()
        } else {
            replacement
        };
        result = result.replace(full_match, &replacement);
    }
    Ok(result)
}

/// Substitute ${ENV_VAR} placeholders from the environment
fn substitute_env(template: &str) -> Result<String> {
    let mut result = template.to_string();
    for cap in env_regex().captures_iter(template) {
        let full_match = &cap[0];
        let var_name = &cap[1];
        let value = env::var(var_name)
            .with_context(|| format!("Missing environment variable: {}", var_name))?;
        result = result.replace(full_match, &value);
    }
    Ok(result)
}

fn substitute_template(template: &str, args: &Value, encode: bool) -> Result<String> {
    let after_args = substitute_args(template, args, encode)?;
    substitute_env(&after_args)
}

fn substitute_map(map: &HashMap<String, String>, args: &Value) -> Result<HashMap<String, String>> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), substitute_template(v, args, false)?)))
        .collect()
}

/// Substitute templates in a JSON body. A string that is exactly one
/// placeholder takes the argument's raw JSON value.
fn substitute_value(value: &Value, args: &Value) -> Result<Value> {
    match value {
        Value::String(s) => {
            if let Some(cap) = arg_regex().captures(s) {
                if cap[0].len() == s.len() {
                    return args
                        .get(&cap[1])
                        .cloned()
                        .ok_or_else(|| anyhow!("Missing required argument: {}", &cap[1]));
                }
            }
            Ok(Value::String(substitute_template(s, args, false)?))
        }
        Value::Array(arr) => {
            let substituted: Result<Vec<Value>> = arr.iter().map(|v| substitute_value(v, args)).collect();
            Ok(Value::Array(substituted?))
        }
        Value::Object(obj) => {
            let substituted: Result<Map<String, Value>> = obj
                .iter()
                .map(|(k, v)| Ok((k.clone(), substitute_value(v, args)?)))
                .collect();
            Ok(Value::Object(substituted?))
        }
        other => Ok(other.clone()),
    }
}

// ============================================================================
// Simple JSONPath Extraction
// ============================================================================

/// Extract a value using a simple JSONPath-like expression.
/// Supports: $.field, $.field.subfield, $.array[0], $.array[0].field
fn extract_json_path<'a>(value: &'a Value, path: &str) -> Result<&'a Value> {
    let path = path.strip_prefix('$').unwrap_or(path);
    let path = path.strip_prefix('.').unwrap_or(path);
    if path.is_empty() {
        return Ok(value);
    }

    let mut current = value;
    for segment in path.split('.') {
        if let Some(bracket_pos) = segment.find('[') {
            let field = &segment[..bracket_pos];
            let index_str = segment[bracket_pos + 1..]
                .strip_suffix(']')
                .ok_or_else(|| anyhow!("Invalid array index syntax: {}", segment))?;
            let index: usize = index_str
                .parse()
                .with_context(|| format!("Invalid array index: {}", index_str))?;
            if !field.is_empty() {
                current = current
                    .get(field)
                    .ok_or_else(|| anyhow!("Field not found: {}", field))?;
            }
            current = current
                .get(index)
                .ok_or_else(|| anyhow!("Array index out of bounds: {}", index))?;
        } else {
            current = current
                .get(segment)
                .ok_or_else(|| anyhow!("Field not found: {}", segment))?;
        }
    }
    Ok(current)
}

// ============================================================================
// Store
// ============================================================================

/// One domain's record store over HTTP
pub struct HttpRecordStore {
    domain: Domain,
    client: Client,
    endpoints: HashMap<Operation, EndpointConfig>,
}

impl HttpRecordStore {
    pub fn new(def: StoreDef, client: Client) -> Self {
        Self {
            domain: def.domain,
            client,
            endpoints: def.endpoints,
        }
    }

    fn error(&self, operation: Operation, message: impl Into<String>) -> MutationError {
        MutationError::new(operation.as_str(), self.domain, message)
    }

    /// Call the endpoint of `operation` and return the JSON at its response path
    async fn call(&self, operation: Operation, args: &Value) -> Result<Value, MutationError> {
        let endpoint = self
            .endpoints
            .get(&operation)
            .ok_or_else(|| self.error(operation, "no endpoint configured"))?;
        let request = self
            .build_request(endpoint, args)
            .map_err(|e| self.error(operation, format!("{:#}", e)))?;

        debug!(domain = %self.domain, operation = operation.as_str(), "store request");
        let response = request
            .send()
            .await
            .map_err(|e| self.error(operation, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| self.error(operation, format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(self.status_error(operation, status.as_u16(), &body, request_id));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| self.error(operation, format!("Response is not valid JSON: {}", e)))?;
        match &endpoint.response_path {
            Some(path) => extract_json_path(&json, path)
                .cloned()
                .map_err(|e| self.error(operation, format!("{:#}", e))),
            None => Ok(json),
        }
    }

    fn build_request(&self, endpoint: &EndpointConfig, args: &Value) -> Result<reqwest::RequestBuilder> {
        let url = substitute_template(&endpoint.url, args, true)?;
        let query_params = substitute_map(&endpoint.query, args)?;
        let headers = substitute_map(&endpoint.headers, args)?;

        let method = endpoint.method.to_uppercase();
        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            "PATCH" => self.client.patch(&url),
            _ => return Err(anyhow!("Unsupported HTTP method: {}", method)),
        };

        request = request.timeout(Duration::from_secs(endpoint.timeout_secs));
        if !query_params.is_empty() {
            request = request.query(&query_params);
        }
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(ref body_template) = endpoint.body {
            request = request.json(&substitute_value(body_template, args)?);
        }
        Ok(request)
    }

    /// Pull `code`/`message` out of an error body when it is JSON
    fn status_error(&self, operation: Operation, status: u16, body: &str, request_id: Option<String>) -> MutationError {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let detail = parsed.as_ref().map(|v| v.get("error").unwrap_or(v));
        let message = detail
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {} - {}", status, body.trim()));

        let mut err = self.error(operation, message).with_status(status);
        if let Some(code) = detail.and_then(|d| d.get("code")).and_then(Value::as_str) {
            err = err.with_code(code);
        }
        if let Some(id) = request_id {
            err = err.with_request_id(id);
        }
        err
    }

    fn to_record(&self, operation: Operation, value: Value) -> Result<Record, MutationError> {
        serde_json::from_value(value).map_err(|e| self.error(operation, format!("Unexpected record shape: {}", e)))
    }

    fn to_records(&self, operation: Operation, value: Value) -> Result<Vec<Record>, MutationError> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items.into_iter().map(|v| self.to_record(operation, v)).collect(),
            other => Err(self.error(operation, format!("Expected a list of records, got {}", other))),
        }
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Record>, MutationError> {
        let args = json!({
            "include_archived": filter.include_archived,
            "ids": filter.ids.as_ref().map(|ids| ids.join(",")).unwrap_or_default(),
            "limit": filter.limit.unwrap_or(100),
        });
        let records = self.to_records(Operation::List, self.call(Operation::List, &args).await?)?;
        Ok(match &filter.ids {
            Some(ids) => records.into_iter().filter(|r| ids.contains(&r.id)).collect(),
            None => records,
        })
    }

    async fn find(&self, query: &str, limit: usize) -> Result<Vec<Record>, MutationError> {
        let args = json!({ "query": query, "limit": limit });
        let value = self.call(Operation::Find, &args).await?;
        let mut records = self.to_records(Operation::Find, value)?;
        records.truncate(limit);
        Ok(records)
    }

    async fn get(&self, id: &str) -> Result<Option<Record>, MutationError> {
        if !self.endpoints.contains_key(&Operation::Get) {
            let records = self.list(&ListFilter::by_id(id)).await?;
            return Ok(records.into_iter().find(|r| r.id == id));
        }
        match self.call(Operation::Get, &json!({ "id": id })).await {
            Ok(Value::Null) => Ok(None),
            Ok(value) => self.to_record(Operation::Get, value).map(Some),
            Err(e) if e.status == Some(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, fields: &Map<String, Value>) -> Result<Record, MutationError> {
        let mut args = fields.clone();
        args.insert("fields".to_string(), Value::Object(fields.clone()));
        let value = self.call(Operation::Create, &Value::Object(args)).await?;
        self.to_record(Operation::Create, value)
    }

    async fn update(&self, id: &str, patch: &Map<String, Value>) -> Result<Record, MutationError> {
        let mut args = patch.clone();
        args.insert("id".to_string(), Value::String(id.to_string()));
        args.insert("patch".to_string(), Value::Object(patch.clone()));
        let value = self.call(Operation::Update, &Value::Object(args)).await?;
        self.to_record(Operation::Update, value)
    }

    async fn archive(&self, id: &str) -> Result<(), MutationError> {
        self.call(Operation::Archive, &json!({ "id": id })).await.map(|_| ())
    }

    async fn append_description(&self, id: &str, text: &str) -> Result<Record, MutationError> {
        let value = self
            .call(Operation::AppendDescription, &json!({ "id": id, "text": text }))
            .await?;
        self.to_record(Operation::AppendDescription, value)
    }

    async fn mark_done(&self, id: &str) -> Result<(), MutationError> {
        self.call(Operation::MarkDone, &json!({ "id": id })).await.map(|_| ())
    }

    async fn move_to_deprecated(&self, id: &str) -> Result<(), MutationError> {
        self.call(Operation::MoveToDeprecated, &json!({ "id": id }))
            .await
            .map(|_| ())
    }
}

/// Load every store defined in `path`
pub fn load_stores(path: &Path) -> Result<Stores> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read: {}", path.display()))?;
    let config: HttpStoresConfig =
        serde_json::from_str(&content).with_context(|| "Failed to parse stores config JSON")?;

    let client = Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("Failed to create HTTP client")?;

    let mut stores = Stores::new();
    for def in config.stores {
        debug!(domain = %def.domain, endpoints = def.endpoints.len(), "loaded store");
        stores = stores.with(Arc::new(HttpRecordStore::new(def, client.clone())));
    }
    Ok(stores)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_args_encodes_urls() {
        let args = json!({ "query": "dark mode & more", "limit": 5 });
        let result = substitute_args("/ideas?q={{query}}&n={{limit}}", &args, true).unwrap();
        assert_eq!(result, "/ideas?q=dark%20mode%20%26%20more&n=5");
    }

    #[test]
    fn test_substitute_args_missing() {
        let result = substitute_args("/tasks/{{id}}", &json!({}), false);
        assert!(result.unwrap_err().to_string().contains("id"));
    }

    #[test]
    fn test_substitute_env() {
        env::set_var("CHAT_ACTIONS_TEST_BASE", "https://records.example");
        let result = substitute_template("${CHAT_ACTIONS_TEST_BASE}/tasks/{{id}}", &json!({"id": "t1"}), true).unwrap();
        assert_eq!(result, "https://records.example/tasks/t1");
        env::remove_var("CHAT_ACTIONS_TEST_BASE");
    }

    #[test]
    fn test_substitute_env_missing() {
        let result = substitute_env("Key: ${NONEXISTENT_VAR_99999}");
        assert!(result.unwrap_err().to_string().contains("NONEXISTENT_VAR_99999"));
    }

    #[test]
    fn test_substitute_value_whole_placeholder_keeps_json() {
        let template = json!({ "properties": "{{patch}}", "note": "id {{id}}" });
        let args = json!({ "id": "t1", "patch": { "tags": ["ux"], "priority": null } });
        let result = substitute_value(&template, &args).unwrap();
        assert_eq!(result["properties"]["tags"], json!(["ux"]));
        assert!(result["properties"]["priority"].is_null());
        assert_eq!(result["note"], "id t1");
    }

    #[test]
    fn test_extract_json_path() {
        let body = json!({ "data": { "results": [ { "id": "t1", "title": "A" } ] } });
        assert_eq!(extract_json_path(&body, "$.data.results[0].id").unwrap(), "t1");
        assert!(extract_json_path(&body, "$.data.results").unwrap().is_array());
        assert_eq!(extract_json_path(&body, "$").unwrap(), &body);
        assert!(extract_json_path(&body, "$.data.missing").is_err());
    }

    #[test]
    fn test_parse_stores_config() {
        let config: HttpStoresConfig = serde_json::from_str(
            r#"{
                "stores": [{
                    "domain": "idea",
                    "endpoints": {
                        "find": { "url": "https://x/ideas", "query": { "q": "{{query}}" }, "response_path": "$.items" },
                        "archive": { "url": "https://x/ideas/{{id}}/archive", "method": "POST" }
                    }
                }]
            }"#,
        )
        .unwrap();
        let def = &config.stores[0];
        assert_eq!(def.domain, Domain::Idea);
        assert_eq!(def.endpoints[&Operation::Archive].method, "POST");
        assert_eq!(def.endpoints[&Operation::Find].timeout_secs, 30);
    }

    #[test]
    fn test_status_error_reads_json_body() {
        let def = StoreDef { domain: Domain::Task, endpoints: HashMap::new() };
        let store = HttpRecordStore::new(def, Client::new());
        let err = store.status_error(
            Operation::Update,
            400,
            r#"{"error": {"code": "validation_error", "message": "status is invalid"}}"#,
            Some("req-9".to_string()),
        );
        assert_eq!(err.status, Some(400));
        assert_eq!(err.code.as_deref(), Some("validation_error"));
        assert_eq!(err.message, "status is invalid");
        assert_eq!(err.request_id.as_deref(), Some("req-9"));
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_a_mutation_error() {
        let def = StoreDef { domain: Domain::Journal, endpoints: HashMap::new() };
        let store = HttpRecordStore::new(def, Client::new());
        let err = store.archive("j1").await.unwrap_err();
        assert_eq!(err.operation, "archive");
        assert_eq!(err.message, "no endpoint configured");
    }
}
