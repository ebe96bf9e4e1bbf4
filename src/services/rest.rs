use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        query::{Filter, FilterOp, ListQuery, Rows},
        realtime::ChangeFilter,
    },
    services::{
        realtime::RealtimeClient,
        store::{ChangeSubscription, RemoteStore},
    },
    utils::validation::validate_identifier,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{header::HeaderMap, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};
use url::Url;

/// 托管后端的表接口客户端（PostgREST 约定）
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: Url,
    anon_key: String,
    access_token: Arc<RwLock<Option<String>>>,
    realtime: RealtimeClient,
}

/// 后端返回的错误体
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

impl RestStore {
    pub fn new(config: &Config) -> Result<Self> {
        let (url, key) = match (&config.store_url, &config.store_anon_key) {
            (Some(url), Some(key)) if config.is_configured() => (url, key),
            _ => return Err(AppError::demo_mode()),
        };

        let base_url = Url::parse(&format!("{}/", url.trim().trim_end_matches('/')))?;
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            realtime: RealtimeClient::new(&base_url, key, config.realtime_heartbeat())?,
            base_url,
            anon_key: key.clone(),
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> Result<Url> {
        validate_identifier(table)?;
        Ok(self.base_url.join(&format!("rest/v1/{}", table))?)
    }

    fn bearer(&self) -> String {
        self.access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.anon_key.clone())
    }

    fn request(&self, method: reqwest::Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    async fn send(&self, table: &str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            error!("Request to table {} failed: {}", table, e);
            AppError::DataUnavailable(format!("request to {} failed: {}", table, e))
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: PostgrestError = serde_json::from_str(&body).unwrap_or_default();
        warn!(
            "Table {} returned {}: {}",
            table,
            status,
            parsed.message.as_deref().unwrap_or(&body)
        );
        Err(map_error(status, parsed, body))
    }

    async fn rows(&self, table: &str, response: Response) -> Result<Vec<Value>> {
        response.json::<Vec<Value>>().await.map_err(|e| {
            AppError::DataUnavailable(format!("invalid response from {}: {}", table, e))
        })
    }
}

fn map_error(status: StatusCode, error: PostgrestError, body: String) -> AppError {
    let message = match (error.message, error.details) {
        (Some(message), Some(details)) if !details.is_empty() => format!("{} ({})", message, details),
        (Some(message), _) => message,
        (None, _) if !body.is_empty() => body,
        (None, _) => status.to_string(),
    };

    match error.code.as_deref() {
        Some("23505") => return AppError::Conflict(message),
        Some("PGRST116") => return AppError::NotFound(message),
        _ => {}
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Unauthorized(message),
        StatusCode::NOT_FOUND => AppError::NotFound(message),
        StatusCode::CONFLICT => AppError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => AppError::Validation(message),
        _ => AppError::DataUnavailable(message),
    }
}

/// 过滤值的文本形式
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 列表元素加双引号，避免逗号与括号被当作分隔符
fn quoted(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| format!("\"{}\"", scalar(v).replace('\\', "\\\\").replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",")
}

/// 过滤条件转换为查询参数
pub fn filter_params(filters: &[Filter]) -> Result<Vec<(String, String)>> {
    filters
        .iter()
        .map(|filter| {
            validate_identifier(&filter.field)?;
            let expression = match &filter.op {
                FilterOp::Eq(Value::Null) => "is.null".to_string(),
                FilterOp::Eq(value) => format!("eq.{}", scalar(value)),
                FilterOp::Contains(values) => format!("cs.{{{}}}", quoted(values)),
                FilterOp::ILike(pattern) => format!("ilike.{}", pattern),
                FilterOp::In(values) => format!("in.({})", quoted(values)),
            };
            Ok((filter.field.clone(), expression))
        })
        .collect()
}

/// 查询参数：投影、过滤、排序（以 `id` 打破平局）、分页
pub fn query_params(query: &ListQuery) -> Result<Vec<(String, String)>> {
    let mut params = vec![("select".to_string(), query.select_clause().to_string())];
    params.extend(filter_params(&query.store_filters())?);

    let order = query.effective_order();
    validate_identifier(&order.field)?;
    let direction = if order.ascending { "asc" } else { "desc" };
    let mut ordering = format!("{}.{}", order.field, direction);
    if order.field != "id" {
        ordering.push_str(&format!(",id.{}", direction));
    }
    params.push(("order".to_string(), ordering));

    if let Some(limit) = query.limit() {
        params.push(("limit".to_string(), limit.to_string()));
        params.push(("offset".to_string(), query.offset().to_string()));
    }
    Ok(params)
}

/// 从 `Content-Range: 0-4/23` 中读出总数
pub fn parse_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("content-range")
        .and_then(|v| v.to_str().ok())
        .and_then(|range| range.rsplit('/').next())
        .and_then(|total| total.parse().ok())
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn select(&self, table: &str, query: &ListQuery) -> Result<Rows> {
        let url = self.table_url(table)?;
        let params = query_params(query)?;
        debug!("Selecting from {} with {} params", table, params.len());

        let request = self
            .request(reqwest::Method::GET, url)
            .query(&params)
            .header("Prefer", "count=exact");
        let response = self.send(table, request).await?;
        let total = parse_total(response.headers());
        let rows = self.rows(table, response).await?;

        Ok(Rows {
            total: total.unwrap_or(rows.len() as u64),
            rows,
        })
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        let url = self.table_url(table)?;
        let request = self
            .request(reqwest::Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.send(table, request).await?;
        self.rows(table, response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::DataUnavailable(format!("insert into {} returned no row", table)))
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Value> {
        let url = self.table_url(table)?;
        let request = self
            .request(reqwest::Method::POST, url)
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&row);
        let response = self.send(table, request).await?;
        self.rows(table, response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::DataUnavailable(format!("upsert into {} returned no row", table)))
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        let url = self.table_url(table)?;
        let request = self
            .request(reqwest::Method::PATCH, url)
            .query(&filter_params(filters)?)
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = self.send(table, request).await?;
        self.rows(table, response).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        let url = self.table_url(table)?;
        let request = self
            .request(reqwest::Method::DELETE, url)
            .query(&filter_params(filters)?)
            .header("Prefer", "return=representation");
        let response = self.send(table, request).await?;
        self.rows(table, response).await
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeSubscription> {
        validate_identifier(&filter.table)?;
        self.realtime.subscribe(filter).await
    }

    fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token.clone();
        self.realtime.set_access_token(token);
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}
