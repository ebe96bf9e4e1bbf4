use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 单个过滤条件的运算
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FilterOp {
    /// 等值匹配
    Eq(Value),
    /// 数组字段包含全部给定元素
    Contains(Vec<Value>),
    /// 大小写不敏感的 LIKE 模式（`%` 任意串，`_` 单字符，`\` 转义）
    ILike(String),
    /// 字段值属于给定集合
    In(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self { field: field.to_string(), op: FilterOp::Eq(value.into()) }
    }

    pub fn contains(field: &str, values: Vec<Value>) -> Self {
        Self { field: field.to_string(), op: FilterOp::Contains(values) }
    }

    pub fn ilike(field: &str, pattern: &str) -> Self {
        Self { field: field.to_string(), op: FilterOp::ILike(pattern.to_string()) }
    }

    pub fn is_in(field: &str, values: Vec<Value>) -> Self {
        Self { field: field.to_string(), op: FilterOp::In(values) }
    }

    /// 按列表视图传入的松散值归类：数组为包含匹配，字符串为等值
    /// （调用方开启模式匹配时为 `ilike`），其他标量为等值。
    /// 空值（`null`、`""`、`[]`）不产生过滤条件。
    pub fn from_value(field: &str, value: Value, pattern_matching: bool) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Array(items) if items.is_empty() => None,
            Value::Array(items) => Some(Self::contains(field, items)),
            Value::String(s) if s.is_empty() => None,
            Value::String(s) if pattern_matching => Some(Self::ilike(field, &s)),
            other => Some(Self::eq(field, other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(field: &str) -> Self {
        Self { field: field.to_string(), ascending: true }
    }

    pub fn desc(field: &str) -> Self {
        Self { field: field.to_string(), ascending: false }
    }

    /// 列表视图的默认排序：按创建时间倒序
    pub fn newest_first() -> Self {
        Self::desc("created_at")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Search {
    pub field: String,
    pub text: String,
}

/// 列表查询参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    pub page: u32,
    /// 0 表示不分页，返回全部匹配
    pub per_page: u32,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub search: Option<Search>,
    pub select: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 0,
            filters: Vec::new(),
            order_by: None,
            search: None,
            select: None,
        }
    }
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// 添加松散类型的过滤条件，规则见 [`Filter::from_value`]
    pub fn filter_value(mut self, field: &str, value: impl Into<Value>, pattern_matching: bool) -> Self {
        if let Some(filter) = Filter::from_value(field, value.into(), pattern_matching) {
            self.filters.push(filter);
        }
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(field, value))
    }

    pub fn order_by(mut self, field: &str, ascending: bool) -> Self {
        self.order_by = Some(OrderBy { field: field.to_string(), ascending });
        self
    }

    pub fn search(mut self, field: &str, text: &str) -> Self {
        self.search = Some(Search { field: field.to_string(), text: text.to_string() });
        self
    }

    pub fn select(mut self, shape: &str) -> Self {
        self.select = Some(shape.to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page < 1 {
            return Err(AppError::validation("page must be at least 1"));
        }
        Ok(())
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.per_page as usize
    }

    pub fn limit(&self) -> Option<usize> {
        match self.per_page {
            0 => None,
            n => Some(n as usize),
        }
    }

    pub fn effective_order(&self) -> OrderBy {
        self.order_by.clone().unwrap_or_else(OrderBy::newest_first)
    }

    /// 发送给存储的过滤条件，搜索词折叠为 `ilike`
    pub fn store_filters(&self) -> Vec<Filter> {
        let mut filters = self.filters.clone();
        if let Some(search) = &self.search {
            if !search.field.is_empty() && !search.text.is_empty() {
                let pattern = format!("%{}%", escape_like(&search.text));
                filters.push(Filter::ilike(&search.field, &pattern));
            }
        }
        filters
    }

    pub fn select_clause(&self) -> &str {
        match self.select.as_deref() {
            Some(shape) if !shape.trim().is_empty() => shape,
            _ => "*",
        }
    }

    pub fn cache_key(&self, table: &str) -> String {
        format!(
            "{}:{}",
            table,
            serde_json::to_string(self).unwrap_or_default()
        )
    }
}

/// 转义 LIKE 通配符，使用户输入按字面匹配
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// 存储层返回的原始行及匹配总数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    pub rows: Vec<Value>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// 来自远程存储
    Live,
    /// 未配置远程存储时的演示数据
    Mock,
    /// 远程读取失败后显式替换的演示数据
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing<T> {
    pub records: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub source: DataSource,
}

impl<T> Listing<T> {
    pub fn page_count(&self) -> u64 {
        match self.per_page {
            0 => 1,
            n => (self.total + n as u64 - 1) / n as u64,
        }
    }

    pub fn has_more(&self) -> bool {
        self.per_page > 0 && (self.page as u64) < self.page_count()
    }

    pub fn is_live(&self) -> bool {
        self.source == DataSource::Live
    }

    /// 逐条转换记录，转换失败的记录被丢弃
    pub fn filter_map<U, F>(self, f: F) -> Listing<U>
    where
        F: FnMut(T) -> Option<U>,
    {
        Listing {
            records: self.records.into_iter().filter_map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            source: self.source,
        }
    }
}

/// 写操作结果；演示模式下 `persisted` 为 false
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mutation<T> {
    pub data: T,
    pub persisted: bool,
}

impl<T> Mutation<T> {
    pub fn persisted(data: T) -> Self {
        Self { data, persisted: true }
    }

    pub fn simulated(data: T) -> Self {
        Self { data, persisted: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_classification() {
        assert_eq!(
            Filter::from_value("skill_tags", json!(["react"]), false),
            Some(Filter::contains("skill_tags", vec![json!("react")]))
        );
        assert_eq!(
            Filter::from_value("title", json!("%hack%"), true),
            Some(Filter::ilike("title", "%hack%"))
        );
        assert_eq!(
            Filter::from_value("title", json!("%hack%"), false),
            Some(Filter::eq("title", "%hack%"))
        );
        assert_eq!(Filter::from_value("is_read", json!(false), true), Some(Filter::eq("is_read", false)));
        assert_eq!(Filter::from_value("tags", json!([]), false), None);
        assert_eq!(Filter::from_value("title", json!(""), false), None);
        assert_eq!(Filter::from_value("title", Value::Null, false), None);
    }

    #[test]
    fn test_pagination_math() {
        let query = ListQuery::new().page(3).per_page(5);
        assert_eq!(query.offset(), 10);
        assert_eq!(query.limit(), Some(5));
        assert_eq!(ListQuery::new().limit(), None);
        assert!(ListQuery::new().page(0).validate().is_err());
    }

    #[test]
    fn test_search_becomes_escaped_ilike() {
        let query = ListQuery::new().search("title", "50%_off");
        let filters = query.store_filters();
        assert_eq!(filters, vec![Filter::ilike("title", "%50\\%\\_off%")]);
    }

    #[test]
    fn test_listing_page_count() {
        let listing: Listing<()> = Listing {
            records: vec![],
            total: 11,
            page: 2,
            per_page: 5,
            source: DataSource::Mock,
        };
        assert_eq!(listing.page_count(), 3);
        assert!(listing.has_more());
    }
}
