//! 列表查询的进程内求值
//!
//! 演示数据与内存存储共用这套过滤、搜索、排序、分页规则，
//! 其语义与远程表接口的 `eq` / `cs` / `ilike` / `in` / `order` / `limit` 保持一致。

use crate::models::query::{Filter, FilterOp, ListQuery, OrderBy, Rows};
use chrono::DateTime;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// 按查询过滤、排序并分页；`total` 为分页前的匹配总数
pub fn apply(rows: Vec<Value>, query: &ListQuery) -> Rows {
    let filters = query.store_filters();
    let compiled = compile(&filters);

    let mut matched: Vec<Value> = rows
        .into_iter()
        .filter(|row| compiled.iter().all(|f| f.matches(row)))
        .collect();

    sort_rows(&mut matched, &query.effective_order());

    let total = matched.len() as u64;
    let page = matched
        .into_iter()
        .skip(query.offset())
        .take(query.limit().unwrap_or(usize::MAX))
        .map(|row| project(row, query.select_clause()))
        .collect();

    Rows { rows: page, total }
}

/// 单行是否满足全部过滤条件
pub fn matches_all(row: &Value, filters: &[Filter]) -> bool {
    compile(filters).iter().all(|f| f.matches(row))
}

struct Compiled<'a> {
    filter: &'a Filter,
    pattern: Option<Regex>,
}

impl Compiled<'_> {
    fn matches(&self, row: &Value) -> bool {
        let field = row.get(&self.filter.field).unwrap_or(&Value::Null);
        match &self.filter.op {
            FilterOp::Eq(expected) => loosely_equal(field, expected),
            FilterOp::In(options) => options.iter().any(|o| loosely_equal(field, o)),
            FilterOp::Contains(wanted) => match field {
                Value::Array(items) => wanted
                    .iter()
                    .all(|w| items.iter().any(|i| loosely_equal(i, w))),
                _ => false,
            },
            FilterOp::ILike(_) => {
                let text = match field {
                    Value::String(s) => s.clone(),
                    Value::Null => return false,
                    other => other.to_string(),
                };
                self.pattern.as_ref().map(|re| re.is_match(&text)).unwrap_or(false)
            }
        }
    }
}

fn compile(filters: &[Filter]) -> Vec<Compiled<'_>> {
    filters
        .iter()
        .map(|filter| Compiled {
            filter,
            pattern: match &filter.op {
                FilterOp::ILike(pattern) => like_to_regex(pattern),
                _ => None,
            },
        })
        .collect()
}

/// 将 LIKE 模式转换为锚定的大小写不敏感正则
pub fn like_to_regex(pattern: &str) -> Option<Regex> {
    let mut source = String::from("^");
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    source.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');

    RegexBuilder::new(&source)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .ok()
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        // 远程接口的过滤值都是字符串，数字和布尔按文本比较
        (Value::Number(_) | Value::Bool(_), Value::String(s)) => actual.to_string() == *s,
        (Value::String(s), Value::Number(_) | Value::Bool(_)) => expected.to_string() == *s,
        _ => actual == expected,
    }
}

/// 排序：字段值相同时按 `id` 同方向排序；空值视为最大（升序在后，降序在前）
pub fn sort_rows(rows: &mut [Value], order: &OrderBy) {
    rows.sort_by(|a, b| {
        let primary = compare_values(a.get(&order.field), b.get(&order.field));
        let ordering = primary.then_with(|| compare_values(a.get("id"), b.get("id")));
        if order.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => {
            // 时间戳的小数秒位数不固定，按时间比较
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// 简单投影：只支持普通列名，包含 `*` 或嵌入资源时返回整行
pub fn project(row: Value, select: &str) -> Value {
    let columns: Vec<&str> = select.split(',').map(str::trim).filter(|c| !c.is_empty()).collect();
    if columns.is_empty() || columns.iter().any(|c| c.contains('*') || c.contains('(')) {
        return row;
    }
    match row {
        Value::Object(map) => {
            let projected: Map<String, Value> = map
                .into_iter()
                .filter(|(key, _)| columns.contains(&key.as_str()))
                .collect();
            Value::Object(projected)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Value> {
        vec![
            json!({"id": "a", "title": "Rust Hackathon", "tags": ["rust", "systems"], "created_at": "2024-03-03T00:00:00+00:00", "is_read": false}),
            json!({"id": "b", "title": "Design Sprint", "tags": ["design"], "created_at": "2024-03-05T00:00:00+00:00", "is_read": true}),
            json!({"id": "c", "title": "rusty robots", "tags": ["rust"], "created_at": "2024-03-04T00:00:00+00:00", "is_read": false}),
        ]
    }

    fn ids(rows: &Rows) -> Vec<&str> {
        rows.rows.iter().filter_map(|r| r["id"].as_str()).collect()
    }

    #[test]
    fn test_default_order_is_newest_first() {
        let result = apply(rows(), &ListQuery::new());
        assert_eq!(ids(&result), vec!["b", "c", "a"]);
        assert_eq!(result.total, 3);
    }

    #[test]
    fn test_search_is_case_insensitive_substring() {
        let result = apply(rows(), &ListQuery::new().search("title", "RUST"));
        assert_eq!(ids(&result), vec!["c", "a"]);
    }

    #[test]
    fn test_contains_and_eq() {
        let query = ListQuery::new()
            .filter_value("tags", json!(["rust"]), false)
            .eq("is_read", false);
        let result = apply(rows(), &query);
        assert_eq!(result.total, 2);

        let query = ListQuery::new().eq("is_read", "true");
        assert_eq!(ids(&apply(rows(), &query)), vec!["b"]);
    }

    #[test]
    fn test_pagination_keeps_total() {
        let query = ListQuery::new().per_page(2).page(2);
        let result = apply(rows(), &query);
        assert_eq!(ids(&result), vec!["a"]);
        assert_eq!(result.total, 3);
    }

    #[test]
    fn test_ties_broken_by_id() {
        let tied = vec![
            json!({"id": "2", "created_at": "2024-01-01"}),
            json!({"id": "1", "created_at": "2024-01-01"}),
            json!({"id": "3", "created_at": "2024-01-01"}),
        ];
        let result = apply(tied, &ListQuery::new().order_by("created_at", true));
        assert_eq!(ids(&result), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_timestamps_compare_by_instant() {
        let mut rows = vec![
            json!({"id": "late", "created_at": "2024-03-01T10:00:00.5Z"}),
            json!({"id": "early", "created_at": "2024-03-01T10:00:00+00:00"}),
        ];
        sort_rows(&mut rows, &OrderBy::asc("created_at"));
        assert_eq!(rows[0]["id"], "early");
    }

    #[test]
    fn test_like_escapes() {
        let re = like_to_regex("%50\\%%").unwrap();
        assert!(re.is_match("save 50% now"));
        assert!(!re.is_match("save 500 now"));
    }

    #[test]
    fn test_projection() {
        let row = json!({"id": "a", "title": "x", "secret": 1});
        assert_eq!(project(row.clone(), "id, title"), json!({"id": "a", "title": "x"}));
        assert_eq!(project(row.clone(), "*"), row);
    }
}
