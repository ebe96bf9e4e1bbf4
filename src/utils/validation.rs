use crate::error::{AppError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// 表名 / 列名只允许小写字母、数字和下划线，拼接进请求路径前先校验
pub fn validate_identifier(name: &str) -> Result<()> {
    static IDENTIFIER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").ok());

    match IDENTIFIER.as_ref() {
        Some(re) if re.is_match(name) => Ok(()),
        Some(_) => Err(AppError::Validation(format!("invalid table or column name: {}", name))),
        None => Err(AppError::internal("identifier pattern failed to compile")),
    }
}

/// 记录 id 不能为空，也不能包含会破坏过滤表达式的字符
pub fn validate_record_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(AppError::validation("Record id is required"));
    }

    if id.len() > 128 {
        return Err(AppError::validation("Record id is too long"));
    }

    if id.chars().any(|c| matches!(c, ',' | '(' | ')' | '"' | '&' | '?' | '#') || c.is_whitespace()) {
        return Err(AppError::Validation(format!("Record id contains invalid characters: {}", id)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("projects").is_ok());
        assert!(validate_identifier("skill_tags").is_ok());

        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("projects?select=*").is_err());
        assert!(validate_identifier("Projects").is_err());
    }

    #[test]
    fn test_validate_record_id() {
        assert!(validate_record_id("8f14e45f-ea4b-4c5e-8a3f-0d1f2b3c4d5e").is_ok());
        assert!(validate_record_id("mock-project-1").is_ok());

        assert!(validate_record_id(" ").is_err());
        assert!(validate_record_id("a,b").is_err());
        assert!(validate_record_id("x&select=*").is_err());
    }
}
