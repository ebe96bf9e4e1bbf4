use crate::models::record::{ExternalLink, GigType};
use crate::models::user::Availability;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// 创建项目表单
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 5, message = "Title must be at least 5 characters"))]
    pub title: String,
    #[validate(length(min = 20, message = "Description must be at least 20 characters"))]
    pub description: String,
    #[validate(length(min = 1, message = "Select at least one role"))]
    pub roles_needed: Vec<String>,
    #[validate(length(min = 1, message = "Select at least one skill tag"))]
    pub skill_tags: Vec<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    #[validate]
    pub external_links: Vec<ExternalLink>,
    #[serde(default)]
    pub category: Option<String>,
}

/// 发布零工表单
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateGigRequest {
    #[validate(length(min = 5, message = "Title must be at least 5 characters"))]
    pub title: String,
    #[validate(length(min = 20, message = "Description must be at least 20 characters"))]
    pub description: String,
    pub gig_type: GigType,
    #[validate(length(min = 1, message = "Rate is required"))]
    pub rate: String,
    #[validate(length(min = 1, message = "Duration is required"))]
    pub duration: String,
    #[validate(length(min = 1, message = "Availability is required"))]
    pub availability: String,
    #[validate(length(min = 1, message = "Select at least one tag"))]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deadline: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SignInRequest {
    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "terms_accepted", skip_on_field_errors = false))]
pub struct SignUpRequest {
    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters long"))]
    pub password: String,
    #[serde(default)]
    pub agree_terms: bool,
}

fn terms_accepted(request: &SignUpRequest) -> Result<(), ValidationError> {
    if request.agree_terms {
        return Ok(());
    }
    let mut error = ValidationError::new("agree_terms");
    error.message = Some("You must agree to the terms of service and privacy policy".into());
    Err(error)
}

/// 资料设置表单；作品集链接可留空
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProfileUpdateRequest {
    #[validate(
        url(message = "Please enter a valid LinkedIn URL"),
        custom = "linkedin_host"
    )]
    pub linkedin_url: String,
    #[validate(
        url(message = "Please enter a valid GitHub URL"),
        custom = "github_host"
    )]
    pub github_url: String,
    #[serde(default)]
    #[validate(custom = "optional_url")]
    pub portfolio_url: Option<String>,
    #[serde(default)]
    pub availability: Availability,
}

impl ProfileUpdateRequest {
    /// 空字符串的作品集链接按未填写处理
    pub fn portfolio(&self) -> Option<&str> {
        self.portfolio_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

fn host_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

fn linkedin_host(url: &str) -> Result<(), ValidationError> {
    if url.contains("linkedin.com") {
        Ok(())
    } else {
        Err(host_error("linkedin_host", "This doesn't look like a LinkedIn URL"))
    }
}

fn github_host(url: &str) -> Result<(), ValidationError> {
    if url.contains("github.com") {
        Ok(())
    } else {
        Err(host_error("github_host", "This doesn't look like a GitHub URL"))
    }
}

fn optional_url(url: &str) -> Result<(), ValidationError> {
    if url.trim().is_empty() || validator::validate_url(url) {
        Ok(())
    } else {
        Err(host_error("url", "Please enter a valid URL"))
    }
}
