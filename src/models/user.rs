use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: AuthUser,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| at <= Utc::now()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Loading,
    Authenticated(Session),
    Anonymous,
}

impl SessionState {
    pub fn user(&self) -> Option<&AuthUser> {
        match self {
            SessionState::Authenticated(session) => Some(&session.user),
            SessionState::Loading | SessionState::Anonymous => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    OpenToCollab,
    Busy,
}

impl Default for Availability {
    fn default() -> Self {
        Availability::Busy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub github_url: Option<String>,
    #[serde(default)]
    pub portfolio_url: Option<String>,
    #[serde(default)]
    pub availability: Option<Availability>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// LinkedIn 与 GitHub 链接都已填写才算完成资料设置
    pub fn is_complete(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        filled(&self.linkedin_url) && filled(&self.github_url)
    }
}

/// 登录状态变化后界面应跳转的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRedirect {
    ProfileSetup,
    Dashboard,
    Home,
}

impl AuthRedirect {
    pub fn after_sign_in(profile: Option<&UserProfile>) -> Self {
        match profile {
            Some(profile) if profile.is_complete() => AuthRedirect::Dashboard,
            _ => AuthRedirect::ProfileSetup,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            AuthRedirect::ProfileSetup => "/profile-setup",
            AuthRedirect::Dashboard => "/dashboard",
            AuthRedirect::Home => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Github,
    Google,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Github => "github",
            OAuthProvider::Google => "google",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(linkedin: Option<&str>, github: Option<&str>) -> UserProfile {
        UserProfile {
            id: "u1".to_string(),
            linkedin_url: linkedin.map(str::to_string),
            github_url: github.map(str::to_string),
            portfolio_url: None,
            availability: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_redirect_after_sign_in() {
        let complete = profile(Some("https://linkedin.com/in/a"), Some("https://github.com/a"));
        let partial = profile(Some("https://linkedin.com/in/a"), Some("  "));

        assert_eq!(AuthRedirect::after_sign_in(Some(&complete)), AuthRedirect::Dashboard);
        assert_eq!(AuthRedirect::after_sign_in(Some(&partial)), AuthRedirect::ProfileSetup);
        assert_eq!(AuthRedirect::after_sign_in(None), AuthRedirect::ProfileSetup);
        assert_eq!(AuthRedirect::Home.path(), "/");
    }
}
