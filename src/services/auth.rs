use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        forms::{ProfileUpdateRequest, SignInRequest, SignUpRequest},
        query::{ListQuery, Mutation},
        user::{AuthRedirect, AuthUser, OAuthProvider, Session, SessionState, UserProfile},
    },
    services::store::RemoteStore,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::Url;
use validator::Validate;

/// 当前会话的共享句柄
///
/// 认证上下文写入，数据访问层与通知中心只读。
#[derive(Clone)]
pub struct SessionHandle {
    tx: Arc<watch::Sender<SessionState>>,
}

impl SessionHandle {
    pub fn new(initial: SessionState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn anonymous() -> Self {
        Self::new(SessionState::Anonymous)
    }

    /// 会话尚未确定（启动时恢复会话之前）
    pub fn loading() -> Self {
        Self::new(SessionState::Loading)
    }

    /// 已登录的会话，测试与嵌入场景使用
    pub fn signed_in(user_id: &str) -> Self {
        Self::new(SessionState::Authenticated(Session {
            access_token: String::new(),
            refresh_token: None,
            expires_at: None,
            user: AuthUser {
                id: user_id.to_string(),
                email: None,
            },
        }))
    }

    pub fn state(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.tx.borrow().user().cloned()
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.tx.borrow(), SessionState::Loading)
    }

    pub fn access_token(&self) -> Option<String> {
        match &*self.tx.borrow() {
            SessionState::Authenticated(session) if !session.access_token.is_empty() => {
                Some(session.access_token.clone())
            }
            _ => None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub fn set(&self, state: SessionState) {
        self.tx.send_replace(state);
    }
}

/// 托管认证服务的接口
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;

    /// 需要邮件确认时返回 None
    async fn sign_up(&self, email: &str, password: &str, redirect_to: Option<&str>) -> Result<Option<Session>>;

    async fn sign_out(&self, access_token: &str) -> Result<()>;

    async fn get_user(&self, access_token: &str) -> Result<AuthUser>;

    fn authorize_url(&self, provider: OAuthProvider, redirect_to: Option<&str>) -> Result<Url>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

impl From<TokenResponse> for Session {
    fn from(token: TokenResponse) -> Self {
        Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
            user: token.user,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AuthErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// GoTrue 风格的认证接口客户端
#[derive(Clone)]
pub struct GoTrueClient {
    client: Client,
    base_url: Url,
    anon_key: String,
}

impl GoTrueClient {
    pub fn new(config: &Config) -> Result<Self> {
        let (url, key) = match (&config.store_url, &config.store_anon_key) {
            (Some(url), Some(key)) if config.is_configured() => (url, key),
            _ => return Err(AppError::demo_mode()),
        };

        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: Url::parse(&format!("{}/", url.trim().trim_end_matches('/')))?,
            anon_key: key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!("auth/v1/{}", path))?)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .header("apikey", &self.anon_key)
            .send()
            .await
            .map_err(|e| AppError::DataUnavailable(format!("auth request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: AuthErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .error_description
            .or(body.msg)
            .or(body.message)
            .unwrap_or_else(|| status.to_string());
        warn!("Auth request returned {}: {}", status, message);

        Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            AppError::DataUnavailable(message)
        } else {
            AppError::Authentication(message)
        })
    }
}

#[async_trait]
impl AuthProvider for GoTrueClient {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let mut url = self.endpoint("token")?;
        url.set_query(Some("grant_type=password"));
        let response = self
            .send(self.client.post(url).json(&json!({ "email": email, "password": password })))
            .await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Authentication(format!("invalid token response: {}", e)))?;
        Ok(token.into())
    }

    async fn sign_up(&self, email: &str, password: &str, redirect_to: Option<&str>) -> Result<Option<Session>> {
        let mut url = self.endpoint("signup")?;
        if let Some(redirect) = redirect_to {
            url.query_pairs_mut().append_pair("redirect_to", redirect);
        }
        let response = self
            .send(self.client.post(url).json(&json!({ "email": email, "password": password })))
            .await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Authentication(format!("invalid signup response: {}", e)))?;

        // 开启邮件确认时只返回用户，不返回令牌
        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)?;
            Ok(Some(token.into()))
        } else {
            Ok(None)
        }
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let url = self.endpoint("logout")?;
        self.send(self.client.post(url).bearer_auth(access_token)).await?;
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser> {
        let url = self.endpoint("user")?;
        let response = self.send(self.client.get(url).bearer_auth(access_token)).await?;
        response
            .json()
            .await
            .map_err(|e| AppError::Authentication(format!("invalid user response: {}", e)))
    }

    fn authorize_url(&self, provider: OAuthProvider, redirect_to: Option<&str>) -> Result<Url> {
        let mut url = self.endpoint("authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", provider.as_str());
            if let Some(redirect) = redirect_to {
                query.append_pair("redirect_to", redirect);
            }
        }
        Ok(url)
    }
}

/// 注册结果
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(AuthRedirect),
    /// 已发送验证邮件，会话保持匿名
    ConfirmationSent,
}

/// 认证上下文：登录、注册、登出与用户资料
#[derive(Clone)]
pub struct AuthContext {
    config: Config,
    provider: Option<Arc<dyn AuthProvider>>,
    store: Option<Arc<dyn RemoteStore>>,
    session: SessionHandle,
    profile: Arc<RwLock<Option<UserProfile>>>,
}

impl AuthContext {
    pub fn new(
        config: Config,
        provider: Option<Arc<dyn AuthProvider>>,
        store: Option<Arc<dyn RemoteStore>>,
        session: SessionHandle,
    ) -> Self {
        Self {
            config,
            provider,
            store,
            session,
            profile: Arc::new(RwLock::new(None)),
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.session.current_user()
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.profile.read().clone()
    }

    /// LinkedIn 与 GitHub 链接都填写后才算完成资料
    pub fn profile_complete(&self) -> bool {
        self.profile.read().as_ref().map(UserProfile::is_complete).unwrap_or(false)
    }

    fn provider(&self) -> Result<&Arc<dyn AuthProvider>> {
        self.provider.as_ref().ok_or_else(AppError::demo_mode)
    }

    fn apply_session(&self, session: Option<Session>) {
        let token = session.as_ref().map(|s| s.access_token.clone());
        if let Some(store) = &self.store {
            store.set_access_token(token);
        }
        match session {
            Some(session) => {
                info!("Signed in user: {}", session.user.id);
                self.session.set(SessionState::Authenticated(session));
            }
            None => {
                *self.profile.write() = None;
                self.session.set(SessionState::Anonymous);
            }
        }
    }

    /// 恢复已保存的会话；令牌失效时转为匿名
    pub async fn restore(&self, saved: Option<Session>) -> Result<Option<AuthRedirect>> {
        self.session.set(SessionState::Loading);
        let session = match saved {
            Some(session) if !session.is_expired() => session,
            Some(_) => {
                debug!("Saved session expired, continuing anonymously");
                self.apply_session(None);
                return Ok(None);
            }
            None => {
                self.apply_session(None);
                return Ok(None);
            }
        };

        let verified = match &self.provider {
            Some(provider) => match provider.get_user(&session.access_token).await {
                Ok(user) => Some(Session { user, ..session }),
                Err(e) => {
                    warn!("Failed to restore session: {}", e);
                    None
                }
            },
            None => Some(session),
        };

        let restored = verified.is_some();
        self.apply_session(verified);
        if !restored {
            return Ok(None);
        }
        let profile = self.refresh_profile().await;
        Ok(Some(AuthRedirect::after_sign_in(profile.as_ref())))
    }

    pub async fn sign_in_with_password(&self, request: &SignInRequest) -> Result<AuthRedirect> {
        request.validate()?;
        let session = self
            .provider()?
            .sign_in_with_password(&request.email, &request.password)
            .await?;

        self.apply_session(Some(session));
        let profile = self.refresh_profile().await;
        Ok(AuthRedirect::after_sign_in(profile.as_ref()))
    }

    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome> {
        request.validate()?;
        let redirect = self.config.auth_redirect_url.as_deref();
        match self.provider()?.sign_up(&request.email, &request.password, redirect).await? {
            Some(session) => {
                self.apply_session(Some(session));
                let profile = self.refresh_profile().await;
                Ok(SignUpOutcome::SignedIn(AuthRedirect::after_sign_in(profile.as_ref())))
            }
            None => {
                info!("Verification email sent to {}", request.email);
                Ok(SignUpOutcome::ConfirmationSent)
            }
        }
    }

    /// 第三方登录的跳转地址
    pub fn oauth_authorize_url(&self, provider: OAuthProvider) -> Result<Url> {
        self.provider()?
            .authorize_url(provider, self.config.auth_redirect_url.as_deref())
    }

    /// 登出；远程调用失败时本地会话仍然清除
    pub async fn sign_out(&self) -> Result<AuthRedirect> {
        if let (Some(provider), Some(token)) = (&self.provider, self.session.access_token()) {
            if let Err(e) = provider.sign_out(&token).await {
                warn!("Remote sign-out failed: {}", e);
            }
        }
        self.apply_session(None);
        info!("Signed out");
        Ok(AuthRedirect::Home)
    }

    /// 重新读取当前用户的资料；读取失败时记录日志并返回 None
    pub async fn refresh_profile(&self) -> Option<UserProfile> {
        let user = self.current_user()?;
        let store = match &self.store {
            Some(store) => store,
            None => return self.profile(),
        };

        let query = ListQuery::new().eq("id", user.id.as_str()).per_page(1);
        let fetched = match store.select("profiles", &query).await {
            Ok(rows) => rows
                .rows
                .into_iter()
                .next()
                .and_then(|row| serde_json::from_value::<UserProfile>(row).ok()),
            Err(e) => {
                error!("Error fetching user profile for {}: {}", user.id, e);
                return None;
            }
        };

        *self.profile.write() = fetched.clone();
        fetched
    }

    /// 更新资料（按 `id` 合并写入）
    pub async fn update_profile(&self, request: &ProfileUpdateRequest) -> Result<Mutation<UserProfile>> {
        let user = self
            .current_user()
            .ok_or_else(|| AppError::unauthorized("You must be logged in to update your profile"))?;
        request.validate()?;

        let profile = UserProfile {
            id: user.id.clone(),
            linkedin_url: Some(request.linkedin_url.clone()),
            github_url: Some(request.github_url.clone()),
            portfolio_url: request.portfolio().map(str::to_string),
            availability: Some(request.availability),
            updated_at: Some(Utc::now()),
        };

        let store = match &self.store {
            Some(store) => store,
            None => {
                debug!("Demo mode: profile update for {} kept locally", user.id);
                *self.profile.write() = Some(profile.clone());
                return Ok(Mutation::simulated(profile));
            }
        };

        store
            .upsert("profiles", serde_json::to_value(&profile)?, "id")
            .await?;
        info!("Profile updated for user: {}", user.id);

        let refreshed = self.refresh_profile().await.unwrap_or(profile);
        Ok(Mutation::persisted(refreshed))
    }
}
