use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        bookmark::{Bookmark, BookmarkWithItem},
        forms::{CreateGigRequest, CreateProjectRequest},
        query::{DataSource, Filter, ListQuery, Listing, Mutation, Rows},
        record::{Gig, Item, ItemType, Project},
        user::AuthUser,
    },
    services::{auth::SessionHandle, mock::MockDataProvider, store::RemoteStore},
    utils::{
        cache::Cache,
        matcher,
        serde_helpers::parse_date,
        validation::{validate_identifier, validate_record_id},
    },
};
use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

const BOOKMARKS: &str = "bookmarks";

/// 通用数据访问层
///
/// 已配置远程存储时读写远程表，否则使用演示数据；演示模式的写操作不落库，
/// 返回 `persisted == false` 的结果并计入 `suppressed_writes`。
#[derive(Clone)]
pub struct DataService {
    config: Config,
    store: Option<Arc<dyn RemoteStore>>,
    mock: MockDataProvider,
    session: SessionHandle,
    cache: Cache<Rows>,
    suppressed_writes: Arc<AtomicUsize>,
}

impl DataService {
    pub fn new(config: Config, store: Option<Arc<dyn RemoteStore>>, session: SessionHandle) -> Self {
        Self::with_mock(config, store, session, MockDataProvider::new())
    }

    pub fn with_mock(
        config: Config,
        store: Option<Arc<dyn RemoteStore>>,
        session: SessionHandle,
        mock: MockDataProvider,
    ) -> Self {
        let cache = Cache::new(config.list_stale_time());
        Self {
            config,
            store,
            mock,
            session,
            cache,
            suppressed_writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live_store().is_some()
    }

    pub fn mock(&self) -> &MockDataProvider {
        &self.mock
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// 演示模式下被拦截的写操作次数
    pub fn suppressed_writes(&self) -> usize {
        self.suppressed_writes.load(Ordering::SeqCst)
    }

    /// 丢弃某张表的列表缓存
    pub fn invalidate(&self, table: &str) {
        let dropped = self.cache.invalidate_table(table);
        if dropped > 0 {
            debug!("Invalidated {} cached listings for table: {}", dropped, table);
        }
    }

    fn live_store(&self) -> Option<&Arc<dyn RemoteStore>> {
        if self.config.is_configured() {
            self.store.as_ref()
        } else {
            None
        }
    }

    fn require_user(&self, action: &str) -> Result<AuthUser> {
        self.session
            .current_user()
            .ok_or_else(|| AppError::Unauthorized(format!("You must be logged in to {}", action)))
    }

    async fn simulate_latency(&self) {
        let latency = self.config.mock_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn suppress_write(&self, table: &str, operation: &str) {
        let total = self.suppressed_writes.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Demo mode: {} on {} not persisted ({} suppressed)", operation, table, total);
    }

    fn mock_rows(&self, table: &str) -> Vec<Value> {
        self.mock.generate_rows(table, self.config.mock_dataset_size)
    }

    fn listing(rows: Rows, query: &ListQuery, source: DataSource) -> Listing<Value> {
        Listing {
            records: rows.rows,
            total: rows.total,
            page: query.page,
            per_page: query.per_page,
            source,
        }
    }

    async fn select_live(&self, store: &Arc<dyn RemoteStore>, table: &str, query: &ListQuery) -> Result<Rows> {
        let key = query.cache_key(table);
        if let Some(cached) = self.cache.get(&key) {
            debug!("Serving cached listing for table: {}", table);
            return Ok(cached);
        }

        let rows = store.select(table, query).await.map_err(|e| {
            error!("Error fetching {}: {}", table, e);
            match e {
                AppError::DataUnavailable(_) => e,
                other => AppError::DataUnavailable(other.to_string()),
            }
        })?;

        self.cache.set(key, rows.clone());
        Ok(rows)
    }

    /// 分页列出一张表的记录
    pub async fn list(&self, table: &str, query: &ListQuery) -> Result<Listing<Value>> {
        validate_identifier(table)?;
        query.validate()?;

        match self.live_store() {
            Some(store) => {
                let rows = self.select_live(store, table, query).await?;
                Ok(Self::listing(rows, query, DataSource::Live))
            }
            None => {
                self.simulate_latency().await;
                let rows = matcher::apply(self.mock_rows(table), query);
                Ok(Self::listing(rows, query, DataSource::Mock))
            }
        }
    }

    /// 远程读取失败时用演示数据代替，并标记为 `Fallback`
    pub async fn list_with_fallback(&self, table: &str, query: &ListQuery) -> Result<Listing<Value>> {
        match self.list(table, query).await {
            Err(AppError::DataUnavailable(reason)) => {
                warn!("Falling back to demo data for {}: {}", table, reason);
                let rows = matcher::apply(self.mock_rows(table), query);
                Ok(Self::listing(rows, query, DataSource::Fallback))
            }
            other => other,
        }
    }

    /// 类型化列表；无法解析的行记录告警后跳过
    pub async fn list_items(&self, item_type: ItemType, query: &ListQuery) -> Result<Listing<Item>> {
        let listing = self.list(item_type.table(), query).await?;
        Ok(listing.filter_map(|row| match Item::from_row(item_type, row) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed {} row: {}", item_type, e);
                None
            }
        }))
    }

    /// 新建记录；缺少 `id` / `created_at` 时自动补全
    pub async fn create(&self, table: &str, fields: Value) -> Result<Mutation<Value>> {
        validate_identifier(table)?;
        let user = self.require_user("create content")?;

        let mut row = match fields {
            Value::Object(map) => map,
            _ => return Err(AppError::validation("Record fields must be a JSON object")),
        };
        fill_missing(&mut row, "id", || Value::String(Uuid::new_v4().to_string()));
        fill_missing(&mut row, "created_at", || Value::String(Utc::now().to_rfc3339()));
        let row = Value::Object(row);

        let store = match self.live_store() {
            Some(store) => store,
            None => {
                self.simulate_latency().await;
                self.suppress_write(table, "insert");
                return Ok(Mutation::simulated(row));
            }
        };

        let created = store.insert(table, row).await.map_err(|e| {
            error!("Error creating {} record for {}: {}", table, user.id, e);
            e
        })?;
        self.invalidate(table);
        info!("Created {} record by user: {}", table, user.id);
        Ok(Mutation::persisted(created))
    }

    /// 按 id 更新记录；记录不存在时返回 NotFound
    pub async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Mutation<Value>> {
        validate_identifier(table)?;
        validate_record_id(id)?;
        let user = self.require_user("update content")?;
        if !patch.is_object() {
            return Err(AppError::validation("Patch must be a JSON object"));
        }

        let store = match self.live_store() {
            Some(store) => store,
            None => {
                self.simulate_latency().await;
                let mut existing = self
                    .mock_rows(table)
                    .into_iter()
                    .find(|row| row.get("id").and_then(Value::as_str) == Some(id))
                    .ok_or_else(|| AppError::NotFound(format!("{} record {}", table, id)))?;
                merge_patch(&mut existing, &patch);
                self.suppress_write(table, "update");
                return Ok(Mutation::simulated(existing));
            }
        };

        let updated = store.update(table, &[Filter::eq("id", id)], patch).await?;
        let row = updated
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("{} record {}", table, id)))?;

        self.invalidate(table);
        info!("Updated {} record {} by user: {}", table, id, user.id);
        Ok(Mutation::persisted(row))
    }

    /// 删除记录；目标已不存在也视为成功
    pub async fn delete(&self, table: &str, id: &str) -> Result<Mutation<bool>> {
        validate_identifier(table)?;
        validate_record_id(id)?;
        let user = self.require_user("delete content")?;

        let store = match self.live_store() {
            Some(store) => store,
            None => {
                self.simulate_latency().await;
                self.suppress_write(table, "delete");
                return Ok(Mutation::simulated(true));
            }
        };

        match store.delete(table, &[Filter::eq("id", id)]).await {
            Ok(removed) => {
                if removed.is_empty() {
                    debug!("Delete of {} record {} matched nothing", table, id);
                } else {
                    info!("Deleted {} record {} by user: {}", table, id, user.id);
                }
            }
            Err(AppError::NotFound(_)) => {
                debug!("{} record {} already gone", table, id);
            }
            Err(e) => return Err(e),
        }

        self.invalidate(table);
        Ok(Mutation::persisted(true))
    }

    fn bookmark_filters(user_id: &str, item_id: &str, item_type: ItemType) -> Vec<Filter> {
        vec![
            Filter::eq("user_id", user_id),
            Filter::eq("item_id", item_id),
            Filter::eq("item_type", item_type.as_str()),
        ]
    }

    /// 切换书签，返回切换后是否已收藏
    pub async fn toggle_bookmark(
        &self,
        item_type: ItemType,
        item_id: &str,
        user_id: Option<&str>,
    ) -> Result<Mutation<bool>> {
        let user_id = user_id.ok_or_else(|| AppError::unauthorized("You must be logged in to bookmark items"))?;
        validate_record_id(item_id)?;

        let store = match self.live_store() {
            Some(store) => store,
            None => {
                self.simulate_latency().await;
                self.suppress_write(BOOKMARKS, "bookmark toggle");
                return Ok(Mutation::simulated(true));
            }
        };

        let filters = Self::bookmark_filters(user_id, item_id, item_type);
        let mut lookup = ListQuery::new().per_page(1);
        for filter in &filters {
            lookup = lookup.filter(filter.clone());
        }
        let existing = store.select(BOOKMARKS, &lookup).await?;

        let bookmarked = if existing.rows.is_empty() {
            let bookmark = Bookmark::new(user_id, item_id, item_type);
            match store.insert(BOOKMARKS, serde_json::to_value(&bookmark)?).await {
                Ok(_) => {
                    info!("Bookmarked {} {} for user: {}", item_type, item_id, user_id);
                    true
                }
                // 并发的重复点击由唯一约束兜底，视为已收藏
                Err(AppError::Conflict(_)) => {
                    debug!("Bookmark for {} {} already exists", item_type, item_id);
                    true
                }
                Err(e) => return Err(e),
            }
        } else {
            store.delete(BOOKMARKS, &filters).await?;
            info!("Removed bookmark on {} {} for user: {}", item_type, item_id, user_id);
            false
        };

        self.invalidate(BOOKMARKS);
        Ok(Mutation::persisted(bookmarked))
    }

    /// 是否已收藏；未登录或读取失败时返回 false
    pub async fn is_bookmarked(&self, item_type: ItemType, item_id: &str, user_id: Option<&str>) -> bool {
        let (store, user_id) = match (self.live_store(), user_id) {
            (Some(store), Some(user_id)) => (store, user_id),
            _ => return false,
        };

        let mut query = ListQuery::new().per_page(1);
        for filter in Self::bookmark_filters(user_id, item_id, item_type) {
            query = query.filter(filter);
        }
        match store.select(BOOKMARKS, &query).await {
            Ok(rows) => !rows.rows.is_empty(),
            Err(e) => {
                warn!("Bookmark lookup failed for {} {}: {}", item_type, item_id, e);
                false
            }
        }
    }

    /// 用户的全部书签及其关联条目，最新收藏在前
    pub async fn get_user_bookmarks(
        &self,
        user_id: Option<&str>,
        item_type: Option<ItemType>,
    ) -> Result<Vec<BookmarkWithItem>> {
        let (store, user_id) = match (self.live_store(), user_id) {
            (Some(store), Some(user_id)) => (store, user_id),
            (None, _) => {
                debug!("Demo mode: no stored bookmarks");
                return Ok(Vec::new());
            }
            (_, None) => return Ok(Vec::new()),
        };

        let mut query = ListQuery::new().eq("user_id", user_id).per_page(0);
        if let Some(item_type) = item_type {
            query = query.eq("item_type", item_type.as_str());
        }
        let rows = self.select_live(store, BOOKMARKS, &query).await?;
        let bookmarks = rows
            .rows
            .into_iter()
            .map(serde_json::from_value::<Bookmark>)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut wanted: HashMap<ItemType, Vec<Value>> = HashMap::new();
        for bookmark in &bookmarks {
            wanted
                .entry(bookmark.item_type)
                .or_default()
                .push(Value::String(bookmark.item_id.clone()));
        }

        let mut items: HashMap<(ItemType, String), Item> = HashMap::new();
        for (item_type, ids) in wanted {
            let query = ListQuery::new().filter(Filter::is_in("id", ids)).per_page(0);
            let rows = self.select_live(store, item_type.table(), &query).await?;
            for row in rows.rows {
                match Item::from_row(item_type, row) {
                    Ok(item) => {
                        items.insert((item_type, item.id().to_string()), item);
                    }
                    Err(e) => warn!("Skipping malformed {} row: {}", item_type, e),
                }
            }
        }

        Ok(bookmarks
            .into_iter()
            .map(|bookmark| {
                let item = items.get(&(bookmark.item_type, bookmark.item_id.clone())).cloned();
                BookmarkWithItem { bookmark, item }
            })
            .collect())
    }

    /// 以当前用户为发起人创建项目
    pub async fn create_project(&self, request: &CreateProjectRequest) -> Result<Mutation<Project>> {
        let user = self.require_user("create a project")?;
        request.validate()?;

        let project = Project {
            id: Uuid::new_v4().to_string(),
            title: request.title.trim().to_string(),
            description: request.description.trim().to_string(),
            owner_id: user.id,
            creator: None,
            skill_tags: request.skill_tags.clone(),
            roles_needed: request.roles_needed.clone(),
            deadline: deadline(request.deadline.as_deref())?,
            external_links: request.external_links.clone(),
            category: request.category.clone(),
            created_at: Utc::now(),
        };

        let mutation = self.create(ItemType::Project.table(), serde_json::to_value(&project)?).await?;
        Ok(Mutation {
            data: serde_json::from_value(mutation.data)?,
            persisted: mutation.persisted,
        })
    }

    /// 以当前用户为发布人发布零工
    pub async fn post_gig(&self, request: &CreateGigRequest) -> Result<Mutation<Gig>> {
        let user = self.require_user("post a gig")?;
        request.validate()?;

        let gig = Gig {
            id: Uuid::new_v4().to_string(),
            title: request.title.trim().to_string(),
            description: request.description.trim().to_string(),
            poster_id: user.id,
            poster: None,
            gig_type: request.gig_type,
            rate: request.rate.clone(),
            duration: request.duration.clone(),
            availability: request.availability.clone(),
            tags: request.tags.clone(),
            deadline: deadline(request.deadline.as_deref())?,
            created_at: Utc::now(),
        };

        let mutation = self.create(ItemType::Gig.table(), serde_json::to_value(&gig)?).await?;
        Ok(Mutation {
            data: serde_json::from_value(mutation.data)?,
            persisted: mutation.persisted,
        })
    }
}

fn fill_missing(row: &mut Map<String, Value>, key: &str, value: impl FnOnce() -> Value) {
    let missing = match row.get(key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    };
    if missing {
        row.insert(key.to_string(), value());
    }
}

fn merge_patch(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn deadline(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_date(text)
            .map(Some)
            .ok_or_else(|| AppError::Validation(format!("Invalid deadline: {}", text))),
    }
}
