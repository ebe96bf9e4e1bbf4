use crate::error::{AppError, Result};
use crate::utils::serde_helpers::{lenient_date, lenient_date_opt};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// 所有可浏览实体的公共字段
pub trait Record {
    fn id(&self) -> &str;
    fn title(&self) -> &str;
    fn description(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

/// 可收藏 / 可展示的条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Project,
    Gig,
    Event,
    Hackathon,
    Scholarship,
}

impl ItemType {
    pub const ALL: [ItemType; 5] = [
        ItemType::Project,
        ItemType::Gig,
        ItemType::Event,
        ItemType::Hackathon,
        ItemType::Scholarship,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Project => "project",
            ItemType::Gig => "gig",
            ItemType::Event => "event",
            ItemType::Hackathon => "hackathon",
            ItemType::Scholarship => "scholarship",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            ItemType::Project => "projects",
            ItemType::Gig => "gigs",
            ItemType::Event => "events",
            ItemType::Hackathon => "hackathons",
            ItemType::Scholarship => "scholarships",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        ItemType::ALL.into_iter().find(|t| t.table() == table)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        ItemType::ALL
            .into_iter()
            .find(|t| t.as_str() == s || t.table() == s)
            .ok_or_else(|| AppError::Validation(format!("unknown item type: {}", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonSummary {
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ExternalLink {
    pub label: String,
    #[validate(url(message = "Please enter a valid URL"))]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "creator_id")]
    pub owner_id: String,
    #[serde(default)]
    pub creator: Option<PersonSummary>,
    #[serde(default)]
    pub skill_tags: Vec<String>,
    #[serde(default)]
    pub roles_needed: Vec<String>,
    #[serde(default, with = "lenient_date_opt")]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub external_links: Vec<ExternalLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GigType {
    Offering,
    Seeking,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gig {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub poster_id: String,
    #[serde(default)]
    pub poster: Option<PersonSummary>,
    pub gig_type: GigType,
    #[serde(default)]
    pub rate: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub availability: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, with = "lenient_date_opt")]
    pub deadline: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// 活动 / 黑客松（两类条目共用一个结构）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "lenient_date")]
    pub date: NaiveDate,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub organizer: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scholarship {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default, with = "lenient_date_opt")]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

macro_rules! impl_record {
    ($($ty:ty),*) => {
        $(impl Record for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn title(&self) -> &str {
                &self.title
            }

            fn description(&self) -> &str {
                &self.description
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }
        })*
    };
}

impl_record!(Project, Gig, Event, Scholarship);

/// 统一的条目类型，`item_type` 为判别字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum Item {
    Project(Project),
    Gig(Gig),
    Event(Event),
    Hackathon(Event),
    Scholarship(Scholarship),
}

/// 卡片渲染所需的元数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardMeta {
    pub item_type: ItemType,
    pub id: String,
    pub title: String,
    pub description: String,
    pub badge: String,
    pub subtitle: Option<String>,
    pub details: Vec<(String, String)>,
    pub tags: Vec<String>,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// 按 `item_type` 把存储中的原始行解码为对应变体
    pub fn from_row(item_type: ItemType, row: Value) -> Result<Self> {
        let item = match item_type {
            ItemType::Project => Item::Project(serde_json::from_value(row)?),
            ItemType::Gig => Item::Gig(serde_json::from_value(row)?),
            ItemType::Event => Item::Event(serde_json::from_value(row)?),
            ItemType::Hackathon => Item::Hackathon(serde_json::from_value(row)?),
            ItemType::Scholarship => Item::Scholarship(serde_json::from_value(row)?),
        };
        Ok(item)
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            Item::Project(_) => ItemType::Project,
            Item::Gig(_) => ItemType::Gig,
            Item::Event(_) => ItemType::Event,
            Item::Hackathon(_) => ItemType::Hackathon,
            Item::Scholarship(_) => ItemType::Scholarship,
        }
    }

    pub fn record(&self) -> &dyn Record {
        match self {
            Item::Project(p) => p,
            Item::Gig(g) => g,
            Item::Event(e) | Item::Hackathon(e) => e,
            Item::Scholarship(s) => s,
        }
    }

    pub fn id(&self) -> &str {
        self.record().id()
    }

    pub fn tags(&self) -> &[String] {
        match self {
            Item::Project(p) => &p.skill_tags,
            Item::Gig(g) => &g.tags,
            Item::Event(e) | Item::Hackathon(e) => &e.tags,
            Item::Scholarship(s) => &s.tags,
        }
    }

    pub fn card(&self) -> CardMeta {
        let record = self.record();
        let (badge, subtitle, details, link) = match self {
            Item::Project(p) => {
                let mut details = Vec::new();
                if !p.roles_needed.is_empty() {
                    details.push(("Roles".to_string(), p.roles_needed.join(", ")));
                }
                if let Some(deadline) = p.deadline {
                    details.push(("Deadline".to_string(), deadline.format("%b %d, %Y").to_string()));
                }
                (
                    p.category.clone().unwrap_or_else(|| "Project".to_string()),
                    p.creator.as_ref().map(|c| c.name.clone()),
                    details,
                    p.external_links.first().map(|l| l.url.clone()),
                )
            }
            Item::Gig(g) => {
                let badge = match g.gig_type {
                    GigType::Offering => "Offering",
                    GigType::Seeking => "Seeking",
                };
                let details: Vec<(String, String)> = [("Rate", &g.rate), ("Duration", &g.duration), ("Availability", &g.availability)]
                    .into_iter()
                    .filter(|(_, value)| !value.is_empty())
                    .map(|(label, value)| (label.to_string(), value.clone()))
                    .collect();
                (badge.to_string(), g.poster.as_ref().map(|p| p.name.clone()), details, None)
            }
            Item::Event(e) | Item::Hackathon(e) => {
                let badge = if matches!(self, Item::Hackathon(_)) { "Hackathon" } else { "Event" };
                let details = vec![
                    ("Date".to_string(), e.date.format("%b %d, %Y").to_string()),
                    ("Location".to_string(), e.location.clone()),
                ];
                (badge.to_string(), Some(e.organizer.clone()), details, non_empty(&e.link))
            }
            Item::Scholarship(s) => {
                let mut details = vec![("Amount".to_string(), s.amount.clone())];
                if let Some(deadline) = s.deadline {
                    details.push(("Deadline".to_string(), deadline.format("%b %d, %Y").to_string()));
                }
                ("Scholarship".to_string(), Some(s.organization.clone()), details, non_empty(&s.link))
            }
        };

        CardMeta {
            item_type: self.item_type(),
            id: record.id().to_string(),
            title: record.title().to_string(),
            description: record.description().to_string(),
            badge,
            subtitle,
            details,
            tags: self.tags().to_vec(),
            link,
            created_at: record.created_at(),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
