use crate::models::{
    notification::Notification,
    record::{Event, ExternalLink, Gig, GigType, Item, ItemType, PersonSummary, Project, Scholarship},
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;
use tracing::debug;

const PEOPLE: [&str; 6] = [
    "Alex Johnson",
    "Morgan Smith",
    "Jamie Lee",
    "Taylor Reed",
    "Sam Chen",
    "Priya Patel",
];

const PROJECT_TEMPLATES: [(&str, &str, &str); 5] = [
    (
        "Student Community App",
        "Building a mobile app to connect students across campus for study groups and social events.",
        "Mobile App",
    ),
    (
        "Sustainability Tracker",
        "Creating a web app that helps students track and reduce their carbon footprint on campus.",
        "Web Development",
    ),
    (
        "AI Study Buddy",
        "An AI-powered study assistant that helps students create flashcards, quizzes, and study schedules.",
        "AI/ML",
    ),
    (
        "Campus Marketplace",
        "A peer-to-peer marketplace for textbooks, furniture and dorm essentials between students.",
        "Web Development",
    ),
    (
        "Open Lecture Notes",
        "Collaborative, searchable lecture notes with versioning and per-course discussion threads.",
        "Education",
    ),
];

const SKILL_SETS: [&[&str]; 5] = [
    &["react-native", "firebase", "ui-design"],
    &["react", "d3js", "node"],
    &["python", "machine-learning", "api-development"],
    &["typescript", "postgres", "stripe"],
    &["rust", "search", "markdown"],
];

const ROLE_SETS: [&[&str]; 5] = [
    &["Mobile Developer", "UI/UX Designer", "Backend Developer"],
    &["Frontend Developer", "Data Visualization Expert"],
    &["ML Engineer", "Backend Developer", "UX Researcher"],
    &["Full-stack Developer", "Product Designer"],
    &["Backend Developer", "Technical Writer"],
];

const GIG_TEMPLATES: [(&str, &str, GigType, &str, &str, &str); 5] = [
    (
        "Python Tutoring",
        "Offering Python programming tutoring for beginners. Can help with assignments and projects.",
        GigType::Offering,
        "$20/hr",
        "1-2 hours",
        "Weekends",
    ),
    (
        "Logo Design Needed",
        "Looking for someone to design a logo for my student organization. Must be creative and understand branding.",
        GigType::Seeking,
        "$50 flat rate",
        "One-time project",
        "Within 2 weeks",
    ),
    (
        "Mobile App UI Design",
        "Need help designing the UI for a new fitness tracking app aimed at college students.",
        GigType::Seeking,
        "$35/hr",
        "5-10 hours",
        "Weekdays after 4pm",
    ),
    (
        "Resume Review",
        "Offering detailed resume and cover letter reviews for internship applications in tech.",
        GigType::Offering,
        "$15 per review",
        "48 hour turnaround",
        "Evenings",
    ),
    (
        "Video Editing for Club Promo",
        "Seeking an editor to cut a two minute promotional video for the robotics club.",
        GigType::Seeking,
        "$80 flat rate",
        "One-time project",
        "Before end of month",
    ),
];

const GIG_TAG_SETS: [&[&str]; 5] = [
    &["python", "programming", "tutoring"],
    &["design", "logo", "branding"],
    &["ui-design", "mobile", "figma"],
    &["career", "writing", "review"],
    &["video", "editing", "marketing"],
];

const EVENT_TEMPLATES: [(&str, &str, &str, &str); 5] = [
    (
        "Campus Hack",
        "Annual hackathon focusing on solutions for campus life improvement. 24-hour event with prizes.",
        "University Student Center",
        "Computer Science Society",
    ),
    (
        "AI Innovation Challenge",
        "Create innovative AI solutions to real-world problems. Sponsored by tech companies with internship opportunities.",
        "Virtual Event",
        "AI Research Lab",
    ),
    (
        "Green Tech Hackathon",
        "Build sustainable tech solutions to address environmental challenges facing campuses today.",
        "Engineering Building",
        "Environmental Science Club",
    ),
    (
        "Design Systems Meetup",
        "An evening of talks on building and maintaining design systems for student products.",
        "London, UK",
        "Design Society",
    ),
    (
        "Women in Data Science",
        "Conference featuring talks and workshops from leading women in data science.",
        "Online",
        "WiDS Chapter",
    ),
];

const EVENT_TAG_SETS: [&[&str]; 5] = [
    &["hackathon", "beginner-friendly", "prizes"],
    &["ai", "machine-learning", "virtual"],
    &["sustainability", "green-tech", "iot"],
    &["design", "networking"],
    &["data-science", "conference", "online"],
];

const SCHOLARSHIP_TEMPLATES: [(&str, &str, &str, &str); 5] = [
    (
        "Future Tech Leaders Scholarship",
        "For undergraduate students pursuing degrees in computer science or related fields.",
        "$5,000",
        "Tech Foundation",
    ),
    (
        "Women in STEM Grant",
        "Supporting women pursuing careers in science, technology, engineering, or mathematics.",
        "$7,500",
        "Women's Tech Alliance",
    ),
    (
        "Global Innovation Fellowship",
        "For graduate students researching innovative solutions to global challenges.",
        "$10,000",
        "Global Innovation Fund",
    ),
    (
        "Cloud Computing Scholarship",
        "Covers certification costs and mentoring for students building cloud skills.",
        "$2,500",
        "Cloud Builders Network",
    ),
    (
        "Environmental Leadership Award",
        "For students leading sustainability initiatives on their campus or in their community.",
        "Fully Funded",
        "Green Futures Trust",
    ),
];

const SCHOLARSHIP_TAG_SETS: [&[&str]; 5] = [
    &["undergraduate", "computer-science", "merit-based"],
    &["women", "stem", "diversity"],
    &["graduate", "research", "international"],
    &["cloud", "certification"],
    &["sustainability", "leadership"],
];

const NOTIFICATION_TEMPLATES: [(&str, &str, &str); 4] = [
    ("New collaborator request", "Someone wants to join your project.", "project"),
    ("Gig response", "A student replied to your gig posting.", "gig"),
    ("Deadline approaching", "A bookmarked scholarship closes this week.", "scholarship"),
    ("Welcome to NextUP", "Complete your profile to get better matches.", "system"),
];

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn slug(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// 演示模式的样例数据生成器
///
/// 以创建时刻为锚点，`created_at = anchor - i 天`，同一个实例的重复调用结果完全相同。
#[derive(Debug, Clone)]
pub struct MockDataProvider {
    anchor: DateTime<Utc>,
}

impl MockDataProvider {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    pub fn anchored_at(anchor: DateTime<Utc>) -> Self {
        Self { anchor }
    }

    pub fn anchor(&self) -> DateTime<Utc> {
        self.anchor
    }

    fn created_at(&self, i: usize) -> DateTime<Utc> {
        self.anchor - Duration::days(i as i64)
    }

    fn future_date(&self, base_days: i64, step_days: i64, i: usize) -> NaiveDate {
        (self.anchor + Duration::days(base_days + step_days * i as i64)).date_naive()
    }

    /// 生成 `count` 条指定类型的条目
    pub fn generate(&self, item_type: ItemType, count: usize) -> Vec<Item> {
        debug!("Generating {} mock {} records", count, item_type);
        (0..count)
            .map(|i| match item_type {
                ItemType::Project => Item::Project(self.project(i)),
                ItemType::Gig => Item::Gig(self.gig(i)),
                ItemType::Event => Item::Event(self.event(i, "event")),
                ItemType::Hackathon => Item::Hackathon(self.event(i, "hackathon")),
                ItemType::Scholarship => Item::Scholarship(self.scholarship(i)),
            })
            .collect()
    }

    /// 以原始行的形式生成数据；没有样例的表返回空集
    pub fn generate_rows(&self, table: &str, count: usize) -> Vec<Value> {
        let item_type = match ItemType::from_table(table) {
            Some(item_type) => item_type,
            None => return Vec::new(),
        };
        self.generate(item_type, count)
            .into_iter()
            .filter_map(|item| {
                let value = match item {
                    Item::Project(p) => serde_json::to_value(p),
                    Item::Gig(g) => serde_json::to_value(g),
                    Item::Event(e) | Item::Hackathon(e) => serde_json::to_value(e),
                    Item::Scholarship(s) => serde_json::to_value(s),
                };
                value.ok()
            })
            .collect()
    }

    /// 生成演示通知，前两条为未读
    pub fn generate_notifications(&self, user_id: &str, count: usize) -> Vec<Notification> {
        (0..count)
            .map(|i| {
                let (title, message, kind) = NOTIFICATION_TEMPLATES[i % NOTIFICATION_TEMPLATES.len()];
                Notification {
                    id: format!("mock-notification-{}", i + 1),
                    user_id: user_id.to_string(),
                    title: title.to_string(),
                    message: message.to_string(),
                    notification_type: kind.to_string(),
                    is_read: i >= 2,
                    created_at: self.anchor - Duration::hours(6 * i as i64),
                    reference_id: (kind != "system").then(|| format!("mock-{}-{}", kind, i % 5 + 1)),
                    reference_type: (kind != "system").then(|| kind.to_string()),
                }
            })
            .collect()
    }

    fn project(&self, i: usize) -> Project {
        let (title, description, category) = PROJECT_TEMPLATES[i % PROJECT_TEMPLATES.len()];
        let round = i / PROJECT_TEMPLATES.len();
        let title = if round == 0 { title.to_string() } else { format!("{} {}", title, round + 1) };
        Project {
            id: format!("mock-project-{}", i + 1),
            external_links: vec![ExternalLink {
                label: "Repository".to_string(),
                url: format!("https://github.com/nextup-demo/{}", slug(&title)),
            }],
            title,
            description: description.to_string(),
            owner_id: format!("mock-user-{}", i % PEOPLE.len() + 1),
            creator: Some(PersonSummary {
                name: PEOPLE[i % PEOPLE.len()].to_string(),
                avatar: None,
            }),
            skill_tags: strings(SKILL_SETS[i % SKILL_SETS.len()]),
            roles_needed: strings(ROLE_SETS[i % ROLE_SETS.len()]),
            deadline: Some(self.future_date(30, 7, i)),
            category: Some(category.to_string()),
            created_at: self.created_at(i),
        }
    }

    fn gig(&self, i: usize) -> Gig {
        let (title, description, gig_type, rate, duration, availability) =
            GIG_TEMPLATES[i % GIG_TEMPLATES.len()];
        let round = i / GIG_TEMPLATES.len();
        Gig {
            id: format!("mock-gig-{}", i + 1),
            title: if round == 0 { title.to_string() } else { format!("{} {}", title, round + 1) },
            description: description.to_string(),
            poster_id: format!("mock-user-{}", (i + 3) % PEOPLE.len() + 1),
            poster: Some(PersonSummary {
                name: PEOPLE[(i + 3) % PEOPLE.len()].to_string(),
                avatar: None,
            }),
            gig_type,
            rate: rate.to_string(),
            duration: duration.to_string(),
            availability: availability.to_string(),
            tags: strings(GIG_TAG_SETS[i % GIG_TAG_SETS.len()]),
            deadline: None,
            created_at: self.created_at(i),
        }
    }

    fn event(&self, i: usize, kind: &str) -> Event {
        let (title, description, location, organizer) = EVENT_TEMPLATES[i % EVENT_TEMPLATES.len()];
        let date = self.future_date(7, 5, i);
        let title = format!("{} {}", title, date.format("%Y"));
        Event {
            id: format!("mock-{}-{}", kind, i + 1),
            link: format!("https://{}.example.com", slug(&title)),
            title,
            description: description.to_string(),
            date,
            location: location.to_string(),
            organizer: organizer.to_string(),
            tags: strings(EVENT_TAG_SETS[i % EVENT_TAG_SETS.len()]),
            created_at: self.created_at(i),
        }
    }

    fn scholarship(&self, i: usize) -> Scholarship {
        let (title, description, amount, organization) =
            SCHOLARSHIP_TEMPLATES[i % SCHOLARSHIP_TEMPLATES.len()];
        let round = i / SCHOLARSHIP_TEMPLATES.len();
        let title = if round == 0 { title.to_string() } else { format!("{} {}", title, round + 1) };
        Scholarship {
            id: format!("mock-scholarship-{}", i + 1),
            link: format!("https://{}.example.com", slug(&title)),
            title,
            description: description.to_string(),
            amount: amount.to_string(),
            deadline: Some(self.future_date(21, 10, i)),
            organization: organization.to_string(),
            tags: strings(SCHOLARSHIP_TAG_SETS[i % SCHOLARSHIP_TAG_SETS.len()]),
            created_at: self.created_at(i),
        }
    }
}

impl Default for MockDataProvider {
    fn default() -> Self {
        Self::new()
    }
}
