pub mod bookmark;
pub mod forms;
pub mod notification;
pub mod query;
pub mod realtime;
pub mod record;
pub mod user;

pub use bookmark::{Bookmark, BookmarkWithItem};
pub use notification::{FeedPhase, Notification, NotificationSnapshot};
pub use query::{DataSource, Filter, FilterOp, ListQuery, Listing, Mutation, OrderBy, Rows};
pub use realtime::{ChangeEvent, ChangeFilter, ChangeKind};
pub use record::{Item, ItemType, Record};
pub use user::{AuthRedirect, AuthUser, Session, SessionState, UserProfile};
