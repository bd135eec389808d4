use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Remote collections exposed by the board API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Posts,
    Comments,
    Likes,
    Users,
}

impl CollectionKind {
    pub fn as_path(&self) -> &'static str {
        match self {
            CollectionKind::Posts => "posts",
            CollectionKind::Comments => "comments",
            CollectionKind::Likes => "likes",
            CollectionKind::Users => "users",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CollectionKind::Posts => "Posts",
            CollectionKind::Comments => "Comments",
            CollectionKind::Likes => "Likes",
            CollectionKind::Users => "Users",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LikeState {
    pub likes: i64,
    pub liked: bool,
}

/// A cached copy of a remote record.
///
/// Capabilities an item does not have keep the default implementations, so a
/// mutation that needs them is rejected instead of silently doing nothing.
pub trait Item: Clone + fmt::Debug + DeserializeOwned + Send + 'static {
    const KIND: CollectionKind;

    fn id(&self) -> &str;

    fn owner_id(&self) -> Option<&str> {
        None
    }

    fn like_state(&self) -> Option<LikeState> {
        None
    }

    fn set_like_state(&mut self, _state: LikeState) {}

    fn content(&self) -> Option<&str> {
        None
    }

    fn set_content(&mut self, _content: String) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    pub liked_by_user: bool,
}

impl Item for Post {
    const KIND: CollectionKind = CollectionKind::Posts;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn like_state(&self) -> Option<LikeState> {
        Some(LikeState {
            likes: self.likes,
            liked: self.liked_by_user,
        })
    }

    fn set_like_state(&mut self, state: LikeState) {
        self.likes = state.likes;
        self.liked_by_user = state.liked;
    }

    fn content(&self) -> Option<&str> {
        Some(&self.content)
    }

    fn set_content(&mut self, content: String) {
        self.content = content;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRef {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Comment rows come in three shapes (thread, per-user, firehose); the
/// optional references cover all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user: Option<UserRef>,
    #[serde(default)]
    pub post: Option<PostRef>,
}

impl Comment {
    pub fn author_name(&self) -> &str {
        self.user
            .as_ref()
            .and_then(|user| user.name.as_deref())
            .unwrap_or("Anonymous")
    }
}

impl Item for Comment {
    const KIND: CollectionKind = CollectionKind::Comments;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or_else(|| self.user.as_ref().map(|user| user.id.as_str()))
    }

    fn content(&self) -> Option<&str> {
        Some(&self.content)
    }

    fn set_content(&mut self, content: String) {
        self.content = content;
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Item for Like {
    const KIND: CollectionKind = CollectionKind::Likes;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default, alias = "name")]
    pub username: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub about: Option<String>,
}

impl Item for User {
    const KIND: CollectionKind = CollectionKind::Users;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

/// Body of `GET likes/on/<postId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeSummary {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub already_liked: bool,
}
