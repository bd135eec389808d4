use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::api::{self, Feed, FetchError, MutationOp, MutationOutcome, NewItem};
use crate::merge::{Page, PageDescriptor};
use crate::model::{CollectionKind, Comment, Item, Like, LikeSummary, Post, User};

pub trait CollectionService<T: Item>: Send + Sync {
    fn list_page(&self, feed: &Feed, page: u32, limit: u32) -> Result<Page<T>, FetchError>;
}

pub trait MutationService: Send + Sync {
    fn mutate(
        &self,
        collection: CollectionKind,
        item_id: &str,
        op: &MutationOp,
    ) -> Result<MutationOutcome, FetchError>;
}

pub trait EntityService: Send + Sync {
    fn post(&self, id: &str) -> Result<Post, FetchError>;
    fn user(&self, id: &str) -> Result<User, FetchError>;
    fn like_summary(&self, post_id: &str) -> Result<LikeSummary, FetchError>;
    fn current_user(&self) -> Result<Option<User>, FetchError>;
    fn create_post(&self, title: &str, content: &str) -> Result<Post, FetchError>;
    fn create_comment(&self, post_id: &str, content: &str) -> Result<Comment, FetchError>;
}

pub struct BoardCollectionService {
    client: Arc<api::Client>,
}

impl BoardCollectionService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl<T: Item> CollectionService<T> for BoardCollectionService {
    fn list_page(&self, feed: &Feed, page: u32, limit: u32) -> Result<Page<T>, FetchError> {
        self.client.list_page(feed, page, limit)
    }
}

pub struct BoardMutationService {
    client: Arc<api::Client>,
}

impl BoardMutationService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl MutationService for BoardMutationService {
    fn mutate(
        &self,
        collection: CollectionKind,
        item_id: &str,
        op: &MutationOp,
    ) -> Result<MutationOutcome, FetchError> {
        self.client.mutate(collection, item_id, op)
    }
}

pub struct BoardEntityService {
    client: Arc<api::Client>,
}

impl BoardEntityService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl EntityService for BoardEntityService {
    fn post(&self, id: &str) -> Result<Post, FetchError> {
        self.client.get_post(id)
    }

    fn user(&self, id: &str) -> Result<User, FetchError> {
        self.client.get_user(id)
    }

    fn like_summary(&self, post_id: &str) -> Result<LikeSummary, FetchError> {
        self.client.like_summary(post_id)
    }

    fn current_user(&self) -> Result<Option<User>, FetchError> {
        self.client.current_user()
    }

    fn create_post(&self, title: &str, content: &str) -> Result<Post, FetchError> {
        self.client.create(&NewItem::Post {
            title: title.to_string(),
            content: content.to_string(),
        })
    }

    fn create_comment(&self, post_id: &str, content: &str) -> Result<Comment, FetchError> {
        self.client.create(&NewItem::Comment {
            post_id: post_id.to_string(),
            content: content.to_string(),
        })
    }
}

/// Serves pages out of a fixed list, whatever the feed. Useful offline and
/// in tests.
pub struct StaticCollectionService<T> {
    items: Mutex<Vec<T>>,
    report_totals: bool,
    failure: Mutex<Option<FetchError>>,
    requests: Mutex<Vec<(Feed, u32)>>,
}

impl<T: Item> StaticCollectionService<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Mutex::new(items),
            report_totals: true,
            failure: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer without `total`/`totalPages`, like the per-user endpoints.
    pub fn without_totals(mut self) -> Self {
        self.report_totals = false;
        self
    }

    pub fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    pub fn fail_with(&self, error: Option<FetchError>) {
        *self.failure.lock() = error;
    }

    pub fn requests(&self) -> Vec<(Feed, u32)> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl<T: Item> CollectionService<T> for StaticCollectionService<T> {
    fn list_page(&self, feed: &Feed, page: u32, limit: u32) -> Result<Page<T>, FetchError> {
        self.requests.lock().push((feed.clone(), page));
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }

        let items = self.items.lock();
        let limit = limit.max(1);
        let start = (page.saturating_sub(1) as usize).saturating_mul(limit as usize);
        let end = (start + limit as usize).min(items.len());
        let slice = if start < items.len() {
            items[start..end].to_vec()
        } else {
            Vec::new()
        };
        let total = items.len() as u64;
        let descriptor = if self.report_totals {
            PageDescriptor {
                page_number: page,
                limit,
                total_items: Some(total),
                total_pages: Some(total.div_ceil(u64::from(limit)) as u32),
            }
        } else {
            PageDescriptor::new(page, limit)
        };
        Ok(Page {
            items: slice,
            descriptor,
        })
    }
}

pub type MutationCall = (CollectionKind, String, MutationOp);

/// Records every mutation and answers from a script, confirming by default.
#[derive(Default)]
pub struct RecordingMutationService {
    calls: Mutex<Vec<MutationCall>>,
    script: Mutex<VecDeque<Result<MutationOutcome, FetchError>>>,
}

impl RecordingMutationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_with(&self, result: Result<MutationOutcome, FetchError>) {
        self.script.lock().push_back(result);
    }

    pub fn calls(&self) -> Vec<MutationCall> {
        self.calls.lock().clone()
    }
}

impl MutationService for RecordingMutationService {
    fn mutate(
        &self,
        collection: CollectionKind,
        item_id: &str,
        op: &MutationOp,
    ) -> Result<MutationOutcome, FetchError> {
        self.calls
            .lock()
            .push((collection, item_id.to_string(), op.clone()));
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        Ok(match op {
            MutationOp::Like => MutationOutcome::Liked(Like {
                id: format!("like-{item_id}"),
                post_id: Some(item_id.to_string()),
                ..Like::default()
            }),
            MutationOp::Unlike => MutationOutcome::Unliked,
            MutationOp::Edit { .. } => MutationOutcome::Edited,
            MutationOp::Delete => MutationOutcome::Deleted,
        })
    }
}

/// In-memory single-record endpoints.
#[derive(Default)]
pub struct StaticEntityService {
    pub posts: Mutex<Vec<Post>>,
    pub users: Mutex<Vec<User>>,
    pub like_summary: Mutex<LikeSummary>,
    pub me: Mutex<Option<User>>,
    pub created: Mutex<Vec<NewItem>>,
    pub failure: Mutex<Option<FetchError>>,
}

impl StaticEntityService {
    fn check(&self) -> Result<(), FetchError> {
        match self.failure.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn not_found() -> FetchError {
        FetchError::HttpStatus {
            code: 404,
            message: Some("Not found".to_string()),
        }
    }
}

impl EntityService for StaticEntityService {
    fn post(&self, id: &str) -> Result<Post, FetchError> {
        self.check()?;
        self.posts
            .lock()
            .iter()
            .find(|post| post.id == id)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    fn user(&self, id: &str) -> Result<User, FetchError> {
        self.check()?;
        self.users
            .lock()
            .iter()
            .find(|user| user.id == id)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    fn like_summary(&self, _post_id: &str) -> Result<LikeSummary, FetchError> {
        self.check()?;
        Ok(*self.like_summary.lock())
    }

    fn current_user(&self) -> Result<Option<User>, FetchError> {
        Ok(self.me.lock().clone())
    }

    fn create_post(&self, title: &str, content: &str) -> Result<Post, FetchError> {
        self.check()?;
        let mut created = self.created.lock();
        created.push(NewItem::Post {
            title: title.to_string(),
            content: content.to_string(),
        });
        let me = self.me.lock().clone();
        Ok(Post {
            id: format!("new-{}", created.len()),
            title: title.to_string(),
            content: content.to_string(),
            created_at: chrono::Utc::now(),
            updated_at: None,
            user_id: me.as_ref().map(|user| user.id.clone()),
            username: me.map(|user| user.username),
            likes: 0,
            comments_count: 0,
            liked_by_user: false,
        })
    }

    fn create_comment(&self, post_id: &str, content: &str) -> Result<Comment, FetchError> {
        self.check()?;
        let mut created = self.created.lock();
        created.push(NewItem::Comment {
            post_id: post_id.to_string(),
            content: content.to_string(),
        });
        Ok(Comment {
            id: format!("new-{}", created.len()),
            content: content.to_string(),
            created_at: chrono::Utc::now(),
            user_id: self.me.lock().as_ref().map(|user| user.id.clone()),
            user: None,
            post: None,
        })
    }
}
