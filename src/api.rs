use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{COOKIE, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::merge::{Page, PageDescriptor};
use crate::model::{CollectionKind, Item, Like, LikeSummary, Post, User};
use crate::mutation::MutationKind;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/";

/// Exact confirmation body the backend sends when a like is removed.
pub const UNLIKE_CONFIRMATION: &str = "Like on the given post deleted suceesfully";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    Anonymous,
    Cookie(String),
    Bearer(String),
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub credentials: Credentials,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("server responded with status {code}{}", status_suffix(.message))]
    HttpStatus { code: u16, message: Option<String> },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("request could not be built: {0}")]
    InvalidRequest(String),
}

fn status_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Short text suitable for a notification.
    pub fn user_message(&self) -> String {
        match self {
            FetchError::HttpStatus {
                message: Some(message),
                ..
            } if !message.trim().is_empty() => message.clone(),
            FetchError::NetworkUnreachable(_) => "Could not reach the server.".to_string(),
            other => other.to_string(),
        }
    }
}

/// A listable remote collection plus its filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Feed {
    AllPosts,
    PastPosts { before: DateTime<Utc> },
    UserPosts { user_id: String },
    UserComments { user_id: String },
    PostComments { post_id: String },
    AllComments,
    Search { query: String },
}

impl Feed {
    pub fn kind(&self) -> CollectionKind {
        match self {
            Feed::AllPosts | Feed::PastPosts { .. } | Feed::UserPosts { .. } | Feed::Search { .. } => {
                CollectionKind::Posts
            }
            Feed::UserComments { .. } | Feed::PostComments { .. } | Feed::AllComments => {
                CollectionKind::Comments
            }
        }
    }

    fn segments(&self) -> Vec<&str> {
        match self {
            Feed::AllPosts => vec!["posts", "getAllposts"],
            Feed::PastPosts { .. } => vec!["posts", "pastposts"],
            Feed::UserPosts { user_id } => vec!["posts", "byUser", user_id],
            Feed::UserComments { user_id } => vec!["comments", "byUser", user_id],
            Feed::PostComments { post_id } => vec!["comments", "on", post_id],
            Feed::AllComments => vec!["comments", "all"],
            Feed::Search { .. } => vec!["posts", "search"],
        }
    }

    fn params(&self, page: u32, limit: u32) -> Vec<(String, String)> {
        let mut params = Vec::new();
        match self {
            Feed::Search { query } => {
                params.push(("q".to_string(), query.clone()));
                params.push(("page".to_string(), page.to_string()));
                params.push(("pageSize".to_string(), limit.to_string()));
                return params;
            }
            Feed::PastPosts { before } => {
                params.push((
                    "before".to_string(),
                    before.to_rfc3339_opts(SecondsFormat::Millis, true),
                ));
            }
            _ => {}
        }
        params.push(("page".to_string(), page.to_string()));
        params.push(("limit".to_string(), limit.to_string()));
        params
    }

    /// Stable text identifying collection and filter, used in logs.
    pub fn key(&self) -> String {
        let mut key = self.segments().join("/");
        match self {
            Feed::PastPosts { before } => {
                key.push_str(&format!("?before={}", before.to_rfc3339()));
            }
            Feed::Search { query } => key.push_str(&format!("?q={query}")),
            _ => {}
        }
        key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOp {
    Like,
    Unlike,
    Edit { content: String },
    Delete,
}

impl MutationOp {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationOp::Like => MutationKind::Like,
            MutationOp::Unlike => MutationKind::Unlike,
            MutationOp::Edit { .. } => MutationKind::Edit,
            MutationOp::Delete => MutationKind::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Liked(Like),
    Unliked,
    Edited,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewItem {
    Post { title: String, content: String },
    Comment { post_id: String, content: String },
}

impl NewItem {
    pub fn kind(&self) -> CollectionKind {
        match self {
            NewItem::Post { .. } => CollectionKind::Posts,
            NewItem::Comment { .. } => CollectionKind::Comments,
        }
    }
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    credentials: Credentials,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("board client user agent required");
        }
        let mut base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        if base_url.cannot_be_a_base() {
            bail!("board client base url cannot carry paths: {base}");
        }
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
            credentials: config.credentials,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn list_page<T: Item>(
        &self,
        feed: &Feed,
        page: u32,
        limit: u32,
    ) -> Result<Page<T>, FetchError> {
        if feed.kind() != T::KIND {
            return Err(FetchError::MalformedResponse(format!(
                "feed {} lists {}, not {}",
                feed.key(),
                feed.kind(),
                T::KIND
            )));
        }
        let params = feed.params(page, limit);
        let resp = self.request(Method::GET, &feed.segments(), &params, None)?;
        let envelope: ListEnvelope = decode(resp)?;
        let descriptor = envelope.descriptor(page, limit);

        let raw = envelope.data;
        let received = raw.len();
        let items = raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<T>(value) {
                Ok(item) => Some(item),
                Err(err) => {
                    debug!(feed = %feed.key(), error = %err, "dropping malformed list entry");
                    None
                }
            })
            .collect::<Vec<_>>();
        if items.len() < received {
            debug!(
                feed = %feed.key(),
                dropped = received - items.len(),
                "list page contained entries of the wrong shape"
            );
        }

        Ok(Page { items, descriptor })
    }

    pub fn get_post(&self, id: &str) -> Result<Post, FetchError> {
        let resp = self.request(Method::GET, &["posts", "getpost", id], &[], None)?;
        let envelope: DataEnvelope<Post> = decode(resp)?;
        Ok(envelope.data)
    }

    pub fn get_user(&self, id: &str) -> Result<User, FetchError> {
        let resp = self.request(Method::GET, &["users", id], &[], None)?;
        let envelope: DataEnvelope<User> = decode(resp)?;
        Ok(envelope.data)
    }

    pub fn like_summary(&self, post_id: &str) -> Result<LikeSummary, FetchError> {
        let resp = self.request(Method::GET, &["likes", "on", post_id], &[], None)?;
        decode(resp)
    }

    /// The signed-in user, or `None` when the backend refuses the identity
    /// call.
    pub fn current_user(&self) -> Result<Option<User>, FetchError> {
        match self.request(Method::GET, &["api", "auth", "user"], &[], None) {
            Ok(resp) => decode(resp).map(Some),
            Err(FetchError::HttpStatus { code, .. }) => {
                debug!(status = code, "identity call rejected; continuing anonymously");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn create<T: Item>(&self, new_item: &NewItem) -> Result<T, FetchError> {
        if new_item.kind() != T::KIND {
            return Err(FetchError::MalformedResponse(format!(
                "create of {} cannot yield {}",
                new_item.kind(),
                T::KIND
            )));
        }
        let resp = match new_item {
            NewItem::Post { title, content } => self.request(
                Method::POST,
                &["posts", "create-post"],
                &[],
                Some(&serde_json::json!({ "title": title, "content": content })),
            )?,
            NewItem::Comment { post_id, content } => self.request(
                Method::POST,
                &["comments", "on", post_id],
                &[],
                Some(&serde_json::json!({ "content": content })),
            )?,
        };
        let envelope: DataEnvelope<T> = decode(resp)?;
        Ok(envelope.data)
    }

    pub fn mutate(
        &self,
        collection: CollectionKind,
        item_id: &str,
        op: &MutationOp,
    ) -> Result<MutationOutcome, FetchError> {
        match op {
            MutationOp::Like => {
                let resp = self.request(Method::POST, &["likes", "on", item_id], &[], None)?;
                let body: LikeResponse = decode(resp)?;
                match body.like {
                    Some(value) if !value.is_null() => serde_json::from_value(value)
                        .map(MutationOutcome::Liked)
                        .map_err(|err| {
                            FetchError::MalformedResponse(format!("like confirmation: {err}"))
                        }),
                    _ => Err(FetchError::MalformedResponse(
                        "like confirmation missing".to_string(),
                    )),
                }
            }
            MutationOp::Unlike => {
                let resp =
                    self.request(Method::DELETE, &["likes", "deletelike", item_id], &[], None)?;
                let body: MessageBody = decode(resp)?;
                if body.message.as_deref() == Some(UNLIKE_CONFIRMATION) {
                    Ok(MutationOutcome::Unliked)
                } else {
                    Err(FetchError::MalformedResponse(format!(
                        "unexpected unlike confirmation: {:?}",
                        body.message
                    )))
                }
            }
            MutationOp::Edit { content } => {
                self.request(
                    Method::PATCH,
                    &[collection.as_path(), item_id],
                    &[],
                    Some(&serde_json::json!({ "content": content })),
                )?;
                Ok(MutationOutcome::Edited)
            }
            MutationOp::Delete => {
                self.request(Method::DELETE, &[collection.as_path(), item_id], &[], None)?;
                Ok(MutationOutcome::Deleted)
            }
        }
    }

    fn endpoint(&self, segments: &[&str], params: &[(String, String)]) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                FetchError::InvalidRequest(format!("base url {} cannot carry paths", self.base_url))
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
        params: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Response, FetchError> {
        let url = self.endpoint(segments, params)?;
        debug!(%method, %url, "board request");

        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        req = match &self.credentials {
            Credentials::Anonymous => req,
            Credentials::Cookie(cookie) => req.header(COOKIE, cookie.clone()),
            Credentials::Bearer(token) => req.bearer_auth(token),
        };
        if let Some(json) = body {
            req = req.json(json);
        }

        let resp = req
            .send()
            .map_err(|err| FetchError::NetworkUnreachable(err.to_string()))?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let code = resp.status().as_u16();
        let text = resp.text().unwrap_or_default();
        let message = serde_json::from_str::<MessageBody>(&text)
            .ok()
            .and_then(|body| body.message);
        Err(FetchError::HttpStatus { code, message })
    }
}

fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, FetchError> {
    let text = resp
        .text()
        .map_err(|err| FetchError::NetworkUnreachable(err.to_string()))?;
    serde_json::from_str(&text).map_err(|err| FetchError::MalformedResponse(err.to_string()))
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    data: Vec<Value>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

impl ListEnvelope {
    fn descriptor(&self, requested_page: u32, requested_limit: u32) -> PageDescriptor {
        let Some(pagination) = self.pagination.as_ref() else {
            return PageDescriptor::new(requested_page, requested_limit);
        };
        let limit = pagination.limit.unwrap_or(requested_limit);
        let total_pages = pagination.total_pages.or_else(|| {
            let total = pagination.total?;
            if limit == 0 {
                return None;
            }
            Some(total.div_ceil(u64::from(limit)) as u32)
        });
        PageDescriptor {
            page_number: pagination.page.unwrap_or(requested_page),
            limit,
            total_items: pagination.total,
            total_pages,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    total_pages: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct LikeResponse {
    #[serde(default)]
    like: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    message: Option<String>,
}
