//! Screens built from one or more collection controllers plus the
//! single-record fetches that surround them.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, ensure, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::api::{self, Feed, FetchError, MutationOp, MutationOutcome};
use crate::controller::{
    failure_notice, CollectionController, ControllerOptions, Notification, PagerMode, Role,
    ViewStatus,
};
use crate::data::{
    BoardCollectionService, BoardEntityService, BoardMutationService, CollectionService,
    EntityService, MutationService,
};
use crate::merge::{CollectionState, Page, PageDescriptor};
use crate::model::{Comment, Item, LikeSummary, Post, User};
use crate::mutation::{
    MutationClass, MutationCoordinator, MutationError, MutationPolicies, Resolution,
};
use crate::overlay::OverlayStore;

/// Everything a screen needs to talk to the backend and the device.
#[derive(Clone)]
pub struct Services {
    pub posts: Arc<dyn CollectionService<Post>>,
    pub comments: Arc<dyn CollectionService<Comment>>,
    pub mutations: Option<Arc<dyn MutationService>>,
    pub entities: Arc<dyn EntityService>,
    pub overlay: OverlayStore,
    pub policies: MutationPolicies,
    pub page_size: u32,
    pub session_user: Option<String>,
}

impl Services {
    pub fn board(
        client: Arc<api::Client>,
        overlay: OverlayStore,
        policies: MutationPolicies,
        page_size: u32,
    ) -> Self {
        let collections = Arc::new(BoardCollectionService::new(client.clone()));
        Self {
            posts: collections.clone(),
            comments: collections,
            mutations: Some(Arc::new(BoardMutationService::new(client.clone()))),
            entities: Arc::new(BoardEntityService::new(client)),
            overlay,
            policies,
            page_size,
            session_user: None,
        }
    }

    fn options<T: Item>(
        &self,
        feed: Feed,
        collection: Arc<dyn CollectionService<T>>,
        mode: PagerMode,
        role: Role,
    ) -> ControllerOptions<T> {
        ControllerOptions {
            feed,
            mode,
            role,
            page_size: self.page_size,
            collection,
            mutations: self.mutations.clone(),
            overlay: Some(self.overlay.load(T::KIND)),
            policies: self.policies,
            session_user: self.session_user.clone(),
        }
    }

    fn posts_view(&self, feed: Feed, mode: PagerMode, role: Role) -> CollectionController<Post> {
        CollectionController::new(self.options(feed, self.posts.clone(), mode, role))
    }

    fn comments_view(&self, feed: Feed, role: Role) -> CollectionController<Comment> {
        CollectionController::new(self.options(
            feed,
            self.comments.clone(),
            PagerMode::Accumulate,
            role,
        ))
    }

    /// Global feed with numbered pages.
    pub fn front_page(&self) -> CollectionController<Post> {
        self.posts_view(Feed::AllPosts, PagerMode::PageJump, Role::Primary)
    }

    /// Same feed, read as one growing list.
    pub fn new_posts(&self) -> CollectionController<Post> {
        self.posts_view(Feed::AllPosts, PagerMode::Accumulate, Role::Primary)
    }

    pub fn past_posts(&self, before: DateTime<Utc>) -> PastFeed {
        PastFeed {
            inner: self.posts_view(Feed::PastPosts { before }, PagerMode::Accumulate, Role::Primary),
        }
    }

    pub fn search(&self, query: &str) -> SearchView {
        let mut view = SearchView {
            inner: self.posts_view(
                Feed::Search {
                    query: String::new(),
                },
                PagerMode::PageJump,
                Role::Primary,
            ),
        };
        view.set_query(query);
        view
    }

    pub fn user_submissions(&self, user_id: &str) -> CollectionController<Post> {
        self.posts_view(
            Feed::UserPosts {
                user_id: user_id.to_string(),
            },
            PagerMode::Accumulate,
            Role::Primary,
        )
    }

    pub fn user_comments(&self, user_id: &str) -> CollectionController<Comment> {
        self.comments_view(
            Feed::UserComments {
                user_id: user_id.to_string(),
            },
            Role::Primary,
        )
    }

    pub fn comment_firehose(&self) -> CollectionController<Comment> {
        self.comments_view(Feed::AllComments, Role::Primary)
    }

    pub fn thread_comments(&self, post_id: &str) -> CollectionController<Comment> {
        self.comments_view(
            Feed::PostComments {
                post_id: post_id.to_string(),
            },
            Role::Secondary,
        )
    }

    pub fn post_detail(&self, post_id: &str) -> PostDetail {
        PostDetail::new(self, post_id)
    }

    pub fn user_profile(&self, user_id: &str) -> UserProfile {
        UserProfile::new(self, user_id)
    }

    /// Create a post. The server's message is surfaced on failure.
    pub fn submit_post(&self, title: &str, content: &str) -> Result<Post> {
        let title = title.trim();
        ensure!(!title.is_empty(), "a title is required");
        let post = self
            .entities
            .create_post(title, content)
            .map_err(|err| anyhow!(err.user_message()))?;
        info!(post_id = %post.id, "post submitted");
        Ok(post)
    }
}

/// Posts created before a moving cutoff.
pub struct PastFeed {
    inner: CollectionController<Post>,
}

impl PastFeed {
    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        match self.inner.feed() {
            Feed::PastPosts { before } => Some(*before),
            _ => None,
        }
    }

    pub fn set_cutoff(&mut self, before: DateTime<Utc>) -> bool {
        self.inner.set_feed(Feed::PastPosts { before })
    }

    /// Move the cutoff to `days` before now and start over.
    pub fn go_back(&mut self, days: u32) -> bool {
        let before = Utc::now() - chrono::Duration::days(i64::from(days));
        self.set_cutoff(before)
    }
}

impl Deref for PastFeed {
    type Target = CollectionController<Post>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for PastFeed {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

pub struct SearchView {
    inner: CollectionController<Post>,
}

impl SearchView {
    pub fn query(&self) -> &str {
        match self.inner.feed() {
            Feed::Search { query } => query,
            _ => "",
        }
    }

    /// A blank query clears the results instead of searching.
    pub fn set_query(&mut self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            self.inner.clear();
            return false;
        }
        if query == self.query() && self.inner.descriptor().is_some() {
            return false;
        }
        let feed = Feed::Search {
            query: query.to_string(),
        };
        if !self.inner.set_feed(feed) {
            self.inner.goto_page(1);
        }
        true
    }
}

impl Deref for SearchView {
    type Target = CollectionController<Post>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for SearchView {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

enum DetailResponse {
    Post(Result<Post, FetchError>),
    Likes(Result<LikeSummary, FetchError>),
    Identity(Result<Option<User>, FetchError>),
    Like {
        ticket: u64,
        result: Result<MutationOutcome, FetchError>,
    },
    Comment(Result<Comment, FetchError>),
}

/// One post with its like summary and its comment thread.
pub struct PostDetail {
    post_id: String,
    entities: Arc<dyn EntityService>,
    mutations: Option<Arc<dyn MutationService>>,
    post: CollectionState<Post>,
    like_summary: Option<LikeSummary>,
    votes: MutationCoordinator<Post>,
    comments: CollectionController<Comment>,
    session_user: Option<String>,
    status: ViewStatus,
    notifications: Vec<Notification>,
    fetches: usize,
    votes_in_flight: usize,
    cancel_flag: Arc<AtomicBool>,
    tx: Sender<(u64, DetailResponse)>,
    rx: Receiver<(u64, DetailResponse)>,
    epoch: u64,
}

impl PostDetail {
    fn new(services: &Services, post_id: &str) -> Self {
        let (tx, rx) = unbounded();
        Self {
            post_id: post_id.to_string(),
            entities: services.entities.clone(),
            mutations: services.mutations.clone(),
            post: CollectionState::new(),
            like_summary: None,
            votes: MutationCoordinator::new(services.policies),
            comments: services.thread_comments(post_id),
            session_user: services.session_user.clone(),
            status: ViewStatus::Idle,
            notifications: Vec::new(),
            fetches: 0,
            votes_in_flight: 0,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
            epoch: 0,
        }
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn post(&self) -> Option<&Post> {
        self.post.get(&self.post_id)
    }

    pub fn comments(&self) -> &CollectionController<Comment> {
        &self.comments
    }

    pub fn comments_mut(&mut self) -> &mut CollectionController<Comment> {
        &mut self.comments
    }

    pub fn status(&self) -> &ViewStatus {
        &self.status
    }

    pub fn session_user(&self) -> Option<&str> {
        self.session_user.as_deref()
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        let mut notes: Vec<_> = self.notifications.drain(..).collect();
        notes.extend(self.comments.take_notifications());
        notes
    }

    /// Fetch the post, its likes, the viewer and the first page of comments.
    pub fn load(&mut self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
        self.cancel_flag = Arc::new(AtomicBool::new(false));
        self.epoch = self.epoch.wrapping_add(1);
        self.fetches = 0;
        self.like_summary = None;
        self.status = ViewStatus::Loading;
        debug!(post_id = %self.post_id, epoch = self.epoch, "loading post detail");

        let id = self.post_id.clone();
        self.spawn(move |entities| DetailResponse::Post(entities.post(&id)));
        let id = self.post_id.clone();
        self.spawn(move |entities| DetailResponse::Likes(entities.like_summary(&id)));
        self.spawn(|entities| DetailResponse::Identity(entities.current_user()));
        self.comments.refresh();
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: FnOnce(&dyn EntityService) -> DetailResponse + Send + 'static,
    {
        self.fetches += 1;
        let epoch = self.epoch;
        let tx = self.tx.clone();
        let entities = self.entities.clone();
        let cancel_flag = self.cancel_flag.clone();
        thread::spawn(move || {
            let response = job(entities.as_ref());
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send((epoch, response));
        });
    }

    pub fn like(&mut self) -> Result<u64, MutationError> {
        self.vote(MutationOp::Like)
    }

    pub fn unlike(&mut self) -> Result<u64, MutationError> {
        self.vote(MutationOp::Unlike)
    }

    pub fn toggle_like(&mut self) -> Result<u64, MutationError> {
        match self.post().map(|post| post.liked_by_user) {
            Some(true) => self.unlike(),
            _ => self.like(),
        }
    }

    fn vote(&mut self, op: MutationOp) -> Result<u64, MutationError> {
        let Some(service) = self.mutations.clone() else {
            return Err(MutationError::Unavailable { kind: op.kind() });
        };
        let ticket = self.votes.begin(&mut self.post, &self.post_id, &op)?;
        let post_id = self.post_id.clone();
        let epoch = self.epoch;
        let tx = self.tx.clone();
        self.votes_in_flight += 1;
        thread::spawn(move || {
            let result = service.mutate(Post::KIND, &post_id, &op);
            let _ = tx.send((epoch, DetailResponse::Like { ticket, result }));
        });
        Ok(ticket)
    }

    /// Post a comment, then reload the thread so it shows up.
    pub fn add_comment(&mut self, content: &str) -> Result<()> {
        let content = content.trim().to_string();
        ensure!(!content.is_empty(), "a comment cannot be empty");
        ensure!(self.session_user.is_some(), "log in to comment");
        let post_id = self.post_id.clone();
        self.spawn(move |entities| DetailResponse::Comment(entities.create_comment(&post_id, &content)));
        Ok(())
    }

    pub fn edit_comment(&mut self, comment_id: &str, content: &str) -> Result<u64, MutationError> {
        self.comments.edit(comment_id, content)
    }

    pub fn delete_comment(&mut self, comment_id: &str) -> Result<u64, MutationError> {
        self.comments.delete(comment_id)
    }

    pub fn is_busy(&self) -> bool {
        self.fetches > 0 || self.votes_in_flight > 0 || self.comments.is_busy()
    }

    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok((epoch, response)) = self.rx.try_recv() {
            self.apply(epoch, response);
            handled += 1;
        }
        handled + self.comments.poll()
    }

    /// Block until the post, its side fetches and the comment list settle.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.fetches > 0 || self.votes_in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.rx.recv_timeout(remaining) {
                Ok((epoch, response)) => self.apply(epoch, response),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false
                }
            }
        }
        self.comments
            .wait(deadline.saturating_duration_since(Instant::now()))
    }

    fn apply(&mut self, epoch: u64, response: DetailResponse) {
        if let DetailResponse::Like { ticket, result } = response {
            self.votes_in_flight = self.votes_in_flight.saturating_sub(1);
            if let Resolution::Failed {
                record,
                error,
                reverted,
            } = self.votes.resolve(&mut self.post, ticket, result)
            {
                self.notifications
                    .push(failure_notice(&record, &error, reverted));
            }
            return;
        }
        if epoch != self.epoch {
            debug!(post_id = %self.post_id, epoch, current = self.epoch, "discarding stale detail response");
            return;
        }
        self.fetches = self.fetches.saturating_sub(1);

        match response {
            DetailResponse::Post(Ok(post)) => {
                self.votes.invalidate();
                self.post.replace(Page {
                    items: vec![post],
                    descriptor: PageDescriptor::new(1, 1),
                });
                self.votes.reconcile(&mut self.post);
                self.apply_like_summary();
                self.status = ViewStatus::Idle;
            }
            DetailResponse::Post(Err(err)) => {
                warn!(post_id = %self.post_id, error = %err, "post fetch failed");
                self.votes.invalidate();
                self.post.reset();
                self.status = ViewStatus::Failed(format!(
                    "Could not load the post: {}",
                    err.user_message()
                ));
            }
            DetailResponse::Likes(Ok(summary)) => {
                self.like_summary = Some(summary);
                self.apply_like_summary();
            }
            DetailResponse::Likes(Err(err)) => {
                warn!(post_id = %self.post_id, error = %err, "like summary unavailable");
            }
            DetailResponse::Identity(Ok(user)) => {
                let user_id = user.map(|user| user.id);
                self.comments.set_session_user(user_id.clone());
                self.session_user = user_id;
            }
            DetailResponse::Identity(Err(err)) => {
                warn!(error = %err, "identity lookup failed; continuing anonymously");
            }
            DetailResponse::Comment(Ok(comment)) => {
                info!(post_id = %self.post_id, comment_id = %comment.id, "comment added");
                self.notifications.push(Notification::info("Comment added"));
                self.comments.refresh();
            }
            DetailResponse::Comment(Err(err)) => {
                self.notifications.push(Notification::error(format!(
                    "Could not add comment: {}",
                    err.user_message()
                )));
            }
            DetailResponse::Like { .. } => {}
        }
    }
}

impl PostDetail {
    /// The summary wins over the post body's counters unless a vote of ours
    /// is still in flight.
    fn apply_like_summary(&mut self) {
        let Some(summary) = self.like_summary else {
            return;
        };
        if self.votes.is_pending(&self.post_id, MutationClass::Vote) {
            return;
        }
        if let Some(post) = self.post.get_mut(&self.post_id) {
            post.likes = summary.total;
            post.liked_by_user = summary.already_liked;
        }
    }
}

impl Drop for PostDetail {
    fn drop(&mut self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileTab {
    Submissions,
    Comments,
}

/// A user's record with tabs for their posts and comments.
pub struct UserProfile {
    user_id: String,
    entities: Arc<dyn EntityService>,
    user: Option<User>,
    status: ViewStatus,
    tab: ProfileTab,
    submissions: CollectionController<Post>,
    comments: CollectionController<Comment>,
    pending: Option<Receiver<Result<User, FetchError>>>,
}

impl UserProfile {
    fn new(services: &Services, user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            entities: services.entities.clone(),
            user: None,
            status: ViewStatus::Idle,
            tab: ProfileTab::Submissions,
            submissions: services.user_submissions(user_id),
            comments: services.user_comments(user_id),
            pending: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn status(&self) -> &ViewStatus {
        &self.status
    }

    pub fn tab(&self) -> ProfileTab {
        self.tab
    }

    pub fn submissions(&self) -> &CollectionController<Post> {
        &self.submissions
    }

    pub fn comments(&self) -> &CollectionController<Comment> {
        &self.comments
    }

    pub fn submissions_mut(&mut self) -> &mut CollectionController<Post> {
        &mut self.submissions
    }

    pub fn comments_mut(&mut self) -> &mut CollectionController<Comment> {
        &mut self.comments
    }

    /// Fetch the user and the first page of the active tab.
    pub fn load(&mut self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let entities = self.entities.clone();
        let user_id = self.user_id.clone();
        thread::spawn(move || {
            let _ = tx.send(entities.user(&user_id));
        });
        self.pending = Some(rx);
        self.status = ViewStatus::Loading;
        self.reload_tab();
    }

    /// Switching tabs restarts the newly selected list from page 1.
    pub fn select_tab(&mut self, tab: ProfileTab) {
        self.tab = tab;
        self.reload_tab();
    }

    fn reload_tab(&mut self) {
        match self.tab {
            ProfileTab::Submissions => {
                self.comments.cancel();
                self.submissions.refresh();
            }
            ProfileTab::Comments => {
                self.submissions.cancel();
                self.comments.refresh();
            }
        }
    }

    pub fn load_more(&mut self) -> bool {
        match self.tab {
            ProfileTab::Submissions => self.submissions.load_more(),
            ProfileTab::Comments => self.comments.load_more(),
        }
    }

    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        if let Some(rx) = self.pending.as_ref() {
            if let Ok(result) = rx.try_recv() {
                self.pending = None;
                self.apply_user(result);
                handled += 1;
            }
        }
        handled + self.submissions.poll() + self.comments.poll()
    }

    pub fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        if let Some(rx) = self.pending.take() {
            match rx.recv_timeout(timeout) {
                Ok(result) => self.apply_user(result),
                Err(_) => {
                    self.pending = Some(rx);
                    return false;
                }
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.tab {
            ProfileTab::Submissions => self.submissions.wait(remaining),
            ProfileTab::Comments => self.comments.wait(remaining),
        }
    }

    fn apply_user(&mut self, result: Result<User, FetchError>) {
        match result {
            Ok(user) => {
                self.user = Some(user);
                self.status = ViewStatus::Idle;
            }
            Err(err) => {
                warn!(user_id = %self.user_id, error = %err, "user fetch failed");
                self.user = None;
                self.status = ViewStatus::Failed(format!(
                    "Could not load user {}: {}",
                    self.user_id,
                    err.user_message()
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RecordingMutationService, StaticCollectionService, StaticEntityService};
    use crate::mutation::FailurePolicy;

    const WAIT: Duration = Duration::from_secs(5);

    fn post(id: &str, likes: i64) -> Post {
        Post {
            id: id.into(),
            title: format!("post {id}"),
            content: "body".into(),
            created_at: Utc::now(),
            updated_at: None,
            user_id: Some("u1".into()),
            username: Some("ada".into()),
            likes,
            comments_count: 0,
            liked_by_user: false,
        }
    }

    fn comment(id: &str, owner: &str) -> Comment {
        Comment {
            id: id.into(),
            content: format!("comment {id}"),
            created_at: Utc::now(),
            user_id: Some(owner.into()),
            user: None,
            post: None,
        }
    }

    fn user(id: &str) -> User {
        User {
            id: id.into(),
            username: format!("user-{id}"),
            created_at: None,
            about: None,
        }
    }

    struct Fixture {
        services: Services,
        posts: Arc<StaticCollectionService<Post>>,
        comments: Arc<StaticCollectionService<Comment>>,
        entities: Arc<StaticEntityService>,
        mutations: Arc<RecordingMutationService>,
    }

    fn fixture() -> Fixture {
        let posts = Arc::new(StaticCollectionService::new(
            (1..=7).map(|n| post(&format!("p{n}"), 0)).collect(),
        ));
        let comments = Arc::new(StaticCollectionService::new(vec![
            comment("c1", "u1"),
            comment("c2", "u2"),
        ]));
        let entities = Arc::new(StaticEntityService::default());
        entities.posts.lock().push(post("p1", 4));
        entities.users.lock().push(user("u1"));
        *entities.me.lock() = Some(user("u1"));
        *entities.like_summary.lock() = LikeSummary {
            total: 4,
            already_liked: false,
        };
        let mutations = Arc::new(RecordingMutationService::new());
        let services = Services {
            posts: posts.clone(),
            comments: comments.clone(),
            mutations: Some(mutations.clone()),
            entities: entities.clone(),
            overlay: OverlayStore::in_memory(),
            policies: MutationPolicies::default(),
            page_size: 5,
            session_user: None,
        };
        Fixture {
            services,
            posts,
            comments,
            entities,
            mutations,
        }
    }

    #[test]
    fn post_detail_loads_post_likes_identity_and_thread() {
        let fx = fixture();
        let mut detail = fx.services.post_detail("p1");
        detail.load();
        assert!(detail.wait(WAIT));

        assert_eq!(detail.status(), &ViewStatus::Idle);
        let post = detail.post().unwrap();
        assert_eq!((post.likes, post.liked_by_user), (4, false));
        assert_eq!(detail.session_user(), Some("u1"));
        assert_eq!(detail.comments().visible().len(), 2);
        assert!(detail.comments().can_modify("c1"));
        assert!(!detail.comments().can_modify("c2"));
    }

    #[test]
    fn missing_post_fails_the_screen() {
        let fx = fixture();
        let mut detail = fx.services.post_detail("nope");
        detail.load();
        detail.wait(WAIT);
        assert!(matches!(detail.status(), ViewStatus::Failed(_)));
        assert!(detail.post().is_none());
    }

    #[test]
    fn thread_failure_leaves_post_visible() {
        let fx = fixture();
        fx.comments.fail_with(Some(FetchError::HttpStatus {
            code: 500,
            message: None,
        }));
        let mut detail = fx.services.post_detail("p1");
        detail.load();
        detail.wait(WAIT);
        assert_eq!(detail.status(), &ViewStatus::Idle);
        assert!(detail.post().is_some());
        assert!(detail.comments().visible().is_empty());
        assert_eq!(detail.comments().status(), &ViewStatus::Idle);
    }

    #[test]
    fn post_detail_like_is_optimistic() {
        let fx = fixture();
        let mut detail = fx.services.post_detail("p1");
        detail.load();
        detail.wait(WAIT);

        detail.toggle_like().unwrap();
        assert_eq!(detail.post().unwrap().likes, 5);
        assert!(detail.wait(WAIT));
        assert_eq!(detail.post().unwrap().likes, 5);
        assert_eq!(fx.mutations.calls()[0].1, "p1");
    }

    #[test]
    fn reloaded_post_keeps_a_pending_like() {
        let fx = fixture();
        let mut detail = fx.services.post_detail("p1");
        detail.load();
        detail.wait(WAIT);

        detail.like().unwrap();
        let epoch = detail.epoch;
        detail.apply(epoch, DetailResponse::Post(Ok(post("p1", 4))));
        let reloaded = detail.post().unwrap();
        assert_eq!((reloaded.likes, reloaded.liked_by_user), (5, true));

        assert!(detail.wait(WAIT));
        let confirmed = detail.post().unwrap();
        assert_eq!((confirmed.likes, confirmed.liked_by_user), (5, true));
        assert!(detail.take_notifications().is_empty());
    }

    #[test]
    fn post_detail_like_failure_reverts_by_default() {
        let mut fx = fixture();
        fx.services.policies = MutationPolicies {
            unlike: FailurePolicy::ReportOnly,
            ..MutationPolicies::default()
        };
        fx.mutations.respond_with(Err(FetchError::NetworkUnreachable("down".into())));
        let mut detail = fx.services.post_detail("p1");
        detail.load();
        detail.wait(WAIT);
        detail.like().unwrap();
        detail.wait(WAIT);
        let post = detail.post().unwrap();
        assert_eq!((post.likes, post.liked_by_user), (4, false));
        assert_eq!(detail.take_notifications().len(), 1);
    }

    #[test]
    fn adding_a_comment_refreshes_the_thread() {
        let fx = fixture();
        let mut detail = fx.services.post_detail("p1");
        detail.load();
        detail.wait(WAIT);

        fx.comments.push(comment("c3", "u1"));
        detail.add_comment("  hello  ").unwrap();
        assert!(detail.wait(WAIT));
        assert_eq!(detail.comments().visible().len(), 3);
        assert_eq!(
            fx.entities.created.lock()[0],
            api::NewItem::Comment {
                post_id: "p1".into(),
                content: "hello".into()
            }
        );
        let notes = detail.take_notifications();
        assert_eq!(notes, vec![Notification::info("Comment added")]);
        assert!(detail.add_comment("   ").is_err());
    }

    #[test]
    fn profile_tabs_reset_to_first_page() {
        let fx = fixture();
        let mut profile = fx.services.user_profile("u1");
        profile.load();
        assert!(profile.wait(WAIT));
        assert_eq!(profile.user().unwrap().username, "user-u1");
        assert_eq!(profile.submissions().visible().len(), 5);

        assert!(profile.load_more());
        profile.wait(WAIT);
        assert_eq!(profile.submissions().visible().len(), 7);

        profile.select_tab(ProfileTab::Comments);
        profile.wait(WAIT);
        assert_eq!(profile.comments().visible().len(), 2);

        profile.select_tab(ProfileTab::Submissions);
        profile.wait(WAIT);
        assert_eq!(profile.submissions().visible().len(), 5);
        assert_eq!(profile.submissions().current_page(), Some(1));
    }

    #[test]
    fn unknown_user_fails_the_profile() {
        let fx = fixture();
        let mut profile = fx.services.user_profile("ghost");
        profile.load();
        profile.wait(WAIT);
        assert!(matches!(profile.status(), ViewStatus::Failed(_)));
    }

    #[test]
    fn past_feed_go_back_moves_cutoff_and_resets() {
        let fx = fixture();
        let mut past = fx.services.past_posts(Utc::now());
        past.refresh();
        past.wait(WAIT);
        assert_eq!(past.visible().len(), 5);

        let before = past.cutoff().unwrap();
        assert!(past.go_back(3));
        let after = past.cutoff().unwrap();
        assert!(after < before - chrono::Duration::days(2));
        assert!(past.state().is_empty());
        past.wait(WAIT);
        assert_eq!(past.visible().len(), 5);
        assert!(matches!(
            fx.posts.requests().last(),
            Some((Feed::PastPosts { .. }, 1))
        ));
    }

    #[test]
    fn search_ignores_blank_queries() {
        let fx = fixture();
        let mut search = fx.services.search("  ");
        assert_eq!(fx.posts.request_count(), 0);
        assert!(search.visible().is_empty());

        assert!(search.set_query("rust"));
        search.wait(WAIT);
        assert_eq!(search.query(), "rust");
        assert_eq!(search.visible().len(), 5);
        assert_eq!(search.total_pages(), Some(2));

        assert!(search.next_page());
        search.wait(WAIT);
        assert_eq!(search.current_page(), Some(2));
        assert_eq!(search.visible().len(), 2);

        assert!(!search.set_query(""));
        assert!(search.visible().is_empty());
    }

    #[test]
    fn submit_requires_title_and_surfaces_server_message() {
        let fx = fixture();
        assert!(fx.services.submit_post("  ", "body").is_err());
        let created = fx.services.submit_post("Hello", "body").unwrap();
        assert_eq!(created.title, "Hello");

        *fx.entities.failure.lock() = Some(FetchError::HttpStatus {
            code: 400,
            message: Some("Title too long".into()),
        });
        let err = fx.services.submit_post("Hello", "body").unwrap_err();
        assert!(err.to_string().contains("Title too long"));
    }

    #[test]
    fn hidden_posts_stay_hidden_across_screens() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            crate::storage::Store::open(crate::storage::Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        let mut fx = fixture();
        fx.services.overlay = OverlayStore::new(store, crate::overlay::DEFAULT_KEY_PREFIX);

        let mut front = fx.services.front_page();
        front.goto_page(1);
        front.wait(WAIT);
        assert!(front.hide("p2").unwrap());
        assert!(front.visible().iter().all(|p| p.id != "p2"));

        let mut newest = fx.services.new_posts();
        newest.refresh();
        newest.wait(WAIT);
        assert_eq!(newest.state().len(), 5);
        assert!(newest.visible().iter().all(|p| p.id != "p2"));
    }
}
