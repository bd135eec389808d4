//! One generic view controller per list-bearing screen.
//!
//! The controller owns the accumulated state for a single feed, decides when
//! to fetch, and applies responses that worker threads send back over a
//! channel. Every list request is tagged with the controller's epoch; a
//! response whose epoch is no longer current is dropped, so a slow page can
//! never overwrite state produced by a newer filter or page jump.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::api::{Feed, FetchError, MutationOp, MutationOutcome};
use crate::data::{CollectionService, MutationService};
use crate::merge::{CollectionState, Page, PageDescriptor};
use crate::model::Item;
use crate::mutation::{
    MutationCoordinator, MutationError, MutationKind, MutationPolicies, MutationRecord, Resolution,
};
use crate::overlay::{OverlaySet, OverlayStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerMode {
    /// "Load more" appends each page to one growing list.
    Accumulate,
    /// Jumping to page N replaces the visible set.
    PageJump,
}

/// Whether a failed fetch blocks the screen or degrades quietly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewStatus {
    Idle,
    Loading,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Transient message for the display layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

pub(crate) fn failure_notice<T>(record: &MutationRecord<T>, error: &FetchError, reverted: bool) -> Notification {
    let undone = if reverted { " (change undone)" } else { "" };
    Notification::error(format!(
        "Could not {} item {}: {}{}",
        record.kind,
        record.item_id,
        error.user_message(),
        undone
    ))
}

pub struct ControllerOptions<T: Item> {
    pub feed: Feed,
    pub mode: PagerMode,
    pub role: Role,
    pub page_size: u32,
    pub collection: Arc<dyn CollectionService<T>>,
    pub mutations: Option<Arc<dyn MutationService>>,
    pub overlay: Option<OverlaySet>,
    pub policies: MutationPolicies,
    pub session_user: Option<String>,
}

impl<T: Item> ControllerOptions<T> {
    pub fn new(feed: Feed, collection: Arc<dyn CollectionService<T>>) -> Self {
        Self {
            feed,
            mode: PagerMode::Accumulate,
            role: Role::Primary,
            page_size: 5,
            collection,
            mutations: None,
            overlay: None,
            policies: MutationPolicies::default(),
            session_user: None,
        }
    }
}

enum Response<T> {
    Page {
        epoch: u64,
        page: u32,
        result: Result<Page<T>, FetchError>,
    },
    Mutation {
        ticket: u64,
        result: Result<MutationOutcome, FetchError>,
    },
}

struct PendingPage {
    epoch: u64,
    page: u32,
    cancel_flag: Arc<AtomicBool>,
}

pub struct CollectionController<T: Item> {
    feed: Feed,
    mode: PagerMode,
    role: Role,
    page_size: u32,
    collection: Arc<dyn CollectionService<T>>,
    mutations: Option<Arc<dyn MutationService>>,
    overlay: OverlaySet,
    state: CollectionState<T>,
    coordinator: MutationCoordinator<T>,
    session_user: Option<String>,
    epoch: u64,
    pending_page: Option<PendingPage>,
    in_flight_mutations: usize,
    status: ViewStatus,
    notifications: VecDeque<Notification>,
    response_tx: Sender<Response<T>>,
    response_rx: Receiver<Response<T>>,
}

impl<T: Item> CollectionController<T> {
    pub fn new(options: ControllerOptions<T>) -> Self {
        let (response_tx, response_rx) = unbounded();
        let overlay = options
            .overlay
            .unwrap_or_else(|| OverlayStore::in_memory().load(T::KIND));
        Self {
            feed: options.feed,
            mode: options.mode,
            role: options.role,
            page_size: options.page_size.max(1),
            collection: options.collection,
            mutations: options.mutations,
            overlay,
            state: CollectionState::new(),
            coordinator: MutationCoordinator::new(options.policies),
            session_user: options.session_user,
            epoch: 0,
            pending_page: None,
            in_flight_mutations: 0,
            status: ViewStatus::Idle,
            notifications: VecDeque::new(),
            response_tx,
            response_rx,
        }
    }

    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    pub fn mode(&self) -> PagerMode {
        self.mode
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn state(&self) -> &CollectionState<T> {
        &self.state
    }

    pub fn status(&self) -> &ViewStatus {
        &self.status
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn overlay(&self) -> &OverlaySet {
        &self.overlay
    }

    pub fn coordinator(&self) -> &MutationCoordinator<T> {
        &self.coordinator
    }

    pub fn is_loading(&self) -> bool {
        self.pending_page.is_some()
    }

    /// A page request or a mutation is still waiting for the server.
    pub fn is_busy(&self) -> bool {
        self.pending_page.is_some() || self.in_flight_mutations > 0
    }

    pub fn has_more(&self) -> bool {
        match self.mode {
            PagerMode::Accumulate => self.state.has_more(),
            PagerMode::PageJump => match (self.current_page(), self.total_pages()) {
                (Some(page), Some(total)) => page < total,
                _ => self.state.has_more(),
            },
        }
    }

    pub fn current_page(&self) -> Option<u32> {
        self.state.descriptor().map(|d| d.page_number)
    }

    pub fn total_pages(&self) -> Option<u32> {
        self.state.descriptor().and_then(|d| d.total_pages)
    }

    pub fn descriptor(&self) -> Option<&PageDescriptor> {
        self.state.descriptor()
    }

    /// Items the display layer should show: loaded, minus locally hidden.
    pub fn visible(&self) -> Vec<&T> {
        self.state
            .items()
            .iter()
            .filter(|item| !self.overlay.is_suppressed(item.id()))
            .collect()
    }

    pub fn session_user(&self) -> Option<&str> {
        self.session_user.as_deref()
    }

    pub fn set_session_user(&mut self, user_id: Option<String>) {
        self.session_user = user_id;
    }

    /// Edit and delete controls are only offered on the session user's items.
    pub fn can_modify(&self, item_id: &str) -> bool {
        match (self.state.get(item_id), self.session_user.as_deref()) {
            (Some(item), Some(user)) => item.owner_id() == Some(user),
            _ => false,
        }
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    /// Start over from page 1 (accumulating) or reload the current page
    /// (page jump).
    pub fn refresh(&mut self) {
        match self.mode {
            PagerMode::Accumulate => {
                self.reset_state();
                self.request_page(1);
            }
            PagerMode::PageJump => {
                let page = self.current_page().unwrap_or(1);
                self.request_page(page);
            }
        }
    }

    /// Switch to a different filter. Returns false when it is unchanged.
    pub fn set_feed(&mut self, feed: Feed) -> bool {
        if feed == self.feed {
            return false;
        }
        debug!(from = %self.feed.key(), to = %feed.key(), "feed changed");
        self.feed = feed;
        self.reset_state();
        self.request_page(1);
        true
    }

    /// Drop everything and stop any in-flight list request.
    pub fn clear(&mut self) {
        self.cancel();
        self.reset_state();
        self.status = ViewStatus::Idle;
    }

    /// Pending mutations keep running, but their snapshots no longer belong
    /// to what is shown.
    fn reset_state(&mut self) {
        self.state.reset();
        self.coordinator.invalidate();
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending_page.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        self.epoch = self.epoch.wrapping_add(1);
        if matches!(self.status, ViewStatus::Loading) {
            self.status = ViewStatus::Idle;
        }
    }

    /// Fetch the next page. Returns false when nothing was requested.
    pub fn load_more(&mut self) -> bool {
        if self.mode == PagerMode::PageJump {
            return self.next_page();
        }
        if self.pending_page.is_some() || !self.state.has_more() {
            return false;
        }
        let next = self.current_page().map(|page| page + 1).unwrap_or(1);
        self.request_page(next);
        true
    }

    pub fn goto_page(&mut self, page: u32) -> bool {
        let mut page = page.max(1);
        if let Some(total) = self.total_pages() {
            page = page.min(total.max(1));
        }
        if self.mode == PagerMode::Accumulate {
            // jumping is only meaningful when old pages are dropped
            self.reset_state();
        }
        self.request_page(page);
        true
    }

    pub fn next_page(&mut self) -> bool {
        match (self.current_page(), self.total_pages()) {
            (Some(page), Some(total)) if page >= total => false,
            (Some(page), _) => self.goto_page(page + 1),
            (None, _) => self.goto_page(1),
        }
    }

    pub fn prev_page(&mut self) -> bool {
        match self.current_page() {
            Some(page) if page > 1 => self.goto_page(page - 1),
            _ => false,
        }
    }

    fn request_page(&mut self, page: u32) {
        if let Some(pending) = self.pending_page.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
        self.epoch = self.epoch.wrapping_add(1);
        let epoch = self.epoch;
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_page = Some(PendingPage {
            epoch,
            page,
            cancel_flag: cancel_flag.clone(),
        });
        self.status = ViewStatus::Loading;
        debug!(feed = %self.feed.key(), page, epoch, "requesting page");

        let tx = self.response_tx.clone();
        let service = self.collection.clone();
        let feed = self.feed.clone();
        let limit = self.page_size;
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = service.list_page(&feed, page, limit);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(Response::Page {
                epoch,
                page,
                result,
            });
        });
    }

    pub fn like(&mut self, item_id: &str) -> Result<u64, MutationError> {
        self.mutate(item_id, MutationOp::Like)
    }

    pub fn unlike(&mut self, item_id: &str) -> Result<u64, MutationError> {
        self.mutate(item_id, MutationOp::Unlike)
    }

    pub fn toggle_like(&mut self, item_id: &str) -> Result<u64, MutationError> {
        let liked = self
            .state
            .get(item_id)
            .and_then(|item| item.like_state())
            .map(|like| like.liked)
            .unwrap_or(false);
        if liked {
            self.unlike(item_id)
        } else {
            self.like(item_id)
        }
    }

    pub fn edit(&mut self, item_id: &str, content: &str) -> Result<u64, MutationError> {
        self.ensure_owner(item_id, MutationKind::Edit)?;
        self.mutate(
            item_id,
            MutationOp::Edit {
                content: content.to_string(),
            },
        )
    }

    pub fn delete(&mut self, item_id: &str) -> Result<u64, MutationError> {
        self.ensure_owner(item_id, MutationKind::Delete)?;
        self.mutate(item_id, MutationOp::Delete)
    }

    /// Hide an item on this device only.
    pub fn hide(&mut self, item_id: &str) -> Result<bool> {
        self.overlay.suppress(item_id)
    }

    pub fn unhide(&mut self, item_id: &str) -> Result<bool> {
        self.overlay.unsuppress(item_id)
    }

    fn ensure_owner(&self, item_id: &str, kind: MutationKind) -> Result<(), MutationError> {
        if !self.state.contains(item_id) {
            return Err(MutationError::UnknownItem(item_id.to_string()));
        }
        if self.can_modify(item_id) {
            Ok(())
        } else {
            Err(MutationError::NotOwner {
                item_id: item_id.to_string(),
                kind,
            })
        }
    }

    fn mutate(&mut self, item_id: &str, op: MutationOp) -> Result<u64, MutationError> {
        let Some(service) = self.mutations.clone() else {
            return Err(MutationError::Unavailable { kind: op.kind() });
        };
        let ticket = self.coordinator.begin(&mut self.state, item_id, &op)?;
        self.in_flight_mutations += 1;

        let tx = self.response_tx.clone();
        let item_id = item_id.to_string();
        thread::spawn(move || {
            let result = service.mutate(T::KIND, &item_id, &op);
            let _ = tx.send(Response::Mutation { ticket, result });
        });
        Ok(ticket)
    }

    /// Apply every response that has already arrived. Returns how many were
    /// taken off the channel.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(response) = self.response_rx.try_recv() {
            self.apply(response);
            handled += 1;
        }
        handled
    }

    /// Block until nothing is outstanding. Returns false on timeout.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.response_rx.recv_timeout(remaining) {
                Ok(response) => self.apply(response),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false
                }
            }
        }
        true
    }

    fn apply(&mut self, response: Response<T>) {
        match response {
            Response::Page {
                epoch,
                page,
                result,
            } => self.apply_page(epoch, page, result),
            Response::Mutation { ticket, result } => {
                self.in_flight_mutations = self.in_flight_mutations.saturating_sub(1);
                match self.coordinator.resolve(&mut self.state, ticket, result) {
                    Resolution::Confirmed(_) => {}
                    Resolution::Failed {
                        record,
                        error,
                        reverted,
                    } => {
                        self.notifications
                            .push_back(failure_notice(&record, &error, reverted));
                    }
                    Resolution::Unknown { ticket } => {
                        debug!(ticket, "response for unknown mutation ignored");
                    }
                }
            }
        }
    }

    fn apply_page(&mut self, epoch: u64, page: u32, result: Result<Page<T>, FetchError>) {
        let current = match &self.pending_page {
            Some(pending) if pending.epoch == epoch => pending.page,
            _ => {
                debug!(feed = %self.feed.key(), page, epoch, current = self.epoch, "discarding stale page");
                return;
            }
        };
        self.pending_page = None;

        match result {
            Ok(fetched) => {
                let report = match self.mode {
                    PagerMode::Accumulate => self.state.merge(fetched),
                    PagerMode::PageJump => {
                        self.coordinator.invalidate();
                        self.state.replace(fetched)
                    }
                };
                self.coordinator.reconcile(&mut self.state);
                self.status = ViewStatus::Idle;
                debug!(
                    feed = %self.feed.key(),
                    page = current,
                    appended = report.appended,
                    duplicates = report.duplicates,
                    has_more = self.state.has_more(),
                    "page merged"
                );
            }
            Err(err) => match self.role {
                Role::Primary => {
                    warn!(feed = %self.feed.key(), page = current, error = %err, "primary list failed");
                    self.reset_state();
                    self.status = ViewStatus::Failed(format!(
                        "Failed to load {}: {}",
                        T::KIND.as_path(),
                        err.user_message()
                    ));
                }
                Role::Secondary => {
                    warn!(feed = %self.feed.key(), page = current, error = %err, "secondary list failed");
                    self.status = ViewStatus::Idle;
                }
            },
        }
    }
}

impl<T: Item> Drop for CollectionController<T> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending_page.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RecordingMutationService, StaticCollectionService};
    use crate::model::{Comment, Post};
    use crate::mutation::FailurePolicy;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    const WAIT: Duration = Duration::from_secs(5);

    fn post(n: usize) -> Post {
        Post {
            id: format!("p{n}"),
            title: format!("post {n}"),
            content: String::new(),
            created_at: Utc::now(),
            updated_at: None,
            user_id: Some(if n % 2 == 0 { "u1" } else { "u2" }.to_string()),
            username: None,
            likes: 4,
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

    fn posts(count: usize) -> Vec<Post> {
        (1..=count).map(post).collect()
    }

    fn controller(
        service: Arc<StaticCollectionService<Post>>,
        mode: PagerMode,
    ) -> CollectionController<Post> {
        let mut options = ControllerOptions::new(Feed::AllPosts, service);
        options.mode = mode;
        CollectionController::new(options)
    }

    #[test]
    fn accumulating_pager_reads_whole_feed() {
        let service = Arc::new(StaticCollectionService::new(posts(12)));
        let mut feed = controller(service.clone(), PagerMode::Accumulate);

        assert!(feed.load_more());
        assert!(feed.wait(WAIT));
        while feed.has_more() {
            assert!(feed.load_more());
            assert!(feed.wait(WAIT));
        }
        assert!(!feed.load_more());

        assert_eq!(feed.state().len(), 12);
        assert_eq!(service.request_count(), 3);
        let ids: HashSet<_> = feed.state().items().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids.len(), 12);
        assert_eq!(feed.status(), &ViewStatus::Idle);
    }

    #[test]
    fn short_page_stops_feed_without_totals() {
        let service = Arc::new(StaticCollectionService::new(posts(7)).without_totals());
        let mut feed = controller(service.clone(), PagerMode::Accumulate);
        feed.refresh();
        feed.wait(WAIT);
        assert!(feed.has_more());
        feed.load_more();
        feed.wait(WAIT);
        assert!(!feed.has_more());
        assert_eq!(feed.state().len(), 7);
    }

    #[test]
    fn page_jump_replaces_visible_set() {
        let service = Arc::new(StaticCollectionService::new(posts(12)));
        let mut feed = controller(service, PagerMode::PageJump);
        feed.goto_page(1);
        feed.wait(WAIT);
        assert!(feed.next_page());
        feed.wait(WAIT);
        let ids: Vec<_> = feed.visible().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["p6", "p7", "p8", "p9", "p10"]);
        assert_eq!(feed.current_page(), Some(2));

        feed.goto_page(99);
        feed.wait(WAIT);
        assert_eq!(feed.current_page(), Some(3));
        assert!(!feed.has_more());
        assert!(!feed.next_page());
        assert!(feed.prev_page());
        feed.wait(WAIT);
        assert_eq!(feed.current_page(), Some(2));
    }

    /// Holds each request until the test releases its feed.
    struct GatedService {
        gates: Mutex<HashMap<String, crossbeam_channel::Receiver<()>>>,
    }

    impl CollectionService<Post> for GatedService {
        fn list_page(&self, feed: &Feed, page: u32, _limit: u32) -> Result<Page<Post>, FetchError> {
            let gate = self.gates.lock().get(&feed.key()).cloned();
            if let Some(gate) = gate {
                let _ = gate.recv_timeout(WAIT);
            }
            let mut item = post(1);
            item.id = format!("{}#{page}", feed.key());
            Ok(Page {
                items: vec![item],
                descriptor: PageDescriptor::new(page, 5),
            })
        }
    }

    #[test]
    fn superseded_request_never_overwrites_newer_feed() {
        let (release_a, gate_a) = crossbeam_channel::bounded(1);
        let feed_a = Feed::UserPosts {
            user_id: "a".into(),
        };
        let feed_b = Feed::UserPosts {
            user_id: "b".into(),
        };
        let service = Arc::new(GatedService {
            gates: Mutex::new(HashMap::from([(feed_a.key(), gate_a)])),
        });
        let mut controller =
            CollectionController::new(ControllerOptions::new(feed_a.clone(), service));
        controller.refresh();
        assert!(controller.set_feed(feed_b.clone()));
        assert!(controller.wait(WAIT));

        release_a.send(()).unwrap();
        thread::sleep(Duration::from_millis(50));
        controller.poll();

        let ids: Vec<_> = controller.visible().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec![format!("{}#1", feed_b.key())]);
        assert_eq!(controller.feed(), &feed_b);
    }

    #[test]
    fn late_response_with_old_epoch_is_discarded() {
        let service = Arc::new(StaticCollectionService::new(posts(3)));
        let mut feed = controller(service, PagerMode::Accumulate);
        feed.refresh();
        let stale_epoch = feed.epoch();
        feed.refresh();
        let mut stale = post(99);
        stale.id = "stale".into();
        feed.apply(Response::Page {
            epoch: stale_epoch,
            page: 1,
            result: Ok(Page {
                items: vec![stale],
                descriptor: PageDescriptor::new(1, 5),
            }),
        });
        assert!(feed.is_loading());
        assert!(feed.wait(WAIT));
        assert!(!feed.state().contains("stale"));
        assert_eq!(feed.state().len(), 3);
    }

    #[test]
    fn primary_failure_blocks_and_secondary_degrades() {
        let service = Arc::new(StaticCollectionService::new(posts(3)));
        service.fail_with(Some(FetchError::HttpStatus {
            code: 500,
            message: None,
        }));

        let mut primary = controller(service.clone(), PagerMode::Accumulate);
        primary.refresh();
        primary.wait(WAIT);
        assert!(matches!(primary.status(), ViewStatus::Failed(_)));
        assert!(primary.visible().is_empty());

        let mut options = ControllerOptions::new(Feed::AllPosts, service.clone() as Arc<dyn CollectionService<Post>>);
        options.role = Role::Secondary;
        let mut secondary = CollectionController::new(options);
        secondary.refresh();
        secondary.wait(WAIT);
        assert_eq!(secondary.status(), &ViewStatus::Idle);
        assert!(secondary.visible().is_empty());
    }

    fn with_mutations(
        items: Vec<Post>,
        mutations: Arc<RecordingMutationService>,
        policies: MutationPolicies,
    ) -> CollectionController<Post> {
        let mut options = ControllerOptions::new(
            Feed::AllPosts,
            Arc::new(StaticCollectionService::new(items)) as Arc<dyn CollectionService<Post>>,
        );
        options.mutations = Some(mutations);
        options.policies = policies;
        let mut controller = CollectionController::new(options);
        controller.refresh();
        assert!(controller.wait(WAIT));
        controller
    }

    #[test]
    fn optimistic_like_report_only_keeps_count_and_notifies() {
        let mutations = Arc::new(RecordingMutationService::new());
        mutations.respond_with(Err(FetchError::NetworkUnreachable("down".into())));
        let mut feed = with_mutations(
            posts(1),
            mutations.clone(),
            MutationPolicies::uniform(FailurePolicy::ReportOnly),
        );

        feed.like("p1").unwrap();
        let p = feed.state().get("p1").unwrap();
        assert_eq!((p.likes, p.liked_by_user), (5, true));

        assert!(feed.wait(WAIT));
        let p = feed.state().get("p1").unwrap();
        assert_eq!((p.likes, p.liked_by_user), (5, true));
        let notes = feed.take_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].level, NoticeLevel::Error);
        assert_eq!(mutations.calls()[0].2, MutationOp::Like);
    }

    #[test]
    fn optimistic_like_confirmed_and_reverted() {
        let mutations = Arc::new(RecordingMutationService::new());
        let mut feed = with_mutations(posts(2), mutations.clone(), MutationPolicies::default());
        feed.toggle_like("p1").unwrap();
        assert!(feed.wait(WAIT));
        let p = feed.state().get("p1").unwrap();
        assert_eq!((p.likes, p.liked_by_user), (5, true));
        assert!(feed.take_notifications().is_empty());

        mutations.respond_with(Err(FetchError::HttpStatus {
            code: 500,
            message: None,
        }));
        feed.like("p2").unwrap();
        assert!(feed.wait(WAIT));
        let p = feed.state().get("p2").unwrap();
        assert_eq!((p.likes, p.liked_by_user), (4, false));
        assert!(feed.take_notifications()[0].message.contains("change undone"));
    }

    #[test]
    fn mutations_survive_a_concurrent_page_merge() {
        let mutations = Arc::new(RecordingMutationService::new());
        let mut feed = with_mutations(posts(12), mutations, MutationPolicies::default());
        feed.like("p1").unwrap();
        feed.load_more();
        assert!(feed.wait(WAIT));
        assert_eq!(feed.state().get("p1").unwrap().likes, 5);
        assert_eq!(feed.state().len(), 10);
    }

    #[test]
    fn edit_and_delete_require_ownership() {
        let mutations = Arc::new(RecordingMutationService::new());
        let mut options = ControllerOptions::new(
            Feed::PostComments {
                post_id: "p1".into(),
            },
            Arc::new(StaticCollectionService::new(vec![
                comment("c1", "me"),
                comment("c2", "someone"),
            ])) as Arc<dyn CollectionService<Comment>>,
        );
        options.mutations = Some(mutations.clone());
        options.session_user = Some("me".into());
        let mut comments = CollectionController::new(options);
        comments.refresh();
        comments.wait(WAIT);

        assert!(comments.can_modify("c1"));
        assert!(!comments.can_modify("c2"));
        assert!(matches!(
            comments.delete("c2"),
            Err(MutationError::NotOwner { .. })
        ));
        comments.edit("c1", "updated").unwrap();
        assert_eq!(comments.state().get("c1").unwrap().content, "updated");
        comments.delete("c1").unwrap_err();
        comments.wait(WAIT);
        comments.delete("c1").unwrap();
        assert!(!comments.state().contains("c1"));
        comments.wait(WAIT);
        assert_eq!(mutations.calls().len(), 2);
    }

    #[test]
    fn failed_delete_stays_out_of_a_different_thread() {
        let mutations = Arc::new(RecordingMutationService::new());
        mutations.respond_with(Err(FetchError::HttpStatus {
            code: 500,
            message: None,
        }));
        let mut options = ControllerOptions::new(
            Feed::PostComments {
                post_id: "A".into(),
            },
            Arc::new(StaticCollectionService::new(vec![comment("cA", "me")]))
                as Arc<dyn CollectionService<Comment>>,
        );
        options.mutations = Some(mutations);
        options.session_user = Some("me".into());
        let mut comments = CollectionController::new(options);
        comments.refresh();
        assert!(comments.wait(WAIT));

        comments.delete("cA").unwrap();
        assert!(comments.set_feed(Feed::PostComments {
            post_id: "B".into(),
        }));
        comments.clear();
        assert!(comments.wait(WAIT));

        assert!(!comments.state().contains("cA"));
        assert!(comments.state().is_empty());
        let notes = comments.take_notifications();
        assert_eq!(notes.len(), 1);
        assert!(!notes[0].message.contains("change undone"));
    }

    #[test]
    fn hidden_items_are_filtered_from_view() {
        let service = Arc::new(StaticCollectionService::new(posts(3)));
        let mut feed = controller(service, PagerMode::Accumulate);
        feed.refresh();
        feed.wait(WAIT);
        assert!(feed.hide("p2").unwrap());
        let ids: Vec<_> = feed.visible().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
        assert_eq!(feed.state().len(), 3);
        feed.unhide("p2").unwrap();
        assert_eq!(feed.visible().len(), 3);
    }

    #[test]
    fn mutations_need_a_service() {
        let service = Arc::new(StaticCollectionService::new(posts(1)));
        let mut feed = controller(service, PagerMode::Accumulate);
        feed.refresh();
        feed.wait(WAIT);
        assert_eq!(
            feed.like("p1"),
            Err(MutationError::Unavailable {
                kind: MutationKind::Like
            })
        );
        assert_eq!(feed.state().get("p1").unwrap().likes, 4);
    }
}
