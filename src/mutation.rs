use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::{FetchError, MutationOp, MutationOutcome};
use crate::merge::CollectionState;
use crate::model::{Item, LikeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Like,
    Unlike,
    Edit,
    Delete,
}

impl MutationKind {
    pub fn class(&self) -> MutationClass {
        match self {
            MutationKind::Like | MutationKind::Unlike => MutationClass::Vote,
            MutationKind::Edit | MutationKind::Delete => MutationClass::Content,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Like => "like",
            MutationKind::Unlike => "unlike",
            MutationKind::Edit => "edit",
            MutationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutations in the same class on the same item may not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationClass {
    Vote,
    Content,
}

impl fmt::Display for MutationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationClass::Vote => f.write_str("vote"),
            MutationClass::Content => f.write_str("content change"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Keep the optimistic state and only notify.
    ReportOnly,
    /// Restore the affected fields from the snapshot, then notify.
    #[default]
    Revert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MutationPolicies {
    #[serde(default)]
    pub like: FailurePolicy,
    #[serde(default)]
    pub unlike: FailurePolicy,
    #[serde(default)]
    pub edit: FailurePolicy,
    #[serde(default)]
    pub delete: FailurePolicy,
}

impl MutationPolicies {
    pub fn uniform(policy: FailurePolicy) -> Self {
        Self {
            like: policy,
            unlike: policy,
            edit: policy,
            delete: policy,
        }
    }

    pub fn for_kind(&self, kind: MutationKind) -> FailurePolicy {
        match kind {
            MutationKind::Like => self.like,
            MutationKind::Unlike => self.unlike,
            MutationKind::Edit => self.edit,
            MutationKind::Delete => self.delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone)]
pub enum Snapshot<T> {
    Item(T),
    Removed { index: usize, item: T },
}

#[derive(Debug, Clone)]
pub struct MutationRecord<T> {
    pub ticket: u64,
    pub item_id: String,
    pub kind: MutationKind,
    pub op: MutationOp,
    pub previous: Snapshot<T>,
    pub status: MutationStatus,
    /// Sequence the snapshot was taken from. A snapshot from a sequence that
    /// has since been reset or replaced is never written back.
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    #[error("a {class} is already pending for item {item_id}")]
    Busy { item_id: String, class: MutationClass },
    #[error("item {0} is not loaded")]
    UnknownItem(String),
    #[error("{kind} is not supported for item {item_id}")]
    Unsupported { item_id: String, kind: MutationKind },
    #[error("item {item_id} is already in the requested state")]
    NoChange { item_id: String },
    #[error("only the author can {kind} item {item_id}")]
    NotOwner { item_id: String, kind: MutationKind },
    #[error("{kind} is unavailable without a mutation service")]
    Unavailable { kind: MutationKind },
}

#[derive(Debug)]
pub enum Resolution<T> {
    Confirmed(MutationRecord<T>),
    Failed {
        record: MutationRecord<T>,
        error: FetchError,
        reverted: bool,
    },
    /// The ticket was never issued or already resolved.
    Unknown { ticket: u64 },
}

/// Applies changes ahead of the server and settles them when it answers.
#[derive(Debug)]
pub struct MutationCoordinator<T> {
    policies: MutationPolicies,
    pending: BTreeMap<u64, MutationRecord<T>>,
    next_ticket: u64,
    generation: u64,
}

impl<T: Item> MutationCoordinator<T> {
    pub fn new(policies: MutationPolicies) -> Self {
        Self {
            policies,
            pending: BTreeMap::new(),
            next_ticket: 1,
            generation: 0,
        }
    }

    /// The sequence was reset or replaced; pending snapshots no longer
    /// describe it.
    pub fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        debug!(
            generation = self.generation,
            pending = self.pending.len(),
            "mutation snapshots invalidated"
        );
    }

    /// Carry pending changes over to items that arrived after `begin`: a
    /// pending delete keeps its item out, and an item that reappeared after
    /// `invalidate` is snapshotted fresh with the change applied on top.
    pub fn reconcile(&mut self, state: &mut CollectionState<T>) {
        let generation = self.generation;
        for record in self.pending.values_mut() {
            let stale = record.generation != generation;
            match &record.op {
                MutationOp::Delete => {
                    let Some((index, item)) = state.remove(&record.item_id) else {
                        continue;
                    };
                    if stale {
                        record.previous = Snapshot::Removed { index, item };
                        record.generation = generation;
                    }
                }
                _ if !stale => continue,
                op => {
                    let Some(item) = state.get_mut(&record.item_id) else {
                        continue;
                    };
                    record.previous = Snapshot::Item(item.clone());
                    apply_fields(item, op);
                    record.generation = generation;
                }
            }
            debug!(ticket = record.ticket, item_id = %record.item_id, kind = %record.kind, "pending mutation carried over");
        }
    }

    pub fn policies(&self) -> MutationPolicies {
        self.policies
    }

    pub fn pending(&self) -> impl Iterator<Item = &MutationRecord<T>> {
        self.pending.values()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, item_id: &str, class: MutationClass) -> bool {
        self.pending
            .values()
            .any(|record| record.item_id == item_id && record.kind.class() == class)
    }

    /// Apply `op` to the current state and return the ticket to resolve it
    /// with.
    pub fn begin(
        &mut self,
        state: &mut CollectionState<T>,
        item_id: &str,
        op: &MutationOp,
    ) -> Result<u64, MutationError> {
        let kind = op.kind();
        if self.is_pending(item_id, kind.class()) {
            return Err(MutationError::Busy {
                item_id: item_id.to_string(),
                class: kind.class(),
            });
        }

        let current = state
            .get(item_id)
            .ok_or_else(|| MutationError::UnknownItem(item_id.to_string()))?;
        let unsupported = || MutationError::Unsupported {
            item_id: item_id.to_string(),
            kind,
        };

        let previous = match op {
            MutationOp::Like | MutationOp::Unlike => {
                let like = current.like_state().ok_or_else(unsupported)?;
                if like.liked == matches!(op, MutationOp::Like) {
                    return Err(MutationError::NoChange {
                        item_id: item_id.to_string(),
                    });
                }
                let snapshot = Snapshot::Item(current.clone());
                if let Some(item) = state.get_mut(item_id) {
                    apply_fields(item, op);
                }
                snapshot
            }
            MutationOp::Edit { .. } => {
                current.content().ok_or_else(unsupported)?;
                let snapshot = Snapshot::Item(current.clone());
                if let Some(item) = state.get_mut(item_id) {
                    apply_fields(item, op);
                }
                snapshot
            }
            MutationOp::Delete => {
                let (index, item) = state
                    .remove(item_id)
                    .ok_or_else(|| MutationError::UnknownItem(item_id.to_string()))?;
                Snapshot::Removed { index, item }
            }
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        debug!(ticket, item_id, kind = %kind, "optimistic mutation applied");
        self.pending.insert(
            ticket,
            MutationRecord {
                ticket,
                item_id: item_id.to_string(),
                kind,
                op: op.clone(),
                previous,
                status: MutationStatus::Pending,
                generation: self.generation,
            },
        );
        Ok(ticket)
    }

    pub fn resolve(
        &mut self,
        state: &mut CollectionState<T>,
        ticket: u64,
        result: Result<MutationOutcome, FetchError>,
    ) -> Resolution<T> {
        let Some(mut record) = self.pending.remove(&ticket) else {
            return Resolution::Unknown { ticket };
        };

        match result {
            Ok(_) => {
                record.status = MutationStatus::Confirmed;
                debug!(ticket, item_id = %record.item_id, kind = %record.kind, "mutation confirmed");
                Resolution::Confirmed(record)
            }
            Err(error) => {
                record.status = MutationStatus::Failed;
                let reverted = match self.policies.for_kind(record.kind) {
                    FailurePolicy::ReportOnly => false,
                    FailurePolicy::Revert if record.generation != self.generation => {
                        debug!(ticket, item_id = %record.item_id, "sequence replaced since; nothing to revert");
                        false
                    }
                    FailurePolicy::Revert => revert(state, &record),
                };
                warn!(
                    ticket,
                    item_id = %record.item_id,
                    kind = %record.kind,
                    reverted,
                    error = %error,
                    "mutation failed"
                );
                Resolution::Failed {
                    record,
                    error,
                    reverted,
                }
            }
        }
    }
}

fn apply_fields<T: Item>(item: &mut T, op: &MutationOp) {
    match op {
        MutationOp::Like => {
            if let Some(like) = item.like_state().filter(|like| !like.liked) {
                item.set_like_state(LikeState {
                    likes: like.likes + 1,
                    liked: true,
                });
            }
        }
        MutationOp::Unlike => {
            if let Some(like) = item.like_state().filter(|like| like.liked) {
                item.set_like_state(LikeState {
                    likes: (like.likes - 1).max(0),
                    liked: false,
                });
            }
        }
        MutationOp::Edit { content } => {
            if item.content().is_some() {
                item.set_content(content.clone());
            }
        }
        MutationOp::Delete => {}
    }
}

/// Undo only the fields the mutation touched, on whatever the state holds
/// now.
fn revert<T: Item>(state: &mut CollectionState<T>, record: &MutationRecord<T>) -> bool {
    match &record.previous {
        Snapshot::Item(previous) => {
            let Some(current) = state.get_mut(&record.item_id) else {
                return false;
            };
            match record.kind {
                MutationKind::Like | MutationKind::Unlike => {
                    if let Some(like) = previous.like_state() {
                        current.set_like_state(like);
                    }
                }
                MutationKind::Edit => {
                    if let Some(content) = previous.content() {
                        current.set_content(content.to_string());
                    }
                }
                MutationKind::Delete => return false,
            }
            true
        }
        Snapshot::Removed { index, item } => state.restore(*index, item.clone()),
    }
}
