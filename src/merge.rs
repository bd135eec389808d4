use std::collections::HashSet;

use crate::model::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDescriptor {
    pub page_number: u32,
    pub limit: u32,
    pub total_items: Option<u64>,
    pub total_pages: Option<u32>,
}

impl PageDescriptor {
    pub fn new(page_number: u32, limit: u32) -> Self {
        Self {
            page_number,
            limit,
            total_items: None,
            total_pages: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub descriptor: PageDescriptor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeReport {
    pub appended: usize,
    pub duplicates: usize,
}

/// Items accumulated across pages of one feed, in server order, unique by id.
#[derive(Debug, Clone)]
pub struct CollectionState<T> {
    items: Vec<T>,
    ids: HashSet<String>,
    descriptor: Option<PageDescriptor>,
    has_more: bool,
}

impl<T: Item> Default for CollectionState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> CollectionState<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            ids: HashSet::new(),
            descriptor: None,
            has_more: true,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn descriptor(&self) -> Option<&PageDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.position(id).map(|index| &self.items[index])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        let index = self.position(id)?;
        self.items.get_mut(index)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        if !self.ids.contains(id) {
            return None;
        }
        self.items.iter().position(|item| item.id() == id)
    }

    /// Forget everything, including the terminal `has_more` signal.
    pub fn reset(&mut self) {
        self.items.clear();
        self.ids.clear();
        self.descriptor = None;
        self.has_more = true;
    }

    pub fn merge(&mut self, page: Page<T>) -> MergeReport {
        let Page { items, descriptor } = page;
        let received = items.len();
        let mut report = MergeReport::default();

        for item in items {
            if self.ids.contains(item.id()) {
                report.duplicates += 1;
                continue;
            }
            self.ids.insert(item.id().to_string());
            self.items.push(item);
            report.appended += 1;
        }

        let more = match descriptor.total_pages {
            Some(total_pages) => descriptor.page_number < total_pages,
            None => received > 0 && received >= descriptor.limit as usize,
        };
        self.has_more = self.has_more && more;
        self.descriptor = Some(descriptor);
        report
    }

    /// Page-jump mode: the fetched page becomes the whole visible set.
    pub fn replace(&mut self, page: Page<T>) -> MergeReport {
        self.reset();
        self.merge(page)
    }

    pub fn remove(&mut self, id: &str) -> Option<(usize, T)> {
        let index = self.position(id)?;
        let item = self.items.remove(index);
        self.ids.remove(id);
        Some((index, item))
    }

    /// Put an item back where it was, clamped to the current length. Returns
    /// false when an item with the same id is already present.
    pub fn restore(&mut self, index: usize, item: T) -> bool {
        if self.ids.contains(item.id()) {
            return false;
        }
        self.ids.insert(item.id().to_string());
        let index = index.min(self.items.len());
        self.items.insert(index, item);
        true
    }

    /// Swap the stored copy of `item` (matched by id). Returns false when the
    /// id is no longer present.
    pub fn replace_item(&mut self, item: T) -> bool {
        let id = item.id().to_string();
        match self.get_mut(&id) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => false,
        }
    }
}

pub fn merge_page<T: Item>(mut state: CollectionState<T>, page: Page<T>) -> CollectionState<T> {
    state.merge(page);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Like;

    fn like(id: &str) -> Like {
        Like {
            id: id.to_string(),
            ..Like::default()
        }
    }

    fn page(number: u32, limit: u32, total_pages: Option<u32>, ids: &[&str]) -> Page<Like> {
        Page {
            items: ids.iter().map(|id| like(id)).collect(),
            descriptor: PageDescriptor {
                page_number: number,
                limit,
                total_items: None,
                total_pages,
            },
        }
    }

    fn ids(state: &CollectionState<Like>) -> Vec<&str> {
        state.items().iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn overlapping_pages_keep_first_occurrence() {
        let state = merge_page(CollectionState::new(), page(1, 3, Some(3), &["a", "b", "c"]));
        let state = merge_page(state, page(2, 3, Some(3), &["c", "d", "a"]));
        let state = merge_page(state, page(3, 3, Some(3), &["e", "d", "f"]));
        assert_eq!(ids(&state), vec!["a", "b", "c", "d", "e", "f"]);
        let unique: HashSet<_> = ids(&state).into_iter().collect();
        assert_eq!(unique.len(), state.len());
    }

    #[test]
    fn earlier_pages_precede_later_pages() {
        let mut state = CollectionState::new();
        state.merge(page(1, 2, None, &["x", "y"]));
        let report = state.merge(page(2, 2, None, &["y", "z"]));
        assert_eq!(report, MergeReport { appended: 1, duplicates: 1 });
        assert_eq!(ids(&state), vec!["x", "y", "z"]);
    }

    #[test]
    fn merging_same_page_twice_changes_nothing() {
        let mut state = CollectionState::new();
        state.merge(page(1, 2, Some(4), &["a", "b"]));
        let before = ids(&state).join(",");
        let report = state.merge(page(1, 2, Some(4), &["a", "b"]));
        assert_eq!(report.appended, 0);
        assert_eq!(ids(&state).join(","), before);
        assert!(state.has_more());
    }

    #[test]
    fn has_more_follows_total_pages_and_stays_false() {
        let mut state = CollectionState::new();
        state.merge(page(1, 2, Some(2), &["a", "b"]));
        assert!(state.has_more());
        state.merge(page(2, 2, Some(2), &["c", "d"]));
        assert!(!state.has_more());
        // the server grew, but the same filter never flips back
        state.merge(page(3, 2, Some(5), &["e", "f"]));
        assert!(!state.has_more());
        state.reset();
        assert!(state.has_more());
    }

    #[test]
    fn short_page_ends_feed_without_total_pages() {
        let mut state = CollectionState::new();
        state.merge(page(1, 3, None, &["a", "b", "c"]));
        assert!(state.has_more());
        state.merge(page(2, 3, None, &["d"]));
        assert!(!state.has_more());
    }

    #[test]
    fn empty_first_page_is_terminal() {
        let mut state = CollectionState::new();
        state.merge(page(1, 5, Some(0), &[]));
        assert!(state.is_empty());
        assert!(!state.has_more());

        let mut state = CollectionState::new();
        state.merge(page(1, 5, None, &[]));
        assert!(!state.has_more());
    }

    #[test]
    fn replace_drops_previous_page() {
        let mut state = CollectionState::new();
        state.merge(page(1, 2, Some(3), &["a", "b"]));
        state.replace(page(3, 2, Some(3), &["e"]));
        assert_eq!(ids(&state), vec!["e"]);
        assert_eq!(state.descriptor().map(|d| d.page_number), Some(3));
    }

    #[test]
    fn remove_and_restore_round_trip_position() {
        let mut state = CollectionState::new();
        state.merge(page(1, 3, None, &["a", "b", "c"]));
        let (index, item) = state.remove("b").unwrap();
        assert_eq!(ids(&state), vec!["a", "c"]);
        assert!(!state.contains("b"));
        assert!(state.restore(index, item.clone()));
        assert_eq!(ids(&state), vec!["a", "b", "c"]);
        assert!(!state.restore(0, item));
    }
}
