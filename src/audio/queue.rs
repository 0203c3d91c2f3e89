use std::time::Duration;
use tracing::debug;

use super::track::Track;

/// Ordered tracks of one guild with a single active cursor.
///
/// Played tracks stay in the queue so the cursor can move back. Track
/// numbers exposed to users are 1-based; `active` is the 0-based cursor,
/// `None` until something has been activated.
#[derive(Debug, Default)]
pub struct PlayQueue {
    tracks: Vec<Track>,
    active: Option<usize>,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends tracks to the end and returns the new length, or 0 for empty input.
    pub fn enqueue_append(&mut self, tracks: Vec<Track>) -> usize {
        if tracks.is_empty() {
            return 0;
        }
        self.tracks.extend(tracks);
        self.tracks.len()
    }

    /// Inserts tracks right after the active one (at the head when nothing is active).
    pub fn enqueue_next(&mut self, tracks: Vec<Track>) -> usize {
        if tracks.is_empty() {
            return 0;
        }
        let at = self.active.map_or(0, |index| index + 1);
        self.tracks.splice(at..at, tracks);
        self.tracks.len()
    }

    /// Removes the track with the given 1-based number.
    ///
    /// The active track can't be removed. Removing a track before it shifts the
    /// cursor down so the same track stays active.
    pub fn remove_at(&mut self, track_number: usize) -> bool {
        if self.tracks.is_empty() || track_number < 1 || track_number > self.tracks.len() {
            return false;
        }

        let index = track_number - 1;
        if Some(index) == self.active {
            return false;
        }

        let removed = self.tracks.remove(index);
        if let Some(active) = self.active.as_mut() {
            if index < *active {
                *active -= 1;
            }
        }
        debug!("❌ Removed '{}' from position {}", removed.name(), track_number);
        true
    }

    /// Moves the cursor one forward. Never wraps.
    pub fn advance(&mut self) -> bool {
        let next = self.active.map_or(0, |index| index + 1);
        if next >= self.tracks.len() {
            return false;
        }
        self.active = Some(next);
        true
    }

    /// Moves the cursor one back. Fails at the first track or with nothing active.
    pub fn retreat(&mut self) -> bool {
        match self.active {
            Some(index) if index > 0 => {
                self.active = Some(index - 1);
                true
            }
            _ => false,
        }
    }

    /// Points the cursor at a 1-based track number.
    pub fn jump_to(&mut self, track_number: usize) -> bool {
        if track_number < 1 || track_number > self.tracks.len() {
            return false;
        }
        self.active = Some(track_number - 1);
        true
    }

    pub fn active_track(&self) -> Option<&Track> {
        self.active.and_then(|index| self.tracks.get(index))
    }

    /// 1-based number of the active track, 0 when nothing is active.
    pub fn active_track_number(&self) -> usize {
        self.active.map_or(0, |index| index + 1)
    }

    pub fn peek_next(&self) -> Option<&Track> {
        let next = self.active.map_or(0, |index| index + 1);
        self.tracks.get(next)
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.active = None;
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn info(&self) -> QueueInfo {
        QueueInfo {
            tracks: self.tracks.clone(),
            active_track_number: self.active_track_number(),
        }
    }
}

/// Read-only copy of a queue, detached from the session that owns it.
#[derive(Debug, Clone, Default)]
pub struct QueueInfo {
    pub tracks: Vec<Track>,
    pub active_track_number: usize,
}

impl QueueInfo {
    pub fn total_duration(&self) -> Duration {
        self.tracks.iter().map(Track::duration).sum()
    }

    /// Returns one page of the queue. Pages start at 1; page 0 is treated as 1.
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let total_pages = self.tracks.len().div_ceil(items_per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;
        let end = (start + items_per_page).min(self.tracks.len());

        QueuePage {
            items: self.tracks[start..end]
                .iter()
                .enumerate()
                .map(|(offset, track)| (start + offset + 1, track.clone()))
                .collect(),
            current_page,
            total_pages,
            total_items: self.tracks.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    /// `(track number, track)` pairs
    pub items: Vec<(usize, Track)>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(id: &str) -> Track {
        Track::remote_stream(id, format!("Track {id}"))
    }

    fn ids(queue: &PlayQueue) -> Vec<&str> {
        queue.tracks().iter().map(Track::id).collect()
    }

    fn queue_of(count: usize) -> PlayQueue {
        let mut queue = PlayQueue::new();
        queue.enqueue_append((0..count).map(|i| track(&format!("t{i}"))).collect());
        queue
    }

    #[test]
    fn append_onto_empty_queue_leaves_nothing_active() {
        for n in 0..6 {
            let queue = queue_of(n);
            assert_eq!(queue.len(), n);
            assert_eq!(queue.active_track_number(), 0);
            assert!(queue.active_track().is_none());
        }
    }

    #[test]
    fn empty_enqueue_returns_zero() {
        let mut queue = queue_of(2);
        assert_eq!(queue.enqueue_append(Vec::new()), 0);
        assert_eq!(queue.enqueue_next(Vec::new()), 0);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn advance_stops_at_the_last_track() {
        let mut queue = queue_of(2);
        assert!(queue.advance());
        assert!(queue.advance());
        assert_eq!(queue.active_track_number(), 2);

        assert!(!queue.advance());
        assert_eq!(queue.active_track_number(), 2);
        assert_eq!(queue.active_track().map(Track::id), Some("t1"));
    }

    #[test]
    fn advance_on_empty_queue_fails() {
        let mut queue = PlayQueue::new();
        assert!(!queue.advance());
        assert_eq!(queue.active_track_number(), 0);
    }

    #[test]
    fn retreat_needs_a_previous_track() {
        let mut queue = queue_of(3);
        assert!(!queue.retreat());
        queue.advance();
        assert!(!queue.retreat());
        queue.advance();
        assert!(queue.retreat());
        assert_eq!(queue.active_track_number(), 1);
    }

    #[test]
    fn enqueue_next_inserts_after_the_active_track() {
        let mut queue = queue_of(3);
        queue.advance();

        assert_eq!(queue.enqueue_next(vec![track("new")]), 4);
        assert_eq!(ids(&queue), vec!["t0", "new", "t1", "t2"]);
        assert_eq!(queue.peek_next().map(Track::id), Some("new"));
        assert_eq!(queue.active_track().map(Track::id), Some("t0"));
    }

    #[test]
    fn enqueue_next_without_active_track_inserts_at_head() {
        let mut queue = queue_of(2);
        queue.enqueue_next(vec![track("a"), track("b")]);
        assert_eq!(ids(&queue), vec!["a", "b", "t0", "t1"]);
        assert_eq!(queue.peek_next().map(Track::id), Some("a"));
    }

    #[test]
    fn active_track_cannot_be_removed() {
        let mut queue = queue_of(3);
        queue.jump_to(2);

        assert!(!queue.remove_at(queue.active_track_number()));
        assert_eq!(ids(&queue), vec!["t0", "t1", "t2"]);
        assert_eq!(queue.active_track_number(), 2);
    }

    #[test]
    fn remove_rejects_out_of_range_numbers() {
        let mut queue = queue_of(2);
        assert!(!queue.remove_at(0));
        assert!(!queue.remove_at(3));
        assert!(!PlayQueue::new().remove_at(1));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn removing_before_the_active_track_keeps_it_active() {
        let mut queue = queue_of(4);
        queue.jump_to(3);

        assert!(queue.remove_at(1));
        assert_eq!(ids(&queue), vec!["t1", "t2", "t3"]);
        assert_eq!(queue.active_track().map(Track::id), Some("t2"));
        assert_eq!(queue.active_track_number(), 2);
    }

    #[test]
    fn removing_after_the_active_track_keeps_the_cursor() {
        let mut queue = queue_of(4);
        queue.jump_to(2);

        assert!(queue.remove_at(4));
        assert_eq!(queue.active_track().map(Track::id), Some("t1"));
        assert_eq!(queue.peek_next().map(Track::id), Some("t2"));
    }

    #[test]
    fn jump_to_validates_the_track_number() {
        let mut queue = queue_of(3);
        assert!(!queue.jump_to(0));
        assert!(!queue.jump_to(4));
        assert_eq!(queue.active_track_number(), 0);
        assert!(queue.jump_to(3));
        assert_eq!(queue.active_track().map(Track::id), Some("t2"));
        assert!(queue.peek_next().is_none());
    }

    #[test]
    fn clear_resets_everything() {
        let mut queue = queue_of(3);
        queue.advance();
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.active_track_number(), 0);
        assert!(queue.peek_next().is_none());
    }

    #[test]
    fn pages_are_numbered_from_one() {
        let mut queue = queue_of(7);
        queue.jump_to(4);
        let info = queue.info();

        let page = info.page(2, 3);
        assert_eq!(page.current_page, 2);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.total_items, 7);
        let numbers: Vec<usize> = page.items.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![4, 5, 6]);

        assert_eq!(info.page(0, 3).current_page, 1);
        assert_eq!(info.page(99, 3).items.len(), 1);
        assert_eq!(PlayQueue::new().info().page(1, 10).total_pages, 1);
    }
}
