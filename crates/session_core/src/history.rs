use shared::domain::Image;

/// Ordered record of the images produced in one session plus the cursor of the
/// image being viewed.
///
/// Entries are only ever appended or truncated from the tail. The cursor stays
/// within `0..len` while the history is non-empty and is 0 when it is empty.
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    entries: Vec<Image>,
    cursor: usize,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    /// Pushes `image` as the new tail and moves the cursor onto it. Callers
    /// discard any forward branch with [`truncate_after`](Self::truncate_after)
    /// first.
    pub fn append(&mut self, image: Image) {
        self.entries.push(image);
        self.cursor = self.entries.len() - 1;
    }

    /// Drops every entry after `index`. The cursor is pulled back when it
    /// pointed past the new tail.
    pub fn truncate_after(&mut self, index: usize) {
        if index + 1 >= self.entries.len() {
            return;
        }
        self.entries.truncate(index + 1);
        self.cursor = self.cursor.min(index);
    }

    pub fn move_cursor(&mut self, to_index: usize) {
        if self.entries.is_empty() {
            return;
        }
        self.cursor = to_index.min(self.entries.len() - 1);
    }

    pub fn step_back(&mut self) {
        self.move_cursor(self.cursor.saturating_sub(1));
    }

    pub fn step_forward(&mut self) {
        self.move_cursor(self.cursor.saturating_add(1));
    }

    pub fn current(&self) -> Option<&Image> {
        self.entries.get(self.cursor)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Image] {
        &self.entries
    }

    pub fn can_go_previous(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_go_next(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    /// 1-based cursor position, 0 when empty.
    pub fn position(&self) -> usize {
        if self.entries.is_empty() {
            0
        } else {
            self.cursor + 1
        }
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
