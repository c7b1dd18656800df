use std::cmp::min;

/// Single cursor over a list whose length changes underneath it.
///
/// `None` while the list is empty. The first time rows show up (or reappear
/// after the list drained) the cursor starts at 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionCursor {
    position: Option<usize>,
}

impl SelectionCursor {
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    /// Re-clamps after the list changed length. Returns the new position.
    pub fn sync_len(&mut self, len: usize) -> Option<usize> {
        self.position = match (self.position, len) {
            (_, 0) => None,
            (None, _) => Some(0),
            (Some(pos), len) => Some(min(pos, len - 1)),
        };
        self.position
    }

    /// Moves by `delta`, clamped to the list. Returns whether the position changed.
    pub fn move_by(&mut self, delta: isize, len: usize) -> bool {
        let before = self.sync_len(len);
        let Some(pos) = before else {
            return false;
        };
        let target = pos.saturating_add_signed(delta);
        self.position = Some(min(target, len - 1));
        self.position != before
    }

    pub fn jump_to(&mut self, index: usize, len: usize) -> bool {
        if index >= len {
            return false;
        }
        self.position = Some(index);
        true
    }
}

/// Keeps the cursor row inside a band of the viewport, scrolling as little
/// as possible. The band leaves a margin of rows above and below the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollBand {
    offset: usize,
    margin_percent: usize,
}

impl Default for ScrollBand {
    fn default() -> Self {
        Self::new(20)
    }
}

impl ScrollBand {
    pub fn new(margin_percent: usize) -> Self {
        Self {
            offset: 0,
            margin_percent: min(margin_percent, 50),
        }
    }

    fn margin(&self, viewport: usize) -> usize {
        min(
            viewport * self.margin_percent / 100,
            viewport.saturating_sub(1) / 2,
        )
    }

    /// Scrolls so `position` is visible. Returns the new top row.
    pub fn follow(&mut self, position: Option<usize>, len: usize, viewport: usize) -> usize {
        let Some(pos) = position else {
            self.offset = 0;
            return 0;
        };
        if viewport == 0 || len == 0 {
            self.offset = 0;
            return 0;
        }
        let margin = self.margin(viewport);
        if pos < self.offset + margin {
            self.offset = pos.saturating_sub(margin);
        }
        let bottom = (self.offset + viewport).saturating_sub(margin + 1);
        if pos > bottom {
            self.offset = (pos + margin + 1).saturating_sub(viewport);
        }
        self.offset = min(self.offset, len.saturating_sub(viewport));
        self.offset
    }
}
