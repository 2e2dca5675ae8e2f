//! Ordered image list and its mutations
//!
//! The list order is the page order of the generated PDF. Every mutation is
//! expressed as a [`ListAction`] and applied as a pure function from the old
//! list to the new one.

use crate::record::{ImageId, ImageRecord};

/// Where a moved image lands relative to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Before,
    After,
}

/// A single list mutation
#[derive(Debug, Clone)]
pub enum ListAction {
    /// Insert a batch at the end
    Append(Vec<ImageRecord>),
    /// Delete the record with this id (no-op if absent)
    Remove(ImageId),
    /// Relocate `id` immediately before or after `target`
    Move {
        id: ImageId,
        target: ImageId,
        placement: Placement,
    },
    /// Drag-and-drop: remove at the source index, insert at the target's index.
    /// A drop with no registered target does nothing.
    DropOnto {
        source: ImageId,
        target: Option<ImageId>,
    },
    /// Discard every record
    Clear,
}

/// Ordered sequence of image records
#[derive(Debug, Clone, Default)]
pub struct OrderedImageList {
    records: Vec<ImageRecord>,
}

impl OrderedImageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.iter()
    }

    /// Ids in list order
    pub fn ids(&self) -> Vec<ImageId> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn position(&self, id: ImageId) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    pub fn get(&self, id: ImageId) -> Option<&ImageRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Return the list that results from applying `action`
    pub fn apply(&self, action: &ListAction) -> OrderedImageList {
        let mut next = self.clone();
        match action {
            ListAction::Append(batch) => {
                next.append(batch.iter().cloned());
            }
            ListAction::Remove(id) => {
                next.remove(*id);
            }
            ListAction::Move {
                id,
                target,
                placement,
            } => {
                next.move_to(*id, *target, *placement);
            }
            ListAction::DropOnto { source, target } => {
                if let Some(target) = target {
                    next.drop_onto(*source, *target);
                }
            }
            ListAction::Clear => next.records.clear(),
        }
        next
    }

    /// Append a batch, skipping any record whose id is already present.
    /// Returns the number of records added.
    pub fn append<I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = ImageRecord>,
    {
        let before = self.records.len();
        for record in batch {
            if self.position(record.id).is_some() {
                tracing::debug!(id = %record.id, "skipping duplicate image id");
                continue;
            }
            self.records.push(record);
        }
        self.records.len() - before
    }

    /// Remove by id; `None` if absent
    pub fn remove(&mut self, id: ImageId) -> Option<ImageRecord> {
        let index = self.position(id)?;
        Some(self.records.remove(index))
    }

    /// Move `id` next to `target`. Returns whether the order changed.
    pub fn move_to(&mut self, id: ImageId, target: ImageId, placement: Placement) -> bool {
        if id == target || self.position(target).is_none() {
            return false;
        }
        let Some(from) = self.position(id) else {
            return false;
        };

        let original = self.ids();
        let record = self.records.remove(from);
        // target is still present: it was not the removed record
        let target_index = self.position(target).unwrap_or(self.records.len());
        let insert_at = match placement {
            Placement::Before => target_index,
            Placement::After => target_index + 1,
        };
        self.records.insert(insert_at, record);

        self.ids() != original
    }

    /// Drag-and-drop semantics: the dragged record takes the target's index.
    /// Returns whether the order changed.
    pub fn drop_onto(&mut self, source: ImageId, target: ImageId) -> bool {
        let (Some(from), Some(to)) = (self.position(source), self.position(target)) else {
            return false;
        };
        if from == to {
            return false;
        }
        let record = self.records.remove(from);
        self.records.insert(to, record);
        true
    }

    /// Empty the list, returning the number of records discarded
    pub fn clear(&mut self) -> usize {
        let count = self.records.len();
        self.records.clear();
        count
    }
}
