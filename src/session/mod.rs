//! Session state: the ordered image list and the current PDF artifact

pub mod list;
pub mod store;

pub use list::{ListAction, OrderedImageList, Placement};
pub use store::ArtifactStore;

use crate::record::ImageRecord;

/// Reference to the artifact produced from a specific list revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub key: String,
    pub file_name: String,
    pub revision: u64,
}

/// Snapshot of the list taken at the start of a conversion
#[derive(Debug, Clone)]
pub struct ListSnapshot {
    pub records: Vec<ImageRecord>,
    pub revision: u64,
}

/// One client session: exactly one writer of the ordered list
#[derive(Debug, Default)]
pub struct Session {
    images: OrderedImageList,
    revision: u64,
    artifact: Option<ArtifactRef>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn images(&self) -> &OrderedImageList {
        &self.images
    }

    /// Monotonic counter bumped on every effective list change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Artifact built from the current list, if any
    pub fn artifact(&self) -> Option<&ArtifactRef> {
        self.artifact.as_ref()
    }

    /// Apply a list mutation. If the list changed, the revision is bumped and
    /// the current artifact is dropped; the dropped reference is returned so
    /// the caller can evict it from the store.
    pub fn dispatch(&mut self, action: &ListAction) -> Dispatched {
        let next = self.images.apply(action);
        let changed = next.ids() != self.images.ids();
        if !changed {
            return Dispatched {
                changed: false,
                invalidated: None,
            };
        }

        self.images = next;
        self.revision += 1;
        let invalidated = self.artifact.take();
        if let Some(ref artifact) = invalidated {
            tracing::debug!(key = %artifact.key, "artifact invalidated by list change");
        }
        Dispatched {
            changed: true,
            invalidated,
        }
    }

    pub fn snapshot(&self) -> ListSnapshot {
        ListSnapshot {
            records: self.images.records().to_vec(),
            revision: self.revision,
        }
    }

    /// Register an artifact built from `revision`. Refused when the list has
    /// moved on since the snapshot was taken. Returns the replaced reference.
    pub fn set_artifact(
        &mut self,
        artifact: ArtifactRef,
    ) -> std::result::Result<Option<ArtifactRef>, ArtifactRef> {
        if artifact.revision != self.revision {
            return Err(artifact);
        }
        Ok(self.artifact.replace(artifact))
    }
}

/// Result of [`Session::dispatch`]
#[derive(Debug)]
pub struct Dispatched {
    pub changed: bool,
    pub invalidated: Option<ArtifactRef>,
}
