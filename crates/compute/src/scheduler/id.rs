use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use skel_core::IdSourceKind;
use uuid::Uuid;

/// Supplies fresh task ids.
///
/// Sources only promise entropy or monotonicity. Nothing checks for
/// collisions between live tasks.
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> u64;
}

/// 64 random bits taken from a v4 UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdSource;

impl IdSource for RandomIdSource {
    fn next_id(&self) -> u64 {
        loop {
            let (hi, lo) = Uuid::new_v4().as_u64_pair();
            let id = hi ^ lo;
            if id != 0 {
                return id;
            }
        }
    }
}

/// Monotonic counter starting at 1.
#[derive(Debug)]
pub struct SequentialIdSource {
    next: AtomicU64,
}

impl SequentialIdSource {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }
}

impl Default for SequentialIdSource {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSource for SequentialIdSource {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Build the id source named in configuration.
pub fn id_source_for(kind: IdSourceKind) -> Arc<dyn IdSource> {
    match kind {
        IdSourceKind::Random => Arc::new(RandomIdSource),
        IdSourceKind::Sequential => Arc::new(SequentialIdSource::new()),
    }
}

/// Identity of a task within its lineage.
///
/// Two identifiers are equal when their `own_id`s are equal; the family and
/// parent ids are derived data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskIdentifier {
    pub family_id: u64,
    pub parent_id: Option<u64>,
    pub own_id: u64,
}

impl TaskIdentifier {
    pub fn new_root() -> Self {
        Self::new_root_with(&RandomIdSource)
    }

    pub fn new_root_with(source: &dyn IdSource) -> Self {
        let own_id = source.next_id();
        Self {
            family_id: own_id,
            parent_id: None,
            own_id,
        }
    }

    pub fn new_child(parent: &TaskIdentifier) -> Self {
        Self::new_child_with(parent, &RandomIdSource)
    }

    pub fn new_child_with(parent: &TaskIdentifier, source: &dyn IdSource) -> Self {
        Self {
            family_id: parent.family_id,
            parent_id: Some(parent.own_id),
            own_id: source.next_id(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

impl PartialEq for TaskIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.own_id == other.own_id
    }
}

impl Eq for TaskIdentifier {}

impl Hash for TaskIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.own_id.hash(state);
    }
}

impl fmt::Display for TaskIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parent_id {
            Some(parent) => write!(f, "{:x}/{:x}/{:x}", self.family_id, parent, self.own_id),
            None => write!(f, "{:x}", self.own_id),
        }
    }
}
