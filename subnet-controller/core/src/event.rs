/// A monotonically increasing store version.
///
/// Every mutation in the registry is assigned the next revision; list results
/// carry the first revision *not* reflected in the snapshot.
pub type Revision = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Added,
    Deleted,
}

/// A change to a single resource, as observed by a watch.
///
/// `Added` covers both creation and modification. For `Deleted`, the resource
/// is the last value stored before removal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event<T> {
    pub kind: EventType,
    pub resource: T,
    pub revision: Revision,
}

// === impl EventType ===

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Event ===

impl<T> Event<T> {
    pub fn added(resource: T, revision: Revision) -> Self {
        Self {
            kind: EventType::Added,
            resource,
            revision,
        }
    }

    pub fn deleted(resource: T, revision: Revision) -> Self {
        Self {
            kind: EventType::Deleted,
            resource,
            revision,
        }
    }
}
