use bevy::{
    prelude::{Component, Reflect, Transform},
    utils::{HashMap, HashSet},
};
use serde::{Deserialize, Serialize};

/// An id hand assigned to saveable classes using the [`SaveClass`](crate::saving::SaveClass) trait
///
/// Is simply a u16 under the type
pub type ClassId = u16;

/// How an object is allowed to move. Only non static objects are ever captured or destroyed by a
/// reconcile.
#[derive(
    Default, Clone, Copy, Eq, Hash, Debug, PartialEq, Component, Reflect, Serialize, Deserialize,
)]
pub enum Mobility {
    #[default]
    Static,
    Stationary,
    Movable,
}

/// Decides which tracked objects a snapshot cares about.
#[derive(Default, Clone, Copy, Eq, Debug, PartialEq, Serialize, Deserialize)]
pub enum CapturePolicy {
    /// Only [`Mobility::Movable`] objects are captured and reconciled.
    #[default]
    MovableOnly,
    /// Movable and stationary objects are captured and reconciled.
    MovableOrStationary,
}

impl CapturePolicy {
    /// Whether an object with the given mobility is captured, and therefore eligible for
    /// destruction when it is missing from a snapshot.
    pub fn is_eligible(&self, mobility: Mobility) -> bool {
        match self {
            CapturePolicy::MovableOnly => mobility == Mobility::Movable,
            CapturePolicy::MovableOrStationary => mobility != Mobility::Static,
        }
    }
}

/// Everything needed to recreate a single object: its identity, where it was, whether it was
/// simulating physics and the opaque bytes of its remaining fields.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectRecord {
    pub name: String,
    pub class_id: ClassId,
    pub transform: Transform,
    pub physics_active: bool,
    pub payload: Vec<u8>,
}

/// The "what the world looked like" table. Records are keyed by their name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotStore {
    records: HashMap<String, ObjectRecord>,
    tracked_classes: HashSet<ClassId>,
}

impl SnapshotStore {
    pub fn new(tracked_classes: &[ClassId]) -> SnapshotStore {
        SnapshotStore {
            records: HashMap::default(),
            tracked_classes: tracked_classes.iter().copied().collect(),
        }
    }

    /// Inserts the record under its own name, returning whatever record held that name before
    pub fn insert(&mut self, record: ObjectRecord) -> Option<ObjectRecord> {
        self.tracked_classes.insert(record.class_id);
        self.records.insert(record.name.clone(), record)
    }

    pub fn get(&self, name: &str) -> Option<&ObjectRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn records(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn tracked_classes(&self) -> &HashSet<ClassId> {
        &self.tracked_classes
    }

    pub fn track_class(&mut self, class_id: ClassId) {
        self.tracked_classes.insert(class_id);
    }

    /// Removes every record and every tracked class
    pub fn clear(&mut self) {
        self.records.clear();
        self.tracked_classes.clear();
    }
}
