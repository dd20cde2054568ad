//! Save states for a running simulation world.
//!
//! A [`StateSaveController`] captures the position, class, physics flag and fields of every tracked
//! object into numbered slots or `.sav` files, and later brings the world back to one of them by
//! moving, destroying and respawning objects. Between full snapshots each slot also tracks spawn
//! and destroy events so it can be rolled back incrementally.

use bevy::prelude::Entity;

pub mod blob;
pub mod builder;
pub mod change_detection;
pub mod codec;
pub mod command;
pub mod controller;
pub mod error;
pub mod host;
pub mod reconcile;
pub mod record;
pub mod saving;
pub mod slots;

pub use builder::{StateSaveBuilder, StateSaveConfig};
pub use controller::StateSaveController;
pub use error::{ErrorKind, StateSaveError};
pub use host::{ObjectCodec, SaveHost, SimWorldHost, WorldHost};
pub use reconcile::ReconcileReport;
pub use record::{CapturePolicy, ClassId, Mobility, ObjectRecord, SnapshotStore};

/// Something that can remember the tracked objects of a world and bring the world back to them
pub trait SaveStateInterface {
    /// Forgets everything captured so far
    fn clear_contents(&mut self);

    /// Makes the current world the state to return to. Returns how many objects were captured.
    fn capture(&mut self, host: &mut dyn SaveHost) -> Result<usize, StateSaveError>;

    /// Brings the world back to the captured state
    fn reconcile(&mut self, host: &mut dyn SaveHost) -> Result<ReconcileReport, StateSaveError>;

    /// Called after a saveable object is spawned
    fn on_spawn(&mut self, host: &dyn SaveHost, entity: Entity);

    /// Called before a saveable object is destroyed
    fn on_destroy(&mut self, host: &dyn SaveHost, entity: Entity);
}
