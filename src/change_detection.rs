use std::sync::{Arc, Mutex, MutexGuard};

use bevy::{
    log::{info, warn},
    prelude::Entity,
    utils::HashSet,
};

use crate::{
    error::StateSaveError,
    host::{ObjectCodec, SaveHost, WorldHost},
    reconcile::{capture_record, reconcile_incremental, ReconcileReport},
    record::{CapturePolicy, ClassId, ObjectRecord},
    SaveStateInterface,
};

/// A baseline object that was destroyed, captured while it was still alive
#[derive(Clone, Debug, PartialEq)]
pub struct DestroyedRecord {
    pub record: ObjectRecord,
    /// Reattached before the generic payload is decoded on respawn
    pub aux_reference: Option<String>,
}

/// Spawn and destroy events observed since the last baseline.
///
/// Each tracked object is either at its baseline, created since (its handle is in
/// `pending_delete`) or destroyed since (its record is in `pending_respawn`). A create followed by a
/// destroy, or a destroy followed by a respawn under the same name and class, cancels out.
/// A default tracker tracks no classes and ignores every event until [`DeltaTracker::reset_baseline`].
#[derive(Clone, Debug, Default)]
pub struct DeltaTracker {
    tracked_classes: HashSet<ClassId>,
    policy: CapturePolicy,
    pending_delete: HashSet<Entity>,
    pending_respawn: Vec<DestroyedRecord>,
}

impl DeltaTracker {
    pub fn new(tracked_classes: &[ClassId], policy: CapturePolicy) -> DeltaTracker {
        DeltaTracker {
            tracked_classes: tracked_classes.iter().copied().collect(),
            policy,
            pending_delete: HashSet::default(),
            pending_respawn: vec![],
        }
    }

    /// Makes the current world the baseline
    pub fn reset_baseline(&mut self, tracked_classes: &[ClassId], policy: CapturePolicy) {
        self.tracked_classes = tracked_classes.iter().copied().collect();
        self.policy = policy;
        self.clear();
    }

    pub fn pending_delete(&self) -> &HashSet<Entity> {
        &self.pending_delete
    }

    pub fn pending_respawn(&self) -> &[DestroyedRecord] {
        &self.pending_respawn
    }

    pub fn is_empty(&self) -> bool {
        self.pending_delete.is_empty() && self.pending_respawn.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending_delete.clear();
        self.pending_respawn.clear();
    }

    fn is_relevant<H>(&self, host: &H, entity: Entity) -> Option<ClassId>
    where
        H: WorldHost + ?Sized,
    {
        let class_id = host.class_of(entity)?;
        if !self.tracked_classes.contains(&class_id) || !self.policy.is_eligible(host.mobility(entity))
        {
            return None;
        }
        Some(class_id)
    }

    pub fn on_spawn<H>(&mut self, host: &H, entity: Entity)
    where
        H: WorldHost + ?Sized,
    {
        let Some(class_id) = self.is_relevant(host, entity) else {
            return;
        };

        let name = host.name(entity);
        let returning = self.pending_respawn.iter().position(|destroyed| {
            Some(&destroyed.record.name) == name.as_ref() && destroyed.record.class_id == class_id
        });
        match returning {
            // A destroyed baseline object is back under its own identity
            Some(index) => {
                self.pending_respawn.remove(index);
            }
            None => {
                self.pending_delete.insert(entity);
            }
        }
    }

    pub fn on_destroy<H>(&mut self, host: &H, entity: Entity)
    where
        H: WorldHost + ObjectCodec + ?Sized,
    {
        if self.pending_delete.remove(&entity) {
            return;
        }
        if self.is_relevant(host, entity).is_none() {
            return;
        }
        let Some(record) = capture_record(host, entity) else {
            warn!("could not capture destroyed object {:?}", entity);
            return;
        };
        self.pending_respawn.push(DestroyedRecord {
            record,
            aux_reference: host.aux_reference(entity),
        });
    }

    /// Empties both sets, returning their contents
    pub fn take_pending(&mut self) -> (Vec<Entity>, Vec<DestroyedRecord>) {
        (
            self.pending_delete.drain().collect(),
            std::mem::take(&mut self.pending_respawn),
        )
    }
}

/// A slot's incremental save state: a [`DeltaTracker`] shared with the world host's lifecycle
/// observers. Clones share the same tracker.
#[derive(Clone, Debug)]
pub struct IncrementalSaveState {
    tracker: Arc<Mutex<DeltaTracker>>,
    pub tracked_classes: Vec<ClassId>,
    pub policy: CapturePolicy,
}

impl IncrementalSaveState {
    pub fn new(tracked_classes: Vec<ClassId>, policy: CapturePolicy) -> IncrementalSaveState {
        IncrementalSaveState {
            tracker: Arc::new(Mutex::new(DeltaTracker::default())),
            tracked_classes,
            policy,
        }
    }

    /// Locks the tracker. A panic while holding the lock leaves the sets consistent, so a
    /// poisoned lock is recovered.
    pub fn tracker(&self) -> MutexGuard<'_, DeltaTracker> {
        self.tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn take_pending(&self) -> (Vec<Entity>, Vec<DestroyedRecord>) {
        self.tracker().take_pending()
    }

    pub fn clear(&self) {
        self.tracker().clear();
    }
}

impl SaveStateInterface for IncrementalSaveState {
    fn clear_contents(&mut self) {
        self.clear();
    }

    fn capture(&mut self, _host: &mut dyn SaveHost) -> Result<usize, StateSaveError> {
        if self.tracked_classes.is_empty() {
            return Err(StateSaveError::NoTrackedClasses);
        }
        self.tracker()
            .reset_baseline(&self.tracked_classes, self.policy);
        Ok(0)
    }

    fn reconcile(&mut self, host: &mut dyn SaveHost) -> Result<ReconcileReport, StateSaveError> {
        let report = reconcile_incremental(host, self);
        info!(
            "replayed deltas: {} destroyed, {} respawned, {} skipped",
            report.destroyed, report.spawned, report.skipped
        );
        Ok(report)
    }

    fn on_spawn(&mut self, host: &dyn SaveHost, entity: Entity) {
        self.tracker().on_spawn(host, entity);
    }

    fn on_destroy(&mut self, host: &dyn SaveHost, entity: Entity) {
        self.tracker().on_destroy(host, entity);
    }
}
