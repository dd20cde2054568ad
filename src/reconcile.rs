//! Capturing the tracked objects of a world into a [`SnapshotStore`] and bringing a world back to
//! a snapshot by repositioning, destroying and respawning objects.

use bevy::{
    log::{error, info, warn},
    prelude::{Entity, Vec3},
    utils::HashMap,
};

use crate::{
    change_detection::IncrementalSaveState,
    error::StateSaveError,
    host::{ObjectCodec, SaveHost, WorldHost},
    record::{CapturePolicy, ClassId, ObjectRecord, SnapshotStore},
    SaveStateInterface,
};

/// How many objects a reconcile touched
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub moved: usize,
    pub destroyed: usize,
    pub spawned: usize,
    /// Records that could not be respawned
    pub skipped: usize,
}

/// Builds a record of a single live object, encoding its remaining fields into the payload
pub fn capture_record<H>(host: &H, entity: Entity) -> Option<ObjectRecord>
where
    H: WorldHost + ObjectCodec + ?Sized,
{
    let name = host.name(entity)?;
    let class_id = host.class_of(entity)?;
    let transform = host.transform(entity)?;
    Some(ObjectRecord {
        name,
        class_id,
        transform,
        physics_active: host.is_physics_active(entity),
        payload: host.encode(entity).unwrap_or_default(),
    })
}

/// Captures every eligible live object of the tracked classes into a fresh [`SnapshotStore`].
/// Does not touch the world.
pub fn capture<H>(
    host: &mut H,
    tracked_classes: &[ClassId],
    policy: CapturePolicy,
) -> Result<SnapshotStore, StateSaveError>
where
    H: WorldHost + ObjectCodec + ?Sized,
{
    if tracked_classes.is_empty() {
        return Err(StateSaveError::NoTrackedClasses);
    }

    let mut store = SnapshotStore::new(tracked_classes);
    for entity in host.find_all_of_classes(tracked_classes) {
        if !policy.is_eligible(host.mobility(entity)) {
            continue;
        }
        let Some(record) = capture_record(host, entity) else {
            warn!("skipping {:?}: it has no name, class or transform", entity);
            continue;
        };
        if let Some(previous) = store.insert(record) {
            warn!(
                "two live objects are named {}, only the last one is kept",
                previous.name
            );
        }
    }
    Ok(store)
}

/// Brings the live objects of the snapshot's tracked classes in line with the snapshot.
///
/// Live objects with a record of the same name and class are moved back in place. Eligible live
/// objects without one are destroyed, and only then are the records left without a live
/// counterpart respawned. A record that cannot be respawned is logged and skipped.
pub fn reconcile<H>(snapshot: &SnapshotStore, host: &mut H, policy: CapturePolicy) -> ReconcileReport
where
    H: WorldHost + ObjectCodec + ?Sized,
{
    let mut report = ReconcileReport::default();
    let mut remaining: HashMap<&str, &ObjectRecord> = snapshot
        .records()
        .map(|record| (record.name.as_str(), record))
        .collect();
    let tracked: Vec<ClassId> = snapshot.tracked_classes().iter().copied().collect();

    let mut to_destroy: Vec<Entity> = vec![];
    for entity in host.find_all_of_classes(&tracked) {
        let class_id = host.class_of(entity);
        let matched = host
            .name(entity)
            .and_then(|name| remaining.get(name.as_str()).copied())
            .filter(|record| Some(record.class_id) == class_id);

        match matched {
            Some(record) => {
                restore_in_place(host, entity, record);
                remaining.remove(record.name.as_str());
                report.moved += 1;
            }
            None => {
                if policy.is_eligible(host.mobility(entity)) {
                    to_destroy.push(entity);
                }
            }
        }
    }

    for entity in to_destroy {
        if host.destroy(entity) {
            report.destroyed += 1;
        } else {
            warn!("could not destroy {:?}", entity);
        }
    }

    let mut to_spawn: Vec<&ObjectRecord> = remaining.into_values().collect();
    to_spawn.sort_by(|a, b| a.name.cmp(&b.name));
    for record in to_spawn {
        match respawn_record(host, record, None) {
            Ok(_) => report.spawned += 1,
            Err(err) => {
                error!("skipping {}: {}", record.name, err);
                report.skipped += 1;
            }
        }
    }

    report
}

/// Destroys every object spawned since the baseline that is still eligible under the tracker's
/// policy, then respawns every baseline object destroyed since, in the order they were destroyed.
/// The tracker is cleared afterwards even if some objects failed.
pub fn reconcile_incremental<H>(host: &mut H, tracker: &IncrementalSaveState) -> ReconcileReport
where
    H: WorldHost + ObjectCodec + ?Sized,
{
    let mut report = ReconcileReport::default();
    // The lock is released before touching the world: lifecycle observers lock it again.
    let (to_delete, to_respawn) = tracker.take_pending();

    for entity in to_delete {
        if !host.contains(entity) {
            warn!("{:?} was already gone", entity);
            continue;
        }
        // Gameplay may have pinned the object in place since it was spawned
        if !tracker.policy.is_eligible(host.mobility(entity)) {
            info!("keeping {:?}: its mobility changed after it was spawned", entity);
            continue;
        }
        if host.destroy(entity) {
            report.destroyed += 1;
        }
    }

    for destroyed in to_respawn.iter() {
        match respawn_record(host, &destroyed.record, destroyed.aux_reference.clone()) {
            Ok(_) => report.spawned += 1,
            Err(err) => {
                error!("skipping {}: {}", destroyed.record.name, err);
                report.skipped += 1;
            }
        }
    }

    tracker.clear();
    report
}

fn restore_in_place<H>(host: &mut H, entity: Entity, record: &ObjectRecord)
where
    H: WorldHost + ObjectCodec + ?Sized,
{
    host.set_transform(entity, &record.transform);
    host.set_linear_velocity(entity, Vec3::ZERO);
    host.set_angular_velocity(entity, Vec3::ZERO);
    if !record.payload.is_empty() && !host.decode(&record.payload, entity) {
        warn!("could not restore the payload of {}", record.name);
    }
}

/// Spawns the record under its own name, places it, restores its payload and only then
/// re-enables physics.
fn respawn_record<H>(
    host: &mut H,
    record: &ObjectRecord,
    aux_reference: Option<String>,
) -> Result<Entity, StateSaveError>
where
    H: WorldHost + ObjectCodec + ?Sized,
{
    if !host.resolves_class(record.class_id) {
        return Err(StateSaveError::UnresolvedClass(record.class_id));
    }
    let entity = host
        .spawn(record.class_id, &record.name, &record.transform)
        .ok_or_else(|| StateSaveError::SpawnFailed {
            name: record.name.clone(),
            class_id: record.class_id,
        })?;

    host.set_transform(entity, &record.transform);
    if let Some(reference) = aux_reference {
        host.set_aux_reference(entity, reference);
    }
    if !record.payload.is_empty() && !host.decode(&record.payload, entity) {
        warn!("could not restore the payload of {}", record.name);
    }

    host.set_physics_active(entity, record.physics_active);
    if record.physics_active {
        host.set_linear_velocity(entity, Vec3::ZERO);
        host.set_angular_velocity(entity, Vec3::ZERO);
        host.refresh_physics_state(entity);
    }
    Ok(entity)
}

/// A full snapshot of the tracked classes, reconciled by diffing against the live world
#[derive(Clone, Debug, Default)]
pub struct FullSaveState {
    pub store: SnapshotStore,
    pub tracked_classes: Vec<ClassId>,
    pub policy: CapturePolicy,
}

impl FullSaveState {
    pub fn new(tracked_classes: Vec<ClassId>, policy: CapturePolicy) -> FullSaveState {
        FullSaveState {
            store: SnapshotStore::default(),
            tracked_classes,
            policy,
        }
    }

    /// Wraps a store that was decoded rather than captured
    pub fn from_store(
        mut store: SnapshotStore,
        tracked_classes: Vec<ClassId>,
        policy: CapturePolicy,
    ) -> FullSaveState {
        for class_id in tracked_classes.iter() {
            store.track_class(*class_id);
        }
        FullSaveState {
            store,
            tracked_classes,
            policy,
        }
    }
}

impl SaveStateInterface for FullSaveState {
    fn clear_contents(&mut self) {
        self.store.clear();
    }

    fn capture(&mut self, host: &mut dyn SaveHost) -> Result<usize, StateSaveError> {
        let store = capture(host, &self.tracked_classes, self.policy)?;
        info!("captured {} objects", store.len());
        self.store = store;
        Ok(self.store.len())
    }

    fn reconcile(&mut self, host: &mut dyn SaveHost) -> Result<ReconcileReport, StateSaveError> {
        let report = reconcile(&self.store, host, self.policy);
        info!(
            "reconciled snapshot: {} moved, {} destroyed, {} spawned, {} skipped",
            report.moved, report.destroyed, report.spawned, report.skipped
        );
        Ok(report)
    }

    fn on_spawn(&mut self, _host: &dyn SaveHost, _entity: Entity) {}

    fn on_destroy(&mut self, _host: &dyn SaveHost, _entity: Entity) {}
}
