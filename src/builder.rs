use std::path::PathBuf;

use bevy::log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    blob::BlobStore,
    command::CommandQueue,
    controller::StateSaveController,
    error::StateSaveError,
    host::{ObjectCodec, WorldHost},
    record::{CapturePolicy, ClassId},
    saving::{implements::MeshObject, SaveClass},
    slots::SlotManager,
    SaveStateInterface,
};

/// Settings of a [`StateSaveController`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSaveConfig {
    /// How many in memory slots are available
    pub slot_count: usize,
    /// Optional names for the slots. The name at position i addresses slot i
    pub slot_names: Vec<String>,
    /// Classes whose objects are captured and reconciled
    pub tracked_classes: Vec<ClassId>,
    pub capture_policy: CapturePolicy,
    /// Directory save files are written to
    pub save_directory: PathBuf,
    /// Save name used by remote triggers that don't give one
    pub default_save_name: String,
}

impl Default for StateSaveConfig {
    fn default() -> Self {
        StateSaveConfig {
            slot_count: 1,
            slot_names: vec![],
            tracked_classes: vec![MeshObject::class_id_const()],
            capture_policy: CapturePolicy::default(),
            save_directory: PathBuf::from("Saved/StateSave"),
            default_save_name: "default".to_string(),
        }
    }
}

/// StateSaveBuilder that creates a new [`StateSaveController`] and sets it up correctly
pub struct StateSaveBuilder<H, B>
where
    H: WorldHost + ObjectCodec + 'static,
    B: BlobStore,
{
    pub host: H,
    pub blob_store: B,
    pub config: StateSaveConfig,
}

impl<H, B> StateSaveBuilder<H, B>
where
    H: WorldHost + ObjectCodec + 'static,
    B: BlobStore,
{
    pub fn new(host: H, blob_store: B) -> StateSaveBuilder<H, B> {
        StateSaveBuilder {
            host,
            blob_store,
            config: StateSaveConfig::default(),
        }
    }

    pub fn with_config(mut self, config: StateSaveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.config.slot_count = slot_count;
        self
    }

    pub fn with_slot_names(mut self, slot_names: Vec<String>) -> Self {
        self.config.slot_names = slot_names;
        self
    }

    /// Replaces the tracked classes
    pub fn with_tracked_classes(mut self, tracked_classes: Vec<ClassId>) -> Self {
        self.config.tracked_classes = tracked_classes;
        self
    }

    /// Adds the class of `C` to the tracked classes
    pub fn track_class<C: SaveClass>(mut self) -> Self {
        if !self.config.tracked_classes.contains(&C::class_id_const()) {
            self.config.tracked_classes.push(C::class_id_const());
        }
        self
    }

    pub fn with_capture_policy(mut self, capture_policy: CapturePolicy) -> Self {
        self.config.capture_policy = capture_policy;
        self
    }

    pub fn with_save_directory(mut self, save_directory: impl Into<PathBuf>) -> Self {
        self.config.save_directory = save_directory.into();
        self
    }

    pub fn with_default_save_name(mut self, default_save_name: impl Into<String>) -> Self {
        self.config.default_save_name = default_save_name.into();
        self
    }

    /// Validates the configuration, creates the slots and subscribes every slot's delta tracker to
    /// the host's spawn and destroy events
    pub fn build(mut self) -> Result<StateSaveController<H, B>, StateSaveError> {
        for class_id in self.config.tracked_classes.iter() {
            if !self.host.resolves_class(*class_id) {
                warn!(
                    "tracked class {} is not registered, its objects can't be respawned",
                    class_id
                );
            }
        }

        let slots = SlotManager::new(
            self.config.slot_count,
            self.config.slot_names.clone(),
            &self.config.tracked_classes,
            self.config.capture_policy,
        )?;

        let mut spawn_states = slots.incremental_states();
        self.host
            .register_spawn_observer(Box::new(move |host, entity| {
                for state in spawn_states.iter_mut() {
                    state.on_spawn(host, entity);
                }
            }));
        let mut destroy_states = slots.incremental_states();
        self.host
            .register_destroy_observer(Box::new(move |host, entity| {
                for state in destroy_states.iter_mut() {
                    state.on_destroy(host, entity);
                }
            }));

        info!(
            "state save ready for world {} with {} slots tracking {} classes",
            self.host.world_name(),
            self.config.slot_count,
            self.config.tracked_classes.len()
        );

        Ok(StateSaveController::new(
            self.host,
            self.blob_store,
            slots,
            self.config,
            CommandQueue::default(),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::{StateSaveBuilder, StateSaveConfig};
    use crate::{
        blob::MemoryBlobStore,
        error::{ErrorKind, StateSaveError},
        host::SimWorldHost,
        saving::ClassRegistry,
    };

    fn host() -> SimWorldHost {
        SimWorldHost::new("builder", ClassRegistry::default_registry())
    }

    #[test]
    fn test_rejects_empty_configuration() {
        let no_slots = StateSaveBuilder::new(host(), MemoryBlobStore::default())
            .with_slot_count(0)
            .build();
        assert!(matches!(no_slots, Err(StateSaveError::NoSlots)));

        let no_classes = StateSaveBuilder::new(host(), MemoryBlobStore::default())
            .with_tracked_classes(vec![])
            .build();
        assert_eq!(
            no_classes.err().map(|err| err.kind()),
            Some(ErrorKind::Configuration)
        );
    }

    #[test]
    fn test_builds_with_defaults() {
        let controller = StateSaveBuilder::new(host(), MemoryBlobStore::default())
            .with_slot_count(3)
            .build()
            .unwrap();
        assert_eq!(controller.slots().len(), 3);
        assert_eq!(controller.config().tracked_classes, vec![0]);
        assert_eq!(StateSaveConfig::default().default_save_name, "default");
    }
}
