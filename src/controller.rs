use std::path::{Path, PathBuf};

use bevy::log::{error, info};

use crate::{
    blob::BlobStore,
    builder::StateSaveConfig,
    codec::{decode_save_file, decode_snapshot, encode_save_file},
    command::{
        CommandChannel, CommandMeta, CommandQueue, SaveCommand, LOAD_TRIGGER, SAVE_TRIGGER,
    },
    error::StateSaveError,
    host::{ObjectCodec, WorldHost},
    reconcile::{capture, FullSaveState, ReconcileReport},
    record::SnapshotStore,
    slots::SlotManager,
    SaveStateInterface,
};

/// Extension of every save file
pub const SAVE_EXTENSION: &str = "sav";

/// Owns the world host, the slot table and the save files of one running world.
///
/// Every method runs on the simulation thread and reports failure as `false` plus a log line.
/// Remote triggers are queued and only executed by [`StateSaveController::process_commands`].
pub struct StateSaveController<H, B>
where
    H: WorldHost + ObjectCodec + 'static,
    B: BlobStore,
{
    host: H,
    blob_store: B,
    slots: SlotManager,
    config: StateSaveConfig,
    commands: CommandQueue,
}

impl<H, B> StateSaveController<H, B>
where
    H: WorldHost + ObjectCodec + 'static,
    B: BlobStore,
{
    pub(crate) fn new(
        host: H,
        blob_store: B,
        slots: SlotManager,
        config: StateSaveConfig,
        commands: CommandQueue,
    ) -> StateSaveController<H, B> {
        StateSaveController {
            host,
            blob_store,
            slots,
            config,
            commands,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn blob_store(&self) -> &B {
        &self.blob_store
    }

    pub fn slots(&self) -> &SlotManager {
        &self.slots
    }

    pub fn config(&self) -> &StateSaveConfig {
        &self.config
    }

    /// Captures the world into the slot at `index`, replacing its contents
    pub fn save_to_slot(&mut self, index: isize) -> bool {
        report(
            "save to slot",
            self.slots.save_to_slot(index, &mut self.host),
        )
    }

    /// Brings the world back to the snapshot in the slot at `index`
    pub fn load_from_slot(&mut self, index: isize) -> bool {
        report(
            "load from slot",
            self.slots.load_from_slot(index, &mut self.host),
        )
    }

    /// Undoes the spawns and destroys seen since the slot at `index` was saved or loaded
    pub fn load_incremental_from_slot(&mut self, index: isize) -> bool {
        report(
            "incremental load from slot",
            self.slots.load_incremental_from_slot(index, &mut self.host),
        )
    }

    pub fn save_to_named_slot(&mut self, name: &str) -> bool {
        match self.slots.index_of(name) {
            Ok(index) => self.save_to_slot(index as isize),
            Err(err) => report::<()>("save to slot", Err(err)),
        }
    }

    pub fn load_from_named_slot(&mut self, name: &str) -> bool {
        match self.slots.index_of(name) {
            Ok(index) => self.load_from_slot(index as isize),
            Err(err) => report::<()>("load from slot", Err(err)),
        }
    }

    /// Path of the save file called `name` for the current world
    pub fn save_file_path(&self, name: &str, dir: &Path) -> PathBuf {
        dir.join(format!(
            "{}_{}.{}",
            self.host.world_name(),
            name,
            SAVE_EXTENSION
        ))
    }

    /// Captures the world and writes it to `{dir}/{world}_{name}.sav`
    pub fn save_to_file(&mut self, name: &str, dir: &Path) -> bool {
        let result = self.try_save_to_file(name, dir);
        report("save to file", result)
    }

    /// Reads `{dir}/{world}_{name}.sav` and brings the world back to it. Files captured in
    /// another world are rejected before anything is touched.
    pub fn load_from_file(&mut self, name: &str, dir: &Path) -> bool {
        let result = self.try_load_from_file(name, dir);
        report("load from file", result)
    }

    /// Names of the save files in `dir`
    pub fn list_save_files(&self, dir: &Path) -> Vec<String> {
        self.blob_store.list_files(dir, SAVE_EXTENSION)
    }

    fn try_save_to_file(&mut self, name: &str, dir: &Path) -> Result<usize, StateSaveError> {
        let store = capture(
            &mut self.host,
            &self.config.tracked_classes,
            self.config.capture_policy,
        )?;
        let bytes = encode_save_file(&self.host.world_name(), &store)?;
        let path = self.save_file_path(name, dir);
        if !self.blob_store.write_file(&path, &bytes) {
            return Err(StateSaveError::BlobWrite(path));
        }
        info!("saved {} objects to {:?}", store.len(), path);
        Ok(store.len())
    }

    fn try_load_from_file(
        &mut self,
        name: &str,
        dir: &Path,
    ) -> Result<ReconcileReport, StateSaveError> {
        let path = self.save_file_path(name, dir);
        let bytes = self
            .blob_store
            .read_file(&path)
            .ok_or_else(|| StateSaveError::BlobRead(path.clone()))?;
        let file = decode_save_file(&bytes)?;

        let world_name = self.host.world_name();
        if file.world_name != world_name {
            return Err(StateSaveError::IdentityMismatch {
                expected: world_name,
                found: file.world_name,
            });
        }

        let mut store = SnapshotStore::default();
        decode_snapshot(&file.records, file.item_count, &mut store)?;
        let mut state = FullSaveState::from_store(
            store,
            self.config.tracked_classes.clone(),
            self.config.capture_policy,
        );
        state.reconcile(&mut self.host)
    }

    /// Exposes the save and load triggers on the channel. Invoking them only queues a command.
    pub fn bind_commands<C: CommandChannel + ?Sized>(&self, channel: &mut C) -> bool {
        let save_sender = self.commands.sender();
        let save_bound = channel.register_operation(
            SAVE_TRIGGER,
            Box::new(move |name| save_sender.send(SaveCommand::Save(name))),
        );
        let load_sender = self.commands.sender();
        let load_bound = channel.register_operation(
            LOAD_TRIGGER,
            Box::new(move |name| load_sender.send(SaveCommand::Load(name))),
        );
        if !(save_bound && load_bound) {
            error!("could not bind the save and load triggers");
        }
        save_bound && load_bound
    }

    /// Executes every queued command in arrival order and returns how many were executed
    pub fn process_commands(&mut self) -> usize {
        let mut executed = 0;
        while let Some(meta) = self.commands.pop() {
            self.execute(meta);
            executed += 1;
        }
        executed
    }

    fn execute(&mut self, meta: CommandMeta) {
        let dir = self.config.save_directory.clone();
        let (is_save, name) = match meta.command {
            SaveCommand::Save(name) => (true, name),
            SaveCommand::Load(name) => (false, name),
        };
        let name = name.unwrap_or_else(|| self.config.default_save_name.clone());
        info!(
            "executing remote {} of {} requested at {}",
            if is_save { "save" } else { "load" },
            name,
            meta.command_time
        );
        if is_save {
            self.save_to_file(&name, &dir);
        } else {
            self.load_from_file(&name, &dir);
        }
    }
}

/// Converts the outcome of an operation into the boolean surface, logging failures
fn report<T>(operation: &str, result: Result<T, StateSaveError>) -> bool {
    match result {
        Ok(_) => true,
        Err(err) => {
            error!("{} failed: {}", operation, err);
            false
        }
    }
}
