use bevy::log::info;

use crate::{
    change_detection::IncrementalSaveState,
    error::StateSaveError,
    host::SaveHost,
    reconcile::{FullSaveState, ReconcileReport},
    record::{CapturePolicy, ClassId},
    SaveStateInterface,
};

/// One save slot: the last full snapshot saved into it and the spawn/destroy events seen since
#[derive(Clone, Debug)]
pub struct Slot {
    pub full: FullSaveState,
    pub incremental: IncrementalSaveState,
    saved: bool,
}

impl Slot {
    fn new(tracked_classes: &[ClassId], policy: CapturePolicy) -> Slot {
        Slot {
            full: FullSaveState::new(tracked_classes.to_vec(), policy),
            incremental: IncrementalSaveState::new(tracked_classes.to_vec(), policy),
            saved: false,
        }
    }

    /// Whether anything has been saved into this slot
    pub fn is_saved(&self) -> bool {
        self.saved
    }
}

/// A fixed size table of [`Slot`]s addressed by a 0 based index or by name
#[derive(Clone, Debug)]
pub struct SlotManager {
    slots: Vec<Slot>,
    slot_names: Vec<String>,
}

impl SlotManager {
    pub fn new(
        slot_count: usize,
        slot_names: Vec<String>,
        tracked_classes: &[ClassId],
        policy: CapturePolicy,
    ) -> Result<SlotManager, StateSaveError> {
        if slot_count == 0 {
            return Err(StateSaveError::NoSlots);
        }
        if tracked_classes.is_empty() {
            return Err(StateSaveError::NoTrackedClasses);
        }
        Ok(SlotManager {
            slots: (0..slot_count)
                .map(|_| Slot::new(tracked_classes, policy))
                .collect(),
            slot_names,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Checks that `0 <= index < len`
    pub fn check_index(&self, index: isize) -> Result<usize, StateSaveError> {
        usize::try_from(index)
            .ok()
            .filter(|index| *index < self.slots.len())
            .ok_or(StateSaveError::SlotOutOfRange {
                index,
                slot_count: self.slots.len(),
            })
    }

    /// Index of the slot with the given name
    pub fn index_of(&self, name: &str) -> Result<usize, StateSaveError> {
        self.slot_names
            .iter()
            .position(|slot_name| slot_name == name)
            .filter(|index| *index < self.slots.len())
            .ok_or_else(|| StateSaveError::UnknownSlotName(name.to_string()))
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Incremental states of every slot, sharing their trackers
    pub fn incremental_states(&self) -> Vec<IncrementalSaveState> {
        self.slots
            .iter()
            .map(|slot| slot.incremental.clone())
            .collect()
    }

    /// Captures the world into the slot, replacing whatever it held, and makes the world the
    /// slot's new baseline for incremental tracking
    pub fn save_to_slot(
        &mut self,
        index: isize,
        host: &mut dyn SaveHost,
    ) -> Result<usize, StateSaveError> {
        let index = self.check_index(index)?;
        let slot = &mut self.slots[index];

        let mut full = FullSaveState::new(slot.full.tracked_classes.clone(), slot.full.policy);
        let captured = full.capture(host)?;
        slot.full = full;
        slot.incremental.capture(host)?;
        slot.saved = true;

        info!("saved {} objects into slot {}", captured, index);
        Ok(captured)
    }

    /// Reconciles the world against the slot's full snapshot
    pub fn load_from_slot(
        &mut self,
        index: isize,
        host: &mut dyn SaveHost,
    ) -> Result<ReconcileReport, StateSaveError> {
        let index = self.check_index(index)?;
        let slot = &mut self.slots[index];
        if !slot.saved {
            return Err(StateSaveError::EmptySlot(index));
        }

        let report = slot.full.reconcile(host)?;
        // The world is back at this slot's baseline
        slot.incremental.capture(host)?;
        Ok(report)
    }

    /// Replays the spawn/destroy events recorded since the slot was saved or loaded
    pub fn load_incremental_from_slot(
        &mut self,
        index: isize,
        host: &mut dyn SaveHost,
    ) -> Result<ReconcileReport, StateSaveError> {
        let index = self.check_index(index)?;
        let slot = &mut self.slots[index];
        if !slot.saved {
            return Err(StateSaveError::EmptySlot(index));
        }
        slot.incremental.reconcile(host)
    }

    pub fn clear_slot(&mut self, index: isize) -> Result<(), StateSaveError> {
        let index = self.check_index(index)?;
        let slot = &mut self.slots[index];
        slot.full.clear_contents();
        slot.incremental.clear_contents();
        slot.saved = false;
        Ok(())
    }
}
