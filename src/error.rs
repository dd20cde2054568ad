use std::path::PathBuf;

use thiserror::Error;

use crate::record::ClassId;

/// Broad category of a [`StateSaveError`], used to decide how a failure is reported
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad slot index, empty slot, or nothing to track. Nothing was mutated.
    Configuration,
    /// A single record could not be respawned. The batch continues.
    Resolution,
    /// A save file belongs to another world. The whole load is rejected.
    IdentityMismatch,
    /// Snapshot bytes ended early or were malformed.
    CorruptData,
    /// The blob store could not read or write a file.
    Storage,
}

#[derive(Debug, Error)]
pub enum StateSaveError {
    #[error("slot index {index} is out of range for {slot_count} slots")]
    SlotOutOfRange { index: isize, slot_count: usize },
    #[error("no slot is named {0:?}")]
    UnknownSlotName(String),
    #[error("slot {0} holds no snapshot")]
    EmptySlot(usize),
    #[error("no tracked classes configured")]
    NoTrackedClasses,
    #[error("a state save needs at least one slot")]
    NoSlots,
    #[error("class {0} is not registered with the world host")]
    UnresolvedClass(ClassId),
    #[error("world host refused to spawn {name:?} of class {class_id}")]
    SpawnFailed { name: String, class_id: ClassId },
    #[error("save file was captured in world {found:?} but the current world is {expected:?}")]
    IdentityMismatch { expected: String, found: String },
    #[error("corrupt snapshot data: {0}")]
    CorruptData(String),
    #[error("could not read {0:?}")]
    BlobRead(PathBuf),
    #[error("could not write {0:?}")]
    BlobWrite(PathBuf),
}

impl StateSaveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StateSaveError::SlotOutOfRange { .. }
            | StateSaveError::UnknownSlotName(_)
            | StateSaveError::EmptySlot(_)
            | StateSaveError::NoTrackedClasses
            | StateSaveError::NoSlots => ErrorKind::Configuration,
            StateSaveError::UnresolvedClass(_) | StateSaveError::SpawnFailed { .. } => {
                ErrorKind::Resolution
            }
            StateSaveError::IdentityMismatch { .. } => ErrorKind::IdentityMismatch,
            StateSaveError::CorruptData(_) => ErrorKind::CorruptData,
            StateSaveError::BlobRead(_) | StateSaveError::BlobWrite(_) => ErrorKind::Storage,
        }
    }
}

impl From<bincode::Error> for StateSaveError {
    fn from(error: bincode::Error) -> Self {
        StateSaveError::CorruptData(error.to_string())
    }
}
