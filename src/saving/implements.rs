use bevy::prelude::{Component, Reflect};
use serde::{Deserialize, Serialize};

use crate::record::ClassId;

use super::SaveClass;

/// The built in saveable class: a plain object rendered with a mesh. Its mesh asset is held in an
/// [`AuxReference`](crate::host::AuxReference) beside it, not in its fields.
#[derive(
    Default, Clone, Eq, Hash, Debug, PartialEq, Component, Reflect, Serialize, Deserialize,
)]
pub struct MeshObject {
    pub material: String,
    pub hit_points: u32,
}

impl SaveClass for MeshObject {
    fn class_id_const() -> ClassId
    where
        Self: Sized,
    {
        0
    }

    fn to_binary(&self) -> Option<Vec<u8>> {
        bincode::serialize(self).ok()
    }
}
