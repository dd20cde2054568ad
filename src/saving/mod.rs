use bevy::{
    ecs::{component::Component, entity::Entity, world::World},
    prelude::EntityWorldMut,
    utils::HashMap,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::record::ClassId;

pub mod implements;

/// The functions needed to create, save and restore one saveable class. Built by
/// [`ClassRegistry::register_class`] so the host never needs to know the concrete type.
#[derive(Clone, Copy)]
pub struct ClassHandlers {
    pub name: &'static str,
    pub spawn: ClassSpawnFn,
    pub encode: ClassEncodeFn,
    pub decode: ClassDecodeFn,
}

/// Inserts a fresh instance of the class component onto a newly spawned entity.
pub type ClassSpawnFn = fn(entity: &mut EntityWorldMut);

/// Serializes the class component of the given entity.
pub type ClassEncodeFn = fn(world: &World, entity: Entity) -> Option<Vec<u8>>;

/// Deserializes the class component onto the given entity. Returns false if the data was unusable.
pub type ClassDecodeFn = fn(data: &[u8], entity: &mut EntityWorldMut) -> bool;

/// A registry that maps every saveable [`ClassId`] to its handlers
#[derive(Clone, Default)]
pub struct ClassRegistry {
    pub class_map: HashMap<ClassId, ClassHandlers>,
}

impl ClassRegistry {
    pub fn new() -> ClassRegistry {
        ClassRegistry::default()
    }

    /// Registers a class component into the [`ClassRegistry`] so objects carrying it can be captured,
    /// respawned and restored
    pub fn register_class<C>(&mut self)
    where
        C: Component + Serialize + DeserializeOwned + Default + SaveClass,
    {
        if self.class_map.contains_key(&C::class_id_const()) {
            panic!(
                "ClassRegistry class_map already contains key {}",
                C::class_id_const(),
            )
        }
        self.class_map.insert(
            C::class_id_const(),
            ClassHandlers {
                name: std::any::type_name::<C>(),
                spawn: class_spawn_onto::<C>,
                encode: class_serialize_from::<C>,
                decode: class_deserialize_onto::<C>,
            },
        );
    }

    pub fn get(&self, class_id: ClassId) -> Option<&ClassHandlers> {
        self.class_map.get(&class_id)
    }

    pub fn contains(&self, class_id: ClassId) -> bool {
        self.class_map.contains_key(&class_id)
    }

    /// Adds the default registry which has the built in [`MeshObject`](implements::MeshObject) class
    pub fn default_registry() -> ClassRegistry {
        let mut registry = ClassRegistry::new();
        registry.register_class::<implements::MeshObject>();
        registry
    }
}

/// Inserts the default value of the class onto the given entity.
pub fn class_spawn_onto<C>(entity: &mut EntityWorldMut)
where
    C: Component + Default,
{
    entity.insert(C::default());
}

/// Serializes the class component of the given entity.
pub fn class_serialize_from<C>(world: &World, entity: Entity) -> Option<Vec<u8>>
where
    C: Component + SaveClass,
{
    world.get::<C>(entity)?.to_binary()
}

/// Deserializes a binary class component onto the given entity.
pub fn class_deserialize_onto<C>(data: &[u8], entity: &mut EntityWorldMut) -> bool
where
    C: Component + DeserializeOwned,
{
    let Some(component) = bincode::deserialize::<C>(data).ok() else {
        return false;
    };
    entity.insert(component);
    true
}

/// Must be implemented on the class component of every object that is expected to be saved
///
/// The id returned by [`SaveClass::class_id_const`] must be unique within a [`ClassRegistry`]
///
/// ## Example
/// ```
/// # use bevy_state_save::saving::SaveClass;
/// # use bevy_state_save::ClassId;
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Serialize, Deserialize)]
/// # struct Barrel { fill: u32 }
/// impl SaveClass for Barrel {
///     fn class_id_const() -> ClassId
///     where
///        Self: Sized,
///     {
///       9
///     }
///
///     fn to_binary(&self) -> Option<Vec<u8>> {
///       bincode::serialize(self).ok()
///     }
/// }
///
/// ```
pub trait SaveClass {
    fn class_id_const() -> ClassId
    where
        Self: Sized;

    /// Serializes the object into binary
    fn to_binary(&self) -> Option<Vec<u8>>;
}

#[cfg(test)]
mod test {
    use bevy::prelude::{Component, World};
    use serde::{Deserialize, Serialize};

    use super::{implements::MeshObject, ClassRegistry, SaveClass};
    use crate::record::ClassId;

    #[derive(Default, Component, Serialize, Deserialize, Debug, PartialEq)]
    struct Barrel {
        fill: u32,
    }

    impl SaveClass for Barrel {
        fn class_id_const() -> ClassId
        where
            Self: Sized,
        {
            40
        }

        fn to_binary(&self) -> Option<Vec<u8>> {
            bincode::serialize(self).ok()
        }
    }

    #[test]
    fn test_handlers_round_trip_component() {
        let mut registry = ClassRegistry::default_registry();
        registry.register_class::<Barrel>();
        assert!(registry.contains(0));
        let Some(handlers) = registry.get(40).copied() else {
            panic!("Barrel was not registered")
        };

        let mut world = World::new();
        let source = world.spawn(Barrel { fill: 12 }).id();
        let data = (handlers.encode)(&world, source).unwrap();

        let mut target = world.spawn_empty();
        (handlers.spawn)(&mut target);
        assert!((handlers.decode)(&data, &mut target));
        let target = target.id();

        assert_eq!(world.get::<Barrel>(target), Some(&Barrel { fill: 12 }));
        assert!(world.get::<MeshObject>(target).is_none());
    }

    #[test]
    #[should_panic]
    fn test_duplicate_registration_panics() {
        let mut registry = ClassRegistry::default_registry();
        registry.register_class::<MeshObject>();
    }
}
