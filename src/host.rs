//! The world a snapshot is taken from and applied to.
//!
//! The snapshot engine never touches a [`World`] directly. It talks to a [`WorldHost`] for object
//! lifecycle, transforms and physics, and to an [`ObjectCodec`] for the opaque payload of an
//! object's remaining fields. [`SimWorldHost`] implements both over a bevy [`World`], using a
//! [`ClassRegistry`] to know how to spawn and (de)serialize each saveable class.

use bevy::{
    log::{error, warn},
    prelude::{Component, Entity, Name, Reflect, Transform, Vec3, With, World},
    utils::HashMap,
};
use serde::{Deserialize, Serialize};

use crate::{
    record::{ClassId, Mobility},
    saving::ClassRegistry,
};

/// Callback invoked by a [`WorldHost`] when a saveable object is spawned or destroyed. Destroy
/// callbacks run while the object is still alive so it can be captured.
pub type LifecycleObserver = Box<dyn FnMut(&dyn SaveHost, Entity) + Send + Sync>;

/// Object lifecycle, transform and physics access the snapshot engine needs from the engine.
///
/// Every call fails by returning `false`, `None` or an empty value, never by panicking.
pub trait WorldHost {
    /// Identity of the running world. Save files from another world are rejected.
    fn world_name(&self) -> String;

    /// All live objects whose class is one of `class_ids`
    fn find_all_of_classes(&mut self, class_ids: &[ClassId]) -> Vec<Entity>;

    fn contains(&self, entity: Entity) -> bool;

    /// Whether [`WorldHost::spawn`] knows how to create an object of this class
    fn resolves_class(&self, class_id: ClassId) -> bool;

    fn name(&self, entity: Entity) -> Option<String>;

    fn class_of(&self, entity: Entity) -> Option<ClassId>;

    fn mobility(&self, entity: Entity) -> Mobility;

    /// Creates an object of the given class under exactly the given name. Fails if a live object
    /// already holds the name.
    fn spawn(&mut self, class_id: ClassId, name: &str, transform: &Transform) -> Option<Entity>;

    fn destroy(&mut self, entity: Entity) -> bool;

    fn transform(&self, entity: Entity) -> Option<Transform>;

    fn set_transform(&mut self, entity: Entity, transform: &Transform) -> bool;

    fn set_linear_velocity(&mut self, entity: Entity, velocity: Vec3);

    fn set_angular_velocity(&mut self, entity: Entity, velocity: Vec3);

    fn is_physics_active(&self, entity: Entity) -> bool;

    fn set_physics_active(&mut self, entity: Entity, active: bool);

    /// Rebuilds the physics state of the object from its current transform
    fn refresh_physics_state(&mut self, entity: Entity);

    /// Class specific asset reference (a mesh) that lives outside the generic payload
    fn aux_reference(&self, entity: Entity) -> Option<String>;

    fn set_aux_reference(&mut self, entity: Entity, reference: String);

    fn register_spawn_observer(&mut self, observer: LifecycleObserver);

    fn register_destroy_observer(&mut self, observer: LifecycleObserver);
}

/// Opaque serialization of an object's fields beyond its transform, class and physics flag
pub trait ObjectCodec {
    fn encode(&self, entity: Entity) -> Option<Vec<u8>>;

    /// Applies previously encoded bytes onto the object. Returns false if nothing was applied.
    fn decode(&mut self, bytes: &[u8], entity: Entity) -> bool;
}

/// A world that can both be mutated and serialized. Automatically implemented.
pub trait SaveHost: WorldHost + ObjectCodec {}

impl<T: WorldHost + ObjectCodec> SaveHost for T {}

/// Identifies which saveable class an entity is an instance of
#[derive(Clone, Copy, Eq, Hash, Debug, PartialEq, Component, Reflect, Serialize, Deserialize)]
pub struct SaveClassId(pub ClassId);

/// Rigid body state of an object
#[derive(Default, Clone, Debug, PartialEq, Component, Reflect, Serialize, Deserialize)]
pub struct PhysicsBody {
    pub simulating: bool,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Bumped every time the physics state is rebuilt
    pub state_generation: u32,
}

/// Reference to a mesh or other asset that must be attached before the object's fields are restored
#[derive(Clone, Eq, Hash, Debug, PartialEq, Component, Reflect, Serialize, Deserialize)]
pub struct AuxReference(pub String);

/// Free form tags carried inside an object's payload
#[derive(Default, Clone, Eq, Hash, Debug, PartialEq, Component, Reflect, Serialize, Deserialize)]
pub struct ObjectTags(pub Vec<String>);

/// Component inserted onto an entity to have [`SimWorldHost::despawn_tracked`] destroy it while
/// notifying destroy observers
#[derive(Component)]
pub struct DespawnTracked;

/// What [`SimWorldHost`] stores as an object's payload
#[derive(Default, Debug, Serialize, Deserialize)]
struct PayloadEnvelope {
    fields: Vec<u8>,
    tags: Vec<String>,
    aux: Option<String>,
    mobility: Mobility,
}

/// A [`WorldHost`] and [`ObjectCodec`] over a bevy [`World`]
pub struct SimWorldHost {
    /// A world that should hold all sim state
    pub world: World,
    /// Holds the class registrations that can be spawned and (de)serialized
    pub registry: ClassRegistry,
    world_name: String,
    /// Objects spawned through the host by name. Entries can go stale when gameplay despawns
    /// through the world directly, so they are checked against the entity's `Name`.
    names: HashMap<String, Entity>,
    spawn_observers: Vec<LifecycleObserver>,
    destroy_observers: Vec<LifecycleObserver>,
}

impl SimWorldHost {
    pub fn new(world_name: impl Into<String>, registry: ClassRegistry) -> SimWorldHost {
        SimWorldHost {
            world: World::new(),
            registry,
            world_name: world_name.into(),
            names: HashMap::default(),
            spawn_observers: vec![],
            destroy_observers: vec![],
        }
    }

    pub fn set_mobility(&mut self, entity: Entity, mobility: Mobility) {
        if let Some(mut entity_mut) = self.world.get_entity_mut(entity) {
            entity_mut.insert(mobility);
        }
    }

    /// Finds the live object with the given name
    pub fn find_by_name(&mut self, name: &str) -> Option<Entity> {
        let mut query = self.world.query::<(Entity, &Name)>();
        query
            .iter(&self.world)
            .find(|(_, entity_name)| entity_name.as_str() == name)
            .map(|(entity, _)| entity)
    }

    /// Whether a live object spawned through the host holds `name`
    pub fn name_in_use(&self, name: &str) -> bool {
        self.names.get(name).is_some_and(|entity| {
            self.world
                .get::<Name>(*entity)
                .is_some_and(|entity_name| entity_name.as_str() == name)
        })
    }

    /// Destroys every entity marked with [`DespawnTracked`] through [`WorldHost::destroy`] and
    /// returns how many were destroyed
    pub fn despawn_tracked(&mut self) -> usize {
        let mut query = self.world.query_filtered::<Entity, With<DespawnTracked>>();
        let marked: Vec<Entity> = query.iter(&self.world).collect();
        marked
            .into_iter()
            .filter(|entity| self.destroy(*entity))
            .count()
    }

    fn notify(&mut self, spawned: bool, entity: Entity) {
        let mut observers = if spawned {
            std::mem::take(&mut self.spawn_observers)
        } else {
            std::mem::take(&mut self.destroy_observers)
        };
        {
            let host: &dyn SaveHost = &*self;
            for observer in observers.iter_mut() {
                observer(host, entity);
            }
        }
        if spawned {
            self.spawn_observers = observers;
        } else {
            self.destroy_observers = observers;
        }
    }
}

impl WorldHost for SimWorldHost {
    fn world_name(&self) -> String {
        self.world_name.clone()
    }

    fn find_all_of_classes(&mut self, class_ids: &[ClassId]) -> Vec<Entity> {
        let mut query = self.world.query::<(Entity, &SaveClassId)>();
        query
            .iter(&self.world)
            .filter(|(_, class)| class_ids.contains(&class.0))
            .map(|(entity, _)| entity)
            .collect()
    }

    fn contains(&self, entity: Entity) -> bool {
        self.world.get_entity(entity).is_some()
    }

    fn resolves_class(&self, class_id: ClassId) -> bool {
        self.registry.contains(class_id)
    }

    fn name(&self, entity: Entity) -> Option<String> {
        self.world
            .get::<Name>(entity)
            .map(|name| name.as_str().to_string())
    }

    fn class_of(&self, entity: Entity) -> Option<ClassId> {
        self.world.get::<SaveClassId>(entity).map(|class| class.0)
    }

    fn mobility(&self, entity: Entity) -> Mobility {
        self.world
            .get::<Mobility>(entity)
            .copied()
            .unwrap_or_default()
    }

    fn spawn(&mut self, class_id: ClassId, name: &str, transform: &Transform) -> Option<Entity> {
        let Some(handlers) = self.registry.get(class_id).copied() else {
            error!("cannot spawn {}: class {} is not registered", name, class_id);
            return None;
        };
        if self.name_in_use(name) {
            warn!("cannot spawn {}: the name is already in use", name);
            return None;
        }

        let mut entity_mut = self.world.spawn((
            Name::new(name.to_string()),
            *transform,
            SaveClassId(class_id),
            Mobility::Movable,
            PhysicsBody::default(),
        ));
        (handlers.spawn)(&mut entity_mut);
        let entity = entity_mut.id();
        self.names.insert(name.to_string(), entity);

        self.notify(true, entity);
        Some(entity)
    }

    fn destroy(&mut self, entity: Entity) -> bool {
        if !self.contains(entity) {
            return false;
        }
        self.notify(false, entity);
        if let Some(name) = self.name(entity) {
            if self.names.get(&name) == Some(&entity) {
                self.names.remove(&name);
            }
        }
        self.world.despawn(entity)
    }

    fn transform(&self, entity: Entity) -> Option<Transform> {
        self.world.get::<Transform>(entity).copied()
    }

    fn set_transform(&mut self, entity: Entity, transform: &Transform) -> bool {
        let Some(mut entity_mut) = self.world.get_entity_mut(entity) else {
            return false;
        };
        entity_mut.insert(*transform);
        true
    }

    fn set_linear_velocity(&mut self, entity: Entity, velocity: Vec3) {
        if let Some(mut body) = self.world.get_mut::<PhysicsBody>(entity) {
            body.linear_velocity = velocity;
        }
    }

    fn set_angular_velocity(&mut self, entity: Entity, velocity: Vec3) {
        if let Some(mut body) = self.world.get_mut::<PhysicsBody>(entity) {
            body.angular_velocity = velocity;
        }
    }

    fn is_physics_active(&self, entity: Entity) -> bool {
        self.world
            .get::<PhysicsBody>(entity)
            .map(|body| body.simulating)
            .unwrap_or(false)
    }

    fn set_physics_active(&mut self, entity: Entity, active: bool) {
        if let Some(mut body) = self.world.get_mut::<PhysicsBody>(entity) {
            body.simulating = active;
        }
    }

    fn refresh_physics_state(&mut self, entity: Entity) {
        if let Some(mut body) = self.world.get_mut::<PhysicsBody>(entity) {
            body.state_generation = body.state_generation.wrapping_add(1);
        }
    }

    fn aux_reference(&self, entity: Entity) -> Option<String> {
        self.world
            .get::<AuxReference>(entity)
            .map(|reference| reference.0.clone())
    }

    fn set_aux_reference(&mut self, entity: Entity, reference: String) {
        if let Some(mut entity_mut) = self.world.get_entity_mut(entity) {
            entity_mut.insert(AuxReference(reference));
        }
    }

    fn register_spawn_observer(&mut self, observer: LifecycleObserver) {
        self.spawn_observers.push(observer);
    }

    fn register_destroy_observer(&mut self, observer: LifecycleObserver) {
        self.destroy_observers.push(observer);
    }
}

impl ObjectCodec for SimWorldHost {
    fn encode(&self, entity: Entity) -> Option<Vec<u8>> {
        let class_id = self.class_of(entity)?;
        let handlers = self.registry.get(class_id)?;
        let fields = (handlers.encode)(&self.world, entity)?;
        let tags = self
            .world
            .get::<ObjectTags>(entity)
            .map(|tags| tags.0.clone())
            .unwrap_or_default();
        bincode::serialize(&PayloadEnvelope {
            fields,
            tags,
            aux: self.aux_reference(entity),
            mobility: self.mobility(entity),
        })
        .ok()
    }

    fn decode(&mut self, bytes: &[u8], entity: Entity) -> bool {
        let Some(envelope) = bincode::deserialize::<PayloadEnvelope>(bytes).ok() else {
            warn!("payload for {:?} is not a valid envelope", entity);
            return false;
        };
        let Some(handlers) = self
            .class_of(entity)
            .and_then(|class_id| self.registry.get(class_id).copied())
        else {
            return false;
        };
        let Some(mut entity_mut) = self.world.get_entity_mut(entity) else {
            return false;
        };
        // The asset reference has to be in place before the class fields are applied
        if let Some(aux) = envelope.aux {
            entity_mut.insert(AuxReference(aux));
        }
        entity_mut.insert(envelope.mobility);
        if !(handlers.decode)(&envelope.fields, &mut entity_mut) {
            warn!("could not restore the fields of {}", handlers.name);
            return false;
        }
        if envelope.tags.is_empty() {
            entity_mut.remove::<ObjectTags>();
        } else {
            entity_mut.insert(ObjectTags(envelope.tags));
        }
        true
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use bevy::prelude::{Transform, Vec3};

    use super::{DespawnTracked, ObjectCodec, ObjectTags, PhysicsBody, SimWorldHost, WorldHost};
    use crate::{
        record::Mobility,
        saving::{implements::MeshObject, ClassRegistry},
    };

    fn host() -> SimWorldHost {
        SimWorldHost::new("test_world", ClassRegistry::default_registry())
    }

    #[test]
    fn test_spawn_refuses_unknown_class_and_taken_name() {
        let mut host = host();
        assert!(host.spawn(99, "ghost", &Transform::IDENTITY).is_none());

        let first = host.spawn(0, "crate", &Transform::IDENTITY);
        assert!(first.is_some());
        assert!(host.spawn(0, "crate", &Transform::IDENTITY).is_none());
        assert_eq!(host.find_all_of_classes(&[0]).len(), 1);
        assert_eq!(host.mobility(first.unwrap()), Mobility::Movable);
    }

    #[test]
    fn test_names_are_freed_on_destroy() {
        let mut host = host();
        let first = host.spawn(0, "crate", &Transform::IDENTITY).unwrap();
        assert!(host.name_in_use("crate"));
        assert!(host.destroy(first));
        assert!(!host.name_in_use("crate"));
        let second = host.spawn(0, "crate", &Transform::IDENTITY).unwrap();

        // Despawned behind the host's back
        assert!(host.world.despawn(second));
        assert!(!host.name_in_use("crate"));
        assert!(host.spawn(0, "crate", &Transform::IDENTITY).is_some());
    }

    #[test]
    fn test_payload_carries_mesh_and_mobility() {
        let mut host = host();
        let source = host.spawn(0, "post", &Transform::IDENTITY).unwrap();
        host.set_aux_reference(source, "meshes/post.glb".to_string());
        host.set_mobility(source, Mobility::Stationary);
        let payload = host.encode(source).unwrap();

        let target = host.spawn(0, "copy", &Transform::IDENTITY).unwrap();
        assert!(host.decode(&payload, target));
        assert_eq!(host.aux_reference(target).as_deref(), Some("meshes/post.glb"));
        assert_eq!(host.mobility(target), Mobility::Stationary);
    }

    #[test]
    fn test_observers_see_live_objects() {
        let mut host = host();
        let seen: Arc<Mutex<Vec<(bool, Option<String>)>>> = Arc::default();

        let spawned = seen.clone();
        host.register_spawn_observer(Box::new(move |host, entity| {
            spawned.lock().unwrap().push((true, host.name(entity)));
        }));
        let destroyed = seen.clone();
        host.register_destroy_observer(Box::new(move |host, entity| {
            destroyed.lock().unwrap().push((false, host.name(entity)));
        }));

        let entity = host.spawn(0, "crate", &Transform::IDENTITY).unwrap();
        host.world.entity_mut(entity).insert(DespawnTracked);
        assert_eq!(host.despawn_tracked(), 1);
        assert!(!host.contains(entity));

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (true, Some("crate".to_string())),
                (false, Some("crate".to_string()))
            ]
        );
    }

    #[test]
    fn test_payload_restores_fields_and_tags() {
        let mut host = host();
        let source = host.spawn(0, "source", &Transform::IDENTITY).unwrap();
        host.world.entity_mut(source).insert((
            MeshObject {
                material: "oak".to_string(),
                hit_points: 7,
            },
            ObjectTags(vec!["loot".to_string()]),
        ));
        let payload = host.encode(source).unwrap();

        let target = host.spawn(0, "target", &Transform::IDENTITY).unwrap();
        assert!(host.decode(&payload, target));
        assert_eq!(
            host.world.get::<MeshObject>(target).map(|m| m.hit_points),
            Some(7)
        );
        assert_eq!(
            host.world.get::<ObjectTags>(target),
            Some(&ObjectTags(vec!["loot".to_string()]))
        );
        assert!(!host.decode(&[1, 2], target));
    }

    #[test]
    fn test_physics_controls() {
        let mut host = host();
        let entity = host.spawn(0, "ball", &Transform::IDENTITY).unwrap();
        host.set_linear_velocity(entity, Vec3::ONE);
        host.set_physics_active(entity, true);
        host.refresh_physics_state(entity);

        let body = host.world.get::<PhysicsBody>(entity).unwrap();
        assert!(body.simulating);
        assert_eq!(body.linear_velocity, Vec3::ONE);
        assert_eq!(body.state_generation, 1);
    }
}
