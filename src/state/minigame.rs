//! Minigame templates and their instance pools.
//!
//! A [`MiniGame`] owns its instances by id, keeps them in creation order and
//! maintains the world → instance reverse index. Instances only know their
//! [`InstanceKey`]; anything that touches the pool or the index goes through
//! the template.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::MiniGameError;
use super::hooks::HookEvent;
use super::host::Services;
use super::instance::{MiniGameInstance, RosterLimits};
use super::listener::LifecycleEvent;
use super::player::PlayerId;
use super::world::{WorldHandle, WorldSlot};

/// Instance id, unique within its template. Real instances start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique instance identity: template name plus instance id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub minigame: String,
    pub id: InstanceId,
}

impl InstanceKey {
    pub fn new(minigame: impl Into<String>, id: InstanceId) -> Self {
        Self {
            minigame: minigame.into(),
            id,
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.minigame, self.id)
    }
}

/// Template limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiniGameConfig {
    /// Unique, case-sensitive template name
    pub name: String,

    pub min_player_size: usize,
    pub max_player_size: usize,

    /// Advisory pool ceiling; exceeding it only logs a warning
    pub max_instance_size: usize,

    /// Pool floor kept by eager creation and replenishment
    pub default_instance_size: usize,
}

impl Default for MiniGameConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            min_player_size: 1,
            max_player_size: 16,
            max_instance_size: 10,
            default_instance_size: 1,
        }
    }
}

impl MiniGameConfig {
    pub fn new(name: impl Into<String>, min_player_size: usize, max_player_size: usize) -> Self {
        Self {
            name: name.into(),
            min_player_size,
            max_player_size,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON template config.
    pub fn from_json(json: &str) -> Result<Self, MiniGameError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MiniGameError> {
        if self.name.is_empty() {
            return Err(MiniGameError::invalid_config("name must not be empty"));
        }
        if self.min_player_size == 0 {
            return Err(MiniGameError::invalid_config("min_player_size must be at least 1"));
        }
        if self.min_player_size > self.max_player_size {
            return Err(MiniGameError::invalid_config(format!(
                "min_player_size {} exceeds max_player_size {}",
                self.min_player_size, self.max_player_size
            )));
        }
        if self.default_instance_size > self.max_instance_size {
            return Err(MiniGameError::invalid_config(format!(
                "default_instance_size {} exceeds max_instance_size {}",
                self.default_instance_size, self.max_instance_size
            )));
        }
        Ok(())
    }

    pub fn limits(&self) -> RosterLimits {
        RosterLimits {
            min: self.min_player_size,
            max: self.max_player_size,
        }
    }
}

/// Applied to every new instance before its worlds are provisioned.
pub type Configure = Rc<dyn Fn(&mut MiniGameInstance)>;

/// A template and its pool of instances.
pub struct MiniGame {
    config: MiniGameConfig,
    configure: Configure,
    services: Rc<Services>,

    /// Instance ids in creation order
    order: Vec<InstanceId>,

    instances: HashMap<InstanceId, MiniGameInstance>,

    /// World → owning instance
    world_index: HashMap<WorldHandle, InstanceId>,

    next_instance_id: u64,
}

impl fmt::Debug for MiniGame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiniGame")
            .field("config", &self.config)
            .field("order", &self.order)
            .field("world_index", &self.world_index)
            .finish_non_exhaustive()
    }
}

impl PartialEq for MiniGame {
    fn eq(&self, other: &Self) -> bool {
        self.config.name == other.config.name
    }
}

impl Eq for MiniGame {}

impl Hash for MiniGame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.config.name.hash(state);
    }
}

impl fmt::Display for MiniGame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.config.name)
    }
}

impl MiniGame {
    /// Build a template, fire its template-created hooks and fill the pool up
    /// to `default_instance_size`.
    pub fn new(
        config: MiniGameConfig,
        services: Rc<Services>,
        configure: impl Fn(&mut MiniGameInstance) + 'static,
    ) -> Result<Self, MiniGameError> {
        config.validate()?;

        let mut minigame = Self {
            config,
            configure: Rc::new(configure),
            services,
            order: Vec::new(),
            instances: HashMap::new(),
            world_index: HashMap::new(),
            next_instance_id: 0,
        };

        minigame.fire_template_created();
        for _ in 0..minigame.config.default_instance_size {
            minigame.create_instance();
        }

        info!(
            minigame = %minigame.config.name,
            instances = minigame.order.len(),
            "minigame registered"
        );
        Ok(minigame)
    }

    /// Template-created hooks run on a throwaway prototype with id 0.
    fn fire_template_created(&mut self) {
        let key = InstanceKey::new(self.config.name.clone(), InstanceId(0));
        let mut prototype = MiniGameInstance::new(key, self.config.limits(), Rc::clone(&self.services));
        (self.configure)(&mut prototype);
        prototype.fire(HookEvent::MiniGameCreated);
        prototype.unregister_listeners();
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &MiniGameConfig {
        &self.config
    }

    pub fn default_instance_size(&self) -> usize {
        self.config.default_instance_size
    }

    /// Change the replenishment floor. Does not create or delete instances.
    pub fn set_default_instance_size(&mut self, size: usize) {
        self.config.default_instance_size = size;
    }

    pub fn instance_count(&self) -> usize {
        self.order.len()
    }

    pub fn instance(&self, id: InstanceId) -> Option<&MiniGameInstance> {
        self.instances.get(&id)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut MiniGameInstance> {
        self.instances.get_mut(&id)
    }

    fn require_mut(&mut self, id: InstanceId) -> Result<&mut MiniGameInstance, MiniGameError> {
        self.instances
            .get_mut(&id)
            .ok_or(MiniGameError::InstanceNotFound(id))
    }

    /// Instances in creation order.
    pub fn instances(&self) -> impl Iterator<Item = &MiniGameInstance> {
        self.order.iter().filter_map(|id| self.instances.get(id))
    }

    pub fn instance_ids(&self) -> &[InstanceId] {
        &self.order
    }

    /// Create one instance: configure it, clone its base worlds under a fresh
    /// prefix, index them, then fire instance-created hooks.
    pub fn create_instance(&mut self) -> InstanceId {
        if self.order.len() >= self.config.max_instance_size {
            warn!(
                minigame = %self.config.name,
                instances = self.order.len(),
                max = self.config.max_instance_size,
                "instance pool above max_instance_size"
            );
        }

        self.next_instance_id += 1;
        let id = InstanceId(self.next_instance_id);
        let key = InstanceKey::new(self.config.name.clone(), id);

        let mut instance =
            MiniGameInstance::new(key.clone(), self.config.limits(), Rc::clone(&self.services));
        (self.configure)(&mut instance);
        let setting = instance.world_setting.clone();

        self.instances.insert(id, instance);
        self.order.push(id);

        let prefix = uuid::Uuid::new_v4().simple().to_string();
        let bases = [
            (setting.base_world, WorldSlot::Primary),
            (setting.base_secondary_a, WorldSlot::SecondaryA),
            (setting.base_secondary_b, WorldSlot::SecondaryB),
        ]
        .into_iter()
        .filter_map(|(base, slot)| base.map(|b| (b, slot)))
        .chain(
            setting
                .other_base_worlds
                .into_iter()
                .map(|b| (b, WorldSlot::Other)),
        );

        for (base, slot) in bases {
            let name = format!("{}_{}", prefix, base.name());
            let world = self.services.worlds.clone_world(&base, &name);
            self.attach(id, world, slot);
        }

        info!(instance = %key, "instance created");

        if let Some(instance) = self.instances.get(&id) {
            instance.fire(HookEvent::InstanceCreated);
        }
        id
    }

    // Roster

    pub fn add_player(&mut self, id: InstanceId, player: PlayerId) -> Result<(), MiniGameError> {
        self.require_mut(id)?.add_player(player)
    }

    pub fn remove_player(&mut self, id: InstanceId, player: PlayerId) -> Result<bool, MiniGameError> {
        Ok(self.require_mut(id)?.remove_player(player))
    }

    /// First open instance in creation order.
    pub fn recommend_matching_instance(&self) -> Option<&MiniGameInstance> {
        self.instances().find(|i| i.is_open())
    }

    /// Every open instance in creation order.
    pub fn matching_instances(&self) -> Vec<&MiniGameInstance> {
        self.instances().filter(|i| i.is_open()).collect()
    }

    // Worlds

    /// Attach a world to an instance slot and index it.
    ///
    /// A singleton slot's previous occupant is detached and dropped from the
    /// index. A world indexed to another instance moves to this one.
    pub fn add_world(
        &mut self,
        id: InstanceId,
        world: WorldHandle,
        slot: WorldSlot,
    ) -> Result<(), MiniGameError> {
        if !self.instances.contains_key(&id) {
            return Err(MiniGameError::InstanceNotFound(id));
        }
        self.attach(id, world, slot);
        Ok(())
    }

    fn attach(&mut self, id: InstanceId, world: WorldHandle, slot: WorldSlot) {
        if let Some(owner) = self.world_index.get(&world).copied() {
            if owner != id {
                if let Some(previous) = self.instances.get_mut(&owner) {
                    previous.detach_world(&world);
                }
            }
        }

        let Some(instance) = self.instances.get_mut(&id) else {
            return;
        };
        if let Some(displaced) = instance.attach_world(world.clone(), slot) {
            self.world_index.remove(&displaced);
        }
        debug!(instance = %instance.key(), world = %world, slot = slot.as_str(), "world attached");
        self.world_index.insert(world, id);
    }

    /// Detach a world from an instance. Unowned worlds are a no-op.
    pub fn remove_world(&mut self, id: InstanceId, world: &WorldHandle) -> Result<bool, MiniGameError> {
        let removed = self.require_mut(id)?.detach_world(world);
        if self.world_index.get(world) == Some(&id) {
            self.world_index.remove(world);
        }
        Ok(removed)
    }

    /// Every indexed world, sorted.
    pub fn worlds(&self) -> Vec<&WorldHandle> {
        let mut worlds: Vec<&WorldHandle> = self.world_index.keys().collect();
        worlds.sort();
        worlds
    }

    /// Instance owning `world`.
    pub fn instance_of(&self, world: &WorldHandle) -> Option<InstanceId> {
        self.world_index.get(world).copied()
    }

    // Lifecycle

    /// Stop an instance: halt it, delete it when `auto_delete` is set, then
    /// mark it finished. Stopping a finished instance is a no-op.
    pub fn stop_instance(&mut self, id: InstanceId) -> Result<(), MiniGameError> {
        let instance = self.require_mut(id)?;
        if instance.is_finished() {
            return Ok(());
        }

        instance.halt();
        if instance.auto_delete {
            let mut deleted = self.delete_instance(id)?;
            deleted.mark_finished();
        } else {
            instance.mark_finished();
        }
        Ok(())
    }

    /// Stop every instance and stop replenishing the pool.
    pub fn stop_all(&mut self) -> Result<(), MiniGameError> {
        self.config.default_instance_size = 0;
        for id in self.order.clone() {
            if self.instances.contains_key(&id) {
                self.stop_instance(id)?;
            }
        }
        info!(minigame = %self.config.name, remaining = self.order.len(), "all instances stopped");
        Ok(())
    }

    /// Delete an instance and tear down its worlds. Creates one replacement
    /// when the pool falls below `default_instance_size`.
    pub fn delete_instance(&mut self, id: InstanceId) -> Result<MiniGameInstance, MiniGameError> {
        let mut instance = self
            .instances
            .remove(&id)
            .ok_or(MiniGameError::InstanceNotFound(id))?;
        self.order.retain(|i| *i != id);

        instance.unregister_listeners();
        instance.unregister_tasks();
        instance.cancel_start_task();

        for world in instance.clear_worlds() {
            self.services.worlds.delete_world(&world);
        }
        self.world_index.retain(|_, owner| *owner != id);

        instance.clear_players_data();
        instance.mark_deleted();
        instance.fire(HookEvent::Deleted);
        self.services
            .events
            .publish(&LifecycleEvent::InstanceDeleted(instance.key().clone()));

        info!(instance = %instance.key(), "instance deleted");

        if self.order.len() < self.config.default_instance_size {
            self.create_instance();
        }
        Ok(instance)
    }

    /// Advance every instance by one host tick, then stop the instances whose
    /// hooks or tasks asked for it.
    pub fn tick(&mut self) {
        for id in &self.order {
            if let Some(instance) = self.instances.get_mut(id) {
                instance.tick();
            }
        }

        let requested: Vec<InstanceId> = self
            .instances()
            .filter(|i| i.is_stop_requested())
            .map(|i| i.id())
            .collect();
        for id in requested {
            if let Err(err) = self.stop_instance(id) {
                warn!(minigame = %self.config.name, instance = %id, error = %err, "requested stop failed");
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.config.name,
            "min_player_size": self.config.min_player_size,
            "max_player_size": self.config.max_player_size,
            "max_instance_size": self.config.max_instance_size,
            "default_instance_size": self.config.default_instance_size,
            "instances": self.instances().map(|i| i.to_json()).collect::<Vec<_>>()
        })
    }
}
