//! Recording fakes for the host collaborators.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use super::host::{
    DataStore, EventBus, GameMode, Location, PlayerHost, Services, SoundCue, WorldProvisioner,
};
use super::listener::{HostEvent, LifecycleEvent, Listener, ListenerId, Subscription};
use super::player::PlayerId;
use super::world::WorldHandle;

/// Clones return a handle named after the requested name.
#[derive(Default)]
pub struct RecordingWorlds {
    log: RefCell<Vec<String>>,
}

impl RecordingWorlds {
    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    /// Number of log entries starting with `op`.
    pub fn count(&self, op: &str) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|entry| entry.split(' ').next() == Some(op))
            .count()
    }
}

impl WorldProvisioner for RecordingWorlds {
    fn clone_world(&self, source: &WorldHandle, name: &str) -> WorldHandle {
        self.log.borrow_mut().push(format!("clone {} {}", source, name));
        WorldHandle::new(name)
    }

    fn delete_world(&self, world: &WorldHandle) {
        self.log.borrow_mut().push(format!("delete {}", world));
    }

    fn link_secondary_a(&self, primary: &WorldHandle, secondary: &WorldHandle) {
        self.log
            .borrow_mut()
            .push(format!("link_a {} {}", primary, secondary));
    }

    fn link_secondary_b(&self, primary: &WorldHandle, secondary: &WorldHandle) {
        self.log
            .borrow_mut()
            .push(format!("link_b {} {}", primary, secondary));
    }
}

/// In-process bus that can dispatch host events to what is registered.
#[derive(Default)]
pub struct RecordingBus {
    next_id: Cell<u64>,
    subscriptions: RefCell<Vec<(ListenerId, Subscription)>>,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn Listener>)>>,
    published: RefCell<Vec<LifecycleEvent>>,
}

impl RecordingBus {
    fn allocate(&self) -> ListenerId {
        self.next_id.set(self.next_id.get() + 1);
        ListenerId(self.next_id.get())
    }

    pub fn active_count(&self) -> usize {
        self.subscriptions.borrow().len() + self.listeners.borrow().len()
    }

    pub fn published(&self) -> Vec<LifecycleEvent> {
        self.published.borrow().clone()
    }

    /// Deliver an event to matching subscriptions by priority, then to every
    /// listener object.
    pub fn dispatch(&self, event: &mut HostEvent) {
        let mut matching: Vec<Subscription> = self
            .subscriptions
            .borrow()
            .iter()
            .filter(|(_, s)| s.kind == event.kind)
            .map(|(_, s)| s.clone())
            .collect();
        matching.sort_by_key(|s| s.priority);
        for subscription in &matching {
            subscription.handle(event);
        }

        let listeners: Vec<Rc<dyn Listener>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in listeners {
            listener.on_event(event);
        }
    }
}

impl EventBus for RecordingBus {
    fn register(&self, subscription: &Subscription) -> ListenerId {
        let id = self.allocate();
        self.subscriptions
            .borrow_mut()
            .push((id, subscription.clone()));
        id
    }

    fn register_listener(&self, listener: Rc<dyn Listener>) -> ListenerId {
        let id = self.allocate();
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    fn unregister_all(&self, id: ListenerId) {
        self.subscriptions.borrow_mut().retain(|(i, _)| *i != id);
        self.listeners.borrow_mut().retain(|(i, _)| *i != id);
    }

    fn publish(&self, event: &LifecycleEvent) {
        self.published.borrow_mut().push(event.clone());
    }
}

#[derive(Default)]
pub struct RecordingPlayers {
    teleports: RefCell<Vec<(PlayerId, Location)>>,
    game_modes: RefCell<Vec<(PlayerId, GameMode)>>,
    messages: RefCell<Vec<(PlayerId, String)>>,
    sounds: RefCell<Vec<(PlayerId, SoundCue)>>,
}

impl RecordingPlayers {
    pub fn teleports(&self) -> Vec<(PlayerId, Location)> {
        self.teleports.borrow().clone()
    }

    pub fn game_modes(&self) -> Vec<(PlayerId, GameMode)> {
        self.game_modes.borrow().clone()
    }

    pub fn messages_for(&self, player: PlayerId) -> Vec<String> {
        self.messages
            .borrow()
            .iter()
            .filter(|(p, _)| *p == player)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn sound_count(&self) -> usize {
        self.sounds.borrow().len()
    }
}

impl PlayerHost for RecordingPlayers {
    fn teleport(&self, player: PlayerId, to: &Location) {
        self.teleports.borrow_mut().push((player, to.clone()));
    }

    fn set_game_mode(&self, player: PlayerId, mode: GameMode) {
        self.game_modes.borrow_mut().push((player, mode));
    }

    fn send_message(&self, player: PlayerId, text: &str) {
        self.messages.borrow_mut().push((player, text.to_string()));
    }

    fn play_sound(&self, player: PlayerId, cue: &SoundCue) {
        self.sounds.borrow_mut().push((player, cue.clone()));
    }
}

#[derive(Default)]
pub struct MemoryStore {
    values: RefCell<HashMap<(String, String, String), Value>>,
    deletions: RefCell<Vec<(String, String)>>,
    dropped_categories: RefCell<Vec<String>>,
}

impl MemoryStore {
    pub fn get(&self, category: &str, id: &str, field: &str) -> Option<Value> {
        self.values
            .borrow()
            .get(&(category.to_string(), id.to_string(), field.to_string()))
            .cloned()
    }

    /// `(category, id)` of every `delete_value` call.
    pub fn deletions(&self) -> Vec<(String, String)> {
        self.deletions.borrow().clone()
    }

    pub fn dropped_categories(&self) -> Vec<String> {
        self.dropped_categories.borrow().clone()
    }
}

impl DataStore for MemoryStore {
    fn set_value(&self, category: &str, id: &str, field: &str, value: &Value) {
        self.values.borrow_mut().insert(
            (category.to_string(), id.to_string(), field.to_string()),
            value.clone(),
        );
    }

    fn delete_value(&self, category: &str, id: &str, field: &str, _value: &Value) {
        self.values
            .borrow_mut()
            .remove(&(category.to_string(), id.to_string(), field.to_string()));
        self.deletions
            .borrow_mut()
            .push((category.to_string(), id.to_string()));
    }

    fn delete_category(&self, category: &str) {
        self.values.borrow_mut().retain(|(c, _, _), _| c != category);
        self.dropped_categories
            .borrow_mut()
            .push(category.to_string());
    }
}

/// One fake of each collaborator behind a shared [`Services`].
pub struct Fakes {
    pub worlds: Rc<RecordingWorlds>,
    pub bus: Rc<RecordingBus>,
    pub players: Rc<RecordingPlayers>,
    pub store: Rc<MemoryStore>,
    services: Rc<Services>,
}

impl Fakes {
    pub fn new() -> Self {
        let worlds = Rc::new(RecordingWorlds::default());
        let bus = Rc::new(RecordingBus::default());
        let players = Rc::new(RecordingPlayers::default());
        let store = Rc::new(MemoryStore::default());
        let services = Rc::new(Services::new(
            worlds.clone(),
            bus.clone(),
            players.clone(),
            store.clone(),
        ));
        Self {
            worlds,
            bus,
            players,
            store,
            services,
        }
    }

    pub fn services(&self) -> Rc<Services> {
        Rc::clone(&self.services)
    }
}
