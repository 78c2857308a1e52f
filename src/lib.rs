//! Minigame State Library
//!
//! This crate provides the instance lifecycle engine for pooled minigame
//! sessions running inside a shared host.
//!
//! # Overview
//!
//! The state module provides:
//!
//! - **Templates** - A `MiniGame` owns a bounded pool of instances, clones
//!   their worlds on creation, indexes world ownership, and replenishes the
//!   pool after deletions.
//!
//! - **Instance State Machine** - Each `MiniGameInstance` walks waiting →
//!   countdown → started → stopped → deleted, driven by roster changes and
//!   host ticks.
//!
//! - **Hooks and Listeners** - Ordered lifecycle hooks, plus host event
//!   subscriptions activated at start and revoked at stop.
//!
//! - **Player Directory** - Validated per-player association, mirrored to the
//!   host's persistence layer.
//!
//! # Design Principles
//!
//! 1. **Single-threaded** - Everything runs on the host tick; no locks except
//!    the isolation target sets, which a chat-relay worker may read.
//!
//! 2. **Arena ownership** - Templates own instances by id; instances only know
//!    their key.
//!
//! 3. **Host behind traits** - Worlds, players, persistence and the event bus
//!    are reached only through the `host` contracts.
//!
//! 4. **Serialization-ready** - Templates and instances snapshot to JSON.
//!
//! # Example
//!
//! ```rust,ignore
//! use minigame_state::{MiniGameConfig, MiniGameServer, PlayerId};
//!
//! let mut server = MiniGameServer::new(services);
//! server.register(MiniGameConfig::new("spleef", 2, 8), |instance| {
//!     instance.auto_delete = true;
//!     instance.on_start(|ctx| ctx.broadcast("Go!"));
//! })?;
//!
//! server.join("spleef", PlayerId(1))?;
//! server.join("spleef", PlayerId(2))?;
//!
//! // Once per host tick
//! server.tick();
//! ```

pub mod state;

// Re-export everything from state module at crate root
pub use state::*;
