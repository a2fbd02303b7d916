//! Combat simulation: entities, damage, projectiles and structures

pub mod battery;
pub mod bolt;
pub mod effects;
pub mod entity;
pub mod flag;
pub mod force_field;
pub mod glass;
pub mod grenade;
pub mod health;
pub mod history;
pub mod physics;
pub mod simulation;
pub mod target;
pub mod team;
pub mod tuning;
pub mod turret;
pub mod upgrade_station;
pub mod world;

pub use entity::{Arena, Handle};
pub use simulation::{CombatEvent, PeerLatency, Simulation, TickContext};
pub use team::{Team, TeamMask};
pub use world::{Entity, EntityClass, EntityKind, EntityRef, PlayerRef, World, WorldError};
