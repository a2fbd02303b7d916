//! Gameplay tuning constants and per-session rules

use serde::{Deserialize, Serialize};

// Capacity limits. These also fix the bit widths used on the wire.
pub const MAX_ENTITIES: usize = 4096;
pub const MAX_PLAYERS: usize = 16;
pub const MAX_DRONES: usize = 16;
pub const MAX_TEAMS: usize = 4;
pub const MAX_PARENT_DEPTH: usize = 8;

// Networking
pub const NET_MAX_RTT_COMPENSATION: f32 = 0.2;
pub const STATE_FRAME_HISTORY: usize = 48;

// Health
pub const SHIELD_REGEN_TIME: f32 = 1.0;
pub const SHIELD_REGEN_DELAY: f32 = 3.0;
pub const ACTIVE_ARMOR_TIME: f32 = 0.6;
pub const DRONE_HEALTH: i8 = 1;
pub const DRONE_SHIELD_AMOUNT: i8 = 1;
pub const BATTERY_HEALTH: i8 = 15;
pub const MINION_HEALTH: i8 = 6;
pub const TURRET_HEALTH: i8 = 12;
pub const MINION_SPAWNER_HEALTH: i8 = 10;
pub const RECTIFIER_HEALTH: i8 = 6;
pub const GRENADE_HEALTH: i8 = 1;
pub const FORCE_FIELD_HEALTH_NERFED: i8 = 30;
pub const FORCE_FIELD_HEALTH_NORMAL: i8 = 40;
pub const FORCE_FIELD_HEALTH_BUFFED: i8 = 50;

// Radii
pub const DRONE_RADIUS: f32 = 0.2;
pub const DRONE_SHIELD_RADIUS: f32 = 0.4;
pub const DRONE_SHIELD_VIEW_RATIO: f32 = 0.5;
pub const TURRET_RADIUS: f32 = 0.35;
pub const BATTERY_RADIUS: f32 = 0.45;
pub const FORCE_FIELD_RADIUS: f32 = 10.0;
pub const UPGRADE_STATION_RADIUS: f32 = 1.0;
pub const FLAG_RADIUS: f32 = 0.5;

// Bolts
pub const DRONE_MAX_DISTANCE: f32 = 25.0;
pub const BOLT_LENGTH: f32 = 0.5;
pub const BOLT_SPEED_DRONE_BOLTER: f32 = 30.0;
pub const BOLT_SPEED_DRONE_SHOTGUN: f32 = 20.0;
pub const BOLT_SPEED_TURRET: f32 = 15.0;
pub const BOLT_SPEED_MINION: f32 = 10.0;

// Grenades
pub const GRENADE_RADIUS: f32 = 0.15;
pub const GRENADE_RANGE: f32 = 5.0;
pub const GRENADE_DELAY: f32 = 1.5;
pub const GRENADE_QUICK_FUSE: f32 = 0.3;
pub const GRENADE_LAUNCH_SPEED: f32 = 12.0;
pub const GRAVITY: f32 = -9.8;

// Turrets
pub const TURRET_RANGE: f32 = 15.0;
pub const TURRET_COOLDOWN: f32 = 1.0;
pub const TURRET_TARGET_CHECK_TIME: f32 = 0.5;

// Batteries and energy
pub const BATTERY_ENERGY: i16 = 1000;
pub const BATTERY_ENERGY_INCREMENT: i16 = 10;
pub const BATTERY_ENERGY_INCREMENT_TIME: f32 = 10.0;
pub const ENERGY_DRONE_KILL: i32 = 200;
pub const ENERGY_STRUCTURE_KILL: i32 = 100;

// Flags, stations, glass
pub const FLAG_RESTORE_TIME: f32 = 30.0;
pub const UPGRADE_STATION_ANIM_TIME: f32 = 0.5;
pub const GLASS_CONFIRM_TIME: f32 = 1.0;

// Force fields
pub const FORCE_FIELD_ANIM_TIME: f32 = 0.4;
pub const FORCE_FIELD_DAMAGE_TIME: f32 = 0.15;

/// Rules chosen per session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    /// Shield points every drone spawns with
    pub drone_shield: i8,
    /// Global time-scale factor applied to buffered damage delays
    pub time_scale: f32,
}

impl Default for Ruleset {
    fn default() -> Self {
        Self {
            drone_shield: DRONE_SHIELD_AMOUNT,
            time_scale: 1.0,
        }
    }
}
