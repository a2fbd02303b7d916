//! Entity container, players and the ownership/team queries built on them

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::battery::Battery;
use super::bolt::Bolt;
use super::entity::{Arena, ArenaFull, Handle};
use super::flag::Flag;
use super::force_field::ForceField;
use super::glass::Glass;
use super::grenade::Grenade;
use super::health::Health;
use super::team::{Team, TeamMask};
use super::tuning::{MAX_DRONES, MAX_ENTITIES, MAX_PARENT_DEPTH, MAX_PLAYERS};
use super::turret::Turret;
use super::upgrade_station::UpgradeStation;

pub type EntityRef = Handle<Entity>;
pub type PlayerRef = Handle<Player>;

/// Physical client a player is connected through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u8);

/// Abilities a drone can equip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ability {
    Bolter,
    Shotgun,
    Sniper,
    ActiveArmor,
    Grenade,
}

impl Ability {
    /// Abilities that fire a projectile or hitscan shot
    pub fn is_shoot(self) -> bool {
        matches!(self, Ability::Bolter | Ability::Shotgun | Ability::Sniper)
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Set of unlocked abilities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilitySet(u8);

impl AbilitySet {
    pub fn insert(&mut self, ability: Ability) {
        self.0 |= ability.bit();
    }

    pub fn contains(self, ability: Ability) -> bool {
        self.0 & ability.bit() != 0
    }
}

impl FromIterator<Ability> for AbilitySet {
    fn from_iter<I: IntoIterator<Item = Ability>>(iter: I) -> Self {
        let mut set = AbilitySet::default();
        for ability in iter {
            set.insert(ability);
        }
        set
    }
}

/// A participant in the session, human or bot
#[derive(Debug, Clone, Serialize)]
pub struct Player {
    pub name: String,
    pub team: Team,
    pub client: ClientId,
    pub human: bool,
    /// Controlled from the host's own machine
    pub local: bool,
    pub abilities: AbilitySet,
    pub kills: u32,
    pub deaths: u32,
    pub energy: i32,
    pub flags_captured: u32,
    #[serde(skip)]
    pub instance: Option<EntityRef>,
}

impl Player {
    pub fn bot(name: impl Into<String>, team: Team) -> Self {
        Self {
            name: name.into(),
            team,
            client: ClientId(0),
            human: false,
            local: true,
            abilities: AbilitySet::default(),
            kills: 0,
            deaths: 0,
            energy: 0,
            flags_captured: 0,
            instance: None,
        }
    }

    pub fn human(name: impl Into<String>, team: Team, client: ClientId, local: bool) -> Self {
        Self {
            human: true,
            local,
            client,
            ..Self::bot(name, team)
        }
    }

    pub fn has_ability(&self, ability: Ability) -> bool {
        self.abilities.contains(ability)
    }
}

/// Collision state of a drone as seen by damage rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DroneCollisionState {
    #[default]
    Default,
    UpgradeStation,
    ActiveArmor,
    FlyingDashing,
}

/// Player-controlled flying unit
#[derive(Debug, Clone, Serialize)]
pub struct Drone {
    /// Bounded id, indexes the drone table of state frames
    pub id: u8,
    #[serde(skip)]
    pub player: Option<PlayerRef>,
    pub current_ability: Option<Ability>,
    /// Crawling on a surface rather than flying or dashing
    pub attached: bool,
    pub velocity: Vec3,
    #[serde(skip)]
    pub flag: Option<EntityRef>,
}

impl Drone {
    pub fn new(id: u8, player: Option<PlayerRef>) -> Self {
        Self {
            id,
            player,
            current_ability: None,
            attached: true,
            velocity: Vec3::ZERO,
            flag: None,
        }
    }
}

/// Walking AI unit
#[derive(Debug, Clone, Default)]
pub struct Minion {
    /// Grenade, turret or force field riding on this minion
    pub carrying: Option<EntityRef>,
}

/// Local transform relative to an optional parent entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub pos: Vec3,
    pub rot: Quat,
    pub parent: Option<EntityRef>,
}

impl Transform {
    pub fn at(pos: Vec3) -> Self {
        Self {
            pos,
            rot: Quat::IDENTITY,
            parent: None,
        }
    }

    pub fn with_rotation(mut self, rot: Quat) -> Self {
        self.rot = rot;
        self
    }

    pub fn child_of(parent: EntityRef, pos: Vec3) -> Self {
        Self {
            pos,
            rot: Quat::IDENTITY,
            parent: Some(parent),
        }
    }
}

/// Something projectiles can hit and turrets can aim at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub local_offset: Vec3,
    pub velocity: Vec3,
    pub radius: f32,
}

impl Target {
    pub fn with_radius(radius: f32) -> Self {
        Self {
            local_offset: Vec3::ZERO,
            velocity: Vec3::ZERO,
            radius,
        }
    }
}

/// What an entity is, fixed at creation
#[derive(Debug, Clone)]
pub enum EntityKind {
    /// Static level geometry or a plain rigid body
    Prop,
    Drone(Drone),
    Minion(Minion),
    Battery(Battery),
    Rectifier,
    MinionSpawner,
    Turret(Turret),
    ForceField(ForceField),
    /// Collision shell of a force field, resolved to the field on hit
    ForceFieldCollision {
        field: EntityRef,
    },
    Bolt(Bolt),
    Grenade(Grenade),
    Glass(Glass),
    Flag(Flag),
    UpgradeStation(UpgradeStation),
}

/// Fieldless tag of [`EntityKind`], used by every damage and filter table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityClass {
    Prop,
    Drone,
    Minion,
    Battery,
    Rectifier,
    MinionSpawner,
    Turret,
    ForceField,
    ForceFieldCollision,
    Bolt,
    Grenade,
    Glass,
    Flag,
    UpgradeStation,
}

impl EntityKind {
    pub fn class(&self) -> EntityClass {
        match self {
            EntityKind::Prop => EntityClass::Prop,
            EntityKind::Drone(_) => EntityClass::Drone,
            EntityKind::Minion(_) => EntityClass::Minion,
            EntityKind::Battery(_) => EntityClass::Battery,
            EntityKind::Rectifier => EntityClass::Rectifier,
            EntityKind::MinionSpawner => EntityClass::MinionSpawner,
            EntityKind::Turret(_) => EntityClass::Turret,
            EntityKind::ForceField(_) => EntityClass::ForceField,
            EntityKind::ForceFieldCollision { .. } => EntityClass::ForceFieldCollision,
            EntityKind::Bolt(_) => EntityClass::Bolt,
            EntityKind::Grenade(_) => EntityClass::Grenade,
            EntityKind::Glass(_) => EntityClass::Glass,
            EntityKind::Flag(_) => EntityClass::Flag,
            EntityKind::UpgradeStation(_) => EntityClass::UpgradeStation,
        }
    }
}

/// A game object. Optional capabilities are plain fields.
#[derive(Debug, Clone)]
pub struct Entity {
    pub kind: EntityKind,
    pub team: Team,
    pub transform: Transform,
    pub health: Option<Health>,
    pub target: Option<Target>,
    /// Has a reflective shield: bolts bounce off while active armor is up
    pub shield: bool,
    /// Receives physics impulses
    pub rigid_body: bool,
}

impl Entity {
    pub fn new(kind: EntityKind, team: Team, transform: Transform) -> Self {
        Self {
            kind,
            team,
            transform,
            health: None,
            target: None,
            shield: false,
            rigid_body: false,
        }
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_target(mut self, radius: f32) -> Self {
        self.target = Some(Target::with_radius(radius));
        self
    }

    pub fn with_shield(mut self) -> Self {
        self.shield = true;
        self
    }

    pub fn with_rigid_body(mut self) -> Self {
        self.rigid_body = true;
        self
    }

    pub fn class(&self) -> EntityClass {
        self.kind.class()
    }
}

/// Container errors
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("entity limit reached: {0}")]
    EntitiesFull(ArenaFull),

    #[error("player limit reached: {0}")]
    PlayersFull(ArenaFull),

    #[error("drone limit reached: {0}")]
    DronesFull(usize),
}

macro_rules! kind_accessors {
    ($($get:ident, $get_mut:ident => $variant:ident($ty:ty);)*) => {
        $(
            pub fn $get(&self, entity: EntityRef) -> Option<&$ty> {
                match &self.get(entity)?.kind {
                    EntityKind::$variant(value) => Some(value),
                    _ => None,
                }
            }

            pub fn $get_mut(&mut self, entity: EntityRef) -> Option<&mut $ty> {
                match &mut self.get_mut(entity)?.kind {
                    EntityKind::$variant(value) => Some(value),
                    _ => None,
                }
            }
        )*
    };
}

/// All live entities and players of one simulation
#[derive(Debug, Clone)]
pub struct World {
    entities: Arena<Entity>,
    pub players: Arena<Player>,
    pending_removal: Vec<EntityRef>,
    /// Anything falling below this height is removed
    pub min_y: f32,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: Arena::with_limit(MAX_ENTITIES),
            players: Arena::with_limit(MAX_PLAYERS),
            pending_removal: Vec::new(),
            min_y: -20.0,
        }
    }

    pub fn spawn(&mut self, entity: Entity) -> Result<EntityRef, WorldError> {
        self.entities.insert(entity).map_err(WorldError::EntitiesFull)
    }

    pub fn add_player(&mut self, player: Player) -> Result<PlayerRef, WorldError> {
        self.players.insert(player).map_err(WorldError::PlayersFull)
    }

    pub fn get(&self, entity: EntityRef) -> Option<&Entity> {
        self.entities.get(entity)
    }

    pub fn get_mut(&mut self, entity: EntityRef) -> Option<&mut Entity> {
        self.entities.get_mut(entity)
    }

    pub fn contains(&self, entity: EntityRef) -> bool {
        self.entities.contains(entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityRef, &Entity)> {
        self.entities.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityRef, &mut Entity)> {
        self.entities.iter_mut()
    }

    /// Snapshot of live handles, safe to hold while mutating
    pub fn refs(&self) -> Vec<EntityRef> {
        self.entities.handles()
    }

    /// Snapshot of live handles of one class
    pub fn refs_of(&self, class: EntityClass) -> Vec<EntityRef> {
        self.iter()
            .filter(|(_, e)| e.class() == class)
            .map(|(r, _)| r)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of transform ids ever handed out
    pub fn slot_count(&self) -> usize {
        self.entities.slot_count()
    }

    /// Remove immediately. Prefer [`World::remove_deferred`] inside loops.
    pub fn remove(&mut self, entity: EntityRef) -> Option<Entity> {
        let removed = self.entities.remove(entity)?;
        if let EntityKind::Drone(drone) = &removed.kind {
            if let Some(player) = drone.player.and_then(|p| self.players.get_mut(p)) {
                if player.instance == Some(entity) {
                    player.instance = None;
                }
            }
        }
        Some(removed)
    }

    /// Queue for removal at the end of the tick
    pub fn remove_deferred(&mut self, entity: EntityRef) {
        if !self.pending_removal.contains(&entity) {
            self.pending_removal.push(entity);
        }
    }

    pub fn is_pending_removal(&self, entity: EntityRef) -> bool {
        self.pending_removal.contains(&entity)
    }

    /// Remove everything queued by [`World::remove_deferred`]. Returns what was removed.
    pub fn flush_removals(&mut self) -> Vec<EntityRef> {
        let pending = std::mem::take(&mut self.pending_removal);
        pending
            .into_iter()
            .filter(|&entity| self.remove(entity).is_some())
            .collect()
    }

    kind_accessors! {
        drone, drone_mut => Drone(Drone);
        minion, minion_mut => Minion(Minion);
        battery, battery_mut => Battery(Battery);
        turret, turret_mut => Turret(Turret);
        force_field, force_field_mut => ForceField(ForceField);
        bolt, bolt_mut => Bolt(Bolt);
        grenade, grenade_mut => Grenade(Grenade);
        glass, glass_mut => Glass(Glass);
        flag, flag_mut => Flag(Flag);
        station, station_mut => UpgradeStation(UpgradeStation);
    }

    pub fn health(&self, entity: EntityRef) -> Option<&Health> {
        self.get(entity)?.health.as_ref()
    }

    pub fn health_mut(&mut self, entity: EntityRef) -> Option<&mut Health> {
        self.get_mut(entity)?.health.as_mut()
    }

    pub fn class(&self, entity: EntityRef) -> Option<EntityClass> {
        self.get(entity).map(Entity::class)
    }

    /// Absolute position and rotation, walking the parent chain
    pub fn absolute(&self, entity: EntityRef) -> Option<(Vec3, Quat)> {
        let transform = self.get(entity)?.transform;
        let mut pos = transform.pos;
        let mut rot = transform.rot;
        let mut parent = transform.parent;
        for _ in 0..MAX_PARENT_DEPTH {
            let Some(p) = parent.and_then(|p| self.get(p)) else {
                break;
            };
            pos = p.transform.rot * pos + p.transform.pos;
            rot = p.transform.rot * rot;
            parent = p.transform.parent;
        }
        Some((pos, rot))
    }

    pub fn absolute_pos(&self, entity: EntityRef) -> Option<Vec3> {
        self.absolute(entity).map(|(pos, _)| pos)
    }

    /// Place an entity at an absolute position, expressed in its parent's space
    pub fn set_absolute(&mut self, entity: EntityRef, pos: Vec3, rot: Quat) {
        let parent = self
            .get(entity)
            .and_then(|e| e.transform.parent)
            .and_then(|p| self.absolute(p));
        let Some(e) = self.get_mut(entity) else {
            return;
        };
        match parent {
            Some((parent_pos, parent_rot)) => {
                let inverse = parent_rot.inverse();
                e.transform.pos = inverse * (pos - parent_pos);
                e.transform.rot = inverse * rot;
            }
            None => {
                e.transform.pos = pos;
                e.transform.rot = rot;
            }
        }
    }

    /// Aim point of a target: absolute transform applied to its local offset
    pub fn target_position(&self, entity: EntityRef) -> Option<Vec3> {
        let (pos, rot) = self.absolute(entity)?;
        let offset = self
            .get(entity)?
            .target
            .map(|t| t.local_offset)
            .unwrap_or(Vec3::ZERO);
        Some(pos + rot * offset)
    }

    pub fn target_velocity(&self, entity: EntityRef) -> Vec3 {
        match self.get(entity) {
            Some(Entity {
                kind: EntityKind::Drone(drone),
                ..
            }) => drone.velocity,
            Some(e) => e.target.map(|t| t.velocity).unwrap_or(Vec3::ZERO),
            None => Vec3::ZERO,
        }
    }

    /// Team of an entity; neutral when absent
    pub fn entity_team(&self, entity: EntityRef) -> Team {
        match self.get(entity) {
            Some(Entity {
                kind: EntityKind::ForceFieldCollision { field },
                ..
            }) => self.get(*field).map(|f| f.team).unwrap_or_default(),
            Some(e) => e.team,
            None => Team::NONE,
        }
    }

    /// Force field behind a collision shell, or the entity itself
    pub fn resolve_proxy(&self, entity: EntityRef) -> EntityRef {
        match self.get(entity).map(|e| &e.kind) {
            Some(EntityKind::ForceFieldCollision { field }) => *field,
            _ => entity,
        }
    }

    /// Player credited for whatever this entity does
    pub fn owner(&self, entity: EntityRef) -> Option<PlayerRef> {
        let owner = match &self.get(entity)?.kind {
            EntityKind::Drone(drone) => drone.player,
            EntityKind::Bolt(bolt) => bolt.player,
            EntityKind::Grenade(grenade) => grenade.owner,
            EntityKind::Turret(turret) => turret.owner,
            _ => None,
        };
        owner.filter(|p| self.players.contains(*p))
    }

    /// Controlling human player of a drone
    pub fn human_player(&self, entity: EntityRef) -> Option<&Player> {
        let player = self.drone(entity)?.player?;
        self.players.get(player).filter(|p| p.human)
    }

    /// Both entities are human-controlled drones behind the same client
    pub fn players_on_same_client(&self, a: EntityRef, b: EntityRef) -> bool {
        match (self.human_player(a), self.human_player(b)) {
            (Some(pa), Some(pb)) => pa.client == pb.client,
            _ => false,
        }
    }

    /// Upgrade station currently holding this drone
    pub fn drone_inside_station(&self, drone: EntityRef) -> Option<EntityRef> {
        self.iter().find_map(|(r, e)| match &e.kind {
            EntityKind::UpgradeStation(station) if station.drone == Some(drone) => Some(r),
            _ => None,
        })
    }

    /// Live collision state of a drone
    /// Lowest drone id not held by a live drone
    pub fn next_drone_id(&self) -> Result<u8, WorldError> {
        let mut used = [false; MAX_DRONES];
        for (_, e) in self.iter() {
            if let EntityKind::Drone(drone) = &e.kind {
                if let Some(slot) = used.get_mut(drone.id as usize) {
                    *slot = true;
                }
            }
        }
        used.iter()
            .position(|taken| !taken)
            .map(|id| id as u8)
            .ok_or(WorldError::DronesFull(MAX_DRONES))
    }

    pub fn drone_collision_state(&self, entity: EntityRef) -> DroneCollisionState {
        let Some(drone) = self.drone(entity) else {
            return DroneCollisionState::Default;
        };
        if self.drone_inside_station(entity).is_some() {
            DroneCollisionState::UpgradeStation
        } else if self
            .health(entity)
            .is_some_and(|h| h.active_armor_timer > 0.0)
        {
            DroneCollisionState::ActiveArmor
        } else if !drone.attached {
            DroneCollisionState::FlyingDashing
        } else {
            DroneCollisionState::Default
        }
    }

    /// Closest entity of `class` whose team matches `mask`, with its distance
    pub fn closest(&self, class: EntityClass, mask: TeamMask, pos: Vec3) -> Option<(EntityRef, f32)> {
        self.iter()
            .filter(|(_, e)| e.class() == class && mask.matches(e.team))
            .filter_map(|(r, _)| Some((r, self.absolute_pos(r)?.distance_squared(pos))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(r, d)| (r, d.sqrt()))
    }

    pub fn count(&self, class: EntityClass, mask: TeamMask) -> usize {
        self.iter()
            .filter(|(_, e)| e.class() == class && mask.matches(e.team))
            .count()
    }

    /// Entities of `class` matching `mask`, ordered by distance to `pos`
    pub fn sort_by_distance(
        &self,
        class: EntityClass,
        mask: TeamMask,
        pos: Vec3,
        closest_first: bool,
    ) -> Vec<EntityRef> {
        let mut found: Vec<(EntityRef, f32)> = self
            .iter()
            .filter(|(_, e)| e.class() == class && mask.matches(e.team))
            .filter_map(|(r, _)| Some((r, self.absolute_pos(r)?.distance_squared(pos))))
            .collect();
        if closest_first {
            found.sort_by(|a, b| a.1.total_cmp(&b.1));
        } else {
            found.sort_by(|a, b| b.1.total_cmp(&a.1));
        }
        found.into_iter().map(|(r, _)| r).collect()
    }

    /// Number of players on teams in `mask`
    pub fn count_players(&self, mask: TeamMask) -> usize {
        self.players
            .iter()
            .filter(|(_, p)| mask.matches(p.team))
            .count()
    }
}
