//! Force fields: team-owned spheres that stop enemy fire

use glam::{Quat, Vec3};
use tracing::debug;

use super::effects::ParticleKind;
use super::health::Health;
use super::physics::{look_rotation, CollisionMask};
use super::simulation::Simulation;
use super::team::{Team, TeamMask};
use super::tuning::{
    DRONE_RADIUS, FORCE_FIELD_ANIM_TIME, FORCE_FIELD_DAMAGE_TIME, FORCE_FIELD_HEALTH_BUFFED,
    FORCE_FIELD_HEALTH_NERFED, FORCE_FIELD_HEALTH_NORMAL, FORCE_FIELD_RADIUS, MAX_ENTITIES,
};
use super::world::{Entity, EntityClass, EntityKind, EntityRef, Transform, World, WorldError};

/// How a field behaves once spawned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceFieldType {
    /// Destructible, replaces overlapping fields
    Normal,
    /// Has health but never takes damage
    Invincible,
    /// Part of the level: no health, never goes away
    Permanent,
    /// Spawned on battery capture; kills enemies inside
    Battery,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForceFieldFlags(u8);

impl ForceFieldFlags {
    pub const INVINCIBLE: ForceFieldFlags = ForceFieldFlags(1);
    pub const PERMANENT: ForceFieldFlags = ForceFieldFlags(1 << 1);
    pub const BATTERY: ForceFieldFlags = ForceFieldFlags(1 << 2);
    /// Riding on a minion
    pub const ATTACHED: ForceFieldFlags = ForceFieldFlags(1 << 3);

    pub fn contains(self, other: ForceFieldFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ForceFieldFlags) {
        self.0 |= other.0;
    }
}

#[derive(Debug, Clone)]
pub struct ForceField {
    pub flags: ForceFieldFlags,
    /// Collision shell entity
    pub collision: Option<EntityRef>,
    /// Spawn or death animation; a dead field is removed when it reaches zero
    pub spawn_death_timer: f32,
    /// Hit flash
    pub damage_timer: f32,
    pub abs_pos_attached: Vec3,
}

impl ForceField {
    fn new(flags: ForceFieldFlags) -> Self {
        Self {
            flags,
            collision: None,
            spawn_death_timer: FORCE_FIELD_ANIM_TIME,
            damage_timer: 0.0,
            abs_pos_attached: Vec3::ZERO,
        }
    }

    pub fn is_invincible(&self) -> bool {
        self.flags.contains(ForceFieldFlags::INVINCIBLE)
    }

    pub fn is_permanent(&self) -> bool {
        self.flags.contains(ForceFieldFlags::PERMANENT)
    }

    pub fn is_attached(&self) -> bool {
        self.flags.contains(ForceFieldFlags::ATTACHED)
    }
}

/// Which fields a query considers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSetMode {
    All,
    InvincibleOnly,
}

const FIELD_SET_WORDS: usize = MAX_ENTITIES / 64;

/// Set of enemy force fields enclosing a point, keyed by entity index.
/// Two points see each other only if their sets are equal.
#[derive(Clone, PartialEq, Eq)]
pub struct FieldSet([u64; FIELD_SET_WORDS]);

impl Default for FieldSet {
    fn default() -> Self {
        Self([0; FIELD_SET_WORDS])
    }
}

impl std::fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.indices()).finish()
    }
}

impl FieldSet {
    pub fn insert(&mut self, index: u32) {
        let index = index as usize;
        if index < MAX_ENTITIES {
            self.0[index / 64] |= 1 << (index % 64);
        }
    }

    pub fn contains(&self, index: u32) -> bool {
        let index = index as usize;
        index < MAX_ENTITIES && self.0[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().enumerate().flat_map(|(word, bits)| {
            (0..64u32)
                .filter(move |bit| bits & (1 << bit) != 0)
                .map(move |bit| word as u32 * 64 + bit)
        })
    }
}

impl World {
    pub fn force_field_contains(&self, field: EntityRef, pos: Vec3, extra_radius: f32) -> bool {
        let Some(center) = self.absolute_pos(field) else {
            return false;
        };
        let radius = FORCE_FIELD_RADIUS + extra_radius;
        center.distance_squared(pos) < radius * radius
    }

    /// First field matching `mask` that encloses `pos`
    pub fn force_field_inside(&self, mask: TeamMask, pos: Vec3, extra_radius: f32) -> Option<EntityRef> {
        self.refs_of(EntityClass::ForceField)
            .into_iter()
            .find(|&field| {
                self.get(field).is_some_and(|e| mask.matches(e.team))
                    && self.force_field_contains(field, pos, extra_radius)
            })
    }

    /// Fields not owned by `team` that enclose `pos`
    pub fn field_set(&self, team: Team, pos: Vec3, mode: FieldSetMode) -> FieldSet {
        let mut set = FieldSet::default();
        for (field, e) in self.iter() {
            let EntityKind::ForceField(ff) = &e.kind else {
                continue;
            };
            if e.team == team || (mode == FieldSetMode::InvincibleOnly && !ff.is_invincible()) {
                continue;
            }
            if self.force_field_contains(field, pos, 0.0) {
                set.insert(field.index());
            }
        }
        set
    }

    /// No invincible friendly field overlaps a new one at `pos`
    pub fn can_spawn_force_field(&self, team: Team, pos: Vec3, radius: f32) -> bool {
        !self.iter().any(|(field, e)| match &e.kind {
            EntityKind::ForceField(ff) => {
                e.team == team
                    && ff.is_invincible()
                    && self.force_field_contains(field, pos, radius)
            }
            _ => false,
        })
    }
}

impl Simulation {
    /// Spawn a field at `pos`, or riding on `parent` when it is a minion
    pub fn spawn_force_field(
        &mut self,
        parent: Option<EntityRef>,
        pos: Vec3,
        rot: Quat,
        team: Team,
        ty: ForceFieldType,
    ) -> Result<EntityRef, WorldError> {
        let on_minion = parent.filter(|p| self.world.minion(*p).is_some());

        let mut flags = ForceFieldFlags::default();
        match ty {
            ForceFieldType::Permanent => {
                flags.insert(ForceFieldFlags::PERMANENT);
                flags.insert(ForceFieldFlags::INVINCIBLE);
            }
            ForceFieldType::Invincible => flags.insert(ForceFieldFlags::INVINCIBLE),
            ForceFieldType::Battery => flags.insert(ForceFieldFlags::BATTERY),
            ForceFieldType::Normal => {}
        }
        if on_minion.is_some() && matches!(ty, ForceFieldType::Normal | ForceFieldType::Battery) {
            flags.insert(ForceFieldFlags::ATTACHED);
        }

        if ty == ForceFieldType::Battery && self.is_host() {
            self.kill_enemies_inside(team, pos);
        }

        let transform = match on_minion {
            Some(minion) => Transform::child_of(minion, Vec3::ZERO),
            None => Transform::at(pos).with_rotation(rot),
        };
        let mut entity = Entity::new(EntityKind::ForceField(ForceField::new(flags)), team, transform);
        if ty != ForceFieldType::Permanent {
            let enemies = self.world.count_players(TeamMask::enemies_of(team));
            let hp = match enemies {
                0 | 1 => FORCE_FIELD_HEALTH_NERFED,
                2 => FORCE_FIELD_HEALTH_NORMAL,
                _ => FORCE_FIELD_HEALTH_BUFFED,
            };
            entity = entity
                .with_health(Health::new(hp, 0))
                .with_target(FORCE_FIELD_RADIUS)
                .with_shield();
        }
        let field = self.world.spawn(entity)?;
        if let Some(p) = parent.filter(|_| on_minion.is_none()) {
            if let Some(e) = self.world.get_mut(field) {
                e.transform.parent = Some(p);
            }
            self.world.set_absolute(field, pos, rot);
        }
        if let Some(minion) = on_minion.and_then(|m| self.world.minion_mut(m)) {
            minion.carrying = Some(field);
        }

        if matches!(ty, ForceFieldType::Normal | ForceFieldType::Battery) && self.is_host() {
            self.destroy_overlapping_fields(field, team);
        }

        let proxy = self.world.spawn(Entity::new(
            EntityKind::ForceFieldCollision { field },
            Team::NONE,
            Transform::child_of(field, Vec3::ZERO),
        ))?;
        let center = self.world.absolute_pos(field).unwrap_or(pos);
        self.physics
            .insert_sphere(proxy, center, FORCE_FIELD_RADIUS, CollisionMask::force_field(team));
        if let Some(ff) = self.world.force_field_mut(field) {
            ff.collision = Some(proxy);
            ff.abs_pos_attached = center;
        }

        if self.is_host() {
            let kind = if ty == ForceFieldType::Battery {
                ParticleKind::SpawnBatteryForceField
            } else {
                ParticleKind::SpawnForceField
            };
            self.spawn_particle(kind, center, rot, None, None, team);
        }
        debug!(entity = ?field, ?team, ?ty, "force field spawned");
        Ok(field)
    }

    fn kill_enemies_inside(&mut self, team: Team, pos: Vec3) {
        let reach = FORCE_FIELD_RADIUS + DRONE_RADIUS;
        for target in self.world.refs() {
            let Some(e) = self.world.get(target) else {
                continue;
            };
            if e.health.is_none() || e.class() == EntityClass::Battery {
                continue;
            }
            let other = self.world.entity_team(target);
            if other.is_none() || other == team {
                continue;
            }
            if self
                .world
                .absolute_pos(target)
                .is_some_and(|p| p.distance_squared(pos) < reach * reach)
            {
                self.kill(target, None);
            }
        }
    }

    /// Friendly fields may not touch; enemy fields may not sit on top of each other
    fn destroy_overlapping_fields(&mut self, field: EntityRef, team: Team) {
        let Some(center) = self.world.absolute_pos(field) else {
            return;
        };
        for other in self.world.refs_of(EntityClass::ForceField) {
            if other == field {
                continue;
            }
            let Some(e) = self.world.get(other) else {
                continue;
            };
            let EntityKind::ForceField(ff) = &e.kind else {
                continue;
            };
            if ff.is_invincible() {
                continue;
            }
            let radius = if e.team == team {
                FORCE_FIELD_RADIUS * 2.0
            } else {
                FORCE_FIELD_RADIUS * 0.75
            };
            if self
                .world
                .absolute_pos(other)
                .is_some_and(|p| p.distance_squared(center) < radius * radius)
            {
                self.kill(other, None);
            }
        }
    }

    /// Hit flash on every role; the attacker's owner is paid on the host
    pub(crate) fn force_field_damaged(&mut self, field: EntityRef, source: Option<EntityRef>, amount: i32) {
        let team = self.world.entity_team(field);
        if let Some(ff) = self.world.force_field_mut(field) {
            ff.damage_timer = FORCE_FIELD_DAMAGE_TIME;
        }
        if !self.is_host() {
            return;
        }
        let Some(owner) = source.and_then(|s| self.world.owner(s)) else {
            return;
        };
        if let Some(player) = self.world.players.get_mut(owner) {
            if player.team != team {
                player.energy += amount;
            }
        }
    }

    /// Start the death animation; removal happens when it ends
    pub(crate) fn force_field_killed(&mut self, field: EntityRef) {
        let Some((pos, rot)) = self.world.absolute(field) else {
            return;
        };
        let team = self.world.entity_team(field);
        self.spawn_particle(ParticleKind::Explosion, pos, rot, None, None, team);
        let collision = self.world.force_field_mut(field).and_then(|ff| {
            ff.spawn_death_timer = FORCE_FIELD_ANIM_TIME;
            ff.collision
        });
        if let Some(proxy) = collision {
            self.physics.set_enabled(proxy, false);
        }
    }

    pub(crate) fn update_force_fields(&mut self, dt: f32) {
        let host = self.is_host();
        let fields = self.world.refs_of(EntityClass::ForceField);
        for (i, &field) in fields.iter().enumerate() {
            let Some(ff) = self.world.force_field(field).cloned() else {
                continue;
            };

            if ff.is_attached() {
                let parent = self.world.get(field).and_then(|e| e.transform.parent);
                match parent {
                    Some(p) if self.world.contains(p) => {
                        if let Some(pos) = self.world.absolute_pos(field) {
                            if let Some(ff) = self.world.force_field_mut(field) {
                                ff.abs_pos_attached = pos;
                            }
                        }
                    }
                    _ => {
                        if let Some(e) = self.world.get_mut(field) {
                            e.transform = Transform::at(ff.abs_pos_attached);
                        }
                    }
                }
            }

            if ff.spawn_death_timer > 0.0 {
                let timer = (ff.spawn_death_timer - dt).max(0.0);
                if let Some(ff) = self.world.force_field_mut(field) {
                    ff.spawn_death_timer = timer;
                }
                let dead = !ff.is_permanent() && self.world.health(field).is_some_and(Health::is_dead);
                if host && timer == 0.0 && dead {
                    self.world.remove_deferred(field);
                    if let Some(proxy) = ff.collision {
                        self.world.remove_deferred(proxy);
                    }
                }
                continue;
            }

            if host {
                self.resolve_field_overlaps(field, &fields[i + 1..]);
            }

            if let Some(ff) = self.world.force_field_mut(field) {
                ff.damage_timer = (ff.damage_timer - dt).max(0.0);
            }
        }
    }

    /// An attached field may not overlap a friendly one
    fn resolve_field_overlaps(&mut self, field: EntityRef, others: &[EntityRef]) {
        let Some(me) = self.world.absolute_pos(field) else {
            return;
        };
        let team = self.world.entity_team(field);
        let attached = self.world.force_field(field).is_some_and(ForceField::is_attached);
        for &other in others {
            let Some(e) = self.world.get(other) else {
                continue;
            };
            let EntityKind::ForceField(off) = &e.kind else {
                continue;
            };
            if e.team != team || !(attached || off.is_attached()) || off.spawn_death_timer != 0.0 {
                continue;
            }
            let Some(them) = self.world.absolute_pos(other) else {
                continue;
            };
            if me.distance_squared(them) < FORCE_FIELD_RADIUS * FORCE_FIELD_RADIUS {
                self.spawn_particle(
                    ParticleKind::ImpactLarge,
                    (me + them) * 0.5,
                    look_rotation(Vec3::Y),
                    None,
                    None,
                    team,
                );
                if attached {
                    self.kill(field, None);
                    return;
                }
                self.kill(other, None);
            }
        }
    }
}
