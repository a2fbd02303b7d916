//! Bolts: straight-line projectiles with per-target damage and reflection

use glam::{Quat, Vec3};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::net::message::{BoltMsg, Message, Retarget};

use super::effects::{AudioAnchor, AudioEvent, ParticleKind};
use super::history::StateFrame;
use super::physics::{look_rotation, reflect, CollisionMask, RayHit};
use super::simulation::Simulation;
use super::team::Team;
use super::tuning::{
    BATTERY_HEALTH, BOLT_LENGTH, BOLT_SPEED_DRONE_BOLTER, BOLT_SPEED_DRONE_SHOTGUN,
    BOLT_SPEED_MINION, BOLT_SPEED_TURRET, DRONE_MAX_DISTANCE, MINION_HEALTH,
    NET_MAX_RTT_COMPENSATION,
};
use super::world::{
    Entity, EntityClass, EntityKind, EntityRef, PlayerRef, Transform, World, WorldError,
};

/// Who fired the bolt; decides speed, range and the damage table row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoltKind {
    DroneBolter,
    DroneShotgun,
    Turret,
    Minion,
}

impl BoltKind {
    pub fn speed(self, reflected: bool) -> f32 {
        let boost = if reflected { 2.0 } else { 1.0 };
        match self {
            BoltKind::DroneBolter => BOLT_SPEED_DRONE_BOLTER,
            BoltKind::DroneShotgun => BOLT_SPEED_DRONE_SHOTGUN,
            BoltKind::Turret => BOLT_SPEED_TURRET * boost,
            BoltKind::Minion => BOLT_SPEED_MINION * boost,
        }
    }

    pub fn range(self) -> f32 {
        match self {
            BoltKind::DroneBolter => DRONE_MAX_DISTANCE * 2.0,
            _ => DRONE_MAX_DISTANCE,
        }
    }

    /// Damage against a target of class `target`. Rolls consume `rng`.
    pub fn damage(self, target: EntityClass, reflected: bool, rng: &mut ChaCha8Rng) -> i8 {
        use EntityClass as C;
        match self {
            BoltKind::DroneBolter => {
                let base = match target {
                    C::Battery | C::Minion => 3,
                    C::ForceField => 2,
                    C::Drone => 1,
                    _ => 1 + rng.gen_range(0..2),
                };
                if reflected {
                    12
                } else {
                    base
                }
            }
            BoltKind::DroneShotgun => {
                let base = match target {
                    C::Battery => BATTERY_HEALTH,
                    C::Minion => MINION_HEALTH,
                    C::Drone | C::ForceField => 1 + rng.gen_range(0..2),
                    _ => 2,
                };
                match (reflected, target) {
                    (true, C::Drone) => 1,
                    (true, _) => MINION_HEALTH,
                    (false, _) => base,
                }
            }
            BoltKind::Minion => {
                let base = match target {
                    C::Drone | C::Minion => 1,
                    C::ForceField => 4,
                    _ => 2,
                };
                if reflected {
                    12
                } else {
                    base
                }
            }
            BoltKind::Turret => match (reflected, target) {
                (true, _) => 12,
                (false, C::Minion) => MINION_HEALTH / 2,
                (false, _) => 1,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bolt {
    pub kind: BoltKind,
    pub team: Team,
    /// Entity that fired it; homing reflections aim back at this
    pub owner: Option<EntityRef>,
    /// Player credited for its damage
    pub player: Option<PlayerRef>,
    pub velocity: Vec3,
    pub remaining_lifetime: f32,
    pub reflected: bool,
}

impl Bolt {
    /// Zero velocity means the bolt is parked on the damage buffer
    pub fn visible(&self) -> bool {
        self.velocity.length_squared() > 0.0
    }
}

/// How a bolt bounces
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reflection {
    /// Mirror off a surface normal, keeping the team
    Simple(Vec3),
    /// Fly back at the current owner and change sides
    Homing,
}

/// Target filter used by combat raycasts
pub(crate) type TargetFilter = fn(&World, EntityRef, &Entity, Team) -> bool;

/// Skips friendlies and drones sheltered in an upgrade station
pub(crate) fn bolt_filter(world: &World, target: EntityRef, e: &Entity, team: Team) -> bool {
    match e.class() {
        EntityClass::Drone if world.drone_inside_station(target).is_some() => false,
        EntityClass::Drone
        | EntityClass::Minion
        | EntityClass::Rectifier
        | EntityClass::Battery
        | EntityClass::ForceField
        | EntityClass::MinionSpawner
        | EntityClass::Turret => e.team != team,
        _ => true,
    }
}

impl Simulation {
    /// Fire a bolt from `pos` along `dir`
    pub fn spawn_bolt(
        &mut self,
        kind: BoltKind,
        team: Team,
        player: Option<PlayerRef>,
        owner: Option<EntityRef>,
        pos: Vec3,
        dir: Vec3,
    ) -> Result<EntityRef, WorldError> {
        let dir = dir.normalize_or_zero();
        let speed = kind.speed(false);
        let bolt = Bolt {
            kind,
            team,
            owner,
            player,
            velocity: dir * speed,
            remaining_lifetime: kind.range() * 0.99 / speed,
            reflected: false,
        };
        self.world.spawn(Entity::new(
            EntityKind::Bolt(bolt),
            team,
            Transform::at(pos).with_rotation(look_rotation(dir)),
        ))
    }

    /// Closest hit along `start..end` among physics colliders in `mask` and
    /// target spheres passing `filter`. A physics hit wins an exact tie.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn combat_raycast(
        &self,
        start: Vec3,
        end: Vec3,
        mask: CollisionMask,
        team: Team,
        filter: TargetFilter,
        frame: Option<&StateFrame>,
        extra_radius: f32,
    ) -> Option<RayHit> {
        let mut closest = self.physics.raycast(start, end, mask);
        let mut closest_distance = closest.map_or(f32::MAX, |h| h.point.distance_squared(start));

        for (target, e) in self.world.iter() {
            let Some(t) = e.target else {
                continue;
            };
            if !filter(&self.world, target, e, team) {
                continue;
            }
            let center = match frame {
                Some(frame) => match frame.transform_absolute(target.index()) {
                    Some(recorded) => recorded.target_pos(),
                    None => continue,
                },
                None => match self.world.target_position(target) {
                    Some(pos) => pos,
                    None => continue,
                },
            };
            let Some(fraction) = super::physics::ray_sphere_intersect(
                start,
                end,
                center,
                t.radius + extra_radius,
            ) else {
                continue;
            };
            let point = start.lerp(end, fraction);
            let distance = point.distance_squared(start);
            if distance < closest_distance {
                closest_distance = distance;
                closest = Some(RayHit {
                    point,
                    normal: (point - center).normalize_or_zero(),
                    entity: Some(target),
                });
            }
        }
        closest
    }

    /// One step of a bolt. With a frame nothing is applied; the hit is only reported.
    pub fn simulate_bolt(
        &mut self,
        bolt: EntityRef,
        dt: f32,
        frame: Option<&StateFrame>,
    ) -> Option<RayHit> {
        let b = self.world.bolt_mut(bolt)?;
        b.remaining_lifetime -= dt;
        let (velocity, team, expired, visible) =
            (b.velocity, b.team, b.remaining_lifetime < 0.0, b.visible());

        if frame.is_none() && expired {
            if visible && self.is_host() {
                if let Some(pos) = self.world.absolute_pos(bolt) {
                    self.spawn_particle(
                        ParticleKind::Fizzle,
                        pos,
                        look_rotation(velocity),
                        None,
                        None,
                        Team::NONE,
                    );
                }
            }
            self.world.remove_deferred(bolt);
            return None;
        }

        if !visible {
            return None;
        }

        let pos = self.world.absolute_pos(bolt)?;
        let next_pos = pos + velocity * dt;
        let trace_end = next_pos + velocity.normalize() * BOLT_LENGTH;

        if frame.is_none() {
            self.shatter_all(pos, trace_end);
        }

        let hit = self.combat_raycast(
            pos,
            trace_end,
            CollisionMask::bolt_mask(team),
            team,
            bolt_filter,
            frame,
            0.0,
        );
        match hit {
            Some(hit) => {
                if frame.is_none() && self.is_host() {
                    self.bolt_hit_entity(bolt, hit, None);
                }
                Some(hit)
            }
            None => {
                let rot = self.world.absolute(bolt).map_or(Quat::IDENTITY, |(_, r)| r);
                self.world.set_absolute(bolt, next_pos, rot);
                None
            }
        }
    }

    /// Resolve a confirmed bolt hit: damage, reflection, impulse and impact effect
    pub fn bolt_hit_entity(&mut self, bolt: EntityRef, hit: RayHit, frame: Option<&StateFrame>) {
        if !self.host_only("bolt_hit_entity") {
            return;
        }
        let Some(b) = self.world.bolt(bolt).cloned() else {
            return;
        };

        let mut destroy = true;
        let mut hit_object = hit.entity;
        let mut hit_proxy = false;
        if let Some(EntityKind::ForceFieldCollision { field }) =
            hit_object.and_then(|h| self.world.get(h)).map(|e| &e.kind)
        {
            hit_object = Some(*field);
            hit_proxy = true;
        }

        let target = hit_object.filter(|h| self.world.health(*h).is_some());
        let basis = match target {
            Some(target) => {
                let class = self.world.class(target).unwrap_or(EntityClass::Prop);
                if b.reflected && class == EntityClass::Minion {
                    destroy = false;
                }

                let mut damage = b.kind.damage(class, b.reflected, &mut self.ctx.rng);
                if !self.can_take_damage(target, Some(bolt), frame) {
                    damage = 0;
                }

                if hit_proxy {
                    if !b.reflected {
                        destroy = false;
                        self.reflect_bolt(bolt, target, Reflection::Simple(hit.normal));
                    }
                } else if self.active_armor(target, frame) {
                    damage = 0;
                    if self.world.get(target).is_some_and(|e| e.shield) {
                        destroy = false;
                        self.reflect_bolt(bolt, target, Reflection::Homing);
                    }
                }

                if damage > 0 {
                    if self.damage_buffer_required(target, Some(bolt)) {
                        // Parked until the damage buffer resolves it
                        destroy = false;
                        if let Some(b) = self.world.bolt_mut(bolt) {
                            b.velocity = Vec3::ZERO;
                            b.remaining_lifetime = NET_MAX_RTT_COMPENSATION * 2.0;
                        }
                    }
                    self.damage(target, Some(bolt), damage, frame);
                }

                if self.world.get(target).is_some_and(|e| e.rigid_body) {
                    let velocity = self.world.bolt(bolt).map_or(b.velocity, |b| b.velocity);
                    self.physics.apply_impulse(target, velocity * 0.1);
                }
                b.velocity.normalize_or_zero()
            }
            None => hit.normal,
        };

        let particle = if b.kind == BoltKind::DroneShotgun {
            ParticleKind::ImpactTiny
        } else if hit_object.is_some_and(|h| self.world.health(h).is_some()) {
            ParticleKind::ImpactLarge
        } else {
            ParticleKind::ImpactSmall
        };
        self.spawn_particle(particle, hit.point, look_rotation(basis), None, None, Team::NONE);

        if destroy {
            self.world.remove_deferred(bolt);
        }
    }

    /// Bounce a bolt off `hit_object`. A homing reflection hands the bolt to its side.
    pub fn reflect_bolt(&mut self, bolt: EntityRef, hit_object: EntityRef, reflection: Reflection) {
        if !self.host_only("reflect_bolt") {
            return;
        }
        let Some(b) = self.world.bolt(bolt).cloned() else {
            return;
        };
        let Some((pos, rot)) = self.world.absolute(bolt) else {
            return;
        };

        let dir = match reflection {
            Reflection::Homing => match b.owner.and_then(|o| self.world.target_position(o)) {
                Some(owner_pos) => (owner_pos - pos).normalize_or_zero(),
                None => rot * Vec3::NEG_Z,
            },
            Reflection::Simple(normal) => reflect(rot * Vec3::Z, normal),
        };

        let speed = b.kind.speed(true);
        if let Some(b) = self.world.bolt_mut(bolt) {
            b.velocity = dir * speed;
            b.remaining_lifetime = DRONE_MAX_DISTANCE * 0.99 / (1.5 * speed);
        }
        self.world
            .set_absolute(bolt, pos + dir * BOLT_LENGTH, look_rotation(dir));

        let retarget = match reflection {
            Reflection::Homing => Some(Retarget {
                team: self.world.entity_team(hit_object),
                player: self.world.owner(hit_object),
                owner: Some(hit_object),
            }),
            Reflection::Simple(_) => None,
        };
        self.send(Message::Bolt(BoltMsg {
            bolt: Some(bolt),
            retarget,
        }));
    }

    /// Replay a bolt fired in the past through recorded frames.
    /// Stops at the first hit, or when history runs out.
    pub fn fast_forward_bolt(&mut self, bolt: EntityRef, from_timestamp: f64) {
        if !self.host_only("fast_forward_bolt") {
            return;
        }
        let Some(first) = self.history.by_timestamp(from_timestamp) else {
            return;
        };
        let mut frames = vec![first.clone()];
        frames.extend(self.history.after(first.timestamp));

        let dt = self.ctx.tick_rate;
        for frame in frames {
            if !self.world.contains(bolt) || self.world.is_pending_removal(bolt) {
                return;
            }
            if let Some(hit) = self.simulate_bolt(bolt, dt, Some(&*frame)) {
                self.bolt_hit_entity(bolt, hit, Some(&*frame));
                return;
            }
        }
    }

    pub(crate) fn update_bolts(&mut self, dt: f32) {
        for bolt in self.world.refs_of(EntityClass::Bolt) {
            if !self.world.is_pending_removal(bolt) {
                self.simulate_bolt(bolt, dt, None);
            }
        }
    }

    /// Runs on every role for every source
    pub(crate) fn on_bolt_msg(&mut self, m: BoltMsg) {
        let Some(bolt) = m.bolt else {
            return;
        };
        let Some(kind) = self.world.bolt(bolt).map(|b| b.kind) else {
            return;
        };
        if kind != BoltKind::DroneShotgun || self.ctx.rng.gen_bool(0.5) {
            self.play_audio(AudioEvent::BoltReflect, AudioAnchor::Entity(bolt));
        }
        if let Some(retarget) = m.retarget {
            if let Some(b) = self.world.bolt_mut(bolt) {
                b.reflected = true;
                b.team = retarget.team;
                b.player = retarget.player;
                b.owner = retarget.owner;
            }
            if let Some(e) = self.world.get_mut(bolt) {
                e.team = retarget.team;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::net::channel::Authority;
    use crate::sim::effects::EffectLog;
    use crate::sim::physics::StaticScene;
    use crate::sim::tuning::Ruleset;
    use rand::SeedableRng;

    #[test]
    fn damage_table_rows() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(BoltKind::DroneBolter.damage(EntityClass::Drone, false, &mut rng), 1);
        assert_eq!(BoltKind::DroneBolter.damage(EntityClass::Drone, true, &mut rng), 12);
        assert_eq!(BoltKind::DroneBolter.damage(EntityClass::Battery, false, &mut rng), 3);
        assert_eq!(BoltKind::DroneBolter.damage(EntityClass::ForceField, false, &mut rng), 2);
        assert_eq!(
            BoltKind::DroneShotgun.damage(EntityClass::Battery, false, &mut rng),
            BATTERY_HEALTH
        );
        assert_eq!(BoltKind::DroneShotgun.damage(EntityClass::Drone, true, &mut rng), 1);
        assert_eq!(
            BoltKind::DroneShotgun.damage(EntityClass::Turret, true, &mut rng),
            MINION_HEALTH
        );
        assert_eq!(BoltKind::Minion.damage(EntityClass::ForceField, false, &mut rng), 4);
        assert_eq!(
            BoltKind::Turret.damage(EntityClass::Minion, false, &mut rng),
            MINION_HEALTH / 2
        );
        assert_eq!(BoltKind::Turret.damage(EntityClass::Drone, true, &mut rng), 12);
    }

    #[test]
    fn random_rows_stay_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..64 {
            let d = BoltKind::DroneBolter.damage(EntityClass::Rectifier, false, &mut rng);
            assert!((1..=2).contains(&d));
            let d = BoltKind::DroneShotgun.damage(EntityClass::ForceField, false, &mut rng);
            assert!((1..=2).contains(&d));
        }
    }

    #[test]
    fn reflected_speed_doubles_for_slow_bolts_only() {
        assert_eq!(BoltKind::Turret.speed(true), BOLT_SPEED_TURRET * 2.0);
        assert_eq!(BoltKind::Minion.speed(true), BOLT_SPEED_MINION * 2.0);
        assert_eq!(BoltKind::DroneBolter.speed(true), BOLT_SPEED_DRONE_BOLTER);
        assert_eq!(BoltKind::DroneShotgun.speed(true), BOLT_SPEED_DRONE_SHOTGUN);
    }

    fn shotgun_reflect_sounds(seed: u64) -> Vec<AudioEvent> {
        let effects = EffectLog::new();
        let mut sim = Simulation::new(
            Authority::Host,
            Ruleset::default(),
            seed,
            Box::new(StaticScene::new()),
            Box::new(effects.clone()),
        );
        let bolt = sim
            .spawn_bolt(BoltKind::DroneShotgun, Team::new(0), None, None, Vec3::ZERO, Vec3::Z)
            .unwrap();
        for _ in 0..32 {
            sim.on_bolt_msg(BoltMsg {
                bolt: Some(bolt),
                retarget: None,
            });
        }
        effects.audio()
    }

    #[test]
    fn shotgun_reflect_audio_follows_the_seed() {
        let first = shotgun_reflect_sounds(9);
        assert_eq!(first, shotgun_reflect_sounds(9));
        // Roughly half of the pellets play a sound
        assert!(!first.is_empty() && first.len() < 32, "{} sounds", first.len());
    }
}
