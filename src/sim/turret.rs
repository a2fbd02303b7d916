//! Turrets: host-side target selection and firing

use glam::{Quat, Vec3};
use rand::Rng;
use tracing::{trace, warn};

use crate::net::channel::MessageSource;
use crate::net::message::{Message, TurretMsg};

use super::bolt::BoltKind;
use super::force_field::FieldSetMode;
use super::health::Health;
use super::physics::CollisionMask;
use super::simulation::Simulation;
use super::team::Team;
use super::tuning::{
    DRONE_SHIELD_AMOUNT, FORCE_FIELD_RADIUS, TURRET_COOLDOWN, TURRET_HEALTH, TURRET_RADIUS,
    TURRET_RANGE, TURRET_TARGET_CHECK_TIME,
};
use super::world::{Entity, EntityClass, EntityKind, EntityRef, PlayerRef, Transform, WorldError};

#[derive(Debug, Clone)]
pub struct Turret {
    pub owner: Option<PlayerRef>,
    pub target: Option<EntityRef>,
    pub cooldown: f32,
    /// Time until the next target re-evaluation
    pub target_check_time: f32,
    pub abs_pos_attached: Vec3,
}

/// Higher wins; negative is never attacked
fn priority(class: EntityClass) -> i32 {
    match class {
        EntityClass::Battery => -1,
        EntityClass::Minion => 2,
        _ => 1,
    }
}

impl Simulation {
    /// Build a turret at `pos`, or riding on `parent` when it is a minion
    pub fn spawn_turret(
        &mut self,
        owner: Option<PlayerRef>,
        team: Team,
        pos: Vec3,
        rot: Quat,
        parent: Option<EntityRef>,
    ) -> Result<EntityRef, WorldError> {
        let on_minion = parent.filter(|p| self.world.minion(*p).is_some());
        let transform = match on_minion {
            Some(minion) => Transform::child_of(minion, Vec3::ZERO),
            None => Transform::at(pos).with_rotation(rot),
        };
        let turret = Turret {
            owner,
            target: None,
            cooldown: 0.0,
            target_check_time: self.ctx.rng.gen_range(0.0..TURRET_TARGET_CHECK_TIME),
            abs_pos_attached: pos,
        };
        let entity = self.world.spawn(
            Entity::new(EntityKind::Turret(turret), team, transform)
                .with_health(Health::new(TURRET_HEALTH, DRONE_SHIELD_AMOUNT))
                .with_target(TURRET_RADIUS)
                .with_shield(),
        )?;
        match on_minion {
            Some(minion) => {
                if let Some(m) = self.world.minion_mut(minion) {
                    m.carrying = Some(entity);
                }
            }
            None if parent.is_some() => {
                if let Some(e) = self.world.get_mut(entity) {
                    e.transform.parent = parent;
                }
                self.world.set_absolute(entity, pos, rot);
            }
            None => {}
        }
        Ok(entity)
    }

    /// In range, behind the same enemy fields and not blocked by geometry
    pub fn turret_can_see(&self, turret: EntityRef, target: EntityRef) -> bool {
        let (Some(pos), Some(target_pos)) = (
            self.world.absolute_pos(turret),
            self.world.target_position(target),
        ) else {
            return false;
        };
        let team = self.world.entity_team(turret);
        let target_class = self.world.class(target);

        if target_class != Some(EntityClass::ForceField)
            && self.world.field_set(team, pos, FieldSetMode::All)
                != self.world.field_set(team, target_pos, FieldSetMode::All)
        {
            return false;
        }
        // Never shoot the minion carrying us
        if self
            .world
            .minion(target)
            .is_some_and(|m| m.carrying == Some(turret))
        {
            return false;
        }

        let mut distance = pos.distance(target_pos);
        if target_class == Some(EntityClass::ForceField) {
            distance -= FORCE_FIELD_RADIUS;
        }
        if distance >= TURRET_RANGE {
            return false;
        }
        match self
            .physics
            .raycast(pos, target_pos, CollisionMask::bolt_mask(team))
        {
            Some(hit) => hit.entity.map(|h| self.world.resolve_proxy(h)) == Some(target),
            None => true,
        }
    }

    /// Keep a visible target, otherwise pick the best visible enemy
    pub fn turret_check_target(&mut self, turret: EntityRef) {
        let Some(current) = self.world.turret(turret).map(|t| t.target) else {
            return;
        };
        if current.is_some_and(|t| self.turret_can_see(turret, t)) {
            return;
        }

        let team = self.world.entity_team(turret);
        let mut best: Option<EntityRef> = None;
        let mut best_priority = 0;
        for (candidate, e) in self.world.iter() {
            if e.health.is_none() {
                continue;
            }
            let other = self.world.entity_team(candidate);
            if other.is_none() || other == team {
                continue;
            }
            let p = priority(e.class());
            if p > best_priority && self.turret_can_see(turret, candidate) {
                best = Some(candidate);
                best_priority = p;
            }
        }

        if best != current {
            self.send(Message::Turret(TurretMsg {
                turret: Some(turret),
                target: best,
            }));
        }
    }

    pub(crate) fn on_turret_msg(&mut self, m: TurretMsg, source: MessageSource) {
        if !self.ctx.authority.applies(source) {
            return;
        }
        let Some(turret) = m.turret.and_then(|t| self.world.turret_mut(t)) else {
            return;
        };
        turret.target = m.target;
    }

    fn turret_fire(&mut self, turret: EntityRef, target: EntityRef, owner: Option<PlayerRef>) {
        let Some(mut gun_pos) = self.world.absolute_pos(turret) else {
            return;
        };
        let aim = self
            .predict_intersection(target, gun_pos, BoltKind::Turret.speed(false), None)
            .or_else(|| self.world.absolute_pos(target));
        let Some(aim) = aim else {
            return;
        };
        let dir = (aim - gun_pos).normalize_or_zero();
        gun_pos += dir * TURRET_RADIUS;
        let team = self.world.entity_team(turret);
        match self.spawn_bolt(BoltKind::Turret, team, owner, Some(turret), gun_pos, dir) {
            Ok(bolt) => trace!(entity = ?turret, ?bolt, ?target, "turret fired"),
            Err(error) => warn!(%error, entity = ?turret, "turret could not fire"),
        }
    }

    pub(crate) fn update_turrets(&mut self, dt: f32) {
        if !self.host_only("update_turrets") {
            return;
        }
        for turret in self.world.refs_of(EntityClass::Turret) {
            if self.world.is_pending_removal(turret) {
                continue;
            }

            // Fall off a dead carrier and stay put
            let parent = self.world.get(turret).and_then(|e| e.transform.parent);
            match parent {
                Some(p) if !self.world.contains(p) => {
                    let pos = self.world.turret(turret).map(|t| t.abs_pos_attached);
                    if let (Some(pos), Some(e)) = (pos, self.world.get_mut(turret)) {
                        e.transform = Transform::at(pos);
                    }
                }
                Some(_) => {
                    if let Some(pos) = self.world.absolute_pos(turret) {
                        if let Some(t) = self.world.turret_mut(turret) {
                            t.abs_pos_attached = pos;
                        }
                    }
                }
                None => {}
            }

            let check = self.world.turret_mut(turret).is_some_and(|t| {
                t.target_check_time -= dt;
                if t.target_check_time < 0.0 {
                    t.target_check_time += TURRET_TARGET_CHECK_TIME;
                    true
                } else {
                    false
                }
            });
            if check {
                self.turret_check_target(turret);
            }

            let Some(t) = self.world.turret_mut(turret) else {
                continue;
            };
            t.cooldown = (t.cooldown - dt).max(0.0);
            let (cooldown, target, owner) = (t.cooldown, t.target, t.owner);
            let Some(target) = target.filter(|_| cooldown == 0.0) else {
                continue;
            };

            if self.world.contains(target) && self.turret_can_see(turret, target) {
                self.turret_fire(turret, target, owner);
                if let Some(t) = self.world.turret_mut(turret) {
                    t.cooldown += TURRET_COOLDOWN;
                }
            } else if let Some(t) = self.world.turret_mut(turret) {
                t.target_check_time = 0.0;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::net::channel::Authority;
    use crate::sim::force_field::ForceFieldType;
    use crate::sim::tuning::{MINION_HEALTH, Ruleset};
    use crate::sim::world::{Drone, Minion};

    fn host() -> Simulation {
        Simulation::headless(Authority::Host, Ruleset::default(), 11)
    }

    fn minion(sim: &mut Simulation, team: Team, pos: Vec3) -> EntityRef {
        sim.world
            .spawn(
                Entity::new(EntityKind::Minion(Minion::default()), team, Transform::at(pos))
                    .with_health(Health::new(MINION_HEALTH, 0))
                    .with_target(0.5),
            )
            .unwrap()
    }

    fn drone(sim: &mut Simulation, team: Team, pos: Vec3) -> EntityRef {
        let id = sim.world.next_drone_id().unwrap();
        sim.world
            .spawn(
                Entity::new(EntityKind::Drone(Drone::new(id, None)), team, Transform::at(pos))
                    .with_health(Health::new(1, 1))
                    .with_target(0.4),
            )
            .unwrap()
    }

    #[test]
    fn minions_outrank_drones() {
        let mut sim = host();
        let red = Team::new(0);
        let blue = Team::new(1);
        let turret = sim.spawn_turret(None, red, Vec3::ZERO, Quat::IDENTITY, None).unwrap();
        drone(&mut sim, blue, Vec3::new(3.0, 0.0, 0.0));
        let m = minion(&mut sim, blue, Vec3::new(0.0, 0.0, 6.0));

        sim.turret_check_target(turret);
        assert_eq!(sim.world.turret(turret).unwrap().target, Some(m));
    }

    #[test]
    fn out_of_range_and_friendly_are_ignored() {
        let mut sim = host();
        let red = Team::new(0);
        let turret = sim.spawn_turret(None, red, Vec3::ZERO, Quat::IDENTITY, None).unwrap();
        minion(&mut sim, red, Vec3::new(1.0, 0.0, 0.0));
        minion(&mut sim, Team::new(1), Vec3::new(TURRET_RANGE + 1.0, 0.0, 0.0));

        sim.turret_check_target(turret);
        assert_eq!(sim.world.turret(turret).unwrap().target, None);
        assert!(sim.channel.take_outgoing().is_empty());
    }

    #[test]
    fn enemy_field_hides_targets_inside() {
        let mut sim = host();
        let red = Team::new(0);
        let blue = Team::new(1);
        let turret = sim
            .spawn_turret(None, red, Vec3::new(-12.0, 0.0, 0.0), Quat::IDENTITY, None)
            .unwrap();
        let m = minion(&mut sim, blue, Vec3::new(0.0, 0.0, 0.0));
        assert!(sim.turret_can_see(turret, m));

        sim.spawn_force_field(None, Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY, blue, ForceFieldType::Normal)
            .unwrap();
        assert!(!sim.turret_can_see(turret, m));
    }

    #[test]
    fn fires_on_cooldown() {
        let mut sim = host();
        let red = Team::new(0);
        let turret = sim.spawn_turret(None, red, Vec3::ZERO, Quat::IDENTITY, None).unwrap();
        minion(&mut sim, Team::new(1), Vec3::new(0.0, 0.0, 14.0));

        for _ in 0..(TURRET_TARGET_CHECK_TIME * 60.0) as usize + 2 {
            sim.tick(1.0 / 60.0);
        }
        assert!(sim.world.turret(turret).unwrap().target.is_some());
        assert_eq!(sim.world.count(EntityClass::Bolt, crate::sim::team::TeamMask::ALL), 1);
        assert!(sim.world.turret(turret).unwrap().cooldown > 0.0);
    }
}
