//! Hit points, shields, active armor and the lag-compensated damage buffer
//!
//! Health only changes through `Health` messages. The host decides a delta,
//! sends it, and applies it through loopback in the same call, so a second
//! damage call in one tick already sees the new values. Damage against a
//! remote human with the active-armor ability is held back for roughly that
//! client's latency, giving an armor activation already in flight a chance
//! to cancel or reflect it.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::net::message::{HealthMsg, Message};

use super::bolt::{BoltKind, Reflection};
use super::effects::ParticleKind;
use super::history::StateFrame;
use super::simulation::{CombatEvent, Simulation};
use super::team::Team;
use super::tuning::{
    DRONE_HEALTH, ENERGY_DRONE_KILL, ENERGY_STRUCTURE_KILL, NET_MAX_RTT_COMPENSATION,
    SHIELD_REGEN_DELAY, SHIELD_REGEN_TIME,
};
use super::world::{Ability, DroneCollisionState, EntityClass, EntityKind, EntityRef};

/// Whether a buffered hit came from a sniper shot; those are never countered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferedKind {
    Sniper,
    Other,
}

/// Damage waiting for the target's latency window to pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedDamage {
    pub source: Option<EntityRef>,
    pub amount: i8,
    /// Seconds left before the entry resolves
    pub delay: f32,
    pub kind: BufferedKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Health {
    pub hp: i8,
    pub hp_max: i8,
    pub shield: i8,
    pub shield_max: i8,
    pub regen_timer: f32,
    pub active_armor_timer: f32,
    pub(crate) buffer: VecDeque<BufferedDamage>,
}

impl Health {
    /// Full hp and shield
    pub fn new(hp_max: i8, shield_max: i8) -> Self {
        Self {
            hp: hp_max,
            hp_max,
            shield: shield_max,
            shield_max,
            regen_timer: 0.0,
            active_armor_timer: 0.0,
            buffer: VecDeque::new(),
        }
    }

    /// Hp plus shield, widened so large shields cannot overflow
    pub fn total(&self) -> i16 {
        i16::from(self.hp) + i16::from(self.shield)
    }

    pub fn is_dead(&self) -> bool {
        self.hp == 0
    }

    /// Pending buffered damage, oldest first
    pub fn buffered(&self) -> impl Iterator<Item = &BufferedDamage> {
        self.buffer.iter()
    }
}

impl Simulation {
    /// Hit `target` for `amount`, buffering when the target's latency calls for it.
    /// The caller must have checked [`Simulation::can_take_damage`].
    pub fn damage(
        &mut self,
        target: EntityRef,
        source: Option<EntityRef>,
        amount: i8,
        frame: Option<&StateFrame>,
    ) {
        if !self.host_only("damage") {
            return;
        }
        debug_assert!(self.can_take_damage(target, source, frame));
        let Some(health) = self.world.health(target) else {
            return;
        };
        if health.hp <= 0 || amount <= 0 {
            return;
        }

        match source.filter(|_| self.damage_buffer_required(target, source)) {
            Some(src) => {
                let latency = self
                    .world
                    .human_player(target)
                    .map(|p| self.peer_latency(p.client))
                    .unwrap_or_default();
                let delay = (latency.rtt.min(NET_MAX_RTT_COMPENSATION)
                    + latency.interpolation_delay
                    + self.ctx.tick_rate)
                    * self.ctx.ruleset.time_scale;
                let kind = match self.world.drone(src) {
                    Some(d) if d.current_ability == Some(Ability::Sniper) => BufferedKind::Sniper,
                    _ => BufferedKind::Other,
                };
                if let Some(health) = self.world.health_mut(target) {
                    health.buffer.push_back(BufferedDamage {
                        source: Some(src),
                        amount,
                        delay,
                        kind,
                    });
                }
                debug!(entity = ?target, source = ?src, amount, delay, "damage buffered");
                self.push_event(CombatEvent::DamageBuffered {
                    target,
                    source: src,
                    amount,
                });
            }
            None => self.apply_damage(target, source, amount),
        }
    }

    /// Damage that skips armor checks and the buffer
    pub fn damage_force(&mut self, target: EntityRef, source: Option<EntityRef>, amount: i8) {
        if !self.host_only("damage_force") {
            return;
        }
        let Some(health) = self.world.health(target) else {
            return;
        };
        if health.hp > 0 && amount > 0 {
            self.apply_damage(target, source, amount);
        }
    }

    /// Strip all hp and shield at once, whatever their sum
    pub fn kill(&mut self, target: EntityRef, source: Option<EntityRef>) {
        if !self.host_only("kill") {
            return;
        }
        let Some(health) = self.world.health(target) else {
            return;
        };
        if health.hp > 0 {
            let (hp, shield) = (health.hp, health.shield);
            self.send_health_event(target, source, -hp, -shield);
        }
    }

    /// Heal up to `hp_max`
    pub fn add_health(&mut self, target: EntityRef, amount: i8) {
        if !self.host_only("add_health") {
            return;
        }
        let Some(health) = self.world.health(target) else {
            return;
        };
        let amount = amount.min(health.hp_max - health.hp);
        if amount > 0 {
            self.send_health_event(target, None, amount, 0);
        }
    }

    pub fn reset_hp(&mut self, target: EntityRef) {
        let Some(health) = self.world.health(target) else {
            return;
        };
        if health.hp < health.hp_max {
            let missing = health.hp_max - health.hp;
            self.add_health(target, missing);
        }
    }

    /// Ability hook: invulnerable and reflective for `seconds`
    pub fn activate_armor(&mut self, target: EntityRef, seconds: f32) {
        if !self.host_only("activate_armor") {
            return;
        }
        if let Some(health) = self.world.health_mut(target) {
            health.active_armor_timer = health.active_armor_timer.max(seconds);
        }
    }

    pub fn active_armor(&self, target: EntityRef, frame: Option<&StateFrame>) -> bool {
        let Some(e) = self.world.get(target) else {
            return false;
        };
        let timer = e.health.as_ref().map_or(0.0, |h| h.active_armor_timer);
        match &e.kind {
            EntityKind::ForceField(field) => timer > 0.0 || field.is_invincible(),
            EntityKind::Drone(_) => match frame.and_then(|f| f.drone(&self.world, target)) {
                Some(recorded) => recorded.collision_state == DroneCollisionState::ActiveArmor,
                None => timer > 0.0,
            },
            _ => timer > 0.0,
        }
    }

    pub fn can_take_damage(
        &self,
        target: EntityRef,
        damager: Option<EntityRef>,
        frame: Option<&StateFrame>,
    ) -> bool {
        if self.active_armor(target, frame) {
            return false;
        }
        let Some(e) = self.world.get(target) else {
            return false;
        };

        match &e.kind {
            EntityKind::Drone(_) => {
                let same_client =
                    damager.is_some_and(|d| self.world.players_on_same_client(target, d));
                let state = match frame.and_then(|f| f.drone(&self.world, target)) {
                    Some(recorded) if !same_client => recorded.collision_state,
                    _ => self.world.drone_collision_state(target),
                };
                match state {
                    DroneCollisionState::Default => true,
                    DroneCollisionState::UpgradeStation | DroneCollisionState::ActiveArmor => false,
                    // Grenades, drone bolts and snipers still hit flying or dashing drones
                    DroneCollisionState::FlyingDashing => match damager.and_then(|d| self.world.get(d)) {
                        Some(d) => match &d.kind {
                            EntityKind::Grenade(_) => true,
                            EntityKind::Bolt(bolt) => {
                                matches!(bolt.kind, BoltKind::DroneBolter | BoltKind::DroneShotgun)
                            }
                            EntityKind::Drone(drone) => drone.current_ability == Some(Ability::Sniper),
                            _ => false,
                        },
                        None => false,
                    },
                }
            }
            EntityKind::Battery(_) => match damager.and_then(|d| self.world.bolt(d)) {
                Some(bolt) => bolt.team != e.team,
                None => true,
            },
            _ => true,
        }
    }

    /// True when hits on `target` from `source` must wait out the target's latency
    pub fn damage_buffer_required(&self, target: EntityRef, source: Option<EntityRef>) -> bool {
        if !self.is_host() {
            return false;
        }
        let Some(player) = self.world.human_player(target) else {
            return false;
        };
        let Some(source) = source else {
            return false;
        };
        !player.local
            && player.has_ability(Ability::ActiveArmor)
            && !self.world.players_on_same_client(target, source)
    }

    /// Shield first, then hp, never below zero
    fn apply_damage(&mut self, target: EntityRef, source: Option<EntityRef>, amount: i8) {
        let Some(health) = self.world.health_mut(target) else {
            return;
        };
        let from_shield = amount.min(health.shield).max(0);
        let from_hp = (amount - from_shield).min(health.hp).max(0);
        if from_shield == 0 && from_hp == 0 {
            return;
        }
        health.regen_timer = SHIELD_REGEN_TIME + SHIELD_REGEN_DELAY;
        self.send_health_event(target, source, -from_hp, -from_shield);
    }

    fn send_health_event(&mut self, target: EntityRef, source: Option<EntityRef>, hp: i8, shield: i8) {
        self.send(Message::Health(HealthMsg {
            target: Some(target),
            source,
            hp,
            shield,
        }));
    }

    pub(crate) fn update_health(&mut self, dt: f32) {
        if self.is_host() {
            for target in self.world.refs() {
                self.regen_shield(target, dt);
                self.drain_damage_buffer(target, dt);
            }
        }

        for (_, e) in self.world.iter_mut() {
            if let Some(health) = e.health.as_mut() {
                health.active_armor_timer = (health.active_armor_timer - dt).max(0.0);
            }
        }
    }

    fn regen_shield(&mut self, target: EntityRef, dt: f32) {
        let Some(health) = self.world.health_mut(target) else {
            return;
        };
        if health.shield >= health.shield_max {
            return;
        }
        let old = health.regen_timer;
        health.regen_timer -= dt;
        let new = health.regen_timer;
        if new < SHIELD_REGEN_TIME {
            let interval = SHIELD_REGEN_TIME / f32::from(health.shield_max);
            if (old / interval) as i32 != (new / interval) as i32 {
                self.send_health_event(target, None, 0, 1);
            }
        }
    }

    /// Resolve due entries in insertion order. Entries queued meanwhile wait for the next tick.
    fn drain_damage_buffer(&mut self, target: EntityRef, dt: f32) {
        let mut remaining = self.world.health(target).map_or(0, |h| h.buffer.len());
        let mut i = 0;
        while remaining > 0 {
            remaining -= 1;
            let Some(health) = self.world.health_mut(target) else {
                return;
            };
            let Some(entry) = health.buffer.get_mut(i) else {
                return;
            };
            entry.delay -= dt;
            if entry.delay >= 0.0 {
                i += 1;
                continue;
            }
            if let Some(entry) = health.buffer.remove(i) {
                self.resolve_buffered(target, entry);
            }
        }
    }

    fn resolve_buffered(&mut self, target: EntityRef, entry: BufferedDamage) {
        let Some(source) = entry.source.filter(|s| self.world.contains(*s)) else {
            return;
        };
        let armored = self.active_armor(target, None);
        match self.world.class(source) {
            Some(EntityClass::Bolt) => {
                if armored {
                    self.reflect_bolt(source, target, Reflection::Homing);
                } else {
                    self.apply_damage(target, Some(source), entry.amount);
                    self.world.remove_deferred(source);
                }
            }
            Some(EntityClass::Drone) if armored && entry.kind != BufferedKind::Sniper => {
                let counter = DRONE_HEALTH.saturating_add(self.ctx.ruleset.drone_shield);
                debug!(entity = ?source, victim = ?target, "buffered hit countered");
                self.damage_force(source, Some(target), counter);
            }
            _ => self.apply_damage(target, Some(source), entry.amount),
        }
    }

    /// Applies on every role and every source
    pub(crate) fn on_health_msg(&mut self, m: HealthMsg) {
        let Some(target) = m.target else {
            return;
        };
        let Some(health) = self.world.health_mut(target) else {
            return;
        };
        health.hp = health.hp.saturating_add(m.hp).clamp(0, health.hp_max);
        health.shield = health.shield.saturating_add(m.shield).clamp(0, health.shield_max);
        let dead = health.hp == 0;

        let lost = i16::from(m.hp) + i16::from(m.shield);
        if lost < 0 && self.world.class(target) == Some(EntityClass::ForceField) {
            self.force_field_damaged(target, m.source, -i32::from(lost));
        }

        if m.hp < 0 && dead {
            self.killed(target, m.source);
        }
    }

    fn killed(&mut self, target: EntityRef, source: Option<EntityRef>) {
        let Some(e) = self.world.get(target) else {
            return;
        };
        let class = e.class();
        let team = e.team;
        let by = source.and_then(|s| self.world.owner(s));
        self.push_event(CombatEvent::Killed {
            target,
            class,
            team,
            by,
        });

        if !self.is_host() {
            return;
        }
        info!(entity = ?target, ?class, ?team, killer = ?by, "killed");

        match class {
            EntityClass::Grenade => self.grenade_killed(target),
            EntityClass::Battery => self.battery_killed(target, source),
            EntityClass::ForceField => {
                if source.is_some() {
                    self.credit_kill(target, class, team, source);
                }
                self.force_field_killed(target);
            }
            EntityClass::Drone => {
                self.credit_kill(target, class, team, source);
                if let Some(flag) = self.world.drone(target).and_then(|d| d.flag) {
                    self.drop_flag(flag);
                }
                self.explode_and_remove(target, ParticleKind::DroneExplosion);
            }
            EntityClass::Turret
            | EntityClass::Minion
            | EntityClass::Rectifier
            | EntityClass::MinionSpawner => {
                self.credit_kill(target, class, team, source);
                self.explode_and_remove(target, ParticleKind::Explosion);
            }
            _ => self.world.remove_deferred(target),
        }
    }

    fn explode_and_remove(&mut self, target: EntityRef, kind: ParticleKind) {
        if let Some((pos, rot)) = self.world.absolute(target) {
            self.spawn_particle(kind, pos, rot, None, None, self.world.entity_team(target));
        }
        self.world.remove_deferred(target);
    }

    fn credit_kill(
        &mut self,
        victim: EntityRef,
        class: EntityClass,
        victim_team: Team,
        source: Option<EntityRef>,
    ) {
        if class == EntityClass::Drone {
            if let Some(player) = self
                .world
                .drone(victim)
                .and_then(|d| d.player)
                .and_then(|p| self.world.players.get_mut(p))
            {
                player.deaths += 1;
            }
        }

        let Some(killer) = source.and_then(|s| self.world.owner(s)) else {
            return;
        };
        let Some(player) = self.world.players.get_mut(killer) else {
            return;
        };
        if player.team == victim_team {
            return;
        }
        if class == EntityClass::Drone {
            player.kills += 1;
            player.energy += ENERGY_DRONE_KILL;
        } else {
            player.energy += ENERGY_STRUCTURE_KILL;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::net::channel::Authority;
    use crate::sim::simulation::PeerLatency;
    use crate::sim::tuning::{Ruleset, ACTIVE_ARMOR_TIME};
    use crate::sim::world::{ClientId, Drone, Entity, Player, PlayerRef, Transform};
    use glam::Vec3;

    const REMOTE: ClientId = ClientId(3);

    fn host() -> Simulation {
        Simulation::headless(Authority::Host, Ruleset::default(), 1)
    }

    fn spawn_drone(sim: &mut Simulation, player: Player, pos: Vec3, shield: i8) -> EntityRef {
        let team = player.team;
        let ability = player.abilities;
        let player = sim.world.add_player(player).unwrap();
        let mut drone = Drone::new(sim.world.next_drone_id().unwrap(), Some(player));
        if ability.contains(Ability::Sniper) {
            drone.current_ability = Some(Ability::Sniper);
        }
        sim.world
            .spawn(
                Entity::new(EntityKind::Drone(drone), team, Transform::at(pos))
                    .with_health(Health::new(DRONE_HEALTH, shield)),
            )
            .unwrap()
    }

    /// Remote human with active armor unlocked, 100ms rtt and 50ms interpolation
    fn armored_pilot(sim: &mut Simulation) -> EntityRef {
        let mut player = Player::human("remote", Team::new(0), REMOTE, false);
        player.abilities.insert(Ability::ActiveArmor);
        sim.set_peer_latency(
            REMOTE,
            PeerLatency {
                rtt: 0.1,
                interpolation_delay: 0.05,
            },
        );
        spawn_drone(sim, player, Vec3::ZERO, 1)
    }

    fn attacker(sim: &mut Simulation, name: &str, sniper: bool) -> EntityRef {
        let mut player = Player::bot(name, Team::new(1));
        if sniper {
            player.abilities.insert(Ability::Sniper);
        }
        let shield = sim.ctx.ruleset.drone_shield;
        spawn_drone(sim, player, Vec3::new(0.0, 0.0, 10.0), shield)
    }

    fn player_of(sim: &Simulation, drone: EntityRef) -> PlayerRef {
        sim.world.drone(drone).unwrap().player.unwrap()
    }

    fn hp_shield(sim: &Simulation, entity: EntityRef) -> (i8, i8) {
        let health = sim.world.health(entity).unwrap();
        (health.hp, health.shield)
    }

    fn rectifier(sim: &mut Simulation, hp: i8, shield: i8) -> EntityRef {
        sim.world
            .spawn(
                Entity::new(EntityKind::Rectifier, Team::new(0), Transform::at(Vec3::ZERO))
                    .with_health(Health::new(hp, shield)),
            )
            .unwrap()
    }

    #[test]
    fn shield_absorbs_before_hp() {
        let mut sim = host();
        let target = rectifier(&mut sim, 6, 2);

        sim.damage(target, None, 3, None);
        let health = sim.world.health(target).unwrap();
        assert_eq!((health.hp, health.shield), (5, 0));
        assert!((health.regen_timer - (SHIELD_REGEN_TIME + SHIELD_REGEN_DELAY)).abs() < 1e-6);

        // Applied through loopback, so the second call sees the first
        sim.damage(target, None, 100, None);
        let health = sim.world.health(target).unwrap();
        assert_eq!((health.hp, health.shield), (0, 0));
    }

    #[test]
    fn kill_fires_once() {
        let mut sim = host();
        let target = rectifier(&mut sim, 6, 1);
        sim.kill(target, None);
        sim.kill(target, None);
        let kills = sim
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, CombatEvent::Killed { .. }))
            .count();
        assert_eq!(kills, 1);
        assert!(sim.world.is_pending_removal(target));
    }

    #[test]
    fn add_health_is_clamped() {
        let mut sim = host();
        let target = rectifier(&mut sim, 6, 0);
        sim.damage(target, None, 4, None);
        sim.add_health(target, 100);
        assert_eq!(sim.world.health(target).unwrap().hp, 6);
        sim.reset_hp(target);
        assert_eq!(sim.world.health(target).unwrap().hp, 6);
    }

    #[test]
    fn shield_regenerates_after_delay() {
        let mut sim = host();
        let target = rectifier(&mut sim, 6, 2);
        sim.damage(target, None, 2, None);
        assert_eq!(sim.world.health(target).unwrap().shield, 0);

        let dt = 1.0 / 60.0;
        let mut ticks = 0;
        while sim.world.health(target).unwrap().shield < 2 && ticks < 600 {
            sim.tick(dt);
            ticks += 1;
        }
        // Delay plus one full regen period
        let elapsed = ticks as f32 * dt;
        assert!(elapsed > SHIELD_REGEN_DELAY + 0.4, "regen too early: {elapsed}");
        assert!(elapsed <= SHIELD_REGEN_DELAY + SHIELD_REGEN_TIME + 0.05, "regen too late: {elapsed}");
    }

    #[test]
    fn armor_blocks_damage_and_wears_off() {
        let mut sim = host();
        let target = rectifier(&mut sim, 6, 0);
        sim.activate_armor(target, ACTIVE_ARMOR_TIME);
        assert!(sim.active_armor(target, None));
        assert!(!sim.can_take_damage(target, None, None));

        for _ in 0..60 {
            sim.tick(1.0 / 60.0);
        }
        assert!(!sim.active_armor(target, None));
        assert!(sim.can_take_damage(target, None, None));
    }

    #[test]
    fn buffered_damage_waits_out_latency() {
        let mut sim = host();
        let target = armored_pilot(&mut sim);
        let enemy = attacker(&mut sim, "enemy", false);

        sim.damage(target, Some(enemy), 1, None);
        assert_eq!(hp_shield(&sim, target), (DRONE_HEALTH, 1));
        let entry = *sim.world.health(target).unwrap().buffered().next().unwrap();
        assert_eq!(entry.kind, BufferedKind::Other);
        assert!((entry.delay - (0.15 + sim.ctx.tick_rate)).abs() < 1e-5);
        assert!(sim
            .take_events()
            .iter()
            .any(|e| matches!(e, CombatEvent::DamageBuffered { target: t, amount: 1, .. } if *t == target)));

        sim.update_health(0.1);
        assert_eq!(hp_shield(&sim, target), (DRONE_HEALTH, 1));

        sim.update_health(0.1);
        assert_eq!(hp_shield(&sim, target), (DRONE_HEALTH, 0));
        assert_eq!(sim.world.health(target).unwrap().buffered().count(), 0);
    }

    #[test]
    fn local_damage_is_not_buffered() {
        let mut sim = host();
        let mut player = Player::human("local", Team::new(0), ClientId(0), true);
        player.abilities.insert(Ability::ActiveArmor);
        let target = spawn_drone(&mut sim, player, Vec3::ZERO, 1);
        let enemy = attacker(&mut sim, "enemy", false);

        assert!(!sim.damage_buffer_required(target, Some(enemy)));
        sim.damage(target, Some(enemy), 1, None);
        assert_eq!(hp_shield(&sim, target), (DRONE_HEALTH, 0));
    }

    #[test]
    fn buffered_hits_resolve_in_arrival_order() {
        let mut sim = host();
        let target = armored_pilot(&mut sim);
        let first = attacker(&mut sim, "first", false);
        let second = attacker(&mut sim, "second", false);

        sim.damage(target, Some(first), 1, None);
        sim.damage(target, Some(second), 1, None);
        let sources: Vec<_> = sim.world.health(target).unwrap().buffered().map(|b| b.source).collect();
        assert_eq!(sources, vec![Some(first), Some(second)]);
        sim.take_events();

        // Both are due in the same tick; the first takes the shield, the second the hp
        sim.update_health(0.5);
        let by: Vec<_> = sim
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                CombatEvent::Killed { target: t, by, .. } if t == target => Some(by),
                _ => None,
            })
            .collect();
        assert_eq!(by, vec![Some(player_of(&sim, second))]);
        assert_eq!(sim.world.players.get(player_of(&sim, second)).unwrap().kills, 1);
        assert_eq!(sim.world.players.get(player_of(&sim, first)).unwrap().kills, 0);
    }

    #[test]
    fn armor_in_flight_counters_a_drone_attacker() {
        let mut sim = host();
        let target = armored_pilot(&mut sim);
        let enemy = attacker(&mut sim, "enemy", false);

        sim.damage(target, Some(enemy), 1, None);
        // The client's armor activation lands before the hit resolves
        sim.activate_armor(target, ACTIVE_ARMOR_TIME);
        sim.update_health(0.5);

        assert_eq!(hp_shield(&sim, target), (DRONE_HEALTH, 1));
        assert_eq!(hp_shield(&sim, enemy), (0, 0));
        assert!(sim.world.is_pending_removal(enemy));
    }

    #[test]
    fn sniper_hits_are_never_countered() {
        let mut sim = host();
        let target = armored_pilot(&mut sim);
        let sniper = attacker(&mut sim, "sniper", true);
        let sniper_health = hp_shield(&sim, sniper);

        sim.damage(target, Some(sniper), 1, None);
        assert_eq!(
            sim.world.health(target).unwrap().buffered().next().unwrap().kind,
            BufferedKind::Sniper
        );
        sim.activate_armor(target, ACTIVE_ARMOR_TIME);
        sim.update_health(0.5);

        assert_eq!(hp_shield(&sim, sniper), sniper_health);
        assert!(!sim.world.is_pending_removal(sniper));
    }

    #[test]
    fn armor_in_flight_turns_a_bolt_around() {
        let mut sim = host();
        let target = armored_pilot(&mut sim);
        let enemy = attacker(&mut sim, "enemy", false);
        let player = player_of(&sim, enemy);
        let from = Vec3::new(0.0, 0.0, 1.0);
        let bolt = sim
            .spawn_bolt(BoltKind::DroneBolter, Team::new(1), Some(player), Some(enemy), from, Vec3::NEG_Z)
            .unwrap();

        sim.damage(target, Some(bolt), 1, None);
        sim.activate_armor(target, ACTIVE_ARMOR_TIME);
        sim.update_health(0.5);

        assert_eq!(hp_shield(&sim, target), (DRONE_HEALTH, 1));
        assert!(!sim.world.is_pending_removal(bolt));
        let b = sim.world.bolt(bolt).unwrap();
        assert!(b.reflected);
        assert_eq!(b.team, Team::new(0));
        assert_eq!(b.owner, Some(target));
        // Heading back toward the drone that fired it
        assert!(b.velocity.z > 0.0);
    }

    #[test]
    fn unarmored_buffered_bolt_hits_and_is_consumed() {
        let mut sim = host();
        let target = armored_pilot(&mut sim);
        let enemy = attacker(&mut sim, "enemy", false);
        let player = player_of(&sim, enemy);
        let from = Vec3::new(0.0, 0.0, 1.0);
        let bolt = sim
            .spawn_bolt(BoltKind::DroneBolter, Team::new(1), Some(player), Some(enemy), from, Vec3::NEG_Z)
            .unwrap();

        sim.damage(target, Some(bolt), 1, None);
        sim.update_health(0.5);

        assert_eq!(hp_shield(&sim, target), (DRONE_HEALTH, 0));
        assert!(sim.world.is_pending_removal(bolt));
    }

    #[test]
    fn same_client_hits_skip_the_buffer_and_the_history() {
        let mut sim = host();
        let target = armored_pilot(&mut sim);
        let mut teammate = Player::human("couch", Team::new(1), REMOTE, false);
        teammate.abilities.insert(Ability::ActiveArmor);
        let local_enemy = spawn_drone(&mut sim, teammate, Vec3::new(0.0, 0.0, 4.0), 1);
        assert!(sim.world.players_on_same_client(target, local_enemy));
        assert!(!sim.damage_buffer_required(target, Some(local_enemy)));

        // Recorded mid-flight; a damager on the same client sees the live, landed state
        let enemy = attacker(&mut sim, "enemy", false);
        sim.world.drone_mut(target).unwrap().attached = false;
        let frame = StateFrame::capture(&sim.world, sim.ctx.time);
        sim.world.drone_mut(target).unwrap().attached = true;

        assert!(sim.can_take_damage(target, Some(local_enemy), Some(&frame)));
        assert!(!sim.can_take_damage(target, Some(enemy), Some(&frame)));
        assert!(sim.can_take_damage(target, Some(enemy), None));
    }

    #[test]
    fn huge_shields_are_killed_and_countered_without_overflow() {
        let ruleset = Ruleset {
            drone_shield: i8::MAX - DRONE_HEALTH,
            ..Ruleset::default()
        };
        let mut sim = Simulation::headless(Authority::Host, ruleset, 1);
        let target = rectifier(&mut sim, 1, i8::MAX);
        assert_eq!(sim.world.health(target).unwrap().total(), 128);
        sim.kill(target, None);
        assert_eq!(hp_shield(&sim, target), (0, 0));

        let pilot = armored_pilot(&mut sim);
        let enemy = attacker(&mut sim, "enemy", false);
        assert_eq!(hp_shield(&sim, enemy), (DRONE_HEALTH, i8::MAX - DRONE_HEALTH));
        sim.damage(pilot, Some(enemy), 1, None);
        sim.activate_armor(pilot, ACTIVE_ARMOR_TIME);
        sim.update_health(0.5);
        assert_eq!(hp_shield(&sim, enemy), (0, 0));
    }
}
