//! Grenades: ballistic flight, sticking, proximity fuse and banded blast damage

use glam::{Quat, Vec3};

use crate::net::channel::MessageSource;
use crate::net::message::{GrenadeMsg, Message};

use super::effects::{AudioAnchor, AudioEvent, ParticleKind};
use super::health::Health;
use super::history::StateFrame;
use super::physics::{look_rotation, reflect, CollisionMask, RayHit};
use super::simulation::{CombatEvent, Simulation};
use super::team::Team;
use super::tuning::{
    DRONE_SHIELD_AMOUNT, DRONE_SHIELD_RADIUS, DRONE_SHIELD_VIEW_RATIO, FORCE_FIELD_HEALTH_NORMAL,
    FORCE_FIELD_RADIUS, GRAVITY, GRENADE_DELAY, GRENADE_HEALTH, GRENADE_LAUNCH_SPEED,
    GRENADE_QUICK_FUSE, GRENADE_RADIUS, GRENADE_RANGE, MINION_HEALTH, MINION_SPAWNER_HEALTH,
    NET_MAX_RTT_COMPENSATION, TURRET_HEALTH,
};
use super::world::{Entity, EntityClass, EntityKind, EntityRef, PlayerRef, Transform, World, WorldError};

const TRACER_INTERVAL: f32 = 0.05;
const BEEP_INTERVAL: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrenadeState {
    /// Thrown, has not touched anything yet
    Inactive,
    /// Bounced at least once; the next plain surface it hits, it sticks to
    Active,
    Attached,
    Exploded,
}

#[derive(Debug, Clone)]
pub struct Grenade {
    pub team: Team,
    pub owner: Option<PlayerRef>,
    pub velocity: Vec3,
    /// Fuse progress, or time since the blast once exploded
    pub timer: f32,
    pub state: GrenadeState,
    /// Last absolute position while attached, used if the parent disappears
    pub abs_pos_attached: Vec3,
}

/// Things that arm a grenade's fuse when close by
pub(crate) fn grenade_trigger_filter(world: &World, target: EntityRef, e: &Entity, team: Team) -> bool {
    match &e.kind {
        EntityKind::ForceFieldCollision { field } => {
            world.get(*field).is_some_and(|f| f.team != team)
        }
        EntityKind::Drone(_) => e.team != team && world.drone_inside_station(target).is_none(),
        EntityKind::Minion(_)
        | EntityKind::ForceField(_)
        | EntityKind::Rectifier
        | EntityKind::Turret(_)
        | EntityKind::MinionSpawner => e.team != team,
        _ => false,
    }
}

/// Things a grenade reacts to on contact rather than sticking
pub(crate) fn grenade_hit_filter(world: &World, target: EntityRef, e: &Entity, team: Team) -> bool {
    e.class() == EntityClass::Minion || grenade_trigger_filter(world, target, e, team)
}

/// Banded blast damage for a target `distance` from the blast (already reduced for force fields)
fn blast_damage(target: &Entity, team: Team, distance: f32) -> i8 {
    let friendly = target.team == team;
    let scaled = if friendly { distance * 2.0 } else { distance };
    match &target.kind {
        EntityKind::Drone(_) => {
            if scaled < GRENADE_RANGE * 0.4 {
                3
            } else if scaled < GRENADE_RANGE * 0.7 {
                2
            } else if scaled < GRENADE_RANGE {
                1
            } else {
                0
            }
        }
        EntityKind::MinionSpawner if scaled < GRENADE_RANGE => {
            MINION_SPAWNER_HEALTH + DRONE_SHIELD_AMOUNT
        }
        EntityKind::MinionSpawner => 0,
        EntityKind::Turret(_) => {
            if scaled < GRENADE_RANGE * 0.5 {
                TURRET_HEALTH + DRONE_SHIELD_AMOUNT
            } else if scaled < GRENADE_RANGE {
                TURRET_HEALTH + DRONE_SHIELD_AMOUNT - 6
            } else {
                0
            }
        }
        EntityKind::ForceField(_) if !friendly && distance < GRENADE_RANGE => {
            FORCE_FIELD_HEALTH_NORMAL - 20
        }
        EntityKind::ForceField(_) => 0,
        // No chain reactions among friendly grenades
        EntityKind::Grenade(_) if friendly => 0,
        EntityKind::Minion(_) if distance < GRENADE_RANGE => MINION_HEALTH,
        EntityKind::Minion(_) => 0,
        _ => {
            let doubled = friendly
                && matches!(target.kind, EntityKind::Rectifier | EntityKind::Battery(_));
            let distance = if doubled { distance * 2.0 } else { distance };
            if distance < GRENADE_RANGE * 0.5 {
                6
            } else if distance < GRENADE_RANGE * 0.75 {
                3
            } else if distance < GRENADE_RANGE {
                1
            } else {
                0
            }
        }
    }
}

impl Simulation {
    /// Throw a grenade for `player` from `pos` along `dir`
    pub fn throw_grenade(
        &mut self,
        player: PlayerRef,
        pos: Vec3,
        dir: Vec3,
    ) -> Result<EntityRef, WorldError> {
        let team = self
            .world
            .players
            .get(player)
            .map(|p| p.team)
            .unwrap_or_default();
        let dir = dir.normalize_or_zero();
        let grenade = Grenade {
            team,
            owner: Some(player),
            velocity: dir * GRENADE_LAUNCH_SPEED,
            timer: 0.0,
            state: GrenadeState::Inactive,
            abs_pos_attached: pos,
        };
        self.world.spawn(
            Entity::new(
                EntityKind::Grenade(grenade),
                team,
                Transform::at(pos).with_rotation(look_rotation(dir)),
            )
            .with_health(Health::new(GRENADE_HEALTH, 0))
            .with_target(GRENADE_RADIUS * 2.0),
        )
    }

    fn send_grenade_state(&mut self, grenade: EntityRef, state: GrenadeState) {
        let parent = self.world.get(grenade).and_then(|e| e.transform.parent);
        self.send(Message::Grenade(GrenadeMsg {
            grenade: Some(grenade),
            state,
            parent,
        }));
    }

    /// One ballistic step. With a frame the hit is reported but not applied.
    pub fn simulate_grenade(
        &mut self,
        grenade: EntityRef,
        dt: f32,
        frame: Option<&StateFrame>,
    ) -> Option<RayHit> {
        if !self.host_only("simulate_grenade") {
            return None;
        }
        let e = self.world.get(grenade)?;
        let EntityKind::Grenade(g) = &e.kind else {
            return None;
        };
        if e.transform.parent.is_some() || g.state == GrenadeState::Exploded {
            return None;
        }
        let team = g.team;
        let pos = e.transform.pos;

        let half_accel = Vec3::new(0.0, GRAVITY, 0.0) * dt * 0.5;
        let mut velocity = g.velocity + half_accel;
        let next_pos = pos + velocity * dt;
        velocity += half_accel;
        if let Some(g) = self.world.grenade_mut(grenade) {
            g.velocity = velocity;
        }

        if next_pos.y < self.world.min_y {
            if frame.is_none() {
                self.world.remove_deferred(grenade);
            }
            return None;
        }

        if next_pos.distance_squared(pos) > 1e-12 {
            if frame.is_none() {
                self.shatter_all(pos, next_pos);
            }
            let hit = self.combat_raycast(
                pos,
                next_pos,
                CollisionMask::bolt_mask(team),
                team,
                grenade_hit_filter,
                frame,
                DRONE_SHIELD_RADIUS * DRONE_SHIELD_VIEW_RATIO,
            );
            if let Some(hit) = hit {
                if frame.is_none() {
                    self.grenade_hit_entity(grenade, hit);
                }
                return Some(hit);
            }
        }

        if let Some(e) = self.world.get_mut(grenade) {
            e.transform.pos = next_pos;
        }
        None
    }

    /// Bounce, stick or arm on contact
    pub fn grenade_hit_entity(&mut self, grenade: EntityRef, hit: RayHit) {
        if !self.host_only("grenade_hit_entity") {
            return;
        }
        let Some(g) = self.world.grenade(grenade).cloned() else {
            return;
        };
        let bounced = reflect(g.velocity, hit.normal) * 0.5;
        let filtered = hit
            .entity
            .and_then(|h| Some(grenade_hit_filter(&self.world, h, self.world.get(h)?, g.team)))
            .unwrap_or(false);

        match hit.entity {
            Some(h) if filtered => {
                if let Some(minion) = self.world.minion(h) {
                    let carrying = minion.carrying.is_some_and(|c| self.world.contains(c));
                    if carrying {
                        let enemy = self.world.entity_team(h) != g.team;
                        if let Some(gm) = self.world.grenade_mut(grenade) {
                            if enemy {
                                gm.timer = gm.timer.max(GRENADE_DELAY - GRENADE_QUICK_FUSE);
                            }
                            gm.velocity = bounced;
                        }
                        if g.state != GrenadeState::Active {
                            self.send_grenade_state(grenade, GrenadeState::Active);
                        }
                    } else {
                        if let Some(gm) = self.world.grenade_mut(grenade) {
                            gm.velocity = Vec3::ZERO;
                        }
                        if let Some(e) = self.world.get_mut(grenade) {
                            e.transform = Transform::child_of(h, Vec3::ZERO);
                        }
                        self.send_grenade_state(grenade, GrenadeState::Attached);
                    }
                } else {
                    if let Some(gm) = self.world.grenade_mut(grenade) {
                        gm.timer = gm.timer.max(GRENADE_DELAY - GRENADE_QUICK_FUSE);
                        gm.velocity = bounced;
                    }
                    if g.state != GrenadeState::Active {
                        self.send_grenade_state(grenade, GrenadeState::Active);
                    }
                }
            }
            _ if g.state == GrenadeState::Active => {
                if let Some(gm) = self.world.grenade_mut(grenade) {
                    gm.velocity = Vec3::ZERO;
                }
                if let Some(e) = self.world.get_mut(grenade) {
                    e.transform.parent = hit.entity;
                }
                self.world.set_absolute(
                    grenade,
                    hit.point + hit.normal * GRENADE_RADIUS * 1.1,
                    look_rotation(hit.normal),
                );
                self.send_grenade_state(grenade, GrenadeState::Attached);
            }
            _ => {
                if let Some(gm) = self.world.grenade_mut(grenade) {
                    gm.velocity = bounced;
                }
                self.send_grenade_state(grenade, GrenadeState::Active);
            }
        }
    }

    /// Clear sight from `from` to `target` at `to`, through force fields of other teams
    pub(crate) fn grenade_line_of_sight(
        &self,
        grenade: EntityRef,
        team: Team,
        from: Vec3,
        to: Vec3,
        target: EntityRef,
    ) -> bool {
        if grenade == target {
            return false;
        }
        if from.distance_squared(to) <= 1e-12 {
            return true;
        }
        match self.physics.raycast(from, to, CollisionMask::bolt_mask(team)) {
            None => true,
            Some(hit) => hit.entity.map(|h| self.world.resolve_proxy(h)) == Some(target),
        }
    }

    /// Detonate: glass, banded damage and the blast effect
    pub fn explode(&mut self, grenade: EntityRef) {
        if !self.host_only("explode") {
            return;
        }
        let Some(g) = self.world.grenade(grenade).cloned() else {
            return;
        };
        debug_assert!(g.state != GrenadeState::Exploded);
        if g.state == GrenadeState::Exploded {
            return;
        }

        self.send_grenade_state(grenade, GrenadeState::Exploded);
        if let Some(gm) = self.world.grenade_mut(grenade) {
            gm.timer = 0.0;
        }

        let Some(me) = self.world.absolute_pos(grenade) else {
            return;
        };
        self.spawn_particle(
            ParticleKind::Grenade,
            me,
            look_rotation(Vec3::Y),
            None,
            g.owner,
            g.team,
        );
        self.push_event(CombatEvent::GrenadeExploded { grenade, pos: me });

        for glass in self.world.refs_of(EntityClass::Glass) {
            let Some(pos) = self.world.absolute_pos(glass) else {
                continue;
            };
            let radius = self.world.glass(glass).map_or(0.0, |gl| gl.radius);
            let diff = pos - me;
            if diff.length() < GRENADE_RANGE * 0.75 + radius {
                self.shatter(glass, pos, diff);
            }
        }

        for target in self.world.refs() {
            if self.world.health(target).is_none()
                || !self.can_take_damage(target, Some(grenade), None)
            {
                continue;
            }
            let Some(pos) = self.world.absolute_pos(target) else {
                continue;
            };
            let Some(e) = self.world.get(target) else {
                continue;
            };
            let mut distance = pos.distance(me);
            if e.class() == EntityClass::ForceField {
                distance -= FORCE_FIELD_RADIUS;
            }
            let damage = blast_damage(e, g.team, distance);
            if damage > 0 && self.grenade_line_of_sight(grenade, g.team, me, pos, target) {
                self.damage(target, Some(grenade), damage, None);
            }
        }
    }

    /// Grenades blow up when destroyed
    pub(crate) fn grenade_killed(&mut self, grenade: EntityRef) {
        if self
            .world
            .grenade(grenade)
            .is_some_and(|g| g.state != GrenadeState::Exploded)
        {
            self.explode(grenade);
        }
    }

    /// Shove loose grenades and rigid bodies away from a blast
    pub(crate) fn grenade_blast_push(&mut self, center: Vec3) {
        let push = |distance: f32| 1.0 - distance / GRENADE_RANGE;

        for grenade in self.world.refs_of(EntityClass::Grenade) {
            let Some(pos) = self.world.absolute_pos(grenade) else {
                continue;
            };
            let to = pos - center;
            let distance = to.length();
            if distance >= GRENADE_RANGE || distance <= f32::EPSILON {
                continue;
            }
            if let Some(g) = self.world.grenade_mut(grenade) {
                if matches!(g.state, GrenadeState::Inactive | GrenadeState::Active) {
                    g.velocity += to / distance * push(distance) * GRENADE_LAUNCH_SPEED * 2.0;
                    g.velocity = g.velocity.clamp_length_max(GRENADE_LAUNCH_SPEED * 1.5);
                }
            }
        }

        let bodies: Vec<(EntityRef, Vec3)> = self
            .world
            .iter()
            .filter(|(_, e)| e.rigid_body)
            .filter_map(|(r, _)| Some((r, self.world.absolute_pos(r)?)))
            .collect();
        for (body, pos) in bodies {
            let to = pos - center;
            let distance = to.length();
            if distance < GRENADE_RANGE && distance > f32::EPSILON {
                self.physics
                    .apply_impulse(body, to / distance * push(distance) * 10.0);
            }
        }
    }

    /// Replay a grenade thrown in the past through recorded frames
    pub fn fast_forward_grenade(&mut self, grenade: EntityRef, from_timestamp: f64) {
        if !self.host_only("fast_forward_grenade") {
            return;
        }
        let Some(first) = self.history.by_timestamp(from_timestamp) else {
            return;
        };
        let mut frames = vec![first.clone()];
        frames.extend(self.history.after(first.timestamp));

        let dt = self.ctx.tick_rate;
        for frame in frames {
            if !self.world.contains(grenade) {
                return;
            }
            if let Some(hit) = self.simulate_grenade(grenade, dt, Some(&*frame)) {
                self.grenade_hit_entity(grenade, hit);
                return;
            }
        }
    }

    fn grenade_triggered(&self, grenade: EntityRef, team: Team, me: Vec3) -> bool {
        self.world.iter().any(|(target, e)| {
            if e.health.is_none() || !grenade_trigger_filter(&self.world, target, e, team) {
                return false;
            }
            let Some(pos) = self.world.absolute_pos(target) else {
                return false;
            };
            let mut distance = pos.distance(me);
            if e.class() == EntityClass::ForceField {
                distance -= FORCE_FIELD_RADIUS;
            }
            distance < GRENADE_RANGE * 0.5
                && self.grenade_line_of_sight(grenade, team, me, pos, target)
        })
    }

    pub(crate) fn update_grenades(&mut self, dt: f32) {
        let acc = &mut self.ctx.accumulators.grenade_tracer;
        *acc += dt;
        let mut emit_tracers = false;
        while *acc > TRACER_INTERVAL {
            *acc -= TRACER_INTERVAL;
            emit_tracers = true;
        }

        let host = self.is_host();
        for grenade in self.world.refs_of(EntityClass::Grenade) {
            let Some(g) = self.world.grenade(grenade).cloned() else {
                continue;
            };

            match g.state {
                GrenadeState::Exploded => {
                    if host {
                        let remove = self.world.grenade_mut(grenade).is_some_and(|g| {
                            g.timer += dt;
                            g.timer > NET_MAX_RTT_COMPENSATION * 2.0
                        });
                        if remove {
                            self.despawn(grenade);
                        }
                    }
                    continue;
                }
                GrenadeState::Attached => {
                    let parent = self.world.get(grenade).and_then(|e| e.transform.parent);
                    match parent {
                        Some(p) if !self.world.contains(p) => {
                            if host {
                                if let Some(e) = self.world.get_mut(grenade) {
                                    e.transform = Transform::at(g.abs_pos_attached);
                                }
                                self.send_grenade_state(grenade, GrenadeState::Active);
                            }
                        }
                        _ => {
                            if let Some(pos) = self.world.absolute_pos(grenade) {
                                if let Some(gm) = self.world.grenade_mut(grenade) {
                                    gm.abs_pos_attached = pos;
                                }
                            }
                        }
                    }
                }
                GrenadeState::Inactive | GrenadeState::Active => {
                    if emit_tracers {
                        if let Some(pos) = self.world.absolute_pos(grenade) {
                            self.effects.tracer(pos);
                        }
                    }
                    if host {
                        self.simulate_grenade(grenade, dt, None);
                    }
                }
            }

            if self.world.is_pending_removal(grenade) {
                continue;
            }
            let Some(g) = self.world.grenade(grenade).cloned() else {
                continue;
            };
            if g.state == GrenadeState::Exploded {
                continue;
            }
            let Some(me) = self.world.absolute_pos(grenade) else {
                continue;
            };

            // Past the halfway mark the fuse cannot be stopped
            let countdown = g.timer > GRENADE_DELAY * 0.5 || self.grenade_triggered(grenade, g.team, me);
            if !countdown {
                if let Some(gm) = self.world.grenade_mut(grenade) {
                    gm.timer = 0.0;
                }
                continue;
            }

            let last = g.timer;
            let timer = last + dt;
            if let Some(gm) = self.world.grenade_mut(grenade) {
                gm.timer = timer;
            }
            if timer < GRENADE_DELAY {
                let beep = |t: f32| (t * t * t / BEEP_INTERVAL) as i32;
                if last == 0.0 || beep(timer) != beep(last) {
                    self.play_audio(AudioEvent::GrenadeBeep, AudioAnchor::Entity(grenade));
                }
            } else if host {
                self.explode(grenade);
            } else if let Some(gm) = self.world.grenade_mut(grenade) {
                // The host may disagree; it will tell us
                gm.timer = 0.0;
            }
        }
    }

    pub(crate) fn on_grenade_msg(&mut self, m: GrenadeMsg, source: MessageSource) {
        if !self.ctx.authority.applies(source) {
            return;
        }
        let Some(grenade) = m.grenade else {
            return;
        };
        let Some(previous) = self.world.grenade(grenade).map(|g| g.state) else {
            return;
        };

        if m.state == GrenadeState::Attached {
            if let Some(parent) = m.parent {
                if let Some(minion) = self.world.minion_mut(parent) {
                    minion.carrying = Some(grenade);
                }
                if let Some(e) = self.world.get_mut(grenade) {
                    if e.transform.parent != Some(parent) {
                        e.transform = Transform::child_of(parent, Vec3::ZERO).with_rotation(Quat::IDENTITY);
                    }
                }
            }
            self.play_audio(AudioEvent::GrenadeAttach, AudioAnchor::Entity(grenade));
        } else if previous == GrenadeState::Inactive && m.state == GrenadeState::Active {
            self.play_audio(AudioEvent::GrenadeArm, AudioAnchor::Entity(grenade));
        }

        if let Some(g) = self.world.grenade_mut(grenade) {
            g.state = m.state;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::net::channel::Authority;
    use crate::sim::effects::TracingEffects;
    use crate::sim::health::Health;
    use crate::sim::physics::PhysicsService;
    use crate::sim::tuning::{Ruleset, DRONE_HEALTH, RECTIFIER_HEALTH};
    use crate::sim::world::{Drone, Minion, Player};

    /// Empty scene that remembers every impulse
    #[derive(Default)]
    struct Impulses(Arc<Mutex<Vec<(EntityRef, Vec3)>>>);

    impl PhysicsService for Impulses {
        fn raycast(&self, _: Vec3, _: Vec3, _: CollisionMask) -> Option<RayHit> {
            None
        }

        fn raycast_all(&self, _: Vec3, _: Vec3, _: CollisionMask) -> Vec<RayHit> {
            Vec::new()
        }

        fn insert_sphere(&mut self, _: EntityRef, _: Vec3, _: f32, _: CollisionMask) {}

        fn remove(&mut self, _: EntityRef) {}

        fn set_enabled(&mut self, _: EntityRef, _: bool) {}

        fn apply_impulse(&mut self, entity: EntityRef, impulse: Vec3) {
            self.0.lock().push((entity, impulse));
        }
    }

    fn entity(kind: EntityKind, team: Team) -> Entity {
        Entity::new(kind, team, Transform::at(Vec3::ZERO))
    }

    #[test]
    fn drone_bands_halve_for_friendlies() {
        let red = Team::new(0);
        let blue = Team::new(1);
        let enemy = entity(EntityKind::Drone(Drone::new(0, None)), blue)
            .with_health(Health::new(DRONE_HEALTH, 1));
        assert_eq!(blast_damage(&enemy, red, GRENADE_RANGE * 0.3), 3);
        assert_eq!(blast_damage(&enemy, red, GRENADE_RANGE * 0.6), 2);
        assert_eq!(blast_damage(&enemy, red, GRENADE_RANGE * 0.9), 1);
        assert_eq!(blast_damage(&enemy, red, GRENADE_RANGE * 1.1), 0);

        let friend = entity(EntityKind::Drone(Drone::new(1, None)), red);
        assert_eq!(blast_damage(&friend, red, GRENADE_RANGE * 0.3), 2);
        assert_eq!(blast_damage(&friend, red, GRENADE_RANGE * 0.6), 0);
    }

    #[test]
    fn structures_and_friendly_grenades() {
        let red = Team::new(0);
        let blue = Team::new(1);
        let rectifier = entity(EntityKind::Rectifier, blue)
            .with_health(Health::new(RECTIFIER_HEALTH, 0));
        assert_eq!(blast_damage(&rectifier, red, 1.0), 6);
        assert_eq!(blast_damage(&rectifier, red, GRENADE_RANGE * 0.6), 3);

        let own_grenade = entity(
            EntityKind::Grenade(Grenade {
                team: red,
                owner: None,
                velocity: Vec3::ZERO,
                timer: 0.0,
                state: GrenadeState::Inactive,
                abs_pos_attached: Vec3::ZERO,
            }),
            red,
        );
        assert_eq!(blast_damage(&own_grenade, red, 0.5), 0);
    }

    #[test]
    fn blast_pushes_rigid_bodies_away() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut sim = Simulation::new(
            Authority::Host,
            Ruleset::default(),
            1,
            Box::new(Impulses(log.clone())),
            Box::new(TracingEffects),
        );
        let crate_box = sim
            .world
            .spawn(
                Entity::new(EntityKind::Prop, Team::NONE, Transform::at(Vec3::new(1.0, 0.0, 0.0)))
                    .with_rigid_body(),
            )
            .unwrap();
        sim.world
            .spawn(Entity::new(EntityKind::Prop, Team::NONE, Transform::at(Vec3::new(-1.0, 0.0, 0.0))))
            .unwrap();
        sim.world
            .spawn(
                Entity::new(
                    EntityKind::Prop,
                    Team::NONE,
                    Transform::at(Vec3::new(GRENADE_RANGE + 1.0, 0.0, 0.0)),
                )
                .with_rigid_body(),
            )
            .unwrap();

        sim.grenade_blast_push(Vec3::ZERO);

        let impulses = log.lock();
        assert_eq!(impulses.len(), 1);
        assert_eq!(impulses[0].0, crate_box);
        assert!(impulses[0].1.x > 0.0);
    }

    const DT: f32 = 1.0 / 60.0;

    fn host() -> Simulation {
        Simulation::headless(Authority::Host, Ruleset::default(), 1)
    }

    fn red_grenade(sim: &mut Simulation) -> EntityRef {
        let player = sim.world.add_player(Player::bot("thrower", Team::new(0))).unwrap();
        sim.throw_grenade(player, Vec3::ZERO, Vec3::Z).unwrap()
    }

    /// Stuck to a wall at the origin
    fn planted_grenade(sim: &mut Simulation) -> EntityRef {
        let grenade = red_grenade(sim);
        let g = sim.world.grenade_mut(grenade).unwrap();
        g.velocity = Vec3::ZERO;
        g.state = GrenadeState::Attached;
        grenade
    }

    fn blue_minion(sim: &mut Simulation, pos: Vec3) -> EntityRef {
        sim.world
            .spawn(
                Entity::new(EntityKind::Minion(Minion::default()), Team::new(1), Transform::at(pos))
                    .with_health(Health::new(MINION_HEALTH, 0)),
            )
            .unwrap()
    }

    fn exploded(sim: &mut Simulation, grenade: EntityRef) -> bool {
        sim.take_events()
            .iter()
            .any(|e| matches!(e, CombatEvent::GrenadeExploded { grenade: g, .. } if *g == grenade))
    }

    fn run_until_timer(sim: &mut Simulation, grenade: EntityRef, timer: f32) {
        for _ in 0..240 {
            if sim.world.grenade(grenade).unwrap().timer > timer {
                return;
            }
            sim.update_grenades(DT);
        }
        panic!("fuse never reached {timer}");
    }

    #[test]
    fn fuse_resets_when_the_trigger_leaves_early() {
        let mut sim = host();
        let grenade = planted_grenade(&mut sim);
        let minion = blue_minion(&mut sim, Vec3::new(0.0, 0.0, GRENADE_RANGE * 0.3));

        run_until_timer(&mut sim, grenade, GRENADE_DELAY * 0.25);
        sim.world.get_mut(minion).unwrap().transform.pos = Vec3::new(0.0, 0.0, GRENADE_RANGE * 3.0);
        sim.update_grenades(DT);

        assert_eq!(sim.world.grenade(grenade).unwrap().timer, 0.0);
        for _ in 0..(GRENADE_DELAY / DT) as usize * 2 {
            sim.update_grenades(DT);
        }
        assert!(!exploded(&mut sim, grenade));
    }

    #[test]
    fn fuse_past_halfway_cannot_be_stopped() {
        let mut sim = host();
        let grenade = planted_grenade(&mut sim);
        let minion = blue_minion(&mut sim, Vec3::new(0.0, 0.0, GRENADE_RANGE * 0.3));

        run_until_timer(&mut sim, grenade, GRENADE_DELAY * 0.5);
        sim.world.get_mut(minion).unwrap().transform.pos = Vec3::new(0.0, 0.0, GRENADE_RANGE * 3.0);
        sim.take_events();

        for _ in 0..(GRENADE_DELAY * 0.5 / DT).ceil() as usize + 2 {
            sim.update_grenades(DT);
        }
        assert!(exploded(&mut sim, grenade));
        assert_eq!(sim.world.grenade(grenade).unwrap().state, GrenadeState::Exploded);
        // Out of range by then
        assert_eq!(sim.world.health(minion).unwrap().hp, MINION_HEALTH);
    }

    #[test]
    fn sticks_to_a_minion_carrying_nothing() {
        let mut sim = host();
        let minion = blue_minion(&mut sim, Vec3::new(0.0, 0.0, 2.0));
        let grenade = red_grenade(&mut sim);

        sim.grenade_hit_entity(
            grenade,
            RayHit {
                point: Vec3::new(0.0, 0.0, 1.6),
                normal: Vec3::NEG_Z,
                entity: Some(minion),
            },
        );

        assert_eq!(sim.world.get(grenade).unwrap().transform.parent, Some(minion));
        assert_eq!(sim.world.grenade(grenade).unwrap().state, GrenadeState::Attached);
        assert_eq!(sim.world.grenade(grenade).unwrap().velocity, Vec3::ZERO);
        assert_eq!(sim.world.minion(minion).unwrap().carrying, Some(grenade));
        assert_eq!(sim.world.absolute_pos(grenade), Some(Vec3::new(0.0, 0.0, 2.0)));
    }

    #[test]
    fn loaded_enemy_minion_shortens_the_fuse() {
        let mut sim = host();
        let minion = blue_minion(&mut sim, Vec3::new(0.0, 0.0, 2.0));
        let cargo = red_grenade(&mut sim);
        sim.world.minion_mut(minion).unwrap().carrying = Some(cargo);
        let grenade = red_grenade(&mut sim);

        sim.grenade_hit_entity(
            grenade,
            RayHit {
                point: Vec3::new(0.0, 0.0, 1.6),
                normal: Vec3::NEG_Z,
                entity: Some(minion),
            },
        );

        let g = sim.world.grenade(grenade).unwrap();
        assert_eq!(g.state, GrenadeState::Active);
        assert!(g.timer >= GRENADE_DELAY - GRENADE_QUICK_FUSE);
        assert!(g.velocity.z < 0.0);
        assert_eq!(sim.world.get(grenade).unwrap().transform.parent, None);
    }

    #[test]
    fn first_surface_bounces_and_the_next_sticks() {
        let mut sim = host();
        let grenade = red_grenade(&mut sim);
        let wall = RayHit {
            point: Vec3::new(0.0, 0.0, 3.0),
            normal: Vec3::NEG_Z,
            entity: None,
        };

        sim.grenade_hit_entity(grenade, wall);
        let g = sim.world.grenade(grenade).unwrap();
        assert_eq!(g.state, GrenadeState::Active);
        assert!(g.velocity.z < 0.0);

        sim.grenade_hit_entity(grenade, wall);
        let g = sim.world.grenade(grenade).unwrap();
        assert_eq!(g.state, GrenadeState::Attached);
        assert_eq!(g.velocity, Vec3::ZERO);
        let pos = sim.world.absolute_pos(grenade).unwrap();
        assert!(pos.distance(wall.point + wall.normal * GRENADE_RADIUS * 1.1) < 1e-4);
    }
}
