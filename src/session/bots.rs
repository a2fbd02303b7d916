//! Scripted pilots that keep a demo session busy
//!
//! Bots fly straight at their objective, shoot the closest enemy in range
//! and now and then lob a grenade. A pilot flagged as remote fires through
//! the lag-compensation path, as if its shots arrived one latency late.

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use crate::sim::bolt::BoltKind;
use crate::sim::simulation::Simulation;
use crate::sim::team::{Team, TeamMask};
use crate::sim::tuning::{BATTERY_RADIUS, DRONE_MAX_DISTANCE, DRONE_SHIELD_RADIUS, GRENADE_RANGE};
use crate::sim::world::{EntityClass, EntityRef};

use super::layout::{Layout, Pilot, DRONE_HEIGHT};

/// Cruise speed (m/s)
const BOT_SPEED: f32 = 6.0;
/// Seconds between shots
const FIRE_INTERVAL: (f32, f32) = (0.4, 0.9);
/// Seconds between grenade attempts
const GRENADE_INTERVAL: (f32, f32) = (4.0, 8.0);

#[derive(Debug, Clone)]
struct Bot {
    pilot: Pilot,
    team: Team,
    home: Vec3,
    fire_cooldown: f32,
    grenade_cooldown: f32,
    remote: bool,
}

pub struct BotDriver {
    bots: Vec<Bot>,
    rng: ChaCha8Rng,
}

impl BotDriver {
    pub fn new(layout: &Layout, sim: &Simulation, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let bots = layout
            .pilots
            .iter()
            .filter_map(|&pilot| {
                let team = sim.world.players.get(pilot.player)?.team;
                let home = layout.base_of(team)?.base;
                Some(Bot {
                    pilot,
                    team,
                    home,
                    fire_cooldown: rng.gen_range(FIRE_INTERVAL.0..FIRE_INTERVAL.1),
                    grenade_cooldown: rng.gen_range(GRENADE_INTERVAL.0..GRENADE_INTERVAL.1),
                    remote: layout.remote == Some(pilot),
                })
            })
            .collect();
        Self { bots, rng }
    }

    /// Bots whose drone is still alive
    pub fn active(&self, sim: &Simulation) -> usize {
        self.bots
            .iter()
            .filter(|b| sim.world.contains(b.pilot.drone))
            .count()
    }

    /// Run one tick of decisions for every living bot
    pub fn drive(&mut self, sim: &mut Simulation, dt: f32) {
        for bot in &mut self.bots {
            let drone = bot.pilot.drone;
            if !sim.world.contains(drone) || sim.world.is_pending_removal(drone) {
                continue;
            }
            if sim.world.drone_inside_station(drone).is_some() {
                continue;
            }
            let Some(pos) = sim.world.absolute_pos(drone) else {
                continue;
            };

            let objective = objective(sim, bot, pos);
            fly(sim, drone, pos, objective, dt);
            touch_batteries(sim, bot.team, drone, pos);

            bot.fire_cooldown -= dt;
            bot.grenade_cooldown -= dt;
            let Some((target, distance)) = closest_enemy(sim, bot.team, pos) else {
                continue;
            };

            if bot.fire_cooldown <= 0.0 && distance < DRONE_MAX_DISTANCE {
                bot.fire_cooldown = self.rng.gen_range(FIRE_INTERVAL.0..FIRE_INTERVAL.1);
                fire(sim, bot, pos, target);
            }
            if bot.grenade_cooldown <= 0.0 && distance < GRENADE_RANGE * 2.0 {
                bot.grenade_cooldown = self.rng.gen_range(GRENADE_INTERVAL.0..GRENADE_INTERVAL.1);
                if let Some(aim) = sim.world.absolute_pos(target) {
                    let dir = (aim - pos).normalize_or_zero() + Vec3::Y * 0.3;
                    if let Err(error) = sim.throw_grenade(bot.pilot.player, pos + Vec3::Y * 0.3, dir) {
                        trace!(%error, "bot grenade not thrown");
                    }
                }
            }
        }
    }
}

/// Carry a held flag home, otherwise go for the closest enemy flag
fn objective(sim: &Simulation, bot: &Bot, pos: Vec3) -> Vec3 {
    let carrying = sim.world.drone(bot.pilot.drone).is_some_and(|d| d.flag.is_some());
    if carrying {
        return bot.home;
    }
    sim.world
        .sort_by_distance(EntityClass::Flag, TeamMask::enemies_of(bot.team), pos, true)
        .into_iter()
        .find(|&f| sim.world.get(f).is_some_and(|e| e.transform.parent.is_none()))
        .and_then(|f| sim.world.absolute_pos(f))
        .unwrap_or(bot.home)
}

fn fly(sim: &mut Simulation, drone: EntityRef, pos: Vec3, objective: Vec3, dt: f32) {
    let goal = Vec3::new(objective.x, DRONE_HEIGHT, objective.z);
    let to_goal = goal - pos;
    let step = (BOT_SPEED * dt).min(to_goal.length());
    let velocity = to_goal.normalize_or_zero() * (step / dt.max(f32::EPSILON));

    if let Some(e) = sim.world.get_mut(drone) {
        e.transform.pos = pos + to_goal.normalize_or_zero() * step;
    }
    if let Some(d) = sim.world.drone_mut(drone) {
        d.velocity = velocity;
    }
}

fn touch_batteries(sim: &mut Simulation, team: Team, drone: EntityRef, pos: Vec3) {
    let mask = TeamMask::enemies_of(team);
    if let Some((battery, distance)) = sim.world.closest(EntityClass::Battery, mask, pos) {
        if distance < BATTERY_RADIUS + DRONE_SHIELD_RADIUS {
            sim.battery_touched(battery, drone);
        }
    }
}

/// Closest enemy drone, falling back to enemy turrets
fn closest_enemy(sim: &Simulation, team: Team, pos: Vec3) -> Option<(EntityRef, f32)> {
    let mask = TeamMask::enemies_of(team);
    sim.world
        .closest(EntityClass::Drone, mask, pos)
        .or_else(|| sim.world.closest(EntityClass::Turret, mask, pos))
}

fn fire(sim: &mut Simulation, bot: &Bot, pos: Vec3, target: EntityRef) {
    let kind = BoltKind::DroneBolter;
    let aim = sim
        .predict_intersection(target, pos, kind.speed(false), None)
        .or_else(|| sim.world.target_position(target));
    let Some(aim) = aim else {
        return;
    };
    let dir = (aim - pos).normalize_or_zero();
    let muzzle = pos + dir * (DRONE_SHIELD_RADIUS + 0.1);
    let bolt = match sim.spawn_bolt(kind, bot.team, Some(bot.pilot.player), Some(bot.pilot.drone), muzzle, dir) {
        Ok(bolt) => bolt,
        Err(error) => {
            trace!(%error, "bot bolt not fired");
            return;
        }
    };

    if bot.remote {
        let client = sim
            .world
            .players
            .get(bot.pilot.player)
            .map(|p| p.client);
        if let Some(client) = client {
            let latency = sim.peer_latency(client);
            let fired_at = sim.ctx.time - f64::from(latency.rtt * 0.5 + latency.interpolation_delay);
            sim.fast_forward_bolt(bolt, fired_at);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::net::channel::Authority;
    use crate::session::layout::scene;
    use crate::sim::effects::TracingEffects;
    use crate::sim::tuning::Ruleset;

    fn host() -> (Simulation, Layout) {
        let mut sim = Simulation::new(
            Authority::Host,
            Ruleset::default(),
            4,
            Box::new(scene()),
            Box::new(TracingEffects),
        );
        let layout = Layout::build(&mut sim, 1, false).unwrap();
        (sim, layout)
    }

    #[test]
    fn bots_head_for_the_enemy_flag() {
        let (mut sim, layout) = host();
        let mut bots = BotDriver::new(&layout, &sim, 7);
        let red = layout.pilots[0];
        let start = sim.world.absolute_pos(red.drone).unwrap();

        for _ in 0..30 {
            bots.drive(&mut sim, 1.0 / 60.0);
        }
        let now = sim.world.absolute_pos(red.drone).unwrap();
        // Red starts at negative X and the blue flag is at positive X
        assert!(now.x > start.x);
        assert!((now.distance(start) - BOT_SPEED * 0.5).abs() < 0.05);
    }

    #[test]
    fn dead_pilots_are_skipped() {
        let (mut sim, layout) = host();
        let mut bots = BotDriver::new(&layout, &sim, 7);
        assert_eq!(bots.active(&sim), 2);
        sim.despawn(layout.pilots[0].drone);
        bots.drive(&mut sim, 1.0 / 60.0);
        assert_eq!(bots.active(&sim), 1);
    }
}
