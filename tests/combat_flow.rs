//! End-to-end combat on a host: bolts, turrets and lag-compensated hits

#![allow(clippy::unwrap_used)]

use drone_combat::net::Authority;
use drone_combat::sim::bolt::BoltKind;
use drone_combat::sim::health::Health;
use drone_combat::sim::tuning::{Ruleset, ACTIVE_ARMOR_TIME, DRONE_SHIELD_RADIUS, ENERGY_DRONE_KILL};
use drone_combat::sim::world::{Ability, ClientId, Drone, Player, Transform};
use drone_combat::sim::{
    CombatEvent, Entity, EntityClass, EntityKind, EntityRef, PeerLatency, PlayerRef, Simulation, Team,
    TeamMask,
};
use glam::{Quat, Vec3};

const DT: f32 = 1.0 / 60.0;

fn host() -> Simulation {
    Simulation::headless(Authority::Host, Ruleset::default(), 21)
}

fn pilot(sim: &mut Simulation, name: &str, team: Team, pos: Vec3) -> (PlayerRef, EntityRef) {
    spawn_pilot(sim, Player::bot(name, team), pos)
}

/// Human on another machine with active armor unlocked
fn remote_pilot(sim: &mut Simulation, name: &str, team: Team, pos: Vec3) -> (PlayerRef, EntityRef) {
    let client = ClientId(2);
    let mut player = Player::human(name, team, client, false);
    player.abilities.insert(Ability::ActiveArmor);
    sim.set_peer_latency(
        client,
        PeerLatency {
            rtt: 0.12,
            interpolation_delay: 0.05,
        },
    );
    spawn_pilot(sim, player, pos)
}

fn spawn_pilot(sim: &mut Simulation, player: Player, pos: Vec3) -> (PlayerRef, EntityRef) {
    let team = player.team;
    let player = sim.world.add_player(player).unwrap();
    let id = sim.world.next_drone_id().unwrap();
    let drone = sim
        .world
        .spawn(
            Entity::new(
                EntityKind::Drone(Drone::new(id, Some(player))),
                team,
                Transform::at(pos),
            )
            .with_health(Health::new(1, 1))
            .with_target(DRONE_SHIELD_RADIUS)
            .with_shield(),
        )
        .unwrap();
    (player, drone)
}

fn fire(sim: &mut Simulation, player: PlayerRef, owner: EntityRef, from: Vec3, dir: Vec3) -> EntityRef {
    let team = sim.world.entity_team(owner);
    sim.spawn_bolt(BoltKind::DroneBolter, team, Some(player), Some(owner), from, dir)
        .unwrap()
}

fn run(sim: &mut Simulation, seconds: f32) {
    for _ in 0..(seconds / DT).ceil() as usize {
        sim.tick(DT);
    }
}

#[test]
fn two_bolts_take_down_a_shielded_drone() {
    let mut sim = host();
    let red = Team::new(0);
    let blue = Team::new(1);
    let (shooter, red_drone) = pilot(&mut sim, "red", red, Vec3::new(0.0, 1.0, 0.0));
    let (victim, blue_drone) = pilot(&mut sim, "blue", blue, Vec3::new(0.0, 1.0, 10.0));

    fire(&mut sim, shooter, red_drone, Vec3::new(0.0, 1.0, 1.0), Vec3::Z);
    run(&mut sim, 0.6);
    let health = sim.world.health(blue_drone).unwrap();
    assert_eq!((health.hp, health.shield), (1, 0));
    assert_eq!(sim.world.count(EntityClass::Bolt, TeamMask::ALL), 0);

    fire(&mut sim, shooter, red_drone, Vec3::new(0.0, 1.0, 1.0), Vec3::Z);
    run(&mut sim, 0.6);
    assert!(!sim.world.contains(blue_drone));

    let killer = sim.world.players.get(shooter).unwrap();
    assert_eq!(killer.kills, 1);
    assert_eq!(killer.energy, ENERGY_DRONE_KILL);
    assert_eq!(sim.world.players.get(victim).unwrap().deaths, 1);
    assert!(sim.take_events().iter().any(|e| matches!(
        e,
        CombatEvent::Killed { target, class: EntityClass::Drone, by: Some(by), .. }
            if *target == blue_drone && *by == shooter
    )));
}

#[test]
fn drone_inside_station_is_not_hit() {
    let mut sim = host();
    let red = Team::new(0);
    let blue = Team::new(1);
    let (shooter, red_drone) = pilot(&mut sim, "red", red, Vec3::new(0.0, 1.0, 0.0));
    let (_, blue_drone) = pilot(&mut sim, "blue", blue, Vec3::new(0.0, 1.0, 10.0));
    let station = sim.spawn_upgrade_station(Vec3::new(0.0, 1.0, 10.0), blue).unwrap();
    sim.request_station(station, Some(blue_drone));
    assert_eq!(sim.world.drone_inside_station(blue_drone), Some(station));

    fire(&mut sim, shooter, red_drone, Vec3::new(0.0, 1.0, 1.0), Vec3::Z);
    run(&mut sim, 0.6);
    assert_eq!(sim.world.health(blue_drone).unwrap().total(), 2);
}

#[test]
fn turret_engages_enemy_drone() {
    let mut sim = host();
    let red = Team::new(0);
    let blue = Team::new(1);
    sim.spawn_turret(None, red, Vec3::ZERO, Quat::IDENTITY, None).unwrap();
    let (_, blue_drone) = pilot(&mut sim, "blue", blue, Vec3::new(0.0, 0.0, 10.0));

    run(&mut sim, 1.5);
    assert!(sim
        .world
        .health(blue_drone)
        .map_or(true, |h| h.total() < 2));
}

#[test]
fn late_bolt_hits_where_the_target_was() {
    let mut sim = host();
    let red = Team::new(0);
    let blue = Team::new(1);
    let (shooter, red_drone) = pilot(&mut sim, "red", red, Vec3::new(0.0, 1.0, 0.0));
    let (_, blue_drone) = pilot(&mut sim, "blue", blue, Vec3::new(0.0, 1.0, 10.0));

    run(&mut sim, 1.0);
    // The target has since moved out of the line of fire
    sim.world.get_mut(blue_drone).unwrap().transform.pos = Vec3::new(5.0, 1.0, 10.0);

    let bolt = fire(&mut sim, shooter, red_drone, Vec3::new(0.0, 1.0, 1.0), Vec3::Z);
    let fired_at = sim.ctx.time - 0.5;
    sim.fast_forward_bolt(bolt, fired_at);

    assert_eq!(sim.world.health(blue_drone).unwrap().total(), 1);
    assert!(sim.world.is_pending_removal(bolt));
}

#[test]
fn live_bolt_misses_a_target_that_moved() {
    let mut sim = host();
    let red = Team::new(0);
    let blue = Team::new(1);
    let (shooter, red_drone) = pilot(&mut sim, "red", red, Vec3::new(0.0, 1.0, 0.0));
    let (_, blue_drone) = pilot(&mut sim, "blue", blue, Vec3::new(5.0, 1.0, 10.0));

    fire(&mut sim, shooter, red_drone, Vec3::new(0.0, 1.0, 1.0), Vec3::Z);
    run(&mut sim, 0.6);
    assert_eq!(sim.world.health(blue_drone).unwrap().total(), 2);
}

/// Tick until a hit on `target` is parked in its damage buffer
fn run_until_buffered(sim: &mut Simulation, target: EntityRef) {
    for _ in 0..120 {
        sim.tick(DT);
        if sim
            .take_events()
            .iter()
            .any(|e| matches!(e, CombatEvent::DamageBuffered { target: t, .. } if *t == target))
        {
            return;
        }
    }
    panic!("no hit was buffered");
}

#[test]
fn remote_pilot_is_hit_after_its_latency() {
    let mut sim = host();
    let (shooter, red_drone) = pilot(&mut sim, "red", Team::new(0), Vec3::new(0.0, 1.0, 0.0));
    let (_, blue_drone) = remote_pilot(&mut sim, "blue", Team::new(1), Vec3::new(0.0, 1.0, 10.0));

    let bolt = fire(&mut sim, shooter, red_drone, Vec3::new(0.0, 1.0, 1.0), Vec3::Z);
    run_until_buffered(&mut sim, blue_drone);
    assert_eq!(sim.world.health(blue_drone).unwrap().total(), 2);
    assert!(sim.world.contains(bolt));

    run(&mut sim, 0.3);
    assert_eq!(sim.world.health(blue_drone).unwrap().total(), 1);
    assert!(!sim.world.contains(bolt));
}

#[test]
fn armor_raised_in_time_sends_the_bolt_home() {
    let mut sim = host();
    let (shooter, red_drone) = pilot(&mut sim, "red", Team::new(0), Vec3::new(0.0, 1.0, 0.0));
    let (defender, blue_drone) = remote_pilot(&mut sim, "blue", Team::new(1), Vec3::new(0.0, 1.0, 10.0));

    fire(&mut sim, shooter, red_drone, Vec3::new(0.0, 1.0, 1.0), Vec3::Z);
    run_until_buffered(&mut sim, blue_drone);
    sim.activate_armor(blue_drone, ACTIVE_ARMOR_TIME);

    run(&mut sim, 1.0);
    assert_eq!(sim.world.health(blue_drone).unwrap().total(), 2);
    assert!(!sim.world.contains(red_drone));
    assert_eq!(sim.world.players.get(defender).unwrap().kills, 1);
    assert_eq!(sim.world.players.get(shooter).unwrap().deaths, 1);
}
