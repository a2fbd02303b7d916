//! Demo arena: two bases facing each other across a neutral middle
//!
//! Host and spectators build the layout in the same order so that every
//! static entity lands on the same handle on both sides.

use glam::{Quat, Vec3};
use tracing::debug;

use crate::sim::force_field::ForceFieldType;
use crate::sim::health::Health;
use crate::sim::physics::{CollisionMask, StaticScene};
use crate::sim::simulation::Simulation;
use crate::sim::team::Team;
use crate::sim::tuning::{DRONE_HEALTH, DRONE_SHIELD_RADIUS};
use crate::sim::world::{ClientId, Drone, Entity, EntityKind, EntityRef, Player, PlayerRef, Transform, WorldError};

/// Distance of each base from the arena center along X
pub const BASE_DISTANCE: f32 = 40.0;
/// Flying height of every drone
pub const DRONE_HEIGHT: f32 = 1.0;
/// Client id used for the simulated remote human
pub const REMOTE_CLIENT: ClientId = ClientId(1);

/// One team's home
#[derive(Debug, Clone, Copy)]
pub struct TeamBase {
    pub team: Team,
    pub base: Vec3,
    pub flag: EntityRef,
    pub station: EntityRef,
}

/// A player and the drone it flies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pilot {
    pub player: PlayerRef,
    pub drone: EntityRef,
}

#[derive(Debug, Clone)]
pub struct Layout {
    pub bases: Vec<TeamBase>,
    pub batteries: Vec<EntityRef>,
    pub pilots: Vec<Pilot>,
    /// Pilot standing in for a human on [`REMOTE_CLIENT`]
    pub remote: Option<Pilot>,
}

/// Level geometry: floor plus a low wall across the middle
pub fn scene() -> StaticScene {
    let mut scene = StaticScene::new();
    scene.add_floor(0.0);
    scene.add_box(
        None,
        Vec3::new(-0.5, 0.0, -6.0),
        Vec3::new(0.5, 2.5, 6.0),
        CollisionMask::STATIC,
    );
    scene
}

fn base_position(team: Team) -> Vec3 {
    match team.index() {
        Some(0) => Vec3::new(-BASE_DISTANCE, 0.0, 0.0),
        _ => Vec3::new(BASE_DISTANCE, 0.0, 0.0),
    }
}

impl Layout {
    /// Spawn the arena into `sim`. With `remote` set, the last blue pilot is
    /// a human behind [`REMOTE_CLIENT`].
    pub fn build(sim: &mut Simulation, bots_per_team: usize, remote: bool) -> Result<Self, WorldError> {
        let teams = [Team::new(0), Team::new(1)];

        let mut bases = Vec::with_capacity(teams.len());
        for team in teams {
            let base = base_position(team);
            let toward_center = -base.normalize_or_zero();
            let flag = sim.spawn_flag(team, base)?;
            sim.spawn_force_field(None, base, Quat::IDENTITY, team, ForceFieldType::Normal)?;
            sim.spawn_turret(
                None,
                team,
                base + toward_center * 14.0 + Vec3::Y * 0.5,
                Quat::IDENTITY,
                None,
            )?;
            let station = sim.spawn_upgrade_station(base + Vec3::new(0.0, 0.0, -4.0), team)?;
            bases.push(TeamBase {
                team,
                base,
                flag,
                station,
            });
        }

        let batteries = vec![
            sim.spawn_battery(Vec3::new(0.0, 0.5, 15.0), Team::NONE)?,
            sim.spawn_battery(Vec3::new(0.0, 0.5, -15.0), Team::NONE)?,
        ];
        for x in [-12.0, 12.0] {
            sim.spawn_glass(Vec3::new(x, 2.0, 0.0), 1.5)?;
        }

        let mut pilots = Vec::new();
        let mut remote_pilot = None;
        for team in teams {
            let base = base_position(team);
            for i in 0..bots_per_team {
                let is_remote = remote && team == teams[1] && i + 1 == bots_per_team;
                let name = format!("{}-{}", team.index().unwrap_or_default(), i);
                let player = if is_remote {
                    Player::human(name, team, REMOTE_CLIENT, false)
                } else {
                    Player::bot(name, team)
                };
                let pos = base + Vec3::new(0.0, DRONE_HEIGHT, 2.0 + 1.5 * i as f32);
                let pilot = spawn_pilot(sim, player, pos)?;
                if is_remote {
                    remote_pilot = Some(pilot);
                }
                pilots.push(pilot);
            }
        }

        debug!(
            entities = sim.world.len(),
            pilots = pilots.len(),
            "arena built"
        );
        Ok(Self {
            bases,
            batteries,
            pilots,
            remote: remote_pilot,
        })
    }

    pub fn base_of(&self, team: Team) -> Option<&TeamBase> {
        self.bases.iter().find(|b| b.team == team)
    }
}

fn spawn_pilot(sim: &mut Simulation, player: Player, pos: Vec3) -> Result<Pilot, WorldError> {
    let team = player.team;
    let shield = sim.ctx.ruleset.drone_shield;
    let id = sim.world.next_drone_id()?;
    let player = sim.world.add_player(player)?;
    let drone = sim.world.spawn(
        Entity::new(
            EntityKind::Drone(Drone::new(id, Some(player))),
            team,
            Transform::at(pos),
        )
        .with_health(Health::new(DRONE_HEALTH, shield))
        .with_target(DRONE_SHIELD_RADIUS)
        .with_shield(),
    )?;
    if let Some(p) = sim.world.players.get_mut(player) {
        p.instance = Some(drone);
    }
    Ok(Pilot { player, drone })
}
