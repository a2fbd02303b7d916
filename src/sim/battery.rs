//! Capturable batteries: team ownership, energy drain and income

use glam::{Quat, Vec3};
use tracing::{debug, info};

use crate::net::message::{BatteryChange, BatteryMsg, Message};

use super::effects::{AudioAnchor, AudioEvent, ParticleKind};
use super::force_field::ForceFieldType;
use super::health::Health;
use super::simulation::{CombatEvent, Simulation};
use super::team::Team;
use super::tuning::{
    BATTERY_ENERGY, BATTERY_ENERGY_INCREMENT, BATTERY_ENERGY_INCREMENT_TIME, BATTERY_HEALTH,
    BATTERY_RADIUS,
};
use super::world::{Ability, Entity, EntityClass, EntityKind, EntityRef, Transform, WorldError};

#[derive(Debug, Clone)]
pub struct Battery {
    /// Remaining energy; the battery is exhausted at zero
    pub energy: i16,
}

impl Default for Battery {
    fn default() -> Self {
        Self {
            energy: BATTERY_ENERGY,
        }
    }
}

impl Simulation {
    pub fn spawn_battery(&mut self, pos: Vec3, team: Team) -> Result<EntityRef, WorldError> {
        self.world.spawn(
            Entity::new(
                EntityKind::Battery(Battery::default()),
                team,
                Transform::at(pos),
            )
            .with_health(Health::new(BATTERY_HEALTH, 0))
            .with_target(BATTERY_RADIUS),
        )
    }

    /// Something ran into the battery. A drone with a shooting ability
    /// equipped knocks it neutral; anything else claims it for its team.
    pub fn battery_touched(&mut self, battery: EntityRef, by: EntityRef) {
        if !self.host_only("battery_touched") {
            return;
        }
        let shooting = self
            .world
            .drone(by)
            .and_then(|d| d.current_ability)
            .is_some_and(Ability::is_shoot);
        let team = if shooting {
            Team::NONE
        } else {
            self.world.entity_team(by)
        };
        self.set_battery_team(battery, team, Some(by));
    }

    /// Change ownership. Returns false when `team` already owns it.
    pub fn set_battery_team(&mut self, battery: EntityRef, team: Team, caused_by: Option<EntityRef>) -> bool {
        if !self.host_only("set_battery_team") {
            return false;
        }
        let Some(e) = self.world.get(battery) else {
            return false;
        };
        if e.team == team {
            return false;
        }

        self.reset_hp(battery);
        self.send(Message::Battery(BatteryMsg {
            battery: Some(battery),
            change: BatteryChange::Team { team, caused_by },
        }));

        if !team.is_none() {
            if let Some((pos, rot)) = self.world.absolute(battery) {
                if let Err(error) =
                    self.spawn_force_field(None, pos, rot, team, ForceFieldType::Battery)
                {
                    debug!(%error, entity = ?battery, "no room for battery force field");
                }
            }
            self.push_event(CombatEvent::BatteryCaptured { battery, team });
            info!(entity = ?battery, ?team, "battery captured");
        }
        true
    }

    pub(crate) fn battery_killed(&mut self, battery: EntityRef, source: Option<EntityRef>) {
        self.set_battery_team(battery, Team::NONE, source);
    }

    /// Applies on every role
    pub(crate) fn on_battery_msg(&mut self, m: BatteryMsg) {
        let Some(battery) = m.battery else {
            return;
        };
        match m.change {
            BatteryChange::Energy(energy) => {
                if let Some(b) = self.world.battery_mut(battery) {
                    b.energy = energy;
                }
            }
            BatteryChange::Team { team, caused_by } => {
                if self.world.battery(battery).is_none() {
                    return;
                }
                let captured = caused_by.is_some_and(|c| {
                    self.world.contains(c) && self.world.entity_team(c) == team
                });
                if captured {
                    self.play_audio(AudioEvent::BatteryCapture, AudioAnchor::Entity(battery));
                }
                if let Some(e) = self.world.get_mut(battery) {
                    e.team = team;
                }
            }
        }
    }

    pub(crate) fn update_batteries(&mut self, dt: f32) {
        let timer = &mut self.ctx.accumulators.battery_increment;
        *timer -= dt;
        let increment = *timer < 0.0;
        if increment {
            *timer += BATTERY_ENERGY_INCREMENT_TIME;
        }
        if !increment || !self.is_host() {
            return;
        }

        for battery in self.world.refs_of(EntityClass::Battery) {
            self.add_health(battery, BATTERY_HEALTH / 3);

            let Some(e) = self.world.get(battery) else {
                continue;
            };
            let team = e.team;
            if team.is_none() {
                continue;
            }
            let Some(energy) = self.world.battery(battery).map(|b| b.energy) else {
                continue;
            };

            let remaining = (energy - BATTERY_ENERGY_INCREMENT).max(0);
            self.send(Message::Battery(BatteryMsg {
                battery: Some(battery),
                change: BatteryChange::Energy(remaining),
            }));
            if remaining == 0 {
                let (pos, rot) = self
                    .world
                    .absolute(battery)
                    .unwrap_or((Vec3::ZERO, Quat::IDENTITY));
                self.spawn_particle(ParticleKind::Explosion, pos, rot, None, None, team);
                self.world.remove_deferred(battery);
                debug!(entity = ?battery, "battery exhausted");
            }

            for (_, player) in self.world.players.iter_mut() {
                if player.team == team {
                    player.energy += i32::from(BATTERY_ENERGY_INCREMENT);
                }
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
    use crate::sim::team::TeamMask;
    use crate::sim::tuning::Ruleset;
    use crate::sim::world::{Drone, Player};

    fn host(effects: EffectLog) -> Simulation {
        Simulation::new(
            Authority::Host,
            Ruleset::default(),
            3,
            Box::new(StaticScene::new()),
            Box::new(effects),
        )
    }

    fn drone(sim: &mut Simulation, team: Team, ability: Option<Ability>) -> EntityRef {
        let player = sim.world.add_player(Player::bot("p", team)).unwrap();
        let mut d = Drone::new(sim.world.next_drone_id().unwrap(), Some(player));
        d.current_ability = ability;
        sim.world
            .spawn(Entity::new(EntityKind::Drone(d), team, Transform::at(Vec3::new(0.0, 0.0, 50.0))))
            .unwrap()
    }

    #[test]
    fn touching_claims_for_team() {
        let effects = EffectLog::new();
        let mut sim = host(effects.clone());
        let red = Team::new(0);
        let battery = sim.spawn_battery(Vec3::ZERO, Team::NONE).unwrap();
        let d = drone(&mut sim, red, None);

        sim.battery_touched(battery, d);
        assert_eq!(sim.world.get(battery).unwrap().team, red);
        assert!(effects.audio().contains(&AudioEvent::BatteryCapture));
        assert_eq!(effects.particle_count(ParticleKind::SpawnBatteryForceField), 1);
        assert_eq!(sim.world.count(EntityClass::ForceField, TeamMask::only(red)), 1);
        assert!(sim
            .take_events()
            .contains(&CombatEvent::BatteryCaptured { battery, team: red }));

        // Already owned: nothing happens
        assert!(!sim.set_battery_team(battery, red, Some(d)));
    }

    #[test]
    fn shooting_drone_neutralizes() {
        let mut sim = host(EffectLog::new());
        let red = Team::new(0);
        let blue = Team::new(1);
        let battery = sim.spawn_battery(Vec3::ZERO, blue).unwrap();
        let d = drone(&mut sim, red, Some(Ability::Bolter));

        sim.battery_touched(battery, d);
        assert!(sim.world.get(battery).unwrap().team.is_none());
    }

    #[test]
    fn owned_battery_drains_and_pays() {
        let mut sim = host(EffectLog::new());
        let red = Team::new(0);
        let player = sim.world.add_player(Player::bot("p", red)).unwrap();
        let battery = sim.spawn_battery(Vec3::ZERO, red).unwrap();

        sim.tick(1.0 / 60.0);
        assert_eq!(
            sim.world.battery(battery).unwrap().energy,
            BATTERY_ENERGY - BATTERY_ENERGY_INCREMENT
        );
        assert_eq!(
            sim.world.players.get(player).unwrap().energy,
            i32::from(BATTERY_ENERGY_INCREMENT)
        );

        // Next increment only after the interval
        sim.tick(1.0 / 60.0);
        assert_eq!(
            sim.world.battery(battery).unwrap().energy,
            BATTERY_ENERGY - BATTERY_ENERGY_INCREMENT
        );
    }

    #[test]
    fn exhausted_battery_is_removed() {
        let mut sim = host(EffectLog::new());
        let battery = sim.spawn_battery(Vec3::ZERO, Team::new(0)).unwrap();
        sim.world.battery_mut(battery).unwrap().energy = BATTERY_ENERGY_INCREMENT;
        sim.tick(1.0 / 60.0);
        assert!(!sim.world.contains(battery));
    }
}
