//! Capture-the-flag state changes

use glam::{Quat, Vec3};
use tracing::{debug, info};

use crate::net::channel::MessageSource;
use crate::net::message::{FlagMsg, Message};

use super::effects::{AudioAnchor, AudioEvent};
use super::force_field::ForceFieldType;
use super::simulation::{CombatEvent, Simulation};
use super::team::Team;
use super::tuning::{DRONE_SHIELD_RADIUS, FLAG_RADIUS, FLAG_RESTORE_TIME};
use super::world::{Entity, EntityClass, EntityKind, EntityRef, Transform, WorldError};

/// Distance at which drones grab flags and flags score at bases
const FLAG_TRIGGER_RADIUS: f32 = DRONE_SHIELD_RADIUS + 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagChange {
    PickedUp,
    Dropped,
    Scored,
    Restored,
}

#[derive(Debug, Clone)]
pub struct Flag {
    pub at_base: bool,
    /// Counts down while the flag lies dropped; it returns home at zero
    pub timer: f32,
    /// Home position
    pub base: Vec3,
    /// Last absolute position seen by the host
    pub pos_cached: Vec3,
}

impl Simulation {
    pub fn spawn_flag(&mut self, team: Team, base: Vec3) -> Result<EntityRef, WorldError> {
        let flag = Flag {
            at_base: true,
            timer: FLAG_RESTORE_TIME,
            base,
            pos_cached: base,
        };
        self.world.spawn(
            Entity::new(EntityKind::Flag(flag), team, Transform::at(base)).with_target(FLAG_RADIUS),
        )
    }

    fn send_flag_change(&mut self, flag: EntityRef, change: FlagChange, param: Option<EntityRef>) {
        let timer = self.world.flag(flag).map_or(0.0, |f| f.timer);
        self.send(Message::Flag(FlagMsg {
            flag: Some(flag),
            change,
            param,
            timer,
        }));
    }

    /// An enemy drone grabs a flag lying around
    pub fn pickup_flag(&mut self, flag: EntityRef, drone: EntityRef) {
        if !self.host_only("pickup_flag") {
            return;
        }
        let Some(e) = self.world.get(flag) else {
            return;
        };
        if e.transform.parent.is_some() || self.world.entity_team(drone) == e.team {
            return;
        }
        if let Some(e) = self.world.get_mut(flag) {
            e.transform = Transform::child_of(drone, Vec3::ZERO);
        }
        self.send_flag_change(flag, FlagChange::PickedUp, Some(drone));
        debug!(entity = ?flag, carrier = ?drone, "flag picked up");
    }

    /// Leave the flag where its carrier was last seen
    pub fn drop_flag(&mut self, flag: EntityRef) {
        if !self.host_only("drop_flag") {
            return;
        }
        let Some(pos) = self.world.flag(flag).map(|f| f.pos_cached) else {
            return;
        };
        let carrier = self.world.get(flag).and_then(|e| e.transform.parent);
        if let Some(drone) = carrier.and_then(|d| self.world.drone_mut(d)) {
            drone.flag = None;
        }
        if let Some(e) = self.world.get_mut(flag) {
            e.transform = Transform::at(pos);
        }
        self.send_flag_change(flag, FlagChange::Dropped, None);
    }

    /// Forget `flag` on whichever drone holds it
    fn release_flag(&mut self, flag: EntityRef) {
        for (_, e) in self.world.iter_mut() {
            if let EntityKind::Drone(drone) = &mut e.kind {
                if drone.flag == Some(flag) {
                    drone.flag = None;
                }
            }
        }
    }

    fn rebuild_base_field(&mut self, team: Team, base: Vec3) {
        if let Err(error) = self.spawn_force_field(None, base, Quat::IDENTITY, team, ForceFieldType::Normal) {
            debug!(%error, ?team, "could not rebuild flag force field");
        }
    }

    pub(crate) fn on_flag_msg(&mut self, m: FlagMsg, source: MessageSource) {
        if !self.ctx.authority.applies(source) {
            return;
        }
        let Some(flag) = m.flag.filter(|f| self.world.flag(*f).is_some()) else {
            return;
        };
        let host = self.is_host();

        match m.change {
            FlagChange::PickedUp => {
                if let Some(d) = m.param.and_then(|d| self.world.drone_mut(d)) {
                    d.flag = Some(flag);
                    d.current_ability = None;
                }
                if let Some(f) = self.world.flag_mut(flag) {
                    f.at_base = false;
                }
                if let (false, Some(drone)) = (host, m.param) {
                    if let Some(e) = self.world.get_mut(flag) {
                        e.transform = Transform::child_of(drone, Vec3::ZERO);
                    }
                }
                self.play_audio(AudioEvent::FlagCapture, AudioAnchor::Entity(flag));
            }
            FlagChange::Dropped => {
                self.release_flag(flag);
                if let Some(f) = self.world.flag_mut(flag) {
                    f.at_base = false;
                    f.timer = m.timer;
                }
                if !host {
                    if let Some(pos) = self.world.absolute_pos(flag) {
                        if let Some(e) = self.world.get_mut(flag) {
                            e.transform = Transform::at(pos);
                        }
                    }
                }
                self.play_audio(AudioEvent::FlagRestore, AudioAnchor::Entity(flag));
            }
            FlagChange::Scored => {
                let base = self.world.flag_mut(flag).map(|f| {
                    f.at_base = true;
                    f.timer = FLAG_RESTORE_TIME;
                    f.base
                });
                if let (false, Some(base)) = (host, base) {
                    if let Some(e) = self.world.get_mut(flag) {
                        e.transform = Transform::at(base);
                    }
                }
                let player = m.param.and_then(|d| {
                    let drone = self.world.drone_mut(d)?;
                    drone.flag = None;
                    drone.player
                });
                let team = m.param.map(|d| self.world.entity_team(d)).unwrap_or_default();
                if let Some(p) = player.and_then(|p| self.world.players.get_mut(p)) {
                    p.flags_captured += 1;
                }
                self.push_event(CombatEvent::FlagCaptured { flag, team });
                self.play_audio(AudioEvent::FlagCapture, AudioAnchor::Entity(flag));
            }
            FlagChange::Restored => {
                let base = self.world.flag_mut(flag).map(|f| {
                    f.at_base = true;
                    f.timer = FLAG_RESTORE_TIME;
                    f.base
                });
                if let (false, Some(base)) = (host, base) {
                    if let Some(e) = self.world.get_mut(flag) {
                        e.transform = Transform::at(base);
                    }
                }
                self.play_audio(AudioEvent::FlagRestore, AudioAnchor::Entity(flag));
            }
        }
    }

    pub(crate) fn update_flags_server(&mut self, dt: f32) {
        if !self.host_only("update_flags_server") {
            return;
        }
        let flags = self.world.refs_of(EntityClass::Flag);
        for &flag in &flags {
            let parent = self.world.get(flag).and_then(|e| e.transform.parent);
            if parent.is_some_and(|p| !self.world.contains(p)) {
                // Carrier vanished without dropping it
                self.drop_flag(flag);
                continue;
            }
            let Some(pos) = self.world.absolute_pos(flag) else {
                continue;
            };
            let team = self.world.entity_team(flag);
            let Some(at_base) = self.world.flag_mut(flag).map(|f| {
                f.pos_cached = pos;
                f.at_base
            }) else {
                continue;
            };

            if let Some(carrier) = parent {
                if let Some(f) = self.world.flag_mut(flag) {
                    // Restoring counts up faster than it counts down
                    f.timer = (f.timer + dt * 1.5).min(FLAG_RESTORE_TIME);
                }
                self.check_flag_score(flag, team, carrier, pos, &flags);
                continue;
            }

            if !at_base {
                let expired = self.world.flag_mut(flag).is_some_and(|f| {
                    f.timer = (f.timer - dt).max(0.0);
                    f.timer == 0.0
                });
                if expired {
                    self.restore_flag(flag, team, &flags);
                    continue;
                }
            }
            if let Some(carrier) = self.flag_toucher(team, pos) {
                self.pickup_flag(flag, carrier);
            }
        }
    }

    /// Enemy drone close enough to grab a flag of `team` at `pos`
    fn flag_toucher(&self, team: Team, pos: Vec3) -> Option<EntityRef> {
        self.world
            .refs_of(EntityClass::Drone)
            .into_iter()
            .find(|&d| {
                self.world.entity_team(d) != team
                    && self.world.drone(d).is_some_and(|d| d.flag.is_none())
                    && self.world.drone_inside_station(d).is_none()
                    && self
                        .world
                        .absolute_pos(d)
                        .is_some_and(|p| p.distance(pos) < FLAG_TRIGGER_RADIUS)
            })
    }

    fn check_flag_score(&mut self, flag: EntityRef, team: Team, carrier: EntityRef, pos: Vec3, flags: &[EntityRef]) {
        let scored = flags.iter().any(|&other| {
            self.world.entity_team(other) != team
                && self
                    .world
                    .flag(other)
                    .is_some_and(|o| o.at_base && o.base.distance(pos) < FLAG_TRIGGER_RADIUS)
        });
        if !scored {
            return;
        }

        self.send_flag_change(flag, FlagChange::Scored, Some(carrier));
        let Some(base) = self.world.flag_mut(flag).map(|f| {
            f.pos_cached = f.base;
            f.base
        }) else {
            return;
        };
        if let Some(e) = self.world.get_mut(flag) {
            e.transform = Transform::at(base);
        }
        info!(entity = ?flag, ?carrier, "flag scored");
        self.rebuild_base_field(team, base);
    }

    fn restore_flag(&mut self, flag: EntityRef, team: Team, flags: &[EntityRef]) {
        self.send_flag_change(flag, FlagChange::Restored, None);
        let Some(base) = self.world.flag_mut(flag).map(|f| {
            f.pos_cached = f.base;
            f.base
        }) else {
            return;
        };
        if let Some(e) = self.world.get_mut(flag) {
            e.transform = Transform::at(base);
        }

        let all_home = flags
            .iter()
            .all(|&f| self.world.flag(f).map_or(true, |f| f.at_base));
        if all_home {
            for &f in flags {
                let team = self.world.entity_team(f);
                if let Some(base) = self.world.flag(f).map(|f| f.base) {
                    self.rebuild_base_field(team, base);
                }
            }
        }
        debug!(entity = ?flag, ?team, "flag restored");
    }

    /// Clients only run the dropped-flag countdown for display
    pub(crate) fn update_flags_client(&mut self, dt: f32) {
        for flag in self.world.refs_of(EntityClass::Flag) {
            let carried = self
                .world
                .get(flag)
                .is_some_and(|e| e.transform.parent.is_some());
            if let Some(f) = self.world.flag_mut(flag).filter(|f| !carried && !f.at_base) {
                f.timer = (f.timer - dt).max(0.0);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::net::channel::Authority;
    use crate::sim::tuning::Ruleset;
    use crate::sim::world::{Drone, Player};

    struct Ctf {
        sim: Simulation,
        red_flag: EntityRef,
        blue_flag: EntityRef,
        drone: EntityRef,
        player: crate::sim::world::PlayerRef,
    }

    fn ctf() -> Ctf {
        let mut sim = Simulation::headless(Authority::Host, Ruleset::default(), 9);
        let red = Team::new(0);
        let blue = Team::new(1);
        let red_flag = sim.spawn_flag(red, Vec3::new(-50.0, 0.0, 0.0)).unwrap();
        let blue_flag = sim.spawn_flag(blue, Vec3::new(50.0, 0.0, 0.0)).unwrap();
        let player = sim.world.add_player(Player::bot("runner", red)).unwrap();
        let drone = sim
            .world
            .spawn(Entity::new(
                EntityKind::Drone(Drone::new(0, Some(player))),
                red,
                Transform::at(Vec3::new(50.0, 0.0, 0.0)),
            ))
            .unwrap();
        Ctf {
            sim,
            red_flag,
            blue_flag,
            drone,
            player,
        }
    }

    #[test]
    fn touching_enemy_flag_picks_it_up() {
        let mut c = ctf();
        c.sim.tick(1.0 / 60.0);
        assert_eq!(c.sim.world.drone(c.drone).unwrap().flag, Some(c.blue_flag));
        assert!(!c.sim.world.flag(c.blue_flag).unwrap().at_base);
        assert_eq!(
            c.sim.world.get(c.blue_flag).unwrap().transform.parent,
            Some(c.drone)
        );
        // Own flag is never picked up
        assert!(c.sim.world.flag(c.red_flag).unwrap().at_base);
    }

    #[test]
    fn carrying_home_scores() {
        let mut c = ctf();
        c.sim.tick(1.0 / 60.0);
        c.sim.world.get_mut(c.drone).unwrap().transform.pos = Vec3::new(-50.0, 0.0, 0.0);
        c.sim.tick(1.0 / 60.0);

        let flag = c.sim.world.flag(c.blue_flag).unwrap();
        assert!(flag.at_base);
        assert_eq!(c.sim.world.absolute_pos(c.blue_flag), Some(Vec3::new(50.0, 0.0, 0.0)));
        assert_eq!(c.sim.world.drone(c.drone).unwrap().flag, None);
        assert_eq!(c.sim.world.players.get(c.player).unwrap().flags_captured, 1);
        assert!(c.sim.take_events().iter().any(|e| matches!(
            e,
            CombatEvent::FlagCaptured { flag, .. } if *flag == c.blue_flag
        )));
    }

    #[test]
    fn dropped_flag_returns_after_restore_time() {
        let mut c = ctf();
        c.sim.tick(1.0 / 60.0);
        c.sim.world.get_mut(c.drone).unwrap().transform.pos = Vec3::new(0.0, 0.0, 20.0);
        c.sim.tick(1.0 / 60.0);
        c.sim.drop_flag(c.blue_flag);
        c.sim.world.remove(c.drone);

        assert_eq!(c.sim.world.absolute_pos(c.blue_flag), Some(Vec3::new(0.0, 0.0, 20.0)));
        for _ in 0..((FLAG_RESTORE_TIME + 1.0) * 10.0) as usize {
            c.sim.tick(0.1);
        }
        assert!(c.sim.world.flag(c.blue_flag).unwrap().at_base);
        assert_eq!(c.sim.world.absolute_pos(c.blue_flag), Some(Vec3::new(50.0, 0.0, 0.0)));
    }
}
