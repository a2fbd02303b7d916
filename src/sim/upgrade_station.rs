//! Upgrade stations: a drone parks inside and is sheltered from damage

use glam::Vec3;

use crate::net::channel::MessageSource;
use crate::net::message::{Message, StationMsg};

use super::effects::{AudioAnchor, AudioEvent};
use super::simulation::Simulation;
use super::team::{Team, TeamMask};
use super::tuning::{UPGRADE_STATION_ANIM_TIME, UPGRADE_STATION_RADIUS};
use super::world::{Entity, EntityClass, EntityKind, EntityRef, Transform, WorldError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StationMode {
    #[default]
    Deactivating,
    Activating,
}

#[derive(Debug, Clone, Default)]
pub struct UpgradeStation {
    pub drone: Option<EntityRef>,
    pub mode: StationMode,
    /// Flip animation; the drone is released when deactivation finishes
    pub timer: f32,
}

impl Simulation {
    pub fn spawn_upgrade_station(&mut self, pos: Vec3, team: Team) -> Result<EntityRef, WorldError> {
        self.world.spawn(Entity::new(
            EntityKind::UpgradeStation(UpgradeStation::default()),
            team,
            Transform::at(pos),
        ))
    }

    /// Ask to put `drone` into the station, or with `None` to let it out.
    /// Clients apply their own request immediately; the host confirms it for everyone.
    pub fn request_station(&mut self, station: EntityRef, drone: Option<EntityRef>) {
        if drone.is_none()
            && self
                .world
                .station(station)
                .map_or(true, |s| s.drone.is_none())
        {
            return;
        }
        self.send(Message::UpgradeStation(StationMsg {
            station: Some(station),
            drone,
        }));
    }

    /// Empty station of the drone's team (or neutral) within reach of it
    pub fn station_at(&self, drone: EntityRef) -> Option<EntityRef> {
        let pos = self.world.absolute_pos(drone)?;
        let team = self.world.entity_team(drone);
        self.world.iter().find_map(|(r, e)| match &e.kind {
            EntityKind::UpgradeStation(s)
                if s.drone.is_none()
                    && (e.team.is_none() || e.team == team)
                    && self
                        .world
                        .absolute_pos(r)
                        .is_some_and(|p| p.distance(pos) < UPGRADE_STATION_RADIUS) =>
            {
                Some(r)
            }
            _ => None,
        })
    }

    /// Closest empty station usable by `team`, with its distance
    pub fn closest_available_station(&self, team: Team, pos: Vec3) -> Option<(EntityRef, f32)> {
        let mask = TeamMask::only(team).with(Team::NONE);
        self.world
            .sort_by_distance(EntityClass::UpgradeStation, mask, pos, true)
            .into_iter()
            .filter(|r| self.world.station(*r).is_some_and(|s| s.drone.is_none()))
            .find_map(|r| Some((r, self.world.absolute_pos(r)?.distance(pos))))
    }

    pub(crate) fn on_station_msg(&mut self, m: StationMsg, source: MessageSource) {
        let Some(station) = m.station else {
            return;
        };
        let Some(current) = self.world.station(station).map(|s| s.drone) else {
            return;
        };
        let current = current.filter(|d| self.world.contains(*d));
        let drone = m.drone.filter(|d| self.world.drone(*d).is_some());

        let entering = current.is_none() && drone.is_some_and(|d| self.world.drone(d).is_some_and(|d| d.attached));
        let leaving = current.is_some() && m.drone.is_none();
        if !entering && !leaving {
            return;
        }

        if self.is_host() && source == MessageSource::Remote {
            // Echo to everyone, ourselves included; the loopback copy applies it
            self.send(Message::UpgradeStation(StationMsg {
                station: Some(station),
                drone,
            }));
            return;
        }

        match drone {
            Some(d) => {
                if current == Some(d) {
                    return;
                }
                let flag = self.world.drone_mut(d).and_then(|drone| drone.flag.take());
                if let Some(flag) = flag.filter(|_| self.is_host()) {
                    self.drop_flag(flag);
                }
                if let Some(s) = self.world.station_mut(station) {
                    s.drone = Some(d);
                    s.timer = UPGRADE_STATION_ANIM_TIME - s.timer;
                    s.mode = StationMode::Activating;
                }
                self.play_audio(AudioEvent::StationEnter, AudioAnchor::Entity(station));
            }
            None => {
                let exiting = self.world.station_mut(station).is_some_and(|s| {
                    if s.mode != StationMode::Activating {
                        return false;
                    }
                    s.timer = UPGRADE_STATION_ANIM_TIME - s.timer;
                    s.mode = StationMode::Deactivating;
                    true
                });
                if exiting {
                    self.play_audio(AudioEvent::StationExit, AudioAnchor::Entity(station));
                }
            }
        }
    }

    pub(crate) fn update_stations(&mut self, dt: f32) {
        for station in self.world.refs_of(EntityClass::UpgradeStation) {
            let Some(s) = self.world.station(station) else {
                continue;
            };
            let drone_gone = s.drone.map_or(true, |d| !self.world.contains(d));
            let mut exited = false;
            if let Some(s) = self.world.station_mut(station) {
                if s.mode == StationMode::Activating && drone_gone {
                    s.mode = StationMode::Deactivating;
                    s.timer = UPGRADE_STATION_ANIM_TIME;
                    exited = true;
                }
                if s.timer > 0.0 {
                    s.timer = (s.timer - dt).max(0.0);
                    if s.timer == 0.0 && s.mode == StationMode::Deactivating {
                        s.drone = None;
                    }
                }
            }
            if exited {
                self.play_audio(AudioEvent::StationExit, AudioAnchor::Entity(station));
            }
        }
    }
}
