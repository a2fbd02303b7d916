//! Typed messages and their wire layout

use bytes::Bytes;
use glam::{Quat, Vec3};

use crate::sim::effects::{ParticleEffect, ParticleKind};
use crate::sim::flag::FlagChange;
use crate::sim::grenade::GrenadeState;
use crate::sim::team::Team;
use crate::sim::tuning::{BATTERY_ENERGY, FLAG_RESTORE_TIME};
use crate::sim::world::{EntityRef, PlayerRef, World};

use super::stream::{wire_enum, Resolution, Stream, StreamError, StreamRead, StreamWrite};

/// Message tags, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Health,
    Battery,
    Turret,
    Grenade,
    Glass,
    ParticleEffect,
    UpgradeStation,
    Bolt,
    Flag,
}

wire_enum!(MessageType {
    MessageType::Health,
    MessageType::Battery,
    MessageType::Turret,
    MessageType::Grenade,
    MessageType::Glass,
    MessageType::ParticleEffect,
    MessageType::UpgradeStation,
    MessageType::Bolt,
    MessageType::Flag,
});

wire_enum!(ParticleKind {
    ParticleKind::ImpactLarge,
    ParticleKind::ImpactSmall,
    ParticleKind::ImpactTiny,
    ParticleKind::Fizzle,
    ParticleKind::Grenade,
    ParticleKind::Explosion,
    ParticleKind::DroneExplosion,
    ParticleKind::SpawnForceField,
    ParticleKind::SpawnBatteryForceField,
});

wire_enum!(GrenadeState {
    GrenadeState::Inactive,
    GrenadeState::Active,
    GrenadeState::Attached,
    GrenadeState::Exploded,
});

wire_enum!(FlagChange {
    FlagChange::PickedUp,
    FlagChange::Dropped,
    FlagChange::Scored,
    FlagChange::Restored,
});

/// Signed hp/shield delta for one entity
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HealthMsg {
    pub target: Option<EntityRef>,
    pub source: Option<EntityRef>,
    pub hp: i8,
    pub shield: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryChange {
    Energy(i16),
    Team {
        team: Team,
        caused_by: Option<EntityRef>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryMsg {
    pub battery: Option<EntityRef>,
    pub change: BatteryChange,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurretMsg {
    pub turret: Option<EntityRef>,
    pub target: Option<EntityRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrenadeMsg {
    pub grenade: Option<EntityRef>,
    pub state: GrenadeState,
    /// Only carried for [`GrenadeState::Attached`]
    pub parent: Option<EntityRef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlassMsg {
    pub glass: Option<EntityRef>,
    pub point: Vec3,
    pub dir: Vec3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationMsg {
    pub station: Option<EntityRef>,
    pub drone: Option<EntityRef>,
}

/// New owner of a bolt deflected by a shield
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retarget {
    pub team: Team,
    pub player: Option<PlayerRef>,
    pub owner: Option<EntityRef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoltMsg {
    pub bolt: Option<EntityRef>,
    pub retarget: Option<Retarget>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlagMsg {
    pub flag: Option<EntityRef>,
    pub change: FlagChange,
    /// Carrier drone for a pickup or a score
    pub param: Option<EntityRef>,
    /// Only carried for [`FlagChange::Dropped`]
    pub timer: f32,
}

/// Every message the channel carries
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Health(HealthMsg),
    Battery(BatteryMsg),
    Turret(TurretMsg),
    Grenade(GrenadeMsg),
    Glass(GlassMsg),
    ParticleEffect(ParticleEffect),
    UpgradeStation(StationMsg),
    Bolt(BoltMsg),
    Flag(FlagMsg),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Health(_) => MessageType::Health,
            Message::Battery(_) => MessageType::Battery,
            Message::Turret(_) => MessageType::Turret,
            Message::Grenade(_) => MessageType::Grenade,
            Message::Glass(_) => MessageType::Glass,
            Message::ParticleEffect(_) => MessageType::ParticleEffect,
            Message::UpgradeStation(_) => MessageType::UpgradeStation,
            Message::Bolt(_) => MessageType::Bolt,
            Message::Flag(_) => MessageType::Flag,
        }
    }

    /// Write the payload after the tag already written by `msg_new`
    pub fn write(&self, w: &mut StreamWrite, world: &World) -> Result<(), StreamError> {
        let mut message = self.clone();
        message.serialize(w, world)
    }

    /// Read tag and payload
    pub fn read(r: &mut StreamRead, world: &World) -> Result<Message, StreamError> {
        let mut ty = MessageType::Health;
        r.serialize_enum(&mut ty)?;
        let mut message = Message::empty(ty);
        message.serialize(r, world)?;
        Ok(message)
    }

    /// Decode a single finalized message
    pub fn decode(bytes: &Bytes, world: &World) -> Result<Message, StreamError> {
        Message::read(&mut StreamRead::new(bytes.clone()), world)
    }

    fn empty(ty: MessageType) -> Message {
        match ty {
            MessageType::Health => Message::Health(HealthMsg::default()),
            MessageType::Battery => Message::Battery(BatteryMsg {
                battery: None,
                change: BatteryChange::Energy(0),
            }),
            MessageType::Turret => Message::Turret(TurretMsg::default()),
            MessageType::Grenade => Message::Grenade(GrenadeMsg {
                grenade: None,
                state: GrenadeState::Inactive,
                parent: None,
            }),
            MessageType::Glass => Message::Glass(GlassMsg::default()),
            MessageType::ParticleEffect => Message::ParticleEffect(ParticleEffect::new(
                ParticleKind::ImpactSmall,
                Vec3::ZERO,
                Quat::IDENTITY,
            )),
            MessageType::UpgradeStation => Message::UpgradeStation(StationMsg::default()),
            MessageType::Bolt => Message::Bolt(BoltMsg::default()),
            MessageType::Flag => Message::Flag(FlagMsg {
                flag: None,
                change: FlagChange::PickedUp,
                param: None,
                timer: 0.0,
            }),
        }
    }

    fn serialize<S: Stream>(&mut self, s: &mut S, world: &World) -> Result<(), StreamError> {
        match self {
            Message::Health(m) => serialize_health(s, m, world),
            Message::Battery(m) => serialize_battery(s, m),
            Message::Turret(m) => {
                s.serialize_ref(&mut m.turret)?;
                s.serialize_ref(&mut m.target)
            }
            Message::Grenade(m) => {
                s.serialize_ref(&mut m.grenade)?;
                s.serialize_enum(&mut m.state)?;
                if m.state == GrenadeState::Attached {
                    s.serialize_ref(&mut m.parent)?;
                } else {
                    m.parent = None;
                }
                Ok(())
            }
            Message::Glass(m) => {
                s.serialize_ref(&mut m.glass)?;
                s.serialize_position(&mut m.point, Resolution::Low)?;
                s.serialize_position(&mut m.dir, Resolution::Medium)
            }
            Message::ParticleEffect(e) => serialize_particle_effect(s, e, world),
            Message::UpgradeStation(m) => {
                s.serialize_ref(&mut m.station)?;
                s.serialize_ref(&mut m.drone)
            }
            Message::Bolt(m) => serialize_bolt(s, m),
            Message::Flag(m) => {
                s.serialize_ref(&mut m.flag)?;
                s.serialize_enum(&mut m.change)?;
                s.serialize_ref(&mut m.param)?;
                if m.change == FlagChange::Dropped {
                    s.serialize_f32_range(&mut m.timer, 0.0, FLAG_RESTORE_TIME, 16)?;
                } else {
                    m.timer = 0.0;
                }
                Ok(())
            }
        }
    }
}

/// Deltas are bounded by the target's own maxima; a zero maximum writes nothing
fn serialize_health<S: Stream>(s: &mut S, m: &mut HealthMsg, world: &World) -> Result<(), StreamError> {
    s.serialize_ref(&mut m.target)?;
    s.serialize_ref(&mut m.source)?;
    let health = m
        .target
        .and_then(|t| world.health(t))
        .ok_or(StreamError::UnresolvedRef)?;
    let (hp_max, shield_max) = (health.hp_max, health.shield_max);

    if hp_max > 0 {
        s.serialize_i8(&mut m.hp, -hp_max, hp_max)?;
    } else {
        m.hp = 0;
    }
    if shield_max > 0 {
        s.serialize_i8(&mut m.shield, -shield_max, shield_max)?;
    } else {
        m.shield = 0;
    }
    Ok(())
}

fn serialize_battery<S: Stream>(s: &mut S, m: &mut BatteryMsg) -> Result<(), StreamError> {
    s.serialize_ref(&mut m.battery)?;
    let mut is_team = matches!(m.change, BatteryChange::Team { .. });
    s.serialize_bool(&mut is_team)?;
    if S::IS_READING {
        m.change = if is_team {
            BatteryChange::Team {
                team: Team::NONE,
                caused_by: None,
            }
        } else {
            BatteryChange::Energy(0)
        };
    }
    match &mut m.change {
        BatteryChange::Energy(energy) => s.serialize_i16(energy, 0, BATTERY_ENERGY),
        BatteryChange::Team { team, caused_by } => {
            s.serialize_team(team)?;
            s.serialize_ref(caused_by)
        }
    }
}

fn serialize_bolt<S: Stream>(s: &mut S, m: &mut BoltMsg) -> Result<(), StreamError> {
    s.serialize_ref(&mut m.bolt)?;
    let mut retarget = m.retarget.is_some();
    s.serialize_bool(&mut retarget)?;
    if !retarget {
        m.retarget = None;
        return Ok(());
    }
    let mut value = m.retarget.unwrap_or(Retarget {
        team: Team::NONE,
        player: None,
        owner: None,
    });
    s.serialize_team(&mut value.team)?;
    s.serialize_ref(&mut value.player)?;
    s.serialize_ref(&mut value.owner)?;
    m.retarget = Some(value);
    Ok(())
}

/// Position and rotation travel in the parent's space when a parent is given
fn serialize_particle_effect<S: Stream>(
    s: &mut S,
    e: &mut ParticleEffect,
    world: &World,
) -> Result<(), StreamError> {
    s.serialize_enum(&mut e.kind)?;
    s.serialize_ref(&mut e.owner)?;
    s.serialize_ref(&mut e.parent)?;
    s.serialize_team(&mut e.team)?;

    let parent = e.parent.and_then(|p| world.absolute(p));
    let (mut pos, mut rot) = match (S::IS_READING, parent) {
        (false, Some((parent_pos, parent_rot))) => {
            let inverse = parent_rot.inverse();
            (inverse * (e.pos - parent_pos), inverse * e.rot)
        }
        _ => (e.pos, e.rot),
    };
    s.serialize_position(&mut pos, Resolution::Low)?;
    s.serialize_quat(&mut rot, Resolution::Low)?;

    if S::IS_READING {
        (e.pos, e.rot) = match parent {
            Some((parent_pos, parent_rot)) => (parent_pos + parent_rot * pos, parent_rot * rot),
            None => (pos, rot),
        };
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::net::channel::MessageChannel;
    use crate::sim::health::Health;
    use crate::sim::world::{Entity, EntityKind, Player, Transform};

    fn prop(world: &mut World, pos: Vec3) -> EntityRef {
        world
            .spawn(Entity::new(EntityKind::Prop, Team::NONE, Transform::at(pos)))
            .unwrap()
    }

    fn round_trip(message: &Message, world: &World) -> Message {
        Message::decode(&encode(message, world), world).unwrap()
    }

    fn encode(message: &Message, world: &World) -> Bytes {
        let mut channel = MessageChannel::new();
        let mut w = channel.msg_new(message.message_type());
        message.write(&mut w, world).unwrap();
        channel.msg_finalize(w)
    }

    #[test]
    fn health_delta_at_lower_bound() {
        let mut world = World::new();
        let target = world
            .spawn(
                Entity::new(EntityKind::Rectifier, Team::new(0), Transform::at(Vec3::ZERO))
                    .with_health(Health::new(6, 2)),
            )
            .unwrap();
        let message = Message::Health(HealthMsg {
            target: Some(target),
            source: None,
            hp: -6,
            shield: -2,
        });
        assert_eq!(Message::decode(&encode(&message, &world), &world).unwrap(), message);
    }

    #[test]
    fn zero_shield_max_writes_no_shield_field() {
        let mut world = World::new();
        let target = world
            .spawn(
                Entity::new(EntityKind::Rectifier, Team::new(0), Transform::at(Vec3::ZERO))
                    .with_health(Health::new(6, 0)),
            )
            .unwrap();
        let message = Message::Health(HealthMsg {
            target: Some(target),
            source: None,
            hp: 3,
            shield: 0,
        });
        assert_eq!(Message::decode(&encode(&message, &world), &world).unwrap(), message);
    }

    #[test]
    fn health_for_missing_target_is_unresolved() {
        let mut world = World::new();
        let target = world
            .spawn(
                Entity::new(EntityKind::Rectifier, Team::new(0), Transform::at(Vec3::ZERO))
                    .with_health(Health::new(6, 0)),
            )
            .unwrap();
        let bytes = encode(
            &Message::Health(HealthMsg {
                target: Some(target),
                source: None,
                hp: -1,
                shield: 0,
            }),
            &world,
        );
        world.remove(target);
        assert_eq!(
            Message::decode(&bytes, &world),
            Err(StreamError::UnresolvedRef)
        );
    }

    #[test]
    fn dropped_flag_carries_timer_only_when_dropped() {
        let world = World::new();
        let dropped = Message::Flag(FlagMsg {
            flag: None,
            change: FlagChange::Dropped,
            param: None,
            timer: FLAG_RESTORE_TIME,
        });
        let scored = Message::Flag(FlagMsg {
            flag: None,
            change: FlagChange::Scored,
            param: None,
            timer: 0.0,
        });
        assert_eq!(Message::decode(&encode(&dropped, &world), &world).unwrap(), dropped);
        assert_eq!(Message::decode(&encode(&scored, &world), &world).unwrap(), scored);
        assert!(encode(&dropped, &world).len() > encode(&scored, &world).len());
    }

    #[test]
    fn particle_effect_is_relative_to_parent() {
        let mut world = World::new();
        let parent = world
            .spawn(Entity::new(
                EntityKind::Prop,
                Team::NONE,
                Transform::at(Vec3::new(100.0, 0.0, 0.0)),
            ))
            .unwrap();
        let effect = ParticleEffect {
            kind: ParticleKind::Explosion,
            owner: None,
            parent: Some(parent),
            team: Team::new(1),
            pos: Vec3::new(101.0, 2.0, 0.0),
            rot: Quat::IDENTITY,
        };
        let Message::ParticleEffect(back) =
            Message::decode(&encode(&Message::ParticleEffect(effect), &world), &world).unwrap()
        else {
            panic!("wrong message type");
        };
        assert_eq!(back.kind, ParticleKind::Explosion);
        assert_eq!(back.team, Team::new(1));
        assert!((back.pos - effect.pos).length() < 0.05);
    }

    #[test]
    fn battery_energy_and_capture() {
        let mut world = World::new();
        let battery = prop(&mut world, Vec3::ZERO);
        let drone = prop(&mut world, Vec3::ONE);

        let full = Message::Battery(BatteryMsg {
            battery: Some(battery),
            change: BatteryChange::Energy(BATTERY_ENERGY),
        });
        assert_eq!(round_trip(&full, &world), full);

        let captured = Message::Battery(BatteryMsg {
            battery: Some(battery),
            change: BatteryChange::Team {
                team: Team::new(3),
                caused_by: Some(drone),
            },
        });
        assert_eq!(round_trip(&captured, &world), captured);

        let neutral = Message::Battery(BatteryMsg {
            battery: Some(battery),
            change: BatteryChange::Team {
                team: Team::NONE,
                caused_by: None,
            },
        });
        assert_eq!(round_trip(&neutral, &world), neutral);
    }

    #[test]
    fn turret_target_and_station_request() {
        let mut world = World::new();
        let a = prop(&mut world, Vec3::ZERO);
        let b = prop(&mut world, Vec3::ONE);

        let aim = Message::Turret(TurretMsg {
            turret: Some(a),
            target: Some(b),
        });
        assert_eq!(round_trip(&aim, &world), aim);
        let idle = Message::Turret(TurretMsg {
            turret: Some(a),
            target: None,
        });
        assert_eq!(round_trip(&idle, &world), idle);

        let leave = Message::UpgradeStation(StationMsg {
            station: Some(b),
            drone: None,
        });
        assert_eq!(round_trip(&leave, &world), leave);
        let enter = Message::UpgradeStation(StationMsg {
            station: Some(b),
            drone: Some(a),
        });
        assert_eq!(round_trip(&enter, &world), enter);
    }

    #[test]
    fn attached_grenade_names_a_parent_of_the_right_generation() {
        let mut world = World::new();
        let grenade = prop(&mut world, Vec3::ZERO);
        let stale = prop(&mut world, Vec3::ONE);
        world.remove(stale);
        // Same slot, next generation
        let parent = prop(&mut world, Vec3::ONE);
        assert_eq!(parent.index(), stale.index());
        assert_ne!(parent, stale);

        let attached = Message::Grenade(GrenadeMsg {
            grenade: Some(grenade),
            state: GrenadeState::Attached,
            parent: Some(parent),
        });
        let Message::Grenade(back) = round_trip(&attached, &world) else {
            panic!("wrong message type");
        };
        assert_eq!(back.parent, Some(parent));
        assert_eq!(back.state, GrenadeState::Attached);
        assert!(world.get(back.parent.unwrap()).is_some());
    }

    #[test]
    fn only_attached_grenades_carry_a_parent() {
        let mut world = World::new();
        let grenade = prop(&mut world, Vec3::ZERO);
        let parent = prop(&mut world, Vec3::ONE);

        let active = Message::Grenade(GrenadeMsg {
            grenade: Some(grenade),
            state: GrenadeState::Active,
            parent: Some(parent),
        });
        let Message::Grenade(back) = round_trip(&active, &world) else {
            panic!("wrong message type");
        };
        assert_eq!(back.state, GrenadeState::Active);
        assert_eq!(back.parent, None);

        let attached = Message::Grenade(GrenadeMsg {
            state: GrenadeState::Attached,
            ..back
        });
        assert!(encode(&attached, &world).len() >= encode(&active, &world).len());
    }

    #[test]
    fn glass_point_and_direction_survive_quantization() {
        let mut world = World::new();
        let glass = prop(&mut world, Vec3::ZERO);
        let message = Message::Glass(GlassMsg {
            glass: Some(glass),
            point: Vec3::new(12.3, -4.5, 60.2),
            dir: Vec3::new(0.6, 0.0, -0.8),
        });
        let Message::Glass(back) = round_trip(&message, &world) else {
            panic!("wrong message type");
        };
        assert_eq!(back.glass, Some(glass));
        assert!((back.point - Vec3::new(12.3, -4.5, 60.2)).length() < 0.1);
        assert!((back.dir - Vec3::new(0.6, 0.0, -0.8)).length() < 0.05);
    }

    #[test]
    fn bolt_retarget_hands_over_team_player_and_owner() {
        let mut world = World::new();
        let bolt = prop(&mut world, Vec3::ZERO);
        let shield = prop(&mut world, Vec3::ONE);
        let player = world.add_player(Player::bot("deflector", Team::new(1))).unwrap();

        let plain = Message::Bolt(BoltMsg {
            bolt: Some(bolt),
            retarget: None,
        });
        assert_eq!(round_trip(&plain, &world), plain);

        let retargeted = Message::Bolt(BoltMsg {
            bolt: Some(bolt),
            retarget: Some(Retarget {
                team: Team::new(1),
                player: Some(player),
                owner: Some(shield),
            }),
        });
        assert_eq!(round_trip(&retargeted, &world), retargeted);
        assert!(encode(&retargeted, &world).len() > encode(&plain, &world).len());
    }
}
