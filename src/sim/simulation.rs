//! Simulation state and the fixed-order tick
//!
//! Gameplay operations live in `impl Simulation` blocks next to the data they
//! act on (health, bolts, grenades, structures). This module owns the shared
//! pieces: the tick context, the message loop and deferred cleanup.

use std::collections::HashMap;

use bytes::Bytes;
use glam::{Quat, Vec3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use crate::net::channel::{Authority, MessageChannel, MessageSource};
use crate::net::message::Message;

use super::effects::{
    AudioAnchor, AudioEvent, EffectsService, ParticleEffect, ParticleKind, TracingEffects,
};
use super::history::{StateFrame, StateFrameHistory};
use super::physics::{PhysicsService, StaticScene};
use super::team::Team;
use super::tuning::Ruleset;
use super::world::{ClientId, EntityClass, EntityRef, PlayerRef, World};
use crate::util::time::tick_delta;

/// Latency figures for one remote client
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeerLatency {
    /// Round-trip time (seconds)
    pub rtt: f32,
    /// Interpolation delay applied by that client (seconds)
    pub interpolation_delay: f32,
}

/// Timers shared by every entity of a kind
#[derive(Debug, Clone, Copy, Default)]
pub struct Accumulators {
    pub grenade_tracer: f32,
    pub battery_increment: f32,
}

/// Per-session mutable state threaded through every update
#[derive(Debug, Clone)]
pub struct TickContext {
    pub authority: Authority,
    /// Simulation clock (seconds)
    pub time: f64,
    pub tick: u64,
    /// Seconds per network tick
    pub tick_rate: f32,
    pub ruleset: Ruleset,
    /// Damage rolls
    pub rng: ChaCha8Rng,
    pub accumulators: Accumulators,
    pub peers: HashMap<ClientId, PeerLatency>,
}

impl TickContext {
    pub fn new(authority: Authority, ruleset: Ruleset, seed: u64) -> Self {
        Self {
            authority,
            time: 0.0,
            tick: 0,
            tick_rate: tick_delta(),
            ruleset,
            rng: ChaCha8Rng::seed_from_u64(seed),
            accumulators: Accumulators::default(),
            peers: HashMap::new(),
        }
    }
}

/// Gameplay outcomes surfaced to the session
#[derive(Debug, Clone, PartialEq)]
pub enum CombatEvent {
    Killed {
        target: EntityRef,
        class: EntityClass,
        team: Team,
        by: Option<PlayerRef>,
    },
    DamageBuffered {
        target: EntityRef,
        source: EntityRef,
        amount: i8,
    },
    BatteryCaptured {
        battery: EntityRef,
        team: Team,
    },
    FlagCaptured {
        flag: EntityRef,
        team: Team,
    },
    GrenadeExploded {
        grenade: EntityRef,
        pos: Vec3,
    },
}

/// One side of the replicated game: the host or a client mirror
pub struct Simulation {
    pub world: World,
    pub history: StateFrameHistory,
    pub channel: MessageChannel,
    pub ctx: TickContext,
    pub physics: Box<dyn PhysicsService>,
    pub effects: Box<dyn EffectsService>,
    events: Vec<CombatEvent>,
}

impl Simulation {
    pub fn new(
        authority: Authority,
        ruleset: Ruleset,
        seed: u64,
        physics: Box<dyn PhysicsService>,
        effects: Box<dyn EffectsService>,
    ) -> Self {
        Self {
            world: World::new(),
            history: StateFrameHistory::new(),
            channel: MessageChannel::new(),
            ctx: TickContext::new(authority, ruleset, seed),
            physics,
            effects,
            events: Vec::new(),
        }
    }

    /// Empty static scene with effects routed to the trace log
    pub fn headless(authority: Authority, ruleset: Ruleset, seed: u64) -> Self {
        Self::new(
            authority,
            ruleset,
            seed,
            Box::new(StaticScene::new()),
            Box::new(TracingEffects),
        )
    }

    pub fn is_host(&self) -> bool {
        self.ctx.authority.is_host()
    }

    /// Guard for host-only operations. Asserts in debug builds, ignored in release.
    pub(crate) fn host_only(&self, operation: &'static str) -> bool {
        debug_assert!(self.is_host(), "{operation} called on a client");
        self.is_host()
    }

    pub fn set_peer_latency(&mut self, client: ClientId, latency: PeerLatency) {
        self.ctx.peers.insert(client, latency);
    }

    pub fn peer_latency(&self, client: ClientId) -> PeerLatency {
        self.ctx.peers.get(&client).copied().unwrap_or_default()
    }

    /// Encode, queue for the network and loop back through the local handler
    pub fn send(&mut self, message: Message) {
        let mut writer = self.channel.msg_new(message.message_type());
        if let Err(error) = message.write(&mut writer, &self.world) {
            warn!(%error, kind = ?message.message_type(), "failed to encode message");
            return;
        }
        let bytes = self.channel.msg_finalize(writer);
        self.deliver(&bytes, MessageSource::Loopback);
    }

    /// Apply a message, logging and counting it if it cannot be decoded
    pub fn deliver(&mut self, bytes: &Bytes, source: MessageSource) {
        if let Err(error) = self.receive(bytes, source) {
            self.channel.record_drop();
            warn!(%error, ?source, tick = self.ctx.tick, "dropped message");
        }
    }

    pub(crate) fn push_event(&mut self, event: CombatEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<CombatEvent> {
        std::mem::take(&mut self.events)
    }

    /// Host spawns a replicated particle effect. `pos`/`rot` are absolute.
    pub fn spawn_particle(
        &mut self,
        kind: ParticleKind,
        pos: Vec3,
        rot: Quat,
        parent: Option<EntityRef>,
        owner: Option<PlayerRef>,
        team: Team,
    ) {
        if !self.host_only("spawn_particle") {
            return;
        }
        self.send(Message::ParticleEffect(ParticleEffect {
            kind,
            owner,
            parent,
            team,
            pos,
            rot,
        }));
    }

    pub(crate) fn play_audio(&mut self, event: AudioEvent, anchor: AudioAnchor) {
        self.effects.play_audio(event, anchor);
    }

    /// Remove an entity and its colliders right away
    pub fn despawn(&mut self, entity: EntityRef) {
        if self.world.remove(entity).is_some() {
            self.physics.remove(entity);
        }
    }

    fn flush_removals(&mut self) {
        for entity in self.world.flush_removals() {
            self.physics.remove(entity);
        }
    }

    /// Advance every system by `dt` seconds, in fixed order
    pub fn tick(&mut self, dt: f32) {
        self.update_health(dt);
        self.update_bolts(dt);
        self.update_grenades(dt);
        if self.is_host() {
            self.update_turrets(dt);
        }
        self.update_batteries(dt);
        self.update_force_fields(dt);
        self.update_stations(dt);
        if self.is_host() {
            self.update_flags_server(dt);
        } else {
            self.update_flags_client(dt);
        }
        self.update_glass(dt);

        if self.is_host() {
            self.history
                .record(StateFrame::capture(&self.world, self.ctx.time));
        }

        self.flush_removals();
        self.ctx.time += f64::from(dt);
        self.ctx.tick += 1;

        if self.ctx.tick % 600 == 0 {
            debug!(
                tick = self.ctx.tick,
                entities = self.world.len(),
                frames = self.history.len(),
                "simulation heartbeat"
            );
        }
    }
}
