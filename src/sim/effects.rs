//! Fire-and-forget presentation effects: particles, audio and tracers

use std::sync::Arc;

use glam::{Quat, Vec3};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use super::simulation::Simulation;
use super::team::Team;
use super::world::{EntityRef, PlayerRef};

/// Particle bursts the combat core can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParticleKind {
    ImpactLarge,
    ImpactSmall,
    ImpactTiny,
    Fizzle,
    Grenade,
    Explosion,
    DroneExplosion,
    SpawnForceField,
    SpawnBatteryForceField,
}

impl ParticleKind {
    /// Sound that accompanies the burst, if any
    pub fn audio(self) -> Option<AudioEvent> {
        match self {
            ParticleKind::Grenade => Some(AudioEvent::GrenadeExplosion),
            ParticleKind::Explosion => Some(AudioEvent::Explosion),
            ParticleKind::ImpactLarge | ParticleKind::ImpactSmall => Some(AudioEvent::BoltImpact),
            ParticleKind::SpawnForceField | ParticleKind::SpawnBatteryForceField => {
                Some(AudioEvent::ForceFieldSpawn)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AudioEvent {
    BoltImpact,
    BoltReflect,
    GrenadeArm,
    GrenadeBeep,
    GrenadeAttach,
    GrenadeExplosion,
    Explosion,
    GlassShatter,
    BatteryCapture,
    StationEnter,
    StationExit,
    FlagCapture,
    FlagRestore,
    ForceFieldSpawn,
}

/// Where a sound plays
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioAnchor {
    Position(Vec3),
    Entity(EntityRef),
}

/// A spawned particle burst, in absolute space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleEffect {
    pub kind: ParticleKind,
    pub owner: Option<PlayerRef>,
    pub parent: Option<EntityRef>,
    pub team: Team,
    pub pos: Vec3,
    pub rot: Quat,
}

impl ParticleEffect {
    pub fn new(kind: ParticleKind, pos: Vec3, rot: Quat) -> Self {
        Self {
            kind,
            owner: None,
            parent: None,
            team: Team::NONE,
            pos,
            rot,
        }
    }
}

/// Presentation layer as seen by the combat core. Never fails observably.
pub trait EffectsService: Send {
    fn spawn_particle_effect(&mut self, effect: &ParticleEffect);

    fn play_audio(&mut self, event: AudioEvent, anchor: AudioAnchor);

    fn tracer(&mut self, pos: Vec3);
}

/// Headless effects: everything goes to the trace log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEffects;

impl EffectsService for TracingEffects {
    fn spawn_particle_effect(&mut self, effect: &ParticleEffect) {
        trace!(kind = ?effect.kind, pos = ?effect.pos, team = ?effect.team, "particle");
    }

    fn play_audio(&mut self, event: AudioEvent, anchor: AudioAnchor) {
        trace!(?event, ?anchor, "audio");
    }

    fn tracer(&mut self, pos: Vec3) {
        trace!(?pos, "tracer");
    }
}

#[derive(Debug, Default)]
struct EffectRecord {
    particles: Vec<ParticleEffect>,
    audio: Vec<AudioEvent>,
    tracers: usize,
}

/// Shared recorder of requested effects. Clones observe the same log.
#[derive(Debug, Clone, Default)]
pub struct EffectLog(Arc<Mutex<EffectRecord>>);

impl EffectLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut EffectRecord) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn particles(&self) -> Vec<ParticleEffect> {
        self.with(|r| r.particles.clone())
    }

    pub fn particle_count(&self, kind: ParticleKind) -> usize {
        self.with(|r| r.particles.iter().filter(|p| p.kind == kind).count())
    }

    pub fn audio(&self) -> Vec<AudioEvent> {
        self.with(|r| r.audio.clone())
    }

    pub fn tracers(&self) -> usize {
        self.with(|r| r.tracers)
    }
}

impl EffectsService for EffectLog {
    fn spawn_particle_effect(&mut self, effect: &ParticleEffect) {
        self.with(|r| r.particles.push(*effect));
    }

    fn play_audio(&mut self, event: AudioEvent, _anchor: AudioAnchor) {
        self.with(|r| r.audio.push(event));
    }

    fn tracer(&mut self, _pos: Vec3) {
        self.with(|r| r.tracers += 1);
    }
}

impl Simulation {
    /// Every peer renders replicated bursts; grenade blasts also shove things around
    pub(crate) fn on_particle_effect(&mut self, effect: ParticleEffect) {
        self.effects.spawn_particle_effect(&effect);
        if let Some(audio) = effect.kind.audio() {
            self.play_audio(audio, AudioAnchor::Position(effect.pos));
        }
        if effect.kind == ParticleKind::Grenade {
            self.grenade_blast_push(effect.pos);
        }
    }
}
