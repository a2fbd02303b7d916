//! In-process client mirror fed from the host's frame broadcast

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::net::channel::{decode_frame, Authority, MessageSource, ProtocolError};
use crate::sim::effects::TracingEffects;
use crate::sim::simulation::{CombatEvent, Simulation};
use crate::sim::tuning::Ruleset;
use crate::sim::world::{EntityClass, WorldError};
use crate::util::time::tick_delta;

use super::layout::{scene, Layout};

/// What a spectator saw by the end of the session
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpectatorReport {
    pub id: usize,
    pub frames: u64,
    pub messages: u64,
    /// Messages the mirror could not decode
    pub dropped: u64,
    /// Frames lost because the spectator fell behind the broadcast
    pub lagged: u64,
    pub kills_seen: u64,
    pub entities: usize,
}

pub struct Spectator {
    id: usize,
    sim: Simulation,
    frames: broadcast::Receiver<Bytes>,
    report: SpectatorReport,
}

impl Spectator {
    /// Client-authority mirror with the same static arena as the host
    pub fn new(
        id: usize,
        ruleset: Ruleset,
        seed: u64,
        bots_per_team: usize,
        remote: bool,
        frames: broadcast::Receiver<Bytes>,
    ) -> Result<Self, WorldError> {
        let mut sim = Simulation::new(
            Authority::Client,
            ruleset,
            seed,
            Box::new(scene()),
            Box::new(TracingEffects),
        );
        Layout::build(&mut sim, bots_per_team, remote)?;
        Ok(Self {
            id,
            sim,
            frames,
            report: SpectatorReport {
                id,
                ..SpectatorReport::default()
            },
        })
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// Apply one host frame, then advance the mirror by one tick
    pub fn apply_frame(&mut self, frame: Bytes) -> Result<(), ProtocolError> {
        let frame = decode_frame(frame)?;
        for message in &frame.messages {
            self.sim.deliver(message, MessageSource::Remote);
        }
        self.sim.tick(tick_delta());
        // Mirrors never talk back
        self.sim.channel.take_outgoing();

        for event in self.sim.take_events() {
            if let CombatEvent::Killed { target, class, .. } = event {
                self.report.kills_seen += 1;
                // Entity removal is replicated with the kill itself
                if matches!(
                    class,
                    EntityClass::Drone
                        | EntityClass::Turret
                        | EntityClass::Minion
                        | EntityClass::Rectifier
                        | EntityClass::MinionSpawner
                ) {
                    self.sim.despawn(target);
                }
            }
        }

        self.report.frames += 1;
        self.report.messages += frame.messages.len() as u64;
        Ok(())
    }

    /// Follow the broadcast until the host closes it
    pub async fn run(mut self) -> SpectatorReport {
        debug!(spectator = self.id, "spectator joined");
        loop {
            match self.frames.recv().await {
                Ok(frame) => {
                    if let Err(error) = self.apply_frame(frame) {
                        warn!(spectator = self.id, %error, "bad frame");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(spectator = self.id, skipped, "spectator lagging");
                    self.report.lagged += skipped;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        self.finish()
    }

    fn finish(mut self) -> SpectatorReport {
        self.report.dropped = self.sim.channel.stats().dropped;
        self.report.entities = self.sim.world.len();
        debug!(spectator = self.id, frames = self.report.frames, "spectator left");
        self.report
    }
}
