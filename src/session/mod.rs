//! Headless host session and authoritative tick loop
//!
//! The host owns the only authoritative [`Simulation`]. Remote clients push
//! encoded frames in through an mpsc queue; everything the host finalizes in
//! a tick is packed into one frame and broadcast to spectators.

pub mod bots;
pub mod layout;
pub mod spectator;

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::net::channel::{decode_frame, encode_frame, Authority, ChannelStats, MessageSource};
use crate::sim::effects::TracingEffects;
use crate::sim::simulation::{CombatEvent, PeerLatency, Simulation};
use crate::sim::team::{Team, TeamMask};
use crate::sim::tuning::Ruleset;
use crate::sim::world::{ClientId, EntityClass, WorldError};
use crate::util::time::{tick_delta, tick_duration, Timer};

pub use bots::BotDriver;
pub use layout::{Layout, REMOTE_CLIENT};
pub use spectator::{Spectator, SpectatorReport};

/// Captures needed by one team to win
pub const FLAGS_TO_WIN: u32 = 3;

/// Frame received from a remote client
#[derive(Debug, Clone)]
pub struct RemoteInput {
    pub client: ClientId,
    pub frame: Bytes,
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SessionEnd {
    TickLimit,
    Shutdown,
    Eliminated { winner: Option<usize> },
    Flags { winner: Option<usize> },
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerSummary {
    pub name: String,
    pub team: Option<usize>,
    pub human: bool,
    pub kills: u32,
    pub deaths: u32,
    pub energy: i32,
    pub flags_captured: u32,
}

/// End-of-session report, rendered as JSON by the binary
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub end: SessionEnd,
    pub ticks: u64,
    pub duration_ms: u64,
    pub players: Vec<PlayerSummary>,
    pub channel: ChannelStats,
    pub spectators: Vec<SpectatorReport>,
}

/// Control side of a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<RemoteInput>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    /// Ask the session to stop after the current tick
    pub fn stop(&self) {
        // Nobody listening means the session is already over
        let _ = self.shutdown_tx.send(true);
    }
}

/// Settings shared by the host and every spectator so their arenas line up
#[derive(Debug, Clone, Copy)]
struct ArenaSettings {
    ruleset: Ruleset,
    seed: u64,
    bots_per_team: usize,
    remote: bool,
}

pub struct HostSession {
    id: Uuid,
    sim: Simulation,
    layout: Layout,
    bots: BotDriver,
    arena: ArenaSettings,
    max_ticks: u64,
    input_rx: mpsc::Receiver<RemoteInput>,
    frame_tx: broadcast::Sender<Bytes>,
    shutdown_rx: watch::Receiver<bool>,
    spectators: usize,
}

impl HostSession {
    pub fn new(config: &Config) -> Result<(Self, SessionHandle), WorldError> {
        let id = Uuid::new_v4();
        let arena = ArenaSettings {
            ruleset: config.ruleset,
            seed: config.session_seed,
            bots_per_team: config.bots_per_team,
            remote: config.bots_per_team > 0 && config.remote_rtt > 0.0,
        };

        let mut sim = Simulation::new(
            Authority::Host,
            arena.ruleset,
            arena.seed,
            Box::new(layout::scene()),
            Box::new(TracingEffects),
        );
        let layout = Layout::build(&mut sim, arena.bots_per_team, arena.remote)?;
        if layout.remote.is_some() {
            sim.set_peer_latency(
                REMOTE_CLIENT,
                PeerLatency {
                    rtt: config.remote_rtt,
                    interpolation_delay: config.interpolation_delay,
                },
            );
        }
        let bots = BotDriver::new(&layout, &sim, arena.seed.rotate_left(17));

        let (input_tx, input_rx) = mpsc::channel(256);
        let (frame_tx, _) = broadcast::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = SessionHandle {
            id,
            input_tx,
            shutdown_tx: Arc::new(shutdown_tx),
        };
        let session = Self {
            id,
            sim,
            layout,
            bots,
            arena,
            max_ticks: config.session_ticks,
            input_rx,
            frame_tx,
            shutdown_rx,
            spectators: config.spectators,
        };
        Ok((session, handle))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// A new client mirror subscribed to this session's frames
    pub fn spectator(&self, id: usize) -> Result<Spectator, WorldError> {
        Spectator::new(
            id,
            self.arena.ruleset,
            self.arena.seed,
            self.arena.bots_per_team,
            self.arena.remote,
            self.frame_tx.subscribe(),
        )
    }

    /// Drain remote input, drive bots, advance the simulation and broadcast
    /// what it sent. Returns why the session should end, if it should.
    pub fn step(&mut self) -> Option<SessionEnd> {
        self.process_inputs();

        let dt = tick_delta();
        self.bots.drive(&mut self.sim, dt);
        self.sim.tick(dt);

        for event in self.sim.take_events() {
            match event {
                CombatEvent::FlagCaptured { flag, team } => {
                    info!(session_id = %self.id, ?flag, ?team, "flag captured");
                }
                CombatEvent::BatteryCaptured { battery, team } => {
                    debug!(session_id = %self.id, ?battery, ?team, "battery captured");
                }
                _ => {}
            }
        }

        let outgoing = self.sim.channel.take_outgoing();
        match encode_frame(self.sim.ctx.tick, &outgoing) {
            // No spectators is not an error
            Ok(frame) => {
                let _ = self.frame_tx.send(frame);
            }
            Err(error) => warn!(session_id = %self.id, %error, "frame not sent"),
        }

        if self.max_ticks > 0 && self.sim.ctx.tick >= self.max_ticks {
            return Some(SessionEnd::TickLimit);
        }
        self.winner()
    }

    fn process_inputs(&mut self) {
        while let Ok(input) = self.input_rx.try_recv() {
            match decode_frame(input.frame) {
                Ok(frame) => {
                    for message in &frame.messages {
                        self.sim.deliver(message, MessageSource::Remote);
                    }
                }
                Err(error) => {
                    warn!(session_id = %self.id, client = ?input.client, %error, "rejected remote frame");
                }
            }
        }
    }

    fn winner(&self) -> Option<SessionEnd> {
        let teams: Vec<Team> = self.layout.bases.iter().map(|b| b.team).collect();

        let mut captures = teams.iter().map(|&team| {
            let total: u32 = self
                .sim
                .world
                .players
                .iter()
                .filter(|(_, p)| p.team == team)
                .map(|(_, p)| p.flags_captured)
                .sum();
            (team, total)
        });
        if let Some((team, _)) = captures.find(|(_, total)| *total >= FLAGS_TO_WIN) {
            return Some(SessionEnd::Flags {
                winner: team.index(),
            });
        }

        if self.layout.pilots.is_empty() {
            return None;
        }
        let standing: Vec<Team> = teams
            .into_iter()
            .filter(|&team| self.sim.world.count(EntityClass::Drone, TeamMask::only(team)) > 0)
            .collect();
        match standing.as_slice() {
            [] => Some(SessionEnd::Eliminated { winner: None }),
            [team] => Some(SessionEnd::Eliminated {
                winner: team.index(),
            }),
            _ => None,
        }
    }

    /// Run the authoritative tick loop until a stop condition
    pub async fn run(mut self) -> SessionSummary {
        info!(
            session_id = %self.id,
            pilots = self.layout.pilots.len(),
            bots = self.bots.active(&self.sim),
            "session started"
        );
        let timer = Timer::new();

        let mut tick_interval = interval(tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_open = true;

        let end = loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    if let Some(end) = self.step() {
                        break end;
                    }
                }
                changed = self.shutdown_rx.changed(), if shutdown_open => {
                    match changed {
                        Ok(()) if *self.shutdown_rx.borrow() => break SessionEnd::Shutdown,
                        Ok(()) => {}
                        // Handle dropped: only the other stop conditions remain
                        Err(_) => shutdown_open = false,
                    }
                }
            }
        };

        info!(session_id = %self.id, ?end, ticks = self.sim.ctx.tick, "session ended");
        self.summary(end, timer.elapsed_ms())
    }

    /// Run the host alongside its configured spectators
    pub async fn run_with_spectators(self) -> Result<SessionSummary, WorldError> {
        let spectators = (0..self.spectators)
            .map(|id| self.spectator(id))
            .collect::<Result<Vec<_>, _>>()?;

        // The host drops its sender on return, which closes every spectator
        let (mut summary, reports) = tokio::join!(
            self.run(),
            join_all(spectators.into_iter().map(Spectator::run))
        );
        summary.spectators = reports;
        Ok(summary)
    }

    fn summary(&self, end: SessionEnd, duration_ms: u64) -> SessionSummary {
        let players = self
            .sim
            .world
            .players
            .iter()
            .map(|(_, p)| PlayerSummary {
                name: p.name.clone(),
                team: p.team.index(),
                human: p.human,
                kills: p.kills,
                deaths: p.deaths,
                energy: p.energy,
                flags_captured: p.flags_captured,
            })
            .collect();

        SessionSummary {
            id: self.id,
            end,
            ticks: self.sim.ctx.tick,
            duration_ms,
            players,
            channel: self.sim.channel.stats(),
            spectators: Vec::new(),
        }
    }
}
