//! Routes decoded messages to their handlers

use bytes::Bytes;
use tracing::trace;

use crate::sim::simulation::Simulation;

use super::channel::MessageSource;
use super::message::{Message, MessageType};
use super::stream::{StreamError, StreamRead};

/// Requests a client may send to the host. Everything else is host-authored.
const CLIENT_REQUESTS: &[MessageType] = &[MessageType::UpgradeStation];

impl Simulation {
    /// Decode one message and run its handler. Handlers decide for themselves
    /// whether host-side effects apply, via [`Authority::applies`].
    ///
    /// [`Authority::applies`]: super::channel::Authority::applies
    pub fn receive(&mut self, bytes: &Bytes, source: MessageSource) -> Result<(), StreamError> {
        let message = Message::read(&mut StreamRead::new(bytes.clone()), &self.world)?;
        let kind = message.message_type();
        if self.is_host() && source == MessageSource::Remote && !CLIENT_REQUESTS.contains(&kind) {
            return Err(StreamError::NotAccepted(kind));
        }
        self.channel.record_received();
        trace!(?kind, ?source, "message");

        match message {
            Message::Health(m) => self.on_health_msg(m),
            Message::Battery(m) => self.on_battery_msg(m),
            Message::Turret(m) => self.on_turret_msg(m, source),
            Message::Grenade(m) => self.on_grenade_msg(m, source),
            Message::Glass(m) => self.on_glass_msg(m, source),
            Message::ParticleEffect(e) => self.on_particle_effect(e),
            Message::UpgradeStation(m) => self.on_station_msg(m, source),
            Message::Bolt(m) => self.on_bolt_msg(m),
            Message::Flag(m) => self.on_flag_msg(m, source),
        }
        Ok(())
    }
}
