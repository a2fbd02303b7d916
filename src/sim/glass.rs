//! Frangible glass panes, shattered by the host and predicted on clients

use glam::Vec3;

use crate::net::channel::MessageSource;
use crate::net::message::{GlassMsg, Message};

use super::effects::{AudioAnchor, AudioEvent};
use super::physics::CollisionMask;
use super::simulation::Simulation;
use super::team::Team;
use super::tuning::GLASS_CONFIRM_TIME;
use super::world::{Entity, EntityClass, EntityKind, EntityRef, Transform, WorldError};

#[derive(Debug, Clone, Default)]
pub struct Glass {
    /// Counts down after a client-side shatter; collision returns at zero unless the host confirms
    pub client_side_shatter_timer: f32,
    /// Bounding radius of the pane
    pub radius: f32,
}

impl Glass {
    pub fn new(radius: f32) -> Self {
        Self {
            client_side_shatter_timer: 0.0,
            radius,
        }
    }

    pub fn predicted(&self) -> bool {
        self.client_side_shatter_timer > 0.0
    }
}

impl Simulation {
    pub fn spawn_glass(&mut self, pos: Vec3, radius: f32) -> Result<EntityRef, WorldError> {
        let glass = self.world.spawn(Entity::new(
            EntityKind::Glass(Glass::new(radius)),
            Team::NONE,
            Transform::at(pos),
        ))?;
        self.physics
            .insert_sphere(glass, pos, radius, CollisionMask::GLASS);
        Ok(glass)
    }

    /// Shatter every pane crossed by the segment
    pub fn shatter_all(&mut self, start: Vec3, end: Vec3) {
        for hit in self.physics.raycast_all(start, end, CollisionMask::GLASS) {
            if let Some(glass) = hit.entity.filter(|g| self.world.glass(*g).is_some()) {
                self.shatter(glass, hit.point, end - start);
            }
        }
    }

    /// The host shatters for everyone; a client shatters right away and waits for confirmation
    pub fn shatter(&mut self, glass: EntityRef, point: Vec3, dir: Vec3) {
        if self.is_host() {
            if !self.world.is_pending_removal(glass) {
                self.send(Message::Glass(GlassMsg {
                    glass: Some(glass),
                    point,
                    dir,
                }));
            }
        } else {
            self.apply_shatter(glass, point);
        }
    }

    fn apply_shatter(&mut self, glass: EntityRef, point: Vec3) {
        let Some(pane) = self.world.glass(glass) else {
            return;
        };
        if pane.predicted() || self.world.is_pending_removal(glass) {
            return;
        }
        self.play_audio(AudioEvent::GlassShatter, AudioAnchor::Position(point));
        self.physics.set_enabled(glass, false);
        if self.is_host() {
            self.world.remove_deferred(glass);
        } else if let Some(pane) = self.world.glass_mut(glass) {
            pane.client_side_shatter_timer = GLASS_CONFIRM_TIME;
        }
    }

    pub(crate) fn on_glass_msg(&mut self, m: GlassMsg, source: MessageSource) {
        if !self.ctx.authority.applies(source) {
            return;
        }
        let Some(glass) = m.glass else {
            return;
        };
        let predicted = self.world.glass(glass).is_some_and(Glass::predicted);
        if !self.is_host() && predicted {
            // Host confirmed what we already showed
            self.despawn(glass);
            return;
        }
        self.apply_shatter(glass, m.point);
    }

    pub(crate) fn update_glass(&mut self, dt: f32) {
        if self.is_host() {
            return;
        }
        for glass in self.world.refs_of(EntityClass::Glass) {
            let Some(pane) = self.world.glass_mut(glass) else {
                continue;
            };
            if pane.client_side_shatter_timer > 0.0 {
                pane.client_side_shatter_timer = (pane.client_side_shatter_timer - dt).max(0.0);
                if pane.client_side_shatter_timer == 0.0 {
                    self.physics.set_enabled(glass, true);
                }
            }
        }
    }
}
