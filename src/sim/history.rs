//! Recorded state frames used for retroactive hit checks

use std::collections::VecDeque;
use std::sync::Arc;

use glam::{Quat, Vec3};

use super::tuning::{MAX_DRONES, MAX_PARENT_DEPTH, STATE_FRAME_HISTORY};
use super::world::{DroneCollisionState, EntityKind, EntityRef, World};

/// Local transform of one entity at capture time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransform {
    pub pos: Vec3,
    pub rot: Quat,
    /// Transform id of the parent
    pub parent: Option<u16>,
    pub local_offset: Vec3,
    pub active: bool,
}

impl Default for FrameTransform {
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            rot: Quat::IDENTITY,
            parent: None,
            local_offset: Vec3::ZERO,
            active: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameDrone {
    pub active: bool,
    pub collision_state: DroneCollisionState,
}

/// World transform resolved from a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsoluteTransform {
    pub pos: Vec3,
    pub rot: Quat,
    pub local_offset: Vec3,
}

impl AbsoluteTransform {
    /// Aim point: position plus the rotated target offset
    pub fn target_pos(&self) -> Vec3 {
        self.pos + self.rot * self.local_offset
    }
}

/// Snapshot of every transform and drone state at one host tick
#[derive(Debug, Clone, PartialEq)]
pub struct StateFrame {
    pub timestamp: f64,
    pub transforms: Vec<FrameTransform>,
    pub drones: [FrameDrone; MAX_DRONES],
}

impl StateFrame {
    pub fn capture(world: &World, timestamp: f64) -> Self {
        let mut transforms = vec![FrameTransform::default(); world.slot_count()];
        let mut drones = [FrameDrone::default(); MAX_DRONES];

        for (entity, e) in world.iter() {
            let parent = e
                .transform
                .parent
                .filter(|p| world.contains(*p))
                .map(|p| p.index() as u16);
            transforms[entity.index() as usize] = FrameTransform {
                pos: e.transform.pos,
                rot: e.transform.rot,
                parent,
                local_offset: e.target.map(|t| t.local_offset).unwrap_or(Vec3::ZERO),
                active: true,
            };

            if let EntityKind::Drone(drone) = &e.kind {
                if let Some(slot) = drones.get_mut(drone.id as usize) {
                    debug_assert!(!slot.active, "drone id {} recorded twice", drone.id);
                    *slot = FrameDrone {
                        active: true,
                        collision_state: world.drone_collision_state(entity),
                    };
                }
            }
        }

        Self {
            timestamp,
            transforms,
            drones,
        }
    }

    /// Drone table entry for a drone entity, if it was recorded
    pub fn drone(&self, world: &World, entity: EntityRef) -> Option<FrameDrone> {
        let id = world.drone(entity)?.id as usize;
        self.drones.get(id).copied().filter(|d| d.active)
    }

    /// Absolute transform of `id` as recorded, walking the recorded parent chain
    pub fn transform_absolute(&self, id: u32) -> Option<AbsoluteTransform> {
        let transform = self.transforms.get(id as usize).filter(|t| t.active)?;
        let mut pos = transform.pos;
        let mut rot = transform.rot;
        let mut parent = transform.parent;
        for _ in 0..MAX_PARENT_DEPTH {
            let Some(p) = parent
                .and_then(|p| self.transforms.get(p as usize))
                .filter(|t| t.active)
            else {
                break;
            };
            pos = p.rot * pos + p.pos;
            rot = p.rot * rot;
            parent = p.parent;
        }
        Some(AbsoluteTransform {
            pos,
            rot,
            local_offset: transform.local_offset,
        })
    }
}

/// Fixed-capacity ring of recent frames, oldest first
#[derive(Debug, Clone)]
pub struct StateFrameHistory {
    frames: VecDeque<Arc<StateFrame>>,
}

impl Default for StateFrameHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl StateFrameHistory {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::with_capacity(STATE_FRAME_HISTORY),
        }
    }

    pub fn record(&mut self, frame: StateFrame) {
        if self.frames.len() == STATE_FRAME_HISTORY {
            self.frames.pop_front();
        }
        self.frames.push_back(Arc::new(frame));
    }

    /// Newest frame at or before `timestamp`. `None` past the retained window.
    pub fn by_timestamp(&self, timestamp: f64) -> Option<Arc<StateFrame>> {
        self.frames
            .iter()
            .rev()
            .find(|f| f.timestamp <= timestamp + 1e-6)
            .cloned()
    }

    /// Frames strictly after `timestamp`, oldest first
    pub fn after(&self, timestamp: f64) -> Vec<Arc<StateFrame>> {
        self.frames
            .iter()
            .filter(|f| f.timestamp > timestamp + 1e-6)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sim::team::Team;
    use crate::sim::world::{Entity, EntityKind, Transform};

    fn frame(timestamp: f64) -> StateFrame {
        StateFrame::capture(&World::new(), timestamp)
    }

    #[test]
    fn lookup_outside_window_returns_none() {
        let mut history = StateFrameHistory::new();
        assert!(history.by_timestamp(1.0).is_none());

        for i in 0..(STATE_FRAME_HISTORY + 10) {
            history.record(frame(i as f64 * 0.1));
        }
        assert_eq!(history.len(), STATE_FRAME_HISTORY);

        // The first ten frames were aged out
        assert!(history.by_timestamp(0.5).is_none());
        let found = history.by_timestamp(2.05).unwrap();
        assert!((found.timestamp - 2.0).abs() < 1e-9);
        let exact = history.by_timestamp(3.0).unwrap();
        assert!((exact.timestamp - 3.0).abs() < 1e-9);
    }

    #[test]
    fn transform_absolute_uses_recorded_parent() {
        let mut world = World::new();
        let parent = world
            .spawn(Entity::new(
                EntityKind::Prop,
                Team::NONE,
                Transform::at(Vec3::new(0.0, 5.0, 0.0)),
            ))
            .unwrap();
        let child = world
            .spawn(Entity::new(
                EntityKind::Prop,
                Team::NONE,
                Transform::child_of(parent, Vec3::new(1.0, 0.0, 0.0)),
            ))
            .unwrap();

        let recorded = StateFrame::capture(&world, 0.0);
        world.get_mut(parent).unwrap().transform.pos = Vec3::new(100.0, 0.0, 0.0);

        let abs = recorded.transform_absolute(child.index()).unwrap();
        assert!((abs.pos - Vec3::new(1.0, 5.0, 0.0)).length() < 1e-6);

        world.remove(child);
        let after = StateFrame::capture(&world, 0.1);
        assert!(after.transform_absolute(child.index()).is_none());
    }
}
