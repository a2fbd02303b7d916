//! Physics contract used by the combat core, plus a static-scene implementation
//!
//! The combat rules only need ray queries against collision groups, sphere
//! colliders for force fields, toggling glass panes and fire-and-forget
//! impulses. [`StaticScene`] answers those queries against planes, boxes and
//! spheres that never move on their own.

use std::ops::{BitAnd, BitOr, Not};

use glam::{Quat, Vec3};
use tracing::trace;

use super::team::Team;
use super::tuning::MAX_TEAMS;
use super::world::EntityRef;

/// Collision group bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollisionMask(u32);

impl CollisionMask {
    const FORCE_FIELD_SHIFT: u32 = 2;

    pub const NONE: CollisionMask = CollisionMask(0);
    pub const STATIC: CollisionMask = CollisionMask(1);
    pub const GLASS: CollisionMask = CollisionMask(1 << 1);
    pub const ALL_FORCE_FIELDS: CollisionMask =
        CollisionMask(((1 << MAX_TEAMS) - 1) << Self::FORCE_FIELD_SHIFT);

    /// Group of force fields owned by `team`
    pub fn force_field(team: Team) -> Self {
        match team.index() {
            Some(i) => CollisionMask(1 << (Self::FORCE_FIELD_SHIFT + i as u32)),
            None => Self::NONE,
        }
    }

    /// What stops a projectile fired by `team`: level geometry and enemy force fields
    pub fn bolt_mask(team: Team) -> Self {
        Self::STATIC | (Self::ALL_FORCE_FIELDS & !Self::force_field(team))
    }

    pub fn intersects(self, other: CollisionMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for CollisionMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        CollisionMask(self.0 | rhs.0)
    }
}

impl BitAnd for CollisionMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        CollisionMask(self.0 & rhs.0)
    }
}

impl Not for CollisionMask {
    type Output = Self;

    fn not(self) -> Self {
        CollisionMask(!self.0)
    }
}

/// Result of a ray query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    pub normal: Vec3,
    /// Entity owning the collider; `None` for anonymous level geometry
    pub entity: Option<EntityRef>,
}

/// What the combat core needs from a physics engine
pub trait PhysicsService: Send {
    /// Closest hit along `start..end` against colliders in `mask`
    fn raycast(&self, start: Vec3, end: Vec3, mask: CollisionMask) -> Option<RayHit>;

    /// Every hit along `start..end` against colliders in `mask`, closest first
    fn raycast_all(&self, start: Vec3, end: Vec3, mask: CollisionMask) -> Vec<RayHit>;

    fn insert_sphere(&mut self, entity: EntityRef, center: Vec3, radius: f32, group: CollisionMask);

    /// Drop every collider owned by `entity`
    fn remove(&mut self, entity: EntityRef);

    fn set_enabled(&mut self, entity: EntityRef, enabled: bool);

    fn apply_impulse(&mut self, entity: EntityRef, impulse: Vec3);
}

/// Entry distance of the segment `start..end` into a sphere, as a fraction of the segment.
/// Starting inside the sphere is not a hit.
pub fn ray_sphere_intersect(start: Vec3, end: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let d = end - start;
    let a = d.length_squared();
    if a <= f32::EPSILON || radius <= 0.0 {
        return None;
    }
    let m = start - center;
    let c = m.length_squared() - radius * radius;
    if c <= 0.0 {
        return None;
    }
    let b = m.dot(d);
    if b >= 0.0 {
        return None;
    }
    let discriminant = b * b - a * c;
    if discriminant < 0.0 {
        return None;
    }
    let t = (-b - discriminant.sqrt()) / a;
    (0.0..=1.0).contains(&t).then_some(t)
}

/// Rotation whose +Z axis points along `dir`
pub fn look_rotation(dir: Vec3) -> Quat {
    let dir = dir.normalize_or_zero();
    if dir == Vec3::ZERO {
        Quat::IDENTITY
    } else {
        Quat::from_rotation_arc(Vec3::Z, dir)
    }
}

/// Mirror `v` off a surface with unit normal `n`
pub fn reflect(v: Vec3, n: Vec3) -> Vec3 {
    v - 2.0 * v.dot(n) * n
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Sphere { center: Vec3, radius: f32 },
    Aabb { min: Vec3, max: Vec3 },
    /// Solid half-space behind the plane `normal · p = offset`
    Plane { normal: Vec3, offset: f32 },
}

impl Shape {
    /// Entry fraction and surface normal
    fn intersect(&self, start: Vec3, end: Vec3) -> Option<(f32, Vec3)> {
        match *self {
            Shape::Sphere { center, radius } => {
                let t = ray_sphere_intersect(start, end, center, radius)?;
                let point = start.lerp(end, t);
                Some((t, (point - center).normalize_or_zero()))
            }
            Shape::Aabb { min, max } => intersect_aabb(start, end, min, max),
            Shape::Plane { normal, offset } => {
                let from = normal.dot(start) - offset;
                let to = normal.dot(end) - offset;
                if from < 0.0 || to >= 0.0 {
                    return None;
                }
                Some((from / (from - to), normal))
            }
        }
    }
}

fn intersect_aabb(start: Vec3, end: Vec3, min: Vec3, max: Vec3) -> Option<(f32, Vec3)> {
    let d = end - start;
    let mut t_enter = 0.0f32;
    let mut t_exit = 1.0f32;
    let mut normal = Vec3::ZERO;
    for axis in 0..3 {
        if d[axis].abs() < f32::EPSILON {
            if start[axis] < min[axis] || start[axis] > max[axis] {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d[axis];
        let mut t0 = (min[axis] - start[axis]) * inv;
        let mut t1 = (max[axis] - start[axis]) * inv;
        let mut face = -1.0;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
            face = 1.0;
        }
        if t0 > t_enter {
            t_enter = t0;
            normal = Vec3::ZERO;
            normal[axis] = face;
        }
        t_exit = t_exit.min(t1);
        if t_enter > t_exit {
            return None;
        }
    }
    // Starting inside the box is not a hit
    if normal == Vec3::ZERO {
        return None;
    }
    Some((t_enter, normal))
}

#[derive(Debug, Clone)]
struct Collider {
    entity: Option<EntityRef>,
    shape: Shape,
    group: CollisionMask,
    enabled: bool,
}

/// Immovable collision scene: level geometry plus entity colliders
#[derive(Debug, Clone, Default)]
pub struct StaticScene {
    colliders: Vec<Collider>,
}

impl StaticScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Solid ground below `height`
    pub fn add_floor(&mut self, height: f32) {
        self.colliders.push(Collider {
            entity: None,
            shape: Shape::Plane {
                normal: Vec3::Y,
                offset: height,
            },
            group: CollisionMask::STATIC,
            enabled: true,
        });
    }

    pub fn add_box(&mut self, entity: Option<EntityRef>, min: Vec3, max: Vec3, group: CollisionMask) {
        self.colliders.push(Collider {
            entity,
            shape: Shape::Aabb {
                min: min.min(max),
                max: min.max(max),
            },
            group,
            enabled: true,
        });
    }

    fn hits(&self, start: Vec3, end: Vec3, mask: CollisionMask) -> Vec<(f32, RayHit)> {
        if start.distance_squared(end) <= f32::EPSILON {
            return Vec::new();
        }
        let mut hits: Vec<(f32, RayHit)> = self
            .colliders
            .iter()
            .filter(|c| c.enabled && c.group.intersects(mask))
            .filter_map(|c| {
                let (t, normal) = c.shape.intersect(start, end)?;
                Some((
                    t,
                    RayHit {
                        point: start.lerp(end, t),
                        normal,
                        entity: c.entity,
                    },
                ))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits
    }
}

impl PhysicsService for StaticScene {
    fn raycast(&self, start: Vec3, end: Vec3, mask: CollisionMask) -> Option<RayHit> {
        self.hits(start, end, mask).into_iter().next().map(|(_, hit)| hit)
    }

    fn raycast_all(&self, start: Vec3, end: Vec3, mask: CollisionMask) -> Vec<RayHit> {
        self.hits(start, end, mask)
            .into_iter()
            .map(|(_, hit)| hit)
            .collect()
    }

    fn insert_sphere(&mut self, entity: EntityRef, center: Vec3, radius: f32, group: CollisionMask) {
        self.colliders.push(Collider {
            entity: Some(entity),
            shape: Shape::Sphere { center, radius },
            group,
            enabled: true,
        });
    }

    fn remove(&mut self, entity: EntityRef) {
        self.colliders.retain(|c| c.entity != Some(entity));
    }

    fn set_enabled(&mut self, entity: EntityRef, enabled: bool) {
        for collider in self.colliders.iter_mut().filter(|c| c.entity == Some(entity)) {
            collider.enabled = enabled;
        }
    }

    fn apply_impulse(&mut self, entity: EntityRef, impulse: Vec3) {
        // Nothing in a static scene moves
        trace!(?entity, ?impulse, "impulse ignored");
    }
}
