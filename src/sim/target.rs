//! Target leading

use glam::Vec3;

use super::history::StateFrame;
use super::simulation::Simulation;
use super::world::EntityRef;

/// Earliest point where a projectile fired from `from` at `speed` meets a
/// target at `pos` moving with constant `velocity`.
///
/// Solves `|pos + v·t - from|² = (speed·t)²` for the smallest `t >= 0`.
pub fn solve_intercept(pos: Vec3, velocity: Vec3, from: Vec3, speed: f32) -> Option<Vec3> {
    let d = pos - from;
    let c = d.length_squared();
    if c <= f32::EPSILON {
        return Some(pos);
    }
    let a = velocity.length_squared() - speed * speed;
    let b = 2.0 * d.dot(velocity);

    let t = if a.abs() < 1e-6 {
        // Target as fast as the projectile: linear in t
        if b >= 0.0 {
            return None;
        }
        -c / b
    } else {
        let discriminant = b * b - 4.0 * a * c;
        if discriminant < 0.0 {
            return None;
        }
        let root = discriminant.sqrt();
        let t1 = (-b - root) / (2.0 * a);
        let t2 = (-b + root) / (2.0 * a);
        let (lo, hi) = if t1 < t2 { (t1, t2) } else { (t2, t1) };
        if lo >= 0.0 {
            lo
        } else if hi >= 0.0 {
            hi
        } else {
            return None;
        }
    };

    Some(pos + velocity * t)
}

impl Simulation {
    /// Where to aim at `target` from `from`. With a frame, position and
    /// velocity come from recorded history instead of the live world.
    pub fn predict_intersection(
        &self,
        target: EntityRef,
        from: Vec3,
        speed: f32,
        frame: Option<&StateFrame>,
    ) -> Option<Vec3> {
        let (pos, velocity) = match frame {
            Some(frame) => {
                let pos = frame.transform_absolute(target.index())?.target_pos();
                let tick_rate = self.ctx.tick_rate;
                let previous = self
                    .history
                    .by_timestamp(frame.timestamp - f64::from(tick_rate))
                    .and_then(|f| f.transform_absolute(target.index()))
                    .map(|t| t.target_pos());
                let velocity = match previous {
                    Some(last) => (pos - last) / tick_rate,
                    None => Vec3::ZERO,
                };
                (pos, velocity)
            }
            None => (
                self.world.target_position(target)?,
                self.world.target_velocity(target),
            ),
        };
        solve_intercept(pos, velocity, from, speed)
    }
}
