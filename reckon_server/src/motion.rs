//! Authoritative movers and their replication gates.
//!
//! A mover always applies its true motion. The gate only decides whether the
//! motion has drifted far enough from the last published snapshot to be worth
//! publishing again; between replications `last_replicated` is stale on
//! purpose.

use reckon_shared::{
    config::{MotionShape, WorldSettings},
    kinematics::KinematicState,
    math::Vec3,
};

/// Server-side drift test over one motion shape.
pub trait ReplicationGate: Send {
    fn shape(&self) -> MotionShape;

    /// Advances the true motion by `dt` seconds. Returns the new snapshot when
    /// the drift since the last replication exceeds the threshold.
    fn advance(&mut self, dt: f32) -> Option<KinematicState>;

    /// True position, independent of what has been replicated.
    fn position(&self) -> Vec3;

    fn velocity(&self) -> Vec3;

    fn last_replicated(&self) -> &KinematicState;

    /// Drift that triggers a replication.
    fn threshold(&self) -> f32;
}

/// Builds the mover the settings ask for, spawned relative to `spawn`.
///
/// Settings must already be validated.
pub fn mover_for(settings: &WorldSettings, spawn: Vec3) -> Box<dyn ReplicationGate> {
    match settings.shape {
        MotionShape::Circle => Box::new(CircularMover::new(
            spawn,
            settings.radius,
            settings.angular_speed_deg,
            settings.circle_replication_dist(),
        )),
        MotionShape::Square => {
            let half = settings.side_length / 2.0;
            let start = Vec3::new(spawn.x - half, spawn.y - half, 0.0);
            Box::new(SquareMover::new(
                start,
                settings.side_length,
                settings.speed,
                settings.square_replication_dist(),
            ))
        }
    }
}

/// Uniform circular motion about `center` in the XY plane.
#[derive(Debug, Clone)]
pub struct CircularMover {
    center: Vec3,
    radius: f32,
    angular_speed_deg: f32,
    /// Unit vector from the centre to the entity.
    direction: Vec3,
    position: Vec3,
    velocity: Vec3,
    threshold: f32,
    last_replicated: KinematicState,
}

impl CircularMover {
    /// Spawns on the circle at `center + FORWARD * radius`.
    pub fn new(center: Vec3, radius: f32, angular_speed_deg: f32, threshold: f32) -> Self {
        let direction = Vec3::FORWARD;
        let position = center + direction * radius;
        Self {
            center,
            radius,
            angular_speed_deg,
            direction,
            position,
            velocity: Vec3::ZERO,
            threshold,
            last_replicated: KinematicState::at_rest(position),
        }
    }

    /// Arc length between the true position and the last replicated one.
    pub fn arc_since_replication(&self) -> f32 {
        let a = self.position - self.center;
        let b = self.last_replicated.position - self.center;
        self.radius * a.angle_between(b)
    }
}

impl ReplicationGate for CircularMover {
    fn shape(&self) -> MotionShape {
        MotionShape::Circle
    }

    fn advance(&mut self, dt: f32) -> Option<KinematicState> {
        self.direction = self
            .direction
            .rotate_yaw(self.angular_speed_deg * dt)
            .normalized();
        self.position = self.center + self.direction * self.radius;

        let tangential_speed = self.angular_speed_deg.to_radians() * self.radius;
        self.velocity = Vec3::UP.cross(self.direction) * tangential_speed;

        if self.arc_since_replication() > self.threshold {
            self.last_replicated.position = self.position;
            self.last_replicated.velocity = self.velocity;
            return Some(self.last_replicated);
        }
        None
    }

    fn position(&self) -> Vec3 {
        self.position
    }

    fn velocity(&self) -> Vec3 {
        self.velocity
    }

    fn last_replicated(&self) -> &KinematicState {
        &self.last_replicated
    }

    fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// Constant-speed motion around a square, sides walked +X, +Y, -X, -Y.
#[derive(Debug, Clone)]
pub struct SquareMover {
    corners: [Vec3; 4],
    side: usize,
    speed: f32,
    position: Vec3,
    velocity: Vec3,
    threshold: f32,
    last_replicated: KinematicState,
}

impl SquareMover {
    /// Spawns on the first corner, heading along +X.
    pub fn new(start: Vec3, side_length: f32, speed: f32, threshold: f32) -> Self {
        let corners = [
            start,
            start + Vec3::new(side_length, 0.0, 0.0),
            start + Vec3::new(side_length, side_length, 0.0),
            start + Vec3::new(0.0, side_length, 0.0),
        ];
        Self {
            corners,
            side: 0,
            speed,
            position: start,
            velocity: Vec3::FORWARD * speed,
            threshold,
            last_replicated: KinematicState::at_rest(start),
        }
    }

    /// Index of the side currently being walked, 0..4.
    pub fn side(&self) -> usize {
        self.side
    }

    /// Corner at the end of the current side.
    pub fn target(&self) -> Vec3 {
        self.corners[(self.side + 1) % 4]
    }

    /// Straight-line distance from the last replicated position.
    pub fn distance_since_replication(&self) -> f32 {
        self.position.distance(self.last_replicated.position)
    }
}

impl ReplicationGate for SquareMover {
    fn shape(&self) -> MotionShape {
        MotionShape::Square
    }

    fn advance(&mut self, dt: f32) -> Option<KinematicState> {
        let step = self.speed * dt;
        let target = self.target();
        if self.position.distance(target) <= step {
            self.position = target;
            self.side = (self.side + 1) % 4;
        } else {
            self.position += (target - self.position).normalized() * step;
        }
        self.velocity = (self.target() - self.position).normalized() * self.speed;

        if self.distance_since_replication() > self.threshold {
            self.last_replicated.position = self.position;
            self.last_replicated.velocity = self.velocity;
            return Some(self.last_replicated);
        }
        None
    }

    fn position(&self) -> Vec3 {
        self.position
    }

    fn velocity(&self) -> Vec3 {
        self.velocity
    }

    fn last_replicated(&self) -> &KinematicState {
        &self.last_replicated
    }

    fn threshold(&self) -> f32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn near(a: Vec3, b: Vec3, eps: f32) -> bool {
        a.distance(b) < eps
    }

    #[test]
    fn square_gate_replicates_on_third_tick() {
        let mut m = SquareMover::new(Vec3::ZERO, 300.0, 200.0, 50.0);

        assert!(m.advance(0.1).is_none());
        assert!((m.distance_since_replication() - 20.0).abs() < 1e-3);
        assert!(m.advance(0.1).is_none());
        assert!((m.distance_since_replication() - 40.0).abs() < 1e-3);

        let snap = m.advance(0.1).expect("60 > 50 must replicate");
        assert!(near(snap.position, Vec3::new(60.0, 0.0, 0.0), 1e-3));
        assert!(near(snap.velocity, Vec3::new(200.0, 0.0, 0.0), 1e-3));
        assert_eq!(snap.acceleration, Vec3::ZERO);

        // New baseline: next tick is only 20 away again.
        assert!(m.advance(0.1).is_none());
        assert!((m.distance_since_replication() - 20.0).abs() < 1e-3);
        assert!(near(m.last_replicated().position, Vec3::new(60.0, 0.0, 0.0), 1e-3));
    }

    #[test]
    fn square_true_position_moves_without_replication() {
        let mut m = SquareMover::new(Vec3::ZERO, 300.0, 200.0, 1_000.0);
        for _ in 0..5 {
            assert!(m.advance(0.1).is_none());
        }
        assert!(near(m.position(), Vec3::new(100.0, 0.0, 0.0), 1e-3));
        assert_eq!(m.last_replicated().position, Vec3::ZERO);
    }

    #[test]
    fn square_snaps_to_corner_and_turns() {
        let mut m = SquareMover::new(Vec3::ZERO, 100.0, 200.0, 1_000.0);
        // 0.3 s per tick = 60 units; second tick reaches the corner.
        m.advance(0.3);
        m.advance(0.3);
        assert_eq!(m.position(), Vec3::new(100.0, 0.0, 0.0));
        assert_eq!(m.side(), 1);
        assert!(near(m.velocity(), Vec3::new(0.0, 200.0, 0.0), 1e-3));

        // Full lap returns to the start on side 0.
        for _ in 0..6 {
            m.advance(0.3);
        }
        assert_eq!(m.side(), 0);
        assert_eq!(m.position(), Vec3::ZERO);
    }

    #[test]
    fn circle_stays_on_radius_with_tangent_velocity() {
        let center = Vec3::new(10.0, -5.0, 0.0);
        let mut m = CircularMover::new(center, 300.0, 90.0, 1.0e6);
        for _ in 0..37 {
            m.advance(1.0 / 64.0);
            assert!(((m.position() - center).length() - 300.0).abs() < 1e-2);
            let radial = (m.position() - center).normalized();
            assert!(m.velocity().dot(radial).abs() < 1e-2);
        }
        let expected_speed = 90f32.to_radians() * 300.0;
        assert!((m.velocity().length() - expected_speed).abs() < 1e-2);
    }

    #[test]
    fn circle_quarter_turn_moves_counter_clockwise() {
        let mut m = CircularMover::new(Vec3::ZERO, 100.0, 90.0, 1.0e6);
        m.advance(1.0);
        assert!(near(m.position(), Vec3::new(0.0, 100.0, 0.0), 1e-3));
        assert!(near(m.velocity().normalized(), Vec3::new(-1.0, 0.0, 0.0), 1e-4));
    }

    #[test]
    fn circle_gate_uses_arc_length() {
        // 90 deg/s at r=100: 0.1 s moves ~15.7 units of arc.
        let mut m = CircularMover::new(Vec3::ZERO, 100.0, 90.0, 40.0);
        assert!(m.advance(0.1).is_none());
        assert!(m.advance(0.1).is_none());
        let snap = m.advance(0.1).expect("47 units of arc > 40");
        assert!(m.arc_since_replication() < 0.1);
        assert!(near(snap.position, m.position(), 1e-6));
        assert!(m.advance(0.1).is_none());
    }

    #[test]
    fn factory_builds_configured_shape() {
        let settings = WorldSettings {
            shape: MotionShape::Square,
            side_length: 200.0,
            ..WorldSettings::default()
        };
        let m = mover_for(&settings, Vec3::new(100.0, 100.0, 50.0));
        assert_eq!(m.shape(), MotionShape::Square);
        assert_eq!(m.position(), Vec3::ZERO);
        assert_eq!(m.threshold(), settings.square_replication_dist());

        let m = mover_for(&WorldSettings::default(), Vec3::ZERO);
        assert_eq!(m.shape(), MotionShape::Circle);
        assert!(near(m.position(), Vec3::new(300.0, 0.0, 0.0), 1e-4));
    }
}
