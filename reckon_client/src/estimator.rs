//! Dead reckoning.
//!
//! The server replicates sparsely, so between updates the client extrapolates
//! two trajectories with constant acceleration: its own predicted one and the
//! last authoritative sample. The rendered position is a blend of the two,
//! weighted by how far we are into the expected update interval:
//!
//! ```text
//! t = clamp(elapsed / average_interval, 0, max_blend)
//! P = P_pred + (P_auth - P_pred) * t
//! ```
//!
//! Right after an update the output is pure local extrapolation; as the next
//! update becomes due it converges onto the authoritative trajectory. The
//! average interval is measured from arrival stamps with a
//! [`TimeWindowCollector`].

use reckon_shared::{
    collector::{Stamp, TimeWindowCollector, STAMP_EPSILON},
    config::EstimatorConfig,
    kinematics::KinematicState,
    math::Vec3,
};
use tracing::{debug, warn};

/// Blend weight toward the authoritative trajectory.
pub fn blend_factor(elapsed: f32, average_interval: f32, max_blend: f32) -> f32 {
    if average_interval <= 0.0 {
        return max_blend;
    }
    (elapsed / average_interval).clamp(0.0, max_blend)
}

/// Extrapolates both states over `dt` and blends their positions by `t`.
pub fn blend_positions(
    predicted: &KinematicState,
    authoritative: &KinematicState,
    dt: f32,
    t: f32,
) -> Vec3 {
    let p_pred = predicted.extrapolated_position(dt);
    let p_auth = authoritative.extrapolated_position(dt);
    p_pred.lerp_unclamped(p_auth, t)
}

/// What happened to an authoritative update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Accepted,
    /// Arrived with a stamp older than the last accepted one.
    OutOfOrder,
    /// Contained NaN or infinity.
    NonFinite,
}

/// Client-side predictor for one entity.
#[derive(Debug, Clone)]
pub struct DeadReckoningEstimator<S = f64> {
    config: EstimatorConfig,
    predicted: KinematicState,
    /// Latest authoritative sample, integrated forward every tick.
    authoritative: KinematicState,
    collector: TimeWindowCollector<S>,
    elapsed: f32,
    blend: f32,
    average_update_interval: f32,
}

impl<S: Stamp> DeadReckoningEstimator<S> {
    /// Config must already be validated.
    pub fn new(config: EstimatorConfig) -> Self {
        let collector = TimeWindowCollector::new(config.window_span, config.drop_threshold);
        let average_update_interval = config.default_update_interval;
        Self {
            config,
            predicted: KinematicState::default(),
            authoritative: KinematicState::default(),
            collector,
            elapsed: 0.0,
            blend: 0.0,
            average_update_interval,
        }
    }

    /// Places the entity. Both trajectories start from `state`.
    pub fn on_spawn(&mut self, state: KinematicState) {
        self.predicted = state;
        self.authoritative = state;
        self.elapsed = 0.0;
        self.blend = 0.0;
    }

    /// Takes in a replicated state that arrived at `arrival`.
    pub fn on_authoritative_update(&mut self, state: KinematicState, arrival: S) -> UpdateOutcome {
        if !state.is_finite() {
            warn!(%state, "Dropping non-finite authoritative state");
            return UpdateOutcome::NonFinite;
        }
        if let Some(last) = self.collector.last_stamp() {
            let gap = arrival.seconds_since(&last);
            if gap < -STAMP_EPSILON {
                warn!(gap, "Dropping authoritative state that arrived out of order");
                return UpdateOutcome::OutOfOrder;
            }
        }

        self.authoritative = state;
        self.elapsed = 0.0;
        self.collector.add(arrival);
        if self.collector.is_valid() {
            self.average_update_interval = self.collector.average_duration() as f32;
        }
        debug!(
            average_update_interval = self.average_update_interval,
            samples = self.collector.len(),
            "Authoritative update"
        );
        UpdateOutcome::Accepted
    }

    /// Advances the prediction by `dt` and returns the state to render.
    pub fn on_tick(&mut self, dt: f32) -> KinematicState {
        self.elapsed += dt;
        self.blend = blend_factor(
            self.elapsed,
            self.average_update_interval,
            self.config.max_blend,
        );

        // Acceleration is never extrapolated on its own.
        self.predicted.acceleration = self.authoritative.acceleration;

        let position = blend_positions(&self.predicted, &self.authoritative, dt, self.blend);
        self.predicted.position = position;

        self.authoritative.integrate(dt);

        let velocity = self.predicted.velocity + self.predicted.acceleration * dt;
        self.predicted.velocity = velocity.lerp_unclamped(self.authoritative.velocity, self.blend);

        debug_assert!(self.predicted.is_finite(), "prediction diverged: {}", self.predicted);
        self.predicted
    }

    pub fn predicted(&self) -> &KinematicState {
        &self.predicted
    }

    /// Authoritative shadow, integrated up to the current tick.
    pub fn authoritative(&self) -> &KinematicState {
        &self.authoritative
    }

    /// Blend factor used by the last tick.
    pub fn blend(&self) -> f32 {
        self.blend
    }

    /// Seconds since the last accepted update.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn average_update_interval(&self) -> f32 {
        self.average_update_interval
    }

    pub fn collector(&self) -> &TimeWindowCollector<S> {
        &self.collector
    }
}
