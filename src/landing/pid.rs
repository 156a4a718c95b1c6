//! Single-axis PID controller for lateral velocity corrections

use crate::config::PidConfig;

/// Proportional-integral-derivative controller
///
/// State lives between calls but the controller is owned by exactly one
/// loop; `update` is never called concurrently. The integral accumulates
/// without an anti-windup clamp, matching the tuning the gains were chosen
/// against.
#[derive(Debug, Clone)]
pub struct Pid {
    kp: f32,
    ki: f32,
    kd: f32,
    min_output: f32,
    max_output: f32,
    integral: f32,
    last_error: f32,
}

impl Pid {
    pub fn new(kp: f32, ki: f32, kd: f32, min_output: f32, max_output: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            min_output,
            max_output,
            integral: 0.0,
            last_error: 0.0,
        }
    }

    /// Controller with the configured gains and a symmetric output bound
    pub fn from_config(config: &PidConfig) -> Self {
        Self::new(
            config.kp,
            config.ki,
            config.kd,
            -config.max_output,
            config.max_output,
        )
    }

    /// Advance the controller by one step
    ///
    /// `dt` is the elapsed time since the previous call in seconds. A zero
    /// `dt` contributes no derivative term. The returned command is clamped
    /// to `[min_output, max_output]`.
    pub fn update(&mut self, error: f32, dt: f32) -> f32 {
        let p = self.kp * error;

        self.integral += error * dt;
        let i = self.ki * self.integral;

        let derivative = if dt > 0.0 {
            (error - self.last_error) / dt
        } else {
            0.0
        };
        let d = self.kd * derivative;

        self.last_error = error;

        (p + i + d).clamp(self.min_output, self.max_output)
    }
}
