//! Parallel-form PID with derivative low-pass and derivative-on-measurement.
//!
//! One instance per axis per loop. The integrator is clamped to ±ilim on
//! every step; a mode change on the owning axis must call [`Pid::zero`].

/// Tuning constants for one PID instance.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Integrator clamp (absolute value).
    pub ilim: f32,
}

/// One PID axis: gains plus the running state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pid {
    pub gains: PidGains,
    /// Integral accumulator, |i_acc| ≤ ilim.
    i_acc: f32,
    last_err: f32,
    last_der: f32,
    /// Derivative low-pass time constant [s]; 0 = unfiltered.
    deriv_tau: f32,
    /// Derivative-on-measurement blend, 1 = pure setpoint derivative.
    deriv_gamma: f32,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            deriv_gamma: 1.0,
            ..Self::default()
        }
    }

    /// Replace the gains, keeping the running state.
    pub fn configure(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    /// Configure the derivative term: low-pass cutoff [Hz] and gamma.
    ///
    /// A cutoff of 0 disables the filter.
    pub fn configure_derivative(&mut self, cutoff_hz: f32, gamma: f32) {
        self.deriv_tau = if cutoff_hz > 0.0 {
            1.0 / (2.0 * core::f32::consts::PI * cutoff_hz)
        } else {
            0.0
        };
        self.deriv_gamma = gamma;
    }

    /// Reset the running state (integrator, derivative history).
    pub fn zero(&mut self) {
        self.i_acc = 0.0;
        self.last_err = 0.0;
        self.last_der = 0.0;
    }

    /// Current integrator value.
    #[inline]
    pub fn i_accumulator(&self) -> f32 {
        self.i_acc
    }

    /// One PID step on a plain error signal.
    pub fn apply(&mut self, err: f32, dt: f32) -> f32 {
        self.step(err, err, dt)
    }

    /// One PID step with derivative on measurement: the D term acts on
    /// `gamma·setpoint − measured` so setpoint steps do not kick it.
    pub fn apply_setpoint(&mut self, setpoint: f32, measured: f32, dt: f32) -> f32 {
        let err = setpoint - measured;
        let dterm_input = self.deriv_gamma * setpoint - measured;
        self.step(err, dterm_input, dt)
    }

    fn step(&mut self, err: f32, dterm_input: f32, dt: f32) -> f32 {
        if self.gains.ki != 0.0 {
            self.i_acc += err * self.gains.ki * dt;
            self.i_acc = self.i_acc.clamp(-self.gains.ilim, self.gains.ilim);
        }

        let mut dterm = 0.0;
        let diff = dterm_input - self.last_err;
        self.last_err = dterm_input;
        if self.gains.kd > 0.0 && dt > 0.0 {
            let raw = diff * self.gains.kd / dt;
            dterm = if self.deriv_tau > 0.0 {
                // One-pole low-pass: alpha = dt / (dt + tau)
                let filtered = self.last_der + dt / (dt + self.deriv_tau) * (raw - self.last_der);
                self.last_der = filtered;
                filtered
            } else {
                raw
            };
        }

        err * self.gains.kp + self.i_acc + dterm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 0.0025; // 400 Hz

    fn gains(kp: f32, ki: f32, kd: f32, ilim: f32) -> PidGains {
        PidGains { kp, ki, kd, ilim }
    }

    #[test]
    fn pure_proportional() {
        let mut pid = Pid::new(gains(4.0, 0.0, 0.0, 0.0));
        assert!((pid.apply(0.5, DT) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn integrator_never_exceeds_ilim() {
        let mut pid = Pid::new(gains(0.0, 10.0, 0.0, 0.3));
        for _ in 0..10_000 {
            pid.apply(100.0, DT);
            assert!(pid.i_accumulator().abs() <= 0.3 + f32::EPSILON);
        }
    }

    #[test]
    fn integrator_accumulates_linearly() {
        let mut pid = Pid::new(gains(0.0, 2.0, 0.0, 100.0));
        for _ in 0..100 {
            pid.apply(1.0, DT);
        }
        // i = ki * err * dt * n = 2 * 1 * 0.0025 * 100 = 0.5
        assert!((pid.i_accumulator() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn zero_clears_state() {
        let mut pid = Pid::new(gains(1.0, 5.0, 1.0, 10.0));
        for _ in 0..50 {
            pid.apply(2.0, DT);
        }
        assert!(pid.i_accumulator() != 0.0);
        pid.zero();
        assert_eq!(pid.i_accumulator(), 0.0);
        // First post-reset step has no derivative kick from history.
        let out = pid.apply(0.0, DT);
        assert!(out.abs() < 1e-6);
    }

    #[test]
    fn derivative_on_measurement_ignores_setpoint_step() {
        let mut pid = Pid::new(gains(0.0, 0.0, 1.0, 0.0));
        pid.configure_derivative(0.0, 0.0); // gamma = 0: measurement only
        pid.apply_setpoint(0.0, 0.0, DT);
        // Setpoint jumps, measurement still: derivative stays zero.
        let out = pid.apply_setpoint(10.0, 0.0, DT);
        assert!(out.abs() < 1e-6);
        // Measurement moves: derivative responds (negative direction).
        let out = pid.apply_setpoint(10.0, 1.0, DT);
        assert!(out < 0.0);
    }

    #[test]
    fn derivative_lowpass_attenuates_step() {
        let mut unfiltered = Pid::new(gains(0.0, 0.0, 1.0, 0.0));
        let mut filtered = Pid::new(gains(0.0, 0.0, 1.0, 0.0));
        filtered.configure_derivative(20.0, 1.0);

        unfiltered.apply(0.0, DT);
        filtered.apply(0.0, DT);
        let raw = unfiltered.apply(1.0, DT);
        let smooth = filtered.apply(1.0, DT);
        assert!(smooth.abs() < raw.abs());
    }
}
