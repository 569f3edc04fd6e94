//! Cruise-control thrust compensation.
//!
//! Scales the thrust demand by the inverse cosine of the bank angle so the
//! vertical thrust component stays what the pilot commanded, clamped by a
//! maximum power factor and cut when past the configured angle (inverted
//! flight gets no boost).

use skylark_common::math::Quaternion;
use skylark_common::objects::CruiseControlSettings;

/// Thrust multiplication factor for the current attitude.
pub fn cruise_control_factor(settings: &CruiseControlSettings, q: &Quaternion) -> f32 {
    // Body z projected on earth z: cosine of the total tilt angle.
    let cos_tilt = q.w * q.w - q.x * q.x - q.y * q.y + q.z * q.z;
    let max_angle_cos = settings.max_angle.to_radians().cos();

    if cos_tilt <= 0.0 || cos_tilt < max_angle_cos {
        // Past the compensation envelope (or inverted): no boost at all.
        return 1.0;
    }
    (1.0 / cos_tilt).min(settings.max_power_factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CruiseControlSettings {
        CruiseControlSettings::default()
    }

    #[test]
    fn level_needs_no_compensation() {
        let f = cruise_control_factor(&settings(), &Quaternion::IDENTITY);
        assert!((f - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sixty_degree_bank_doubles_power() {
        let q = Quaternion::from_rpy([60.0, 0.0, 0.0]);
        let f = cruise_control_factor(&settings(), &q);
        assert!((f - 2.0).abs() < 0.01, "factor {f}");
    }

    #[test]
    fn power_factor_is_clamped() {
        let q = Quaternion::from_rpy([85.0, 0.0, 0.0]);
        let f = cruise_control_factor(&settings(), &q);
        assert!(f <= settings().max_power_factor + 1e-6);
    }

    #[test]
    fn inverted_flight_gets_no_boost() {
        let q = Quaternion::from_rpy([175.0, 0.0, 0.0]);
        let f = cruise_control_factor(&settings(), &q);
        assert_eq!(f, 1.0);
    }
}
