/// Useful enumerations for particle sources, PID detectors and hypotheses.
pub mod enums;
/// A small table of particle species (PDG code, name, mass, charge).
pub mod pdg;
/// Traits to give additional functionality to [`nalgebra::Vector3`] and [`nalgebra::Vector4`] (in
/// particular, to treat the latter as a four-momentum).
pub mod vectors;

/// The speed of light in cm/ns.
pub const SPEED_OF_LIGHT: f64 = 29.9792458;

/// Wrap an angle into $`[-\pi, \pi]`$.
pub fn wrap_angle(angle: f64) -> f64 {
    use std::f64::consts::PI;
    if angle > PI {
        angle - 2.0 * PI
    } else if angle < -PI {
        angle + 2.0 * PI
    } else {
        angle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_wrap_angle() {
        assert_relative_eq!(wrap_angle(1.5 * PI), -0.5 * PI);
        assert_relative_eq!(wrap_angle(-1.5 * PI), 0.5 * PI);
        assert_relative_eq!(wrap_angle(0.25), 0.25);
    }
}
