use nalgebra::{Vector3, Vector4};

/// A three-vector: a momentum, a vertex position, or a boost velocity.
pub type Vec3 = Vector3<f64>;
/// A four-momentum stored as `(E, px, py, pz)`.
pub type Vec4 = Vector4<f64>;

/// Kinematic accessors for [`nalgebra::Vector4`] when it is used as a four-momentum.
///
/// The energy is stored in the first component, followed by the three momentum components.
pub trait FourMomentum {
    /// The energy component.
    fn e(&self) -> f64;
    /// The momentum along $`x`$.
    fn px(&self) -> f64;
    /// The momentum along $`y`$.
    fn py(&self) -> f64;
    /// The momentum along $`z`$.
    fn pz(&self) -> f64;
    /// The three-momentum.
    fn momentum(&self) -> Vec3;
    /// The magnitude of the three-momentum.
    fn p(&self) -> f64 {
        self.momentum().norm()
    }
    /// The momentum transverse to the $`z`$-axis.
    fn pt(&self) -> f64 {
        self.px().hypot(self.py())
    }
    /// The squared invariant mass $`E^2 - \vec{p}^2`$.
    fn m2(&self) -> f64 {
        self.e() * self.e() - self.momentum().norm_squared()
    }
    /// The invariant mass. A space-like vector returns the negative of $`\sqrt{-m^2}`$.
    fn m(&self) -> f64 {
        let m2 = self.m2();
        if m2 < 0.0 {
            -(-m2).sqrt()
        } else {
            m2.sqrt()
        }
    }
    /// The velocity $`\vec{\beta} = \vec{p}/E`$.
    fn beta(&self) -> Vec3 {
        self.momentum() / self.e()
    }
    /// The Lorentz factor $`\gamma = E/m`$.
    fn gamma(&self) -> f64 {
        self.e() / self.m()
    }
    /// Boost the four-vector by the velocity `beta`.
    ///
    /// Boosting a four-momentum by $`-\vec{\beta}`$ of another four-momentum brings it into the
    /// rest frame of the latter.
    fn boost(&self, beta: &Vec3) -> Vec4;
}

impl FourMomentum for Vec4 {
    fn e(&self) -> f64 {
        self[0]
    }
    fn px(&self) -> f64 {
        self[1]
    }
    fn py(&self) -> f64 {
        self[2]
    }
    fn pz(&self) -> f64 {
        self[3]
    }
    fn momentum(&self) -> Vec3 {
        Vec3::new(self[1], self[2], self[3])
    }
    fn boost(&self, beta: &Vec3) -> Vec4 {
        let b2 = beta.norm_squared();
        if b2 == 0.0 {
            return *self;
        }
        let gamma = 1.0 / (1.0 - b2).sqrt();
        let p3 = self.momentum()
            + beta * ((gamma - 1.0) * self.momentum().dot(beta) / b2 + gamma * self.e());
        Vec4::new(gamma * (self.e() + beta.dot(&self.momentum())), p3.x, p3.y, p3.z)
    }
}

/// Angular accessors for [`nalgebra::Vector3`] when it is used as a three-momentum or a
/// displacement.
pub trait ThreeMomentum {
    /// The cosine of the polar angle. A null vector gives `1`.
    fn costheta(&self) -> f64;
    /// The polar angle. A null vector gives `0`.
    fn theta(&self) -> f64;
    /// The azimuthal angle. A vector along the $`z`$-axis gives `0`.
    fn phi(&self) -> f64;
    /// The component transverse to the $`z`$-axis.
    fn rho(&self) -> f64;
    /// Attach an energy computed from the given mass.
    fn with_mass(&self, mass: f64) -> Vec4;
    /// Attach the given energy.
    fn with_energy(&self, energy: f64) -> Vec4;
}

impl ThreeMomentum for Vec3 {
    fn costheta(&self) -> f64 {
        let mag = self.norm();
        if mag == 0.0 {
            1.0
        } else {
            self.z / mag
        }
    }
    fn theta(&self) -> f64 {
        if self.x == 0.0 && self.y == 0.0 && self.z == 0.0 {
            0.0
        } else {
            self.rho().atan2(self.z)
        }
    }
    fn phi(&self) -> f64 {
        if self.x == 0.0 && self.y == 0.0 {
            0.0
        } else {
            self.y.atan2(self.x)
        }
    }
    fn rho(&self) -> f64 {
        self.x.hypot(self.y)
    }
    fn with_mass(&self, mass: f64) -> Vec4 {
        let e = (mass * mass + self.norm_squared()).sqrt();
        Vec4::new(e, self.x, self.y, self.z)
    }
    fn with_energy(&self, energy: f64) -> Vec4 {
        Vec4::new(energy, self.x, self.y, self.z)
    }
}
