use std::{
    f64::consts::{PI, TAU},
    fmt::Display,
};

use serde::{Deserialize, Serialize};

/// Wrap the azimuthal difference `phi_a - phi_b` into $`(-\pi, \pi]`$.
///
/// The result is antisymmetric under exchange of the arguments except on the boundary, where both
/// orderings give $`\pi`$, so `delta_phi(a, b).abs() == delta_phi(b, a).abs()` always holds.
pub fn delta_phi(phi_a: f64, phi_b: f64) -> f64 {
    let dphi = (phi_a - phi_b) % TAU;
    if dphi > PI {
        dphi - TAU
    } else if dphi <= -PI {
        dphi + TAU
    } else {
        dphi
    }
}

/// The transverse mass of a two-body system built from two four-vectors:
///
/// ```math
/// m_T = \sqrt{2 p_{T,a} p_{T,b} (1 - \cos\Delta\phi_{ab})}
/// ```
pub fn transverse_mass(a: &Vec4, b: &Vec4) -> f64 {
    (2.0 * a.pt() * b.pt() * (1.0 - a.delta_phi(b).cos())).sqrt()
}

/// A Cartesian three-vector.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// The $`x`$-component.
    pub x: f64,
    /// The $`y`$-component.
    pub y: f64,
    /// The $`z`$-component (along the beam).
    pub z: f64,
}

impl Vec3 {
    /// Create a new [`Vec3`] from its components.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The magnitude of the component transverse to the beam ($`z`$) axis.
    pub fn pt(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// The azimuthal angle in $`(-\pi, \pi]`$.
    pub fn phi(&self) -> f64 {
        self.y.atan2(self.x)
    }

    /// The pseudorapidity $`\eta = \sinh^{-1}(p_z / p_T)`$.
    pub fn eta(&self) -> f64 {
        (self.z / self.pt()).asinh()
    }
}

/// A Cartesian four-vector $`(p_x, p_y, p_z, E)`$.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec4 {
    /// The $`x`$-component.
    pub x: f64,
    /// The $`y`$-component.
    pub y: f64,
    /// The $`z`$-component (along the beam).
    pub z: f64,
    /// The time-like (energy) component.
    pub t: f64,
}

impl Display for Vec4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:6.3}, {:6.3}, {:6.3}; {:6.3}]",
            self.x, self.y, self.z, self.t
        )
    }
}

impl Vec4 {
    /// Create a new [`Vec4`] from its components.
    pub const fn new(px: f64, py: f64, pz: f64, e: f64) -> Self {
        Self {
            x: px,
            y: py,
            z: pz,
            t: e,
        }
    }

    /// Build a four-vector from collider coordinates (transverse momentum, pseudorapidity,
    /// azimuth and energy), the way detector objects are stored.
    pub fn from_pt_eta_phi_e(pt: f64, eta: f64, phi: f64, e: f64) -> Self {
        Self::new(pt * phi.cos(), pt * phi.sin(), pt * eta.sinh(), e)
    }

    /// The $`x`$-momentum.
    pub fn px(&self) -> f64 {
        self.x
    }

    /// The $`y`$-momentum.
    pub fn py(&self) -> f64 {
        self.y
    }

    /// The $`z`$-momentum.
    pub fn pz(&self) -> f64 {
        self.z
    }

    /// The energy.
    pub fn e(&self) -> f64 {
        self.t
    }

    /// The spatial part.
    pub fn vec3(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    /// Transverse momentum.
    pub fn pt(&self) -> f64 {
        self.vec3().pt()
    }

    /// Azimuthal angle.
    pub fn phi(&self) -> f64 {
        self.vec3().phi()
    }

    /// Pseudorapidity.
    pub fn eta(&self) -> f64 {
        self.vec3().eta()
    }

    /// Azimuthal separation from another four-vector, wrapped into $`(-\pi, \pi]`$.
    pub fn delta_phi(&self, other: &Self) -> f64 {
        delta_phi(self.phi(), other.phi())
    }
}
