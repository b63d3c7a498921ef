use std::{cell::RefCell, fmt::Debug, marker::PhantomData};

use dyn_clone::DynClone;
use nalgebra::{Matrix3, Matrix4};

use crate::{
    config::BeamParameters,
    data::{Matrix7, Particle},
    utils::vectors::{FourMomentum, Vec3, Vec4},
};

/// A coordinate system in which momenta, vertices and their covariances are viewed.
///
/// Every frame is a linear transformation of the lab-frame quantities, described by a
/// [`jacobian`](ReferenceFrame::jacobian) in `(px, py, pz, E, x, y, z)` order. Covariances are
/// transformed by congruence, $`J \Sigma J^T`$.
///
/// Stored particle quantities are never modified; a frame only produces views of them.
pub trait ReferenceFrame: DynClone + Send + Sync + Debug {
    /// Transform a lab-frame four-momentum.
    fn transform_momentum(&self, p4: &Vec4) -> Vec4;
    /// Transform a lab-frame position.
    fn transform_vertex(&self, vertex: &Vec3) -> Vec3;
    /// The Jacobian of the combined momentum and vertex transformation.
    fn jacobian(&self) -> Matrix7;

    /// The particle's four-momentum in this frame.
    fn momentum(&self, particle: &Particle) -> Vec4 {
        self.transform_momentum(&particle.p4)
    }
    /// The particle's vertex in this frame.
    fn vertex(&self, particle: &Particle) -> Vec3 {
        self.transform_vertex(&particle.vertex)
    }
    /// The particle's full 7×7 covariance in this frame.
    fn momentum_error_matrix(&self, particle: &Particle) -> Matrix7 {
        let j = self.jacobian();
        j * particle.error_matrix * j.transpose()
    }
    /// The particle's vertex covariance in this frame.
    fn vertex_error_matrix(&self, particle: &Particle) -> Matrix3<f64> {
        self.momentum_error_matrix(particle)
            .fixed_view::<3, 3>(4, 4)
            .into_owned()
    }
}

dyn_clone::clone_trait_object!(ReferenceFrame);

/// The Lorentz transformation which boosts by `beta`, in `(px, py, pz, E)` order.
pub fn boost_matrix(beta: &Vec3) -> Matrix4<f64> {
    let b2 = beta.norm_squared();
    if b2 == 0.0 {
        return Matrix4::identity();
    }
    let gamma = 1.0 / (1.0 - b2).sqrt();
    let mut m = Matrix4::identity();
    for i in 0..3 {
        for j in 0..3 {
            m[(i, j)] += (gamma - 1.0) * beta[i] * beta[j] / b2;
        }
        m[(i, 3)] = gamma * beta[i];
        m[(3, i)] = gamma * beta[i];
    }
    m[(3, 3)] = gamma;
    m
}

fn block_diagonal(momentum: &Matrix4<f64>, vertex: &Matrix3<f64>) -> Matrix7 {
    let mut j = Matrix7::zeros();
    j.fixed_view_mut::<4, 4>(0, 0).copy_from(momentum);
    j.fixed_view_mut::<3, 3>(4, 4).copy_from(vertex);
    j
}

fn rotation_matrix(basis: &[Vec3; 3]) -> Matrix3<f64> {
    Matrix3::from_rows(&[
        basis[0].transpose(),
        basis[1].transpose(),
        basis[2].transpose(),
    ])
}

/// A boost into the rest frame of a system moving with velocity `beta` in the lab, with the
/// origin moved to `origin`.
///
/// A position `v` is boosted as the lab event $`a = \Lambda\,(\vec v - \vec o, 0)`$ and then
/// moved along $`\vec\beta`$ by the time it picked up, $`\vec v' = \vec a - \vec\beta\,a_t`$.
/// The spatial part of `a` alone is not used. Transverse displacements are unchanged and a
/// displacement `d` along the boost becomes $`\gamma (1 + \beta^2) d`$.
#[derive(Clone, Debug)]
struct Boost {
    beta: Vec3,
    origin: Vec3,
    lorentz: Matrix4<f64>,
    vertex_jacobian: Matrix3<f64>,
}

impl Boost {
    fn new(beta: Vec3, origin: Vec3) -> Self {
        let lorentz = boost_matrix(&-beta);
        let spatial = lorentz.fixed_view::<3, 3>(0, 0).into_owned();
        let temporal = lorentz.fixed_view::<1, 3>(3, 0).into_owned();
        Self {
            beta,
            origin,
            lorentz,
            vertex_jacobian: spatial - beta * temporal,
        }
    }
    fn transform_momentum(&self, p4: &Vec4) -> Vec4 {
        p4.boost(&-self.beta)
    }
    fn transform_vertex(&self, vertex: &Vec3) -> Vec3 {
        self.vertex_jacobian * (vertex - self.origin)
    }
    fn jacobian(&self) -> Matrix7 {
        block_diagonal(&self.lorentz, &self.vertex_jacobian)
    }
}

/// The identity frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct LabFrame;

impl ReferenceFrame for LabFrame {
    fn transform_momentum(&self, p4: &Vec4) -> Vec4 {
        *p4
    }
    fn transform_vertex(&self, vertex: &Vec3) -> Vec3 {
        *vertex
    }
    fn jacobian(&self) -> Matrix7 {
        Matrix7::identity()
    }
    fn momentum_error_matrix(&self, particle: &Particle) -> Matrix7 {
        particle.error_matrix
    }
}

/// The center-of-mass frame of the colliding beams.
#[derive(Clone, Debug)]
pub struct CMSFrame(Boost);

impl CMSFrame {
    /// Build the frame from the beam parameters. The origin is not displaced.
    pub fn new(beam: &BeamParameters) -> Self {
        Self(Boost::new(beam.boost_vector(), Vec3::zeros()))
    }
}

impl ReferenceFrame for CMSFrame {
    fn transform_momentum(&self, p4: &Vec4) -> Vec4 {
        self.0.transform_momentum(p4)
    }
    fn transform_vertex(&self, vertex: &Vec3) -> Vec3 {
        self.0.transform_vertex(vertex)
    }
    fn jacobian(&self) -> Matrix7 {
        self.0.jacobian()
    }
}

/// The rest frame of an anchor particle, with the origin at the anchor's vertex.
///
/// The anchor need not be the particle the frame is later applied to.
#[derive(Clone, Debug)]
pub struct RestFrame(Boost);

impl RestFrame {
    /// Build the rest frame of `anchor` from its lab-frame momentum and vertex.
    pub fn new(anchor: &Particle) -> Self {
        Self::from_momentum(&anchor.p4, anchor.vertex)
    }
    /// Build the rest frame of a system with the given lab four-momentum and origin.
    pub fn from_momentum(p4: &Vec4, origin: Vec3) -> Self {
        Self(Boost::new(p4.beta(), origin))
    }
}

impl ReferenceFrame for RestFrame {
    fn transform_momentum(&self, p4: &Vec4) -> Vec4 {
        self.0.transform_momentum(p4)
    }
    fn transform_vertex(&self, vertex: &Vec3) -> Vec3 {
        self.0.transform_vertex(vertex)
    }
    fn jacobian(&self) -> Matrix7 {
        self.0.jacobian()
    }
}

/// A pure rotation onto a new orthonormal basis; energies are unchanged.
#[derive(Clone, Debug)]
pub struct RotationFrame {
    rotation: Matrix3<f64>,
}

impl RotationFrame {
    /// New axes `e1`, `e2`, `e3` expressed in lab coordinates.
    pub fn new(e1: Vec3, e2: Vec3, e3: Vec3) -> Self {
        Self {
            rotation: rotation_matrix(&[e1, e2, e3]),
        }
    }
    fn momentum_jacobian(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        m
    }
}

impl ReferenceFrame for RotationFrame {
    fn transform_momentum(&self, p4: &Vec4) -> Vec4 {
        let p = self.rotation * p4.momentum();
        Vec4::new(p4.e(), p.x, p.y, p.z)
    }
    fn transform_vertex(&self, vertex: &Vec3) -> Vec3 {
        self.rotation * vertex
    }
    fn jacobian(&self) -> Matrix7 {
        block_diagonal(&self.momentum_jacobian(), &self.rotation)
    }
}

/// The CMS frame followed by a rotation onto new axes (given in CMS coordinates).
#[derive(Clone, Debug)]
pub struct CMSRotationFrame {
    cms: CMSFrame,
    rotation: RotationFrame,
}

impl CMSRotationFrame {
    /// Build the frame from the beam parameters and the new axes.
    pub fn new(beam: &BeamParameters, e1: Vec3, e2: Vec3, e3: Vec3) -> Self {
        Self {
            cms: CMSFrame::new(beam),
            rotation: RotationFrame::new(e1, e2, e3),
        }
    }
}

impl ReferenceFrame for CMSRotationFrame {
    fn transform_momentum(&self, p4: &Vec4) -> Vec4 {
        self.rotation
            .transform_momentum(&self.cms.transform_momentum(p4))
    }
    fn transform_vertex(&self, vertex: &Vec3) -> Vec3 {
        self.rotation
            .transform_vertex(&self.cms.transform_vertex(vertex))
    }
    fn jacobian(&self) -> Matrix7 {
        self.rotation.jacobian() * self.cms.jacobian()
    }
}

thread_local! {
    static FRAME_STACK: RefCell<Vec<Box<dyn ReferenceFrame>>> = const { RefCell::new(Vec::new()) };
}

/// The innermost frame activated on this thread, or [`LabFrame`] if none is active.
pub fn current() -> Box<dyn ReferenceFrame> {
    FRAME_STACK.with(|stack| {
        stack
            .borrow()
            .last()
            .cloned()
            .unwrap_or_else(|| Box::new(LabFrame))
    })
}

/// Number of frames currently activated on this thread.
pub fn depth() -> usize {
    FRAME_STACK.with(|stack| stack.borrow().len())
}

/// A guard which makes a frame current until it is dropped.
///
/// Guards nest: dropping the inner guard restores the frame of the outer one.
///
/// ```ignore
/// {
///     let _frame = UseReferenceFrame::new(RestFrame::new(&anchor));
///     // every kinematic variable now reports quantities in the anchor's rest frame
/// }
/// // back to the previous frame
/// ```
#[must_use = "the frame is deactivated as soon as the guard is dropped"]
pub struct UseReferenceFrame {
    // the stack is thread-local, so the guard must be dropped on the thread that created it
    _not_send: PhantomData<*const ()>,
}

impl UseReferenceFrame {
    /// Activate a frame.
    pub fn new<F: ReferenceFrame + 'static>(frame: F) -> Self {
        Self::from_boxed(Box::new(frame))
    }
    /// Activate an already boxed frame.
    pub fn from_boxed(frame: Box<dyn ReferenceFrame>) -> Self {
        FRAME_STACK.with(|stack| stack.borrow_mut().push(frame));
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for UseReferenceFrame {
    fn drop(&mut self) {
        FRAME_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
