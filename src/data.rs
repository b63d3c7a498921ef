use indexmap::IndexMap;
use nalgebra::{Matrix3, Matrix4, SMatrix};
use parking_lot::RwLock;

use crate::utils::{
    enums::{FlavorType, ParticleSource},
    pdg,
    vectors::{FourMomentum, Vec3, Vec4},
};

mod mc;
mod pid;

pub use mc::{MCParticle, MCParticleGraph, MCStatus};
pub use pid::PIDLikelihood;

/// A 7×7 covariance in `(px, py, pz, E, x, y, z)` order.
pub type Matrix7 = SMatrix<f64, 7, 7>;

/// A named key-value store of floating values attached to a [`Particle`] or an [`Event`].
///
/// The store can be written through a shared reference, so variables which cache their result
/// can do so while the event is borrowed immutably.
#[derive(Debug, Default)]
pub struct ExtraInfo(RwLock<IndexMap<String, f64>>);

impl Clone for ExtraInfo {
    fn clone(&self) -> Self {
        Self(RwLock::new(self.0.read().clone()))
    }
}

impl ExtraInfo {
    /// Get a stored value, or [`None`] if the key was never set.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.read().get(name).copied()
    }
    /// Store a value, overwriting any previous value under the same key.
    pub fn set(&self, name: &str, value: f64) {
        self.0.write().insert(name.to_string(), value);
    }
    /// Check if a key has been set.
    pub fn contains(&self, name: &str) -> bool {
        self.0.read().contains_key(name)
    }
    /// Remove a key, returning its value if present.
    pub fn remove(&self, name: &str) -> Option<f64> {
        self.0.write().shift_remove(name)
    }
    /// The stored keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.0.read().keys().cloned().collect()
    }
}

/// A reconstructed particle.
///
/// Momentum, vertex and covariance are always stored in the lab frame. Daughters refer to other
/// particles by their index in [`Event::particles`].
#[derive(Clone, Debug)]
pub struct Particle {
    /// Lab-frame four-momentum
    pub p4: Vec4,
    /// Lab-frame vertex (decay vertex for composites, point of closest approach for tracks)
    pub vertex: Vec3,
    /// Covariance in `(px, py, pz, E, x, y, z)` order
    pub error_matrix: Matrix7,
    /// Mass of the particle (invariant mass of the momentum unless set otherwise)
    pub mass: f64,
    /// p-value of the vertex fit (NaN if no fit was performed)
    pub pvalue: f64,
    /// PDG code of the particle hypothesis
    pub pdg: i32,
    /// Flavor type
    pub flavor: FlavorType,
    /// The kind of object this particle was created from
    pub source: ParticleSource,
    /// Index of the source object in its own array
    pub mdst_index: usize,
    /// Index in [`Event::particles`], set when the particle is added to an event
    pub index: Option<usize>,
    /// Indices of the daughters in [`Event::particles`]
    pub daughters: Vec<usize>,
    /// Index of the related [`PIDLikelihood`] in [`Event::likelihoods`]
    pub pid_likelihood: Option<usize>,
    /// Weighted relations to [`Event::mc_particles`]
    pub mc_relations: Vec<(usize, f64)>,
    /// Attached named values (user data and cached variable values)
    pub extra_info: ExtraInfo,
}

impl Particle {
    /// Create a particle from a four-momentum and a PDG code. The mass is set to the invariant
    /// mass of the momentum.
    pub fn new(p4: Vec4, pdg: i32) -> Self {
        let flavor = match pdg::lookup(pdg) {
            Some(data) if data.name == data.anti_name => FlavorType::Unflavored,
            Some(_) => FlavorType::Flavored,
            None => FlavorType::Unflavored,
        };
        Self {
            p4,
            vertex: Vec3::zeros(),
            error_matrix: Matrix7::zeros(),
            mass: p4.m(),
            pvalue: f64::NAN,
            pdg,
            flavor,
            source: ParticleSource::Undefined,
            mdst_index: 0,
            index: None,
            daughters: Vec::new(),
            pid_likelihood: None,
            mc_relations: Vec::new(),
            extra_info: ExtraInfo::default(),
        }
    }

    /// Create a charged track with the nominal mass of the given hypothesis.
    pub fn track(p4: Vec4, pdg: i32, mdst_index: usize) -> Self {
        let mut particle = Self::new(p4, pdg).with_source(ParticleSource::Track, mdst_index);
        if let Some(mass) = pdg::mass(pdg) {
            particle.mass = mass;
        }
        particle
    }

    /// Create a composite particle from daughters already stored in an [`Event`].
    pub fn composite(p4: Vec4, pdg: i32, daughters: Vec<usize>) -> Self {
        let mut particle = Self::new(p4, pdg).with_source(ParticleSource::Composite, 0);
        particle.daughters = daughters;
        particle
    }

    /// Create a particle view of a generated particle.
    pub fn from_mc(mc: &MCParticle) -> Self {
        let mut particle =
            Self::new(mc.p4(), mc.pdg).with_source(ParticleSource::MCParticle, mc.index);
        particle.vertex = mc.production_vertex;
        particle.mass = mc.mass;
        particle
    }

    /// Set the vertex.
    pub fn with_vertex(mut self, vertex: Vec3) -> Self {
        self.vertex = vertex;
        self
    }
    /// Set the full covariance.
    pub fn with_error_matrix(mut self, error_matrix: Matrix7) -> Self {
        self.error_matrix = error_matrix;
        self
    }
    /// Set the fit p-value.
    pub fn with_pvalue(mut self, pvalue: f64) -> Self {
        self.pvalue = pvalue;
        self
    }
    /// Set the source type and the index of the source object.
    pub fn with_source(mut self, source: ParticleSource, mdst_index: usize) -> Self {
        self.source = source;
        self.mdst_index = mdst_index;
        self
    }

    /// Electric charge in units of $`e`$ (zero for unknown species).
    pub fn charge(&self) -> f64 {
        pdg::charge(self.pdg).unwrap_or(0.0)
    }
    /// The `(px, py, pz, E)` block of the covariance.
    pub fn momentum_error_matrix(&self) -> Matrix4<f64> {
        self.error_matrix.fixed_view::<4, 4>(0, 0).into_owned()
    }
    /// The `(x, y, z)` block of the covariance.
    pub fn vertex_error_matrix(&self) -> Matrix3<f64> {
        self.error_matrix.fixed_view::<3, 3>(4, 4).into_owned()
    }
    /// The index of the best MC match: the generated particle itself for MC-backed particles,
    /// otherwise the relation with the highest weight.
    pub fn mc_match(&self) -> Option<usize> {
        if self.source == ParticleSource::MCParticle {
            return Some(self.mdst_index);
        }
        self.mc_relations
            .iter()
            .fold(None, |best: Option<(usize, f64)>, &(index, weight)| match best {
                Some((_, w)) if w >= weight => best,
                _ => Some((index, weight)),
            })
            .map(|(index, _)| index)
    }
    /// Weight of the best MC relation.
    pub fn mc_match_weight(&self) -> Option<f64> {
        self.mc_relations
            .iter()
            .map(|(_, w)| *w)
            .fold(None, |best: Option<f64>, w| Some(best.map_or(w, |b| b.max(w))))
    }
    /// The `i`th daughter, if present.
    pub fn daughter<'a>(&self, event: &'a Event, i: usize) -> Option<&'a Particle> {
        self.daughters.get(i).and_then(|&d| event.particles.get(d))
    }
    /// All daughters in order.
    pub fn daughter_particles<'a>(&self, event: &'a Event) -> Vec<&'a Particle> {
        self.daughters
            .iter()
            .filter_map(|&d| event.particles.get(d))
            .collect()
    }
    /// Final-state particles in the decay tree (the particle itself if it has no daughters).
    pub fn final_state_particles<'a>(&'a self, event: &'a Event) -> Vec<&'a Particle> {
        if self.daughters.is_empty() {
            return vec![self];
        }
        self.daughter_particles(event)
            .into_iter()
            .flat_map(|d| d.final_state_particles(event))
            .collect()
    }
    /// The `(source, index)` pairs of the detector objects used by this particle's final state.
    pub fn source_objects(&self, event: &Event) -> Vec<(ParticleSource, usize)> {
        self.final_state_particles(event)
            .into_iter()
            .filter(|p| p.source.has_source_object())
            .map(|p| (p.source, p.mdst_index))
            .collect()
    }
    /// `true` if any detector object is shared by the two particles.
    pub fn overlaps(&self, other: &Particle, event: &Event) -> bool {
        let mine = self.source_objects(event);
        other
            .source_objects(event)
            .iter()
            .any(|object| mine.contains(object))
    }
}

/// An ordered, named selection of particles stored in an [`Event`].
#[derive(Clone, Debug, Default)]
pub struct ParticleList {
    /// Indices into [`Event::particles`]
    pub indices: Vec<usize>,
}

impl ParticleList {
    /// Create a list from particle indices.
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }
    /// Number of particles in the list.
    pub fn len(&self) -> usize {
        self.indices.len()
    }
    /// `true` if the list holds no particles.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
    /// Check membership of a particle by its index in [`Event::particles`].
    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }
    /// Iterate over the particles in the list.
    pub fn iter<'a>(&'a self, event: &'a Event) -> impl Iterator<Item = &'a Particle> + 'a {
        self.indices.iter().filter_map(|&i| event.particles.get(i))
    }
}

/// Everything known about a single collision: reconstructed particles, generated particles, PID
/// likelihoods, named particle lists and event-level extra information.
#[derive(Clone, Debug, Default)]
pub struct Event {
    /// The particle arena
    pub particles: Vec<Particle>,
    /// Generated particles in generation order (see [`MCParticleGraph::generate_list`])
    pub mc_particles: Vec<MCParticle>,
    /// PID likelihood objects
    pub likelihoods: Vec<PIDLikelihood>,
    /// Named particle lists
    pub lists: IndexMap<String, ParticleList>,
    /// Event-level named values
    pub extra_info: ExtraInfo,
}

impl Event {
    /// Create an empty event.
    pub fn new() -> Self {
        Self::default()
    }
    /// Add a particle to the arena and return its index.
    pub fn add_particle(&mut self, mut particle: Particle) -> usize {
        let index = self.particles.len();
        particle.index = Some(index);
        self.particles.push(particle);
        index
    }
    /// Replace the generated particles with a finalized list. Each particle's `index` is set to
    /// its position in the list.
    pub fn set_mc_particles(&mut self, mut mc_particles: Vec<MCParticle>) {
        for (i, particle) in mc_particles.iter_mut().enumerate() {
            particle.index = i;
        }
        self.mc_particles = mc_particles;
    }
    /// Relate a particle to a generated particle with the given weight.
    pub fn add_mc_relation(&mut self, particle: usize, mc: usize, weight: f64) {
        if let Some(p) = self.particles.get_mut(particle) {
            p.mc_relations.push((mc, weight));
        }
    }
    /// Store a likelihood and relate it to a particle.
    pub fn add_likelihood(&mut self, particle: usize, likelihood: PIDLikelihood) -> usize {
        let index = self.likelihoods.len();
        self.likelihoods.push(likelihood);
        if let Some(p) = self.particles.get_mut(particle) {
            p.pid_likelihood = Some(index);
        }
        index
    }
    /// Store (or replace) a named particle list.
    pub fn add_list(&mut self, name: &str, indices: Vec<usize>) {
        self.lists
            .insert(name.to_string(), ParticleList::new(indices));
    }
    /// Look up a particle list by name.
    pub fn list(&self, name: &str) -> Option<&ParticleList> {
        self.lists.get(name)
    }
    /// The best-matched generated particle of a particle.
    pub fn mc_match(&self, particle: &Particle) -> Option<&MCParticle> {
        particle
            .mc_match()
            .and_then(|index| self.mc_particles.get(index))
    }
    /// The PID likelihood related to a particle.
    pub fn likelihood(&self, particle: &Particle) -> Option<&PIDLikelihood> {
        particle
            .pid_likelihood
            .and_then(|index| self.likelihoods.get(index))
    }
}
