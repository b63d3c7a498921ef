use std::collections::VecDeque;

use crate::{
    utils::{
        pdg,
        vectors::{ThreeMomentum, Vec3, Vec4},
    },
    VarmanError, VarmanResult,
};

/// Status bits of a generated particle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MCStatus {
    /// Created by the event generator (not by the detector simulation)
    Primary = 1,
    /// Stable at the end of the generator step
    StableInGenerator = 2,
    /// Left the detector volume
    LeftDetector = 4,
    /// Stopped inside the detector
    StoppedInDetector = 8,
    /// Virtual (off-shell) intermediate state
    IsVirtual = 16,
    /// Beam particle or other initial state
    Initial = 32,
    /// Initial-state radiation
    IsISR = 64,
    /// Final-state radiation
    IsFSR = 128,
    /// Radiation added by PHOTOS
    IsPHOTOS = 256,
}

impl MCStatus {
    /// The bit value of the flag.
    pub fn bit(&self) -> u32 {
        *self as u32
    }
}

/// A generated particle.
///
/// Inside a finalized list, `mother` and `daughters` are indices into the same list.
#[derive(Clone, Debug, PartialEq)]
pub struct MCParticle {
    /// Position in the finalized list
    pub index: usize,
    /// PDG code
    pub pdg: i32,
    /// Bitwise OR of [`MCStatus`] flags
    pub status: u32,
    /// Mass in GeV
    pub mass: f64,
    /// Energy in GeV
    pub energy: f64,
    /// Momentum in GeV
    pub momentum: Vec3,
    /// Production vertex in cm
    pub production_vertex: Vec3,
    /// Decay vertex in cm
    pub decay_vertex: Vec3,
    /// Production time in ns
    pub production_time: f64,
    /// Decay time in ns
    pub decay_time: f64,
    /// Charge in units of $`e`$
    pub charge: f64,
    /// Index of the mother
    pub mother: Option<usize>,
    /// Indices of the daughters (contiguous after finalization)
    pub daughters: Vec<usize>,
}

impl MCParticle {
    /// Create a particle at rest with the nominal mass and charge of its species.
    pub fn new(pdg: i32) -> Self {
        let mass = pdg::mass(pdg).unwrap_or(0.0);
        Self {
            index: 0,
            pdg,
            status: 0,
            mass,
            energy: mass,
            momentum: Vec3::zeros(),
            production_vertex: Vec3::zeros(),
            decay_vertex: Vec3::zeros(),
            production_time: 0.0,
            decay_time: 0.0,
            charge: pdg::charge(pdg).unwrap_or(0.0),
            mother: None,
            daughters: Vec::new(),
        }
    }
    /// Set the momentum, recomputing the energy from the mass.
    pub fn with_momentum(mut self, momentum: Vec3) -> Self {
        self.momentum = momentum;
        self.energy = momentum.with_mass(self.mass)[0];
        self
    }
    /// Set the mass, recomputing the energy from the momentum.
    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self.energy = self.momentum.with_mass(mass)[0];
        self
    }
    /// Set energy and momentum directly.
    pub fn with_p4(mut self, p4: Vec4) -> Self {
        self.energy = p4[0];
        self.momentum = Vec3::new(p4[1], p4[2], p4[3]);
        self
    }
    /// Set the status bits.
    pub fn with_status(mut self, status: u32) -> Self {
        self.status = status;
        self
    }
    /// Set the production vertex.
    pub fn with_production_vertex(mut self, vertex: Vec3) -> Self {
        self.production_vertex = vertex;
        self
    }
    /// Set the decay vertex.
    pub fn with_decay_vertex(mut self, vertex: Vec3) -> Self {
        self.decay_vertex = vertex;
        self
    }
    /// Set production and decay times.
    pub fn with_times(mut self, production_time: f64, decay_time: f64) -> Self {
        self.production_time = production_time;
        self.decay_time = decay_time;
        self
    }
    /// The four-momentum `(E, px, py, pz)`.
    pub fn p4(&self) -> Vec4 {
        self.momentum.with_energy(self.energy)
    }
    /// Check a status flag.
    pub fn has_status(&self, status: MCStatus) -> bool {
        self.status & status.bit() != 0
    }
    /// Proper lifetime in the lab frame (decay time minus production time).
    pub fn lifetime(&self) -> f64 {
        self.decay_time - self.production_time
    }
}

/// An incrementally built forest of generated particles.
///
/// Particles are added with [`add_particle`](MCParticleGraph::add_particle) and linked with
/// [`comes_from`](MCParticleGraph::comes_from); [`generate_list`](MCParticleGraph::generate_list)
/// then produces the final, immutable list in which all roots come first and the daughters of
/// every particle occupy a contiguous range of indices.
#[derive(Clone, Debug, Default)]
pub struct MCParticleGraph {
    nodes: Vec<MCParticle>,
    mothers: Vec<Option<usize>>,
}

impl MCParticleGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }
    /// Add a particle and return its id within the graph.
    pub fn add_particle(&mut self, particle: MCParticle) -> usize {
        self.nodes.push(particle);
        self.mothers.push(None);
        self.nodes.len() - 1
    }
    /// Number of particles in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    /// `true` if the graph has no particles.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    /// Declare `daughter` to be produced in the decay of `mother`.
    ///
    /// # Errors
    ///
    /// Both ids must exist, differ, and the daughter must not already have a mother.
    pub fn comes_from(&mut self, daughter: usize, mother: usize) -> VarmanResult<()> {
        if daughter >= self.nodes.len() || mother >= self.nodes.len() {
            return Err(VarmanError::Custom(format!(
                "MC graph has no particle with id {}",
                daughter.max(mother)
            )));
        }
        if daughter == mother {
            return Err(VarmanError::Custom(format!(
                "MC particle {daughter} cannot decay into itself"
            )));
        }
        if let Some(existing) = self.mothers[daughter] {
            return Err(VarmanError::Custom(format!(
                "MC particle {daughter} already comes from {existing}"
            )));
        }
        self.mothers[daughter] = Some(mother);
        Ok(())
    }
    /// Finalize the graph into a list ordered breadth-first from the roots.
    ///
    /// # Errors
    ///
    /// Particles which are not reachable from a root (decay loops) are rejected.
    pub fn generate_list(&self) -> VarmanResult<Vec<MCParticle>> {
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (id, mother) in self.mothers.iter().enumerate() {
            if let Some(m) = mother {
                children[*m].push(id);
            }
        }
        let mut order: Vec<usize> = Vec::with_capacity(self.nodes.len());
        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&id| self.mothers[id].is_none())
            .collect();
        order.extend(queue.iter().copied());
        while let Some(id) = queue.pop_front() {
            for &child in &children[id] {
                order.push(child);
                queue.push_back(child);
            }
        }
        if order.len() != self.nodes.len() {
            return Err(VarmanError::Custom(
                "MC graph contains a decay loop".to_string(),
            ));
        }
        let mut position = vec![0; self.nodes.len()];
        for (final_index, &id) in order.iter().enumerate() {
            position[id] = final_index;
        }
        Ok(order
            .iter()
            .enumerate()
            .map(|(final_index, &id)| {
                let mut particle = self.nodes[id].clone();
                particle.index = final_index;
                particle.mother = self.mothers[id].map(|m| position[m]);
                particle.daughters = children[id].iter().map(|&c| position[c]).collect();
                particle
            })
            .collect())
    }
}
