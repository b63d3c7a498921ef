use indexmap::IndexMap;
use lazy_static::lazy_static;

/// Static properties of a particle species.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticleData {
    /// Name of the particle with a positive PDG code
    pub name: &'static str,
    /// Name of the antiparticle (equal to `name` for self-conjugate states)
    pub anti_name: &'static str,
    /// Nominal mass in GeV
    pub mass: f64,
    /// Electric charge of the particle with a positive PDG code, in units of $`e`$
    pub charge: f64,
}

macro_rules! species {
    ($table:ident, $code:expr, $name:expr, $anti:expr, $mass:expr, $charge:expr) => {
        $table.insert(
            $code,
            ParticleData {
                name: $name,
                anti_name: $anti,
                mass: $mass,
                charge: $charge,
            },
        );
    };
}

lazy_static! {
    static ref PDG_TABLE: IndexMap<i32, ParticleData> = {
        let mut t = IndexMap::new();
        species!(t, 11, "e-", "e+", 0.000510998950, -1.0);
        species!(t, 12, "nu_e", "anti-nu_e", 0.0, 0.0);
        species!(t, 13, "mu-", "mu+", 0.1056583755, -1.0);
        species!(t, 14, "nu_mu", "anti-nu_mu", 0.0, 0.0);
        species!(t, 15, "tau-", "tau+", 1.77686, -1.0);
        species!(t, 16, "nu_tau", "anti-nu_tau", 0.0, 0.0);
        species!(t, 22, "gamma", "gamma", 0.0, 0.0);
        species!(t, 111, "pi0", "pi0", 0.1349768, 0.0);
        species!(t, 113, "rho0", "rho0", 0.77526, 0.0);
        species!(t, 130, "K_L0", "K_L0", 0.497611, 0.0);
        species!(t, 211, "pi+", "pi-", 0.13957039, 1.0);
        species!(t, 221, "eta", "eta", 0.547862, 0.0);
        species!(t, 223, "omega", "omega", 0.78266, 0.0);
        species!(t, 310, "K_S0", "K_S0", 0.497611, 0.0);
        species!(t, 311, "K0", "anti-K0", 0.497611, 0.0);
        species!(t, 313, "K*0", "anti-K*0", 0.89555, 0.0);
        species!(t, 321, "K+", "K-", 0.493677, 1.0);
        species!(t, 333, "phi", "phi", 1.019461, 0.0);
        species!(t, 411, "D+", "D-", 1.86966, 1.0);
        species!(t, 413, "D*+", "D*-", 2.01026, 1.0);
        species!(t, 421, "D0", "anti-D0", 1.86484, 0.0);
        species!(t, 423, "D*0", "anti-D*0", 2.00685, 0.0);
        species!(t, 431, "D_s+", "D_s-", 1.96835, 1.0);
        species!(t, 443, "J/psi", "J/psi", 3.096900, 0.0);
        species!(t, 511, "B0", "anti-B0", 5.27966, 0.0);
        species!(t, 521, "B+", "B-", 5.27934, 1.0);
        species!(t, 531, "B_s0", "anti-B_s0", 5.36688, 0.0);
        species!(t, 2112, "n0", "anti-n0", 0.93956542052, 0.0);
        species!(t, 2212, "p+", "anti-p-", 0.93827208816, 1.0);
        species!(t, 3122, "Lambda0", "anti-Lambda0", 1.115683, 0.0);
        species!(t, 300553, "Upsilon(4S)", "Upsilon(4S)", 10.5794, 0.0);
        species!(t, 1000010020, "deuteron", "anti-deuteron", 1.87561294257, 1.0);
        t
    };
}

/// PDG code of the $`\Upsilon(4S)`$.
pub const UPSILON_4S: i32 = 300553;
/// PDG code of the photon.
pub const PHOTON: i32 = 22;
/// PDG code of the $`K^0_L`$.
pub const K_LONG: i32 = 130;
/// PDG code of the $`K^0_S`$.
pub const K_SHORT: i32 = 310;
/// PDG code of the electron.
pub const ELECTRON: i32 = 11;

/// Look up the species data for a PDG code (antiparticles share the entry of the particle).
pub fn lookup(pdg: i32) -> Option<&'static ParticleData> {
    PDG_TABLE.get(&pdg.abs())
}

/// Nominal mass of the species, if known.
pub fn mass(pdg: i32) -> Option<f64> {
    lookup(pdg).map(|d| d.mass)
}

/// Charge of the species, sign-flipped for antiparticles.
pub fn charge(pdg: i32) -> Option<f64> {
    lookup(pdg).map(|d| if pdg < 0 { -d.charge } else { d.charge })
}

/// Name of the species (or antiparticle name for negative codes).
pub fn name(pdg: i32) -> Option<&'static str> {
    lookup(pdg).map(|d| if pdg < 0 { d.anti_name } else { d.name })
}

/// PDG code for a particle name, if known.
pub fn code(name: &str) -> Option<i32> {
    let name = name.trim();
    PDG_TABLE.iter().find_map(|(code, d)| {
        if d.name == name {
            Some(*code)
        } else if d.anti_name == name {
            Some(-*code)
        } else {
            None
        }
    })
}

/// `true` for neutrinos of any flavor.
pub fn is_neutrino(pdg: i32) -> bool {
    matches!(pdg.abs(), 12 | 14 | 16)
}
