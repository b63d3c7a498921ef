//! # varman
//!
//! `varman` evaluates named, composable quantities ("variables") on reconstructed particles.
//! Variables are requested by string expression from a [`Manager`], which resolves plain
//! names like `"px"` as well as nested meta-variable expressions like
//! `"useCMSFrame(daughter(1, E))"` into a bound [`Var`](crate::manager::Var). Evaluation is
//! aware of the current [`ReferenceFrame`](crate::frame::ReferenceFrame), can walk the
//! generated (MC truth) decay graph, combine detector PID likelihoods, and aggregate over
//! named particle lists.
//!
//! ```ignore
//! use varman::prelude::*;
//!
//! let manager = Manager::default();
//! let var = manager.get_variable("useCMSFrame(p)");
//! let value = var.evaluate(&event, Some(&event.particles[0])).as_f64();
//! ```
//!
//! Configuration problems (unknown names, wrong argument counts or types) are fatal when a
//! variable is resolved. Missing data discovered while evaluating (no MC match, daughter index
//! out of range, no PID likelihood) yields `NaN` or the documented sentinel value instead.
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use thiserror::Error;

/// Bunch parameters of the collider and the nominal interaction point.
pub mod config;
/// Reconstructed particles, generated (MC) particles, PID likelihoods and the event store.
pub mod data;
/// Formula and cut sub-languages used inside variable expressions.
pub mod expression;
/// Reference frames and the scoped current-frame stack.
pub mod frame;
/// The variable registry, [`Var`](crate::manager::Var) records and expression resolution.
pub mod manager;
/// Argument splitting and generalized daughter index paths.
pub mod parser;
/// Utility functions, enums, and traits
pub mod utils;
/// Every variable and meta-variable known to the [`Manager`].
pub mod variables;

/// Commonly used structs and traits.
pub mod prelude {
    pub use crate::config::BeamParameters;
    pub use crate::data::{
        Event, MCParticle, MCParticleGraph, MCStatus, PIDLikelihood, Particle, ParticleList,
    };
    pub use crate::frame::{
        CMSFrame, CMSRotationFrame, LabFrame, ReferenceFrame, RestFrame, RotationFrame,
        UseReferenceFrame,
    };
    pub use crate::manager::{Manager, Var, VarValue};
    pub use crate::utils::enums::{Detector, FlavorType, Hypothesis, ParticleSource};
    pub use crate::utils::vectors::{FourMomentum, ThreeMomentum, Vec3, Vec4};
    pub use crate::{VarmanError, VarmanResult};
}

pub use crate::config::BeamParameters;
pub use crate::data::{Event, MCParticle, MCParticleGraph, PIDLikelihood, Particle, ParticleList};
pub use crate::manager::{Manager, Var, VarValue};
pub use crate::utils::vectors::{Vec3, Vec4};

pub type VarmanResult<T> = Result<T, VarmanError>;

/// The error type used by all `varman` internal methods
#[derive(Error, Debug)]
pub enum VarmanError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`serde_json::Error`].
    #[error("JSON Error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// An error which occurs when two variables are registered under the same name by the same
    /// [`Manager`].
    #[error("A variable by the name \"{name}\" is already registered by this manager!")]
    RegistrationError {
        /// Name of the variable which is already registered
        name: String,
    },
    /// An error which occurs when an expression names neither a registered variable nor a
    /// meta-variable.
    #[error("No registered variable or meta-variable with name \"{name}\"!")]
    VariableNotFoundError {
        /// Name which failed lookup
        name: String,
    },
    /// An error which occurs when a meta-variable is given the wrong number of arguments.
    #[error("Meta-variable \"{name}\" expects {expected} argument(s), but {found} were given!")]
    ArgumentCountError {
        /// Name of the meta-variable
        name: String,
        /// A description of the accepted argument count
        expected: String,
        /// The number of arguments actually given
        found: usize,
    },
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into a number or an enum variant.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// An error which occurs when an argument has the right type but an unusable value.
    #[error("Invalid argument for \"{name}\": {reason}")]
    InvalidArgument {
        /// Name of the meta-variable
        name: String,
        /// What was wrong with the argument
        reason: String,
    },
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}
