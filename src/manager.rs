use std::{
    fmt::{Debug, Display},
    sync::Arc,
};

use indexmap::IndexMap;
use log::{debug, error};
use parking_lot::RwLock;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
    config::BeamParameters,
    data::{Event, Particle},
    expression::{Cut, Formula},
    frame::{self, UseReferenceFrame},
    parser::{parse_call, parse_number, Arguments},
    variables, VarmanError, VarmanResult,
};

/// The value of a variable evaluated on a particle or an event.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum VarValue {
    /// A floating-point value
    Double(f64),
    /// An integer value
    Int(i64),
    /// A boolean value
    Bool(bool),
}

impl VarValue {
    /// The value as a float; booleans become `1.0` or `0.0`.
    pub fn as_f64(&self) -> f64 {
        match self {
            VarValue::Double(v) => *v,
            VarValue::Int(v) => *v as f64,
            VarValue::Bool(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
    /// The value as an integer; floats are truncated towards zero (NaN becomes `0`).
    pub fn as_int(&self) -> i64 {
        match self {
            VarValue::Double(v) => *v as i64,
            VarValue::Int(v) => *v,
            VarValue::Bool(v) => i64::from(*v),
        }
    }
    /// The value as a truth value; numbers are `true` when nonzero.
    pub fn as_bool(&self) -> bool {
        match self {
            VarValue::Double(v) => *v != 0.0,
            VarValue::Int(v) => *v != 0,
            VarValue::Bool(v) => *v,
        }
    }
}

impl Display for VarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarValue::Double(v) => write!(f, "{}", v),
            VarValue::Int(v) => write!(f, "{}", v),
            VarValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for VarValue {
    fn from(value: f64) -> Self {
        VarValue::Double(value)
    }
}

impl From<i64> for VarValue {
    fn from(value: i64) -> Self {
        VarValue::Int(value)
    }
}

impl From<bool> for VarValue {
    fn from(value: bool) -> Self {
        VarValue::Bool(value)
    }
}

/// The function behind a [`Var`]. The particle is [`None`] for event-level evaluation.
pub type VarFunction = Arc<dyn Fn(&Event, Option<&Particle>) -> VarValue + Send + Sync>;

/// Box a closure as a [`VarFunction`].
pub fn var_function<F>(f: F) -> VarFunction
where
    F: Fn(&Event, Option<&Particle>) -> VarValue + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A factory which binds the arguments of a meta-variable call into a [`VarFunction`].
pub type MetaFunction =
    Arc<dyn Fn(&Manager, &Arguments) -> VarmanResult<VarFunction> + Send + Sync>;

/// A named, bound variable.
#[derive(Clone)]
pub struct Var {
    /// The expression this variable was resolved from
    pub name: String,
    /// A human-readable description
    pub description: String,
    function: VarFunction,
}

impl Debug for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Var({:?})", self.name)
    }
}

impl Var {
    /// Bind a function to a name.
    pub fn new(name: &str, description: &str, function: VarFunction) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            function,
        }
    }
    /// Evaluate on a particle (or on the event alone if `particle` is [`None`]).
    pub fn evaluate(&self, event: &Event, particle: Option<&Particle>) -> VarValue {
        (self.function)(event, particle)
    }
    /// Evaluate and convert to a float.
    pub fn value(&self, event: &Event, particle: Option<&Particle>) -> f64 {
        self.evaluate(event, particle).as_f64()
    }
    /// Evaluate on every particle of a named list, in the frame which is current on the calling
    /// thread.
    ///
    /// # Panics
    ///
    /// Panics if the event has no list with the given name.
    #[cfg(feature = "rayon")]
    pub fn evaluate_list(&self, event: &Event, list_name: &str) -> Vec<f64> {
        let list = event.list(list_name).unwrap_or_else(|| missing_list(list_name));
        let frame = frame::current();
        list.indices
            .par_iter()
            .map(|&index| {
                let _frame = UseReferenceFrame::from_boxed(frame.clone());
                self.value(event, event.particles.get(index))
            })
            .collect()
    }
    /// Evaluate on every particle of a named list, in the frame which is current on the calling
    /// thread.
    ///
    /// # Panics
    ///
    /// Panics if the event has no list with the given name.
    #[cfg(not(feature = "rayon"))]
    pub fn evaluate_list(&self, event: &Event, list_name: &str) -> Vec<f64> {
        let list = event.list(list_name).unwrap_or_else(|| missing_list(list_name));
        let frame = frame::current();
        list.indices
            .iter()
            .map(|&index| {
                let _frame = UseReferenceFrame::from_boxed(frame.clone());
                self.value(event, event.particles.get(index))
            })
            .collect()
    }
}

/// Abort evaluation because a requested particle list does not exist.
pub fn missing_list(name: &str) -> ! {
    error!("Particle list \"{}\" does not exist in this event", name);
    panic!("Particle list \"{name}\" does not exist in this event");
}

struct MetaVar {
    description: String,
    factory: MetaFunction,
}

/// A [`Cut`] whose variables have been resolved against a [`Manager`].
#[derive(Clone, Debug)]
pub struct CompiledCut {
    cut: Cut,
    vars: IndexMap<String, Arc<Var>>,
}

impl CompiledCut {
    /// Evaluate the cut on a particle (or on the event alone).
    pub fn check(&self, event: &Event, particle: Option<&Particle>) -> bool {
        self.cut.check(&|name| {
            self.vars
                .get(name)
                .map_or(f64::NAN, |var| var.value(event, particle))
        })
    }
    /// `true` for the empty cut.
    pub fn is_always(&self) -> bool {
        self.cut == Cut::Always
    }
}

/// A [`Formula`] whose variables have been resolved against a [`Manager`].
#[derive(Clone, Debug)]
pub struct CompiledFormula {
    formula: Formula,
    vars: IndexMap<String, Arc<Var>>,
}

impl CompiledFormula {
    /// Evaluate the formula on a particle (or on the event alone).
    pub fn evaluate(&self, event: &Event, particle: Option<&Particle>) -> f64 {
        self.formula.evaluate(&|name| {
            self.vars
                .get(name)
                .map_or(f64::NAN, |var| var.value(event, particle))
        })
    }
}

/// The registry of every variable and meta-variable, and the resolver of variable expressions.
///
/// Plain variables are looked up by name; expressions of the form `name(arg, ...)` are handed
/// to the meta-variable registered under `name`, which binds its arguments (usually resolving
/// further expressions through the same manager) into a new [`Var`]. Resolved expressions are
/// cached, so requesting the same expression twice returns the same [`Var`].
pub struct Manager {
    beam: Arc<BeamParameters>,
    variables: IndexMap<String, Arc<Var>>,
    meta_variables: IndexMap<String, MetaVar>,
    cache: RwLock<IndexMap<String, Arc<Var>>>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new(BeamParameters::default())
    }
}

impl Manager {
    /// Create a manager with every built-in variable registered, using the given beam setup
    /// for the center-of-mass frame and beam-constrained quantities.
    ///
    /// # Panics
    ///
    /// Panics if two built-in variables share a name.
    pub fn new(beam: BeamParameters) -> Self {
        let mut manager = Self::empty(beam);
        if let Err(e) = variables::register_all(&mut manager) {
            panic!("Built-in variable table is inconsistent: {e}");
        }
        debug!(
            "Registered {} variables and {} meta-variables",
            manager.variables.len(),
            manager.meta_variables.len()
        );
        manager
    }
    /// Create a manager with no variables at all.
    pub fn empty(beam: BeamParameters) -> Self {
        Self {
            beam: Arc::new(beam),
            variables: IndexMap::new(),
            meta_variables: IndexMap::new(),
            cache: RwLock::new(IndexMap::new()),
        }
    }
    /// The beam parameters this manager was built with.
    pub fn beam(&self) -> Arc<BeamParameters> {
        self.beam.clone()
    }

    /// Register a plain variable.
    ///
    /// # Errors
    ///
    /// The name must not already be registered, else this will return a
    /// [`RegistrationError`](VarmanError::RegistrationError).
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        function: VarFunction,
    ) -> VarmanResult<()> {
        if self.variables.contains_key(name) {
            return Err(VarmanError::RegistrationError {
                name: name.to_string(),
            });
        }
        self.variables.insert(
            name.to_string(),
            Arc::new(Var::new(name, description, function)),
        );
        Ok(())
    }
    /// Register a floating-point particle variable. Evaluating it without a particle gives NaN.
    pub fn register_double<F>(&mut self, name: &str, description: &str, f: F) -> VarmanResult<()>
    where
        F: Fn(&Event, &Particle) -> f64 + Send + Sync + 'static,
    {
        self.register(
            name,
            description,
            var_function(move |event, particle| {
                VarValue::Double(particle.map_or(f64::NAN, |p| f(event, p)))
            }),
        )
    }
    /// Register an integer particle variable. Evaluating it without a particle gives NaN.
    pub fn register_int<F>(&mut self, name: &str, description: &str, f: F) -> VarmanResult<()>
    where
        F: Fn(&Event, &Particle) -> i64 + Send + Sync + 'static,
    {
        self.register(
            name,
            description,
            var_function(move |event, particle| match particle {
                Some(p) => VarValue::Int(f(event, p)),
                None => VarValue::Double(f64::NAN),
            }),
        )
    }
    /// Register a boolean particle variable. Evaluating it without a particle gives NaN.
    pub fn register_bool<F>(&mut self, name: &str, description: &str, f: F) -> VarmanResult<()>
    where
        F: Fn(&Event, &Particle) -> bool + Send + Sync + 'static,
    {
        self.register(
            name,
            description,
            var_function(move |event, particle| match particle {
                Some(p) => VarValue::Bool(f(event, p)),
                None => VarValue::Double(f64::NAN),
            }),
        )
    }
    /// Register a variable which only depends on the event.
    pub fn register_event<F>(&mut self, name: &str, description: &str, f: F) -> VarmanResult<()>
    where
        F: Fn(&Event) -> f64 + Send + Sync + 'static,
    {
        self.register(
            name,
            description,
            var_function(move |event, _| VarValue::Double(f(event))),
        )
    }
    /// Register another name for an already registered variable.
    ///
    /// # Errors
    ///
    /// Returns a [`VariableNotFoundError`](VarmanError::VariableNotFoundError) if `target` is
    /// unknown, or a [`RegistrationError`](VarmanError::RegistrationError) if `alias` is taken.
    pub fn register_alias(&mut self, alias: &str, target: &str) -> VarmanResult<()> {
        let var = self
            .variables
            .get(target)
            .cloned()
            .ok_or_else(|| VarmanError::VariableNotFoundError {
                name: target.to_string(),
            })?;
        self.register(
            alias,
            &format!("alias for {target}: {}", var.description),
            var.function.clone(),
        )
    }
    /// Register a meta-variable, which is called as `name(arg, ...)`.
    ///
    /// # Errors
    ///
    /// The name must not already be registered as a meta-variable, else this will return a
    /// [`RegistrationError`](VarmanError::RegistrationError).
    pub fn register_meta<F>(
        &mut self,
        name: &str,
        description: &str,
        factory: F,
    ) -> VarmanResult<()>
    where
        F: Fn(&Manager, &Arguments) -> VarmanResult<VarFunction> + Send + Sync + 'static,
    {
        if self.meta_variables.contains_key(name) {
            return Err(VarmanError::RegistrationError {
                name: name.to_string(),
            });
        }
        self.meta_variables.insert(
            name.to_string(),
            MetaVar {
                description: description.to_string(),
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    /// Names of the registered plain variables, in registration order.
    pub fn variables(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }
    /// Names of the registered meta-variables, in registration order.
    pub fn meta_variables(&self) -> Vec<String> {
        self.meta_variables.keys().cloned().collect()
    }
    /// The description of a variable or meta-variable.
    pub fn description(&self, name: &str) -> Option<String> {
        self.variables
            .get(name)
            .map(|var| var.description.clone())
            .or_else(|| {
                self.meta_variables
                    .get(name)
                    .map(|meta| meta.description.clone())
            })
    }

    /// Resolve a variable expression.
    ///
    /// Resolution tries, in order: previously resolved expressions, plain variable names,
    /// numeric literals (which become constants), and meta-variable calls.
    ///
    /// # Errors
    ///
    /// Returns a [`VariableNotFoundError`](VarmanError::VariableNotFoundError) for unknown names
    /// and whatever error the meta-variable reports for bad arguments.
    pub fn try_get_variable(&self, expression: &str) -> VarmanResult<Arc<Var>> {
        let expression = expression.trim();
        let cached = self.cache.read().get(expression).cloned();
        if let Some(var) = cached {
            return Ok(var);
        }
        if let Some(var) = self.variables.get(expression) {
            return Ok(var.clone());
        }
        let var = if let Some(value) = parse_number(expression) {
            Var::new(
                expression,
                "constant",
                var_function(move |_, _| VarValue::Double(value)),
            )
        } else {
            let (name, args) = parse_call(expression)?;
            let (Some(args), Some(meta)) = (args, self.meta_variables.get(&name)) else {
                return Err(VarmanError::VariableNotFoundError {
                    name: expression.to_string(),
                });
            };
            let function = (meta.factory)(self, &Arguments::new(&name, &args))?;
            Var::new(expression, &meta.description, function)
        };
        Ok(self
            .cache
            .write()
            .entry(expression.to_string())
            .or_insert_with(|| Arc::new(var))
            .clone())
    }
    /// Resolve a variable expression.
    ///
    /// # Panics
    ///
    /// Any resolution error is a configuration error and aborts with a message naming the
    /// expression; use [`Manager::try_get_variable`] to handle it instead.
    pub fn get_variable(&self, expression: &str) -> Arc<Var> {
        match self.try_get_variable(expression) {
            Ok(var) => var,
            Err(e) => {
                error!("Could not resolve variable \"{}\": {}", expression, e);
                panic!("Could not resolve variable \"{expression}\": {e}");
            }
        }
    }
    /// Resolve several expressions at once.
    ///
    /// # Errors
    ///
    /// Fails on the first expression which cannot be resolved.
    pub fn try_get_variables<T: AsRef<str>>(
        &self,
        expressions: &[T],
    ) -> VarmanResult<Vec<Arc<Var>>> {
        expressions
            .iter()
            .map(|e| self.try_get_variable(e.as_ref()))
            .collect()
    }
    /// Resolve and evaluate an expression in one step.
    ///
    /// # Panics
    ///
    /// Panics like [`Manager::get_variable`] if the expression cannot be resolved.
    pub fn evaluate(&self, expression: &str, event: &Event, particle: Option<&Particle>) -> f64 {
        self.get_variable(expression).value(event, particle)
    }

    /// Parse a cut and resolve all of its variables.
    ///
    /// # Errors
    ///
    /// Returns parse errors of the cut and resolution errors of its variables.
    pub fn compile_cut(&self, cut: &str) -> VarmanResult<CompiledCut> {
        let cut = Cut::parse(cut)?;
        let vars = self.resolve_names(&cut.variable_names())?;
        Ok(CompiledCut { cut, vars })
    }
    /// Parse a formula and resolve all of its variables.
    ///
    /// # Errors
    ///
    /// Returns parse errors of the formula and resolution errors of its variables.
    pub fn compile_formula(&self, formula: &str) -> VarmanResult<CompiledFormula> {
        let formula = Formula::parse(formula)?;
        let vars = self.resolve_names(&formula.variables())?;
        Ok(CompiledFormula { formula, vars })
    }
    fn resolve_names(&self, names: &[String]) -> VarmanResult<IndexMap<String, Arc<Var>>> {
        names
            .iter()
            .map(|name| Ok((name.clone(), self.try_get_variable(name)?)))
            .collect()
    }
}
