//! Building blocks of thermodynamic state functions.
//!
//! A [`ThermoContribution`] is a small stateless strategy: during frame
//! construction it reads named quantities from the shared property table,
//! publishes new ones, registers the parameters it needs, and may declare
//! positivity bounds. Contributions run strictly in the user-declared order;
//! an input that no earlier contribution published is an assembly error.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::AssemblyError;
use crate::quantity::{QResult, Quantity};
use crate::species::SpeciesDefinition;
use crate::structures::{Nested, NestedQuantity};
use crate::thermo::state::InitialState;
use crate::units::parse_unit;

/// Numeric property values of one frame evaluation, keyed by property name.
pub type NumericProps = BTreeMap<String, Vec<f64>>;

/// The shared property table a frame threads through its contributions.
#[derive(Debug, Default)]
pub struct PropertyMap {
    entries: BTreeMap<String, Quantity>,
    context: String,
}

impl PropertyMap {
    pub fn new() -> PropertyMap {
        PropertyMap::default()
    }

    /// Name of the contribution currently defining, for error reporting.
    pub(crate) fn set_context(&mut self, context: &str) {
        self.context = context.to_string();
    }

    /// Read a required input property.
    pub fn require(&self, name: &str) -> Result<Quantity, AssemblyError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| AssemblyError::MissingRequirement {
                contribution: self.context.clone(),
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Publish or overwrite a property.
    pub fn set(&mut self, name: &str, quantity: Quantity) {
        self.entries.insert(name.to_string(), quantity);
    }

    /// Add to an existing property, or publish it if absent.
    pub fn add_to(&mut self, name: &str, quantity: QResult) -> Result<(), AssemblyError> {
        let quantity = quantity?;
        let updated = match self.entries.get(name) {
            Some(existing) => (existing + &quantity)?,
            None => quantity,
        };
        self.entries.insert(name.to_string(), updated);
        Ok(())
    }

    /// Subtract from an existing property, or publish the negation.
    pub fn sub_from(&mut self, name: &str, quantity: QResult) -> Result<(), AssemblyError> {
        self.add_to(name, quantity.map(|q| -&q))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Quantity)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn into_entries(self) -> BTreeMap<String, Quantity> {
        self.entries
    }
}

/// Positivity bounds collected while a frame is defined, in declaration
/// order. The order is semantically meaningful: the solver's relax chain
/// fires in the same sequence.
#[derive(Debug, Default)]
pub struct BoundSet {
    entries: Vec<(String, Quantity)>,
    context: String,
}

impl BoundSet {
    pub fn new() -> BoundSet {
        BoundSet::default()
    }

    pub(crate) fn set_context(&mut self, context: &str) {
        self.context = context.to_string();
    }

    /// Declare that `quantity` must stay strictly positive.
    pub fn add(&mut self, name: &str, quantity: Quantity) {
        let qualified = if self.context.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.context, name)
        };
        self.entries.push((qualified, quantity));
    }

    pub fn entries(&self) -> &[(String, Quantity)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(String, Quantity)> {
        self.entries
    }
}

/// Parameters of one contribution: either freshly created symbols (frame
/// construction) or quantities supplied from a parameter store (material
/// instantiation). The registered structure is recorded either way, so a
/// frame can report its exact parameter needs.
#[derive(Debug, Default)]
pub struct ParameterDictionary {
    prefix: String,
    supply: Option<NestedQuantity>,
    structure: Nested<String>,
    used: NestedQuantity,
}

impl ParameterDictionary {
    /// Fresh symbol mode, `prefix` qualifying the symbol names.
    pub fn new(prefix: &str) -> ParameterDictionary {
        ParameterDictionary {
            prefix: prefix.to_string(),
            ..ParameterDictionary::default()
        }
    }

    /// Supplied mode: `register_*` calls resolve against `supply` instead
    /// of creating symbols.
    pub fn with_supply(prefix: &str, supply: NestedQuantity) -> ParameterDictionary {
        ParameterDictionary {
            prefix: prefix.to_string(),
            supply: Some(supply),
            ..ParameterDictionary::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.structure.is_empty()
    }

    /// The unit skeleton of everything registered so far.
    pub fn structure(&self) -> &Nested<String> {
        &self.structure
    }

    /// The quantities actually used (symbols or supplied values).
    pub fn used(&self) -> &NestedQuantity {
        &self.used
    }

    fn resolve(&mut self, path: &[&str], unit: &str) -> Result<Quantity, AssemblyError> {
        let dimension = parse_unit(unit)?.dimension;
        let quantity = match &self.supply {
            Some(supply) => {
                let leaf = supply
                    .get(path)
                    .and_then(Nested::as_leaf)
                    .ok_or_else(|| {
                        AssemblyError::Configuration(format!(
                            "parameter '{}/{}' not supplied",
                            self.prefix,
                            path.join("/")
                        ))
                    })?;
                if *leaf.dimension() != dimension {
                    return Err(AssemblyError::Quantity(
                        crate::error::QuantityError::dimensions(
                            dimension.to_string(),
                            leaf.dimension().to_string(),
                        )
                        .with_context(format!("parameter {}/{}", self.prefix, path.join("/"))),
                    ));
                }
                leaf.clone()
            }
            None => {
                let name = format!("{}.{}", self.prefix, path.join("."));
                Quantity::symbol(&name, unit)?
            }
        };
        self.structure.insert(path, unit.to_string());
        self.used.insert(path, quantity.clone());
        Ok(quantity)
    }

    /// Register a scalar parameter and return its quantity.
    pub fn register_scalar(&mut self, key: &str, unit: &str) -> Result<Quantity, AssemblyError> {
        self.resolve(&[key], unit)
    }

    /// Register one parameter per species and return the stacked vector.
    pub fn register_vector(
        &mut self,
        key: &str,
        species: &[String],
        unit: &str,
    ) -> Result<Quantity, AssemblyError> {
        let mut parts = Vec::with_capacity(species.len());
        for name in species {
            parts.push(self.resolve(&[key, name.as_str()], unit)?);
        }
        Ok(crate::quantity::qvertcat(&parts)?)
    }

    /// Register a sparse per-pair parameter, returning `(i, j, quantity)`
    /// entries in the order of `pairs`.
    pub fn register_sparse_matrix(
        &mut self,
        key: &str,
        pairs: &[(String, String)],
        unit: &str,
    ) -> Result<Vec<(String, String, Quantity)>, AssemblyError> {
        let mut entries = Vec::with_capacity(pairs.len());
        for (first, second) in pairs {
            let quantity = self.resolve(&[key, first.as_str(), second.as_str()], unit)?;
            entries.push((first.clone(), second.clone(), quantity));
        }
        Ok(entries)
    }
}

/// Construction context handed to a contribution factory.
#[derive(Debug, Clone)]
pub struct ContributionSetup {
    /// Ordered species names of the frame.
    pub species: Vec<String>,
    /// Species definitions in the same order.
    pub species_defs: Vec<SpeciesDefinition>,
    /// The `options` map from the frame structure, `Value::Null` if absent.
    pub options: Value,
}

impl ContributionSetup {
    /// Index of a species name.
    pub fn species_index(&self, name: &str) -> Option<usize> {
        self.species.iter().position(|s| s == name)
    }

    /// A required string option, e.g. the `target` of a mixing rule.
    pub fn required_option(&self, key: &str) -> Result<String, AssemblyError> {
        self.options
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AssemblyError::Configuration(format!("missing contribution option '{key}'"))
            })
    }

    /// An optional string option.
    pub fn string_option(&self, key: &str) -> Option<String> {
        self.options
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// An optional list of species pairs, e.g. binary interaction entries.
    pub fn pair_option(&self, key: &str) -> Result<Vec<(String, String)>, AssemblyError> {
        let Some(value) = self.options.get(key) else {
            return Ok(Vec::new());
        };
        let list = value.as_array().ok_or_else(|| {
            AssemblyError::Configuration(format!("option '{key}' must be a list of pairs"))
        })?;
        let mut pairs = Vec::with_capacity(list.len());
        for entry in list {
            let pair = entry.as_array().filter(|p| p.len() == 2).ok_or_else(|| {
                AssemblyError::Configuration(format!("option '{key}' must contain pairs"))
            })?;
            let mut names = Vec::with_capacity(2);
            for item in pair {
                let name = item.as_str().ok_or_else(|| {
                    AssemblyError::Configuration(format!("option '{key}' pair entries must be species names"))
                })?;
                if !self.species.iter().any(|s| s == name) {
                    return Err(AssemblyError::Configuration(format!(
                        "option '{key}' references unknown species '{name}'"
                    )));
                }
                names.push(name.to_string());
            }
            pairs.push((names[0].clone(), names[1].clone()));
        }
        Ok(pairs)
    }
}

/// A composable building block of a thermodynamic state function.
pub trait ThermoContribution {
    /// Build this contribution's expressions on the shared property table.
    fn define(
        &self,
        res: &mut PropertyMap,
        bounds: &mut BoundSet,
        par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError>;

    /// Vector properties published here, with their index keys.
    fn declared_vectors(&self) -> Vec<(String, Vec<String>)> {
        Vec::new()
    }

    /// Post-step projection hook. After the solver applied a bound-limited
    /// step, each contribution may mutate the freshly updated state slice in
    /// place, e.g. to keep a cubic EOS on its phase root. The default does
    /// nothing.
    fn relax(&self, _props: &NumericProps, _slice: &mut [f64]) {}

    /// Provide the raw state for given `(T, p, n)` if this contribution
    /// knows how; queried top-down for non-Gibbs coordinates.
    fn initial_state(&self, _state: &InitialState, _props: &NumericProps) -> Option<Vec<f64>> {
        None
    }
}
