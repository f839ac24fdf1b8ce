//! Sources and stores of thermodynamic parameters.
//!
//! A [`ThermoParameterStore`] hands symbol quantities to the materials that
//! share it and resolves their values from an ordered list of sources.
//! Lookup is deterministic first-match-wins in source order; sources added
//! later are lower-priority fallbacks, so adding a source never changes an
//! already-resolved lookup. The store is append-only during assembly and
//! read-only during solves.

use std::cell::RefCell;

use log::debug;
use serde_json::Value;

use crate::error::{AssemblyError, QuantityError};
use crate::quantity::Quantity;
use crate::structures::{parse_quantities_in_struct, Nested, NestedQuantity};
use crate::units::parse_unit;

/// Any source of thermodynamic parameters.
pub trait ThermoSource {
    /// The quantity at the given key path, if this source has it.
    fn get(&self, path: &[&str]) -> Option<Quantity>;
}

/// A source backed by a nested dictionary of quantities.
pub struct NestedThermoSource {
    data: NestedQuantity,
}

impl NestedThermoSource {
    pub fn new(data: NestedQuantity) -> NestedThermoSource {
        NestedThermoSource { data }
    }
}

impl ThermoSource for NestedThermoSource {
    fn get(&self, path: &[&str]) -> Option<Quantity> {
        self.data.get(path).and_then(Nested::as_leaf).cloned()
    }
}

/// A source defined by nested string leaves such as `"-241.826 kJ/mol"`,
/// e.g. straight from a parsed parameter file.
pub struct StringThermoSource {
    inner: NestedThermoSource,
}

impl StringThermoSource {
    pub fn new(data: &Value) -> Result<StringThermoSource, QuantityError> {
        Ok(StringThermoSource {
            inner: NestedThermoSource::new(parse_quantities_in_struct(data)?),
        })
    }
}

impl ThermoSource for StringThermoSource {
    fn get(&self, path: &[&str]) -> Option<Quantity> {
        self.inner.get(path)
    }
}

/// The store connecting thermodynamic models to their parameter values.
///
/// Materials request symbols for their frame's parameter structure; the
/// numeric layer later asks for the values of everything that was
/// requested.
pub struct ThermoParameterStore {
    name: String,
    sources: RefCell<Vec<(String, Box<dyn ThermoSource>)>>,
    symbols: RefCell<NestedQuantity>,
}

impl ThermoParameterStore {
    pub fn new(name: &str) -> ThermoParameterStore {
        ThermoParameterStore {
            name: name.to_string(),
            sources: RefCell::new(Vec::new()),
            symbols: RefCell::new(NestedQuantity::empty()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a source; earlier sources take priority.
    pub fn add_source(
        &self,
        name: &str,
        source: Box<dyn ThermoSource>,
    ) -> Result<(), AssemblyError> {
        let mut sources = self.sources.borrow_mut();
        if sources.iter().any(|(n, _)| n == name) {
            return Err(AssemblyError::DuplicateName {
                path: self.name.clone(),
                kind: "parameter source",
                name: name.to_string(),
            });
        }
        debug!("store '{}': adding source '{name}'", self.name);
        sources.push((name.to_string(), source));
        Ok(())
    }

    /// Symbols for a parameter structure (unit skeleton). Paths requested
    /// before are reused; a unit incompatible with the earlier request is
    /// an error.
    pub fn get_symbols(
        &self,
        structure: &Nested<String>,
    ) -> Result<NestedQuantity, AssemblyError> {
        let mut symbols = self.symbols.borrow_mut();
        structure.try_map_leaves(&mut |path, unit| {
            let dimension = parse_unit(unit)?.dimension;
            if let Some(existing) = symbols.get(path).and_then(Nested::as_leaf) {
                if *existing.dimension() != dimension {
                    return Err(AssemblyError::Quantity(
                        QuantityError::dimensions(
                            dimension.to_string(),
                            existing.dimension().to_string(),
                        )
                        .with_context(format!(
                            "previously defined thermo parameter '{}'",
                            path.join("/")
                        )),
                    ));
                }
                return Ok(existing.clone());
            }
            // qualify with the store name: two stores may carry the same
            // parameter paths and must not alias in one compiled function
            let name = format!("{}.{}", self.name, path.join("."));
            let symbol = Quantity::symbol(&name, unit)?;
            symbols.insert(path, symbol.clone());
            Ok(symbol)
        })
    }

    /// All symbols requested so far.
    pub fn get_all_symbols(&self) -> NestedQuantity {
        self.symbols.borrow().clone()
    }

    fn lookup(&self, path: &[&str], dimension_of: &Quantity) -> Option<(Quantity, String)> {
        let sources = self.sources.borrow();
        for (name, source) in sources.iter() {
            if let Some(value) = source.get(path) {
                if value.dimension() == dimension_of.dimension() {
                    return Some((value, name.clone()));
                }
            }
        }
        None
    }

    /// Values for all requested symbols; fails with the structured missing
    /// set if any source chain comes up empty.
    pub fn get_all_values(&self) -> Result<NestedQuantity, AssemblyError> {
        let symbols = self.symbols.borrow().clone();
        let mut missing = Vec::new();
        let values = symbols.try_map_leaves(&mut |path, symbol| {
            match self.lookup(path, symbol) {
                Some((value, _)) => Ok::<Quantity, AssemblyError>(value),
                None => {
                    missing.push(path.join("/"));
                    Ok(symbol.clone()) // placeholder, discarded on error
                }
            }
        })?;
        if missing.is_empty() {
            Ok(values)
        } else {
            Err(AssemblyError::MissingParameter { names: missing })
        }
    }

    /// The structured set of requested parameters with no value in any
    /// source; empty means a solve may proceed.
    pub fn get_missing_symbols(&self) -> Vec<String> {
        let symbols = self.symbols.borrow();
        symbols
            .flatten()
            .into_iter()
            .filter_map(|(path, symbol)| {
                let keys: Vec<&str> = path.split('/').collect();
                match self.lookup(&keys, &symbol) {
                    Some(_) => None,
                    None => Some(path),
                }
            })
            .collect()
    }

    /// The source name each resolved parameter comes from.
    pub fn get_sources(&self) -> Vec<(String, String)> {
        let symbols = self.symbols.borrow();
        symbols
            .flatten()
            .into_iter()
            .filter_map(|(path, symbol)| {
                let keys: Vec<&str> = path.split('/').collect();
                self.lookup(&keys, &symbol)
                    .map(|(_, source)| (path, source))
            })
            .collect()
    }
}
