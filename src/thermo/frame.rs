//! Thermodynamic frames and their factory.
//!
//! A [`ThermoFrame`] is an ordered stack of contributions atop a state
//! definition: a function from `(state, parameters)` to a table of
//! thermodynamic properties plus positivity bounds. Frames are created
//! through a [`ThermoFactory`], which owns the append-only, string-keyed
//! registries of contribution and state-definition constructors.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;
use serde_json::Value;

use crate::error::AssemblyError;
use crate::quantity::{qvertcat, Quantity};
use crate::species::SpeciesDefinition;
use crate::structures::{Nested, NestedQuantity};
use crate::thermo::contribution::{
    BoundSet, ContributionSetup, NumericProps, ParameterDictionary, PropertyMap,
    ThermoContribution,
};
use crate::thermo::state::{InitialState, StateDefinition};
use crate::graph::CompiledFunction;

/// Constructor type for registered contributions.
pub type ContributionFactory =
    Box<dyn Fn(ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError>>;

/// Constructor type for registered state definitions.
pub type StateFactory = Box<dyn Fn() -> Box<dyn StateDefinition>>;

/// One contribution entry in a frame structure.
#[derive(Debug, Clone)]
pub struct ContributionEntry {
    /// Registered class name.
    pub cls: String,
    /// Instance alias within the frame; defaults to the class name.
    pub name: Option<String>,
    /// Options map handed to the contribution, `Null` if absent.
    pub options: Value,
}

impl ContributionEntry {
    pub fn plain(cls: &str) -> ContributionEntry {
        ContributionEntry {
            cls: cls.to_string(),
            name: None,
            options: Value::Null,
        }
    }

    pub fn with_options(cls: &str, options: Value) -> ContributionEntry {
        ContributionEntry {
            cls: cls.to_string(),
            name: None,
            options,
        }
    }

    pub fn aliased(cls: &str, name: &str, options: Value) -> ContributionEntry {
        ContributionEntry {
            cls: cls.to_string(),
            name: Some(name.to_string()),
            options,
        }
    }
}

/// Declarative description of a frame: species, state, contribution stack.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    pub name: String,
    /// `(name, formula)` pairs in user order.
    pub species: Vec<(String, String)>,
    pub state: String,
    pub contributions: Vec<ContributionEntry>,
}

impl FrameConfig {
    /// Build a config from a model-structure mapping of the shape
    /// `{state: "...", contributions: [<name> | {cls, name, options}]}`.
    pub fn from_value(
        name: &str,
        species: &[(String, String)],
        value: &Value,
    ) -> Result<FrameConfig, AssemblyError> {
        let state = value
            .get("state")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AssemblyError::Configuration(format!("frame '{name}': missing 'state' entry"))
            })?;
        let list = value
            .get("contributions")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                AssemblyError::Configuration(format!(
                    "frame '{name}': missing 'contributions' list"
                ))
            })?;
        let mut contributions = Vec::with_capacity(list.len());
        for item in list {
            let entry = match item {
                Value::String(cls) => ContributionEntry::plain(cls),
                Value::Object(map) => {
                    let cls = map.get("cls").and_then(Value::as_str).ok_or_else(|| {
                        AssemblyError::Configuration(format!(
                            "frame '{name}': contribution entry without 'cls'"
                        ))
                    })?;
                    ContributionEntry {
                        cls: cls.to_string(),
                        name: map.get("name").and_then(Value::as_str).map(str::to_string),
                        options: map.get("options").cloned().unwrap_or(Value::Null),
                    }
                }
                other => {
                    return Err(AssemblyError::Configuration(format!(
                        "frame '{name}': invalid contribution entry {other}"
                    )))
                }
            };
            contributions.push(entry);
        }
        Ok(FrameConfig {
            name: name.to_string(),
            species: species.to_vec(),
            state: state.to_string(),
            contributions,
        })
    }
}

struct CompiledFrame {
    function: CompiledFunction,
    /// `(name, offset, len)` into the flat output vector.
    prop_layout: Vec<(String, usize, usize)>,
    n_prop_values: usize,
    bound_names: Vec<String>,
}

/// The result of wiring a frame onto a concrete state quantity.
pub struct FrameRun {
    pub props: BTreeMap<String, Quantity>,
    pub bounds: Vec<(String, Quantity)>,
    /// Parameter quantities used, nested per contribution.
    pub parameters: NestedQuantity,
}

/// A thermodynamic model as a composable state function.
pub struct ThermoFrame {
    name: String,
    species: Vec<String>,
    species_defs: Vec<SpeciesDefinition>,
    state: Box<dyn StateDefinition>,
    contributions: Vec<(String, Box<dyn ThermoContribution>)>,
    parameter_structure: Nested<String>,
    property_structure: BTreeMap<String, String>,
    bound_structure: Vec<String>,
    vector_keys: BTreeMap<String, Vec<String>>,
    compiled: OnceCell<Rc<CompiledFrame>>,
}

impl ThermoFrame {
    fn new(
        config: &FrameConfig,
        state: Box<dyn StateDefinition>,
        contributions: Vec<(String, Box<dyn ThermoContribution>)>,
    ) -> Result<ThermoFrame, AssemblyError> {
        let species: Vec<String> = config.species.iter().map(|(n, _)| n.clone()).collect();
        let mut species_defs = Vec::with_capacity(species.len());
        for (name, formula) in &config.species {
            let def = SpeciesDefinition::new(formula).map_err(|e| {
                AssemblyError::Configuration(format!("species '{name}': {e}"))
            })?;
            species_defs.push(def);
        }

        let mut frame = ThermoFrame {
            name: config.name.clone(),
            species,
            species_defs,
            state,
            contributions,
            parameter_structure: Nested::empty(),
            property_structure: BTreeMap::new(),
            bound_structure: Vec::new(),
            vector_keys: BTreeMap::new(),
            compiled: OnceCell::new(),
        };

        // dry symbolic run: validates the contribution order and records
        // the parameter and property structures
        let state_symbols = frame.create_symbol_state("x")?;
        let (run, structure) = frame.run_with_structure(&state_symbols, None, false)?;
        frame.parameter_structure = structure;
        frame.property_structure = run
            .props
            .iter()
            .map(|(k, v)| (k.clone(), v.dimension().to_string()))
            .collect();
        frame.bound_structure = run.bounds.iter().map(|(k, _)| k.clone()).collect();

        for required in ["_state", "T", "p", "n", "S", "mu", "V"] {
            if !run.props.contains_key(required) {
                return Err(AssemblyError::Configuration(format!(
                    "frame '{}' does not provide standard property '{required}'",
                    frame.name
                )));
            }
        }

        frame.vector_keys.insert("n".into(), frame.species.clone());
        frame.vector_keys.insert("mw".into(), frame.species.clone());
        frame.vector_keys.insert("mu".into(), frame.species.clone());
        for (_, contribution) in &frame.contributions {
            for (name, keys) in contribution.declared_vectors() {
                frame.vector_keys.insert(name, keys);
            }
        }
        Ok(frame)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered species names.
    pub fn species(&self) -> &[String] {
        &self.species
    }

    pub fn species_definitions(&self) -> &[SpeciesDefinition] {
        &self.species_defs
    }

    /// Length of the raw state vector.
    pub fn state_length(&self) -> usize {
        self.species.len() + 2
    }

    /// Names of the state vector positions, e.g. `[T, p, n[CH4]]`.
    pub fn state_names(&self) -> Vec<String> {
        self.state.position_names(&self.species)
    }

    /// A fresh dimensionless symbol vector usable as frame state.
    pub fn create_symbol_state(&self, name: &str) -> Result<Quantity, AssemblyError> {
        Ok(Quantity::symbol_vector(name, self.state_length(), "dimless")?)
    }

    /// The exact union of parameter needs of all contributions, as a unit
    /// skeleton nested per contribution.
    pub fn parameter_structure(&self) -> &Nested<String> {
        &self.parameter_structure
    }

    /// Published property names with their dimension signatures.
    pub fn property_structure(&self) -> &BTreeMap<String, String> {
        &self.property_structure
    }

    /// Names of the bound expressions, in declaration order.
    pub fn bound_structure(&self) -> &[String] {
        &self.bound_structure
    }

    /// Index keys of registered vector properties.
    pub fn vector_keys(&self) -> &BTreeMap<String, Vec<String>> {
        &self.vector_keys
    }

    fn molecular_weights(&self) -> Result<Quantity, AssemblyError> {
        let parts: Vec<Quantity> = self
            .species_defs
            .iter()
            .map(|d| d.molecular_weight.clone())
            .collect();
        Ok(qvertcat(&parts)?)
    }

    /// Wire the contribution stack onto a concrete state quantity.
    ///
    /// With `supply`, parameters resolve against pre-made quantities
    /// (symbols of a parameter store, or numeric values); without it every
    /// contribution registers fresh parameter symbols.
    pub fn run(
        &self,
        state: &Quantity,
        supply: Option<&NestedQuantity>,
        flow: bool,
    ) -> Result<FrameRun, AssemblyError> {
        self.run_with_structure(state, supply, flow).map(|(run, _)| run)
    }

    fn run_with_structure(
        &self,
        state: &Quantity,
        supply: Option<&NestedQuantity>,
        flow: bool,
    ) -> Result<(FrameRun, Nested<String>), AssemblyError> {
        let mut res = PropertyMap::new();
        let mut bounds = BoundSet::new();
        res.set("_state", state.clone());
        res.set("mw", self.molecular_weights()?);
        self.state.prepare(&mut res, &self.species, flow)?;

        let mut parameters = NestedQuantity::empty();
        let mut structure: Nested<String> = Nested::empty();
        for (name, contribution) in &self.contributions {
            res.set_context(name);
            bounds.set_context(name);
            let mut par = match supply.and_then(|s| s.get(&[name.as_str()])) {
                Some(sub) => ParameterDictionary::with_supply(name, sub.clone()),
                None => ParameterDictionary::new(name),
            };
            contribution.define(&mut res, &mut bounds, &mut par)?;
            debug!("frame '{}': defined contribution '{name}'", self.name);
            if !par.is_empty() {
                if let Nested::Map(map) = &mut parameters {
                    map.insert(name.clone(), par.used().clone());
                }
                if let Nested::Map(map) = &mut structure {
                    map.insert(name.clone(), par.structure().clone());
                }
            }
        }
        Ok((
            FrameRun {
                props: res.into_entries(),
                bounds: bounds.into_entries(),
                parameters,
            },
            structure,
        ))
    }

    fn compiled(&self) -> Result<Rc<CompiledFrame>, AssemblyError> {
        if let Some(compiled) = self.compiled.get() {
            return Ok(compiled.clone());
        }
        let state = self.create_symbol_state("x")?;
        let run = self.run(&state, None, false)?;

        let mut inputs: Vec<crate::graph::Expr> = state.magnitude().to_vec();
        for (_, quantity) in run.parameters.flatten() {
            inputs.extend(quantity.magnitude().iter().cloned());
        }

        let mut outputs = Vec::new();
        let mut prop_layout = Vec::new();
        for (name, quantity) in &run.props {
            prop_layout.push((name.clone(), outputs.len(), quantity.len()));
            outputs.extend(quantity.magnitude().iter().cloned());
        }
        let n_prop_values = outputs.len();
        let mut bound_names = Vec::new();
        for (name, quantity) in &run.bounds {
            for i in 0..quantity.len() {
                bound_names.push(if quantity.len() == 1 {
                    name.clone()
                } else {
                    format!("{name}[{i}]")
                });
            }
            outputs.extend(quantity.magnitude().iter().cloned());
        }

        let function = CompiledFunction::compile(&inputs, &outputs)?;
        let compiled = Rc::new(CompiledFrame {
            function,
            prop_layout,
            n_prop_values,
            bound_names,
        });
        let _ = self.compiled.set(compiled.clone());
        Ok(compiled)
    }

    /// The frame as a standalone function object over nested quantity
    /// dictionaries: `{state, parameters} -> {props, bounds}`.
    pub fn function(&self) -> Result<crate::qfunction::QFunction, AssemblyError> {
        let state = self.create_symbol_state("x")?;
        let run = self.run(&state, None, false)?;
        let mut args = NestedQuantity::empty();
        args.insert(&["state"], state);
        if let (Nested::Map(target), Nested::Map(source)) =
            (&mut args, &run.parameters)
        {
            if !source.is_empty() {
                target.insert("parameters".to_string(), run.parameters.clone());
            }
        }
        let mut results = NestedQuantity::empty();
        for (name, quantity) in &run.props {
            results.insert(&["props", name.as_str()], quantity.clone());
        }
        for (name, quantity) in &run.bounds {
            results.insert(&["bounds", name.as_str()], quantity.clone());
        }
        Ok(crate::qfunction::QFunction::new(&args, &results)?)
    }

    /// Flatten parameter values to the compiled evaluation order.
    pub fn flatten_parameter_values(
        &self,
        values: &NestedQuantity,
    ) -> Result<Vec<f64>, AssemblyError> {
        let mut flat = Vec::new();
        let mut missing = Vec::new();
        for (path, _unit) in self.parameter_structure.flatten() {
            let keys: Vec<&str> = path.split('/').collect();
            match values.get(&keys).and_then(Nested::as_leaf).and_then(Quantity::values_si) {
                Some(numbers) => flat.extend(numbers),
                None => missing.push(path),
            }
        }
        if !missing.is_empty() {
            return Err(AssemblyError::MissingParameter { names: missing });
        }
        Ok(flat)
    }

    /// Numeric evaluation of all properties and bounds.
    pub fn evaluate(
        &self,
        state: &[f64],
        parameter_values: &[f64],
    ) -> Result<(NumericProps, Vec<f64>), AssemblyError> {
        let compiled = self.compiled()?;
        let mut inputs = Vec::with_capacity(state.len() + parameter_values.len());
        inputs.extend_from_slice(state);
        inputs.extend_from_slice(parameter_values);
        let outputs = compiled.function.call(&inputs);
        let mut props = NumericProps::new();
        for (name, offset, len) in &compiled.prop_layout {
            props.insert(name.clone(), outputs[*offset..offset + len].to_vec());
        }
        let bounds = outputs[compiled.n_prop_values..].to_vec();
        Ok((props, bounds))
    }

    /// Names of the flattened numeric bound entries.
    pub fn numeric_bound_names(&self) -> Result<Vec<String>, AssemblyError> {
        Ok(self.compiled()?.bound_names.clone())
    }

    /// Run every contribution's projection hook, in frame order, on a
    /// freshly stepped state slice.
    pub fn relax(&self, props: &NumericProps, slice: &mut [f64]) {
        for (_, contribution) in &self.contributions {
            contribution.relax(props, slice);
        }
    }

    /// A state estimate for given temperature, pressure and molar
    /// quantities, at the given parameter values.
    ///
    /// Gibbs frames answer trivially; otherwise the contributions are
    /// queried top-down, the first one that can initialize wins.
    pub fn initial_state(
        &self,
        state: &InitialState,
        parameter_values: &NestedQuantity,
    ) -> Result<Vec<f64>, AssemblyError> {
        if state.num_species() != self.species.len() {
            return Err(AssemblyError::Configuration(format!(
                "initial state carries {} species, frame '{}' has {}",
                state.num_species(),
                self.name,
                self.species.len()
            )));
        }
        let raw = self.state.reverse(state);
        if raw.iter().all(Option::is_some) {
            return Ok(raw.into_iter().flatten().collect());
        }

        // evaluate what is computable with NaN in the open slots, then let
        // the contributions complete the state top-down
        let flat_params = self.flatten_parameter_values(parameter_values)?;
        let nan_state: Vec<f64> = raw.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        let (props, _) = self.evaluate(&nan_state, &flat_params)?;
        for (name, contribution) in self.contributions.iter().rev() {
            if let Some(result) = contribution.initial_state(state, &props) {
                debug!("frame '{}': initial state from '{name}'", self.name);
                return Ok(result);
            }
        }
        Err(AssemblyError::Configuration(format!(
            "frame '{}': no initialisation found for non-Gibbs coordinates",
            self.name
        )))
    }
}

/// Factory owning the registries of contributions and state definitions.
///
/// Both registries are append-only and keyed by string; [`ThermoFactory::default`]
/// pre-populates them with the standard catalog.
pub struct ThermoFactory {
    contributions: BTreeMap<String, ContributionFactory>,
    states: BTreeMap<String, StateFactory>,
}

impl ThermoFactory {
    /// An empty factory with no registered entries.
    pub fn empty() -> ThermoFactory {
        ThermoFactory {
            contributions: BTreeMap::new(),
            states: BTreeMap::new(),
        }
    }

    /// Register a contribution constructor under a class name.
    pub fn register_contribution(
        &mut self,
        name: &str,
        factory: ContributionFactory,
    ) -> Result<(), AssemblyError> {
        if self.contributions.contains_key(name) {
            return Err(AssemblyError::Configuration(format!(
                "contribution '{name}' already registered"
            )));
        }
        self.contributions.insert(name.to_string(), factory);
        Ok(())
    }

    /// Register a state definition constructor.
    pub fn register_state(
        &mut self,
        name: &str,
        factory: StateFactory,
    ) -> Result<(), AssemblyError> {
        if self.states.contains_key(name) {
            return Err(AssemblyError::Configuration(format!(
                "state definition '{name}' already registered"
            )));
        }
        self.states.insert(name.to_string(), factory);
        Ok(())
    }

    /// Registered contribution names.
    pub fn contribution_names(&self) -> impl Iterator<Item = &str> {
        self.contributions.keys().map(String::as_str)
    }

    /// Create a frame from its declarative configuration.
    pub fn create_frame(&self, config: &FrameConfig) -> Result<Rc<ThermoFrame>, AssemblyError> {
        let state_factory = self.states.get(&config.state).ok_or_else(|| {
            AssemblyError::Configuration(format!("unknown state definition '{}'", config.state))
        })?;

        let species: Vec<String> = config.species.iter().map(|(n, _)| n.clone()).collect();
        let mut species_defs = Vec::with_capacity(species.len());
        for (name, formula) in &config.species {
            species_defs.push(SpeciesDefinition::new(formula).map_err(|e| {
                AssemblyError::Configuration(format!("species '{name}': {e}"))
            })?);
        }

        let mut instances = Vec::with_capacity(config.contributions.len());
        let mut used_names = BTreeMap::new();
        for entry in &config.contributions {
            let factory = self.contributions.get(&entry.cls).ok_or_else(|| {
                AssemblyError::Configuration(format!("unknown contribution '{}'", entry.cls))
            })?;
            let name = entry.name.clone().unwrap_or_else(|| entry.cls.clone());
            if used_names.insert(name.clone(), ()).is_some() {
                return Err(AssemblyError::Configuration(format!(
                    "duplicate contribution name '{name}' in frame '{}'",
                    config.name
                )));
            }
            let setup = ContributionSetup {
                species: species.clone(),
                species_defs: species_defs.clone(),
                options: entry.options.clone(),
            };
            instances.push((name, factory(setup)?));
        }

        let frame = ThermoFrame::new(config, state_factory(), instances)?;
        Ok(Rc::new(frame))
    }
}

impl Default for ThermoFactory {
    /// A factory with the standard states and contribution catalog.
    fn default() -> ThermoFactory {
        let mut factory = ThermoFactory::empty();
        crate::thermo::contributions::register_standard(&mut factory)
            .expect("standard catalog registers exactly once");
        factory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Quantity;
    use crate::thermo::material::MaterialDefinition;
    use crate::thermo::state::InitialState;
    use crate::thermo::store::{StringThermoSource, ThermoParameterStore};
    use serde_json::json;

    fn gibbs_config() -> FrameConfig {
        FrameConfig {
            name: "ideal-gas".into(),
            species: vec![("CH4".to_string(), "CH4".to_string())],
            state: "GibbsState".into(),
            contributions: [
                "H0S0ReferenceState",
                "LinearHeatCapacity",
                "StandardState",
                "IdealMix",
                "GibbsIdealGas",
            ]
            .into_iter()
            .map(ContributionEntry::plain)
            .collect(),
        }
    }

    #[test]
    fn frame_publishes_the_standard_property_set() {
        let frame = ThermoFactory::default().create_frame(&gibbs_config()).unwrap();
        let props = frame.property_structure();
        for name in ["_state", "T", "p", "n", "S", "mu", "V"] {
            assert!(props.contains_key(name), "missing {name}");
        }
        assert_eq!(frame.vector_keys()["n"], vec!["CH4"]);
    }

    #[test]
    fn parameter_structure_enumerates_contribution_needs() {
        let frame = ThermoFactory::default().create_frame(&gibbs_config()).unwrap();
        let keys: Vec<String> = frame
            .parameter_structure()
            .flatten()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            vec![
                "H0S0ReferenceState/T_ref",
                "H0S0ReferenceState/dh_form/CH4",
                "H0S0ReferenceState/p_ref",
                "H0S0ReferenceState/s_0/CH4",
                "LinearHeatCapacity/cp_a/CH4",
                "LinearHeatCapacity/cp_b/CH4",
            ]
        );
    }

    #[test]
    fn out_of_order_contributions_are_rejected() {
        // ideal gas before the reference state: p_ref is not yet published
        let config = FrameConfig {
            name: "broken".into(),
            species: vec![("CH4".to_string(), "CH4".to_string())],
            state: "GibbsState".into(),
            contributions: vec![
                ContributionEntry::plain("GibbsIdealGas"),
                ContributionEntry::plain("H0S0ReferenceState"),
            ],
        };
        match ThermoFactory::default().create_frame(&config) {
            Err(AssemblyError::MissingRequirement { contribution, name }) => {
                assert_eq!(contribution, "GibbsIdealGas");
                assert_eq!(name, "p_ref");
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        let factory = ThermoFactory::default();
        let mut config = gibbs_config();
        config.state = "Nonsense".into();
        assert!(factory.create_frame(&config).is_err());
        let mut config = gibbs_config();
        config.contributions.push(ContributionEntry::plain("Nonsense"));
        assert!(factory.create_frame(&config).is_err());
        let mut config = gibbs_config();
        config
            .contributions
            .push(ContributionEntry::plain("IdealMix"));
        assert!(factory.create_frame(&config).is_err()); // duplicate name
    }

    #[test]
    fn config_from_structure_mapping() {
        let value = json!({
            "state": "HelmholtzState",
            "contributions": [
                "H0S0ReferenceState",
                {"cls": "LinearMixingRule", "name": "MixingRuleB",
                 "options": {"target": "_ceos_b"}}
            ]
        });
        let species = vec![("CH4".to_string(), "CH4".to_string())];
        let config = FrameConfig::from_value("rk", &species, &value).unwrap();
        assert_eq!(config.state, "HelmholtzState");
        assert_eq!(config.contributions.len(), 2);
        assert_eq!(config.contributions[1].name.as_deref(), Some("MixingRuleB"));
    }

    fn rk_frame_and_store() -> (Rc<ThermoFrame>, Rc<ThermoParameterStore>) {
        let config = FrameConfig {
            name: "rk-gas".into(),
            species: vec![("CH4".to_string(), "CH4".to_string())],
            state: "HelmholtzState".into(),
            contributions: vec![
                ContributionEntry::plain("H0S0ReferenceState"),
                ContributionEntry::plain("LinearHeatCapacity"),
                ContributionEntry::plain("IdealMix"),
                ContributionEntry::plain("HelmholtzIdealGas"),
                ContributionEntry::plain("CriticalParameters"),
                ContributionEntry::plain("RedlichKwongMFactor"),
                ContributionEntry::plain("BostonMathiasAlphaFunction"),
                ContributionEntry::plain("RedlichKwongAFunction"),
                ContributionEntry::plain("RedlichKwongBFunction"),
                // the historical alias must resolve to the same rule
                ContributionEntry::aliased(
                    "NonSymmmetricMixingRule",
                    "MixingRuleA",
                    json!({"target": "_ceos_a"}),
                ),
                ContributionEntry::aliased(
                    "LinearMixingRule",
                    "MixingRuleB",
                    json!({"target": "_ceos_b"}),
                ),
                ContributionEntry::plain("RedlichKwongEOSGas"),
            ],
        };
        let frame = ThermoFactory::default().create_frame(&config).unwrap();
        let store = Rc::new(ThermoParameterStore::new("parameters"));
        store
            .add_source(
                "defaults",
                Box::new(
                    StringThermoSource::new(&json!({
                        "H0S0ReferenceState": {
                            "dh_form": {"CH4": "-74.87 kJ/mol"},
                            "s_0": {"CH4": "188.66 J/(mol*K)"},
                            "T_ref": "25 degC",
                            "p_ref": "1 bar"
                        },
                        "LinearHeatCapacity": {
                            "cp_a": {"CH4": "35.69 J/(mol*K)"},
                            "cp_b": {"CH4": "0.05 J/(mol*K**2)"}
                        },
                        "CriticalParameters": {
                            "T_c": {"CH4": "190.6 K"},
                            "p_c": {"CH4": "46 bar"},
                            "omega": {"CH4": "0.011 dimless"}
                        },
                        "BostonMathiasAlphaFunction": {
                            "eta": {"CH4": "0 dimless"}
                        }
                    }))
                    .unwrap(),
                ),
            )
            .unwrap();
        (frame, store)
    }

    #[test]
    fn redlich_kwong_frame_recovers_the_target_pressure() {
        let (frame, store) = rk_frame_and_store();
        let initial = InitialState::new(
            Quantity::new(300.0, "K").unwrap(),
            Quantity::new(10.0, "bar").unwrap(),
            Quantity::vector(&[1.0], "mol").unwrap(),
        );
        let definition = MaterialDefinition::new(frame.clone(), initial, store.clone()).unwrap();
        let state = definition.initial_raw_state().unwrap();
        assert_eq!(state.len(), 3);
        assert!((state[0] - 300.0).abs() < 1e-12);
        // the gas root reproduces the requested pressure
        let values = store.get_all_values().unwrap();
        let flat = frame.flatten_parameter_values(&values).unwrap();
        let (props, bounds) = frame.evaluate(&state, &flat).unwrap();
        let p = props["p"][0];
        assert!((p - 1e6).abs() < 1e-3 * 1e6, "p = {p}");
        // inside the domain: all bounds positive, including -dp/dV
        assert!(bounds.iter().all(|&b| b > 0.0));
        // the projection hook leaves a healthy state alone
        let mut relaxed = state.clone();
        frame.relax(&props, &mut relaxed);
        assert!((relaxed[1] - state[1]).abs() < 1e-15);
    }

    #[test]
    fn standalone_frame_function_reproduces_reference_values() {
        let frame = ThermoFactory::default().create_frame(&gibbs_config()).unwrap();
        let store = ThermoParameterStore::new("parameters");
        store.get_symbols(frame.parameter_structure()).unwrap();
        store
            .add_source(
                "literature",
                Box::new(
                    StringThermoSource::new(&json!({
                        "H0S0ReferenceState": {
                            "dh_form": {"CH4": "-74.87 kJ/mol"},
                            "s_0": {"CH4": "188.66 J/(mol*K)"},
                            "T_ref": "25 degC",
                            "p_ref": "1 bar"
                        },
                        "LinearHeatCapacity": {
                            "cp_a": {"CH4": "35.69 J/(mol*K)"},
                            "cp_b": {"CH4": "0.05 J/(mol*K**2)"}
                        }
                    }))
                    .unwrap(),
                ),
            )
            .unwrap();
        let function = frame.function().unwrap();
        let mut args = NestedQuantity::empty();
        args.insert(
            &["state"],
            Quantity::vector(&[298.15, 1e5, 1.0], "dimless").unwrap(),
        );
        if let Nested::Map(map) = &mut args {
            map.insert("parameters".to_string(), store.get_all_values().unwrap());
        }
        let result = function.call(&args).unwrap();
        let entropy = result.get(&["props", "S"]).unwrap().as_leaf().unwrap();
        assert!((entropy.value_si().unwrap() - 188.66).abs() < 1e-9);
        let mu = result.get(&["props", "mu"]).unwrap().as_leaf().unwrap();
        assert!((mu.value_si().unwrap() + 131_118.979).abs() < 1e-2);
        let volume = result.get(&["props", "V"]).unwrap().as_leaf().unwrap();
        let expected = crate::constants::GAS_CONSTANT_SI * 298.15 / 1e5;
        assert!((volume.value_si().unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn helmholtz_initial_state_falls_back_to_ideal_gas() {
        // without an EOS, the ideal-gas contribution provides the volume
        let config = FrameConfig {
            name: "helmholtz-ideal".into(),
            species: vec![("CH4".to_string(), "CH4".to_string())],
            state: "HelmholtzState".into(),
            contributions: vec![
                ContributionEntry::plain("H0S0ReferenceState"),
                ContributionEntry::plain("IdealMix"),
                ContributionEntry::plain("HelmholtzIdealGas"),
            ],
        };
        let frame = ThermoFactory::default().create_frame(&config).unwrap();
        let store = ThermoParameterStore::new("parameters");
        let symbols = store.get_symbols(frame.parameter_structure()).unwrap();
        let _ = symbols;
        store
            .add_source(
                "defaults",
                Box::new(
                    StringThermoSource::new(&json!({
                        "H0S0ReferenceState": {
                            "dh_form": {"CH4": "-74.87 kJ/mol"},
                            "s_0": {"CH4": "188.66 J/(mol*K)"},
                            "T_ref": "25 degC",
                            "p_ref": "1 bar"
                        }
                    }))
                    .unwrap(),
                ),
            )
            .unwrap();
        let initial = InitialState::from_si(300.0, 1e5, &[2.0]).unwrap();
        let values = store.get_all_values().unwrap();
        let state = frame.initial_state(&initial, &values).unwrap();
        let expected = 2.0 * crate::constants::GAS_CONSTANT_SI * 300.0 / 1e5;
        assert!((state[1] - expected).abs() < 1e-12);
    }
}
