//! Materials: frames bound to parameter stores and initial states.
//!
//! A [`MaterialDefinition`] glues a frame, an initial state and a
//! parameter store; instantiating it yields a [`Material`] whose property
//! table is the frame wired onto the material's own state symbols with the
//! store's parameter symbols. Definitions are shared, never copied.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::AssemblyError;
use crate::quantity::Quantity;
use crate::structures::QuantityDict;
use crate::thermo::frame::ThermoFrame;
use crate::thermo::state::InitialState;
use crate::thermo::store::ThermoParameterStore;

/// Requirement on a material connected to a model port.
///
/// Lists the species that must be present; a locked spec additionally
/// rejects materials carrying species beyond the listed ones. The wildcard
/// entry `"*"` unlocks an otherwise explicit list.
#[derive(Debug, Clone, Default)]
pub struct MaterialSpec {
    species: Vec<String>,
    locked: bool,
}

impl MaterialSpec {
    /// Accept any material.
    pub fn any() -> MaterialSpec {
        MaterialSpec::default()
    }

    /// Require the listed species; lock unless `"*"` is among them.
    pub fn with_species<'s>(species: impl IntoIterator<Item = &'s str>) -> MaterialSpec {
        let mut names: Vec<String> = species.into_iter().map(str::to_string).collect();
        let locked = !names.iter().any(|s| s == "*");
        names.retain(|s| s != "*");
        MaterialSpec {
            species: names,
            locked,
        }
    }

    pub fn species(&self) -> &[String] {
        &self.species
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Whether a material with the given species satisfies this spec.
    pub fn is_compatible(&self, species: &[String]) -> bool {
        let required_present = self.species.iter().all(|s| species.contains(s));
        let no_extras = !self.locked || species.iter().all(|s| self.species.contains(s));
        required_present && no_extras
    }
}

/// Whether a material describes a flow (per-second) or a stagnant state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    Flow,
    State,
}

impl MaterialKind {
    /// Tolerance unit for mole balance residuals over this material.
    pub fn quantity_unit(self) -> &'static str {
        match self {
            MaterialKind::Flow => "mol/s",
            MaterialKind::State => "mol",
        }
    }
}

/// A material type: frame, initial state, and parameter store.
pub struct MaterialDefinition {
    pub frame: Rc<ThermoFrame>,
    pub initial_state: InitialState,
    pub store: Rc<ThermoParameterStore>,
}

impl MaterialDefinition {
    pub fn new(
        frame: Rc<ThermoFrame>,
        initial_state: InitialState,
        store: Rc<ThermoParameterStore>,
    ) -> Result<Rc<MaterialDefinition>, AssemblyError> {
        if initial_state.num_species() != frame.species().len() {
            return Err(AssemblyError::Configuration(format!(
                "initial state carries {} species while frame '{}' expects {}",
                initial_state.num_species(),
                frame.name(),
                frame.species().len()
            )));
        }
        Ok(Rc::new(MaterialDefinition {
            frame,
            initial_state,
            store,
        }))
    }

    /// The spec this definition satisfies.
    pub fn spec(&self) -> MaterialSpec {
        MaterialSpec::with_species(self.frame.species().iter().map(String::as_str))
    }

    /// The raw initial state vector at the store's current values.
    pub fn initial_raw_state(&self) -> Result<Vec<f64>, AssemblyError> {
        // make sure the frame's parameters are requested before values are
        // collected, so a standalone definition works like a wired one
        self.store.get_symbols(self.frame.parameter_structure())?;
        let values = self.store.get_all_values()?;
        self.frame.initial_state(&self.initial_state, &values)
    }
}

/// One instantiated material: a state symbol slice and the frame's
/// property table expressed on it.
pub struct Material {
    name: String,
    pub definition: Rc<MaterialDefinition>,
    kind: MaterialKind,
    state: Quantity,
    properties: BTreeMap<String, Quantity>,
    bounds: Vec<(String, Quantity)>,
}

impl Material {
    /// Instantiate a definition under a qualified name.
    pub fn instantiate(
        name: &str,
        definition: &Rc<MaterialDefinition>,
        kind: MaterialKind,
    ) -> Result<Material, AssemblyError> {
        let frame = &definition.frame;
        let symbols = definition.store.get_symbols(frame.parameter_structure())?;
        let state = frame.create_symbol_state(&format!("{name}/x"))?;
        let run = frame.run(&state, Some(&symbols), kind == MaterialKind::Flow)?;
        let bounds = run
            .bounds
            .into_iter()
            .map(|(bound, quantity)| (format!("{name}/{bound}"), quantity))
            .collect();
        Ok(Material {
            name: name.to_string(),
            definition: definition.clone(),
            kind,
            state,
            properties: run.props,
            bounds,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MaterialKind {
        self.kind
    }

    pub fn species(&self) -> &[String] {
        self.definition.frame.species()
    }

    /// The material's raw state symbol vector.
    pub fn state(&self) -> &Quantity {
        &self.state
    }

    /// Positivity bounds contributed by the frame, qualified by the
    /// material name.
    pub fn bounds(&self) -> &[(String, Quantity)] {
        &self.bounds
    }

    /// A public property; names starting with `_` are internal plumbing
    /// and not exposed.
    pub fn property(&self, name: &str) -> Result<Quantity, AssemblyError> {
        if name.starts_with('_') {
            return Err(AssemblyError::UnknownName {
                path: self.name.clone(),
                kind: "material property",
                name: name.to_string(),
            });
        }
        self.properties
            .get(name)
            .cloned()
            .ok_or_else(|| AssemblyError::UnknownName {
                path: self.name.clone(),
                kind: "material property",
                name: name.to_string(),
            })
    }

    /// All public property names.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties
            .keys()
            .map(String::as_str)
            .filter(|name| !name.starts_with('_'))
    }

    /// A vector property as a species-keyed dictionary.
    pub fn quantity_dict(&self, name: &str) -> Result<QuantityDict, AssemblyError> {
        let quantity = self.property(name)?;
        let keys = self
            .definition
            .frame
            .vector_keys()
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.species().to_vec());
        Ok(QuantityDict::from_vector_quantity(&quantity, &keys))
    }
}
