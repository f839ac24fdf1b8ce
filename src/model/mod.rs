//! Hierarchical process models.
//!
//! A model is implemented in two phases. The *interface* phase declares
//! parameters, provided properties and material ports; the *define* phase
//! builds the symbolic expressions for properties and residuals, creates
//! materials, and instantiates child models. The build engine runs the
//! interface of every node before its define, and a child's define
//! completes before the parent can read its properties, so the data flow
//! through the tree is acyclic by construction.

pub mod numeric;

use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;

use crate::error::AssemblyError;
use crate::quantity::Quantity;
use crate::structures::QuantityDict;
use crate::thermo::material::{Material, MaterialDefinition, MaterialKind, MaterialSpec};
use crate::thermo::store::ThermoParameterStore;
use crate::units::parse_unit;

/// A reusable process model: declarative interface plus constructive
/// definition.
pub trait ProcessModel {
    /// Declare parameters, provided properties, and material ports.
    fn interface(&self, ifc: &mut Interface) -> Result<(), AssemblyError>;

    /// Build properties, residuals, bounds, materials and children.
    fn define(&self, ctx: &mut ModelContext) -> Result<(), AssemblyError>;
}

#[derive(Debug, Clone)]
struct ParameterDecl {
    name: String,
    default: Option<f64>,
    unit: String,
}

/// The declaration record collected during the interface phase.
#[derive(Default)]
pub struct Interface {
    path: String,
    parameters: Vec<ParameterDecl>,
    properties: Vec<(String, String)>,
    ports: Vec<(String, MaterialSpec)>,
}

impl Interface {
    fn new(path: &str) -> Interface {
        Interface {
            path: path.to_string(),
            ..Interface::default()
        }
    }

    fn check_new(&self, kind: &'static str, name: &str) -> Result<(), AssemblyError> {
        let exists = self.parameters.iter().any(|p| p.name == name)
            || self.properties.iter().any(|(n, _)| n == name)
            || self.ports.iter().any(|(n, _)| n == name);
        if exists {
            return Err(AssemblyError::DuplicateName {
                path: self.path.clone(),
                kind,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Declare a parameter with a default value.
    pub fn parameter(&mut self, name: &str, value: f64, unit: &str) -> Result<(), AssemblyError> {
        self.check_new("parameter", name)?;
        parse_unit(unit)?;
        self.parameters.push(ParameterDecl {
            name: name.to_string(),
            default: Some(value),
            unit: unit.to_string(),
        });
        Ok(())
    }

    /// Declare a parameter the parent must connect or update.
    pub fn parameter_required(&mut self, name: &str, unit: &str) -> Result<(), AssemblyError> {
        self.check_new("parameter", name)?;
        parse_unit(unit)?;
        self.parameters.push(ParameterDecl {
            name: name.to_string(),
            default: None,
            unit: unit.to_string(),
        });
        Ok(())
    }

    /// Promise a property of the given unit.
    pub fn property(&mut self, name: &str, unit: &str) -> Result<(), AssemblyError> {
        self.check_new("property", name)?;
        parse_unit(unit)?;
        self.properties.push((name.to_string(), unit.to_string()));
        Ok(())
    }

    /// Declare a material port with its acceptance spec.
    pub fn material_port(&mut self, name: &str, spec: MaterialSpec) -> Result<(), AssemblyError> {
        self.check_new("material port", name)?;
        self.ports.push((name.to_string(), spec));
        Ok(())
    }
}

/// A residual: a named quantity to drive to zero within a tolerance.
pub struct Residual {
    pub name: String,
    pub value: Quantity,
    pub tolerance: Quantity,
}

/// A non-canonical independent state variable declared by a model.
pub struct StateVariable {
    pub name: String,
    pub symbol: Quantity,
    pub initial: Quantity,
}

/// Cheap shared reference to a material in the build's material table.
#[derive(Clone)]
pub struct MaterialHandle {
    pub index: usize,
    material: Rc<Material>,
}

impl MaterialHandle {
    pub fn name(&self) -> &str {
        self.material.name()
    }

    pub fn kind(&self) -> MaterialKind {
        self.material.kind()
    }

    pub fn species(&self) -> &[String] {
        self.material.species()
    }

    /// A thermodynamic property of this material.
    pub fn property(&self, name: &str) -> Result<Quantity, AssemblyError> {
        self.material.property(name)
    }

    /// A vector property as a species-keyed dictionary.
    pub fn quantity_dict(&self, name: &str) -> Result<QuantityDict, AssemblyError> {
        self.material.quantity_dict(name)
    }

    /// Tolerance unit for mole balances over this material.
    pub fn quantity_unit(&self) -> &'static str {
        self.material.kind().quantity_unit()
    }
}

/// A finished child model, exposing its published properties.
pub struct ChildView {
    pub name: String,
    properties: BTreeMap<String, Quantity>,
}

impl ChildView {
    /// Read a property the child has published.
    pub fn property(&self, name: &str) -> Result<Quantity, AssemblyError> {
        self.properties
            .get(name)
            .cloned()
            .ok_or_else(|| AssemblyError::data_flow(
                self.name.clone(),
                format!("property '{name}' is not provided by the child model"),
            ))
    }
}

/// Parameter and material connections for a child instantiation.
#[derive(Default)]
pub struct ChildWiring {
    parameters: Vec<(String, Quantity)>,
    updates: Vec<(String, f64, String)>,
    ports: Vec<(String, MaterialHandle)>,
}

impl ChildWiring {
    pub fn new() -> ChildWiring {
        ChildWiring::default()
    }

    /// Connect a parameter to an expression from the parent context.
    pub fn parameter(mut self, name: &str, quantity: Quantity) -> ChildWiring {
        self.parameters.push((name.to_string(), quantity));
        self
    }

    /// Override the child's default value without connecting a symbol.
    pub fn update(mut self, name: &str, value: f64, unit: &str) -> ChildWiring {
        self.updates.push((name.to_string(), value, unit.to_string()));
        self
    }

    /// Connect a material to a child port.
    pub fn port(mut self, name: &str, material: &MaterialHandle) -> ChildWiring {
        self.ports.push((name.to_string(), material.clone()));
        self
    }
}

/// One built model node.
pub struct ModelInstance {
    pub name: String,
    pub path: String,
    pub properties: BTreeMap<String, Quantity>,
    /// `(name, symbol, default value)` of parameters left free.
    pub free_parameters: Vec<(String, Quantity, Quantity)>,
    pub residuals: Vec<Residual>,
    pub bounds: Vec<(String, Quantity)>,
    pub state_variables: Vec<StateVariable>,
    /// Indices of materials created by this node.
    pub materials: Vec<usize>,
    pub children: Vec<ModelInstance>,
}

/// The result of building a model tree: the instance hierarchy, the shared
/// material table, and the distinct parameter stores in use.
pub struct ModelTree {
    pub root: ModelInstance,
    pub materials: Vec<Rc<Material>>,
    pub stores: Vec<Rc<ThermoParameterStore>>,
}

/// Build a model as the top of a hierarchy.
pub fn build(model: &dyn ProcessModel, name: &str) -> Result<ModelTree, AssemblyError> {
    let mut materials = Vec::new();
    let mut stores: Vec<Rc<ThermoParameterStore>> = Vec::new();
    let root = build_node(
        model,
        name,
        name,
        &mut materials,
        &mut stores,
        ChildWiring::new(),
    )?;
    Ok(ModelTree {
        root,
        materials,
        stores,
    })
}

fn build_node(
    model: &dyn ProcessModel,
    name: &str,
    path: &str,
    materials: &mut Vec<Rc<Material>>,
    stores: &mut Vec<Rc<ThermoParameterStore>>,
    wiring: ChildWiring,
) -> Result<ModelInstance, AssemblyError> {
    let mut ifc = Interface::new(path);
    model.interface(&mut ifc)?;
    debug!("interface of '{path}' declared");

    // resolve parameter connections and defaults
    let mut parameters: BTreeMap<String, Quantity> = BTreeMap::new();
    let mut free_parameters = Vec::new();
    let mut defaults: BTreeMap<String, (f64, String)> = ifc
        .parameters
        .iter()
        .filter_map(|p| p.default.map(|v| (p.name.clone(), (v, p.unit.clone()))))
        .collect();
    for (name, value, unit) in &wiring.updates {
        let decl = ifc
            .parameters
            .iter()
            .find(|p| &p.name == name)
            .ok_or_else(|| AssemblyError::UnknownName {
                path: path.to_string(),
                kind: "parameter",
                name: name.clone(),
            })?;
        let quantity = Quantity::new(*value, unit)?;
        if quantity.dimension() != &parse_unit(&decl.unit)?.dimension {
            return Err(AssemblyError::Quantity(
                crate::error::QuantityError::dimensions(
                    decl.unit.clone(),
                    unit.clone(),
                )
                .with_context(format!("parameter '{path}/{name}'")),
            ));
        }
        defaults.insert(name.clone(), (quantity.in_unit(&decl.unit)?[0], decl.unit.clone()));
    }
    let mut connected: BTreeMap<String, Quantity> = BTreeMap::new();
    for (name, quantity) in wiring.parameters {
        let decl = ifc
            .parameters
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| AssemblyError::UnknownName {
                path: path.to_string(),
                kind: "parameter",
                name: name.clone(),
            })?;
        if quantity.dimension() != &parse_unit(&decl.unit)?.dimension {
            return Err(AssemblyError::Quantity(
                crate::error::QuantityError::dimensions(
                    decl.unit.clone(),
                    quantity.dimension().to_string(),
                )
                .with_context(format!("parameter '{path}/{name}'")),
            ));
        }
        connected.insert(name, quantity);
    }
    for decl in &ifc.parameters {
        if let Some(quantity) = connected.remove(&decl.name) {
            parameters.insert(decl.name.clone(), quantity);
            continue;
        }
        let Some((value, unit)) = defaults.get(&decl.name) else {
            return Err(AssemblyError::data_flow(
                path,
                format!("parameter '{}' has no value and is not connected", decl.name),
            ));
        };
        let symbol = Quantity::symbol(&format!("{path}/{}", decl.name), &decl.unit)?;
        parameters.insert(decl.name.clone(), symbol.clone());
        free_parameters.push((decl.name.clone(), symbol, Quantity::new(*value, unit)?));
    }

    // resolve material port connections
    let mut ports: BTreeMap<String, MaterialHandle> = BTreeMap::new();
    let mut offered: BTreeMap<String, MaterialHandle> =
        wiring.ports.into_iter().collect();
    for (port_name, spec) in &ifc.ports {
        let Some(handle) = offered.remove(port_name) else {
            return Err(AssemblyError::data_flow(
                path,
                format!("material port '{port_name}' is not connected"),
            ));
        };
        if !spec.is_compatible(handle.species()) {
            return Err(AssemblyError::IncompatibleMaterial {
                path: path.to_string(),
                port: port_name.clone(),
                message: format!(
                    "species {:?} do not satisfy the port specification",
                    handle.species()
                ),
            });
        }
        ports.insert(port_name.clone(), handle);
    }
    if let Some(stray) = offered.keys().next() {
        return Err(AssemblyError::UnknownName {
            path: path.to_string(),
            kind: "material port",
            name: stray.clone(),
        });
    }

    let declared_properties: BTreeMap<String, String> =
        ifc.properties.iter().cloned().collect();

    let mut ctx = ModelContext {
        path: path.to_string(),
        parameters,
        declared_properties,
        properties: BTreeMap::new(),
        residuals: Vec::new(),
        bounds: Vec::new(),
        state_variables: Vec::new(),
        created_materials: Vec::new(),
        ports,
        children: Vec::new(),
        materials,
        stores,
    };
    model.define(&mut ctx)?;
    debug!("define of '{path}' complete");

    // every declared property must be provided
    for (name, _) in &ifc.properties {
        if !ctx.properties.contains_key(name) {
            return Err(AssemblyError::data_flow(
                path,
                format!("declared property '{name}' was never provided"),
            ));
        }
    }

    Ok(ModelInstance {
        name: name.to_string(),
        path: path.to_string(),
        properties: ctx.properties,
        free_parameters,
        residuals: ctx.residuals,
        bounds: ctx.bounds,
        state_variables: ctx.state_variables,
        materials: ctx.created_materials,
        children: ctx.children,
    })
}

/// The constructive context handed to [`ProcessModel::define`].
///
/// Everything a model does during define goes through this handle: reading
/// parameters, providing declared properties, adding residuals and bounds,
/// creating and connecting materials, and instantiating children.
pub struct ModelContext<'b> {
    path: String,
    parameters: BTreeMap<String, Quantity>,
    declared_properties: BTreeMap<String, String>,
    properties: BTreeMap<String, Quantity>,
    residuals: Vec<Residual>,
    bounds: Vec<(String, Quantity)>,
    state_variables: Vec<StateVariable>,
    created_materials: Vec<usize>,
    ports: BTreeMap<String, MaterialHandle>,
    children: Vec<ModelInstance>,
    materials: &'b mut Vec<Rc<Material>>,
    stores: &'b mut Vec<Rc<ThermoParameterStore>>,
}

impl ModelContext<'_> {
    /// The qualified path of this model in the hierarchy.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The symbol (or connected expression) of a declared parameter.
    pub fn parameter(&self, name: &str) -> Result<Quantity, AssemblyError> {
        self.parameters
            .get(name)
            .cloned()
            .ok_or_else(|| AssemblyError::UnknownName {
                path: self.path.clone(),
                kind: "parameter",
                name: name.to_string(),
            })
    }

    /// Provide a declared property.
    pub fn set_property(&mut self, name: &str, quantity: Quantity) -> Result<(), AssemblyError> {
        let Some(unit) = self.declared_properties.get(name) else {
            return Err(AssemblyError::UndeclaredProperty {
                path: self.path.clone(),
                name: name.to_string(),
            });
        };
        if quantity.dimension() != &parse_unit(unit)?.dimension {
            return Err(AssemblyError::Quantity(
                crate::error::QuantityError::dimensions(
                    unit.clone(),
                    quantity.dimension().to_string(),
                )
                .with_context(format!("property '{}/{name}'", self.path)),
            ));
        }
        if self.properties.contains_key(name) {
            return Err(AssemblyError::data_flow(
                self.path.clone(),
                format!("property '{name}' is already provided"),
            ));
        }
        self.properties.insert(name.to_string(), quantity);
        Ok(())
    }

    /// Add a residual with its tolerance unit.
    ///
    /// The residual's dimension must be convertible to `tol_unit`; its
    /// scaled value is the SI magnitude divided by the tolerance.
    pub fn add_residual(
        &mut self,
        name: &str,
        value: Quantity,
        tol_unit: &str,
        tol: f64,
    ) -> Result<(), AssemblyError> {
        if self.residuals.iter().any(|r| r.name == name) {
            return Err(AssemblyError::DuplicateName {
                path: self.path.clone(),
                kind: "residual",
                name: name.to_string(),
            });
        }
        let tolerance = Quantity::new(tol, tol_unit)?;
        if tolerance.dimension() != value.dimension() {
            return Err(AssemblyError::Quantity(
                crate::error::QuantityError::dimensions(
                    tolerance.dimension().to_string(),
                    value.dimension().to_string(),
                )
                .with_context(format!("residual '{}/{name}'", self.path)),
            ));
        }
        self.residuals.push(Residual {
            name: name.to_string(),
            value,
            tolerance,
        });
        Ok(())
    }

    /// Declare a model-level quantity that must stay strictly positive.
    ///
    /// These are true domain boundaries (e.g. a logarithmic-mean
    /// temperature difference), not inequality constraints.
    pub fn add_bound(&mut self, name: &str, quantity: Quantity) -> Result<(), AssemblyError> {
        let qualified = format!("{}/{name}", self.path);
        if self.bounds.iter().any(|(n, _)| n == &qualified) {
            return Err(AssemblyError::DuplicateName {
                path: self.path.clone(),
                kind: "bound",
                name: name.to_string(),
            });
        }
        self.bounds.push((qualified, quantity));
        Ok(())
    }

    /// Declare an additional independent (non-thermodynamic) state
    /// variable with an initial value.
    pub fn create_state_variable(
        &mut self,
        name: &str,
        value: f64,
        unit: &str,
    ) -> Result<Quantity, AssemblyError> {
        let qualified = format!("{}/{name}", self.path);
        if self.state_variables.iter().any(|s| s.name == qualified) {
            return Err(AssemblyError::DuplicateName {
                path: self.path.clone(),
                kind: "state variable",
                name: name.to_string(),
            });
        }
        let symbol = Quantity::symbol(&qualified, unit)?;
        self.state_variables.push(StateVariable {
            name: qualified,
            symbol: symbol.clone(),
            initial: Quantity::new(value, unit)?,
        });
        Ok(symbol)
    }

    fn create_material(
        &mut self,
        name: &str,
        definition: &Rc<MaterialDefinition>,
        kind: MaterialKind,
    ) -> Result<MaterialHandle, AssemblyError> {
        let qualified = format!("{}/{name}", self.path);
        if self
            .materials
            .iter()
            .any(|m| m.name() == qualified)
        {
            return Err(AssemblyError::DuplicateName {
                path: self.path.clone(),
                kind: "material",
                name: name.to_string(),
            });
        }
        let material = Rc::new(Material::instantiate(&qualified, definition, kind)?);
        if !self
            .stores
            .iter()
            .any(|s| Rc::ptr_eq(s, &definition.store))
        {
            self.stores.push(definition.store.clone());
        }
        let index = self.materials.len();
        self.materials.push(material.clone());
        self.created_materials.push(index);
        Ok(MaterialHandle { index, material })
    }

    /// Create a flow material (per-second extensive quantities).
    pub fn create_flow(
        &mut self,
        name: &str,
        definition: &Rc<MaterialDefinition>,
    ) -> Result<MaterialHandle, AssemblyError> {
        self.create_material(name, definition, MaterialKind::Flow)
    }

    /// Create a stagnant-state material.
    pub fn create_state(
        &mut self,
        name: &str,
        definition: &Rc<MaterialDefinition>,
    ) -> Result<MaterialHandle, AssemblyError> {
        self.create_material(name, definition, MaterialKind::State)
    }

    /// The material connected to a declared port.
    pub fn port(&self, name: &str) -> Result<MaterialHandle, AssemblyError> {
        self.ports
            .get(name)
            .cloned()
            .ok_or_else(|| AssemblyError::UnknownName {
                path: self.path.clone(),
                kind: "material port",
                name: name.to_string(),
            })
    }

    /// Instantiate a child model with its wiring; the child's define runs
    /// to completion before this returns.
    pub fn add_child(
        &mut self,
        name: &str,
        model: &dyn ProcessModel,
        wiring: ChildWiring,
    ) -> Result<ChildView, AssemblyError> {
        if self.children.iter().any(|c| c.name == name) {
            return Err(AssemblyError::DuplicateName {
                path: self.path.clone(),
                kind: "child model",
                name: name.to_string(),
            });
        }
        // child names share the nested namespace with parameters and
        // properties; a clash would make the flattened problem ambiguous
        if self.parameters.contains_key(name) || self.declared_properties.contains_key(name) {
            return Err(AssemblyError::DuplicateName {
                path: self.path.clone(),
                kind: "child model (clashes with a declaration)",
                name: name.to_string(),
            });
        }
        let child_path = format!("{}/{name}", self.path);
        let instance = build_node(
            model,
            name,
            &child_path,
            self.materials,
            self.stores,
            wiring,
        )?;
        let view = ChildView {
            name: child_path,
            properties: instance.properties.clone(),
        };
        self.children.push(instance);
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuantityError;
    use crate::thermo::frame::{ContributionEntry, FrameConfig, ThermoFactory};
    use crate::thermo::state::InitialState;
    use crate::thermo::store::{StringThermoSource, ThermoParameterStore};
    use serde_json::json;

    fn methane_definition() -> Rc<MaterialDefinition> {
        let factory = ThermoFactory::default();
        let config = FrameConfig {
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
        };
        let frame = factory.create_frame(&config).unwrap();
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
                        }
                    }))
                    .unwrap(),
                ),
            )
            .unwrap();
        let initial = InitialState::new(
            Quantity::new(25.0, "degC").unwrap(),
            Quantity::new(1.0, "bar").unwrap(),
            Quantity::vector(&[1.0], "mol/s").unwrap(),
        );
        MaterialDefinition::new(frame, initial, store).unwrap()
    }

    /// A valve taking a feed material and a pressure drop parameter.
    struct Valve;

    impl ProcessModel for Valve {
        fn interface(&self, ifc: &mut Interface) -> Result<(), AssemblyError> {
            ifc.parameter_required("dp", "bar")?;
            ifc.property("p_out", "Pa")?;
            ifc.material_port("inlet", MaterialSpec::with_species(["CH4"]))?;
            Ok(())
        }

        fn define(&self, ctx: &mut ModelContext) -> Result<(), AssemblyError> {
            let inlet = ctx.port("inlet")?;
            let p_out = (inlet.property("p")? - ctx.parameter("dp")?)?;
            ctx.add_bound("p_out", p_out.clone())?;
            ctx.set_property("p_out", p_out)?;
            Ok(())
        }
    }

    struct Plant {
        definition: Rc<MaterialDefinition>,
    }

    impl ProcessModel for Plant {
        fn interface(&self, ifc: &mut Interface) -> Result<(), AssemblyError> {
            ifc.parameter("dp", 0.2, "bar")?;
            ifc.property("outlet_pressure", "Pa")?;
            Ok(())
        }

        fn define(&self, ctx: &mut ModelContext) -> Result<(), AssemblyError> {
            let feed = ctx.create_flow("feed", &self.definition)?;
            let valve = ctx.add_child(
                "valve",
                &Valve,
                ChildWiring::new()
                    .parameter("dp", ctx.parameter("dp")?)
                    .port("inlet", &feed),
            )?;
            ctx.set_property("outlet_pressure", valve.property("p_out")?)?;
            let extra = ctx.create_state_variable("duty", 5.0, "W")?;
            ctx.add_residual("duty", (extra - Quantity::new(5.0, "W").unwrap())?, "W", 1e-7)?;
            Ok(())
        }
    }

    #[test]
    fn hierarchy_builds_with_shared_materials() {
        let tree = build(
            &Plant {
                definition: methane_definition(),
            },
            "plant",
        )
        .unwrap();
        assert_eq!(tree.materials.len(), 1);
        assert_eq!(tree.materials[0].name(), "plant/feed");
        assert_eq!(tree.root.children.len(), 1);
        assert_eq!(tree.root.children[0].path, "plant/valve");
        // the valve published its property through the parent
        assert!(tree.root.properties.contains_key("outlet_pressure"));
        // the child's bound is qualified by its path
        assert_eq!(tree.root.children[0].bounds[0].0, "plant/valve/p_out");
        // one shared store
        assert_eq!(tree.stores.len(), 1);
    }

    #[test]
    fn numeric_handler_flattens_the_tree() {
        let tree = build(
            &Plant {
                definition: methane_definition(),
            },
            "plant",
        )
        .unwrap();
        let mut handler = crate::model::numeric::NumericHandler::new(tree).unwrap();
        // 3 material states plus the declared state variable
        assert_eq!(handler.n_states(), 4);
        assert_eq!(
            handler.state_names(),
            &[
                "plant/feed/T",
                "plant/feed/p",
                "plant/feed/n[CH4]",
                "plant/duty"
            ]
        );
        assert_eq!(handler.residual_names(), &["plant/duty"]);
        let x = handler.state().unwrap().clone();
        assert_eq!(x.len(), 4);
        assert!((x[0] - 298.15).abs() < 1e-9);
        assert!((x[3] - 5.0).abs() < 1e-12);
        // bound vector: T, n, p from the frame plus the valve's p_out
        let (bounds, _) = handler.bound_system(&x).unwrap();
        assert_eq!(bounds.len(), handler.bound_names().len());
        assert!(handler
            .bound_names()
            .iter()
            .any(|n| n == "plant/valve/p_out"));
        assert!(bounds.iter().all(|&b| b > 0.0));
    }

    struct WritesUndeclared;

    impl ProcessModel for WritesUndeclared {
        fn interface(&self, _ifc: &mut Interface) -> Result<(), AssemblyError> {
            Ok(())
        }

        fn define(&self, ctx: &mut ModelContext) -> Result<(), AssemblyError> {
            ctx.set_property("area", Quantity::new(1.0, "m**2").unwrap())
        }
    }

    #[test]
    fn writing_an_undeclared_property_fails() {
        match build(&WritesUndeclared, "model") {
            Err(AssemblyError::UndeclaredProperty { name, .. }) => assert_eq!(name, "area"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    struct ForgetsProperty;

    impl ProcessModel for ForgetsProperty {
        fn interface(&self, ifc: &mut Interface) -> Result<(), AssemblyError> {
            ifc.property("area", "m**2")
        }

        fn define(&self, _ctx: &mut ModelContext) -> Result<(), AssemblyError> {
            Ok(())
        }
    }

    #[test]
    fn unprovided_declared_property_fails() {
        match build(&ForgetsProperty, "model") {
            Err(AssemblyError::DataFlow { message, .. }) => {
                assert!(message.contains("area"));
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    struct WrongSpec {
        definition: Rc<MaterialDefinition>,
    }

    impl ProcessModel for WrongSpec {
        fn interface(&self, _ifc: &mut Interface) -> Result<(), AssemblyError> {
            Ok(())
        }

        fn define(&self, ctx: &mut ModelContext) -> Result<(), AssemblyError> {
            struct NeedsWater;
            impl ProcessModel for NeedsWater {
                fn interface(&self, ifc: &mut Interface) -> Result<(), AssemblyError> {
                    ifc.material_port("inlet", MaterialSpec::with_species(["H2O"]))
                }
                fn define(&self, _ctx: &mut ModelContext) -> Result<(), AssemblyError> {
                    Ok(())
                }
            }
            let feed = ctx.create_flow("feed", &self.definition)?;
            ctx.add_child("child", &NeedsWater, ChildWiring::new().port("inlet", &feed))?;
            Ok(())
        }
    }

    #[test]
    fn incompatible_material_spec_is_rejected() {
        let result = build(
            &WrongSpec {
                definition: methane_definition(),
            },
            "model",
        );
        match result {
            Err(AssemblyError::IncompatibleMaterial { port, .. }) => assert_eq!(port, "inlet"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    struct UnconnectedPort;

    impl ProcessModel for UnconnectedPort {
        fn interface(&self, ifc: &mut Interface) -> Result<(), AssemblyError> {
            ifc.material_port("inlet", MaterialSpec::any())
        }

        fn define(&self, _ctx: &mut ModelContext) -> Result<(), AssemblyError> {
            Ok(())
        }
    }

    #[test]
    fn unconnected_port_fails_at_assembly() {
        match build(&UnconnectedPort, "model") {
            Err(AssemblyError::DataFlow { message, .. }) => {
                assert!(message.contains("inlet"));
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    struct MismatchedUnits;

    impl ProcessModel for MismatchedUnits {
        fn interface(&self, ifc: &mut Interface) -> Result<(), AssemblyError> {
            ifc.property("area", "m**2")
        }

        fn define(&self, ctx: &mut ModelContext) -> Result<(), AssemblyError> {
            ctx.set_property("area", Quantity::new(1.0, "m").unwrap())
        }
    }

    #[test]
    fn property_units_are_checked_against_the_declaration() {
        match build(&MismatchedUnits, "model") {
            Err(AssemblyError::Quantity(QuantityError::DimensionMismatch { .. })) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
