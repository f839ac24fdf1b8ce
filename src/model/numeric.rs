//! The numeric face of a built model tree.
//!
//! The handler flattens the hierarchy into the global vectors the solver
//! consumes: the state vector `x` (all material state slices plus declared
//! non-canonical state variables), the tolerance-scaled residual vector,
//! the strictly-positive bound vector, and the structured parameter
//! dictionary split into model and thermodynamic parameters. Residual and
//! bound ordering follows a deterministic depth-first traversal of the
//! tree; the handler owns the only mutable cursor into `x`.

use std::rc::Rc;

use serde_json::{json, Map, Value};

use crate::error::AssemblyError;
use crate::graph::{CompiledFunction, CscMatrix, Expr};
use crate::model::{ModelInstance, ModelTree};
use crate::quantity::Quantity;
use crate::structures::{Nested, NestedQuantity};
use crate::thermo::material::Material;
use crate::thermo::state::InitialState;
use crate::units::Dimension;

/// Editable argument set of the compiled model function.
pub struct Arguments {
    /// Free model parameters, nested by model path.
    pub model_params: NestedQuantity,
    /// Thermodynamic parameters, nested by store name.
    pub thermo_params: NestedQuantity,
}

enum ParamSource {
    Model,
    Thermo,
}

struct ParamEntry {
    source: ParamSource,
    path: Vec<String>,
}

struct MaterialSegment {
    material: Rc<Material>,
    offset: usize,
    len: usize,
}

/// The global numeric problem of one model tree.
pub struct NumericHandler {
    tree: ModelTree,
    material_segments: Vec<MaterialSegment>,
    n_states: usize,
    state_names: Vec<String>,
    residual_names: Vec<String>,
    bound_names: Vec<String>,
    param_entries: Vec<ParamEntry>,
    f_residuals: CompiledFunction,
    f_bounds: CompiledFunction,
    f_props: CompiledFunction,
    prop_layout: Vec<(Vec<String>, usize, usize, Dimension)>,
    arguments: Option<Arguments>,
    x: Option<Vec<f64>>,
}

fn walk<'t>(instance: &'t ModelInstance, visit: &mut impl FnMut(&'t ModelInstance)) {
    visit(instance);
    for child in &instance.children {
        walk(child, visit);
    }
}

impl NumericHandler {
    pub fn new(tree: ModelTree) -> Result<NumericHandler, AssemblyError> {
        // state vector: material slices in creation order, then declared
        // state variables in tree order
        let mut inputs: Vec<Expr> = Vec::new();
        let mut state_names = Vec::new();
        let mut material_segments = Vec::new();
        for material in &tree.materials {
            let offset = inputs.len();
            inputs.extend(material.state().magnitude().iter().cloned());
            for position in material.definition.frame.state_names() {
                state_names.push(format!("{}/{position}", material.name()));
            }
            material_segments.push(MaterialSegment {
                material: material.clone(),
                offset,
                len: material.state().len(),
            });
        }
        let mut state_var_info = Vec::new();
        walk(&tree.root, &mut |instance| {
            for state_var in &instance.state_variables {
                state_var_info.push((state_var.symbol.clone(), state_var.name.clone()));
            }
        });
        for (symbol, name) in &state_var_info {
            inputs.extend(symbol.magnitude().iter().cloned());
            state_names.push(name.clone());
        }
        let n_states = inputs.len();

        // distinct stores must carry distinct names, or their parameter
        // namespaces would collide
        for (i, store) in tree.stores.iter().enumerate() {
            if tree.stores[..i].iter().any(|s| s.name() == store.name()) {
                return Err(AssemblyError::DuplicateName {
                    path: tree.root.path.clone(),
                    kind: "parameter store",
                    name: store.name().to_string(),
                });
            }
        }

        // parameters: free model parameters in tree order, then the
        // thermodynamic parameter symbols of every store in use
        let mut param_entries = Vec::new();
        walk(&tree.root, &mut |instance| {
            for (name, symbol, _default) in &instance.free_parameters {
                let mut path: Vec<String> =
                    instance.path.split('/').map(str::to_string).collect();
                path.push(name.clone());
                param_entries.push((symbol.clone(), ParamEntry {
                    source: ParamSource::Model,
                    path,
                }));
            }
        });
        for store in &tree.stores {
            for (flat, symbol) in store.get_all_symbols().flatten() {
                let mut path = vec![store.name().to_string()];
                path.extend(flat.split('/').map(str::to_string));
                param_entries.push((symbol, ParamEntry {
                    source: ParamSource::Thermo,
                    path,
                }));
            }
        }
        for (symbol, _) in &param_entries {
            inputs.extend(symbol.magnitude().iter().cloned());
        }
        let param_entries: Vec<ParamEntry> =
            param_entries.into_iter().map(|(_, entry)| entry).collect();

        // residuals, scaled by their tolerances
        let mut residual_exprs: Vec<Expr> = Vec::new();
        let mut residual_names = Vec::new();
        let mut residual_error: Option<AssemblyError> = None;
        walk(&tree.root, &mut |instance| {
            for residual in &instance.residuals {
                match &residual.value / &residual.tolerance {
                    Ok(scaled) => {
                        for (i, expr) in scaled.magnitude().iter().enumerate() {
                            residual_names.push(if scaled.len() == 1 {
                                format!("{}/{}", instance.path, residual.name)
                            } else {
                                format!("{}/{}[{i}]", instance.path, residual.name)
                            });
                            residual_exprs.push(expr.clone());
                        }
                    }
                    Err(error) => {
                        residual_error.get_or_insert(AssemblyError::Quantity(error));
                    }
                }
            }
        });
        if let Some(error) = residual_error {
            return Err(error);
        }

        // bounds: material bounds in creation order, then model bounds
        let mut bound_exprs: Vec<Expr> = Vec::new();
        let mut bound_names = Vec::new();
        let mut push_bounds = |entries: &[(String, Quantity)]| {
            for (name, quantity) in entries {
                for (i, expr) in quantity.magnitude().iter().enumerate() {
                    bound_names.push(if quantity.len() == 1 {
                        name.clone()
                    } else {
                        format!("{name}[{i}]")
                    });
                    bound_exprs.push(expr.clone());
                }
            }
        };
        for material in &tree.materials {
            push_bounds(material.bounds());
        }
        let mut model_bounds = Vec::new();
        walk(&tree.root, &mut |instance| {
            model_bounds.extend(
                instance
                    .bounds
                    .iter()
                    .map(|(n, q)| (n.clone(), q.clone())),
            );
        });
        push_bounds(&model_bounds);

        // property outputs: model properties, then public material ones
        let mut prop_exprs: Vec<Expr> = Vec::new();
        let mut prop_layout = Vec::new();
        walk(&tree.root, &mut |instance| {
            for (name, quantity) in &instance.properties {
                let mut path = vec!["model_props".to_string()];
                path.extend(instance.path.split('/').map(str::to_string));
                path.push(name.clone());
                prop_layout.push((path, prop_exprs.len(), quantity.len(), *quantity.dimension()));
                prop_exprs.extend(quantity.magnitude().iter().cloned());
            }
        });
        for material in &tree.materials {
            for name in material.property_names().map(str::to_string).collect::<Vec<_>>() {
                let quantity = material.property(&name)?;
                let mut path = vec!["thermo_props".to_string()];
                path.extend(material.name().split('/').map(str::to_string));
                path.push(name);
                prop_layout.push((path, prop_exprs.len(), quantity.len(), *quantity.dimension()));
                prop_exprs.extend(quantity.magnitude().iter().cloned());
            }
        }

        let f_residuals = CompiledFunction::compile_with_jacobian(&inputs, &residual_exprs, n_states)?;
        let f_bounds = CompiledFunction::compile_with_jacobian(&inputs, &bound_exprs, n_states)?;
        let f_props = CompiledFunction::compile(&inputs, &prop_exprs)?;

        Ok(NumericHandler {
            tree,
            material_segments,
            n_states,
            state_names,
            residual_names,
            bound_names,
            param_entries,
            f_residuals,
            f_bounds,
            f_props,
            prop_layout,
            arguments: None,
            x: None,
        })
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn n_residuals(&self) -> usize {
        self.residual_names.len()
    }

    pub fn state_names(&self) -> &[String] {
        &self.state_names
    }

    pub fn residual_names(&self) -> &[String] {
        &self.residual_names
    }

    pub fn bound_names(&self) -> &[String] {
        &self.bound_names
    }

    /// The editable argument structure, initialized from model defaults
    /// and the parameter stores on first access.
    pub fn arguments_mut(&mut self) -> Result<&mut Arguments, AssemblyError> {
        if self.arguments.is_none() {
            let mut model_params = NestedQuantity::empty();
            walk(&self.tree.root, &mut |instance| {
                for (name, _symbol, default) in &instance.free_parameters {
                    let mut path: Vec<&str> = instance.path.split('/').collect();
                    path.push(name.as_str());
                    model_params.insert(&path, default.clone());
                }
            });
            let mut thermo_params = NestedQuantity::empty();
            for store in &self.tree.stores {
                let values = store.get_all_values()?;
                if let Nested::Map(map) = &mut thermo_params {
                    map.insert(store.name().to_string(), values);
                }
            }
            self.arguments = Some(Arguments {
                model_params,
                thermo_params,
            });
        }
        Ok(self.arguments.as_mut().expect("arguments just initialized"))
    }

    fn parameter_values(&mut self) -> Result<Vec<f64>, AssemblyError> {
        self.arguments_mut()?;
        let arguments = self.arguments.as_ref().expect("arguments initialized");
        let mut values = Vec::with_capacity(self.param_entries.len());
        for entry in &self.param_entries {
            let root = match entry.source {
                ParamSource::Model => &arguments.model_params,
                ParamSource::Thermo => &arguments.thermo_params,
            };
            let keys: Vec<&str> = entry.path.iter().map(String::as_str).collect();
            let value = root
                .get(&keys)
                .and_then(Nested::as_leaf)
                .and_then(Quantity::values_si)
                .ok_or_else(|| AssemblyError::MissingParameter {
                    names: vec![entry.path.join("/")],
                })?;
            values.extend(value);
        }
        Ok(values)
    }

    /// The current state vector, seeded from the material initial states
    /// and state-variable defaults on first access.
    pub fn state(&mut self) -> Result<&mut Vec<f64>, AssemblyError> {
        if self.x.is_none() {
            let mut x = Vec::with_capacity(self.n_states);
            for segment in &self.material_segments {
                x.extend(segment.material.definition.initial_raw_state()?);
            }
            let mut initial_values = Vec::new();
            walk(&self.tree.root, &mut |instance| {
                for state_var in &instance.state_variables {
                    initial_values.push(state_var.initial.value_si().unwrap_or(0.0));
                }
            });
            x.extend(initial_values);
            debug_assert_eq!(x.len(), self.n_states);
            self.x = Some(x);
        }
        Ok(self.x.as_mut().expect("state just initialized"))
    }

    fn full_inputs(&mut self, x: &[f64]) -> Result<Vec<f64>, AssemblyError> {
        let params = self.parameter_values()?;
        let mut inputs = Vec::with_capacity(x.len() + params.len());
        inputs.extend_from_slice(x);
        inputs.extend(params);
        Ok(inputs)
    }

    /// Scaled residual vector and its sparse Jacobian with respect to `x`.
    pub fn residual_system(
        &mut self,
        x: &[f64],
    ) -> Result<(Vec<f64>, CscMatrix), AssemblyError> {
        let inputs = self.full_inputs(x)?;
        Ok(self.f_residuals.call_with_jacobian(&inputs))
    }

    /// Bound vector and its sparse Jacobian with respect to `x`.
    pub fn bound_system(&mut self, x: &[f64]) -> Result<(Vec<f64>, CscMatrix), AssemblyError> {
        let inputs = self.full_inputs(x)?;
        Ok(self.f_bounds.call_with_jacobian(&inputs))
    }

    /// Run the frame relax chain of every material on a freshly stepped
    /// state vector, in material order.
    pub fn relax(&mut self, x: &mut [f64]) -> Result<(), AssemblyError> {
        self.arguments_mut()?;
        let arguments = self.arguments.as_ref().expect("arguments initialized");
        for segment in &self.material_segments {
            let frame = &segment.material.definition.frame;
            let store_name = segment.material.definition.store.name().to_string();
            let Some(values) = arguments.thermo_params.get(&[store_name.as_str()]) else {
                continue;
            };
            let flat = frame.flatten_parameter_values(values)?;
            let slice = &mut x[segment.offset..segment.offset + segment.len];
            let (props, _) = frame.evaluate(slice, &flat)?;
            frame.relax(&props, slice);
        }
        Ok(())
    }

    /// All model and material properties at `x`, as a nested dictionary of
    /// numeric quantities.
    pub fn properties(&mut self, x: &[f64]) -> Result<NestedQuantity, AssemblyError> {
        let inputs = self.full_inputs(x)?;
        let outputs = self.f_props.call(&inputs);
        let mut result = NestedQuantity::empty();
        for (path, offset, len, dimension) in &self.prop_layout {
            let keys: Vec<&str> = path.iter().map(String::as_str).collect();
            result.insert(
                &keys,
                Quantity::from_si_vector(&outputs[*offset..offset + len], *dimension),
            );
        }
        Ok(result)
    }

    /// Export the current state as nested quantity strings, per material
    /// `{T, p, n: {species}}` plus the declared state variables.
    pub fn export_state(&mut self) -> Result<Value, AssemblyError> {
        self.state()?;
        self.arguments_mut()?;
        let x = self.x.clone().expect("state initialized");
        let arguments = self.arguments.as_ref().expect("arguments initialized");
        let mut thermo = Map::new();
        for segment in &self.material_segments {
            let material = segment.material.clone();
            let frame = &material.definition.frame;
            let store_name = material.definition.store.name().to_string();
            let values = arguments
                .thermo_params
                .get(&[store_name.as_str()])
                .cloned()
                .unwrap_or_default();
            let flat = frame.flatten_parameter_values(&values)?;
            let slice = &x[segment.offset..segment.offset + segment.len];
            let (props, _) = frame.evaluate(slice, &flat)?;
            let scalar = |name: &str, dimension: &str| -> Result<String, AssemblyError> {
                let value = props.get(name).and_then(|v| v.first()).copied().ok_or_else(
                    || AssemblyError::Configuration(format!("property '{name}' missing")),
                )?;
                Ok(Quantity::from_si(
                    value,
                    crate::units::parse_unit(dimension)?.dimension,
                )
                .to_string())
            };
            let quantity_unit = material.kind().quantity_unit();
            let n_values = props.get("n").cloned().unwrap_or_default();
            let mut species_map = Map::new();
            for (i, name) in material.species().iter().enumerate() {
                let quantity = Quantity::from_si(
                    n_values.get(i).copied().unwrap_or(f64::NAN),
                    crate::units::parse_unit(quantity_unit)?.dimension,
                );
                species_map.insert(name.clone(), Value::String(quantity.to_string()));
            }
            thermo.insert(
                material.name().to_string(),
                json!({
                    "T": scalar("T", "K")?,
                    "p": scalar("p", "Pa")?,
                    "n": Value::Object(species_map),
                }),
            );
        }
        let mut state_vars = Map::new();
        let mut offset = self.material_segments.iter().map(|s| s.len).sum::<usize>();
        let mut entries = Vec::new();
        walk(&self.tree.root, &mut |instance| {
            for state_var in &instance.state_variables {
                entries.push((state_var.name.clone(), *state_var.initial.dimension()));
            }
        });
        for (name, dimension) in entries {
            state_vars.insert(
                name,
                Value::String(Quantity::from_si(x[offset], dimension).to_string()),
            );
            offset += 1;
        }
        Ok(json!({"thermo": Value::Object(thermo), "state_vars": Value::Object(state_vars)}))
    }

    /// Import a previously exported state; quantity strings round-trip
    /// through the unit parser.
    pub fn import_state(&mut self, value: &Value) -> Result<(), AssemblyError> {
        let thermo = value
            .get("thermo")
            .and_then(Value::as_object)
            .ok_or_else(|| AssemblyError::Configuration("missing 'thermo' entry".into()))?;
        self.state()?;
        let mut x = self.x.clone().expect("state initialized");
        for segment in &self.material_segments {
            let material = segment.material.clone();
            let entry = thermo.get(material.name()).ok_or_else(|| {
                AssemblyError::Configuration(format!(
                    "missing state for material '{}'",
                    material.name()
                ))
            })?;
            let parse = |key: &str| -> Result<Quantity, AssemblyError> {
                let text = entry.get(key).and_then(Value::as_str).ok_or_else(|| {
                    AssemblyError::Configuration(format!(
                        "missing '{key}' for material '{}'",
                        material.name()
                    ))
                })?;
                Ok(Quantity::parse(text)?)
            };
            let n_map = entry.get("n").and_then(Value::as_object).ok_or_else(|| {
                AssemblyError::Configuration(format!(
                    "missing 'n' for material '{}'",
                    material.name()
                ))
            })?;
            let mut mols = Vec::new();
            for species in material.species() {
                let text = n_map.get(species).and_then(Value::as_str).ok_or_else(|| {
                    AssemblyError::Configuration(format!(
                        "missing species '{species}' for material '{}'",
                        material.name()
                    ))
                })?;
                mols.push(Quantity::parse(text)?);
            }
            let initial = InitialState::new(
                parse("T")?,
                parse("p")?,
                crate::quantity::qvertcat(&mols)?,
            );
            let values = material.definition.store.get_all_values()?;
            let slice = material.definition.frame.initial_state(&initial, &values)?;
            x[segment.offset..segment.offset + segment.len].copy_from_slice(&slice);
        }
        if let Some(state_vars) = value.get("state_vars").and_then(Value::as_object) {
            let mut offset = self.material_segments.iter().map(|s| s.len).sum::<usize>();
            let mut names = Vec::new();
            walk(&self.tree.root, &mut |instance| {
                for state_var in &instance.state_variables {
                    names.push(state_var.name.clone());
                }
            });
            for name in names {
                if let Some(text) = state_vars.get(&name).and_then(Value::as_str) {
                    x[offset] = Quantity::parse(text)?.value_si().ok_or_else(|| {
                        AssemblyError::Configuration(format!("state variable '{name}' not numeric"))
                    })?;
                }
                offset += 1;
            }
        }
        self.x = Some(x);
        Ok(())
    }
}
