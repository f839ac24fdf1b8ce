//! Thermodynamic state representation.
//!
//! A state definition interprets the raw, internally dimensionless state
//! vector as physical properties. It is always the first building block of a
//! frame: it publishes `_state`, `T`, the pressure-or-volume entry, and the
//! mole vector `n`, which every contribution then builds on.

use crate::error::{AssemblyError, QuantityError};
use crate::quantity::Quantity;
use crate::thermo::contribution::PropertyMap;

/// An initial state, always in terms of temperature, pressure, and molar
/// quantities, regardless of the frame's internal coordinates.
#[derive(Debug, Clone)]
pub struct InitialState {
    pub temperature: Quantity,
    pub pressure: Quantity,
    pub mol_vector: Quantity,
}

impl InitialState {
    pub fn new(temperature: Quantity, pressure: Quantity, mol_vector: Quantity) -> InitialState {
        InitialState {
            temperature,
            pressure,
            mol_vector,
        }
    }

    /// From plain SI values: K, Pa, mol.
    pub fn from_si(temperature: f64, pressure: f64, mol_vector: &[f64]) -> QResult2 {
        Ok(InitialState {
            temperature: Quantity::new(temperature, "K")?,
            pressure: Quantity::new(pressure, "Pa")?,
            mol_vector: Quantity::vector(mol_vector, "mol")?,
        })
    }

    /// From degC, bar and mol.
    pub fn from_cbar(temperature: f64, pressure: f64, mol_vector: &[f64]) -> QResult2 {
        Ok(InitialState {
            temperature: Quantity::new(temperature, "degC")?,
            pressure: Quantity::new(pressure, "bar")?,
            mol_vector: Quantity::vector(mol_vector, "mol")?,
        })
    }

    /// 25 degC, 1 atm, one mole of each species.
    pub fn from_std(num_species: usize) -> QResult2 {
        Ok(InitialState {
            temperature: Quantity::new(25.0, "degC")?,
            pressure: Quantity::new(1.0, "atm")?,
            mol_vector: Quantity::vector(&vec![1.0; num_species], "mol")?,
        })
    }

    pub fn num_species(&self) -> usize {
        self.mol_vector.len()
    }
}

type QResult2 = Result<InitialState, QuantityError>;

/// Interpretation of the raw state vector in physical terms.
pub trait StateDefinition {
    /// Registered name of this state definition.
    fn name(&self) -> &'static str;

    /// Publish the physical interpretation of the state vector found under
    /// `_state` into the shared property table. With `flow` set, extensive
    /// entries carry per-second units.
    fn prepare(
        &self,
        res: &mut PropertyMap,
        species: &[String],
        flow: bool,
    ) -> Result<(), AssemblyError>;

    /// The raw state vector, as complete as given temperature, pressure and
    /// quantities allow; entries a contribution must fill are `None`.
    fn reverse(&self, state: &InitialState) -> Vec<Option<f64>>;

    /// Human-readable names of the state vector positions.
    fn position_names(&self, species: &[String]) -> Vec<String>;
}

fn split_state(
    res: &mut PropertyMap,
    species: &[String],
    second_name: &str,
    second_unit: &str,
    quantity_unit: &str,
) -> Result<(), AssemblyError> {
    let state = res.require("_state")?;
    let n_species = species.len();
    if state.len() != n_species + 2 {
        return Err(AssemblyError::Configuration(format!(
            "state vector has {} entries, expected {}",
            state.len(),
            n_species + 2
        )));
    }
    let assign = |q: Quantity, unit: &str| -> Result<Quantity, QuantityError> {
        // reinterpret the dimensionless raw entries with their physical unit
        let unit = crate::units::parse_unit(unit)?;
        Ok(Quantity::from_expressions(
            q.magnitude().to_vec(),
            unit.dimension,
        ))
    };
    res.set("T", assign(state.element(0), "K")?);
    res.set(second_name, assign(state.element(1), second_unit)?);
    let n = Quantity::from_expressions(
        state.magnitude()[2..].to_vec(),
        crate::units::parse_unit(quantity_unit)?.dimension,
    );
    res.set("n", n);
    Ok(())
}

/// `[T, p, n_0...]`: canonical coordinates of `G(T,p,n)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GibbsState;

impl StateDefinition for GibbsState {
    fn name(&self) -> &'static str {
        "GibbsState"
    }

    fn prepare(
        &self,
        res: &mut PropertyMap,
        species: &[String],
        flow: bool,
    ) -> Result<(), AssemblyError> {
        let quantity_unit = if flow { "mol/s" } else { "mol" };
        split_state(res, species, "p", "Pa", quantity_unit)
    }

    fn reverse(&self, state: &InitialState) -> Vec<Option<f64>> {
        let mut raw = vec![
            state.temperature.value_si(),
            state.pressure.value_si(),
        ];
        match state.mol_vector.values_si() {
            Some(values) => raw.extend(values.into_iter().map(Some)),
            None => raw.extend(std::iter::repeat(None).take(state.num_species())),
        }
        raw
    }

    fn position_names(&self, species: &[String]) -> Vec<String> {
        let mut names = vec!["T".to_string(), "p".to_string()];
        names.extend(species.iter().map(|s| format!("n[{s}]")));
        names
    }
}

/// `[T, V, n_0...]`: canonical coordinates of `A(T,V,n)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HelmholtzState;

impl StateDefinition for HelmholtzState {
    fn name(&self) -> &'static str {
        "HelmholtzState"
    }

    fn prepare(
        &self,
        res: &mut PropertyMap,
        species: &[String],
        flow: bool,
    ) -> Result<(), AssemblyError> {
        let (volume_unit, quantity_unit) = if flow {
            ("m**3/s", "mol/s")
        } else {
            ("m**3", "mol")
        };
        split_state(res, species, "V", volume_unit, quantity_unit)
    }

    fn reverse(&self, state: &InitialState) -> Vec<Option<f64>> {
        // the volume entry is left for the contributions to fill
        let mut raw = vec![state.temperature.value_si(), None];
        match state.mol_vector.values_si() {
            Some(values) => raw.extend(values.into_iter().map(Some)),
            None => raw.extend(std::iter::repeat(None).take(state.num_species())),
        }
        raw
    }

    fn position_names(&self, species: &[String]) -> Vec<String> {
        let mut names = vec!["T".to_string(), "V".to_string()];
        names.extend(species.iter().map(|s| format!("n[{s}]")));
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Quantity;

    fn property_map_with_state(n: usize) -> PropertyMap {
        let mut res = PropertyMap::new();
        let state = Quantity::symbol_vector("x", n + 2, "dimless").unwrap();
        res.set("_state", state);
        res
    }

    #[test]
    fn gibbs_state_positions() {
        let species = vec!["CH4".to_string(), "H2O".to_string()];
        let mut res = property_map_with_state(2);
        GibbsState.prepare(&mut res, &species, false).unwrap();
        assert_eq!(res.require("T").unwrap().len(), 1);
        assert_eq!(res.require("p").unwrap().len(), 1);
        assert_eq!(res.require("n").unwrap().len(), 2);
        assert_eq!(
            GibbsState.position_names(&species),
            vec!["T", "p", "n[CH4]", "n[H2O]"]
        );
    }

    #[test]
    fn helmholtz_reverse_leaves_volume_open() {
        let state = InitialState::from_si(300.0, 1e5, &[1.0, 2.0]).unwrap();
        let raw = HelmholtzState.reverse(&state);
        assert_eq!(raw[0], Some(300.0));
        assert_eq!(raw[1], None);
        assert_eq!(raw[2], Some(1.0));
        assert_eq!(raw[3], Some(2.0));
    }

    #[test]
    fn gibbs_reverse_is_complete() {
        let state = InitialState::from_cbar(25.0, 2.0, &[1.0]).unwrap();
        let raw = GibbsState.reverse(&state);
        assert_eq!(raw[0], Some(298.15));
        assert_eq!(raw[1], Some(2e5));
        assert_eq!(raw[2], Some(1.0));
    }

    #[test]
    fn standard_initial_state() {
        let state = InitialState::from_std(3).unwrap();
        assert_eq!(state.num_species(), 3);
        assert!((state.pressure.value_si().unwrap() - 101_325.0).abs() < 1e-9);
    }
}
