//! Reference state, heat capacity, ideal mix, ideal gas, and condensed
//! volume contributions.

use crate::constants::r_gas;
use crate::error::AssemblyError;
use crate::quantity::{qlog, qsum};
use crate::thermo::contribution::{
    BoundSet, ContributionSetup, NumericProps, ParameterDictionary, PropertyMap,
    ThermoContribution,
};
use crate::thermo::state::InitialState;

/// Reference state from enthalpy of formation and standard entropy:
/// `mu_i = dh_form_i - T * s_0_i` at `(T_ref, p_ref)`.
///
/// Publishes `S`, `mu`, the tags `S_ref`/`mu_ref`, and the reference
/// conditions `T_ref`, `p_ref`.
pub struct H0S0ReferenceState {
    species: Vec<String>,
}

impl H0S0ReferenceState {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(H0S0ReferenceState {
            species: setup.species,
        }))
    }
}

impl ThermoContribution for H0S0ReferenceState {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let t = res.require("T")?;
        let n = res.require("n")?;
        let s_0 = par.register_vector("s_0", &self.species, "J/(mol*K)")?;
        let dh_form = par.register_vector("dh_form", &self.species, "J/mol")?;

        let entropy = s_0.dot(&n)?;
        let mu = (&dh_form - &t * &s_0)?;
        res.set("S_ref", entropy.clone());
        res.set("mu_ref", mu.clone());
        res.set("S", entropy);
        res.set("mu", mu);
        res.set("T_ref", par.register_scalar("T_ref", "K")?);
        res.set("p_ref", par.register_scalar("p_ref", "Pa")?);
        Ok(())
    }

    fn declared_vectors(&self) -> Vec<(String, Vec<String>)> {
        vec![
            ("mu".to_string(), self.species.clone()),
            ("mu_ref".to_string(), self.species.clone()),
        ]
    }
}

/// Heat capacity linear in temperature, `c_p(T) = a + b (T - T_ref)`.
///
/// Adds the enthalpy integral to `mu` and the `c_p/T` integral to `S`. The
/// logarithmic entropy term restricts the domain to positive temperatures.
pub struct LinearHeatCapacity {
    species: Vec<String>,
}

impl LinearHeatCapacity {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(LinearHeatCapacity {
            species: setup.species,
        }))
    }
}

impl ThermoContribution for LinearHeatCapacity {
    fn define(
        &self,
        res: &mut PropertyMap,
        bounds: &mut BoundSet,
        par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let t = res.require("T")?;
        let n = res.require("n")?;
        let t_ref = res.require("T_ref")?;
        let d_t = (&t - &t_ref)?;
        let f_t = (&t / &t_ref)?;
        let cp_a = par.register_vector("cp_a", &self.species, "J/(mol*K)")?;
        let cp_b = par.register_vector("cp_b", &self.species, "J/(mol*K**2)")?;

        let d_h = ((&cp_a + ((&cp_b * &d_t)? * 0.5)?)? * &d_t)?;
        let d_s = ((&cp_a - &cp_b * &t_ref)? * qlog(&f_t)? + (&cp_b * &d_t)?)?;
        res.add_to("S", d_s.dot(&n))?;
        res.add_to("mu", &d_h - (&t * &d_s)?)?;

        bounds.add("T", t);
        Ok(())
    }
}

/// Freeze the current `S`, `mu` and `p_ref` as the standard state tags
/// `S_std`, `mu_std`, `p_std`. No computation.
pub struct StandardState {
    species: Vec<String>,
}

impl StandardState {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(StandardState {
            species: setup.species,
        }))
    }
}

impl ThermoContribution for StandardState {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        _par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let entropy = res.require("S")?;
        let p_ref = res.require("p_ref")?;
        let mu = res.require("mu")?;
        res.set("S_std", entropy);
        res.set("p_std", p_ref);
        res.set("mu_std", mu);
        Ok(())
    }

    fn declared_vectors(&self) -> Vec<(String, Vec<String>)> {
        vec![("mu_std".to_string(), self.species.clone())]
    }
}

/// Ideal mixing entropy, applicable to both liquid and gas phases:
/// `mu_i += R T ln(n_i / N)`, `S -= sum_i n_i R ln(n_i / N)`.
///
/// The domain is limited to positive quantities; allowing the third
/// quadrant as well has proven hostile to solver robustness.
pub struct IdealMix;

impl IdealMix {
    pub fn new(_setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(IdealMix))
    }
}

impl ThermoContribution for IdealMix {
    fn define(
        &self,
        res: &mut PropertyMap,
        bounds: &mut BoundSet,
        _par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let t = res.require("T")?;
        let n = res.require("n")?;
        let total = qsum(&n);
        let x = (&n / &total)?;
        let gtn = (r_gas() * qlog(&x)?)?;
        res.sub_from("S", n.dot(&gtn))?;
        res.add_to("mu", &t * &gtn)?;

        bounds.add("n", n);
        Ok(())
    }
}

/// Ideal gas in Gibbs coordinates: pressure-dependent entropy and the
/// volume `V = N R T / p`.
pub struct GibbsIdealGas;

impl GibbsIdealGas {
    pub fn new(_setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(GibbsIdealGas))
    }
}

impl ThermoContribution for GibbsIdealGas {
    fn define(
        &self,
        res: &mut PropertyMap,
        bounds: &mut BoundSet,
        _par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let t = res.require("T")?;
        let p = res.require("p")?;
        let n = res.require("n")?;
        let p_ref = res.require("p_ref")?;
        let total = qsum(&n);
        let gtn = (r_gas() * qlog(&(&p / &p_ref)?)?)?;

        res.sub_from("S", &total * &gtn)?;
        res.set("V", (&total * r_gas() * &t / &p)?);
        res.add_to("mu", &t * &gtn)?;

        bounds.add("p", p);
        Ok(())
    }
}

/// Ideal gas in Helmholtz coordinates: the symmetric form with volume as
/// the independent variable, emitting `p = N R T / V`.
///
/// The common base contribution for equations of state; it also knows how
/// to estimate the initial volume for a `(T, p, n)` specification.
pub struct HelmholtzIdealGas;

impl HelmholtzIdealGas {
    pub fn new(_setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(HelmholtzIdealGas))
    }
}

impl ThermoContribution for HelmholtzIdealGas {
    fn define(
        &self,
        res: &mut PropertyMap,
        bounds: &mut BoundSet,
        _par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let t = res.require("T")?;
        let v = res.require("V")?;
        let n = res.require("n")?;
        let p_ref = res.require("p_ref")?;
        let total = qsum(&n);
        let p = (&total * r_gas() * &t / &v)?;
        let gtn = (r_gas() * qlog(&(&p / &p_ref)?)?)?;

        res.sub_from("S", &total * &gtn)?;
        res.set("p", p);
        res.add_to("mu", &t * &gtn)?;

        bounds.add("V", v);
        Ok(())
    }

    fn initial_state(&self, state: &InitialState, _props: &NumericProps) -> Option<Vec<f64>> {
        let temperature = state.temperature.value_si()?;
        let pressure = state.pressure.value_si()?;
        let quantities = state.mol_vector.values_si()?;
        let total: f64 = quantities.iter().sum();
        let volume = total * crate::constants::GAS_CONSTANT_SI * temperature / pressure;
        let mut raw = vec![temperature, volume];
        raw.extend(quantities);
        Some(raw)
    }
}

/// Condensed phase with constant molar volumes: zero compressibility and
/// thermal expansion, no mixing volume.
///
/// `V += sum_i v_n_i n_i` and `mu_i += v_n_i (p - p_ref)`.
pub struct ConstantGibbsVolume {
    species: Vec<String>,
}

impl ConstantGibbsVolume {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(ConstantGibbsVolume {
            species: setup.species,
        }))
    }
}

impl ThermoContribution for ConstantGibbsVolume {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let n = res.require("n")?;
        let p = res.require("p")?;
        let p_ref = res.require("p_ref")?;
        let v_n = par.register_vector("v_n", &self.species, "m**3/mol")?;
        res.add_to("mu", &v_n * (&p - &p_ref)?)?;
        res.add_to("V", v_n.dot(&n))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Quantity;
    use serde_json::Value;

    fn setup(species: &[&str]) -> ContributionSetup {
        ContributionSetup {
            species: species.iter().map(|s| s.to_string()).collect(),
            species_defs: species
                .iter()
                .map(|s| crate::species::SpeciesDefinition::new(s).unwrap())
                .collect(),
            options: Value::Null,
        }
    }

    fn base_map(n: &[f64]) -> PropertyMap {
        let mut res = PropertyMap::new();
        res.set("T", Quantity::new(300.0, "K").unwrap());
        res.set("n", Quantity::vector(n, "mol").unwrap());
        res
    }

    #[test]
    fn reference_state_values() {
        let contribution = H0S0ReferenceState::new(setup(&["CH4"])).unwrap();
        let mut res = base_map(&[2.0]);
        let mut bounds = BoundSet::new();
        let mut supply = crate::structures::NestedQuantity::empty();
        supply.insert(&["s_0", "CH4"], Quantity::new(188.66, "J/(mol*K)").unwrap());
        supply.insert(&["dh_form", "CH4"], Quantity::new(-74.87, "kJ/mol").unwrap());
        supply.insert(&["T_ref", ], Quantity::new(25.0, "degC").unwrap());
        supply.insert(&["p_ref"], Quantity::new(1.0, "bar").unwrap());
        let mut par = ParameterDictionary::with_supply("H0S0ReferenceState", supply);
        contribution.define(&mut res, &mut bounds, &mut par).unwrap();

        let entropy = res.require("S").unwrap().value_si().unwrap();
        assert!((entropy - 2.0 * 188.66).abs() < 1e-9);
        let mu = res.require("mu").unwrap().value_si().unwrap();
        assert!((mu - (-74_870.0 - 300.0 * 188.66)).abs() < 1e-9);
    }

    #[test]
    fn ideal_gas_residual_two_components() {
        // literal scenario: mu_i = mu_im_i + T R ln(p/p_ref),
        // S = S_im - (n_0+n_1) R ln(p/p_ref), V = (n_0+n_1) R T / p
        let contribution = GibbsIdealGas::new(setup(&["A", "B"])).unwrap();
        let mut res = base_map(&[1.0, 2.0]);
        res.set("p", Quantity::new(2.0, "bar").unwrap());
        res.set("p_ref", Quantity::new(1.0, "bar").unwrap());
        res.set("S", Quantity::new(10.0, "J/K").unwrap());
        res.set(
            "mu",
            Quantity::vector(&[-100.0, -200.0], "J/mol").unwrap(),
        );
        let mut bounds = BoundSet::new();
        let mut par = ParameterDictionary::new("GibbsIdealGas");
        contribution.define(&mut res, &mut bounds, &mut par).unwrap();

        let rtln = 8.31446 * 2f64.ln();
        let s = res.require("S").unwrap().value_si().unwrap();
        assert!((s - (10.0 - 3.0 * rtln)).abs() < 1e-9);
        let mu = res.require("mu").unwrap().values_si().unwrap();
        assert!((mu[0] - (-100.0 + 300.0 * rtln)).abs() < 1e-9);
        assert!((mu[1] - (-200.0 + 300.0 * rtln)).abs() < 1e-9);
        let v = res.require("V").unwrap().value_si().unwrap();
        assert!((v - 3.0 * 8.31446 * 300.0 / 2e5).abs() < 1e-12);
        assert_eq!(bounds.entries()[0].0, "p");
    }

    #[test]
    fn ideal_mix_entropy() {
        let contribution = IdealMix::new(setup(&["A", "B"])).unwrap();
        let mut res = base_map(&[1.0, 1.0]);
        res.set("S", Quantity::new(0.0, "J/K").unwrap());
        res.set("mu", Quantity::vector(&[0.0, 0.0], "J/mol").unwrap());
        let mut bounds = BoundSet::new();
        let mut par = ParameterDictionary::new("IdealMix");
        contribution.define(&mut res, &mut bounds, &mut par).unwrap();

        // equimolar: S = -sum n R ln(1/2) = 2 R ln 2
        let s = res.require("S").unwrap().value_si().unwrap();
        assert!((s - 2.0 * 8.31446 * 2f64.ln()).abs() < 1e-9);
        let mu = res.require("mu").unwrap().values_si().unwrap();
        assert!((mu[0] - 300.0 * 8.31446 * 0.5f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn constant_gibbs_volume_expressions() {
        // literal scenario: V = v_n.A n_0 + v_n.B n_1,
        // mu_i = mu_std_i + v_n_i (p - p_ref)
        let contribution = ConstantGibbsVolume::new(setup(&["A", "B"])).unwrap();
        let mut res = base_map(&[2.0, 3.0]);
        res.set("p", Quantity::new(5.0, "bar").unwrap());
        res.set("p_ref", Quantity::new(1.0, "bar").unwrap());
        res.set("mu", Quantity::vector(&[-10.0, -20.0], "J/mol").unwrap());
        let mut supply = crate::structures::NestedQuantity::empty();
        supply.insert(&["v_n", "A"], Quantity::new(1e-5, "m**3/mol").unwrap());
        supply.insert(&["v_n", "B"], Quantity::new(2e-5, "m**3/mol").unwrap());
        let mut par = ParameterDictionary::with_supply("ConstantGibbsVolume", supply);
        let mut bounds = BoundSet::new();
        contribution.define(&mut res, &mut bounds, &mut par).unwrap();

        let v = res.require("V").unwrap().value_si().unwrap();
        assert!((v - (1e-5 * 2.0 + 2e-5 * 3.0)).abs() < 1e-15);
        let mu = res.require("mu").unwrap().values_si().unwrap();
        assert!((mu[0] - (-10.0 + 1e-5 * 4e5)).abs() < 1e-9);
        assert!((mu[1] - (-20.0 + 2e-5 * 4e5)).abs() < 1e-9);
    }

    #[test]
    fn helmholtz_ideal_gas_initial_state() {
        let contribution = HelmholtzIdealGas::new(setup(&["A"])).unwrap();
        let state = InitialState::from_si(300.0, 1e5, &[2.0]).unwrap();
        let raw = contribution
            .initial_state(&state, &NumericProps::new())
            .unwrap();
        let expected_v = 2.0 * 8.31446 * 300.0 / 1e5;
        assert!((raw[1] - expected_v).abs() < 1e-12);
        assert_eq!(raw.len(), 3);
    }
}
