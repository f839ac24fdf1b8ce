//! Cubic equation-of-state contributions: critical parameters, the
//! Redlich-Kwong family with Boston-Mathias alpha extrapolation, mixing
//! rules, volume shift, and the EOS itself with analytic root handling.

use crate::constants::{r_gas, GAS_CONSTANT_SI};
use crate::error::AssemblyError;
use crate::quantity::{
    conditional, jacobian, qexp, qlog, qpow, qsqrt, qsum, Quantity,
};
use crate::thermo::contribution::{
    BoundSet, ContributionSetup, NumericProps, ParameterDictionary, PropertyMap,
    ThermoContribution,
};
use crate::thermo::state::InitialState;

/// Publish the critical parameters `_T_c`, `_p_c`, `_omega` for the EOS
/// contributions to consume. No computation.
pub struct CriticalParameters {
    species: Vec<String>,
}

impl CriticalParameters {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(CriticalParameters {
            species: setup.species,
        }))
    }
}

impl ThermoContribution for CriticalParameters {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        res.set("_T_c", par.register_vector("T_c", &self.species, "K")?);
        res.set("_p_c", par.register_vector("p_c", &self.species, "bar")?);
        res.set("_omega", par.register_vector("omega", &self.species, "dimless")?);
        Ok(())
    }
}

/// Volume shift parameters `c_i`, lumped into `_ceos_c` via a mixing rule.
pub struct VolumeShift {
    species: Vec<String>,
}

impl VolumeShift {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(VolumeShift {
            species: setup.species,
        }))
    }
}

impl ThermoContribution for VolumeShift {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        res.set("_ceos_c_i", par.register_vector("c_i", &self.species, "m**3/mol")?);
        Ok(())
    }
}

/// The Redlich-Kwong m-factor from the acentric factor:
/// `m = 0.48508 + (1.55171 - 0.15613 omega) omega`.
pub struct RedlichKwongMFactor;

impl RedlichKwongMFactor {
    pub fn new(_setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(RedlichKwongMFactor))
    }
}

impl ThermoContribution for RedlichKwongMFactor {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        _par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let omega = res.require("_omega")?;
        let m = (0.48508 + ((1.55171 - (&omega * 0.15613)?)? * &omega)?)?;
        res.set("_m_factor", m);
        Ok(())
    }
}

/// Mathias alpha function with the Boston-Mathias extrapolation for
/// supercritical temperatures.
///
/// With `tau = sqrt(T/T_c)`, the sub-critical branch is
/// `alpha^1/2 = 1 + m (1 - tau) - eta (1 - tau)(0.7 - tau^2)`; above the
/// critical temperature `alpha^1/2 = exp(c/d (1 - tau^d))` with
/// `c = m + 0.3 eta` and `d = 1 + 4 eta / c + c`, continuous up to the
/// second derivative at `tau = 1`.
pub struct BostonMathiasAlphaFunction {
    species: Vec<String>,
}

impl BostonMathiasAlphaFunction {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(BostonMathiasAlphaFunction {
            species: setup.species,
        }))
    }
}

impl ThermoContribution for BostonMathiasAlphaFunction {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let eta = par.register_vector("eta", &self.species, "dimless")?;
        let temperature = res.require("T")?;
        let critical = res.require("_T_c")?;
        let m_factor = res.require("_m_factor")?;

        let tau = (&temperature / &critical)?;
        let stau = qsqrt(&tau);
        let one_minus = (1.0 - &stau)?;

        let m_term = (&m_factor * &one_minus)?;
        let eta_term = (&eta * &one_minus * (0.7 - &tau)?)?;
        let alpha_sub = ((1.0 + &m_term)? - &eta_term)?;

        let bm_c = (&m_factor + &eta * 0.3)?;
        let bm_d = ((1.0 + &bm_c)? + (&eta * 4.0)? / &bm_c)?;
        let alpha_sup = qexp(&((&bm_c / &bm_d)? * (1.0 - qpow(&stau, &bm_d)?)?)?)?;

        let supercritical = tau.gt(&Quantity::dimensionless(1.0))?;
        let alpha_root = conditional(&supercritical, &alpha_sup, &alpha_sub)?;
        res.set("_alpha", (&alpha_root * &alpha_root)?);
        Ok(())
    }
}

/// Scale the alpha function into the species a-contribution:
/// `a_i = alpha_i Omega_a R^2 T_c_i^2 / p_c_i` with
/// `Omega_a = 1 / (9 (2^1/3 - 1))`.
pub struct RedlichKwongAFunction;

impl RedlichKwongAFunction {
    pub fn new(_setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(RedlichKwongAFunction))
    }
}

impl ThermoContribution for RedlichKwongAFunction {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        _par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let omega_a = 1.0 / (9.0 * (2f64.powf(1.0 / 3.0) - 1.0));
        let alpha = res.require("_alpha")?;
        let t_c = res.require("_T_c")?;
        let p_c = res.require("_p_c")?;
        let r2 = (r_gas() * r_gas())?;
        res.set(
            "_ceos_a_i",
            ((&alpha * omega_a)? * &r2 * (&t_c * &t_c)? / &p_c)?,
        );
        Ok(())
    }
}

/// The species b-contribution: `b_i = Omega_b R T_c_i / p_c_i` with
/// `Omega_b = (2^1/3 - 1) / 3`.
pub struct RedlichKwongBFunction;

impl RedlichKwongBFunction {
    pub fn new(_setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(RedlichKwongBFunction))
    }
}

impl ThermoContribution for RedlichKwongBFunction {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        _par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let omega_b = (2f64.powf(1.0 / 3.0) - 1.0) / 3.0;
        let t_c = res.require("_T_c")?;
        let p_c = res.require("_p_c")?;
        res.set("_ceos_b_i", ((r_gas() * omega_b)? * &t_c / &p_c)?);
        Ok(())
    }
}

/// Weighted sum over molar quantities: `target = sum_i source_i n_i`.
///
/// Options: `target` (required), `source` (defaults to `<target>_i`).
pub struct LinearMixingRule {
    target: String,
    source: String,
}

impl LinearMixingRule {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        let target = setup.required_option("target")?;
        let source = setup
            .string_option("source")
            .unwrap_or_else(|| format!("{target}_i"));
        Ok(Box::new(LinearMixingRule { target, source }))
    }
}

impl ThermoContribution for LinearMixingRule {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        _par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let source = res.require(&self.source)?;
        let n = res.require("n")?;
        res.set(&self.target, source.dot(&n)?);
        Ok(())
    }
}

/// Mixing rule with symmetric and antisymmetric binary interactions.
///
/// With `a_n_i = sqrt(a_i) n_i` and sparse per-pair parameters `k_1`,
/// `k_2`, `l_1`:
///
/// `target = (sum_i a_n_i)^2
///           + sum_pairs 2 a_n_i a_n_j (k1_ij - k2_ij (T/T_ref - 1))
///           - (2/N) sum_pairs (n_j - n_i) a_n_i a_n_j l1_ij`
///
/// Memory and runtime stay linear in species count and in the number of
/// nonzero interaction entries.
pub struct NonSymmetricMixingRule {
    species: Vec<String>,
    target: String,
    source: String,
    k_1: Vec<(String, String)>,
    k_2: Vec<(String, String)>,
    l_1: Vec<(String, String)>,
}

impl NonSymmetricMixingRule {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        let target = setup.required_option("target")?;
        let source = setup
            .string_option("source")
            .unwrap_or_else(|| format!("{target}_i"));
        let (k_1, k_2, l_1) = (
            setup.pair_option("k_1")?,
            setup.pair_option("k_2")?,
            setup.pair_option("l_1")?,
        );
        Ok(Box::new(NonSymmetricMixingRule {
            species: setup.species,
            target,
            source,
            k_1,
            k_2,
            l_1,
        }))
    }

    fn index(&self, name: &str) -> usize {
        self.species
            .iter()
            .position(|s| s == name)
            .unwrap_or_default()
    }
}

impl ThermoContribution for NonSymmetricMixingRule {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let temperature = res.require("T")?;
        let n = res.require("n")?;
        let a_i = res.require(&self.source)?;
        let a_n = (qsqrt(&a_i) * &n)?;
        let mut target = qsum(&a_n).sq();

        let mut symmetric: Vec<Quantity> = Vec::new();
        for (i, j, k1) in par.register_sparse_matrix("k_1", &self.k_1, "dimless")? {
            let pair = (a_n.element(self.index(&i)) * a_n.element(self.index(&j)))?;
            symmetric.push(((&pair * &k1)? * 2.0)?);
        }
        if !self.k_2.is_empty() {
            let t_ref = par.register_scalar("T_ref", "K")?;
            let tau_m1 = ((&temperature / &t_ref)? - 1.0)?;
            for (i, j, k2) in par.register_sparse_matrix("k_2", &self.k_2, "dimless")? {
                let pair = (a_n.element(self.index(&i)) * a_n.element(self.index(&j)))?;
                symmetric.push((-((&pair * &k2)? * &tau_m1)? * 2.0)?);
            }
        }
        for term in symmetric {
            target = (target + term)?;
        }

        if !self.l_1.is_empty() {
            let total = qsum(&n);
            let mut antisymmetric: Option<Quantity> = None;
            for (i, j, l1) in par.register_sparse_matrix("l_1", &self.l_1, "dimless")? {
                let (ii, jj) = (self.index(&i), self.index(&j));
                let pair = (a_n.element(ii) * a_n.element(jj))?;
                let skew = (n.element(jj) - n.element(ii))?;
                let term = ((&pair * &skew)? * &l1)?;
                antisymmetric = Some(match antisymmetric.take() {
                    Some(sum) => (sum + term)?,
                    None => term,
                });
            }
            if let Some(antisymmetric) = antisymmetric {
                target = (target - (antisymmetric * 2.0)? / &total)?;
            }
        }

        res.set(&self.target, target);
        Ok(())
    }
}

/// Phase selection of the cubic EOS root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubicPhase {
    Gas,
    Liquid,
}

/// General Redlich-Kwong equation of state with Peneloux volume shift:
///
/// `p = N R T / (V - B + C) - A / ((V + C)(V + B + C))`
///
/// Consumes the lumped `_ceos_a`, `_ceos_b` and optionally `_ceos_c`
/// properties, and contributes the residual entropy, pressure and chemical
/// potentials derived from the residual Helmholtz function. The gas variant
/// keeps the largest real root of the cubic, the liquid variant the
/// smallest; both root selection and the post-step projection use the
/// analytic discriminant classification.
pub struct RedlichKwongEOS {
    phase: CubicPhase,
}

impl RedlichKwongEOS {
    pub fn gas(_setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(RedlichKwongEOS {
            phase: CubicPhase::Gas,
        }))
    }

    pub fn liquid(_setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(RedlichKwongEOS {
            phase: CubicPhase::Liquid,
        }))
    }

    fn select_root(&self, roots: &[f64]) -> Option<f64> {
        match self.phase {
            CubicPhase::Gas => roots.iter().copied().fold(None, |acc, v| {
                Some(acc.map_or(v, |a: f64| a.max(v)))
            }),
            CubicPhase::Liquid => roots.iter().copied().fold(None, |acc, v| {
                Some(acc.map_or(v, |a: f64| a.min(v)))
            }),
        }
    }

    /// Volumes solving the EOS for given conditions, from the cubic in the
    /// compressibility factor.
    fn volume_roots(a: f64, b: f64, c: f64, n_total: f64, temperature: f64, pressure: f64) -> Vec<f64> {
        let nrt = n_total * GAS_CONSTANT_SI * temperature;
        if !(nrt > 0.0) || !(pressure > 0.0) {
            return Vec::new();
        }
        let alpha = a * pressure / (nrt * nrt);
        let beta = b * pressure / nrt;
        let roots = solve_cubic(-1.0, alpha - beta * (1.0 + beta), -alpha * beta);
        roots
            .into_iter()
            .filter(|&z| z > beta)
            .map(|z| z * nrt / pressure - c)
            .collect()
    }
}

impl ThermoContribution for RedlichKwongEOS {
    fn define(
        &self,
        res: &mut PropertyMap,
        bounds: &mut BoundSet,
        _par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let t = res.require("T")?;
        let v = res.require("V")?;
        let n = res.require("n")?;
        let a = res.require("_ceos_a")?;
        let b = res.require("_ceos_b")?;
        let c = if res.contains("_ceos_c") {
            res.require("_ceos_c")?
        } else {
            Quantity::new(0.0, "m**3")?
        };

        let a_t = jacobian(&a, &t)?;
        let b_t = jacobian(&b, &t)?;
        let c_t = jacobian(&c, &t)?;
        let a_n = jacobian(&a, &n)?;
        let b_n = jacobian(&b, &n)?;
        let c_n = jacobian(&c, &n)?;

        let total = qsum(&n);
        let nr = (&total * r_gas())?;
        let rt = (&t * r_gas())?;
        let vc = (&v + &c)?;
        let vm_bc = (&vc - &b)?;
        let vp_bc = (&vc + &b)?;
        let ab = (&a / &b)?;
        let log_v = qlog(&(&v / &vm_bc)?)?;
        let log_c = qlog(&(&vc / &vp_bc)?)?;

        // residual entropy
        let m_ds = ((&nr * (&log_v + (&t * (&b_t - &c_t)?)? / &vm_bc)?)?
            + ((&a_t - (&ab * &b_t)?)? / &b * &log_c)?
            + (&ab * ((&c_t / &vc)? - (&b_t + &c_t)? / &vp_bc)?)?)?;
        res.sub_from("S", Ok(m_ds))?;

        // residual pressure
        let ideal_gap = ((1.0 / &v)? - (1.0 / &vm_bc)?)?;
        let p_res = ((&nr * &t * &ideal_gap)? + (&a / (&vc * &vp_bc)?)?)?;
        res.sub_from("p", Ok(p_res))?;

        // residual chemical potential
        let dmu = ((&rt * (&log_v + (&total * (&b_n - &c_n)?)? / &vm_bc)?)?
            + ((&a_n - (&ab * &b_n)?)? / &b * &log_c)?
            + (&ab * ((&c_n / &vc)? - (&b_n + &c_n)? / &vp_bc)?)?)?;
        res.add_to("mu", Ok(dmu))?;

        // domain quantities for bounds and the projection hook
        let p_total = res.require("p")?;
        let dp_dv = jacobian(&p_total, &v)?;
        res.set("_dp_dV", dp_dv.clone());

        bounds.add("VBC", vm_bc);
        bounds.add("neg_dp_dV", -&dp_dv);
        if self.phase == CubicPhase::Liquid {
            bounds.add("p", p_total);
        }
        Ok(())
    }

    fn relax(&self, props: &NumericProps, slice: &mut [f64]) {
        let scalar = |name: &str| props.get(name).and_then(|v| v.first()).copied();
        let (Some(a), Some(b), Some(p), Some(dp_dv)) = (
            scalar("_ceos_a"),
            scalar("_ceos_b"),
            scalar("p"),
            scalar("_dp_dV"),
        ) else {
            return;
        };
        let c = scalar("_ceos_c").unwrap_or(0.0);
        let volume = slice[1];
        let vbc = volume + c - b;
        // healthy state: inside the domain and on a falling p(V) branch
        if dp_dv < 0.0 && vbc > 0.0 && volume > 0.0 {
            return;
        }
        if !(p > 0.0) || !p.is_finite() {
            return;
        }
        let n_total: f64 = slice[2..].iter().sum();
        let roots = RedlichKwongEOS::volume_roots(a, b, c, n_total, slice[0], p);
        if let Some(root) = self.select_root(&roots) {
            slice[1] = root;
        }
    }

    fn initial_state(&self, state: &InitialState, props: &NumericProps) -> Option<Vec<f64>> {
        let scalar = |name: &str| props.get(name).and_then(|v| v.first()).copied();
        let a = scalar("_ceos_a")?;
        let b = scalar("_ceos_b")?;
        let c = scalar("_ceos_c").unwrap_or(0.0);
        let temperature = state.temperature.value_si()?;
        let pressure = state.pressure.value_si()?;
        let quantities = state.mol_vector.values_si()?;
        let n_total: f64 = quantities.iter().sum();
        let roots = RedlichKwongEOS::volume_roots(a, b, c, n_total, temperature, pressure);
        let volume = self.select_root(&roots)?;
        let mut raw = vec![temperature, volume];
        raw.extend(quantities);
        Some(raw)
    }
}

/// Real roots of `z^3 + b2 z^2 + b1 z + b0`, classified by the
/// discriminant.
pub(crate) fn solve_cubic(b2: f64, b1: f64, b0: f64) -> Vec<f64> {
    let q = (3.0 * b1 - b2 * b2) / 9.0;
    let r = (9.0 * b2 * b1 - 27.0 * b0 - 2.0 * b2 * b2 * b2) / 54.0;
    let discriminant = q * q * q + r * r;
    let shift = -b2 / 3.0;
    if discriminant > 0.0 {
        // one real root
        let sqrt_d = discriminant.sqrt();
        let s = (r + sqrt_d).cbrt();
        let t = (r - sqrt_d).cbrt();
        vec![s + t + shift]
    } else {
        // three real roots (possibly degenerate)
        let minus_q = (-q).max(0.0);
        let magnitude = 2.0 * minus_q.sqrt();
        if magnitude == 0.0 {
            return vec![shift];
        }
        let theta = (r / minus_q.powf(1.5)).clamp(-1.0, 1.0).acos();
        (0..3)
            .map(|k| magnitude * ((theta + 2.0 * std::f64::consts::PI * k as f64) / 3.0).cos() + shift)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CompiledFunction;
    use crate::thermo::state::StateDefinition;
    use serde_json::{json, Value};

    fn setup(species: &[&str], options: Value) -> ContributionSetup {
        ContributionSetup {
            species: species.iter().map(|s| s.to_string()).collect(),
            species_defs: species
                .iter()
                .map(|_| crate::species::SpeciesDefinition::new("CH4").unwrap())
                .collect(),
            options,
        }
    }

    #[test]
    fn m_factor_literal_value() {
        let contribution = RedlichKwongMFactor::new(setup(&["A"], Value::Null)).unwrap();
        let mut res = PropertyMap::new();
        res.set("_omega", Quantity::vector(&[0.2], "dimless").unwrap());
        let mut bounds = BoundSet::new();
        let mut par = ParameterDictionary::new("RedlichKwongMFactor");
        contribution.define(&mut res, &mut bounds, &mut par).unwrap();
        let m = res.require("_m_factor").unwrap().value_si().unwrap();
        // 0.48508 - (0.15613 * 0.2 - 1.55171) * 0.2
        assert!((m - 0.7891768).abs() < 1e-10);
    }

    #[test]
    fn ab_function_constants() {
        // a_i = 29.5518 T_c^2 / p_c and b_i = 0.720368 T_c / p_c at alpha=1
        let mut res = PropertyMap::new();
        res.set("_alpha", Quantity::vector(&[1.0], "dimless").unwrap());
        res.set("_T_c", Quantity::vector(&[1.0], "K").unwrap());
        res.set("_p_c", Quantity::vector(&[1.0], "Pa").unwrap());
        let mut bounds = BoundSet::new();
        let mut par = ParameterDictionary::new("RKA");
        RedlichKwongAFunction::new(setup(&["A"], Value::Null))
            .unwrap()
            .define(&mut res, &mut bounds, &mut par)
            .unwrap();
        RedlichKwongBFunction::new(setup(&["A"], Value::Null))
            .unwrap()
            .define(&mut res, &mut bounds, &mut par)
            .unwrap();
        let a = res.require("_ceos_a_i").unwrap().value_si().unwrap();
        let b = res.require("_ceos_b_i").unwrap().value_si().unwrap();
        assert!((a - 29.5518).abs() < 1e-3);
        assert!((b - 0.720368).abs() < 1e-5);
    }

    fn alpha_at(temperature: f64, t_c: f64, eta: f64, omega: f64) -> f64 {
        let mut res = PropertyMap::new();
        res.set("T", Quantity::new(temperature, "K").unwrap());
        res.set("_T_c", Quantity::vector(&[t_c], "K").unwrap());
        res.set("_omega", Quantity::vector(&[omega], "dimless").unwrap());
        let mut bounds = BoundSet::new();
        let mut par = ParameterDictionary::new("m");
        RedlichKwongMFactor::new(setup(&["A"], Value::Null))
            .unwrap()
            .define(&mut res, &mut bounds, &mut par)
            .unwrap();
        let mut supply = crate::structures::NestedQuantity::empty();
        supply.insert(&["eta", "A"], Quantity::new(eta, "dimless").unwrap());
        let mut par = ParameterDictionary::with_supply("alpha", supply);
        BostonMathiasAlphaFunction::new(setup(&["A"], Value::Null))
            .unwrap()
            .define(&mut res, &mut bounds, &mut par)
            .unwrap();
        res.require("_alpha").unwrap().value_si().unwrap()
    }

    #[test]
    fn boston_mathias_continuity_at_critical() {
        let t_c = 190.0;
        // both branches equal one at T = T_c
        assert!((alpha_at(t_c, t_c, 0.05, 0.2) - 1.0).abs() < 1e-12);
        // value and slope continuous across the switch
        let eps = 1e-4;
        let below = alpha_at(t_c - eps, t_c, 0.05, 0.2);
        let above = alpha_at(t_c + eps, t_c, 0.05, 0.2);
        assert!((below - above).abs() < 1e-5);
        let slope_below = (alpha_at(t_c, t_c, 0.05, 0.2) - alpha_at(t_c - eps, t_c, 0.05, 0.2)) / eps;
        let slope_above = (alpha_at(t_c + eps, t_c, 0.05, 0.2) - alpha_at(t_c, t_c, 0.05, 0.2)) / eps;
        assert!((slope_below - slope_above).abs() < 1e-3);
        // finite on both sides far from the switch
        assert!(alpha_at(0.5 * t_c, t_c, 0.05, 0.2).is_finite());
        assert!(alpha_at(2.0 * t_c, t_c, 0.05, 0.2).is_finite());
    }

    #[test]
    fn linear_mixing_rule() {
        let options = json!({"target": "_ceos_c"});
        let rule = LinearMixingRule::new(setup(&["A", "B"], options)).unwrap();
        let mut res = PropertyMap::new();
        res.set("n", Quantity::vector(&[2.0, 3.0], "mol").unwrap());
        res.set(
            "_ceos_c_i",
            Quantity::vector(&[1e-5, 2e-5], "m**3/mol").unwrap(),
        );
        let mut bounds = BoundSet::new();
        let mut par = ParameterDictionary::new("LinearMixingRule");
        rule.define(&mut res, &mut bounds, &mut par).unwrap();
        let c = res.require("_ceos_c").unwrap().value_si().unwrap();
        assert!((c - 8e-5).abs() < 1e-18);
    }

    #[test]
    fn non_symmetric_mixing_rule_without_interaction() {
        let options = json!({"target": "_ceos_a"});
        let rule = NonSymmetricMixingRule::new(setup(&["A", "B"], options)).unwrap();
        let mut res = PropertyMap::new();
        res.set("T", Quantity::new(300.0, "K").unwrap());
        res.set("n", Quantity::vector(&[1.0, 2.0], "mol").unwrap());
        res.set(
            "_ceos_a_i",
            Quantity::vector(&[4.0, 9.0], "Pa*m**6/mol**2").unwrap(),
        );
        let mut bounds = BoundSet::new();
        let mut par = ParameterDictionary::new("MixingRule");
        rule.define(&mut res, &mut bounds, &mut par).unwrap();
        // (sqrt(4)*1 + sqrt(9)*2)^2 = 64
        let a = res.require("_ceos_a").unwrap().value_si().unwrap();
        assert!((a - 64.0).abs() < 1e-9);
        assert!(par.is_empty());
    }

    #[test]
    fn non_symmetric_mixing_rule_with_pairs() {
        let options = json!({
            "target": "_ceos_a",
            "k_1": [["A", "B"]],
            "l_1": [["A", "B"]]
        });
        let rule = NonSymmetricMixingRule::new(setup(&["A", "B"], options)).unwrap();
        let mut res = PropertyMap::new();
        res.set("T", Quantity::new(300.0, "K").unwrap());
        res.set("n", Quantity::vector(&[1.0, 2.0], "mol").unwrap());
        res.set(
            "_ceos_a_i",
            Quantity::vector(&[4.0, 9.0], "Pa*m**6/mol**2").unwrap(),
        );
        let mut supply = crate::structures::NestedQuantity::empty();
        supply.insert(&["k_1", "A", "B"], Quantity::dimensionless(0.1));
        supply.insert(&["l_1", "A", "B"], Quantity::dimensionless(0.05));
        let mut par = ParameterDictionary::with_supply("MixingRule", supply);
        let mut bounds = BoundSet::new();
        rule.define(&mut res, &mut bounds, &mut par).unwrap();

        // a_n = [2, 6]; base 64; sym: 2*2*6*0.1 = 2.4;
        // asym: (2/3) * (n_B - n_A) * a_n_A * a_n_B * l1 = (2/3)*1*12*0.05 = 0.4
        let a = res.require("_ceos_a").unwrap().value_si().unwrap();
        assert!((a - (64.0 + 2.4 - 0.4)).abs() < 1e-9);
    }

    #[test]
    fn cubic_roots_by_discriminant() {
        // (z-1)(z-2)(z-3) = z^3 - 6z^2 + 11z - 6
        let mut roots = solve_cubic(-6.0, 11.0, -6.0);
        roots.sort_by(f64::total_cmp);
        assert_eq!(roots.len(), 3);
        assert!((roots[0] - 1.0).abs() < 1e-9);
        assert!((roots[1] - 2.0).abs() < 1e-9);
        assert!((roots[2] - 3.0).abs() < 1e-9);
        // z^3 - 1 has a single real root
        let roots = solve_cubic(0.0, 0.0, -1.0);
        assert_eq!(roots.len(), 1);
        assert!((roots[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rk_eos_pressure_matches_closed_form() {
        // wire a two-species helmholtz stack by hand and compare the
        // pressure against the Redlich-Kwong expression
        let state = Quantity::symbol_vector("x", 4, "dimless").unwrap();
        let mut res = PropertyMap::new();
        res.set("_state", state.clone());
        crate::thermo::state::HelmholtzState
            .prepare(&mut res, &["A".to_string(), "B".to_string()], false)
            .unwrap();
        res.set("p_ref", Quantity::new(1.0, "bar").unwrap());
        res.set("S", Quantity::new(0.0, "J/K").unwrap());
        res.set("mu", Quantity::vector(&[0.0, 0.0], "J/mol").unwrap());
        let mut bounds = BoundSet::new();
        let mut par = ParameterDictionary::new("ig");
        crate::thermo::contributions::basic::HelmholtzIdealGas::new(setup(&["A", "B"], Value::Null))
            .unwrap()
            .define(&mut res, &mut bounds, &mut par)
            .unwrap();
        let a_value = 12.0;
        let b_value = 3e-5;
        res.set("_ceos_a", Quantity::new(a_value, "Pa*m**6").unwrap());
        res.set("_ceos_b", Quantity::new(b_value, "m**3").unwrap());
        let eos = RedlichKwongEOS::gas(setup(&["A", "B"], Value::Null)).unwrap();
        eos.define(&mut res, &mut bounds, &mut par).unwrap();

        let p = res.require("p").unwrap();
        let func = CompiledFunction::compile(state.magnitude(), p.magnitude()).unwrap();
        let (t, v, n0, n1) = (300.0, 0.05, 1.0, 1.0);
        let computed = func.call(&[t, v, n0, n1])[0];
        let nrt = (n0 + n1) * GAS_CONSTANT_SI * t;
        let expected = nrt / (v - b_value) - a_value / (v * (v + b_value));
        assert!(
            (computed - expected).abs() < 1e-6 * expected.abs(),
            "{computed} vs {expected}"
        );
        // the gas phase registers no pressure bound, but domain bounds exist
        let names: Vec<&str> = bounds.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"VBC"));
        assert!(names.contains(&"neg_dp_dV"));
    }

    #[test]
    fn rk_initial_state_selects_phase_root() {
        let gas = RedlichKwongEOS::gas(setup(&["A"], Value::Null)).unwrap();
        let liquid = RedlichKwongEOS::liquid(setup(&["A"], Value::Null)).unwrap();
        let mut props = NumericProps::new();
        // sub-critical conditions with three distinct volume roots
        props.insert("_ceos_a".into(), vec![0.1968]);
        props.insert("_ceos_b".into(), vec![2.52e-5]);
        let state = InitialState::from_si(150.0, 2e6, &[1.0]).unwrap();
        let gas_state = gas.initial_state(&state, &props).unwrap();
        let liquid_state = liquid.initial_state(&state, &props).unwrap();
        assert!(gas_state[1] > 2.0 * liquid_state[1]);
        assert!(liquid_state[1] > 2.52e-5);
    }
}
