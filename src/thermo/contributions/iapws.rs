//! IAPWS-style Helmholtz contributions: reduced state, ideal-gas standard
//! state, and the four residual term groups.
//!
//! Each residual group defines a molar `phi(tau, rho)` per species as a sum
//! of table terms. The function is built on scratch symbols, differentiated
//! symbolically, and then grafted onto the actual reduced-state
//! expressions, so entropy, pressure and chemical potential pick up exact
//! derivatives:
//!
//! `S += R sum_i n_i (tau_i phi_tau_i - phi_i)`,
//! `p += R T / V sum_i n_i phi_rho_i rho_i`,
//! `mu_i += R T (phi_i + rho_i phi_rho_i)`.

use std::collections::HashMap;

use serde_json::Value;

use crate::constants::r_gas;
use crate::error::AssemblyError;
use crate::graph::{self, expr_key, Expr};
use crate::quantity::{qlog, qvertcat, Quantity};
use crate::thermo::contribution::{
    BoundSet, ContributionSetup, ParameterDictionary, PropertyMap, ThermoContribution,
};
use crate::units::Dimension;

/// Reduced temperature and density for all species:
/// `tau_i = T_c_i / T` and `rho_i = mw_i n_i / (V rho_c_i)`.
///
/// Note the reciprocal temperature convention, as common for the IAPWS
/// formulation.
pub struct ReducedStateIAPWS {
    species: Vec<String>,
}

impl ReducedStateIAPWS {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(ReducedStateIAPWS {
            species: setup.species,
        }))
    }
}

impl ThermoContribution for ReducedStateIAPWS {
    fn define(
        &self,
        res: &mut PropertyMap,
        bounds: &mut BoundSet,
        par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let t = res.require("T")?;
        let v = res.require("V")?;
        let n = res.require("n")?;
        let mw = res.require("mw")?;
        let rho_c = par.register_vector("rho_c", &self.species, "kg/m**3")?;
        let t_c = par.register_vector("T_c", &self.species, "K")?;

        res.set("_tau", (&t_c / &t)?);
        res.set("_rho", (&mw * &n / &v / &rho_c)?);

        // both T and V occur in denominators
        bounds.add("T", t);
        bounds.add("V", v);
        Ok(())
    }
}

/// Ideal-gas standard state of the IAPWS formulation.
///
/// Defines `mu` and `S` from the `phi0` table terms
/// `phi0 = n_1 + n_2 tau + n_3 ln(tau) + sum_{i=4..8} n_i ln(1 - exp(-g_i tau))`.
pub struct IdealGasIAPWS {
    species: Vec<String>,
}

impl IdealGasIAPWS {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(IdealGasIAPWS {
            species: setup.species,
        }))
    }
}

impl ThermoContribution for IdealGasIAPWS {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let t = res.require("T")?;
        let n = res.require("n")?;
        let tau = res.require("_tau")?;

        let mut pn = Vec::new();
        for i in 1..=8 {
            pn.push(par.register_vector(&format!("n_{i}"), &self.species, "dimless")?);
        }
        let mut pg = Vec::new();
        for i in 4..=8 {
            pg.push(par.register_vector(&format!("g_{i}"), &self.species, "dimless")?);
        }

        let rt = (&t * r_gas())?;
        let mut phi_0 = ((&pn[0] + &pn[1] * &tau)? + (&pn[2] * qlog(&tau)?)?)?;
        // phi0_tau = n_2 + n_3 / tau + sum n_i g_i e_i / (1 - e_i)
        let mut phi_0_tau = (&pn[1] + &pn[2] / &tau)?;
        for (pn_i, g_i) in pn[3..].iter().zip(&pg) {
            let e_i = crate::quantity::qexp(&(-(g_i * &tau)?))?;
            phi_0 = (phi_0 + (pn_i * qlog(&(1.0 - &e_i)?)?)?)?;
            phi_0_tau = (phi_0_tau + (pn_i * g_i * &e_i)? / (1.0 - &e_i)?)?;
        }

        res.set("mu", (&rt * &phi_0)?);
        // S = R n . (tau phi0_tau - phi0)
        let s_terms = ((&tau * &phi_0_tau)? - &phi_0)?;
        res.set("S", (r_gas() * s_terms.dot(&n)?)?);
        Ok(())
    }

    fn declared_vectors(&self) -> Vec<(String, Vec<String>)> {
        vec![("mu".to_string(), self.species.clone())]
    }
}

/// The four IAPWS residual term groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResidualForm {
    /// `n rho^d tau^t`
    Polynomial,
    /// `n rho^d tau^t exp(-rho^c)`
    Exponential,
    /// `n rho^d tau^t exp(-a (rho-e)^2 - b (tau-g)^2)`
    Gaussian,
    /// `n Delta^b rho psi` with the nonanalytic `Delta` construction
    Nonanalytic,
}

impl ResidualForm {
    fn parameter_names(self) -> &'static [&'static str] {
        match self {
            ResidualForm::Polynomial => &["d", "t", "n"],
            ResidualForm::Exponential => &["c", "d", "t", "n"],
            ResidualForm::Gaussian => &["d", "t", "n", "a", "b", "g", "e"],
            ResidualForm::Nonanalytic => &["a", "b", "B", "n", "C", "D", "A", "beta"],
        }
    }

    fn default_number_of_terms(self) -> usize {
        match self {
            ResidualForm::Polynomial => 7,
            ResidualForm::Exponential => 44,
            ResidualForm::Gaussian => 3,
            ResidualForm::Nonanalytic => 2,
        }
    }

    /// One term `phi_k(tau, rho)` from scratch symbols and parameters.
    fn term(self, tau: &Expr, rho: &Expr, p: &HashMap<&str, Expr>) -> Result<Expr, AssemblyError> {
        let one = Expr::constant(1.0);
        Ok(match self {
            ResidualForm::Polynomial => {
                p["n"].mul(&rho.pow(&p["d"])).mul(&tau.pow(&p["t"]))
            }
            ResidualForm::Exponential => p["n"]
                .mul(&rho.pow(&p["d"]))
                .mul(&tau.pow(&p["t"]))
                .mul(&rho.pow(&p["c"]).neg().exp()),
            ResidualForm::Gaussian => {
                let base = rho.pow(&p["d"]).mul(&tau.pow(&p["t"]));
                let rho_shift = rho.sub(&p["e"]).sq().mul(&p["a"]);
                let tau_shift = tau.sub(&p["g"]).sq().mul(&p["b"]);
                p["n"].mul(&base).mul(&rho_shift.add(&tau_shift).neg().exp())
            }
            ResidualForm::Nonanalytic => {
                let rho_hat = rho.sub(&one).sq();
                let half_beta = Expr::constant(0.5).div(&p["beta"])?;
                let theta = one.sub(tau).add(&p["A"].mul(&rho_hat.pow(&half_beta)));
                let delta = theta.sq().add(&p["B"].mul(&rho_hat.pow(&p["a"])));
                let psi = p["C"]
                    .mul(&rho_hat)
                    .add(&p["D"].mul(&tau.sub(&one).sq()))
                    .neg()
                    .exp();
                p["n"].mul(&delta.pow(&p["b"])).mul(rho).mul(&psi)
            }
        })
    }
}

/// Shared implementation of the residual contributions.
///
/// Options: `species` restricts the contribution to a sub-set of the frame
/// species; `number_of_terms` overrides the group default.
pub struct ResidualIAPWS {
    form: ResidualForm,
    active: Vec<String>,
    /// Frame positions of the active species.
    positions: Vec<usize>,
    number_of_terms: usize,
}

impl ResidualIAPWS {
    fn create(
        form: ResidualForm,
        setup: &ContributionSetup,
    ) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        let active: Vec<String> = match setup.options.get("species").and_then(Value::as_array) {
            Some(subset) => subset
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| setup.species.iter().any(|name| name == s))
                .map(str::to_string)
                .collect(),
            None => setup.species.clone(),
        };
        let positions = active
            .iter()
            .filter_map(|name| setup.species.iter().position(|s| s == name))
            .collect();
        let number_of_terms = setup
            .options
            .get("number_of_terms")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or_else(|| form.default_number_of_terms());
        Ok(Box::new(ResidualIAPWS {
            form,
            active,
            positions,
            number_of_terms,
        }))
    }

    pub fn group_1(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        ResidualIAPWS::create(ResidualForm::Polynomial, &setup)
    }

    pub fn group_2(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        ResidualIAPWS::create(ResidualForm::Exponential, &setup)
    }

    pub fn group_3(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        ResidualIAPWS::create(ResidualForm::Gaussian, &setup)
    }

    pub fn group_4(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        ResidualIAPWS::create(ResidualForm::Nonanalytic, &setup)
    }
}

impl ThermoContribution for ResidualIAPWS {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let t = res.require("T")?;
        let v = res.require("V")?;
        let n = res.require("n")?;
        let tau = res.require("_tau")?;
        let rho = res.require("_rho")?;

        // parameters: one species vector per table column and term
        let names = self.form.parameter_names();
        let mut params: HashMap<&str, Vec<Quantity>> = HashMap::new();
        for name in names {
            let mut per_term = Vec::with_capacity(self.number_of_terms);
            for k in 1..=self.number_of_terms {
                per_term.push(par.register_vector(
                    &format!("{name}_{k:02}"),
                    &self.active,
                    "dimless",
                )?);
            }
            params.insert(name, per_term);
        }

        // per active species: build phi on scratch symbols, differentiate,
        // then graft onto the real reduced-state expressions
        let mut phi_parts = Vec::new();
        let mut phi_tau_parts = Vec::new();
        let mut phi_rho_parts = Vec::new();
        for (slot, &index) in self.positions.iter().enumerate() {
            let tau_scratch = Expr::symbol("__iapws_tau");
            let rho_scratch = Expr::symbol("__iapws_rho");
            let mut phi = Expr::constant(0.0);
            for k in 0..self.number_of_terms {
                let term_params: HashMap<&str, Expr> = names
                    .iter()
                    .map(|&name| (name, params[name][k].magnitude()[slot].clone()))
                    .collect();
                let term = self.form.term(&tau_scratch, &rho_scratch, &term_params)?;
                phi = phi.add(&term);
            }
            let derivatives =
                graph::jacobian(&[phi.clone()], &[tau_scratch.clone(), rho_scratch.clone()])?;
            let mut phi_tau = Expr::constant(0.0);
            let mut phi_rho = Expr::constant(0.0);
            for (_, col, expr) in derivatives.triplets {
                if col == 0 {
                    phi_tau = expr;
                } else {
                    phi_rho = expr;
                }
            }
            let mut replacements = HashMap::new();
            replacements.insert(expr_key(&tau_scratch), tau.magnitude()[index].clone());
            replacements.insert(expr_key(&rho_scratch), rho.magnitude()[index].clone());
            let grafted = graph::substitute(&[phi, phi_tau, phi_rho], &replacements);
            phi_parts.push(Quantity::from_expressions(
                vec![grafted[0].clone()],
                Dimension::NONE,
            ));
            phi_tau_parts.push(Quantity::from_expressions(
                vec![grafted[1].clone()],
                Dimension::NONE,
            ));
            phi_rho_parts.push(Quantity::from_expressions(
                vec![grafted[2].clone()],
                Dimension::NONE,
            ));
        }

        let phi = qvertcat(&phi_parts)?;
        let phi_tau = qvertcat(&phi_tau_parts)?;
        let phi_rho = qvertcat(&phi_rho_parts)?;

        // sub-vectors of the frame-wide quantities for the active species
        let pick = |q: &Quantity| -> Quantity {
            let magnitude = self
                .positions
                .iter()
                .map(|&index| q.magnitude()[index].clone())
                .collect();
            Quantity::from_expressions(magnitude, *q.dimension())
        };
        let n_active = pick(&n);
        let tau_active = pick(&tau);
        let rho_active = pick(&rho);

        let s_res = (r_gas()
            * ((&tau_active * &phi_tau)? - &phi)?.dot(&n_active)?)?;
        res.add_to("S", Ok(s_res))?;

        let p_res = ((&t * r_gas())? / &v * (&phi_rho * &rho_active)?.dot(&n_active)?)?;
        res.add_to("p", Ok(p_res))?;

        let mu_res = ((&t * r_gas())? * (&phi + (&rho_active * &phi_rho)?)?)?;
        let mut mu_update = vec![Expr::constant(0.0); n.len()];
        for (slot, &index) in self.positions.iter().enumerate() {
            mu_update[index] = mu_res.magnitude()[slot].clone();
        }
        res.add_to(
            "mu",
            Ok(Quantity::from_expressions(mu_update, *mu_res.dimension())),
        )?;
        Ok(())
    }
}
