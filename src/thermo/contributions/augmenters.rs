//! Augmenting contributions: derived generic properties and elemental
//! flows. These compute no new physics, they reshape what the frame
//! already knows into the quantities process models ask for.

use crate::error::AssemblyError;
use crate::quantity::{qsum, qvertcat, Quantity};
use crate::species::SpeciesDefinition;
use crate::thermo::contribution::{
    BoundSet, ContributionSetup, ParameterDictionary, PropertyMap, ThermoContribution,
};

/// Basic derived thermodynamic properties.
///
/// `G = n . mu`, `H = G + T S`, `A = G - p V`, `U = A + T S`, total moles
/// `N` and mass `M`, partial masses `m`, mole and mass fractions `x`/`w`,
/// and the average molecular weight `Mw = M / N`.
pub struct GenericProperties {
    species: Vec<String>,
}

impl GenericProperties {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        Ok(Box::new(GenericProperties {
            species: setup.species,
        }))
    }
}

impl ThermoContribution for GenericProperties {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        _par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let n = res.require("n")?;
        let mu = res.require("mu")?;
        let t = res.require("T")?;
        let s = res.require("S")?;
        let p = res.require("p")?;
        let v = res.require("V")?;
        let mw = res.require("mw")?;

        let g = n.dot(&mu)?;
        let ts = (&t * &s)?;
        let pv = (&p * &v)?;
        res.set("G", g.clone());
        res.set("H", (&g + &ts)?);
        let a = (&g - &pv)?;
        res.set("A", a.clone());
        res.set("U", (&a + &ts)?);

        let total = qsum(&n);
        let m = (&n * &mw)?;
        let mass = qsum(&m);
        res.set("N", total.clone());
        res.set("m", m.clone());
        res.set("M", mass.clone());
        res.set("Mw", (&mass / &total)?);
        res.set("x", (&n / &total)?);
        res.set("w", (&m / &mass)?);
        Ok(())
    }

    fn declared_vectors(&self) -> Vec<(String, Vec<String>)> {
        ["m", "x", "w"]
            .into_iter()
            .map(|name| (name.to_string(), self.species.clone()))
            .collect()
    }
}

/// Elemental mole and mass flows from the parsed species formulas.
///
/// The element super-set is sorted for reproducibility; stoichiometric
/// coefficients come from the species composition vectors.
pub struct Elemental {
    species_defs: Vec<SpeciesDefinition>,
    elements: Vec<String>,
}

impl Elemental {
    pub fn new(setup: ContributionSetup) -> Result<Box<dyn ThermoContribution>, AssemblyError> {
        let mut elements: Vec<String> = setup
            .species_defs
            .iter()
            .flat_map(|def| def.elements.iter().map(|(e, _)| e.to_string()))
            .collect();
        elements.sort();
        elements.dedup();
        Ok(Box::new(Elemental {
            species_defs: setup.species_defs,
            elements,
        }))
    }
}

impl ThermoContribution for Elemental {
    fn define(
        &self,
        res: &mut PropertyMap,
        _bounds: &mut BoundSet,
        _par: &mut ParameterDictionary,
    ) -> Result<(), AssemblyError> {
        let n = res.require("n")?;
        let parser = crate::species::FormulaParser::new();

        // n_e_j = sum_i nu_ij n_i
        let mut per_element = Vec::with_capacity(self.elements.len());
        let mut weights = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            let mut total: Option<Quantity> = None;
            for (i, def) in self.species_defs.iter().enumerate() {
                let count = def.elements.get(element);
                if count == 0 {
                    continue;
                }
                let term = (n.element(i) * count as f64)?;
                total = Some(match total {
                    Some(sum) => (sum + term)?,
                    None => term,
                });
            }
            per_element.push(total.unwrap_or(
                (n.element(0) * 0.0)?, // structural zero with matching unit
            ));
            weights.push(parser.atomic_weight(element).ok_or_else(|| {
                AssemblyError::Configuration(format!("unknown element '{element}'"))
            })?);
        }

        let n_e = qvertcat(&per_element)?;
        let w_e = qvertcat(&weights)?;
        let total = qsum(&n_e);
        let m_e = (&n_e * &w_e)?;
        res.set("n_e", n_e.clone());
        res.set("N_e", total.clone());
        res.set("x_e", (&n_e / &total)?);
        res.set("m_e", m_e.clone());
        res.set("w_e", (&m_e / qsum(&m_e))?);
        Ok(())
    }

    fn declared_vectors(&self) -> Vec<(String, Vec<String>)> {
        ["n_e", "x_e", "m_e", "w_e"]
            .into_iter()
            .map(|name| (name.to_string(), self.elements.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn setup(formulas: &[&str]) -> ContributionSetup {
        ContributionSetup {
            species: formulas.iter().map(|s| s.to_string()).collect(),
            species_defs: formulas
                .iter()
                .map(|f| SpeciesDefinition::new(f).unwrap())
                .collect(),
            options: Value::Null,
        }
    }

    #[test]
    fn generic_properties() {
        let contribution = GenericProperties::new(setup(&["CH4", "H2O"])).unwrap();
        let mut res = PropertyMap::new();
        res.set("T", Quantity::new(300.0, "K").unwrap());
        res.set("S", Quantity::new(2.0, "W/K").unwrap());
        res.set("p", Quantity::new(1.0, "bar").unwrap());
        res.set("V", Quantity::new(0.1, "m**3/s").unwrap());
        res.set("n", Quantity::vector(&[1.0, 3.0], "mol/s").unwrap());
        res.set("mu", Quantity::vector(&[-100.0, -200.0], "J/mol").unwrap());
        res.set(
            "mw",
            Quantity::vector(&[0.016043, 0.018015], "kg/mol").unwrap(),
        );
        let mut bounds = BoundSet::new();
        let mut par = ParameterDictionary::new("GenericProperties");
        contribution.define(&mut res, &mut bounds, &mut par).unwrap();

        let g = res.require("G").unwrap().value_si().unwrap();
        assert!((g - (-100.0 - 600.0)).abs() < 1e-9);
        let h = res.require("H").unwrap().value_si().unwrap();
        assert!((h - (g + 600.0)).abs() < 1e-9);
        let a = res.require("A").unwrap().value_si().unwrap();
        assert!((a - (g - 1e4)).abs() < 1e-9);
        let mw = res.require("Mw").unwrap().value_si().unwrap();
        let mass = 0.016043 + 3.0 * 0.018015;
        assert!((mw - mass / 4.0).abs() < 1e-12);
        let x = res.require("x").unwrap().values_si().unwrap();
        assert!((x[0] - 0.25).abs() < 1e-12);
        let w = res.require("w").unwrap().values_si().unwrap();
        assert!((w[1] - 3.0 * 0.018015 / mass).abs() < 1e-12);
    }

    #[test]
    fn elemental_flows() {
        let contribution = Elemental::new(setup(&["CH4", "H2O"])).unwrap();
        let mut res = PropertyMap::new();
        res.set("n", Quantity::vector(&[2.0, 1.0], "mol/s").unwrap());
        let mut bounds = BoundSet::new();
        let mut par = ParameterDictionary::new("Elemental");
        contribution.define(&mut res, &mut bounds, &mut par).unwrap();

        // elements sorted: C, H, O
        let n_e = res.require("n_e").unwrap().values_si().unwrap();
        assert_eq!(n_e.len(), 3);
        assert!((n_e[0] - 2.0).abs() < 1e-12); // C from 2 CH4
        assert!((n_e[1] - 10.0).abs() < 1e-12); // H: 8 + 2
        assert!((n_e[2] - 1.0).abs() < 1e-12); // O from H2O
        let keys = contribution.declared_vectors();
        assert_eq!(keys[0].1, vec!["C", "H", "O"]);
    }
}
