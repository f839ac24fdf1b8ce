//! Chemical formula parsing and species definitions.
//!
//! The parser accepts plain formulae (`H3PO4`), grouping with parentheses,
//! brackets or braces (`(NH4)2HPO4`, `Na(UO2)3[Zn(H2O)6](CH3CO2)9`),
//! structure notation (`CH3-(CH2)3-CH=O>`, `|N≡N|`), crystal solvates
//! (`CuSO4·5H2O`), and a trailing charge tag (`SO4:2-`). From the parsed
//! composition it derives element counts, the molecular weight, and the
//! charge.

use std::fmt;

use thiserror::Error;

use crate::quantity::Quantity;
use crate::structures::MCounter;

/// Errors from chemical formula analysis.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("invalid syntax of formula '{0}'")]
    InvalidSyntax(String),
    #[error("formula '{0}' contains invalid element '{1}'")]
    InvalidElement(String, String),
}

/// Standard atomic weights in g/mol (IUPAC 2021 abridged values).
const ATOMIC_WEIGHTS: &[(&str, f64)] = &[
    ("H", 1.008),
    ("He", 4.0026),
    ("Li", 6.94),
    ("Be", 9.0122),
    ("B", 10.81),
    ("C", 12.011),
    ("N", 14.007),
    ("O", 15.999),
    ("F", 18.998),
    ("Ne", 20.180),
    ("Na", 22.990),
    ("Mg", 24.305),
    ("Al", 26.982),
    ("Si", 28.085),
    ("P", 30.974),
    ("S", 32.06),
    ("Cl", 35.45),
    ("Ar", 39.95),
    ("K", 39.098),
    ("Ca", 40.078),
    ("Sc", 44.956),
    ("Ti", 47.867),
    ("V", 50.942),
    ("Cr", 51.996),
    ("Mn", 54.938),
    ("Fe", 55.845),
    ("Co", 58.933),
    ("Ni", 58.693),
    ("Cu", 63.546),
    ("Zn", 65.38),
    ("Ga", 69.723),
    ("Ge", 72.630),
    ("As", 74.922),
    ("Se", 78.971),
    ("Br", 79.904),
    ("Kr", 83.798),
    ("Rb", 85.468),
    ("Sr", 87.62),
    ("Y", 88.906),
    ("Zr", 91.224),
    ("Nb", 92.906),
    ("Mo", 95.95),
    ("Ru", 101.07),
    ("Rh", 102.91),
    ("Pd", 106.42),
    ("Ag", 107.87),
    ("Cd", 112.41),
    ("In", 114.82),
    ("Sn", 118.71),
    ("Sb", 121.76),
    ("Te", 127.60),
    ("I", 126.90),
    ("Xe", 131.29),
    ("Cs", 132.91),
    ("Ba", 137.33),
    ("La", 138.91),
    ("Ce", 140.12),
    ("W", 183.84),
    ("Re", 186.21),
    ("Os", 190.23),
    ("Ir", 192.22),
    ("Pt", 195.08),
    ("Au", 196.97),
    ("Hg", 200.59),
    ("Tl", 204.38),
    ("Pb", 207.2),
    ("Bi", 208.98),
    ("Th", 232.04),
    ("U", 238.03),
];

fn atomic_weight(symbol: &str) -> Option<f64> {
    ATOMIC_WEIGHTS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, w)| *w)
}

/// Parser for chemical sum formulae.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormulaParser;

struct Scanner<'f> {
    formula: &'f str,
    chars: Vec<char>,
    pos: usize,
}

impl<'f> Scanner<'f> {
    fn new(formula: &'f str, segment: &str) -> Scanner<'f> {
        // normalize bracket styles and drop structure decoration
        let chars = segment
            .chars()
            .map(|c| match c {
                '[' | '{' => '(',
                ']' | '}' => ')',
                other => other,
            })
            .filter(|c| !"-=≡<>|+".contains(*c))
            .collect();
        Scanner {
            formula,
            chars,
            pos: 0,
        }
    }

    fn error(&self) -> FormulaError {
        FormulaError::InvalidSyntax(self.formula.to_string())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn integer(&mut self) -> i64 {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            1
        } else {
            self.chars[start..self.pos]
                .iter()
                .collect::<String>()
                .parse()
                .unwrap_or(1)
        }
    }

    /// group := item+ ; item := (element | '(' group ')') integer?
    fn group(&mut self, formula: &str) -> Result<MCounter, FormulaError> {
        let mut counts = MCounter::new();
        let mut any = false;
        while let Some(c) = self.peek() {
            let inner = if c == '(' {
                self.pos += 1;
                let inner = self.group(formula)?;
                if self.peek() != Some(')') {
                    return Err(self.error());
                }
                self.pos += 1;
                inner
            } else if c == ')' {
                break;
            } else if c.is_ascii_uppercase() {
                self.pos += 1;
                let mut symbol = c.to_string();
                while self.peek().is_some_and(|d| d.is_ascii_lowercase()) {
                    symbol.push(self.chars[self.pos]);
                    self.pos += 1;
                }
                if atomic_weight(&symbol).is_none() {
                    return Err(FormulaError::InvalidElement(formula.to_string(), symbol));
                }
                MCounter::from_pairs([(symbol, 1)])
            } else {
                return Err(self.error());
            };
            let factor = self.integer();
            counts = counts + factor * &inner;
            any = true;
        }
        if !any {
            return Err(self.error());
        }
        Ok(counts)
    }
}

impl FormulaParser {
    pub fn new() -> FormulaParser {
        FormulaParser
    }

    /// Strip a trailing charge tag like `:2-`, returning the body and the
    /// signed charge.
    fn split_charge(formula: &str) -> Result<(&str, i32), FormulaError> {
        let Some(colon) = formula.rfind(':') else {
            return Ok((formula, 0));
        };
        let tag = &formula[colon + 1..];
        let (digits, sign) = tag.split_at(tag.len().saturating_sub(1));
        let magnitude: i32 = digits
            .parse()
            .map_err(|_| FormulaError::InvalidSyntax(formula.to_string()))?;
        let charge = match sign {
            "+" => magnitude,
            "-" => -magnitude,
            _ => return Err(FormulaError::InvalidSyntax(formula.to_string())),
        };
        Ok((&formula[..colon], charge))
    }

    /// Element counts of a formula.
    ///
    /// ```
    /// use equilib::species::FormulaParser;
    /// let counts = FormulaParser::new().parse("(NH4)2HPO4").unwrap();
    /// assert_eq!(counts.get("H"), 9);
    /// assert_eq!(counts.get("O"), 4);
    /// ```
    pub fn parse(&self, formula: &str) -> Result<MCounter, FormulaError> {
        if formula.is_empty() {
            return Err(FormulaError::InvalidSyntax(formula.to_string()));
        }
        let (body, _) = FormulaParser::split_charge(formula)?;
        let mut total = MCounter::new();
        // crystal solvates: each `·` separated segment may carry a leading
        // integer multiplier, e.g. CuSO4·5H2O
        for segment in body.split('·') {
            let trimmed = segment.trim();
            let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
            let factor: i64 = if digits.is_empty() {
                1
            } else {
                digits
                    .parse()
                    .map_err(|_| FormulaError::InvalidSyntax(formula.to_string()))?
            };
            let mut scanner = Scanner::new(formula, &trimmed[digits.len()..]);
            let counts = scanner.group(formula)?;
            if scanner.pos != scanner.chars.len() {
                return Err(scanner.error());
            }
            total = total + factor * &counts;
        }
        Ok(total)
    }

    /// Molecular weight for a formula, as a quantity in kg/mol (SI).
    pub fn molecular_weight(&self, formula: &str) -> Result<Quantity, FormulaError> {
        let elements = self.parse(formula)?;
        let grams: f64 = elements
            .iter()
            .map(|(symbol, count)| atomic_weight(symbol).unwrap_or(0.0) * count as f64)
            .sum();
        Ok(Quantity::new(grams, "g/mol")
            .expect("g/mol is a registered unit"))
    }

    /// Signed charge from the trailing tag, zero if absent.
    pub fn charge(&self, formula: &str) -> Result<i32, FormulaError> {
        FormulaParser::split_charge(formula).map(|(_, charge)| charge)
    }

    /// Atomic weight of one element, if known.
    pub fn atomic_weight(&self, symbol: &str) -> Option<Quantity> {
        atomic_weight(symbol)
            .map(|w| Quantity::new(w, "g/mol").expect("g/mol is a registered unit"))
    }
}

/// A species: name, formula, and everything derived from the formula.
#[derive(Debug, Clone)]
pub struct SpeciesDefinition {
    pub formula: String,
    pub elements: MCounter,
    pub molecular_weight: Quantity,
    pub charge: i32,
}

impl SpeciesDefinition {
    pub fn new(formula: &str) -> Result<SpeciesDefinition, FormulaError> {
        let parser = FormulaParser::new();
        Ok(SpeciesDefinition {
            formula: formula.to_string(),
            elements: parser.parse(formula)?,
            molecular_weight: parser.molecular_weight(formula)?,
            charge: parser.charge(formula)?,
        })
    }
}

impl fmt::Display for SpeciesDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formula)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_formulae() {
        let parser = FormulaParser::new();
        let acid = parser.parse("H3PO4").unwrap();
        assert_eq!(acid.get("H"), 3);
        assert_eq!(acid.get("P"), 1);
        assert_eq!(acid.get("O"), 4);
        let permanganate = parser.parse("KMnO4").unwrap();
        assert_eq!(permanganate.get("K"), 1);
        assert_eq!(permanganate.get("Mn"), 1);
        assert_eq!(permanganate.get("O"), 4);
    }

    #[test]
    fn grouping_and_multipliers() {
        let parser = FormulaParser::new();
        let dap = parser.parse("(NH4)2HPO4").unwrap();
        assert_eq!(dap.get("N"), 2);
        assert_eq!(dap.get("H"), 9);
        let complex = parser.parse("Na(UO2)3[Zn(H2O)6](CH3CO2)9").unwrap();
        assert_eq!(complex.get("H"), 39);
        assert_eq!(complex.get("O"), 30);
        assert_eq!(complex.get("C"), 18);
        assert_eq!(complex.get("U"), 3);
    }

    #[test]
    fn structure_notation() {
        let parser = FormulaParser::new();
        let pentanal = parser.parse("CH3-(CH2)3-CH=O>").unwrap();
        assert_eq!(pentanal.get("C"), 5);
        assert_eq!(pentanal.get("H"), 10);
        assert_eq!(pentanal.get("O"), 1);
        let nitrogen = parser.parse("|N≡N|").unwrap();
        assert_eq!(nitrogen.get("N"), 2);
    }

    #[test]
    fn crystal_water() {
        let parser = FormulaParser::new();
        let vitriol = parser.parse("CuSO4·5H2O").unwrap();
        assert_eq!(vitriol.get("H"), 10);
        assert_eq!(vitriol.get("O"), 9);
        assert_eq!(vitriol.get("Cu"), 1);
    }

    #[test]
    fn charge_tags() {
        let parser = FormulaParser::new();
        assert_eq!(parser.charge("H2SO4").unwrap(), 0);
        assert_eq!(parser.charge("SO4:2-").unwrap(), -2);
        assert_eq!(parser.charge("Al:3+").unwrap(), 3);
        // the charged body still parses
        let sulfate = parser.parse("SO4:2-").unwrap();
        assert_eq!(sulfate.get("S"), 1);
        assert_eq!(sulfate.get("O"), 4);
    }

    #[test]
    fn molecular_weights() {
        let parser = FormulaParser::new();
        let water = parser.molecular_weight("H2O").unwrap();
        let kg_per_mol = water.value_si().unwrap();
        assert!((kg_per_mol - 0.018015).abs() < 1e-5);
        let methane = parser.molecular_weight("CH4").unwrap();
        assert!((methane.value_si().unwrap() - 0.016043).abs() < 1e-5);
    }

    #[test]
    fn invalid_formulae_are_rejected() {
        let parser = FormulaParser::new();
        assert!(matches!(
            parser.parse("FISHy"),
            Err(FormulaError::InvalidElement(_, _))
        ));
        assert!(parser.parse("(H2O").is_err());
        assert!(parser.parse("").is_err());
    }

    #[test]
    fn species_definition() {
        let methane = SpeciesDefinition::new("CH4").unwrap();
        assert_eq!(methane.elements.get("C"), 1);
        assert_eq!(methane.elements.get("H"), 4);
        assert_eq!(methane.charge, 0);
    }
}
