//! Dimensioned scalar/vector quantities backed by the expression graph.
//!
//! A [`Quantity`] is an ordered pair of a magnitude (one or more graph
//! nodes) and a dimensional signature. Magnitudes are always stored in
//! offset-free base SI; display units and offsets apply only when values
//! enter or leave the engine. Arithmetic derives the result dimension from
//! the operand dimensions and rejects incompatible operands with
//! [`QuantityError::DimensionMismatch`] at construction time, never during a
//! solve.
//!
//! Binary operators return [`QResult`] so that formula code can chain
//! operations and propagate the first construction error with `?`. The
//! operators are implemented for quantities, references, intermediate
//! results and bare floats (treated as dimensionless constants).

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::error::QuantityError;
use crate::graph::{self, Expr};
use crate::units::{parse_unit, Dimension, Unit};

/// Result alias used by all fallible quantity operations.
pub type QResult = Result<Quantity, QuantityError>;

/// A dimensioned scalar or vector expression.
#[derive(Clone)]
pub struct Quantity {
    magnitude: Vec<Expr>,
    dimension: Dimension,
}

impl Quantity {
    /// A numeric quantity, e.g. `Quantity::new(25.0, "degC")`.
    pub fn new(value: f64, unit: &str) -> QResult {
        let unit = parse_unit(unit)?;
        Ok(Quantity {
            magnitude: vec![Expr::constant(unit.to_si(value))],
            dimension: unit.dimension,
        })
    }

    /// A numeric vector quantity sharing one unit.
    pub fn vector(values: &[f64], unit: &str) -> QResult {
        let unit = parse_unit(unit)?;
        Ok(Quantity {
            magnitude: values.iter().map(|&v| Expr::constant(unit.to_si(v))).collect(),
            dimension: unit.dimension,
        })
    }

    /// A dimensionless numeric constant.
    pub fn dimensionless(value: f64) -> Quantity {
        Quantity {
            magnitude: vec![Expr::constant(value)],
            dimension: Dimension::NONE,
        }
    }

    /// A quantity from a base-SI magnitude and an explicit dimension.
    pub fn from_si(value: f64, dimension: Dimension) -> Quantity {
        Quantity {
            magnitude: vec![Expr::constant(value)],
            dimension,
        }
    }

    pub fn from_si_vector(values: &[f64], dimension: Dimension) -> Quantity {
        Quantity {
            magnitude: values.iter().map(|&v| Expr::constant(v)).collect(),
            dimension,
        }
    }

    /// Wrap existing graph nodes with a dimension.
    pub fn from_expressions(magnitude: Vec<Expr>, dimension: Dimension) -> Quantity {
        assert!(!magnitude.is_empty(), "empty quantity magnitude");
        Quantity {
            magnitude,
            dimension,
        }
    }

    /// A scalar symbol of the given unit (dimension only; symbol magnitudes
    /// are base SI by definition).
    pub fn symbol(name: &str, unit: &str) -> QResult {
        let unit = parse_unit(unit)?;
        Ok(Quantity {
            magnitude: vec![Expr::symbol(name)],
            dimension: unit.dimension,
        })
    }

    /// A vector of `n` symbols bound to `name[0..n-1]`.
    pub fn symbol_vector(name: &str, n: usize, unit: &str) -> QResult {
        let unit = parse_unit(unit)?;
        Ok(Quantity {
            magnitude: Expr::symbols(name, n),
            dimension: unit.dimension,
        })
    }

    /// A vector of symbols named `name.key` for each sub-key.
    pub fn symbol_keyed<'k>(
        name: &str,
        keys: impl IntoIterator<Item = &'k str>,
        unit: &str,
    ) -> QResult {
        let unit = parse_unit(unit)?;
        let magnitude: Vec<Expr> = keys
            .into_iter()
            .map(|k| Expr::symbol(&format!("{name}.{k}")))
            .collect();
        assert!(!magnitude.is_empty(), "keyed symbol without keys");
        Ok(Quantity {
            magnitude,
            dimension: unit.dimension,
        })
    }

    /// Parse a quantity literal such as `"-241.826 kJ/mol"` or `"3.5"`.
    pub fn parse(text: &str) -> QResult {
        let text = text.trim();
        let split = text
            .find(|c: char| c.is_whitespace())
            .map(|i| (&text[..i], &text[i + 1..]))
            .unwrap_or((text, ""));
        let (number, unit) = split;
        let value: f64 = number
            .parse()
            .map_err(|_| QuantityError::QuantityParse(text.to_string()))?;
        Quantity::new(value, unit)
    }

    pub fn len(&self) -> usize {
        self.magnitude.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn is_scalar(&self) -> bool {
        self.magnitude.len() == 1
    }

    pub fn dimension(&self) -> &Dimension {
        &self.dimension
    }

    pub fn magnitude(&self) -> &[Expr] {
        &self.magnitude
    }

    /// One element as a scalar quantity.
    pub fn element(&self, index: usize) -> Quantity {
        Quantity {
            magnitude: vec![self.magnitude[index].clone()],
            dimension: self.dimension,
        }
    }

    /// Base-SI value of a scalar constant quantity.
    pub fn value_si(&self) -> Option<f64> {
        if self.magnitude.len() == 1 {
            self.magnitude[0].constant_value()
        } else {
            None
        }
    }

    /// Base-SI values if every element is a constant.
    pub fn values_si(&self) -> Option<Vec<f64>> {
        self.magnitude.iter().map(Expr::constant_value).collect()
    }

    /// Whether every element is a plain symbol node.
    pub fn is_symbolic(&self) -> bool {
        self.magnitude.iter().all(Expr::is_symbol)
    }

    /// Convert a constant quantity into the given display unit.
    pub fn in_unit(&self, unit: &str) -> Result<Vec<f64>, QuantityError> {
        let unit = parse_unit(unit)?;
        self.in_parsed_unit(&unit)
    }

    pub fn in_parsed_unit(&self, unit: &Unit) -> Result<Vec<f64>, QuantityError> {
        if unit.dimension != self.dimension {
            return Err(QuantityError::dimensions(
                unit.dimension.to_string(),
                self.dimension.to_string(),
            ));
        }
        self.values_si()
            .map(|values| values.iter().map(|&v| unit.from_si(v)).collect())
            .ok_or_else(|| {
                QuantityError::NumericBuild("symbolic quantity has no numeric value".into())
            })
    }

    fn check_dimension(&self, other: &Quantity) -> Result<(), QuantityError> {
        if self.dimension != other.dimension {
            return Err(QuantityError::dimensions(
                self.dimension.to_string(),
                other.dimension.to_string(),
            ));
        }
        Ok(())
    }

    fn broadcast<'a>(
        &'a self,
        other: &'a Quantity,
    ) -> Result<Vec<(&'a Expr, &'a Expr)>, QuantityError> {
        let (n, m) = (self.magnitude.len(), other.magnitude.len());
        let pairs = match (n, m) {
            (a, b) if a == b => self.magnitude.iter().zip(other.magnitude.iter()).collect(),
            (1, _) => other.magnitude.iter().map(|e| (&self.magnitude[0], e)).collect(),
            (_, 1) => self.magnitude.iter().map(|e| (e, &other.magnitude[0])).collect(),
            _ => return Err(QuantityError::ShapeMismatch(n, m)),
        };
        Ok(pairs)
    }

    fn q_add(&self, other: &Quantity) -> QResult {
        self.check_dimension(other)?;
        let magnitude = self.broadcast(other)?.iter().map(|(a, b)| a.add(b)).collect();
        Ok(Quantity {
            magnitude,
            dimension: self.dimension,
        })
    }

    fn q_sub(&self, other: &Quantity) -> QResult {
        self.check_dimension(other)?;
        let magnitude = self.broadcast(other)?.iter().map(|(a, b)| a.sub(b)).collect();
        Ok(Quantity {
            magnitude,
            dimension: self.dimension,
        })
    }

    fn q_mul(&self, other: &Quantity) -> QResult {
        let magnitude = self.broadcast(other)?.iter().map(|(a, b)| a.mul(b)).collect();
        Ok(Quantity {
            magnitude,
            dimension: self.dimension.multiply(&other.dimension),
        })
    }

    fn q_div(&self, other: &Quantity) -> QResult {
        let magnitude = self
            .broadcast(other)?
            .iter()
            .map(|(a, b)| a.div(b))
            .collect::<Result<_, _>>()?;
        Ok(Quantity {
            magnitude,
            dimension: self.dimension.divide(&other.dimension),
        })
    }

    /// Element-wise square.
    pub fn sq(&self) -> Quantity {
        Quantity {
            magnitude: self.magnitude.iter().map(Expr::sq).collect(),
            dimension: self.dimension.powi(2),
        }
    }

    /// Integer power with exact dimension algebra.
    pub fn powi(&self, exponent: i32) -> Quantity {
        Quantity {
            magnitude: self
                .magnitude
                .iter()
                .map(|e| e.powf(f64::from(exponent)))
                .collect(),
            dimension: self.dimension.powi(exponent),
        }
    }

    /// Element-wise comparison, 1.0 where `self > other`.
    pub fn gt(&self, other: &Quantity) -> QResult {
        self.check_dimension(other)?;
        let magnitude = self.broadcast(other)?.iter().map(|(a, b)| a.gt(b)).collect();
        Ok(Quantity {
            magnitude,
            dimension: Dimension::NONE,
        })
    }

    /// Inner product of two vector quantities.
    pub fn dot(&self, other: &Quantity) -> QResult {
        Ok(qsum(&self.q_mul(other)?))
    }
}

impl fmt::Debug for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quantity({:?} [{}])", self.magnitude, self.dimension)
    }
}

impl fmt::Display for Quantity {
    /// Render a constant quantity as `<value> <dimension>` in base SI, the
    /// format accepted by [`Quantity::parse`].
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.values_si() {
            Some(values) if values.len() == 1 => write!(f, "{:.12e} {}", values[0], self.dimension),
            Some(values) => {
                let joined: Vec<String> = values.iter().map(|v| format!("{v:.12e}")).collect();
                write!(f, "[{}] {}", joined.join(", "), self.dimension)
            }
            None => write!(f, "<symbolic> {}", self.dimension),
        }
    }
}

impl Neg for &Quantity {
    type Output = Quantity;
    fn neg(self) -> Quantity {
        Quantity {
            magnitude: self.magnitude.iter().map(Expr::neg).collect(),
            dimension: self.dimension,
        }
    }
}

impl Neg for Quantity {
    type Output = Quantity;
    fn neg(self) -> Quantity {
        -&self
    }
}

// Binary operators over quantities, references, chained results, and bare
// floats. `Result op Result` is not expressible under the orphan rules;
// formula code inserts `?` on one operand instead.
macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $func:ident) => {
        impl $trait<&Quantity> for &Quantity {
            type Output = QResult;
            fn $method(self, rhs: &Quantity) -> QResult {
                self.$func(rhs)
            }
        }
        impl $trait<Quantity> for &Quantity {
            type Output = QResult;
            fn $method(self, rhs: Quantity) -> QResult {
                self.$func(&rhs)
            }
        }
        impl $trait<&Quantity> for Quantity {
            type Output = QResult;
            fn $method(self, rhs: &Quantity) -> QResult {
                self.$func(rhs)
            }
        }
        impl $trait<Quantity> for Quantity {
            type Output = QResult;
            fn $method(self, rhs: Quantity) -> QResult {
                self.$func(&rhs)
            }
        }
        impl $trait<QResult> for Quantity {
            type Output = QResult;
            fn $method(self, rhs: QResult) -> QResult {
                self.$func(&rhs?)
            }
        }
        impl $trait<QResult> for &Quantity {
            type Output = QResult;
            fn $method(self, rhs: QResult) -> QResult {
                self.$func(&rhs?)
            }
        }
        impl $trait<Quantity> for QResult {
            type Output = QResult;
            fn $method(self, rhs: Quantity) -> QResult {
                self?.$func(&rhs)
            }
        }
        impl $trait<&Quantity> for QResult {
            type Output = QResult;
            fn $method(self, rhs: &Quantity) -> QResult {
                self?.$func(rhs)
            }
        }
        impl $trait<f64> for &Quantity {
            type Output = QResult;
            fn $method(self, rhs: f64) -> QResult {
                self.$func(&Quantity::dimensionless(rhs))
            }
        }
        impl $trait<f64> for Quantity {
            type Output = QResult;
            fn $method(self, rhs: f64) -> QResult {
                self.$func(&Quantity::dimensionless(rhs))
            }
        }
        impl $trait<&Quantity> for f64 {
            type Output = QResult;
            fn $method(self, rhs: &Quantity) -> QResult {
                Quantity::dimensionless(self).$func(rhs)
            }
        }
        impl $trait<Quantity> for f64 {
            type Output = QResult;
            fn $method(self, rhs: Quantity) -> QResult {
                Quantity::dimensionless(self).$func(&rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add, q_add);
impl_binary_operator!(Sub, sub, q_sub);
impl_binary_operator!(Mul, mul, q_mul);
impl_binary_operator!(Div, div, q_div);

/// Sum over the elements of one vector quantity.
pub fn qsum(quantity: &Quantity) -> Quantity {
    let mut total = quantity.magnitude[0].clone();
    for e in &quantity.magnitude[1..] {
        total = total.add(e);
    }
    Quantity {
        magnitude: vec![total],
        dimension: quantity.dimension,
    }
}

/// Concatenate scalar or vector quantities of one dimension into a vector.
pub fn qvertcat(quantities: &[Quantity]) -> QResult {
    let dimension = *quantities
        .first()
        .ok_or_else(|| QuantityError::NumericBuild("empty concatenation".into()))?
        .dimension();
    let mut magnitude = Vec::new();
    for q in quantities {
        if *q.dimension() != dimension {
            return Err(QuantityError::dimensions(
                dimension.to_string(),
                q.dimension().to_string(),
            ));
        }
        magnitude.extend(q.magnitude.iter().cloned());
    }
    Ok(Quantity {
        magnitude,
        dimension,
    })
}

fn dimensionless_map(
    quantity: &Quantity,
    op: impl Fn(&Expr) -> Expr,
    name: &str,
) -> QResult {
    if !quantity.dimension.is_dimensionless() {
        return Err(
            QuantityError::dimensions("dimless", quantity.dimension.to_string())
                .with_context(name),
        );
    }
    Ok(Quantity {
        magnitude: quantity.magnitude.iter().map(op).collect(),
        dimension: Dimension::NONE,
    })
}

/// Natural logarithm of a dimensionless quantity.
pub fn qlog(quantity: &Quantity) -> QResult {
    dimensionless_map(quantity, Expr::ln, "log")
}

/// Exponential of a dimensionless quantity.
pub fn qexp(quantity: &Quantity) -> QResult {
    dimensionless_map(quantity, Expr::exp, "exp")
}

/// Square root; the dimension exponents are halved exactly.
pub fn qsqrt(quantity: &Quantity) -> Quantity {
    Quantity {
        magnitude: quantity.magnitude.iter().map(Expr::sqrt).collect(),
        dimension: quantity.dimension.sqrt(),
    }
}

/// General power; both base and exponent must be dimensionless.
pub fn qpow(base: &Quantity, exponent: &Quantity) -> QResult {
    if !base.dimension.is_dimensionless() {
        return Err(QuantityError::dimensions("dimless", base.dimension.to_string())
            .with_context("pow base"));
    }
    if !exponent.dimension.is_dimensionless() {
        return Err(
            QuantityError::dimensions("dimless", exponent.dimension.to_string())
                .with_context("pow exponent"),
        );
    }
    let magnitude = base
        .broadcast(exponent)?
        .iter()
        .map(|(b, e)| b.pow(e))
        .collect();
    Ok(Quantity {
        magnitude,
        dimension: Dimension::NONE,
    })
}

/// Element-wise branch: where `cond` is nonzero take `on_true`, else
/// `on_false`. Both branches must share one dimension.
pub fn conditional(cond: &Quantity, on_true: &Quantity, on_false: &Quantity) -> QResult {
    if !cond.dimension.is_dimensionless() {
        return Err(QuantityError::dimensions("dimless", cond.dimension.to_string())
            .with_context("conditional"));
    }
    on_true.check_dimension(on_false)?;
    let branches = on_true.broadcast(on_false)?;
    let n = branches.len().max(cond.magnitude.len());
    if cond.magnitude.len() != n && cond.magnitude.len() != 1 {
        return Err(QuantityError::ShapeMismatch(cond.magnitude.len(), n));
    }
    if branches.len() != n && branches.len() != 1 {
        return Err(QuantityError::ShapeMismatch(branches.len(), n));
    }
    let pick = |v: &[(&Expr, &Expr)], i: usize| -> (Expr, Expr) {
        let (a, b) = v[if v.len() == 1 { 0 } else { i }];
        (a.clone(), b.clone())
    };
    let magnitude = (0..n)
        .map(|i| {
            let c = &cond.magnitude[if cond.magnitude.len() == 1 { 0 } else { i }];
            let (t, f) = pick(&branches, i);
            Expr::conditional(c, &t, &f)
        })
        .collect();
    Ok(Quantity {
        magnitude,
        dimension: *on_true.dimension(),
    })
}

/// Unit-aware derivative of one quantity with respect to a symbol quantity.
///
/// Either side may be a vector as long as the other one is scalar; the
/// result is the corresponding gradient vector (dense, with structural
/// zeros as literal 0.0).
pub fn jacobian(dependent: &Quantity, independent: &Quantity) -> QResult {
    if !independent.is_symbolic() {
        return Err(QuantityError::NumericBuild(
            "jacobian requires symbol quantities as independents".into(),
        ));
    }
    if dependent.len() > 1 && independent.len() > 1 {
        return Err(QuantityError::NumericBuild(
            "jacobian of vector by vector is not a quantity".into(),
        ));
    }
    let jac = graph::jacobian(dependent.magnitude(), independent.magnitude())?;
    let n = dependent.len().max(independent.len());
    let mut magnitude = vec![Expr::constant(0.0); n];
    for (row, col, expr) in jac.triplets {
        magnitude[row.max(col)] = expr;
    }
    Ok(Quantity {
        magnitude,
        dimension: dependent.dimension.divide(&independent.dimension),
    })
}
