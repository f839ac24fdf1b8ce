//! Compiled callables over nested dictionaries of quantities.
//!
//! A [`QFunction`] wraps a compiled expression tape so that both arguments
//! and results are nested string-keyed dictionaries of quantities with a
//! known unit skeleton. Arguments are declared with symbolic quantities,
//! results with derived expressions; calling checks every argument leaf
//! against the declared dimension and shape, and wraps the numeric outputs
//! back into the declared structure. Flattening is deterministic with `/`
//! as the path separator.

use crate::error::QuantityError;
use crate::graph::{CompiledFunction, Expr};
use crate::quantity::Quantity;
use crate::structures::{Nested, NestedQuantity};
use crate::units::Dimension;

struct Leaf {
    path: String,
    len: usize,
    dimension: Dimension,
}

/// A function object whose inputs and outputs are nested dictionaries of
/// dimensioned quantities.
pub struct QFunction {
    function: CompiledFunction,
    args: Vec<Leaf>,
    results: Vec<Leaf>,
}

impl QFunction {
    /// Compile `results` as a function of the symbolic `args`.
    pub fn new(args: &NestedQuantity, results: &NestedQuantity) -> Result<QFunction, QuantityError> {
        let mut inputs: Vec<Expr> = Vec::new();
        let mut arg_leaves = Vec::new();
        for (path, quantity) in args.flatten() {
            arg_leaves.push(Leaf {
                path,
                len: quantity.len(),
                dimension: *quantity.dimension(),
            });
            inputs.extend(quantity.magnitude().iter().cloned());
        }
        let mut outputs: Vec<Expr> = Vec::new();
        let mut result_leaves = Vec::new();
        for (path, quantity) in results.flatten() {
            result_leaves.push(Leaf {
                path,
                len: quantity.len(),
                dimension: *quantity.dimension(),
            });
            outputs.extend(quantity.magnitude().iter().cloned());
        }
        Ok(QFunction {
            function: CompiledFunction::compile(&inputs, &outputs)?,
            args: arg_leaves,
            results: result_leaves,
        })
    }

    /// The argument structure: unit signatures per leaf path.
    pub fn arg_structure(&self) -> Nested<String> {
        Nested::unflatten(
            self.args
                .iter()
                .map(|leaf| (leaf.path.clone(), leaf.dimension.to_string())),
        )
    }

    /// The result structure: unit signatures per leaf path.
    pub fn result_structure(&self) -> Nested<String> {
        Nested::unflatten(
            self.results
                .iter()
                .map(|leaf| (leaf.path.clone(), leaf.dimension.to_string())),
        )
    }

    /// Evaluate with numeric quantities in the declared structure.
    pub fn call(&self, args: &NestedQuantity) -> Result<NestedQuantity, QuantityError> {
        let mut values = Vec::with_capacity(self.function.n_inputs());
        for leaf in &self.args {
            let keys: Vec<&str> = leaf.path.split('/').collect();
            let quantity = args
                .get(&keys)
                .and_then(Nested::as_leaf)
                .ok_or_else(|| QuantityError::MissingSymbol(leaf.path.clone()))?;
            if quantity.dimension() != &leaf.dimension {
                return Err(QuantityError::dimensions(
                    leaf.dimension.to_string(),
                    quantity.dimension().to_string(),
                )
                .with_context(format!("argument '{}'", leaf.path)));
            }
            if quantity.len() != leaf.len {
                return Err(QuantityError::ShapeMismatch(quantity.len(), leaf.len));
            }
            values.extend(quantity.values_si().ok_or_else(|| {
                QuantityError::NumericBuild(format!("argument '{}' is not numeric", leaf.path))
            })?);
        }
        let outputs = self.function.call(&values);
        let mut offset = 0;
        let mut result = NestedQuantity::empty();
        for leaf in &self.results {
            let keys: Vec<&str> = leaf.path.split('/').collect();
            result.insert(
                &keys,
                Quantity::from_si_vector(&outputs[offset..offset + leaf.len], leaf.dimension),
            );
            offset += leaf.len;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::qsum;

    fn ideal_gas_function() -> QFunction {
        // V = n R T / p over nested argument groups
        let t = Quantity::symbol("T", "K").unwrap();
        let p = Quantity::symbol("p", "Pa").unwrap();
        let n = Quantity::symbol_vector("n", 2, "mol").unwrap();
        let volume = (&qsum(&n) * crate::constants::r_gas() * &t / &p).unwrap();

        let mut args = NestedQuantity::empty();
        args.insert(&["state", "T"], t);
        args.insert(&["state", "p"], p);
        args.insert(&["state", "n"], n);
        let mut results = NestedQuantity::empty();
        results.insert(&["props", "V"], volume);
        QFunction::new(&args, &results).unwrap()
    }

    #[test]
    fn structures_expose_unit_skeletons() {
        let function = ideal_gas_function();
        let args = function.arg_structure();
        assert_eq!(
            args.get(&["state", "T"]).unwrap().as_leaf().unwrap(),
            "K"
        );
        let results = function.result_structure();
        assert_eq!(
            results.get(&["props", "V"]).unwrap().as_leaf().unwrap(),
            "m**3"
        );
    }

    #[test]
    fn call_converts_and_wraps() {
        let function = ideal_gas_function();
        let mut args = NestedQuantity::empty();
        // arguments in display units; storage is base SI either way
        args.insert(&["state", "T"], Quantity::new(25.0, "degC").unwrap());
        args.insert(&["state", "p"], Quantity::new(1.0, "bar").unwrap());
        args.insert(&["state", "n"], Quantity::vector(&[1.0, 1.0], "mol").unwrap());
        let result = function.call(&args).unwrap();
        let volume = result.get(&["props", "V"]).unwrap().as_leaf().unwrap();
        let expected = 2.0 * crate::constants::GAS_CONSTANT_SI * 298.15 / 1e5;
        assert!((volume.value_si().unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn argument_dimensions_are_enforced() {
        let function = ideal_gas_function();
        let mut args = NestedQuantity::empty();
        args.insert(&["state", "T"], Quantity::new(1.0, "bar").unwrap());
        args.insert(&["state", "p"], Quantity::new(1.0, "bar").unwrap());
        args.insert(&["state", "n"], Quantity::vector(&[1.0, 1.0], "mol").unwrap());
        assert!(matches!(
            function.call(&args),
            Err(QuantityError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn missing_arguments_are_reported() {
        let function = ideal_gas_function();
        let args = NestedQuantity::empty();
        assert!(matches!(
            function.call(&args),
            Err(QuantityError::MissingSymbol(_))
        ));
    }
}
