//! Symbolic expression graph with exact-derivative support.
//!
//! Expressions are immutable scalar nodes behind [`Rc`], built bottom-up so
//! structural cycles cannot occur. The same graph carries both numeric
//! magnitudes (constant nodes, folded eagerly) and symbolic magnitudes
//! (named symbols), which is what lets one code path build a concrete
//! function or a symbolic one.
//!
//! Derivatives are produced by a reverse-mode sweep that yields *symbolic*
//! Jacobian entries with exact sparsity: an entry exists if and only if the
//! output structurally depends on the input symbol. Compressed sparse column
//! is the only exchange format for Jacobians.
//!
//! [`CompiledFunction`] flattens a set of output expressions into a flat
//! evaluation tape over value slots, so repeated evaluation inside a solver
//! loop does no graph traversal.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::QuantityError;

/// Unary primitive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Log,
    Exp,
    Sqrt,
    Sq,
}

/// Binary primitive operations.
///
/// `Gt` evaluates to 1.0 or 0.0 and is used as the condition input of
/// [`Expr::conditional`]; its derivative is structurally zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Gt,
}

#[derive(Debug)]
enum Node {
    Constant(f64),
    Symbol { name: Rc<str>, index: Option<usize> },
    Unary { op: UnaryOp, arg: Expr },
    Binary { op: BinaryOp, lhs: Expr, rhs: Expr },
    Conditional { cond: Expr, on_true: Expr, on_false: Expr },
}

/// A handle to one scalar node in the expression graph.
#[derive(Clone)]
pub struct Expr(Rc<Node>);

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            Node::Constant(v) => write!(f, "{v}"),
            Node::Symbol { .. } => write!(f, "{}", self.symbol_name().unwrap_or_default()),
            Node::Unary { op, arg } => write!(f, "{op:?}({arg:?})"),
            Node::Binary { op, lhs, rhs } => write!(f, "({lhs:?} {op:?} {rhs:?})"),
            Node::Conditional {
                cond,
                on_true,
                on_false,
            } => write!(f, "({cond:?} ? {on_true:?} : {on_false:?})"),
        }
    }
}

impl Expr {
    fn key(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn constant(value: f64) -> Expr {
        Expr(Rc::new(Node::Constant(value)))
    }

    /// Allocate a single named symbol.
    pub fn symbol(name: &str) -> Expr {
        Expr(Rc::new(Node::Symbol {
            name: Rc::from(name),
            index: None,
        }))
    }

    /// Allocate `n` symbols bound to `name[0..n-1]`.
    pub fn symbols(name: &str, n: usize) -> Vec<Expr> {
        let shared: Rc<str> = Rc::from(name);
        (0..n)
            .map(|i| {
                Expr(Rc::new(Node::Symbol {
                    name: shared.clone(),
                    index: Some(i),
                }))
            })
            .collect()
    }

    pub fn is_symbol(&self) -> bool {
        matches!(&*self.0, Node::Symbol { .. })
    }

    /// The display name of a symbol node, `None` for anything else.
    pub fn symbol_name(&self) -> Option<String> {
        match &*self.0 {
            Node::Symbol { name, index: None } => Some(name.to_string()),
            Node::Symbol {
                name,
                index: Some(i),
            } => Some(format!("{name}[{i}]")),
            _ => None,
        }
    }

    /// The value of a constant node, `None` for anything else.
    pub fn constant_value(&self) -> Option<f64> {
        match &*self.0 {
            Node::Constant(v) => Some(*v),
            _ => None,
        }
    }

    fn unary(op: UnaryOp, arg: &Expr) -> Expr {
        if let Some(v) = arg.constant_value() {
            let value = match op {
                UnaryOp::Neg => -v,
                UnaryOp::Log => v.ln(),
                UnaryOp::Exp => v.exp(),
                UnaryOp::Sqrt => v.sqrt(),
                UnaryOp::Sq => v * v,
            };
            return Expr::constant(value);
        }
        Expr(Rc::new(Node::Unary {
            op,
            arg: arg.clone(),
        }))
    }

    fn binary(op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Expr {
        if let (Some(a), Some(b)) = (lhs.constant_value(), rhs.constant_value()) {
            let value = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Pow => a.powf(b),
                BinaryOp::Gt => {
                    if a > b {
                        1.0
                    } else {
                        0.0
                    }
                }
            };
            return Expr::constant(value);
        }
        Expr(Rc::new(Node::Binary {
            op,
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        }))
    }

    pub fn add(&self, other: &Expr) -> Expr {
        match (self.constant_value(), other.constant_value()) {
            (Some(0.0), _) => other.clone(),
            (_, Some(0.0)) => self.clone(),
            _ => Expr::binary(BinaryOp::Add, self, other),
        }
    }

    pub fn sub(&self, other: &Expr) -> Expr {
        if other.constant_value() == Some(0.0) {
            return self.clone();
        }
        Expr::binary(BinaryOp::Sub, self, other)
    }

    pub fn mul(&self, other: &Expr) -> Expr {
        match (self.constant_value(), other.constant_value()) {
            (Some(0.0), _) | (_, Some(0.0)) => Expr::constant(0.0),
            (Some(1.0), _) => other.clone(),
            (_, Some(1.0)) => self.clone(),
            _ => Expr::binary(BinaryOp::Mul, self, other),
        }
    }

    /// Division; a literal zero denominator is a structural error.
    pub fn div(&self, other: &Expr) -> Result<Expr, QuantityError> {
        if other.constant_value() == Some(0.0) {
            return Err(QuantityError::NumericBuild(
                "division by a literal zero".into(),
            ));
        }
        if other.constant_value() == Some(1.0) {
            return Ok(self.clone());
        }
        if self.constant_value() == Some(0.0) {
            return Ok(Expr::constant(0.0));
        }
        Ok(Expr::binary(BinaryOp::Div, self, other))
    }

    pub fn neg(&self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }

    pub fn ln(&self) -> Expr {
        Expr::unary(UnaryOp::Log, self)
    }

    pub fn exp(&self) -> Expr {
        Expr::unary(UnaryOp::Exp, self)
    }

    pub fn sqrt(&self) -> Expr {
        Expr::unary(UnaryOp::Sqrt, self)
    }

    pub fn sq(&self) -> Expr {
        Expr::unary(UnaryOp::Sq, self)
    }

    pub fn pow(&self, exponent: &Expr) -> Expr {
        match exponent.constant_value() {
            Some(1.0) => self.clone(),
            Some(0.0) => Expr::constant(1.0),
            _ => Expr::binary(BinaryOp::Pow, self, exponent),
        }
    }

    pub fn powf(&self, exponent: f64) -> Expr {
        self.pow(&Expr::constant(exponent))
    }

    /// 1.0 where `self > other`, 0.0 elsewhere.
    pub fn gt(&self, other: &Expr) -> Expr {
        Expr::binary(BinaryOp::Gt, self, other)
    }

    /// Element-wise branch: `cond != 0` selects `on_true`, else `on_false`.
    pub fn conditional(cond: &Expr, on_true: &Expr, on_false: &Expr) -> Expr {
        if let Some(c) = cond.constant_value() {
            return if c != 0.0 {
                on_true.clone()
            } else {
                on_false.clone()
            };
        }
        Expr(Rc::new(Node::Conditional {
            cond: cond.clone(),
            on_true: on_true.clone(),
            on_false: on_false.clone(),
        }))
    }
}

/// Rebuild expressions with some symbol nodes replaced by other
/// expressions. Shared sub-expressions are rebuilt once.
///
/// This is what lets a contribution derive a function on scratch symbols
/// (e.g. reduced temperature and density) and then graft the derivative
/// expressions onto the real state-dependent arguments.
pub fn substitute(roots: &[Expr], replacements: &HashMap<usize, Expr>) -> Vec<Expr> {
    let mut rebuilt: HashMap<usize, Expr> = replacements.clone();
    for expr in topological(roots) {
        if rebuilt.contains_key(&expr.key()) {
            continue;
        }
        let new = match &*expr.0 {
            Node::Constant(_) | Node::Symbol { .. } => expr.clone(),
            Node::Unary { op, arg } => Expr::unary(*op, &rebuilt[&arg.key()]),
            Node::Binary { op, lhs, rhs } => {
                Expr::binary(*op, &rebuilt[&lhs.key()], &rebuilt[&rhs.key()])
            }
            Node::Conditional {
                cond,
                on_true,
                on_false,
            } => Expr::conditional(
                &rebuilt[&cond.key()],
                &rebuilt[&on_true.key()],
                &rebuilt[&on_false.key()],
            ),
        };
        rebuilt.insert(expr.key(), new);
    }
    roots.iter().map(|e| rebuilt[&e.key()].clone()).collect()
}

/// A handle for [`substitute`]: the key of a symbol expression.
pub fn expr_key(expr: &Expr) -> usize {
    expr.key()
}

/// Deduplicated post-order over the sub-DAG reachable from `roots`.
fn topological(roots: &[Expr]) -> Vec<Expr> {
    let mut order = Vec::new();
    let mut seen: HashMap<usize, ()> = HashMap::new();
    // (node, children_expanded)
    let mut stack: Vec<(Expr, bool)> = roots.iter().rev().map(|e| (e.clone(), false)).collect();
    while let Some((expr, expanded)) = stack.pop() {
        if expanded {
            order.push(expr);
            continue;
        }
        if seen.contains_key(&expr.key()) {
            continue;
        }
        seen.insert(expr.key(), ());
        stack.push((expr.clone(), true));
        match &*expr.0 {
            Node::Constant(_) | Node::Symbol { .. } => {}
            Node::Unary { arg, .. } => stack.push((arg.clone(), false)),
            Node::Binary { lhs, rhs, .. } => {
                stack.push((lhs.clone(), false));
                stack.push((rhs.clone(), false));
            }
            Node::Conditional {
                cond,
                on_true,
                on_false,
            } => {
                stack.push((cond.clone(), false));
                stack.push((on_true.clone(), false));
                stack.push((on_false.clone(), false));
            }
        }
    }
    order
}

/// Reverse-mode sweep: symbolic adjoints of one output with respect to the
/// wanted symbol nodes (keyed by node identity, valued by column index).
fn adjoints(output: &Expr, wanted: &HashMap<usize, usize>) -> Vec<(usize, Expr)> {
    let order = topological(std::slice::from_ref(output));
    let mut adjoint: HashMap<usize, Expr> = HashMap::new();
    adjoint.insert(output.key(), Expr::constant(1.0));

    let accumulate = |map: &mut HashMap<usize, Expr>, child: &Expr, contribution: Expr| {
        if child.constant_value().is_some() || contribution.constant_value() == Some(0.0) {
            return;
        }
        match map.remove(&child.key()) {
            Some(existing) => {
                map.insert(child.key(), existing.add(&contribution));
            }
            None => {
                map.insert(child.key(), contribution);
            }
        }
    };

    for expr in order.iter().rev() {
        let Some(bar) = adjoint.get(&expr.key()).cloned() else {
            continue;
        };
        match &*expr.0 {
            Node::Constant(_) | Node::Symbol { .. } => {}
            Node::Unary { op, arg } => {
                let partial = match op {
                    UnaryOp::Neg => bar.neg(),
                    // d/dx log x = 1/x
                    UnaryOp::Log => bar.div(arg).unwrap_or_else(|_| bar.clone()),
                    UnaryOp::Exp => bar.mul(expr),
                    // d/dx sqrt x = 1 / (2 sqrt x)
                    UnaryOp::Sqrt => bar
                        .div(&Expr::constant(2.0).mul(expr))
                        .unwrap_or_else(|_| bar.clone()),
                    UnaryOp::Sq => bar.mul(&Expr::constant(2.0).mul(arg)),
                };
                accumulate(&mut adjoint, arg, partial);
            }
            Node::Binary { op, lhs, rhs } => match op {
                BinaryOp::Add => {
                    accumulate(&mut adjoint, lhs, bar.clone());
                    accumulate(&mut adjoint, rhs, bar);
                }
                BinaryOp::Sub => {
                    accumulate(&mut adjoint, lhs, bar.clone());
                    accumulate(&mut adjoint, rhs, bar.neg());
                }
                BinaryOp::Mul => {
                    accumulate(&mut adjoint, lhs, bar.mul(rhs));
                    accumulate(&mut adjoint, rhs, bar.mul(lhs));
                }
                BinaryOp::Div => {
                    // d(l/r)/dl = 1/r, d(l/r)/dr = -l/r^2
                    if let Ok(partial) = bar.div(rhs) {
                        accumulate(&mut adjoint, lhs, partial);
                    }
                    if let Ok(partial) = bar.mul(&lhs.neg()).div(&rhs.sq()) {
                        accumulate(&mut adjoint, rhs, partial);
                    }
                }
                BinaryOp::Pow => {
                    // d(b^e)/db = e * b^(e-1), d(b^e)/de = b^e * ln b
                    let e_minus_one = rhs.sub(&Expr::constant(1.0));
                    accumulate(&mut adjoint, lhs, bar.mul(&rhs.mul(&lhs.pow(&e_minus_one))));
                    accumulate(&mut adjoint, rhs, bar.mul(&expr.mul(&lhs.ln())));
                }
                // comparisons are piecewise constant
                BinaryOp::Gt => {}
            },
            Node::Conditional {
                cond,
                on_true,
                on_false,
            } => {
                let zero = Expr::constant(0.0);
                accumulate(
                    &mut adjoint,
                    on_true,
                    Expr::conditional(cond, &bar, &zero),
                );
                accumulate(
                    &mut adjoint,
                    on_false,
                    Expr::conditional(cond, &zero, &bar),
                );
            }
        }
    }

    let mut entries: Vec<(usize, Expr)> = adjoint
        .into_iter()
        .filter_map(|(key, expr)| wanted.get(&key).map(|&col| (col, expr)))
        .collect();
    entries.sort_by_key(|(col, _)| *col);
    entries
}

/// Symbolic Jacobian: exact-sparsity triplets of derivative expressions.
pub struct SymbolicJacobian {
    pub nrows: usize,
    pub ncols: usize,
    /// `(row, col, derivative)`, sorted by column then row.
    pub triplets: Vec<(usize, usize, Expr)>,
}

/// The sparse Jacobian of `outputs` with respect to `variables`.
///
/// Every entry of `variables` must be a symbol node; the structure of the
/// result is exact (no numerical zero-detection).
pub fn jacobian(outputs: &[Expr], variables: &[Expr]) -> Result<SymbolicJacobian, QuantityError> {
    let mut wanted = HashMap::new();
    for (col, var) in variables.iter().enumerate() {
        if !var.is_symbol() {
            return Err(QuantityError::NumericBuild(
                "jacobian variables must be plain symbols".into(),
            ));
        }
        wanted.insert(var.key(), col);
    }
    let mut triplets = Vec::new();
    for (row, output) in outputs.iter().enumerate() {
        for (col, expr) in adjoints(output, &wanted) {
            triplets.push((row, col, expr));
        }
    }
    triplets.sort_by_key(|&(row, col, _)| (col, row));
    Ok(SymbolicJacobian {
        nrows: outputs.len(),
        ncols: variables.len(),
        triplets,
    })
}

/// A numeric sparse matrix in compressed sparse column form.
#[derive(Debug, Clone)]
pub struct CscMatrix {
    pub nrows: usize,
    pub ncols: usize,
    pub col_ptr: Vec<usize>,
    pub row_idx: Vec<usize>,
    pub values: Vec<f64>,
}

impl CscMatrix {
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        let range = self.col_ptr[col]..self.col_ptr[col + 1];
        for k in range {
            if self.row_idx[k] == row {
                return self.values[k];
            }
        }
        0.0
    }

    /// Expand to a dense matrix for the fallback direct factorization.
    pub fn to_dense(&self) -> nalgebra::DMatrix<f64> {
        let mut dense = nalgebra::DMatrix::zeros(self.nrows, self.ncols);
        for col in 0..self.ncols {
            for k in self.col_ptr[col]..self.col_ptr[col + 1] {
                dense[(self.row_idx[k], col)] = self.values[k];
            }
        }
        dense
    }

    /// Matrix-vector product `A * x`.
    pub fn mul_vector(&self, x: &[f64]) -> Vec<f64> {
        assert_eq!(x.len(), self.ncols, "vector length mismatch");
        let mut y = vec![0.0; self.nrows];
        for col in 0..self.ncols {
            for k in self.col_ptr[col]..self.col_ptr[col + 1] {
                y[self.row_idx[k]] += self.values[k] * x[col];
            }
        }
        y
    }
}

#[derive(Debug, Clone, Copy)]
enum TapeOp {
    Constant(usize, f64),
    Unary(usize, UnaryOp, usize),
    Binary(usize, BinaryOp, usize, usize),
    Conditional(usize, usize, usize, usize),
}

#[derive(Debug)]
struct JacobianLayout {
    nrows: usize,
    ncols: usize,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    slots: Vec<usize>,
}

/// A compiled callable over flat input/output vectors.
///
/// Inputs are the symbol nodes passed at compile time, in order. Evaluation
/// replays a flat tape; the optional Jacobian shares the same tape, so one
/// pass yields outputs and derivative values together.
#[derive(Debug)]
pub struct CompiledFunction {
    ops: Vec<TapeOp>,
    n_inputs: usize,
    n_slots: usize,
    output_slots: Vec<usize>,
    jacobian: Option<JacobianLayout>,
}

impl CompiledFunction {
    /// Compile `outputs` as a function of the symbol list `inputs`.
    pub fn compile(inputs: &[Expr], outputs: &[Expr]) -> Result<CompiledFunction, QuantityError> {
        Self::build(inputs, outputs, None)
    }

    /// As [`CompiledFunction::compile`], additionally preparing the sparse
    /// Jacobian of all outputs with respect to the first `n_diff` inputs.
    pub fn compile_with_jacobian(
        inputs: &[Expr],
        outputs: &[Expr],
        n_diff: usize,
    ) -> Result<CompiledFunction, QuantityError> {
        assert!(n_diff <= inputs.len(), "n_diff exceeds input count");
        let jac = jacobian(outputs, &inputs[..n_diff])?;
        Self::build(inputs, outputs, Some(jac))
    }

    fn build(
        inputs: &[Expr],
        outputs: &[Expr],
        jac: Option<SymbolicJacobian>,
    ) -> Result<CompiledFunction, QuantityError> {
        let mut slot_of: HashMap<usize, usize> = HashMap::new();
        let mut names: HashMap<String, usize> = HashMap::new();
        for (slot, input) in inputs.iter().enumerate() {
            let name = input
                .symbol_name()
                .ok_or_else(|| QuantityError::NumericBuild("inputs must be symbols".into()))?;
            if names.insert(name.clone(), slot).is_some() {
                return Err(QuantityError::DuplicateSymbol(name));
            }
            if slot_of.insert(input.key(), slot).is_some() {
                return Err(QuantityError::DuplicateSymbol(name));
            }
        }

        let mut roots: Vec<Expr> = outputs.to_vec();
        if let Some(jac) = &jac {
            roots.extend(jac.triplets.iter().map(|(_, _, e)| e.clone()));
        }

        let mut ops = Vec::new();
        let mut n_slots = inputs.len();
        for expr in topological(&roots) {
            if slot_of.contains_key(&expr.key()) {
                continue;
            }
            let slot = n_slots;
            match &*expr.0 {
                Node::Symbol { .. } => {
                    let name = expr.symbol_name().unwrap_or_default();
                    return Err(QuantityError::MissingSymbol(name));
                }
                Node::Constant(v) => ops.push(TapeOp::Constant(slot, *v)),
                Node::Unary { op, arg } => {
                    ops.push(TapeOp::Unary(slot, *op, slot_of[&arg.key()]))
                }
                Node::Binary { op, lhs, rhs } => ops.push(TapeOp::Binary(
                    slot,
                    *op,
                    slot_of[&lhs.key()],
                    slot_of[&rhs.key()],
                )),
                Node::Conditional {
                    cond,
                    on_true,
                    on_false,
                } => ops.push(TapeOp::Conditional(
                    slot,
                    slot_of[&cond.key()],
                    slot_of[&on_true.key()],
                    slot_of[&on_false.key()],
                )),
            }
            slot_of.insert(expr.key(), slot);
            n_slots += 1;
        }

        let output_slots = outputs.iter().map(|e| slot_of[&e.key()]).collect();

        let jacobian = jac.map(|jac| {
            let mut col_ptr = vec![0usize; jac.ncols + 1];
            let mut row_idx = Vec::with_capacity(jac.triplets.len());
            let mut slots = Vec::with_capacity(jac.triplets.len());
            for (row, col, expr) in &jac.triplets {
                col_ptr[col + 1] += 1;
                row_idx.push(*row);
                slots.push(slot_of[&expr.key()]);
            }
            for col in 0..jac.ncols {
                col_ptr[col + 1] += col_ptr[col];
            }
            JacobianLayout {
                nrows: jac.nrows,
                ncols: jac.ncols,
                col_ptr,
                row_idx,
                slots,
            }
        });

        Ok(CompiledFunction {
            ops,
            n_inputs: inputs.len(),
            n_slots,
            output_slots,
            jacobian,
        })
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_outputs(&self) -> usize {
        self.output_slots.len()
    }

    fn run_tape(&self, inputs: &[f64]) -> Vec<f64> {
        assert_eq!(inputs.len(), self.n_inputs, "input length mismatch");
        let mut slots = vec![0.0; self.n_slots];
        slots[..inputs.len()].copy_from_slice(inputs);
        for op in &self.ops {
            match *op {
                TapeOp::Constant(dst, v) => slots[dst] = v,
                TapeOp::Unary(dst, op, a) => {
                    let x = slots[a];
                    slots[dst] = match op {
                        UnaryOp::Neg => -x,
                        UnaryOp::Log => x.ln(),
                        UnaryOp::Exp => x.exp(),
                        UnaryOp::Sqrt => x.sqrt(),
                        UnaryOp::Sq => x * x,
                    };
                }
                TapeOp::Binary(dst, op, a, b) => {
                    let (x, y) = (slots[a], slots[b]);
                    slots[dst] = match op {
                        BinaryOp::Add => x + y,
                        BinaryOp::Sub => x - y,
                        BinaryOp::Mul => x * y,
                        BinaryOp::Div => x / y,
                        BinaryOp::Pow => x.powf(y),
                        BinaryOp::Gt => {
                            if x > y {
                                1.0
                            } else {
                                0.0
                            }
                        }
                    };
                }
                TapeOp::Conditional(dst, c, t, f) => {
                    slots[dst] = if slots[c] != 0.0 { slots[t] } else { slots[f] };
                }
            }
        }
        slots
    }

    /// Evaluate the outputs at the given input values.
    pub fn call(&self, inputs: &[f64]) -> Vec<f64> {
        let slots = self.run_tape(inputs);
        self.output_slots.iter().map(|&s| slots[s]).collect()
    }

    /// Evaluate outputs and the prepared sparse Jacobian together.
    ///
    /// Panics if the function was compiled without a Jacobian.
    pub fn call_with_jacobian(&self, inputs: &[f64]) -> (Vec<f64>, CscMatrix) {
        let layout = self
            .jacobian
            .as_ref()
            .expect("function compiled without Jacobian");
        let slots = self.run_tape(inputs);
        let outputs = self.output_slots.iter().map(|&s| slots[s]).collect();
        let values = layout.slots.iter().map(|&s| slots[s]).collect();
        (
            outputs,
            CscMatrix {
                nrows: layout.nrows,
                ncols: layout.ncols,
                col_ptr: layout.col_ptr.clone(),
                row_idx: layout.row_idx.clone(),
                values,
            },
        )
    }
}
