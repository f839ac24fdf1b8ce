//! Error types for all layers of the modelling engine.
//!
//! Each layer owns one error enum: symbolic construction errors
//! ([`QuantityError`]), model/frame assembly errors ([`AssemblyError`]) and
//! solver runtime errors ([`SolverError`]). Construction errors are raised
//! while expressions are built and never during a solve; assembly errors
//! carry the qualified path that triggered them; solver errors terminate the
//! current `solve()` call and leave the state vector at the last accepted
//! step.

use thiserror::Error;

/// Errors raised while building symbolic expressions and quantities.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuantityError {
    /// Unit-algebra violation during symbolic construction.
    #[error("dimension mismatch: expected [{expected}], got [{found}]{}",
            context.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    DimensionMismatch {
        expected: String,
        found: String,
        context: Option<String>,
    },

    /// A unit name that the registry does not know.
    #[error("undefined unit '{0}'")]
    UndefinedUnit(String),

    /// Malformed unit expression, e.g. unbalanced parentheses.
    #[error("cannot parse unit expression '{0}'")]
    UnitParse(String),

    /// Structurally invalid numeric construction, e.g. division by a
    /// literal zero.
    #[error("numeric build error: {0}")]
    NumericBuild(String),

    /// An expression references a symbol that is not among the compiled
    /// function inputs.
    #[error("unknown symbol '{0}' referenced at compile")]
    MissingSymbol(String),

    /// Two distinct symbols with the same name within one function.
    #[error("duplicate symbol name '{0}' within one function")]
    DuplicateSymbol(String),

    /// Element count mismatch between two vector quantities.
    #[error("shape mismatch: {0} vs {1} elements")]
    ShapeMismatch(usize, usize),

    /// Malformed quantity literal such as `"25 degC"` with a bad number.
    #[error("cannot parse quantity literal '{0}'")]
    QuantityParse(String),
}

impl QuantityError {
    pub(crate) fn dimensions(expected: impl Into<String>, found: impl Into<String>) -> Self {
        QuantityError::DimensionMismatch {
            expected: expected.into(),
            found: found.into(),
            context: None,
        }
    }

    pub(crate) fn with_context(self, context: impl Into<String>) -> Self {
        match self {
            QuantityError::DimensionMismatch {
                expected, found, ..
            } => QuantityError::DimensionMismatch {
                expected,
                found,
                context: Some(context.into()),
            },
            other => other,
        }
    }
}

/// Errors raised while assembling frames, materials, and model trees.
///
/// All of these are fatal for the build; none can occur during a solve.
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// A model wrote to a property that was never declared in its interface.
    #[error("undeclared property '{name}' written in '{path}'")]
    UndeclaredProperty { path: String, name: String },

    /// A contribution required an input property that no earlier
    /// contribution (nor the state definition) published.
    #[error("contribution '{contribution}' requires property '{name}' which is not provided upstream")]
    MissingRequirement { contribution: String, name: String },

    /// Out-of-order data access during the define pass.
    #[error("data flow error in '{path}': {message}")]
    DataFlow { path: String, message: String },

    /// Thermodynamic parameters without values in any source.
    #[error("missing thermodynamic parameters: {names:?}")]
    MissingParameter { names: Vec<String> },

    /// A name was declared twice in one namespace.
    #[error("duplicate {kind} '{name}' in '{path}'")]
    DuplicateName {
        path: String,
        kind: &'static str,
        name: String,
    },

    /// A referenced name does not exist in its namespace.
    #[error("unknown {kind} '{name}' in '{path}'")]
    UnknownName {
        path: String,
        kind: &'static str,
        name: String,
    },

    /// A material does not satisfy the port specification it was
    /// connected to.
    #[error("material incompatible with port '{port}' of '{path}': {message}")]
    IncompatibleMaterial {
        path: String,
        port: String,
        message: String,
    },

    /// Invalid frame or model structure configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unit or symbolic construction failure during assembly.
    #[error(transparent)]
    Quantity(#[from] QuantityError),
}

impl AssemblyError {
    pub(crate) fn data_flow(path: impl Into<String>, message: impl Into<String>) -> Self {
        AssemblyError::DataFlow {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by the bound-aware Newton solver.
#[derive(Error, Debug)]
pub enum SolverError {
    /// The flattened problem is not square.
    #[error("non-square system: {residuals} residuals vs {variables} variables")]
    NonSquareSystem { residuals: usize, variables: usize },

    /// The residual Jacobian is singular; `suspects` names the variables
    /// with the largest components of a near-null right singular vector.
    #[error("singular Jacobian; likely offending variables: {suspects:?}")]
    SingularJacobian { suspects: Vec<String> },

    /// Iteration budget exhausted or the step factor underflowed.
    #[error("iterative process failed: {0}")]
    IterativeProcessFailed(String),

    /// The user callback returned `false`; the report preserves the
    /// partial state.
    #[error("iterative process interrupted by user callback at iteration {iteration}")]
    IterativeProcessInterrupted { iteration: usize },

    /// NaN or Inf detected in residuals or Jacobian.
    #[error("numeric break: non-finite value in {location}")]
    NumericBreak { location: String },

    /// Failure in the pluggable sparse linear backend.
    #[error("linear solver backend failed: {0}")]
    Backend(String),

    /// Problems detected while preparing the solve.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}
