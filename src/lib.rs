#![cfg_attr(not(doctest), doc = include_str!("../README.md"))]

pub mod constants;
pub mod error;
pub mod graph;
pub mod model;
pub mod qfunction;
pub mod quantity;
pub mod solver;
pub mod species;
pub mod structures;
pub mod thermo;
pub mod units;

// Re-export the working vocabulary at the crate root.
pub use constants::r_gas;
pub use error::{AssemblyError, QuantityError, SolverError};
pub use model::numeric::{Arguments, NumericHandler};
pub use model::{
    build, ChildView, ChildWiring, Interface, MaterialHandle, ModelContext, ModelInstance,
    ModelTree, ProcessModel, Residual,
};
pub use qfunction::QFunction;
pub use quantity::{
    conditional, jacobian, qexp, qlog, qpow, qsqrt, qsum, qvertcat, QResult, Quantity,
};
pub use solver::{
    DenseLuBackend, IterationRecord, LinearSolverBackend, SimulationSolver, SolverOptions,
    SolverReport, Termination,
};
pub use species::{FormulaParser, SpeciesDefinition};
pub use structures::{parse_quantities_in_struct, MCounter, Nested, NestedQuantity, QuantityDict};
pub use thermo::{
    ContributionEntry, FrameConfig, InitialState, Material, MaterialDefinition, MaterialKind,
    MaterialSpec, ThermoContribution, ThermoFactory, ThermoFrame, ThermoParameterStore,
};
pub use units::{parse_unit, unit_registry, Dimension, Unit, UnitRegistry};
