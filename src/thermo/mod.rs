//! Thermodynamic frame assembly: contributions, states, frames, materials
//! and parameter stores.

pub mod contribution;
pub mod contributions;
pub mod frame;
pub mod material;
pub mod state;
pub mod store;

pub use contribution::{
    BoundSet, ContributionSetup, NumericProps, ParameterDictionary, PropertyMap,
    ThermoContribution,
};
pub use frame::{ContributionEntry, FrameConfig, ThermoFactory, ThermoFrame};
pub use material::{Material, MaterialDefinition, MaterialKind, MaterialSpec};
pub use state::{GibbsState, HelmholtzState, InitialState, StateDefinition};
pub use store::{NestedThermoSource, StringThermoSource, ThermoParameterStore, ThermoSource};
