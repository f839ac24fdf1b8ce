//! The standard contribution catalog.
//!
//! Contributions are registered by class name in a [`ThermoFactory`]; the
//! names are what frame structure files refer to.

pub mod augmenters;
pub mod basic;
pub mod cubic;
pub mod iapws;

pub use augmenters::{Elemental, GenericProperties};
pub use basic::{
    ConstantGibbsVolume, GibbsIdealGas, H0S0ReferenceState, HelmholtzIdealGas, IdealMix,
    LinearHeatCapacity, StandardState,
};
pub use cubic::{
    BostonMathiasAlphaFunction, CriticalParameters, CubicPhase, LinearMixingRule,
    NonSymmetricMixingRule, RedlichKwongAFunction, RedlichKwongBFunction, RedlichKwongEOS,
    RedlichKwongMFactor, VolumeShift,
};
pub use iapws::{IdealGasIAPWS, ReducedStateIAPWS, ResidualIAPWS};

use crate::error::AssemblyError;
use crate::thermo::frame::ThermoFactory;
use crate::thermo::state::{GibbsState, HelmholtzState};

/// Register the standard states and the full contribution catalog.
pub fn register_standard(factory: &mut ThermoFactory) -> Result<(), AssemblyError> {
    factory.register_state("GibbsState", Box::new(|| Box::new(GibbsState)))?;
    factory.register_state("HelmholtzState", Box::new(|| Box::new(HelmholtzState)))?;

    factory.register_contribution("H0S0ReferenceState", Box::new(H0S0ReferenceState::new))?;
    factory.register_contribution("LinearHeatCapacity", Box::new(LinearHeatCapacity::new))?;
    factory.register_contribution("StandardState", Box::new(StandardState::new))?;
    factory.register_contribution("IdealMix", Box::new(IdealMix::new))?;
    factory.register_contribution("GibbsIdealGas", Box::new(GibbsIdealGas::new))?;
    factory.register_contribution("HelmholtzIdealGas", Box::new(HelmholtzIdealGas::new))?;
    factory.register_contribution("ConstantGibbsVolume", Box::new(ConstantGibbsVolume::new))?;

    factory.register_contribution("CriticalParameters", Box::new(CriticalParameters::new))?;
    factory.register_contribution("RedlichKwongMFactor", Box::new(RedlichKwongMFactor::new))?;
    factory.register_contribution(
        "BostonMathiasAlphaFunction",
        Box::new(BostonMathiasAlphaFunction::new),
    )?;
    factory.register_contribution("RedlichKwongAFunction", Box::new(RedlichKwongAFunction::new))?;
    factory.register_contribution("RedlichKwongBFunction", Box::new(RedlichKwongBFunction::new))?;
    factory.register_contribution("LinearMixingRule", Box::new(LinearMixingRule::new))?;
    factory.register_contribution("NonSymmetricMixingRule", Box::new(NonSymmetricMixingRule::new))?;
    // historical alias, kept for existing structure files
    factory.register_contribution(
        "NonSymmmetricMixingRule",
        Box::new(NonSymmetricMixingRule::new),
    )?;
    factory.register_contribution("VolumeShift", Box::new(VolumeShift::new))?;
    factory.register_contribution("RedlichKwongEOSGas", Box::new(RedlichKwongEOS::gas))?;
    factory.register_contribution("RedlichKwongEOSLiquid", Box::new(RedlichKwongEOS::liquid))?;

    factory.register_contribution("ReducedStateIAPWS", Box::new(ReducedStateIAPWS::new))?;
    factory.register_contribution("IdealGasIAPWS", Box::new(IdealGasIAPWS::new))?;
    factory.register_contribution("Residual1IAPWS", Box::new(ResidualIAPWS::group_1))?;
    factory.register_contribution("Residual2IAPWS", Box::new(ResidualIAPWS::group_2))?;
    factory.register_contribution("Residual3IAPWS", Box::new(ResidualIAPWS::group_3))?;
    factory.register_contribution("Residual4IAPWS", Box::new(ResidualIAPWS::group_4))?;

    factory.register_contribution("GenericProperties", Box::new(GenericProperties::new))?;
    factory.register_contribution("Elemental", Box::new(Elemental::new))?;
    Ok(())
}
