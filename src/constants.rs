//! Physical constants as quantities.

use crate::quantity::Quantity;

/// Molar gas constant in J/(mol K).
///
/// The truncated value is kept deliberately so that reference scenarios
/// replay bit-identically.
pub const GAS_CONSTANT_SI: f64 = 8.31446;

/// The molar gas constant `R` as a quantity.
pub fn r_gas() -> Quantity {
    Quantity::new(GAS_CONSTANT_SI, "J/(mol*K)").expect("gas constant unit literal")
}

/// Avogadro constant in 1/mol.
pub fn n_avogadro() -> Quantity {
    Quantity::new(6.02214076e23, "1/mol").expect("Avogadro unit literal")
}

/// Boltzmann constant in J/K.
pub fn k_boltzmann() -> Quantity {
    Quantity::new(1.380649e-23, "J/K").expect("Boltzmann unit literal")
}

/// Standard acceleration of gravity in m/s**2.
pub fn std_gravity() -> Quantity {
    Quantity::new(9.80665, "m/s**2").expect("gravity unit literal")
}
