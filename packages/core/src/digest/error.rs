//! Arithmetic guard conditions inside the calculator

use thiserror::Error;

/// Conditions under which a metric can't be computed.
///
/// Never leaves the calculator: every guard is turned into
/// [`Metric::Unavailable`](crate::digest::Metric::Unavailable) before a
/// value is returned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculationGuard {
    #[error("series too short for {operation}")]
    MissingHistory { operation: &'static str },

    #[error("division by zero in {operation}")]
    DivisionByZero { operation: &'static str },

    #[error("non-finite result in {operation}")]
    NonFinite { operation: &'static str },

    #[error("numerical overflow in {operation}")]
    Overflow { operation: &'static str },

    #[error("no snapshot matches {operation}")]
    NoOccurrence { operation: &'static str },
}
