use thiserror::Error;

/// Errors raised by a physics kernel invocation (spec §7 "Numerical domain
/// failure"). Always fatal to the step that raised them (spec §4.3
/// "Cancellation and fatal errors").
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PhysicsError {
    #[error("numerical domain failure in {kernel}: {detail}")]
    NumericalDomain { kernel: &'static str, detail: String },
    #[error("kernel {0} received a cell pair with mismatched particle counts")]
    MismatchedCells(&'static str),
}
