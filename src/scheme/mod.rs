//! Payment scheme implementations.
//!
//! Only the `exact` scheme exists: the payload must authorize at least the
//! required amount on the required network. One module per chain family.

pub mod exact_evm;
pub mod exact_svm;
