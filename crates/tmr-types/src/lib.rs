//! Foundation types for the tree mirror (TMR).
//!
//! Every other TMR crate depends on `tmr-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- Opaque 8-byte identifier assigned by the object store
//! - [`TxnId`] -- Fixed-width, totally ordered transaction identifier

pub mod error;
pub mod object;
pub mod txn;

pub use error::TypeError;
pub use object::ObjectId;
pub use txn::TxnId;
