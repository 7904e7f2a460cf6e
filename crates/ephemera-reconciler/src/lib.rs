pub mod error;
pub mod reconcile;
pub mod report;

pub use error::ReconcileError;
pub use reconcile::{Reconciler, ReconcilerConfig};
pub use report::{Change, ReconcileReport};
