//! Version control over tracked tables.
//!
//! The interceptor turns table writes into snapshot changes, checkout turns
//! snapshots back into tables, and diff and merge work on snapshots alone.

mod checkout;
mod diff;
mod interceptor;
mod merge;
mod state;

pub use checkout::{materialize, patch, CheckoutMode, MaterializeStats};
pub use diff::{diff_snapshots, resolve, touched_tables, DiffAction, DiffEntry, ResolvedEntry};
pub use merge::{MergeConflict, MergeOutcome};

pub(crate) use interceptor::WriteInterceptor;
pub(crate) use merge::{plan as plan_merge, MergePlan};
pub(crate) use state::{Shared, VcState};
