//! Branches and sessions.

mod directory;
mod types;

pub use directory::{Branch, BranchDirectory, BranchInfo};
pub use types::{BranchName, Session, SessionId, UserRef};
