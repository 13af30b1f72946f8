//! tablegit - version control for relational tables
//!
//! Rows of tracked tables are hashed by content and kept once in a
//! git-backed row store. A commit is the set of row digests each table held,
//! so branching, diffing and merging are set operations over digests. Each
//! branch works on its own namespace of tables; writes are intercepted and
//! folded into the branch's open commit as they happen.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use tablegit::catalog::{DataType, SchemaBuilder};
//! use tablegit::db::Engine;
//! use tablegit::history::CommitRequest;
//!
//! let engine = Engine::in_memory().unwrap();
//! let schema = SchemaBuilder::new("people")
//!     .add_required_column("name", DataType::Text)
//!     .build()
//!     .unwrap();
//! engine.track(schema).unwrap();
//!
//! let session = engine.open_session("yumin@example.com");
//! let row = [("name".to_string(), json!("Yumin"))].into_iter().collect();
//! engine.insert(&session, "people", row).unwrap();
//! let commit = engine.commit(&session, CommitRequest::new("Add Yumin")).unwrap();
//! println!("{}", commit);
//! ```

pub mod catalog;
pub mod db;
pub mod error;
pub mod history;
pub mod refs;
pub mod storage;
pub mod tables;
pub mod vc;

pub use db::{Engine, EngineConfig};
pub use error::{VcError, VcResult};
