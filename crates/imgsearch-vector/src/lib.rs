//! imgsearch-vector
//!
//! Vector storage: the LanceDB and in-memory engines, and the router that
//! gives every model its own namespace.

pub mod lance_engine;
pub mod memory;
pub mod router;
pub mod schema;
pub mod table;

pub use lance_engine::LanceEngine;
pub use memory::MemoryEngine;
pub use router::IndexRouter;
