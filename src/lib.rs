pub mod bench;
pub mod error;
pub mod ingest;
pub mod net;
pub mod queue;
pub mod shutdown;

pub use error::{Error, Result};
