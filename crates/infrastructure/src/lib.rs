pub mod data_mover;
pub mod database;
pub mod memory;
pub mod observability;

pub use data_mover::SharedFilesystemDataMover;
pub use database::*;
pub use memory::*;
pub use observability::*;
