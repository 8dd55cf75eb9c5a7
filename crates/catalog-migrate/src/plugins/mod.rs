//! Bundled domain migrators.

pub mod docker;
pub mod iso;

pub use docker::DockerMigrator;
pub use iso::IsoMigrator;
