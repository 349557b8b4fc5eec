//! Layout planner: device topology to block size, resource group sizing,
//! filesystem creation, and growth.

pub mod constants;
pub mod create;
pub mod grow;
pub mod options;
pub mod plan;

pub use create::{create_filesystem, CreateSummary};
pub use grow::{grow_filesystem, GrowSummary};
pub use options::LayoutOptions;
pub use plan::Topology;
