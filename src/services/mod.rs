pub mod model;
pub mod naming;
pub mod registry;

pub use model::{Instance, InstanceInfo, InstanceStatus, StatusFilter};
pub use registry::{Registry, RegistryConfig, RegistryError, StaticScheduler};
