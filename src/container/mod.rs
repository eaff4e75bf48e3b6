//! Container entity and provisioning service

pub mod container;
pub mod directory;
pub mod handle;
pub mod properties;
pub mod service;
pub mod user;

pub use container::{Container, ContainerInfo, ContainerState};
pub use directory::{BindMount, ContainerDirectory};
pub use handle::{generate_handle, generate_id};
pub use properties::PropertyService;
pub use service::{ContainerService, ContainerSpec};
pub use user::ContainerUser;
