//! Handler registry (C2): trait interfaces plus the static registry that
//! holds one instance of each handler by its config `handler_name`.

pub mod registry;
pub mod traits;

pub use registry::{Registry, RegistryError};
pub use traits::{NotificationHandler, OutputHandler, ScanHandler};
