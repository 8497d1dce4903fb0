pub mod bootstrap;
pub mod lifecycle;
pub mod registry;

pub use bootstrap::{ApplicationBootstrap, RunningService, bind_listener, startup};
pub use lifecycle::{Lifecycle, LifecycleState};
