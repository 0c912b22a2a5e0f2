pub mod api;
pub mod bus;
pub mod config;
pub mod group;
pub mod light;
pub mod store;
pub mod virtual_light;

pub use bus::CommandBus;
pub use bus::ServiceBus;
pub use bus::ServiceData;
pub use bus::ServiceHandler;
pub use config::Config;
pub use config::Diagnostic;
pub use config::LogLevel;
pub use config::format_diagnostics;
pub use group::GroupDescriptor;
pub use group::GroupHandle;
pub use group::GroupManager;
pub use group::LightGroup;
pub use light::EntityState;
pub use light::LightAttributes;
pub use light::PowerState;
pub use light::ServiceKind;
pub use store::StateStore;
pub use virtual_light::VirtualLight;
