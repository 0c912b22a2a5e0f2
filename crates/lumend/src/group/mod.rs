mod dispatch;
#[allow(clippy::module_inception)]
mod group;
mod manager;
mod merge;

pub use dispatch::DispatchError;
pub use group::GroupHandle;
pub use group::LightGroup;
pub use manager::GroupDescriptor;
pub use manager::GroupManager;
pub use merge::merge_composite;
pub use merge::GROUP_SUPPORTED_FEATURES;
