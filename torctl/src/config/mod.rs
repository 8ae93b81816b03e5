//! Typed configuration mirror.

mod hidden_service;
mod list;
mod torconfig;
mod types;

pub use hidden_service::HiddenService;
pub use list::ChangeTrackingList;
pub use torconfig::{ConfigValue, HiddenServiceListHandle, ListHandle, TorConfig};
pub use types::{ConfigInput, OptionKind, Scalar, ScalarInput};
