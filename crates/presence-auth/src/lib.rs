pub mod binding;
pub mod gate;
pub mod guard;
pub mod issuer;
pub mod keys;
pub mod replay;
pub mod service;

pub use binding::{establish_binding, DeviceBindingValidator};
pub use gate::{guard, require_presence};
pub use guard::ReplayGuard;
pub use issuer::{verify_token, AuthorizationIssuer};
pub use keys::KeyError;
pub use replay::{FileReplayStore, InMemoryReplayStore, ReplayStore, StoreError};
pub use service::PresenceService;
