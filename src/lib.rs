pub mod calls;
pub mod config;

pub use calls::{
    CallCoordinator, CallError, CallEvent, CallSession, CallSnapshot, CallStatus,
};
pub use config::CallConfig;
