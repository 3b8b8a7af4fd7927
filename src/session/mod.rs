mod controller;
mod hooks;
mod poll;

pub use controller::{SessionController, SessionError, SessionOptions, SignInError};
pub use hooks::ForceLogout;
pub use poll::{poll_once, spawn_identity_poll, PollOutcome};
