//! Wire model of the control-channel protocol spoken with the remote engine.

pub mod client_events;
pub mod models;
pub mod server_events;
