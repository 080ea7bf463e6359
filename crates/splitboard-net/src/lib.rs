#![forbid(unsafe_code)]

//! Net: the concurrent TCP server that feeds the panel.
//!
//! One network thread owns every socket. Clients connect over TCP and
//! speak CR-terminated lines; one client at a time is "active" and its
//! displayable messages flow to the render thread through the active
//! outbox, while standby clients keep their most recent message parked
//! for a clean hand-back.

mod addr;
mod descriptor;
mod receiver;

pub use addr::local_addresses;
pub use receiver::{ClientSummary, Receiver, ReceiverConfig, TCP_PORT_DEFAULT};
