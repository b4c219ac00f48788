//! The file manager: per-connection bookkeeping of published files, byte
//! stream reassembly, and outgoing message queuing (§4.3, §4.7).

pub mod receiver;
pub mod shared;
pub mod worker;

pub use receiver::{Parsed, Receiver};
pub use shared::Shared;
pub use worker::{TransmitHandler, Worker};
