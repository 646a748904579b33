//! Domain entities read and written by the engine
//!
//! Connectors, processes, tasks and rules are configured from the outside
//! and only read here. Requests and their history records are the shared
//! mutable state the schedulers coordinate on.

mod connector;
mod process;
mod request;

pub use connector::Connector;
pub use process::{Process, Rule, Task};
pub use request::{HistoryRecord, HistoryStatus, OrderRecord, Request, RequestStatus};
