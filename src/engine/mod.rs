//! Batch engine: per-batch context, worker pool, and the controller that
//! admits one batch at a time. One-off generations live in [`direct`].

pub mod context;
pub mod control;
pub mod direct;
pub mod pool;
pub mod worker;

pub use context::{BatchContext, BatchStatus, BatchSummary};
pub use control::{BatchController, BatchRequest, BatchTicket};
pub use direct::{DirectGenerator, DirectRequest};
pub use pool::WorkerPool;
pub use worker::{ItemOutcome, Worker, WorkerReport, WorkerState};
