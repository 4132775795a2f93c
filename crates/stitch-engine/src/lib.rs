//! Edge-walking execution engine (C4), node handlers (C5), and the
//! out-of-band callback protocol (C6).

mod dispatch;
mod error;
mod merge;
mod walker;

pub use dispatch::{DispatchOutcome, HttpWorkerDispatcher, WorkerDispatchRequest, WorkerDispatcher};
pub use error::EngineError;
pub use merge::{merge_callback_output, merge_objects};
pub use walker::{CallbackStatus, Engine};
