//! The job queue: scheduled work claimed and executed with retry and
//! quiet-hours policy, dispatching into the communication queue.

pub mod handlers;
pub mod job;
pub mod processor;

pub use handlers::{CommunicationType, HandlerContext, NotifyOutcome, ProcessQueueItemError};
pub use job::{Job, JobStatus, NewJob};
pub use processor::{dispatch, handle_failure, run as run_processor, ProcessorConfig};
