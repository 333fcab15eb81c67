// Common types shared across kernel and server layers.

pub mod id;

pub use id::{AgentJobId, Id, JobId, QueueItemId, TenantId};
