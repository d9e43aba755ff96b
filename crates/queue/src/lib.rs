//! Background job processing for tubewatch.
//!
//! This crate claims queued work from the job store and runs it against the
//! upstream content API:
//!
//! - **Jobs**: Job types, payloads and store-facing records
//! - **Store**: Job and content store contracts, with RPC and in-memory backends
//! - **Feed**: Polling state machine for channel feeds
//! - **Handlers**: One handler per job type behind a uniform outcome
//! - **Dispatch**: Claim, run and acknowledge a bounded batch of jobs
//! - **Retry**: Requeue delays for failed jobs
//! - **Scheduler**: Periodic enqueueing of refresh and poll jobs

pub mod dispatch;
pub mod feed;
pub mod handlers;
pub mod jobs;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use dispatch::{
    DispatchError, DispatchReport, DispatchRequest, Dispatcher, JobExecution,
    MAX_JOBS_PER_INVOCATION,
};
pub use feed::{FeedState, FeedStatus};
pub use handlers::{HandlerContext, HandlerError, HandlerOutcome, HandlerRegistry, JobRunner};
pub use jobs::*;
pub use retry::JobRetryConfig;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::{
    ChannelRecord, ChannelStatsSnapshot, ContentStore, FailPoint, JobRecord, JobStore, MemoryStore,
    RpcStore, RpcStoreConfig, StoreError, StoreResult, VideoRecord, VideoStatsSnapshot,
};
