pub mod metrics;
pub mod plan;
pub mod record;
pub mod session;

pub use metrics::{HealthStatus, ModelShare, RealtimeMetrics};
pub use plan::{Plan, PlanType, ResetCycle};
pub use record::{
    FileChange, FileEvent, FileEventKind, FileState, Priority, ProcessedRecord, UsageRecord,
};
pub use session::{round_to_hour, BoundarySource, ModelStats, SessionBlock, SessionBoundary, TokenCounts};
