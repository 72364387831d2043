pub mod payload;
pub mod session;
pub mod summary;
pub mod trial;

pub use payload::{CompletionPayload, PayloadMetadata};
pub use session::{Session, SessionInfo, SessionState, TaskConfig};
pub use summary::SummaryMetrics;
pub use trial::{ResultSet, TrialRecord, TrialResponse};
