pub mod ids;
pub mod record;
pub mod priority;
pub mod events;

pub use ids::{JobId, EngineId};
pub use record::{exitcode, JobRecord, JobStatus};
pub use priority::JobPriority;
pub use events::JobEvent;
