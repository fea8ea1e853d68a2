// ABOUTME: Core library for userd: the user record model, collaborator contracts, and the consistency pipeline.
// ABOUTME: Store, Cache, and Notifier are traits; RecordPipeline sequences them for each operation.

pub mod cache;
pub mod event;
pub mod invalidation;
pub mod model;
pub mod notifier;
pub mod pipeline;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{Cache, CacheError, MemoryCache};
pub use event::{DEFAULT_TOPIC, EventKind, UserEvent};
pub use invalidation::InvalidationTracker;
pub use model::{NewUser, Record, UserPatch};
pub use notifier::{BroadcastNotifier, FanoutNotifier, Notifier, NotifyError, TopicEvent};
pub use pipeline::{PipelineError, RecordPipeline};
pub use store::{MemoryStore, Store, StoreError};
