pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod global_snapshot;

pub use config::{EngineConfig, FlushMode};
pub use engine::{Content, EngineState, SyncEngine};
pub use error::{ConfigError, EngineError, FrameError};
pub use frame::{FrameClock, FrameRequest, FrameTime, WithFrame};
pub use global_snapshot::GlobalSnapshotManager;
