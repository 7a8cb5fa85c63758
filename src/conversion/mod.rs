//! Single-flight conversion facade over the transcode engine

mod coordinator;

pub use coordinator::{
    ConversionCoordinator, CoordinatorConfig, CoordinatorState, ProgressCallback, DEFAULT_CANCEL_ACK_TIMEOUT,
};
