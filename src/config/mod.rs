//! Configuration: the calculation manifest and execution options.

mod execution;
mod manifest;

pub use execution::{
    default_workers, ExecutionOptions, ExecutionSection, ENV_CHECKPOINT_INTERVAL,
    ENV_REORDER_WINDOW, ENV_SOURCE_PRIORITY, ENV_WORKERS,
};
pub use manifest::{CalculationSpec, Manifest};
