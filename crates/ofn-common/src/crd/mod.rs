//! Custom Resource Definitions for ofn

mod function;
mod types;

pub use function::{
    Function, FunctionCode, FunctionDescriptor, FunctionPhase, FunctionSpec, FunctionStatus,
    ReconcileStage, SourceRef, DEFAULT_RUNTIME,
};
pub use types::{Condition, ConditionStatus};
