pub mod metadata;
pub mod naming;
pub mod scanner;
pub mod sequence;
pub mod task_assigner;
