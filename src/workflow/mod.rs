pub mod manifest;
pub mod pipeline;
