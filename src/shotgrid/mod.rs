pub mod api_client;
pub mod entity_manager;
#[cfg(test)]
pub(crate) mod fake;
pub mod models;
pub mod uploader;

pub use api_client::ShotgridClient;
