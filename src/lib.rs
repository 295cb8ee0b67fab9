pub mod aggregate;
pub mod config;
pub mod grid_api;
pub mod http_client;
pub mod ingest;
pub mod replay;
pub mod static_data;
pub mod store;
pub mod summary;
