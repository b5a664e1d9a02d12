pub mod api_client;
pub mod bot;
pub mod config;
pub mod context;
pub mod currency;
pub mod error;
pub mod forwarder;
pub mod handlers;
pub mod import;
pub mod menu;
pub mod notifications;
pub mod pager;
pub mod query;
pub mod scheduler;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod utils;
pub mod wizard;
