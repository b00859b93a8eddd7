pub mod bulk_import;
pub mod command_log;
pub mod config;
pub mod error;
pub mod event_store;
pub mod feed_client;
pub mod ics_decoder;
pub mod settings_store;
pub mod source_resolver;
pub mod storage;
