pub mod plugin;
pub mod plugin_version;
pub mod purchase;
pub mod review;
pub mod user;
