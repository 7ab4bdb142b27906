pub mod media;
pub mod plugins;
pub mod purchases;
pub mod users;
