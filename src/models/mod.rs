pub mod directory;
pub mod notification;
