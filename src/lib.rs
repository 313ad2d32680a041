//! hiring-notify: notification core for a hiring pipeline.
//!
//! Creates admin notifications for new applications and applicant
//! notifications for status changes, tracks read state, and fans changes out
//! to live subscribers per recipient scope.

pub mod config;
pub mod directory;
pub mod errors;
pub mod live;
pub mod models;
pub mod notification;
pub mod store;
