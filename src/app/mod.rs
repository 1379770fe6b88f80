pub mod auth;
pub mod channels;
pub mod comments;
pub mod events;
pub mod follows;
pub mod likes;
pub mod notifications;
pub mod posts;
