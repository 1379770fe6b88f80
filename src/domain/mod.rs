pub mod engagement;
pub mod error;
pub mod event;
pub mod notification;
pub mod post;
pub mod social_graph;
pub mod user;
