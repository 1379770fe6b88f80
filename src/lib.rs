pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;
pub mod jobs;

use std::sync::Arc;

use crate::app::auth::TokenService;
use crate::app::channels::ChannelHub;
use crate::app::events::EventSink;
use crate::infra::relay::RedisRelay;
use crate::infra::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub events: Arc<dyn EventSink>,
    pub hub: ChannelHub,
    pub relay: Option<RedisRelay>,
    pub tokens: TokenService,
    pub comment_max_depth: i32,
}
