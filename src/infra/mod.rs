pub mod db;
pub mod relay;
pub mod store;
