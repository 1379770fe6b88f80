pub mod notification_cleanup;
pub mod notification_fanout;
