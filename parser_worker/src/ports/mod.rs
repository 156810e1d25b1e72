pub mod notification_queue;
pub mod object_source;
pub mod record_store;
