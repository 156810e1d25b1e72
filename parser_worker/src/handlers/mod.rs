pub mod handler_object_created;
