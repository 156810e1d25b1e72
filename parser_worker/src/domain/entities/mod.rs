pub mod object_location;
pub mod object_notification;
pub mod turn_record;
