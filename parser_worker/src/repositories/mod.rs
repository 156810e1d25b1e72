pub mod notification_rabbitmq_repository;
pub mod source_file_s3_repository;
pub mod turn_record_postgres_repository;
