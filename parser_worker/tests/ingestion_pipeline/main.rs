mod handler_object_created;
mod ingest_conversation_file;
