pub mod ingest_conversation_file;
