pub mod utf8_chunk_decoder;
