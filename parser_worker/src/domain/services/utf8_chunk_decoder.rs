/// Decodes a byte stream read in arbitrary chunks into UTF-8 text chunks
///
/// A multi-byte character split between two reads is carried over to the next call.
/// Invalid sequences are replaced by U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the text decodable so far, keeping an incomplete trailing character for later
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut pending = std::mem::take(&mut self.pending);
        pending.extend_from_slice(bytes);

        let mut text = String::with_capacity(pending.len());
        let mut input: &[u8] = &pending;

        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    text.push_str(valid);
                    input = &[];
                    break;
                }
                Err(error) => {
                    let valid_up_to = error.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&input[..valid_up_to]));

                    match error.error_len() {
                        Some(invalid_len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            input = &input[valid_up_to + invalid_len..];
                        }
                        // Incomplete character at the end of the input
                        None => {
                            input = &input[valid_up_to..];
                            break;
                        }
                    }
                }
            }
        }

        self.pending = input.to_vec();
        text
    }

    /// Flushes what is left once the stream is over
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}
