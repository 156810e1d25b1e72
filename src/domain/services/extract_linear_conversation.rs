use log::debug;

/// Key preceding the conversation nodes in an exported conversation page
pub const LINEAR_CONVERSATION_MARKER: &str = "linear_conversation";

/// Sibling key following the conversation nodes.
/// Anything captured from this key onward is trimmed.
pub const AFTER_CONTENT_KEY: &str = ",\"has_user_editable_context\":";

/// Streaming extractor of the JSON value following a marker
///
/// Characters are consumed one at a time, so the source can be fed in chunks of any size:
/// neither the marker, a bracket nor the truncation token needs to be aligned with a chunk boundary.
///
/// Once the marker has been fully matched, every `[` or `{` increments the depth and every `]` or `}`
/// decrements it. Capture starts on the first opening bracket and stops the first time the depth
/// gets back to zero or below. Only brackets are counted, strings included:
/// the captured content might not be valid JSON.
#[derive(Debug, Clone)]
pub struct LinearConversationExtractor {
    marker: Vec<char>,
    truncation_token: String,

    match_cursor: usize,
    armed: bool,
    // Closing brackets seen after arming but before the capture can make it negative
    depth: i64,
    capturing: bool,
    finished: bool,

    buffer: String,
}

impl Default for LinearConversationExtractor {
    fn default() -> Self {
        Self::with_markers(LINEAR_CONVERSATION_MARKER, AFTER_CONTENT_KEY)
    }
}

impl LinearConversationExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an extractor looking for another marker / truncation token than the export format ones
    ///
    /// # Arguments
    /// * `marker` - literal arming the extractor once fully matched. An empty marker arms it right away.
    /// * `truncation_token` - literal from which the captured content is trimmed. Ignored if empty.
    pub fn with_markers(marker: &str, truncation_token: &str) -> Self {
        Self {
            marker: marker.chars().collect(),
            truncation_token: truncation_token.to_string(),
            match_cursor: 0,
            armed: marker.is_empty(),
            depth: 0,
            capturing: false,
            finished: false,
            buffer: String::new(),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing && !self.finished
    }

    /// True once the captured value is balanced. Any further input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Transition of the state machine on one character
    pub fn consume_char(&mut self, current_char: char) {
        if self.finished {
            return;
        }

        if !self.armed {
            self.advance_marker(current_char);
            return;
        }

        match current_char {
            '[' | '{' => {
                if !self.capturing {
                    debug!("Start capturing on {:?} at depth {}", current_char, self.depth);
                    self.capturing = true;
                }
                self.depth += 1;
            }
            ']' | '}' => self.depth -= 1,
            _ => (),
        }

        if self.capturing {
            self.buffer.push(current_char);

            if self.depth <= 0 {
                debug!("Captured value balanced after {} chars", self.buffer.len());
                self.finished = true;
            }
        }
    }

    /// Consumes a chunk of text
    ///
    /// # Returns
    /// `true` if the value has been fully captured, the remaining input can then be skipped
    pub fn feed(&mut self, chunk: &str) -> bool {
        for current_char in chunk.chars() {
            if self.finished {
                break;
            }
            self.consume_char(current_char);
        }

        self.finished
    }

    /// Ends the extraction
    ///
    /// # Returns
    /// The captured content, cut before the first occurrence of the truncation token.
    /// Empty if the marker was never matched or if no bracket followed it.
    pub fn finish(self) -> String {
        let mut content = self.buffer;

        if !self.truncation_token.is_empty() {
            if let Some(index) = content.find(&self.truncation_token) {
                debug!("Trimming captured content at {}", index);
                content.truncate(index);
            }
        }

        content
    }

    fn advance_marker(&mut self, current_char: char) {
        if self.marker[self.match_cursor] == current_char {
            self.match_cursor += 1;
        } else {
            self.match_cursor = 0;
        }

        if self.match_cursor == self.marker.len() {
            debug!("Marker matched");
            self.armed = true;
        }
    }
}

/// Extracts the linear conversation value from a sequence of text chunks
///
/// Stops reading chunks as soon as the value is balanced.
pub fn extract_linear_conversation<Chunks, Chunk>(chunks: Chunks) -> String
where
    Chunks: IntoIterator<Item = Chunk>,
    Chunk: AsRef<str>,
{
    let mut extractor = LinearConversationExtractor::new();

    for chunk in chunks {
        if extractor.feed(chunk.as_ref()) {
            break;
        }
    }

    extractor.finish()
}

#[cfg(test)]
use demonstrate::demonstrate;

#[cfg(test)]
const EXPORT_PAGE: &str = concat!(
    "<html><head><script>window.__x = {\"props\":{\"linear_conversation\":",
    "[{\"id\":\"a\",\"message\":{\"content\":{\"parts\":[\"Hello world\"]}}},",
    "{\"id\":\"b\",\"children\":[]}]",
    ",\"has_user_editable_context\":false}};</script></head>",
    "<body>[not captured]</body></html>"
);

#[cfg(test)]
const EXPECTED_VALUE: &str = concat!(
    "[{\"id\":\"a\",\"message\":{\"content\":{\"parts\":[\"Hello world\"]}}},",
    "{\"id\":\"b\",\"children\":[]}]"
);

#[cfg(test)]
/// Splits a text in chunks whose char lengths cycle through `sizes`
fn chunk_by_sizes(text: &str, sizes: &[usize]) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = vec![];
    let mut start = 0;
    let mut size_index = 0;

    while start < chars.len() {
        let end = (start + sizes[size_index % sizes.len()]).min(chars.len());
        chunks.push(chars[start..end].iter().collect::<String>());
        start = end;
        size_index += 1;
    }

    chunks
}

#[cfg(test)]
demonstrate! {
    describe "extract_linear_conversation" {
        use super::*;

        describe "When the marker is present" {
            it "should return exactly the value following the marker" {
                let content = concat!(
                    "prefix \"linear_conversation\":",
                    "[{\"a\":1},{\"b\":2}]",
                    ",\"has_user_editable_context\":true}"
                );

                assert_eq!(extract_linear_conversation([content]), "[{\"a\":1},{\"b\":2}]");
            }

            it "should capture an object value" {
                let content = "linear_conversation = {\"a\":[1,2]} trailing";

                assert_eq!(extract_linear_conversation([content]), "{\"a\":[1,2]}");
            }

            it "should capture the value embedded in an export page" {
                assert_eq!(extract_linear_conversation([EXPORT_PAGE]), EXPECTED_VALUE);
            }

            it "should count brackets inside strings as any other bracket" {
                let content = r#"linear_conversation:["a]b",1] after"#;

                assert_eq!(extract_linear_conversation([content]), r#"["a]"#);
            }

            it "should count closing brackets between the marker and the value" {
                let content = "linear_conversation\"}]: [1,[2]]";

                assert_eq!(extract_linear_conversation([content]), "[");
            }

            it "should restart the marker from its start after a mismatch" {
                let content = "linea linear_conversation:[2]";

                assert_eq!(extract_linear_conversation([content]), "[2]");
            }

            it "should keep multi-byte characters" {
                let content = "linear_conversation:[\"héllo 🦀\",\"日本\"]";

                assert_eq!(extract_linear_conversation([content]), "[\"héllo 🦀\",\"日本\"]");
            }

            it "should trim the content from the truncation token" {
                let mut extractor = LinearConversationExtractor::with_markers("key", ",STOP");
                extractor.feed("key:[1,STOP,2]");

                assert!(extractor.is_finished());
                assert_eq!(extractor.finish(), "[1");
            }

            it "should return the partial capture when the stream ends before balancing" {
                let content = "linear_conversation:[{\"a\":[1,2]";

                assert_eq!(extract_linear_conversation([content]), "[{\"a\":[1,2]");
            }
        }

        describe "When the marker is missing" {
            it "should return an empty content" {
                let content = "<html><body>[{\"a\":1}]</body></html>";

                assert_eq!(extract_linear_conversation([content]), "");
            }

            it "should return an empty content on an empty input" {
                assert_eq!(extract_linear_conversation(Vec::<String>::new()), "");
            }

            it "should not match a marker preceded by a repeated first char" {
                let content = "llinear_conversation:[1] linearlinear_conversation:[2]";

                assert_eq!(extract_linear_conversation([content]), "");
            }

            it "should return an empty content when no bracket follows the marker" {
                let content = "linear_conversation is not here";
                let mut extractor = LinearConversationExtractor::new();
                extractor.feed(content);

                assert!(extractor.is_armed());
                assert!(!extractor.is_capturing());
                assert_eq!(extractor.finish(), "");
            }
        }

        describe "When the same content is chunked differently" {
            it "should give the same result one char at a time" {
                let chunks = chunk_by_sizes(EXPORT_PAGE, &[1]);

                assert_eq!(extract_linear_conversation(chunks), EXPECTED_VALUE);
            }

            it "should give the same result for every split in 2 chunks" {
                let nb_chars = EXPORT_PAGE.chars().count();

                for split in 0..=nb_chars {
                    let chunks = chunk_by_sizes(EXPORT_PAGE, &[split.max(1), nb_chars]);
                    assert_eq!(
                        extract_linear_conversation(chunks),
                        EXPECTED_VALUE,
                        "split at {}",
                        split
                    );
                }
            }

            it "should give the same result for irregular chunk sizes" {
                for sizes in [&[3, 7, 1, 12][..], &[5, 2], &[64], &[11, 1, 1, 29, 4]] {
                    let chunks = chunk_by_sizes(EXPORT_PAGE, sizes);
                    assert_eq!(extract_linear_conversation(chunks), EXPECTED_VALUE);
                }
            }

            it "should give the same result with the truncation token split across chunks" {
                let content = concat!(
                    "linear_conversation:[{\"a\":1}",
                    ",\"has_user_editable_context\":",
                    "true}]"
                );
                let expected = "[{\"a\":1}";

                for size in 1..=content.len() {
                    let chunks = chunk_by_sizes(content, &[size]);
                    assert_eq!(extract_linear_conversation(chunks), expected);
                }
            }
        }

        describe "When the value is complete" {
            it "should report it as finished and ignore the remaining input" {
                let mut extractor = LinearConversationExtractor::new();

                assert!(!extractor.feed("linear_conver"));
                assert!(!extractor.feed("sation\":[[1],"));
                assert!(extractor.feed("[2]]  {\"other\":[3]}"));
                assert!(extractor.feed("[4]"));

                assert_eq!(extractor.finish(), "[[1],[2]]");
            }
        }
    }
}
