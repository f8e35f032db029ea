/// Prefix marking a line that carries an event payload. Matching is
/// case-sensitive and exact; nothing else is treated as data.
pub const DATA_PREFIX: &str = "data: ";

/// Out-of-band token signaling end of stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// What one decoded line means to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent<'a> {
    /// Payload is everything after the prefix, verbatim. Extra leading
    /// whitespace belongs to the payload, not the framing.
    Data(&'a str),
    Done,
    Ignored,
}

/// Classify a single decoded line. Blank lines, comments, and anything
/// without the data prefix are noise to skip, never an error.
pub fn classify(line: &str) -> LineEvent<'_> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return LineEvent::Ignored;
    };
    if payload == DONE_SENTINEL {
        LineEvent::Done
    } else {
        LineEvent::Data(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_line_yields_payload() {
        assert_eq!(
            classify(r#"data: {"choices":[]}"#),
            LineEvent::Data(r#"{"choices":[]}"#)
        );
    }

    #[test]
    fn sentinel_is_done() {
        assert_eq!(classify("data: [DONE]"), LineEvent::Done);
    }

    #[test]
    fn blank_and_comment_lines_ignored() {
        assert_eq!(classify(""), LineEvent::Ignored);
        assert_eq!(classify(": keep-alive"), LineEvent::Ignored);
        assert_eq!(classify("event: message"), LineEvent::Ignored);
    }

    #[test]
    fn prefix_is_case_sensitive() {
        assert_eq!(classify("DATA: {}"), LineEvent::Ignored);
        assert_eq!(classify("Data: [DONE]"), LineEvent::Ignored);
    }

    #[test]
    fn missing_space_after_colon_is_not_data() {
        assert_eq!(classify("data:{}"), LineEvent::Ignored);
    }

    #[test]
    fn payload_kept_verbatim() {
        // Extra whitespace past the prefix stays in the payload, so a
        // padded sentinel is data (and will fail fragment decode, which
        // is non-fatal), not a terminator.
        assert_eq!(classify("data:  [DONE]"), LineEvent::Data(" [DONE]"));
        assert_eq!(classify("data:  {\"a\":1}"), LineEvent::Data(" {\"a\":1}"));
    }
}
