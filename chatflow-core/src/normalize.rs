use unicode_normalization::UnicodeNormalization;

use crate::model::ChatMessage;

fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        // Byte Order Mark
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Clean each outgoing message's content before the request body is
/// built. Message order is preserved; messages are never dropped.
pub fn normalize_conversation(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    for msg in &mut messages {
        msg.content = clean_text(&msg.content);
    }
    messages
}
