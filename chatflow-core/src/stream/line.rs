use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::Stream;

use crate::error::{ChatFlowError, CoreResult};

/// Line splitter over a byte stream; yields complete lines separated by
/// `'\n'` (a trailing `'\r'` is stripped as well).
///
/// The buffer is persistent session state, not a per-chunk local: a chunk
/// boundary is never assumed to coincide with a line boundary, and a
/// trailing partial line is carried over to the next delivery. Buffering
/// happens at the byte level, so a multi-byte UTF-8 scalar split across
/// chunks is reassembled before text conversion. On end of stream, a
/// non-whitespace tail with no terminator is emitted as a final line; a
/// whitespace-only tail is discarded.
pub struct LineStream<S> {
    inner: S,
    buf: BytesMut,
    // Bytes below this offset are known newline-free; avoids rescanning.
    scan_from: usize,
    done: bool,
}

impl<S> LineStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            scan_from: 0,
            done: false,
        }
    }

    fn take_line(&mut self, newline_at: usize) -> String {
        let mut line = self.buf.split_to(newline_at + 1);
        self.scan_from = 0;
        line.truncate(line.len() - 1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        String::from_utf8_lossy(&line).into_owned()
    }
}

impl<S, E> Stream for LineStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = CoreResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }

            // If we already have a newline in the buffer, split and yield
            // immediately without touching the transport.
            if let Some(pos) = this.buf[this.scan_from..].iter().position(|&b| b == b'\n') {
                let line = this.take_line(this.scan_from + pos);
                return Poll::Ready(Some(Ok(line)));
            }
            this.scan_from = this.buf.len();

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buf.extend_from_slice(&chunk);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(ChatFlowError::Transport(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if !this.buf.is_empty() {
                        let tail = this.buf.split();
                        let text = String::from_utf8_lossy(&tail).into_owned();
                        if !text.trim().is_empty() {
                            return Poll::Ready(Some(Ok(text)));
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    async fn lines_for(chunks: Vec<&[u8]>) -> Vec<String> {
        let items: Vec<Result<Bytes, std::convert::Infallible>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        LineStream::new(futures_util::stream::iter(items))
            .map(|r| r.expect("no transport error"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn splits_lines_within_one_chunk() {
        let lines = lines_for(vec![b"one\ntwo\nthree\n"]).await;
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn reassembles_line_split_across_chunks() {
        let lines = lines_for(vec![b"hel", b"lo\nwor", b"ld\n"]).await;
        assert_eq!(lines, vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn chunk_boundary_independence() {
        let body = b"data: {\"a\":1}\n\ndata: [DONE]\n";
        let whole = lines_for(vec![body]).await;
        // Every split point of the same concatenation yields the same lines.
        for cut in 1..body.len() {
            let split = lines_for(vec![&body[..cut], &body[cut..]]).await;
            assert_eq!(split, whole, "split at byte {cut}");
        }
    }

    #[tokio::test]
    async fn multibyte_scalar_split_across_chunks_survives() {
        // "héllo\n" with the split in the middle of the two-byte 'é'.
        let body = "héllo\n".as_bytes();
        let lines = lines_for(vec![&body[..2], &body[2..]]).await;
        assert_eq!(lines, vec!["héllo"]);
    }

    #[tokio::test]
    async fn strips_crlf() {
        let lines = lines_for(vec![b"one\r\ntwo\r\n"]).await;
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn flushes_unterminated_tail() {
        let lines = lines_for(vec![b"one\ntail-no-newline"]).await;
        assert_eq!(lines, vec!["one", "tail-no-newline"]);
    }

    #[tokio::test]
    async fn discards_whitespace_only_tail() {
        let lines = lines_for(vec![b"one\n  \r"]).await;
        assert_eq!(lines, vec!["one"]);
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let lines = lines_for(vec![]).await;
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn transport_error_surfaces_after_buffered_lines() {
        let items: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"good line\n")),
            Err(std::io::Error::other("connection reset")),
        ];
        let mut stream = LineStream::new(futures_util::stream::iter(items));
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, "good line");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ChatFlowError::Transport(_)));
        assert!(stream.next().await.is_none());
    }
}
