//! Discovery feed
//!
//! The reconciler consumes any ordered `Stream` of [`DiscoveryEvent`]s. This
//! module provides the line-oriented feed spoken by the node's discovery
//! service:
//!
//! ```text
//! -> <watch pattern>\n
//! <- proid.foo#123:tcp:tcp_ep xxx.xx.com:12345\n   (present)
//! <- proid.foo#123:tcp:tcp_ep\n                    (tombstone)
//! ```

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_stream::wrappers::SplitStream;
use tokio_stream::Stream;
use tracing::{info, warn};
use treadmill_agent_common::{AgentError, AgentResult};

use crate::types::DiscoveryEvent;

/// Value that explicitly marks a removal
pub const TOMBSTONE_MARKER: &str = "-";

/// Parse one feed line; blank lines yield `None`
pub fn parse_line(line: &str) -> Option<DiscoveryEvent> {
    let mut fields = line.split_whitespace();
    let key = fields.next()?;

    match fields.next() {
        None | Some(TOMBSTONE_MARKER) => Some(DiscoveryEvent::tombstone(key)),
        Some(value) => Some(DiscoveryEvent::present(key, value)),
    }
}

/// Event stream over a newline-delimited reader
///
/// Lines that are not UTF-8 are logged and skipped. A read error is
/// yielded once as `Err` and ends the stream; EOF ends it with `None`.
pub struct LineFeed<R> {
    lines: SplitStream<R>,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> Stream for LineFeed<R> {
    type Item = AgentResult<DiscoveryEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        while !self.done {
            match ready!(Pin::new(&mut self.lines).poll_next(cx)) {
                Some(Ok(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(line) => {
                        if let Some(event) = parse_line(line) {
                            return Poll::Ready(Some(Ok(event)));
                        }
                    }
                    Err(e) => {
                        warn!(
                            line = %String::from_utf8_lossy(&bytes),
                            error = %e,
                            "Skipping discovery line that is not UTF-8"
                        );
                    }
                },
                Some(Err(e)) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(AgentError::discovery(format!(
                        "read failed: {}",
                        e
                    )))));
                }
                None => self.done = true,
            }
        }

        Poll::Ready(None)
    }
}

/// Turn a line reader into an event stream
pub fn line_feed<R>(reader: R) -> LineFeed<R>
where
    R: AsyncBufRead + Unpin,
{
    LineFeed {
        lines: SplitStream::new(reader.split(b'\n')),
        done: false,
    }
}

/// Connect to the discovery service and watch `pattern`
pub async fn connect(address: &str, pattern: &str) -> AgentResult<LineFeed<BufReader<TcpStream>>> {
    let mut stream = TcpStream::connect(address)
        .await
        .map_err(|e| AgentError::discovery(format!("connect to {}: {}", address, e)))?;

    stream
        .write_all(format!("{}\n", pattern).as_bytes())
        .await
        .map_err(|e| AgentError::discovery(format!("send watch to {}: {}", address, e)))?;

    info!(address = %address, pattern = %pattern, "Watching discovery");
    Ok(line_feed(BufReader::new(stream)))
}

/// Read events from standard input
pub fn stdin_feed() -> LineFeed<BufReader<tokio::io::Stdin>> {
    line_feed(BufReader::new(tokio::io::stdin()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_stream::StreamExt;

    async fn events<R: AsyncBufRead + Unpin>(feed: LineFeed<R>) -> Vec<DiscoveryEvent> {
        feed.map(|event| event.unwrap()).collect().await
    }

    #[test]
    fn test_parse_present() {
        assert_eq!(
            parse_line("proid.foo#123:tcp:tcp_ep xxx.xx.com:12345"),
            Some(DiscoveryEvent::present(
                "proid.foo#123:tcp:tcp_ep",
                "xxx.xx.com:12345"
            ))
        );
    }

    #[test]
    fn test_parse_tombstone() {
        assert_eq!(
            parse_line("proid.foo#123:tcp:tcp_ep"),
            Some(DiscoveryEvent::tombstone("proid.foo#123:tcp:tcp_ep"))
        );
        assert_eq!(
            parse_line("proid.foo#123:tcp:tcp_ep -"),
            Some(DiscoveryEvent::tombstone("proid.foo#123:tcp:tcp_ep"))
        );
    }

    #[test]
    fn test_parse_blank() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
    }

    #[tokio::test]
    async fn test_line_feed_preserves_order() {
        let input: &[u8] = b"a:tcp:ep h1:100\n\nb:udp:ep h2:200\na:tcp:ep\n";
        assert_eq!(
            events(line_feed(input)).await,
            vec![
                DiscoveryEvent::present("a:tcp:ep", "h1:100"),
                DiscoveryEvent::present("b:udp:ep", "h2:200"),
                DiscoveryEvent::tombstone("a:tcp:ep"),
            ]
        );
    }

    #[tokio::test]
    async fn test_line_feed_skips_invalid_utf8() {
        let input: &[u8] = b"a:tcp:ep h1:100\nbad:tcp:ep \xff\xfe:1\nb:tcp:ep h2:200\nc:tcp:ep h3:300\n";

        assert_eq!(
            events(line_feed(input)).await,
            vec![
                DiscoveryEvent::present("a:tcp:ep", "h1:100"),
                DiscoveryEvent::present("b:tcp:ep", "h2:200"),
                DiscoveryEvent::present("c:tcp:ep", "h3:300"),
            ]
        );
    }

    #[tokio::test]
    async fn test_line_feed_crlf() {
        let input: &[u8] = b"a:tcp:ep h1:100\r\na:tcp:ep\r\n";

        assert_eq!(
            events(line_feed(input)).await,
            vec![
                DiscoveryEvent::present("a:tcp:ep", "h1:100"),
                DiscoveryEvent::tombstone("a:tcp:ep"),
            ]
        );
    }

    #[tokio::test]
    async fn test_line_feed_read_error_ends_with_err() {
        let reader = tokio_test::io::Builder::new()
            .read(b"a:tcp:ep h1:100\n")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut feed = line_feed(BufReader::new(reader));

        assert_eq!(
            feed.next().await.unwrap().unwrap(),
            DiscoveryEvent::present("a:tcp:ep", "h1:100")
        );
        assert!(matches!(
            feed.next().await,
            Some(Err(AgentError::Discovery { .. }))
        ));
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_sends_pattern() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"proid.foo#1:tcp:http host:8000\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let feed = connect(&address, "proid.foo*").await.unwrap();
        let received = events(feed).await;

        assert_eq!(server.await.unwrap(), "proid.foo*\n");
        assert_eq!(
            received,
            vec![DiscoveryEvent::present("proid.foo#1:tcp:http", "host:8000")]
        );
    }
}
