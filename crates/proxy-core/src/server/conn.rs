//! Transport wrapper for accepted connections.
//!
//! Shutting down or dropping the wrapper runs the connection's cleanup first, then releases the
//! inner stream. Bytes read from the client are scanned for its SSH identification line.

use std::{
    io, pin::Pin, sync::{Arc, OnceLock}, task::{Context, Poll}
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::trace;

use crate::context::ConnectionCleanup;

/// RFC 4253 caps the identification line at 255 bytes including CR LF.
const MAX_IDENT_LINE: usize = 255;
/// Give up looking for the identification after this many bytes.
const MAX_IDENT_SCAN: usize = 8 * 1024;

pub struct InboundConnection<S> {
    inner: S,
    cleanup: Option<ConnectionCleanup>,
    ident: IdentSniffer,
}

impl<S> InboundConnection<S> {
    pub fn new(inner: S, cleanup: ConnectionCleanup, ident_sink: Arc<OnceLock<String>>) -> Self {
        Self {
            inner,
            cleanup: Some(cleanup),
            ident: IdentSniffer::new(ident_sink),
        }
    }

    fn run_cleanup(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.run();
        }
    }
}

impl<S> Drop for InboundConnection<S> {
    fn drop(&mut self) {
        // Fields drop after this body, so cleanup always precedes releasing `inner`.
        self.run_cleanup();
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for InboundConnection<S> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            this.ident.feed(&buf.filled()[before..]);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for InboundConnection<S> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.run_cleanup();
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Picks the `SSH-` identification line out of the first bytes a client sends.
struct IdentSniffer {
    sink: Arc<OnceLock<String>>,
    line: Vec<u8>,
    scanned: usize,
    done: bool,
}

impl IdentSniffer {
    fn new(sink: Arc<OnceLock<String>>) -> Self {
        Self {
            sink,
            line: Vec::new(),
            scanned: 0,
            done: false,
        }
    }

    fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.done {
                return;
            }
            self.scanned += 1;
            if byte == b'\n' {
                self.finish_line();
            } else if self.line.len() < MAX_IDENT_LINE {
                self.line.push(byte);
            }
            if self.scanned >= MAX_IDENT_SCAN {
                self.done = true;
            }
        }
    }

    fn finish_line(&mut self) {
        let line = String::from_utf8_lossy(&self.line).trim_end_matches('\r').to_string();
        self.line.clear();
        if line.starts_with("SSH-") {
            trace!(ident = %line, "client identification");
            let _ = self.sink.set(line);
            self.done = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::{context::ConnectionContext, report::ErrorReporter, test_support::MockOutbound};

    fn wrap<S>(stream: S, ctx: &ConnectionContext) -> InboundConnection<S> {
        let (reporter, _rx) = ErrorReporter::channel(4);
        InboundConnection::new(stream, ctx.cleanup(reporter), ctx.ident_sink())
    }

    #[tokio::test]
    async fn captures_client_identification() -> anyhow::Result<()> {
        let ctx = ConnectionContext::new(None);
        let (mut client, server) = tokio::io::duplex(1024);
        let mut conn = wrap(server, &ctx);

        client.write_all(b"SSH-2.0-Open").await?;
        client.write_all(b"SSH_9.6p1 Ubuntu\r\n\x00\x00\x01").await?;
        let mut buf = vec![0u8; 64];
        let mut read = 0;
        while read < 33 {
            read += conn.read(&mut buf[read..]).await?;
        }

        assert_eq!(ctx.client_ident(), Some("SSH-2.0-OpenSSH_9.6p1 Ubuntu"));
        assert_eq!(&buf[..30], b"SSH-2.0-OpenSSH_9.6p1 Ubuntu\r\n");
        Ok(())
    }

    #[test]
    fn ignores_non_ident_lines() {
        let sink = Arc::new(OnceLock::new());
        let mut sniffer = IdentSniffer::new(sink.clone());
        sniffer.feed(b"hello there\r\n");
        assert!(sink.get().is_none());
        sniffer.feed(b"SSH-2.0-libssh_0.10\r\nSSH-2.0-second\r\n");
        assert_eq!(sink.get().map(String::as_str), Some("SSH-2.0-libssh_0.10"));
    }

    #[tokio::test]
    async fn shutdown_closes_outbound_before_transport() -> anyhow::Result<()> {
        let ctx = ConnectionContext::new(None);
        let outbound = MockOutbound::new("box:22");
        ctx.install_outbound(outbound.clone());
        let (mut client, server) = tokio::io::duplex(64);
        let mut conn = wrap(server, &ctx);

        conn.shutdown().await?;
        outbound.wait_closed().await;
        assert_eq!(outbound.close_count(), 1);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await?;
        assert!(rest.is_empty());

        drop(conn);
        tokio::task::yield_now().await;
        assert_eq!(outbound.close_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn drop_runs_cleanup() {
        let ctx = ConnectionContext::new(None);
        let outbound = MockOutbound::new("box:22");
        ctx.install_outbound(outbound.clone());
        let (_client, server) = tokio::io::duplex(64);

        drop(wrap(server, &ctx));
        outbound.wait_closed().await;
        assert_eq!(outbound.close_count(), 1);
        assert!(ctx.outbound().is_none());
    }

    #[tokio::test]
    async fn drop_without_outbound_is_quiet() {
        let ctx = ConnectionContext::new(None);
        let (_client, server) = tokio::io::duplex(64);
        drop(wrap(server, &ctx));
        assert!(ctx.outbound().is_none());
    }
}
