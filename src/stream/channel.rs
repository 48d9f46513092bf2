use super::StreamFault;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// One message on a stream channel: a chunk of bytes or the error that ended the stream
pub(crate) type Chunk = io::Result<Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Open,
    Eof,
    Failed,
}

/// `AsyncRead` over the receiving end of a bounded chunk channel
///
/// The producer signals a clean end of stream by dropping its sender. If it
/// drops the sender after raising the shared `aborted` flag instead, the
/// reader reports [`StreamFault::SiblingClosed`] rather than a silent EOF,
/// so a truncated stream is never mistaken for a complete one.
///
/// Dropping the reader closes the channel, which unblocks a producer that is
/// waiting on capacity.
pub struct ChannelReader {
    rx: mpsc::Receiver<Chunk>,
    pending: Vec<u8>,
    offset: usize,
    aborted: Arc<AtomicBool>,
    state: ReaderState,
}

impl ChannelReader {
    pub(crate) fn new(rx: mpsc::Receiver<Chunk>, aborted: Arc<AtomicBool>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            offset: 0,
            aborted,
            state: ReaderState::Open,
        }
    }

    /// Create a connected sender/reader pair holding at most `depth` chunks in flight
    pub(crate) fn channel(depth: usize) -> (mpsc::Sender<Chunk>, Self) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (tx, Self::new(rx, Arc::new(AtomicBool::new(false))))
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.offset < this.pending.len() {
                let available = &this.pending[this.offset..];
                let n = available.len().min(buf.remaining());
                buf.put_slice(&available[..n]);
                this.offset += n;
                return Poll::Ready(Ok(()));
            }

            match this.state {
                ReaderState::Eof => return Poll::Ready(Ok(())),
                ReaderState::Failed => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "stream already failed",
                    )))
                }
                ReaderState::Open => {}
            }

            match ready!(this.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    this.pending = chunk;
                    this.offset = 0;
                }
                Some(Err(err)) => {
                    this.state = ReaderState::Failed;
                    return Poll::Ready(Err(err));
                }
                None => {
                    if this.aborted.load(Ordering::Acquire) {
                        this.state = ReaderState::Failed;
                        return Poll::Ready(Err(StreamFault::SiblingClosed.into_io()));
                    }
                    this.state = ReaderState::Eof;
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_reads_chunks_in_order() {
        let (tx, mut reader) = ChannelReader::channel(4);
        tx.send(Ok(b"hello ".to_vec())).await.unwrap();
        tx.send(Ok(Vec::new())).await.unwrap();
        tx.send(Ok(b"world".to_vec())).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn test_small_read_buffer() {
        let (tx, mut reader) = ChannelReader::channel(1);
        tokio::spawn(async move {
            tx.send(Ok(vec![7u8; 10])).await.unwrap();
        });

        let mut first = [0u8; 3];
        reader.read_exact(&mut first).await.unwrap();
        assert_eq!(first, [7, 7, 7]);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest.len(), 7);
    }

    #[tokio::test]
    async fn test_error_is_surfaced_then_sticky() {
        let (tx, mut reader) = ChannelReader::channel(2);
        tx.send(Ok(b"partial".to_vec())).await.unwrap();
        tx.send(Err(io::Error::new(io::ErrorKind::Other, "source broke")))
            .await
            .unwrap();
        drop(tx);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert!(err.to_string().contains("source broke"));

        let mut again = [0u8; 4];
        assert!(reader.read(&mut again).await.is_err());
    }

    #[tokio::test]
    async fn test_aborted_close_is_not_eof() {
        let (tx, rx) = mpsc::channel(1);
        let aborted = Arc::new(AtomicBool::new(false));
        let mut reader = ChannelReader::new(rx, aborted.clone());

        aborted.store(true, Ordering::Release);
        drop(tx);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(StreamFault::from_io(&err), Some(&StreamFault::SiblingClosed));
    }
}
