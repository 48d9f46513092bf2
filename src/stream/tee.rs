use super::channel::{ChannelReader, Chunk};
use super::{clone_io_error, StreamFault};
use crate::error::VaultResult;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default chunk size read from the source and buffered per output
pub const DEFAULT_TEE_BUFFER: usize = 8 * 1024;

/// Splits one source stream into two readers fed by a single producer task
///
/// The producer reads `buffer_size` bytes at a time and hands each chunk to
/// both outputs through channels that hold one chunk each, so a slow reader
/// applies backpressure to the producer instead of growing a buffer.
///
/// Failure handling:
/// - a source read error is delivered to both outputs
/// - if either output is dropped before EOF, the producer stops and the other
///   output fails with [`StreamFault::SiblingClosed`]
///
/// # Example
/// ```no_run
/// use archivault::stream::StreamTee;
/// use tokio::io::AsyncReadExt;
///
/// # async fn run() -> archivault::error::VaultResult<()> {
/// let source: &'static [u8] = b"payload";
/// let (mut a, mut b, producer) = StreamTee::spawn(source, 8192).into_parts();
///
/// let mut left = Vec::new();
/// let mut right = Vec::new();
/// let (ra, rb) = tokio::join!(a.read_to_end(&mut left), b.read_to_end(&mut right));
/// ra?;
/// rb?;
/// assert_eq!(producer.join().await?, 7);
/// # Ok(())
/// # }
/// ```
pub struct StreamTee {
    first: ChannelReader,
    second: ChannelReader,
    producer: TeeProducer,
}

impl StreamTee {
    /// Start the producer task over `source`
    pub fn spawn<R>(source: R, buffer_size: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let buffer_size = buffer_size.max(1);
        let aborted = Arc::new(AtomicBool::new(false));
        let (first_tx, first_rx) = mpsc::channel(1);
        let (second_tx, second_rx) = mpsc::channel(1);

        let handle = tokio::spawn(produce(
            source,
            buffer_size,
            first_tx,
            second_tx,
            aborted.clone(),
        ));

        Self {
            first: ChannelReader::new(first_rx, aborted.clone()),
            second: ChannelReader::new(second_rx, aborted),
            producer: TeeProducer(handle),
        }
    }

    /// Split into both outputs and the producer handle
    pub fn into_parts(self) -> (ChannelReader, ChannelReader, TeeProducer) {
        (self.first, self.second, self.producer)
    }
}

/// Handle to the task draining the tee source
pub struct TeeProducer(JoinHandle<io::Result<u64>>);

impl TeeProducer {
    /// Wait for the producer to exit and return the number of bytes it read
    pub async fn join(self) -> VaultResult<u64> {
        Ok(self.0.await??)
    }
}

async fn produce<R>(
    mut source: R,
    buffer_size: usize,
    first: mpsc::Sender<Chunk>,
    second: mpsc::Sender<Chunk>,
    aborted: Arc<AtomicBool>,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    let mut total: u64 = 0;

    loop {
        // Watch both outputs while reading so an early close stops us mid-read.
        let read = tokio::select! {
            read = source.read(&mut buffer) => read,
            _ = first.closed() => return Err(abort(&aborted, total)),
            _ = second.closed() => return Err(abort(&aborted, total)),
        };

        let n = match read {
            Ok(0) => {
                debug!(target: "stream::tee", bytes = total, "tee source drained");
                return Ok(total);
            }
            Ok(n) => n,
            Err(err) => {
                debug!(target: "stream::tee", error = %err, "tee source read failed");
                let _ = first.send(Err(clone_io_error(&err))).await;
                let _ = second.send(Err(clone_io_error(&err))).await;
                return Err(err);
            }
        };

        let chunk = buffer[..n].to_vec();
        if first.send(Ok(chunk.clone())).await.is_err() || second.send(Ok(chunk)).await.is_err() {
            return Err(abort(&aborted, total));
        }
        total += n as u64;
    }
}

fn abort(aborted: &AtomicBool, total: u64) -> io::Error {
    // Raised before the senders drop so the surviving reader sees a failure, not EOF.
    aborted.store(true, Ordering::Release);
    debug!(target: "stream::tee", bytes = total, "tee output closed early, stopping producer");
    StreamFault::SiblingClosed.into_io()
}
