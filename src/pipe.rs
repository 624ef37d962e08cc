//! Bounded pipes between blocking archive code and async HTTP bodies.
//!
//! The tar and gzip codecs are synchronous, HTTP bodies are async streams.
//! A [`PipeWriter`] lets a blocking task feed a [`PipeStream`]; a
//! [`ChannelReader`] goes the other way. Both sides are joined by a bounded
//! channel, so a slow consumer stalls the producer instead of growing a
//! buffer. Errors cross in both directions: the producer can end the stream
//! with an error, and a dropped consumer turns the producer's next write
//! into `BrokenPipe`.

use futures::{Stream, StreamExt};
use std::fmt;
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::logging::*;

/// Number of in-flight chunks between producer and consumer
pub const DEFAULT_PIPE_CAPACITY: usize = 16;

/// Size of the chunks a [`PipeWriter`] emits
pub const PIPE_CHUNK_SIZE: usize = 64 * 1024;

type Chunk = io::Result<Vec<u8>>;

/// Create a pipe with the given capacity (in chunks)
pub fn pipe(capacity: usize) -> (PipeWriter, PipeStream) {
	let (tx, rx) = mpsc::channel(capacity.max(1));
	(PipeWriter { tx, buf: Vec::with_capacity(PIPE_CHUNK_SIZE) }, PipeStream { rx })
}

/// Blocking writer side. Must only be used from a blocking thread.
pub struct PipeWriter {
	tx: mpsc::Sender<Chunk>,
	buf: Vec<u8>,
}

impl PipeWriter {
	fn send_buf(&mut self) -> io::Result<()> {
		if self.buf.is_empty() {
			return Ok(());
		}
		let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(PIPE_CHUNK_SIZE));
		self.tx
			.blocking_send(Ok(chunk))
			.map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader went away"))
	}

	/// Flush what is buffered and close the stream normally
	pub fn finish(mut self) -> io::Result<()> {
		self.send_buf()
	}

	/// End the stream with an error the consumer will observe
	pub fn fail(self, err: io::Error) {
		self.failer().fail(err)
	}

	/// Handle for failing the stream while the writer is owned by an encoder
	pub fn failer(&self) -> PipeFailer {
		PipeFailer { tx: self.tx.clone() }
	}
}

/// Error side channel of a [`PipeWriter`]
#[derive(Clone)]
pub struct PipeFailer {
	tx: mpsc::Sender<Chunk>,
}

impl PipeFailer {
	/// Blocking; call from the producer thread
	pub fn fail(&self, err: io::Error) {
		if self.tx.blocking_send(Err(err)).is_err() {
			debug!("pipe reader already gone while reporting failure");
		}
	}
}

impl Write for PipeWriter {
	fn write(&mut self, data: &[u8]) -> io::Result<usize> {
		if self.tx.is_closed() {
			return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader went away"));
		}
		self.buf.extend_from_slice(data);
		if self.buf.len() >= PIPE_CHUNK_SIZE {
			self.send_buf()?;
		}
		Ok(data.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		self.send_buf()
	}
}

impl fmt::Debug for PipeWriter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PipeWriter").field("buffered", &self.buf.len()).finish()
	}
}

/// Async stream side, usable as an HTTP request or response body
pub struct PipeStream {
	rx: mpsc::Receiver<Chunk>,
}

impl Stream for PipeStream {
	type Item = Chunk;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.rx.poll_recv(cx)
	}
}

/// Blocking reader fed from an async byte stream
pub struct ChannelReader {
	rx: mpsc::Receiver<Chunk>,
	current: Vec<u8>,
	pos: usize,
}

/// Forward an async byte stream into a [`ChannelReader`].
///
/// The forwarding task stops when the reader is dropped. Stream errors are
/// surfaced to the reader as `ConnectionAborted`.
pub fn forward<S, B, E>(stream: S, capacity: usize) -> ChannelReader
where
	S: Stream<Item = Result<B, E>> + Send + 'static,
	B: AsRef<[u8]> + Send + 'static,
	E: fmt::Display + Send + 'static,
{
	let (tx, rx) = mpsc::channel(capacity.max(1));
	tokio::spawn(async move {
		let mut stream = Box::pin(stream);
		while let Some(item) = stream.next().await {
			let chunk = item
				.map(|b| b.as_ref().to_vec())
				.map_err(|e| io::Error::new(io::ErrorKind::ConnectionAborted, e.to_string()));
			let failed = chunk.is_err();
			if tx.send(chunk).await.is_err() || failed {
				break;
			}
		}
	});
	ChannelReader { rx, current: Vec::new(), pos: 0 }
}

impl Read for ChannelReader {
	fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
		while self.pos >= self.current.len() {
			match self.rx.blocking_recv() {
				Some(Ok(chunk)) => {
					self.current = chunk;
					self.pos = 0;
				}
				Some(Err(e)) => return Err(e),
				None => return Ok(0),
			}
		}
		let n = out.len().min(self.current.len() - self.pos);
		out[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
		self.pos += n;
		Ok(n)
	}
}

/// Stream a local file in [`PIPE_CHUNK_SIZE`] pieces
pub fn file_stream(file: tokio::fs::File) -> impl Stream<Item = io::Result<Vec<u8>>> + Send {
	futures::stream::unfold(Some(file), |state| async move {
		let mut file = state?;
		let mut buf = vec![0u8; PIPE_CHUNK_SIZE];
		match file.read(&mut buf).await {
			Ok(0) => None,
			Ok(n) => {
				buf.truncate(n);
				Some((Ok(buf), Some(file)))
			}
			Err(e) => Some((Err(e), None)),
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_writer_to_stream() {
		let (mut writer, stream) = pipe(2);
		let producer = tokio::task::spawn_blocking(move || {
			for _ in 0..100 {
				writer.write_all(&[5u8; 4096])?;
			}
			writer.finish()
		});

		let chunks: Vec<Chunk> = stream.collect().await;
		producer.await.unwrap().unwrap();

		let total: usize = chunks.into_iter().map(|c| c.unwrap().len()).sum();
		assert_eq!(total, 100 * 4096);
	}

	#[tokio::test]
	async fn test_dropped_stream_breaks_writer() {
		let (mut writer, stream) = pipe(1);
		drop(stream);

		let result = tokio::task::spawn_blocking(move || writer.write_all(&vec![0u8; PIPE_CHUNK_SIZE * 4]))
			.await
			.unwrap();
		assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
	}

	#[tokio::test]
	async fn test_fail_reaches_consumer() {
		let (writer, mut stream) = pipe(1);
		tokio::task::spawn_blocking(move || writer.fail(io::Error::new(io::ErrorKind::Other, "boom")));

		let item = stream.next().await.unwrap();
		assert_eq!(item.unwrap_err().to_string(), "boom");
		assert!(stream.next().await.is_none());
	}

	#[tokio::test]
	async fn test_forward_into_reader() {
		let parts: Vec<Result<Vec<u8>, String>> = vec![Ok(b"hello ".to_vec()), Ok(b"world".to_vec())];
		let mut reader = forward(futures::stream::iter(parts), 1);

		let text = tokio::task::spawn_blocking(move || {
			let mut s = String::new();
			reader.read_to_string(&mut s).map(|_| s)
		})
		.await
		.unwrap()
		.unwrap();
		assert_eq!(text, "hello world");
	}

	#[tokio::test]
	async fn test_forward_surfaces_stream_error() {
		let parts: Vec<Result<Vec<u8>, String>> = vec![Ok(b"partial".to_vec()), Err("reset".into())];
		let mut reader = forward(futures::stream::iter(parts), 4);

		let err = tokio::task::spawn_blocking(move || {
			let mut buf = Vec::new();
			reader.read_to_end(&mut buf)
		})
		.await
		.unwrap()
		.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
	}
}

// vim: ts=4
