use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

use crate::decode::{normalize_line, LineAssembler};
use crate::types::LogPage;

pub const DEFAULT_LOG_CAPACITY: usize = 5000;
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Live tail of one process. Lines arrive in production order; if the
/// receiver falls more than the subscriber buffer behind, lines are dropped
/// for this subscriber only.
#[derive(Debug)]
pub struct LogSubscription {
	pub id: SubscriberId,
	pub receiver: mpsc::Receiver<String>,
}

/// Bounded line buffer plus subscriber fan-out for one process.
#[derive(Clone)]
pub struct OutputCapture {
	state: Arc<Mutex<CaptureState>>,
	next_subscriber: Arc<AtomicU64>,
	capacity: usize,
	subscriber_buffer: usize,
}

struct CaptureState {
	lines: VecDeque<String>,
	subscribers: Vec<Subscriber>,
}

struct Subscriber {
	id: SubscriberId,
	sender: mpsc::Sender<String>,
}

impl OutputCapture {
	pub fn new(capacity: usize, subscriber_buffer: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			state: Arc::new(Mutex::new(CaptureState {
				lines: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
				subscribers: Vec::new(),
			})),
			next_subscriber: Arc::new(AtomicU64::new(0)),
			capacity,
			subscriber_buffer: subscriber_buffer.max(1),
		}
	}

	/// Normalize one raw line and record it.
	pub async fn write_line(&self, raw: &[u8]) {
		self.push_line(normalize_line(raw)).await;
	}

	pub async fn push_line(&self, line: String) {
		let mut state = self.state.lock().await;
		if state.lines.len() >= self.capacity {
			state.lines.pop_front();
		}
		state.lines.push_back(line.clone());

		state.subscribers.retain(|sub| match sub.sender.try_send(line.clone()) {
			Ok(()) => true,
			Err(TrySendError::Full(_)) => {
				tracing::warn!("log subscriber {:?} is lagging, dropped a line", sub.id);
				true
			}
			Err(TrySendError::Closed(_)) => false,
		});
	}

	pub async fn snapshot(&self) -> Vec<String> {
		let state = self.state.lock().await;
		state.lines.iter().cloned().collect()
	}

	/// Lines after `offset`, with the offset to pass next time.
	pub async fn since(&self, offset: usize) -> LogPage {
		let state = self.state.lock().await;
		let total = state.lines.len();
		let start = offset.min(total);
		let lines: Vec<String> = state.lines.iter().skip(start).cloned().collect();
		LogPage {
			offset: start + lines.len(),
			lines,
			total,
		}
	}

	pub async fn subscribe(&self) -> LogSubscription {
		let id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
		let (sender, receiver) = mpsc::channel(self.subscriber_buffer);
		self.state.lock().await.subscribers.push(Subscriber { id, sender });
		LogSubscription { id, receiver }
	}

	pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
		let mut state = self.state.lock().await;
		let before = state.subscribers.len();
		state.subscribers.retain(|sub| sub.id != id);
		state.subscribers.len() != before
	}

	pub async fn subscriber_count(&self) -> usize {
		self.state.lock().await.subscribers.len()
	}
}

/// Read `reader` to the end, feeding every complete line into `output`.
pub async fn pipe_output<R: AsyncRead + Unpin>(mut reader: R, output: OutputCapture) {
	let mut assembler = LineAssembler::new();
	let mut buf = [0u8; 4096];
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => {
				for line in assembler.push(&buf[..n]) {
					output.write_line(&line).await;
				}
			}
			Err(e) => {
				tracing::debug!("output stream closed with error: {}", e);
				break;
			}
		}
	}
	if let Some(tail) = assembler.finish() {
		output.write_line(&tail).await;
	}
}
