// transport.rs
//
// Proactor over one connected TCP socket. A reader task keeps exactly one
// read outstanding into a pooled rolling buffer and hands complete frames
// to the handler; a writer task keeps exactly one scatter/gather write
// outstanding, coalescing the front of the outbound queue. Producers on any
// thread enqueue through OutboundSender.

use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pool::{BufferPool, BUFFER_CAPACITY};
use crate::wire::{self, FramedMessage, MessageKind, MAX_FRAME_LEN};

/// Socket buffers sized to hold at least four maximum-size frames.
const SOCKET_BUFFER_SIZE: usize = 4 * 65536;

/// Upper bound on frames coalesced into one scatter/gather write.
const WRITE_BATCH: usize = 32;

/// Seam between the transport and whoever consumes inbound frames.
///
/// All callbacks run on the transport's service task.
pub trait MessageHandler: Send + 'static {
    /// One complete frame parsed off the stream.
    fn on_frame(&mut self, frame: FramedMessage);

    /// A producer asked for the primary worker to be driven.
    fn on_wake(&mut self) {}

    /// The session is ending; release any per-session resources.
    fn on_shutdown(&mut self) {}
}

struct OutboundQueue {
    frames: VecDeque<FramedMessage>,
    /// Bytes of the front frame already accepted by the socket.
    start_offset: usize,
}

struct Shared {
    queue: Mutex<OutboundQueue>,
    writer_wake: Notify,
    primary_wake: Notify,
    quit_tx: watch::Sender<bool>,
    idle_tx: watch::Sender<bool>,
    pool: BufferPool,
    comm_loopback: Mutex<Option<Box<dyn Fn(&FramedMessage) + Send + Sync>>>,
}

impl Shared {
    fn new() -> Arc<Self> {
        let (quit_tx, _) = watch::channel(false);
        let (idle_tx, _) = watch::channel(true);
        Arc::new(Self {
            queue: Mutex::new(OutboundQueue {
                frames: VecDeque::with_capacity(128),
                start_offset: 0,
            }),
            writer_wake: Notify::new(),
            primary_wake: Notify::new(),
            quit_tx,
            idle_tx,
            pool: BufferPool::new(),
            comm_loopback: Mutex::new(None),
        })
    }

    fn terminate(&self) {
        let was_quit = self.quit_tx.send_replace(true);
        if was_quit {
            return;
        }
        // Unblock idle waiters even if bytes never leave the queue.
        let _ = self.idle_tx.send(true);
        self.writer_wake.notify_one();
        self.primary_wake.notify_one();
    }
}

/// Producer-side handle to the outbound queue. Clonable and usable from
/// plain threads; enqueues are observed on the wire in call order.
#[derive(Clone)]
pub struct OutboundSender {
    shared: Arc<Shared>,
}

impl OutboundSender {
    /// Queue one frame for the writer.
    pub fn enqueue(&self, frame: FramedMessage) {
        if *self.shared.quit_tx.borrow() {
            return;
        }

        let kind = frame.kind();
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.frames.push_back(frame.clone());
            let _ = self.shared.idle_tx.send(false);
        }
        self.shared.writer_wake.notify_one();

        // Our own match comms also go to the other workers on this
        // connection; the self-echo filter keeps the sender from seeing it.
        if kind == Some(MessageKind::MatchComm) {
            if let Some(loopback) = self.shared.comm_loopback.lock().unwrap().as_ref() {
                loopback(&frame);
            }
            self.shared.primary_wake.notify_one();
        }
    }

    /// Encode `payload` and queue the resulting frame.
    pub fn send<T: bincode::Encode>(&self, kind: MessageKind, payload: &T) {
        match wire::encode_frame(&self.shared.pool, kind, payload) {
            Ok(frame) => self.enqueue(frame),
            Err(err) => warn!("failed to encode outbound message: {err:#}"),
        }
    }

    /// Ask the service task to drive the primary worker.
    pub fn wake_primary(&self) {
        self.shared.primary_wake.notify_one();
    }

    /// Request session teardown; idempotent.
    pub fn terminate(&self) {
        self.shared.terminate();
    }

    pub fn pool(&self) -> &BufferPool {
        &self.shared.pool
    }

    pub(crate) fn set_comm_loopback(
        &self,
        loopback: impl Fn(&FramedMessage) + Send + Sync + 'static,
    ) {
        *self.shared.comm_loopback.lock().unwrap() = Some(Box::new(loopback));
    }

    /// A sender with no transport behind it; frames pile up in the queue.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            shared: Shared::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn drain_queued(&self) -> Vec<FramedMessage> {
        self.shared.queue.lock().unwrap().frames.drain(..).collect()
    }
}

/// One long-lived connection to the match server.
pub struct Transport {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Transport {
    /// Resolve, connect, configure the socket, and start the service tasks.
    ///
    /// `make_handler` receives the connection's sender so the handler can
    /// enqueue replies and request teardown.
    pub async fn connect<H, F>(host: &str, port: u16, make_handler: F) -> anyhow::Result<Self>
    where
        H: MessageHandler,
        F: FnOnce(OutboundSender) -> H,
    {
        let addr = lookup_host((host, port))
            .await
            .with_context(|| format!("failed to look up [{host}]:{port}"))?
            .next()
            .ok_or_else(|| anyhow::anyhow!("no addresses for [{host}]:{port}"))?;

        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        stream.set_nodelay(true).context("set TCP_NODELAY")?;
        {
            let sock = SockRef::from(&stream);
            sock.set_recv_buffer_size(SOCKET_BUFFER_SIZE)
                .context("set SO_RCVBUF")?;
            sock.set_send_buffer_size(SOCKET_BUFFER_SIZE)
                .context("set SO_SNDBUF")?;
        }
        info!("connected to {addr}");

        let shared = Shared::new();
        let handler = make_handler(OutboundSender {
            shared: shared.clone(),
        });

        let (read_half, write_half) = stream.into_split();
        let reader = tokio::spawn(reader_task(read_half, shared.clone(), handler));
        let writer = tokio::spawn(writer_task(write_half, shared.clone()));

        Ok(Self {
            shared,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    pub fn sender(&self) -> OutboundSender {
        OutboundSender {
            shared: self.shared.clone(),
        }
    }

    /// Request teardown of both service tasks; idempotent.
    pub fn terminate(&self) {
        self.shared.terminate();
    }

    /// Resolve once every queued byte has been accepted by the socket and
    /// no write is in flight (or the session has been terminated).
    pub async fn wait_for_writer_idle(&self) {
        let mut idle_rx = self.shared.idle_tx.subscribe();
        let _ = idle_rx.wait_for(|idle| *idle).await;
    }

    /// Wait for both service tasks to finish and drop the socket.
    pub async fn join(&mut self) {
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        let mut queue = self.shared.queue.lock().unwrap();
        queue.frames.clear();
        queue.start_offset = 0;
    }
}

async fn reader_task<H: MessageHandler>(
    mut sock: OwnedReadHalf,
    shared: Arc<Shared>,
    mut handler: H,
) {
    let mut quit_rx = shared.quit_tx.subscribe();
    let mut buf = shared.pool.get();

    loop {
        if *quit_rx.borrow() {
            break;
        }

        // Make room for at least one maximum-size frame, rolling any
        // partial-frame tail into a fresh pooled block.
        if buf.capacity() - buf.len() < MAX_FRAME_LEN {
            let mut fresh = shared.pool.get();
            fresh.extend_from_slice(&buf);
            shared.pool.put(std::mem::replace(&mut buf, fresh));
        }

        let spare = buf.capacity() - buf.len();
        let count = tokio::select! {
            result = sock.read_buf(&mut buf) => match result {
                Ok(count) => count,
                Err(err) => {
                    error!("read failed: {err}");
                    break;
                }
            },
            _ = shared.primary_wake.notified() => {
                handler.on_wake();
                continue;
            }
            _ = quit_rx.wait_for(|quit| *quit) => break,
        };

        if count == 0 {
            info!("connection closed by server");
            break;
        }
        if count == spare {
            // Filled the buffer to the brim; more data is likely pending.
            debug!(bytes = count, "partial read");
        }

        while let Some(frame) = wire::next_frame(&mut buf) {
            handler.on_frame(frame);
            if *quit_rx.borrow() {
                break;
            }
        }

        // Fully consumed: start the next read aligned at offset zero,
        // reusing the block if no frame still references it.
        if buf.is_empty() && !buf.try_reclaim(BUFFER_CAPACITY) {
            shared.pool.put(std::mem::replace(&mut buf, shared.pool.get()));
        }
    }

    shared.pool.put(buf);
    handler.on_shutdown();
    shared.terminate();
}

async fn writer_task(mut sock: OwnedWriteHalf, shared: Arc<Shared>) {
    let mut quit_rx = shared.quit_tx.subscribe();

    loop {
        if *quit_rx.borrow() {
            break;
        }

        let Some((batch, first_offset)) = snapshot_batch(&shared) else {
            tokio::select! {
                _ = shared.writer_wake.notified() => {}
                _ = quit_rx.wait_for(|quit| *quit) => {}
            }
            continue;
        };

        let mut slices: Vec<IoSlice> = Vec::with_capacity(batch.len());
        let mut offset = first_offset;
        for frame in &batch {
            slices.push(IoSlice::new(&frame.as_slice()[offset..]));
            offset = 0;
        }

        let written = tokio::select! {
            result = sock.write_vectored(&slices) => match result {
                Ok(0) => {
                    error!("socket closed while writing");
                    break;
                }
                Ok(written) => written,
                Err(err) => {
                    error!("write failed: {err}");
                    break;
                }
            },
            _ = quit_rx.wait_for(|quit| *quit) => break,
        };

        let mut queue = shared.queue.lock().unwrap();
        if consume_written(&mut queue, written) {
            let _ = shared.idle_tx.send(true);
        }
    }

    shared.terminate();
}

/// Copy out up to WRITE_BATCH references from the front of the queue.
fn snapshot_batch(shared: &Shared) -> Option<(Vec<FramedMessage>, usize)> {
    let queue = shared.queue.lock().unwrap();
    if queue.frames.is_empty() {
        return None;
    }
    let batch: Vec<FramedMessage> = queue.frames.iter().take(WRITE_BATCH).cloned().collect();
    Some((batch, queue.start_offset))
}

/// Walk the queue by `written` bytes, popping fully-written frames.
/// Returns whether the queue is now empty.
fn consume_written(queue: &mut OutboundQueue, mut written: usize) -> bool {
    while written > 0 {
        let front = queue
            .frames
            .front()
            .expect("write completion without queued frames");
        let remaining = front.frame_len() - queue.start_offset;
        if written < remaining {
            queue.start_offset += written;
            debug!("partial write");
            break;
        }
        written -= remaining;
        queue.start_offset = 0;
        queue.frames.pop_front();
    }
    queue.frames.is_empty()
}
