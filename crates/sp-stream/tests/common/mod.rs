//! Shared fixtures for session tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sp_av::{DecodeJob, Decoder, DecoderHandle};
use sp_core::{Error, Result, Segment};
use sp_stream::{ChunkSource, SourceOpener};

/// In-process decoder: reads each pipe to EOF on its own thread, records the
/// bytes and a log of `start i` / `eof i` / `finish i` lines.
#[derive(Clone, Default)]
pub struct RecordingDecoder {
    state: Arc<RecorderState>,
}

#[derive(Default)]
struct RecorderState {
    stream: Mutex<Vec<u8>>,
    per_segment: Mutex<HashMap<usize, Vec<u8>>>,
    log: Mutex<Vec<String>>,
    fail_on: Mutex<Option<usize>>,
    holds: Mutex<HashMap<usize, mpsc::Receiver<()>>>,
    finish_delay: Mutex<Duration>,
}

impl RecordingDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to start for segment `index`.
    pub fn fail_on(self, index: usize) -> Self {
        *self.state.fail_on.lock() = Some(index);
        self
    }

    /// Pause between EOF and the finish signal.
    pub fn finish_delay(self, delay: Duration) -> Self {
        *self.state.finish_delay.lock() = delay;
        self
    }

    /// Hold segment `index`'s finish signal until the returned sender fires
    /// (or is dropped).
    pub fn hold(&self, index: usize) -> mpsc::Sender<()> {
        let (tx, rx) = mpsc::channel();
        self.state.holds.lock().insert(index, rx);
        tx
    }

    pub fn stream(&self) -> Vec<u8> {
        self.state.stream.lock().clone()
    }

    pub fn segment_bytes(&self, index: usize) -> Vec<u8> {
        self.state
            .per_segment
            .lock()
            .get(&index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.log.lock().clone()
    }

    /// Poll until a log line appears.
    pub async fn wait_for_log(&self, line: &str) {
        for _ in 0..500 {
            if self.log().iter().any(|l| l == line) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("log line {line:?} never appeared; log = {:?}", self.log());
    }
}

struct RecordingHandle {
    stop: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

impl DecoderHandle for RecordingHandle {
    fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Decoder for RecordingDecoder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn start(&self, job: DecodeJob) -> Result<Box<dyn DecoderHandle>> {
        let index = job.index;
        if *self.state.fail_on.lock() == Some(index) {
            return Err(Error::decoder_start("recorder", format!("refusing segment {index}")));
        }
        self.state.log.lock().push(format!("start {index}"));

        let stop = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let hold = self.state.holds.lock().remove(&index);
        let delay = *self.state.finish_delay.lock();
        let state = Arc::clone(&self.state);
        let (stop_flag, done_flag) = (Arc::clone(&stop), Arc::clone(&done));

        std::thread::spawn(move || {
            let mut input = job.input.into_file();
            let mut buf = [0u8; 8192];
            let mut received = Vec::new();
            while !stop_flag.load(Ordering::Acquire) {
                match input.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                }
            }
            drop(input);

            state.stream.lock().extend_from_slice(&received);
            state.per_segment.lock().insert(index, received);
            state.log.lock().push(format!("eof {index}"));

            if let Some(hold) = hold {
                let _ = hold.recv();
            }
            std::thread::sleep(delay);

            state.log.lock().push(format!("finish {index}"));
            done_flag.store(true, Ordering::Release);
            job.finished.notify();
        });

        Ok(Box::new(RecordingHandle { stop, done }))
    }
}

/// Serves in-memory segment bodies split into irregular chunk sizes.
#[derive(Clone, Default)]
pub struct MemoryOpener {
    bodies: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    opened: Arc<Mutex<Vec<String>>>,
}

const CHUNK_PATTERN: [usize; 7] = [1, 4096, 7, 65_536, 333, 12_289, 100_003];

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(self, file_name: &str, body: Vec<u8>) -> Self {
        self.bodies.lock().insert(file_name.to_string(), body);
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

struct MemorySource {
    data: Bytes,
    step: usize,
}

#[async_trait]
impl ChunkSource for MemorySource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let size = CHUNK_PATTERN[self.step % CHUNK_PATTERN.len()].min(self.data.len());
        self.step += 1;
        Ok(Some(self.data.split_to(size)))
    }
}

#[async_trait]
impl SourceOpener for MemoryOpener {
    async fn open(&self, segment: &Segment) -> Result<Box<dyn ChunkSource>> {
        self.opened.lock().push(segment.file_name.clone());
        let body = self
            .bodies
            .lock()
            .get(&segment.file_name)
            .cloned()
            .ok_or_else(|| Error::source_read(&segment.file_name, "no such body"))?;
        Ok(Box::new(MemorySource {
            data: Bytes::from(body),
            step: 0,
        }))
    }
}

/// A source that never ends: 1 KiB every few milliseconds.
#[derive(Clone, Default)]
pub struct EndlessOpener;

struct EndlessSource;

#[async_trait]
impl ChunkSource for EndlessSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(Some(Bytes::from(vec![0xAB; 1024])))
    }
}

#[async_trait]
impl SourceOpener for EndlessOpener {
    async fn open(&self, _segment: &Segment) -> Result<Box<dyn ChunkSource>> {
        Ok(Box::new(EndlessSource))
    }
}

/// Deterministic pseudo-random bytes (xorshift).
pub fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
    let mut x = seed | 1;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            (x >> 24) as u8
        })
        .collect()
}

/// Remote-looking segments named `seg-<i>.flv`.
pub fn segments(count: usize) -> Vec<Segment> {
    (0..count)
        .map(|i| Segment::remote(i as u32, format!("http://cdn.example.com/seg-{i}.flv"), format!("seg-{i}.flv")))
        .collect()
}
