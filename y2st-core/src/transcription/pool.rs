//! Bounded worker pool over a shared [`ModelHandle`], enforcing FIFO release
//! order per `stream_id` while letting workers complete jobs out of order.
//! Jobs are pulled across streams in round robin, so one stream filling the
//! queue can't starve another's turnaround.
//!
//! New machinery the reference engine doesn't need (it has one model, one
//! stream) but built on the same `Arc<Mutex<dyn SpeechModel>>` handle-sharing
//! idiom as `ModelHandle`. Dispatch is a hand-rolled bounded MPMC queue rather
//! than `crossbeam-channel`, since a plain channel only offers arrival order;
//! round robin needs one queue per stream plus a shared cursor.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;

use super::ModelHandle;
use crate::error::TranscriptionError;
use crate::types::{Segment, Transcription};

type Reply = oneshot::Sender<Result<Transcription, TranscriptionError>>;

struct Job {
    stream_id: String,
    seq: u64,
    segment: Segment,
    language_hint: Option<String>,
}

#[derive(Default)]
struct StreamQueue {
    order: VecDeque<u64>,
    waiting: HashMap<u64, Reply>,
    completed: HashMap<u64, Result<Transcription, TranscriptionError>>,
}

/// Per-stream pending job queues plus a round-robin cursor over which
/// streams currently have work. `pop` always advances to the next stream in
/// `cursor`, so a stream that keeps submitting doesn't get pulled twice in a
/// row while another stream's job sits waiting.
#[derive(Default)]
struct Dispatch {
    pending: HashMap<String, VecDeque<Job>>,
    cursor: VecDeque<String>,
    len: usize,
    closed: bool,
}

impl Dispatch {
    fn push(&mut self, job: Job) {
        let stream_id = job.stream_id.clone();
        let queue = self.pending.entry(stream_id.clone()).or_default();
        if queue.is_empty() {
            self.cursor.push_back(stream_id);
        }
        queue.push_back(job);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<Job> {
        let stream_id = self.cursor.pop_front()?;
        let queue = self.pending.get_mut(&stream_id)?;
        let job = queue.pop_front();
        if job.is_some() {
            self.len -= 1;
        }
        if queue.is_empty() {
            self.pending.remove(&stream_id);
        } else {
            self.cursor.push_back(stream_id);
        }
        job
    }
}

/// Bounded MPMC job queue dispatching across streams in round robin, in
/// place of a single arrival-ordered channel.
struct DispatchQueue {
    state: Mutex<Dispatch>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

impl DispatchQueue {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(Dispatch::default()),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Blocks the caller while the queue is at capacity, the backpressure
    /// path described for `VADSegmenter`/`MediaSource` upstream.
    fn send(&self, job: Job) {
        let mut state = self.state.lock();
        while state.len >= self.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return;
        }
        state.push(job);
        self.not_empty.notify_one();
    }

    fn recv(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if let Some(job) = state.pop() {
                self.not_full.notify_one();
                return Some(job);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

pub struct TranscriptionWorkerPool {
    dispatch: Arc<DispatchQueue>,
    queues: Arc<Mutex<HashMap<String, StreamQueue>>>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl TranscriptionWorkerPool {
    pub fn new(model: ModelHandle, workers: usize, queue_capacity: usize) -> Self {
        let dispatch = Arc::new(DispatchQueue::new(queue_capacity));
        let queues: Arc<Mutex<HashMap<String, StreamQueue>>> = Arc::new(Mutex::new(HashMap::new()));

        let handles = (0..workers.max(1))
            .map(|_| spawn_worker(model.clone(), Arc::clone(&dispatch), Arc::clone(&queues)))
            .collect();

        Self {
            dispatch,
            queues,
            workers: handles,
        }
    }

    /// Number of worker threads: 1 when a GPU device is declared, otherwise
    /// `min(4, available_cores)`.
    pub fn worker_count_for(gpu_declared: bool) -> usize {
        if gpu_declared {
            1
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(4)
        }
    }

    /// Enqueue a segment for transcription. Blocks the calling thread if the
    /// job queue is already at capacity. The returned receiver resolves once
    /// this segment's result is released in `seq` order for its stream.
    pub fn submit(
        &self,
        segment: Segment,
        language_hint: Option<String>,
    ) -> oneshot::Receiver<Result<Transcription, TranscriptionError>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let stream_id = segment.stream_id.clone();
        let seq = segment.seq;

        {
            let mut queues = self.queues.lock();
            let queue = queues.entry(stream_id.clone()).or_default();
            queue.order.push_back(seq);
            queue.waiting.insert(seq, reply_tx);
        }

        let job = Job {
            stream_id,
            seq,
            segment,
            language_hint,
        };
        // Closed only on shutdown; submit() is never called after that point.
        self.dispatch.send(job);
        reply_rx
    }
}

impl Drop for TranscriptionWorkerPool {
    fn drop(&mut self) {
        self.dispatch.close();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn spawn_worker(
    model: ModelHandle,
    dispatch: Arc<DispatchQueue>,
    queues: Arc<Mutex<HashMap<String, StreamQueue>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while let Some(job) = dispatch.recv() {
            let result = model
                .0
                .lock()
                .transcribe(&job.segment, job.language_hint.as_deref());
            release(&queues, &job.stream_id, job.seq, result);
        }
    })
}

/// Record a completed job and flush every reply whose `seq` is now the head
/// of its stream's submission order.
fn release(
    queues: &Mutex<HashMap<String, StreamQueue>>,
    stream_id: &str,
    seq: u64,
    result: Result<Transcription, TranscriptionError>,
) {
    let mut queues = queues.lock();
    let Some(queue) = queues.get_mut(stream_id) else {
        return;
    };
    queue.completed.insert(seq, result);

    while let Some(&front_seq) = queue.order.front() {
        let Some(result) = queue.completed.remove(&front_seq) else {
            break;
        };
        queue.order.pop_front();
        if let Some(reply) = queue.waiting.remove(&front_seq) {
            let _ = reply.send(result);
        }
    }

    if queue.order.is_empty() {
        queues.remove(stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::EchoModel;

    fn segment(stream_id: &str, seq: u64) -> Segment {
        Segment {
            stream_id: stream_id.to_string(),
            seq,
            start_ms: seq * 1000,
            end_ms: seq * 1000 + 500,
            pcm: vec![0u8; 16_000],
            language: None,
            preceding_silence_ms: None,
        }
    }

    fn job(stream_id: &str, seq: u64) -> Job {
        Job {
            stream_id: stream_id.to_string(),
            seq,
            segment: segment(stream_id, seq),
            language_hint: None,
        }
    }

    #[test]
    fn dispatch_pulls_round_robin_across_streams_not_arrival_order() {
        let mut dispatch = Dispatch::default();
        for seq in 0..5 {
            dispatch.push(job("a", seq));
        }
        dispatch.push(job("b", 0));

        // Plain FIFO would drain all five "a" jobs before ever touching "b".
        // Once both streams have pending work the cursor must alternate.
        assert_eq!(dispatch.pop().unwrap().stream_id, "a");
        assert_eq!(dispatch.pop().unwrap().stream_id, "b");
        assert_eq!(dispatch.pop().unwrap().stream_id, "a");
        assert_eq!(dispatch.pop().unwrap().stream_id, "a");
        assert_eq!(dispatch.pop().unwrap().stream_id, "a");
        assert_eq!(dispatch.pop().unwrap().stream_id, "a");
        assert!(dispatch.pop().is_none());
    }

    #[tokio::test]
    async fn results_for_one_stream_release_in_seq_order() {
        let pool = TranscriptionWorkerPool::new(ModelHandle::new(EchoModel::new()), 4, 8);

        let mut receivers = Vec::new();
        for seq in 0..20 {
            receivers.push(pool.submit(segment("s1", seq), None));
        }

        let mut seqs = Vec::new();
        for rx in receivers {
            let transcription = rx.await.unwrap().unwrap();
            seqs.push(transcription.seq);
        }
        assert_eq!(seqs, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn independent_streams_do_not_interfere() {
        let pool = TranscriptionWorkerPool::new(ModelHandle::new(EchoModel::new()), 2, 8);

        let a = pool.submit(segment("a", 0), None);
        let b = pool.submit(segment("b", 0), None);

        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap().unwrap().stream_id, "a");
        assert_eq!(rb.unwrap().unwrap().stream_id, "b");
    }
}
