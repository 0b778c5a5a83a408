//! Serialized access to the single synthesis engine.
//!
//! A dedicated worker thread owns the engine outright; submissions travel
//! over a FIFO channel and replies come back on per-request oneshots.
//! Ownership is the exclusion gate: at most one `synthesize` call can ever
//! be in flight, and the gate is never held across socket I/O because the
//! worker does no socket I/O at all.
//!
//! Cancellation is cooperative. Dropping the reply handle abandons a
//! request; a job found abandoned when dequeued never reaches the engine,
//! while a call already executing runs to completion and its result is
//! discarded.

use std::sync::mpsc;
use std::thread;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use rigel_engine::{AudioResult, EngineError, SynthesisEngine};

/// One unit of work for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("synthesis worker is gone")]
    SchedulerGone,
}

struct Job {
    request: SynthesisRequest,
    reply: oneshot::Sender<Result<AudioResult, EngineError>>,
}

/// Submission handle; clone one per connection.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::Sender<Job>,
}

/// The pending reply for one submitted request. Dropping it abandons the
/// request.
pub struct Pending {
    rx: oneshot::Receiver<Result<AudioResult, EngineError>>,
}

impl Pending {
    pub async fn wait(self) -> Result<AudioResult, SubmitError> {
        match self.rx.await {
            Ok(Ok(audio)) => Ok(audio),
            Ok(Err(e)) => Err(SubmitError::Engine(e)),
            Err(_) => Err(SubmitError::SchedulerGone),
        }
    }
}

impl Scheduler {
    /// Move the engine onto its worker thread and start draining jobs.
    pub fn spawn(engine: Box<dyn SynthesisEngine>) -> std::io::Result<Scheduler> {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("synthesis".into())
            .spawn(move || worker(engine, rx))?;
        Ok(Scheduler { tx })
    }

    /// Queue a request. Strict submission order, no priorities, no
    /// preemption.
    pub fn submit(&self, request: SynthesisRequest) -> Pending {
        let (reply, rx) = oneshot::channel();
        // A send error means the worker is gone; the dropped reply sender
        // then surfaces as SchedulerGone on wait.
        let _ = self.tx.send(Job { request, reply });
        Pending { rx }
    }
}

fn worker(mut engine: Box<dyn SynthesisEngine>, rx: mpsc::Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        if job.reply.is_closed() {
            // the owning connection went away while this job was queued
            debug!(chars = job.request.text.len(), "dropping abandoned request");
            continue;
        }
        let result = engine.synthesize(&job.request.text, job.request.voice.as_deref());
        if let Err(e) = &result {
            warn!(error = %e, "synthesis failed");
        }
        // the receiver may have gone away mid-call; the result is discarded
        let _ = job.reply.send(result);
    }
    debug!("synthesis worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use rigel_engine::EngineInfo;
    use rigel_protocol::AudioFormat;

    const FORMAT: AudioFormat = AudioFormat {
        rate: 22050,
        width: 16,
        channels: 1,
    };

    /// Instrumented fake: records call order, detects re-entrancy, and can
    /// block each call until the test releases it.
    struct FakeEngine {
        calls: Arc<Mutex<Vec<String>>>,
        busy: Arc<AtomicBool>,
        overlaps: Arc<AtomicUsize>,
        release: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
        fail: bool,
    }

    impl FakeEngine {
        fn new(calls: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                calls,
                busy: Arc::new(AtomicBool::new(false)),
                overlaps: Arc::new(AtomicUsize::new(0)),
                release: None,
                fail: false,
            }
        }
    }

    impl SynthesisEngine for FakeEngine {
        fn info(&self) -> EngineInfo {
            EngineInfo {
                voices: vec![],
                format: FORMAT,
            }
        }

        fn synthesize(
            &mut self,
            text: &str,
            _voice: Option<&str>,
        ) -> Result<AudioResult, EngineError> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            self.calls.lock().unwrap().push(text.to_string());
            if let Some(release) = &self.release {
                release.lock().unwrap().recv().unwrap();
            } else {
                thread::sleep(Duration::from_millis(2));
            }
            self.busy.store(false, Ordering::SeqCst);
            if self.fail {
                return Err(EngineError::Synthesis("boom".into()));
            }
            Ok(AudioResult {
                pcm: text.as_bytes().to_vec(),
                format: FORMAT,
            })
        }
    }

    fn request(text: &str) -> SynthesisRequest {
        SynthesisRequest {
            text: text.into(),
            voice: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn engine_calls_never_overlap() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine = FakeEngine::new(calls.clone());
        let overlaps = engine.overlaps.clone();
        let scheduler = Scheduler::spawn(Box::new(engine)).unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                scheduler.submit(request(&format!("req {i}"))).wait().await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(calls.lock().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn requests_reach_the_engine_in_submission_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let scheduler = Scheduler::spawn(Box::new(FakeEngine::new(calls.clone()))).unwrap();

        let a = scheduler.submit(request("a"));
        let b = scheduler.submit(request("b"));
        let c = scheduler.submit(request("c"));
        a.wait().await.unwrap();
        b.wait().await.unwrap();
        c.wait().await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn abandoned_queued_request_never_reaches_the_engine() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (release_tx, release_rx) = mpsc::channel();
        let mut engine = FakeEngine::new(calls.clone());
        engine.release = Some(Arc::new(Mutex::new(release_rx)));
        let scheduler = Scheduler::spawn(Box::new(engine)).unwrap();

        // first request holds the engine while the others queue behind it
        let first = scheduler.submit(request("first"));
        while calls.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let abandoned = scheduler.submit(request("abandoned"));
        let bystander = scheduler.submit(request("bystander"));
        drop(abandoned);

        release_tx.send(()).unwrap(); // finish "first"
        release_tx.send(()).unwrap(); // finish "bystander"
        first.wait().await.unwrap();
        let audio = bystander.wait().await.unwrap();

        assert_eq!(audio.pcm, b"bystander");
        assert_eq!(*calls.lock().unwrap(), vec!["first", "bystander"]);
    }

    #[tokio::test]
    async fn engine_failure_reaches_only_the_submitter() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut engine = FakeEngine::new(calls.clone());
        engine.fail = true;
        let scheduler = Scheduler::spawn(Box::new(engine)).unwrap();

        let err = scheduler.submit(request("doomed")).wait().await;
        assert!(matches!(err, Err(SubmitError::Engine(_))));

        // the engine stays in service for the next request
        let err = scheduler.submit(request("also doomed")).wait().await;
        assert!(matches!(err, Err(SubmitError::Engine(_))));
        assert_eq!(calls.lock().unwrap().len(), 2);
    }
}
