//! Shared test doubles: a scripted in-memory sandbox runtime and a canned
//! job queue.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use crawlmux::{CrawlJob, ExecOutput, JobQueue, QueueError, RuntimeError, SandboxRuntime, WorkUnit};

pub const TEST_IMAGE: &str = "spiders:test";

/// Scripted behavior of one work unit inside the fake runtime, keyed by the
/// entry-file argument it is launched with.
#[derive(Debug, Clone)]
pub struct UnitScript {
    /// The instance reports running until this much time has elapsed.
    pub run_for: Duration,
    /// Standard output once finished.
    pub stdout: String,
    /// In-environment filesystem visible to `read_file`.
    pub files: HashMap<String, Vec<u8>>,
}

impl UnitScript {
    pub fn new(run_for: Duration, stdout: impl Into<String>) -> Self {
        Self {
            run_for,
            stdout: stdout.into(),
            files: HashMap::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), bytes.into());
        self
    }
}

#[derive(Debug)]
struct Instance {
    script: UnitScript,
    started: Instant,
    killed: bool,
}

impl Instance {
    fn finished(&self) -> bool {
        self.killed || self.started.elapsed() >= self.script.run_for
    }
}

/// In-memory [`SandboxRuntime`] driven entirely by [`UnitScript`]s.
#[derive(Default)]
pub struct FakeRuntime {
    scripts: Mutex<HashMap<String, UnitScript>>,
    instances: Mutex<HashMap<String, Instance>>,
    discovery: Mutex<HashMap<String, ExecOutput>>,
    next_id: AtomicUsize,
    /// Peak number of simultaneously-running (not finished, not killed)
    /// instances, observed at launch time.
    pub max_running: AtomicUsize,
    /// Entry-file arguments in launch order.
    pub launch_order: Mutex<Vec<String>>,
    /// Contexts that were forcibly killed.
    pub kills: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the behavior of the unit launched with `entry_file`.
    pub fn script(&self, entry_file: impl Into<String>, script: UnitScript) {
        self.scripts.lock().unwrap().insert(entry_file.into(), script);
    }

    /// Script the introspection result for `image`.
    pub fn discovery(&self, image: impl Into<String>, output: ExecOutput) {
        self.discovery.lock().unwrap().insert(image.into(), output);
    }

    /// Number of instances launched so far.
    pub fn launches(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    fn unknown(context: &str) -> RuntimeError {
        RuntimeError::CommandFailed {
            exit_code: 1,
            stderr: format!("no such container: {context}"),
        }
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    async fn run_to_completion(
        &self,
        image: &str,
        _args: &[String],
    ) -> Result<ExecOutput, RuntimeError> {
        self.discovery
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .ok_or_else(|| RuntimeError::CommandFailed {
                exit_code: 125,
                stderr: format!("no such image: {image}"),
            })
    }

    async fn launch(&self, _image: &str, args: &[String]) -> Result<String, RuntimeError> {
        let entry_file = args.first().cloned().unwrap_or_default();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&entry_file)
            .cloned()
            .ok_or_else(|| RuntimeError::CommandFailed {
                exit_code: 127,
                stderr: format!("no script for entry file '{entry_file}'"),
            })?;

        let id = format!("ctx-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut instances = self.instances.lock().unwrap();
        instances.insert(
            id.clone(),
            Instance {
                script,
                started: Instant::now(),
                killed: false,
            },
        );
        let running_now = instances.values().filter(|i| !i.finished()).count();
        self.max_running.fetch_max(running_now, Ordering::SeqCst);
        self.launch_order.lock().unwrap().push(entry_file);
        Ok(id)
    }

    async fn is_running(&self, context: &str) -> Result<bool, RuntimeError> {
        let instances = self.instances.lock().unwrap();
        let instance = instances.get(context).ok_or_else(|| Self::unknown(context))?;
        Ok(!instance.finished())
    }

    async fn kill(&self, context: &str) -> Result<(), RuntimeError> {
        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .get_mut(context)
            .ok_or_else(|| Self::unknown(context))?;
        instance.killed = true;
        self.kills.lock().unwrap().push(context.to_string());
        Ok(())
    }

    async fn stdout(&self, context: &str) -> Result<String, RuntimeError> {
        let instances = self.instances.lock().unwrap();
        let instance = instances.get(context).ok_or_else(|| Self::unknown(context))?;
        if instance.killed {
            // Killed before it could print its result document.
            Ok(String::new())
        } else {
            Ok(instance.script.stdout.clone())
        }
    }

    async fn read_file(&self, context: &str, path: &str) -> Result<Vec<u8>, RuntimeError> {
        let instances = self.instances.lock().unwrap();
        let instance = instances.get(context).ok_or_else(|| Self::unknown(context))?;
        instance
            .script
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| RuntimeError::CommandFailed {
                exit_code: 1,
                stderr: format!("no such file: {path}"),
            })
    }

    async fn remove(&self, context: &str) -> Result<(), RuntimeError> {
        self.instances
            .lock()
            .unwrap()
            .remove(context)
            .map(|_| ())
            .ok_or_else(|| Self::unknown(context))
    }
}

/// In-memory [`JobQueue`] with canned jobs.
#[derive(Default)]
pub struct FakeQueue {
    jobs: Mutex<VecDeque<CrawlJob>>,
    /// Receipts of deleted jobs, in deletion order.
    pub deleted: Mutex<Vec<String>>,
    /// Total number of `read_one` calls.
    pub polls: AtomicUsize,
}

impl FakeQueue {
    pub fn new(jobs: Vec<CrawlJob>) -> Self {
        Self {
            jobs: Mutex::new(jobs.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl JobQueue for FakeQueue {
    async fn read_one(&self) -> Result<Option<CrawlJob>, QueueError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.jobs.lock().unwrap().pop_front())
    }

    async fn delete(&self, job: &CrawlJob) -> Result<(), QueueError> {
        self.deleted.lock().unwrap().push(job.receipt.clone());
        Ok(())
    }
}

/// A work unit targeting [`TEST_IMAGE`] with a conventional entry file.
pub fn unit(id: &str) -> WorkUnit {
    WorkUnit::new(id, TEST_IMAGE, entry_file(id))
}

/// The entry file `unit(id)` is launched with.
pub fn entry_file(id: &str) -> String {
    format!("/app/spiders/{id}.js")
}

/// A well-formed success output document.
pub fn success_stdout() -> String {
    json!({
        "_metadata": { "status": { "code": 0 } },
        "pagesCrawled": 3
    })
    .to_string()
}

/// A well-formed output document relaying a failure status.
pub fn failure_stdout(code: i64, message: &str) -> String {
    json!({
        "_metadata": { "status": { "code": code, "message": message } }
    })
    .to_string()
}

/// A crawl job for `spider` with a unique receipt.
pub fn job(receipt: &str, spider: &str) -> CrawlJob {
    CrawlJob {
        receipt: receipt.to_string(),
        spider: spider.to_string(),
        params: serde_json::Map::new(),
    }
}

/// An introspection result that exits zero with `stdout`.
pub fn discovery_output(stdout: impl Into<String>) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    }
}
