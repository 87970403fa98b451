//! In-memory fakes for unit tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use kiln_core::domain::build::{BuildCommand, BuildResult, BuildStatus};
use kiln_core::dto::status::BuildStatusUpdate;

use crate::repository::{DeadLetterRepository, ObjectRepository, StatusRepository};
use crate::scheduler::consumer::InboundMessage;
use crate::service::{ArtifactService, BuildService, ProgressSink};

/// A well-formed command for a static site with artifact `art-1`
pub fn sample_command(id: &str) -> BuildCommand {
    BuildCommand {
        id: id.to_string(),
        site_id: "site-1".to_string(),
        repository_url: "https://example.com/site.git".to_string(),
        branch: "main".to_string(),
        build_command: None,
        output_directory: String::new(),
        commit_sha: None,
        triggered_by: "test".to_string(),
        status: BuildStatus::Queued,
        created_at: chrono::Utc::now(),
        artifact_id: Some("art-1".to_string()),
    }
}

/// Ordered record of side effects shared between fakes
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

pub struct MemoryStatusRepository {
    log: EventLog,
    updates: Mutex<Vec<BuildStatusUpdate>>,
    fail: bool,
}

impl MemoryStatusRepository {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            updates: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing(log: EventLog) -> Self {
        Self {
            fail: true,
            ..Self::new(log)
        }
    }

    pub fn updates(&self) -> Vec<BuildStatusUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusRepository for MemoryStatusRepository {
    async fn publish(&self, update: &BuildStatusUpdate) -> Result<()> {
        if self.fail {
            anyhow::bail!("results queue unavailable");
        }
        self.log
            .push(format!("status:{}:{}", update.status, update.build_id));
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}

pub struct MemoryDeadLetterRepository {
    log: EventLog,
    letters: Mutex<Vec<(String, Vec<u8>)>>,
    fail: bool,
}

impl MemoryDeadLetterRepository {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            letters: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing(log: EventLog) -> Self {
        Self {
            fail: true,
            ..Self::new(log)
        }
    }

    pub fn letters(&self) -> Vec<(String, Vec<u8>)> {
        self.letters.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterRepository for MemoryDeadLetterRepository {
    async fn dead_letter(&self, routing_key: &str, body: &[u8]) -> Result<()> {
        if self.fail {
            anyhow::bail!("dead-letter exchange unavailable");
        }
        self.log.push(format!("dead-letter:{}", routing_key));
        self.letters
            .lock()
            .unwrap()
            .push((routing_key.to_string(), body.to_vec()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

pub struct MemoryObjectRepository {
    bucket: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    fail: bool,
}

impl MemoryObjectRepository {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::new(HashMap::new()),
            fail: false,
        }
    }

    pub fn failing(bucket: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(bucket)
        }
    }

    pub fn objects(&self) -> HashMap<String, StoredObject> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectRepository for MemoryObjectRepository {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        if self.fail {
            anyhow::bail!("object store unavailable while writing {}", key);
        }
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}

/// One observed upload: the artifact id and the files present at that time
#[derive(Debug, Clone)]
pub struct ArtifactCall {
    pub artifact_id: String,
    pub files: Vec<String>,
}

#[derive(Default)]
pub struct RecordingArtifactService {
    calls: Mutex<Vec<ArtifactCall>>,
    failure: Option<String>,
}

impl RecordingArtifactService {
    pub fn failing(message: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failure: Some(message.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<ArtifactCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactService for RecordingArtifactService {
    async fn upload(&self, root: &Path, artifact_id: &str) -> Result<String> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    let relative = path.strip_prefix(root)?;
                    files.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        files.sort();

        self.calls.lock().unwrap().push(ArtifactCall {
            artifact_id: artifact_id.to_string(),
            files,
        });

        match &self.failure {
            Some(message) => Err(anyhow::anyhow!("{}", message)),
            None => Ok(format!("s3://test-bucket/{}/", artifact_id)),
        }
    }
}

#[derive(Default)]
pub struct RecordingProgressSink {
    stages: Mutex<Vec<String>>,
    lines: Mutex<Vec<String>>,
}

impl RecordingProgressSink {
    pub fn stages(&self) -> Vec<String> {
        self.stages.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn stage(&self, _build_id: &str, message: &str) {
        self.stages.lock().unwrap().push(message.to_string());
    }

    fn output(&self, _build_id: &str, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// How `FakeBuildService` answers
#[derive(Debug, Clone, Copy)]
pub enum BuildBehaviour {
    Succeed,
    Fail,
    Error,
    Panic,
}

pub struct FakeBuildService {
    behaviour: BuildBehaviour,
    log: EventLog,
}

impl FakeBuildService {
    pub fn new(behaviour: BuildBehaviour, log: EventLog) -> Self {
        Self { behaviour, log }
    }
}

#[async_trait]
impl BuildService for FakeBuildService {
    async fn execute(&self, command: &BuildCommand) -> Result<BuildResult> {
        self.log.push(format!("build:{}", command.id));
        match self.behaviour {
            BuildBehaviour::Succeed => Ok(BuildResult::succeeded(format!(
                "s3://test-bucket/{}/",
                command.artifact().unwrap_or("none")
            ))),
            BuildBehaviour::Fail => Ok(BuildResult::failed_with_log(
                "build failed (exit 1)",
                "npm ERR!",
            )),
            BuildBehaviour::Error => anyhow::bail!("disk full"),
            BuildBehaviour::Panic => panic!("pipeline bug"),
        }
    }
}

/// Inbound message recording its settlement in the shared log
pub struct FakeMessage {
    tag: u64,
    body: Vec<u8>,
    routing_key: String,
    redelivered: bool,
    log: EventLog,
}

impl FakeMessage {
    pub fn new(tag: u64, body: impl Into<Vec<u8>>, log: EventLog) -> Self {
        Self {
            tag,
            body: body.into(),
            routing_key: "build.commands".to_string(),
            redelivered: false,
            log,
        }
    }

    pub fn command(tag: u64, command: &BuildCommand, log: EventLog) -> Self {
        Self::new(tag, serde_json::to_vec(command).unwrap(), log)
    }

    /// Marks the message as a second delivery
    pub fn as_redelivery(mut self) -> Self {
        self.redelivered = true;
        self
    }
}

#[async_trait]
impl InboundMessage for FakeMessage {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn routing_key(&self) -> &str {
        &self.routing_key
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(&self) -> Result<()> {
        self.log.push(format!("ack:{}", self.tag));
        Ok(())
    }

    async fn requeue(&self) -> Result<()> {
        self.log.push(format!("requeue:{}", self.tag));
        Ok(())
    }
}
