//! Fake collaborators and builders

use async_trait::async_trait;
use hwreg_common::events::EventBus;
use hwreg_upload::models::{IdentityRecord, PollSettings, RunDefaults, ScanSettings};
use hwreg_upload::services::{
    LocalIdentity, LocalIdentityError, LocalIdentitySource, Pipeline, RecordSource, Sleeper,
    StaticCredentialProvider, UploadEngine, UploadSupervisor,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::FakeRegistry;

/// Returns immediately and remembers every requested delay
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.sleeps.lock().unwrap().len()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Never wakes up; only cancellation gets a poll loop past it
pub struct HangingSleeper;

#[async_trait]
impl Sleeper for HangingSleeper {
    async fn sleep(&self, _duration: Duration) {
        std::future::pending::<()>().await;
    }
}

/// Local identity source with a fixed answer
pub struct FixedIdentitySource {
    identity: Option<LocalIdentity>,
}

impl FixedIdentitySource {
    pub fn new(serial: Option<&str>, product_key: Option<&str>, fingerprint: Option<&str>) -> Self {
        Self {
            identity: Some(LocalIdentity {
                serial: serial.map(str::to_string),
                product_key: product_key.map(str::to_string),
                fingerprint: fingerprint.map(str::to_string),
            }),
        }
    }

    pub fn unavailable() -> Self {
        Self { identity: None }
    }
}

#[async_trait]
impl LocalIdentitySource for FixedIdentitySource {
    async fn get_local_identity(&self) -> Result<LocalIdentity, LocalIdentityError> {
        self.identity.clone().ok_or(LocalIdentityError::NotConfigured)
    }
}

pub fn record(serial: &str, fingerprint: &str) -> IdentityRecord {
    IdentityRecord::new(serial, fingerprint)
}

pub fn poll_settings() -> PollSettings {
    PollSettings {
        interval: Duration::from_secs(15),
        max_attempts: 20,
    }
}

pub fn build_engine(
    registry: Arc<FakeRegistry>,
    sleeper: Arc<dyn Sleeper>,
    events: EventBus,
) -> UploadEngine {
    UploadEngine::new(registry, sleeper, poll_settings(), ScanSettings::default(), events)
}

/// Supervisor wired to fakes, with handles to inspect them
pub struct TestSupervisor {
    pub supervisor: UploadSupervisor,
    pub registry: Arc<FakeRegistry>,
    pub credentials: Arc<StaticCredentialProvider>,
    pub events: EventBus,
}

pub fn build_supervisor(
    registry: Arc<FakeRegistry>,
    sleeper: Arc<dyn Sleeper>,
    identity: FixedIdentitySource,
    work_folder: &Path,
) -> TestSupervisor {
    let events = EventBus::new(1024);
    let credentials = Arc::new(StaticCredentialProvider::new(Some("test-token".to_string())));
    let engine = build_engine(Arc::clone(&registry), sleeper, events.clone());
    let source = RecordSource::new(Arc::new(identity), work_folder.to_path_buf());
    let pipeline = Pipeline::new(credentials.clone(), source, engine, events.clone());

    TestSupervisor {
        supervisor: UploadSupervisor::new(
            pipeline,
            events.clone(),
            RunDefaults::default(),
            Duration::from_secs(5),
        ),
        registry,
        credentials,
        events,
    }
}
