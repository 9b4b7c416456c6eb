//! In-memory stand-ins for Postgres so handlers and the import flow can be
//! driven end to end in tests.

use crate::{
    auth::TokenSource,
    config::{ApiConfig, DEFAULT_EMAIL_DOMAIN, DEFAULT_MAX_CANVAS_ITERATIONS, RuntimeConfiguration},
    data::{Page, queue::QueueEntry, store::IntakeStore},
    error::{IntakeError, IntakeResult},
    provisioning::{CanvasStep, ImportOptions, StudentProvisioner},
    state::IntakeState,
};
use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex};

pub const TEST_TOKEN: &str = "test-token-123";

pub fn body(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    queued: Mutex<Vec<(String, String)>>,
    students: Vec<Value>,
    users: Vec<Value>,
    failing_user_id: Option<String>,
}

impl MemoryStore {
    pub fn queued_user_ids(&self) -> Vec<String> {
        self.queued
            .lock()
            .unwrap()
            .iter()
            .map(|(user_id, _)| user_id.clone())
            .collect()
    }

    fn queued_for(&self, sheet_name: &str) -> u64 {
        self.queued
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, sheet)| sheet == sheet_name)
            .count() as u64
    }
}

fn page_of(rows: &[Value], page: Page) -> Vec<Value> {
    rows.iter()
        .skip(usize::try_from(page.offset).unwrap())
        .take(usize::try_from(page.limit).unwrap())
        .cloned()
        .collect()
}

#[async_trait]
impl IntakeStore for MemoryStore {
    async fn insert_queue_entry(&self, entry: &QueueEntry) -> IntakeResult<()> {
        if self.failing_user_id.as_deref() == Some(entry.user_id.as_str()) {
            return Err(IntakeError::MakeQuery {
                source: sqlx::Error::Protocol("duplicate key value".into()),
            });
        }

        self.queued
            .lock()
            .unwrap()
            .push((entry.user_id.clone(), entry.sheet_name.clone()));
        Ok(())
    }

    async fn student_rows(&self, page: Page) -> IntakeResult<Vec<Value>> {
        Ok(page_of(&self.students, page))
    }

    async fn user_rows(&self, page: Page) -> IntakeResult<Vec<Value>> {
        Ok(page_of(&self.users, page))
    }
}

/// Records every call and answers from the [`MemoryStore`]'s queue.
pub struct RecordingProvisioner {
    store: Arc<MemoryStore>,
    calls: Mutex<Vec<String>>,
    canvas_pending: Mutex<u64>,
    never_finish: bool,
}

impl RecordingProvisioner {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl StudentProvisioner for RecordingProvisioner {
    async fn close_directory(&self) -> IntakeResult<()> {
        self.record("close_directory");
        Ok(())
    }

    async fn create_accounts(&self, sheet_name: &str, options: ImportOptions) -> IntakeResult<u64> {
        let flags = options
            .iter_names()
            .map(|(name, _)| name)
            .collect::<Vec<_>>()
            .join(" | ");
        self.record(format!("create_accounts {sheet_name} {flags}"));
        Ok(self.store.queued_for(sheet_name))
    }

    async fn queue_active_directory_imports(&self, sheet_name: &str) -> IntakeResult<u64> {
        self.record(format!("queue_active_directory_imports {sheet_name}"));
        Ok(self.store.queued_for(sheet_name))
    }

    async fn queue_canvas_imports(&self, sheet_name: &str) -> IntakeResult<u64> {
        self.record(format!("queue_canvas_imports {sheet_name}"));
        let queued = self.store.queued_for(sheet_name);
        *self.canvas_pending.lock().unwrap() += queued;
        Ok(queued)
    }

    async fn process_canvas_student(&self) -> IntakeResult<CanvasStep> {
        self.record("process_canvas_student");
        if self.never_finish {
            return Ok(CanvasStep::Progressed("Processed DONE1 (no more classes)".into()));
        }

        let mut pending = self.canvas_pending.lock().unwrap();
        Ok(if *pending == 0 {
            CanvasStep::Finished("Canvas queue empty".into())
        } else {
            *pending -= 1;
            CanvasStep::Progressed("Processed one student".into())
        })
    }
}

#[derive(Default)]
struct Knobs {
    failing_user_id: Option<String>,
    student_rows: i64,
    user_rows: i64,
    max_canvas_iterations: Option<u32>,
    never_finish: bool,
    missing_token_file: bool,
}

pub struct TestHarness {
    pub state: IntakeState,
    pub store: Arc<MemoryStore>,
    pub provisioner: Arc<RecordingProvisioner>,
    knobs: Knobs,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::from_knobs(Knobs::default())
    }

    pub fn with_max_canvas_iterations(max_canvas_iterations: u32) -> Self {
        Self::from_knobs(Knobs {
            max_canvas_iterations: Some(max_canvas_iterations),
            ..Knobs::default()
        })
    }

    pub fn with_missing_token_file() -> Self {
        Self::from_knobs(Knobs {
            missing_token_file: true,
            ..Knobs::default()
        })
    }

    #[must_use]
    pub fn never_finishing_canvas(self) -> Self {
        self.tweak(|knobs| knobs.never_finish = true)
    }

    #[must_use]
    pub fn failing_insert_for(self, user_id: &str) -> Self {
        self.tweak(|knobs| knobs.failing_user_id = Some(user_id.to_string()))
    }

    #[must_use]
    pub fn with_student_rows(self, count: i64) -> Self {
        self.tweak(|knobs| knobs.student_rows = count)
    }

    #[must_use]
    pub fn with_user_rows(self, count: i64) -> Self {
        self.tweak(|knobs| knobs.user_rows = count)
    }

    fn tweak(mut self, change: impl FnOnce(&mut Knobs)) -> Self {
        change(&mut self.knobs);
        Self::from_knobs(self.knobs)
    }

    fn from_knobs(knobs: Knobs) -> Self {
        let store = Arc::new(MemoryStore {
            queued: Mutex::default(),
            students: (1..=knobs.student_rows)
                .map(|id| json!({"id": id, "user_id": format!("S{id}"), "import_classes": ""}))
                .collect(),
            users: (1..=knobs.user_rows)
                .map(|id| {
                    json!({
                        "id": id,
                        "email": format!("s{id}@{DEFAULT_EMAIL_DOMAIN}"),
                        "first_name": "Jane",
                        "last_name": "Doe"
                    })
                })
                .collect(),
            failing_user_id: knobs.failing_user_id.clone(),
        });
        let provisioner = Arc::new(RecordingProvisioner {
            store: store.clone(),
            calls: Mutex::default(),
            canvas_pending: Mutex::default(),
            never_finish: knobs.never_finish,
        });

        let token_source = if knobs.missing_token_file {
            TokenSource::File(
                std::env::temp_dir().join(format!("intake-no-such-token-{}.txt", uuid::Uuid::new_v4())),
            )
        } else {
            TokenSource::Fixed(SecretString::from(TEST_TOKEN))
        };

        let config = RuntimeConfiguration::for_tests(ApiConfig {
            token_source,
            student_email_domain: DEFAULT_EMAIL_DOMAIN.to_string(),
            max_canvas_iterations: knobs
                .max_canvas_iterations
                .unwrap_or(DEFAULT_MAX_CANVAS_ITERATIONS),
            run_migrations: false,
        });

        Self {
            state: IntakeState::from_parts(store.clone(), provisioner.clone(), config),
            store,
            provisioner,
            knobs,
        }
    }
}
