//! In-memory service implementations for tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tally_client::{ObjectInfo, ResultSet};
use tally_core::domain::run::Run;
use uuid::Uuid;

use crate::context::RunContext;
use crate::error::{ErrorKind, StepError, StepResult};
use crate::service::{ChatSink, InMemoryLogBuffer, ObjectStore, Warehouse};

pub fn result_set(columns: &[&str], rows: &[&[&str]]) -> ResultSet {
    ResultSet {
        statement_handle: Uuid::new_v4().to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows: rows
            .iter()
            .map(|row| row.iter().map(|v| Some(v.to_string())).collect())
            .collect(),
    }
}

pub fn run_context(date: &str) -> RunContext {
    let run = Run::new(date.parse::<NaiveDate>().unwrap(), std::iter::empty()).unwrap();
    RunContext::new(&run, Arc::new(InMemoryLogBuffer::new()))
}

enum Reply {
    Rows(ResultSet),
    Error(StepError),
    Write(Arc<FakeStore>, String),
}

/// Records every statement; replies are picked by the first matching needle
#[derive(Default)]
pub struct FakeWarehouse {
    replies: Vec<(String, Reply)>,
    delay: Option<Duration>,
    executed: Mutex<Vec<String>>,
}

impl FakeWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, needle: &str, rows: ResultSet) -> Self {
        self.replies.push((needle.to_string(), Reply::Rows(rows)));
        self
    }

    pub fn fail(mut self, needle: &str, error: StepError) -> Self {
        self.replies.push((needle.to_string(), Reply::Error(error)));
        self
    }

    /// Simulates the warehouse writing `key` itself (stage unload)
    pub fn writes_object(mut self, needle: &str, store: Arc<FakeStore>, key: &str) -> Self {
        self.replies
            .push((needle.to_string(), Reply::Write(store, key.to_string())));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn execute(&self, sql: &str) -> StepResult<ResultSet> {
        self.executed.lock().unwrap().push(sql.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut rows = None;
        for (needle, reply) in &self.replies {
            if !sql.contains(needle.as_str()) {
                continue;
            }
            match reply {
                Reply::Error(e) => return Err(e.clone()),
                Reply::Write(store, key) => store.insert_object(key, b"ACCOUNT_ID\n".to_vec()),
                Reply::Rows(result) => {
                    if rows.is_none() {
                        rows = Some(result.clone());
                    }
                }
            }
        }
        Ok(rows.unwrap_or_default())
    }
}

/// Object store keeping objects in a map; presigned URLs are shaped like S3's
pub struct FakeStore {
    bucket: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: Mutex<usize>,
    put_error: Option<StepError>,
}

impl FakeStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::new(HashMap::new()),
            puts: Mutex::new(0),
            put_error: None,
        }
    }

    pub fn failing_puts(mut self, error: StepError) -> Self {
        self.put_error = Some(error);
        self
    }

    pub fn insert_object(&self, key: &str, body: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), body);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn put_count(&self) -> usize {
        *self.puts.lock().unwrap()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> StepResult<()> {
        if let Some(e) = &self.put_error {
            return Err(e.clone());
        }
        *self.puts.lock().unwrap() += 1;
        self.insert_object(key, body);
        Ok(())
    }

    async fn head(&self, key: &str) -> StepResult<ObjectInfo> {
        match self.object(key) {
            Some(body) => Ok(ObjectInfo {
                content_length: Some(body.len() as u64),
                ..ObjectInfo::default()
            }),
            None => Err(StepError::new(
                ErrorKind::NotFound,
                format!("s3://{}/{}", self.bucket, key),
            )),
        }
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StepResult<String> {
        Ok(format!(
            "https://{}.s3.amazonaws.com/{}?X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Expires={}&X-Amz-Signature={}",
            self.bucket,
            key,
            expires_in.as_secs(),
            Uuid::new_v4().simple()
        ))
    }
}

/// Chat sink remembering every message
#[derive(Default)]
pub struct FakeChat {
    messages: Mutex<Vec<String>>,
    error: Option<StepError>,
}

impl FakeChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: StepError) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            error: Some(error),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatSink for FakeChat {
    async fn send(&self, text: &str) -> StepResult<()> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
