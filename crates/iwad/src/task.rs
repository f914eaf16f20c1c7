//! Static task store.
//!
//! Tasks come from a single JSON document loaded once and never mutated:
//!
//! ```json
//! { "tasks": [ { "id": "...", "web_project_id": "...", "url": "...",
//!                "prompt": "...", "tests": [ { "type": "CheckUrlTest", "url": "..." } ] } ] }
//! ```

use std::path::Path;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EnvError, EnvResult};

/// One success criterion. Interpreted by the evaluator by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl TaskTest {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// String parameter, if present.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub web_project_id: String,
    /// Starting URL.
    pub url: String,
    pub prompt: String,
    #[serde(default)]
    pub is_web_real: bool,
    #[serde(default)]
    pub tests: Vec<TaskTest>,
    #[serde(default)]
    pub relevant_data: Value,
}

impl Task {
    pub fn total_tests(&self) -> u32 {
        self.tests.len() as u32
    }

    /// Copy of this task with its URL moved onto `endpoint`. Scheme and host
    /// are replaced; the port only when `endpoint` names one. Path and query
    /// are kept. Real-web tasks are left alone.
    pub fn rebased(&self, endpoint: &str) -> EnvResult<Task> {
        if self.is_web_real {
            return Ok(self.clone());
        }
        let base = Url::parse(endpoint)
            .map_err(|e| EnvError::TaskStore(format!("invalid demo web endpoint {endpoint:?}: {e}")))?;
        let mut url = Url::parse(&self.url)
            .map_err(|e| EnvError::TaskStore(format!("task {} has invalid url: {e}", self.id)))?;

        let rebase_err = || EnvError::TaskStore(format!("cannot rebase {} onto {endpoint}", self.url));
        url.set_scheme(base.scheme()).map_err(|_| rebase_err())?;
        url.set_host(base.host_str()).map_err(|_| rebase_err())?;
        if let Some(port) = base.port() {
            url.set_port(Some(port)).map_err(|_| rebase_err())?;
        }

        let mut task = self.clone();
        task.url = url.to_string();
        Ok(task)
    }
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<Task>,
}

/// Immutable, ordered set of tasks.
#[derive(Debug, Clone)]
pub struct TaskStore {
    tasks: Vec<Task>,
}

impl TaskStore {
    /// Build from tasks already in memory. Empty sets are rejected.
    pub fn from_tasks(tasks: Vec<Task>) -> EnvResult<Self> {
        if tasks.is_empty() {
            return Err(EnvError::TaskStore("no tasks defined".to_string()));
        }
        Ok(Self { tasks })
    }

    /// Parse a task document.
    pub fn from_json(raw: &str) -> EnvResult<Self> {
        let file: TaskFile = serde_json::from_str(raw)
            .map_err(|e| EnvError::TaskStore(format!("malformed task file: {e}")))?;
        Self::from_tasks(file.tasks)
    }

    /// Read and parse the task file at `path`.
    pub async fn load(path: &Path) -> EnvResult<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EnvError::TaskStore(format!("cannot read {}: {e}", path.display())))?;
        let store = Self::from_json(&raw)?;
        tracing::info!(path = %path.display(), tasks = store.len(), "task store loaded");
        Ok(store)
    }

    /// Rebase every task onto the demo web endpoint.
    pub fn rebased(self, endpoint: Option<&str>) -> EnvResult<Self> {
        match endpoint {
            Some(endpoint) => {
                let tasks = self
                    .tasks
                    .iter()
                    .map(|t| t.rebased(endpoint))
                    .collect::<EnvResult<Vec<_>>>()?;
                Ok(Self { tasks })
            }
            None => Ok(self),
        }
    }

    /// The task with `task_id`, or every task when no id is given.
    pub fn select(&self, task_id: Option<&str>) -> EnvResult<Vec<&Task>> {
        match task_id {
            Some(id) => self
                .tasks
                .iter()
                .find(|t| t.id == id)
                .map(|t| vec![t])
                .ok_or_else(|| EnvError::UnknownTask(id.to_string())),
            None => Ok(self.tasks.iter().collect()),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "tasks": [
            {
                "id": "t1",
                "web_project_id": "autobooks",
                "url": "http://localhost:8001/?seed=36",
                "prompt": "Open the book page",
                "tests": [{"type": "CheckUrlTest", "url": "/books/book-original-002"}]
            },
            {
                "id": "t2",
                "web_project_id": "autobooks",
                "url": "http://localhost:8001/",
                "prompt": "Impossible",
                "relevant_data": {"user": "alice"}
            }
        ]
    }"#;

    #[test]
    fn test_select_by_id_and_all() {
        let store = TaskStore::from_json(DOC).unwrap();
        let one = store.select(Some("t2")).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].id, "t2");
        assert_eq!(one[0].relevant_data["user"], "alice");
        assert_eq!(store.select(None).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_id_is_an_error() {
        let store = TaskStore::from_json(DOC).unwrap();
        assert!(matches!(
            store.select(Some("nope")),
            Err(EnvError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_empty_and_malformed_rejected() {
        assert!(TaskStore::from_json(r#"{"tasks": []}"#).is_err());
        assert!(TaskStore::from_json("{}").is_err());
        assert!(TaskStore::from_json("not json").is_err());
    }

    #[test]
    fn test_tests_keep_params() {
        let store = TaskStore::from_json(DOC).unwrap();
        let test = &store.tasks()[0].tests[0];
        assert_eq!(test.kind, "CheckUrlTest");
        assert_eq!(test.param("url"), Some("/books/book-original-002"));
        assert_eq!(store.tasks()[0].total_tests(), 1);
        assert_eq!(store.tasks()[1].total_tests(), 0);
    }

    #[test]
    fn test_rebase_keeps_path_and_query() {
        let store = TaskStore::from_json(DOC).unwrap();
        let task = store.tasks()[0].rebased("http://autoppia-demo-web:8090").unwrap();
        assert_eq!(task.url, "http://autoppia-demo-web:8090/?seed=36");
    }

    #[test]
    fn test_rebase_onto_host_keeps_task_port() {
        let store = TaskStore::from_json(DOC).unwrap();
        let task = store.tasks()[0].rebased("http://autoppia-demo-web").unwrap();
        assert_eq!(task.url, "http://autoppia-demo-web:8001/?seed=36");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TaskStore::load(&dir.path().join("absent.json")).await.unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
