//! Scripted [`QueryExecutor`] for tests.

use crate::{GraphError, QueryExecutor, Row};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;

enum Reply {
    Rows(Vec<Row>),
    Failure(GraphError),
}

/// Replays scripted replies in order; once the script runs out the last
/// successful reply is repeated (or zero rows if there was none).
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Vec<Row>>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply. Non-object values are ignored.
    pub fn with_rows(self, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.script.lock().push_back(Reply::Rows(rows));
        self
    }

    /// Queue a failing reply.
    pub fn with_failure(self, err: GraphError) -> Self {
        self.script.lock().push_back(Reply::Failure(err));
        self
    }

    /// Every query received so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, GraphError> {
        self.queries.lock().push(query.to_string());
        let next = self.script.lock().pop_front();
        match next {
            Some(Reply::Rows(rows)) => {
                *self.last.lock() = Some(rows.clone());
                Ok(rows)
            }
            Some(Reply::Failure(err)) => Err(err),
            None => Ok(self.last.lock().clone().unwrap_or_default()),
        }
    }
}
