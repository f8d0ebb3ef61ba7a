//! Text-to-SQL with execution feedback.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{
    config::RefinementConfig,
    controller::{Evaluator, Executor, Producer},
    error::{RefineError, Result},
    llm::{extract::fenced_block, LlmClient, Message},
    models::{Execution, IterationRecord},
};

use super::CallSite;

const PREVIEW_ROWS: usize = 10;

/// Tabular query result. A result whose columns include `error` is a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryOutput {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Single-cell result in the `error` column.
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            columns: vec!["error".to_string()],
            rows: vec![vec![Value::String(message.into())]],
        }
    }

    fn error_column(&self) -> Option<usize> {
        self.columns.iter().position(|c| c == "error")
    }

    pub fn is_error(&self) -> bool {
        self.error_column().is_some()
    }

    pub fn error_message(&self) -> Option<String> {
        let idx = self.error_column()?;
        let message = self
            .rows
            .first()
            .and_then(|row| row.get(idx))
            .map(render_cell)
            .unwrap_or_else(|| "query failed".to_string());
        Some(message)
    }

    /// Pipe-separated preview of the first `max_rows` rows.
    pub fn preview(&self, max_rows: usize) -> String {
        let mut lines = vec![self.columns.join(" | ")];
        lines.extend(self.rows.iter().take(max_rows).map(|row| {
            row.iter().map(render_cell).collect::<Vec<_>>().join(" | ")
        }));
        if self.rows.len() > max_rows {
            lines.push(format!("... ({} rows total)", self.rows.len()));
        }
        lines.join("\n")
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Executes SQL against some database.
#[async_trait]
pub trait SqlRunner: Send + Sync {
    async fn run(&self, sql: &str) -> Result<QueryOutput>;

    /// Schema text shown to the generator.
    async fn schema(&self) -> Result<String>;
}

/// Structured critic reply.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SqlCritique {
    /// What is wrong with the query. Empty when it fully answers the question.
    pub feedback: String,
}

/// SQL call site.
#[derive(Clone)]
pub struct SqlAgent {
    generator: LlmClient,
    critic: LlmClient,
    runner: Arc<dyn SqlRunner>,
    schema: String,
    config: RefinementConfig,
}

impl SqlAgent {
    pub fn new(
        generator: LlmClient,
        critic: LlmClient,
        runner: impl SqlRunner + 'static,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            critic,
            runner: Arc::new(runner),
            schema: schema.into(),
            config: RefinementConfig::sql(),
        }
    }

    /// Build the agent with the schema read from `runner`.
    pub async fn from_runner(
        generator: LlmClient,
        critic: LlmClient,
        runner: impl SqlRunner + 'static,
    ) -> Result<Self> {
        let schema = runner.schema().await?;
        debug!(chars = schema.len(), "Schema extracted");
        Ok(Self::new(generator, critic, runner, schema))
    }

    pub fn with_config(mut self, config: RefinementConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }
}

/// SQL inside a ```sql fence when present, else the whole reply.
pub fn extract_sql(reply: &str) -> String {
    fenced_block(reply, "sql")
        .unwrap_or(reply)
        .trim()
        .to_string()
}

#[async_trait]
impl Producer for SqlAgent {
    async fn produce(
        &self,
        task: &str,
        prior_candidate: Option<&str>,
        feedback: Option<&str>,
    ) -> Result<String> {
        let prompt = match prior_candidate {
            None => format!(
                "You are a SQL assistant. Write one SQLite query that answers the question.\n\n\
                 Schema:\n{schema}\n\n\
                 Question:\n{task}\n\n\
                 Respond with the SQL only, in a ```sql block.",
                schema = self.schema,
            ),
            Some(prior) => format!(
                "You are a SQL assistant fixing a SQLite query.\n\n\
                 Schema:\n{schema}\n\n\
                 Question:\n{task}\n\n\
                 Previous query:\n```sql\n{prior}\n```\n\n\
                 Reviewer feedback:\n{feedback}\n\n\
                 Respond with the corrected SQL only, in a ```sql block.",
                schema = self.schema,
                feedback = feedback.unwrap_or_default(),
            ),
        };
        let reply = self.generator.complete(&[Message::user(prompt)]).await?;
        let sql = extract_sql(&reply);
        if sql.is_empty() {
            return Err(RefineError::Validation("generator returned no SQL".to_string()));
        }
        Ok(sql)
    }
}

#[async_trait]
impl Executor for SqlAgent {
    async fn execute(&self, candidate: &str) -> Execution {
        let output = match self.runner.run(candidate).await {
            Ok(output) => output,
            Err(err) => return Execution::failure(err.to_string()),
        };
        if let Some(message) = output.error_message() {
            return Execution::failure(message);
        }
        debug!(rows = output.rows.len(), "Query executed");
        if output.rows.is_empty() {
            Execution::empty()
        } else {
            Execution::success(output.preview(PREVIEW_ROWS))
        }
    }
}

#[async_trait]
impl Evaluator for SqlAgent {
    async fn evaluate(&self, task: &str, latest: &IterationRecord) -> Result<String> {
        let outcome = match (&latest.error, &latest.artifact_ref) {
            (Some(error), _) => format!("Execution error:\n{error}"),
            (None, Some(preview)) => format!("Result preview:\n{preview}"),
            (None, None) => "The query ran but returned no rows.".to_string(),
        };
        let prompt = format!(
            "Review a SQLite query written for the question below.\n\n\
             Schema:\n{schema}\n\n\
             Question:\n{task}\n\n\
             Query:\n```sql\n{sql}\n```\n\n\
             {outcome}\n\n\
             Check that the query answers the question exactly: correct tables and columns, \
             joins, filters, grouping, and ordering. Put concrete corrections in `feedback`; \
             leave it empty if the query is correct.",
            schema = self.schema,
            sql = latest.candidate,
        );
        let critique: SqlCritique = self.critic.complete_json(&[Message::user(prompt)]).await?;
        Ok(critique.feedback)
    }
}

impl CallSite for SqlAgent {
    fn name(&self) -> &str {
        "sql"
    }

    fn config(&self) -> RefinementConfig {
        self.config.clone()
    }
}

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRunner;

#[cfg(feature = "sqlite")]
mod sqlite {
    use std::path::Path;

    use async_trait::async_trait;
    use serde_json::Value;
    use sqlx::{
        sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
        Column, Row, TypeInfo, ValueRef,
    };

    use super::{QueryOutput, SqlRunner};
    use crate::error::{RefineError, Result};

    /// [`SqlRunner`] over a SQLite database file.
    ///
    /// SQL errors come back as an `error` column rather than an `Err`.
    #[derive(Debug, Clone)]
    pub struct SqliteRunner {
        pool: SqlitePool,
    }

    impl SqliteRunner {
        /// Open `path` read-only.
        pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
            let options = SqliteConnectOptions::new()
                .filename(path.as_ref())
                .read_only(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await
                .map_err(|e| RefineError::Config(format!("cannot open SQLite database: {e}")))?;
            Ok(Self { pool })
        }

        pub fn from_pool(pool: SqlitePool) -> Self {
            Self { pool }
        }
    }

    fn cell(row: &SqliteRow, idx: usize) -> Value {
        let kind = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
            Err(_) => return Value::Null,
        };
        let value = match kind.as_str() {
            "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(idx).map(Value::from),
            "REAL" => row.try_get::<f64, _>(idx).map(Value::from),
            "BLOB" => row
                .try_get::<Vec<u8>, _>(idx)
                .map(|b| Value::from(format!("<{} bytes>", b.len()))),
            _ => row.try_get::<String, _>(idx).map(Value::from),
        };
        value.unwrap_or(Value::Null)
    }

    #[async_trait]
    impl SqlRunner for SqliteRunner {
        async fn run(&self, sql: &str) -> Result<QueryOutput> {
            let rows = match sqlx::query(sql).fetch_all(&self.pool).await {
                Ok(rows) => rows,
                Err(err) => return Ok(QueryOutput::from_error(err.to_string())),
            };
            let columns = rows
                .first()
                .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default();
            let rows = rows
                .iter()
                .map(|row| (0..row.len()).map(|idx| cell(row, idx)).collect())
                .collect();
            Ok(QueryOutput::new(columns, rows))
        }

        async fn schema(&self) -> Result<String> {
            let rows = sqlx::query(
                "SELECT sql FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RefineError::Execution(format!("cannot read schema: {e}")))?;
            let statements: Vec<String> = rows
                .iter()
                .filter_map(|row| row.try_get::<Option<String>, _>(0).ok().flatten())
                .collect();
            Ok(statements.join(";\n\n"))
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::run_site;
    use crate::llm::MockRequest;
    use crate::models::StopReason;
    use std::sync::Mutex;

    /// Fails any query mentioning `totl`; otherwise returns one row.
    struct ScriptedRunner {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SqlRunner for ScriptedRunner {
        async fn run(&self, sql: &str) -> Result<QueryOutput> {
            self.seen
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(sql.to_string());
            if sql.contains("totl") {
                return Ok(QueryOutput::from_error("no such column: totl"));
            }
            Ok(QueryOutput::new(
                vec!["revenue".into()],
                vec![vec![Value::from(42.0)]],
            ))
        }

        async fn schema(&self) -> Result<String> {
            Ok("CREATE TABLE orders (id INTEGER, total REAL)".to_string())
        }
    }

    fn generator() -> LlmClient {
        LlmClient::mock(|req: MockRequest| {
            if req.last_text().contains("Reviewer feedback") {
                Ok("```sql\nSELECT SUM(total) AS revenue FROM orders;\n```".to_string())
            } else {
                Ok("```sql\nSELECT SUM(totl) FROM orders;\n```".to_string())
            }
        })
    }

    #[test]
    fn error_column_marks_failure() {
        let output = QueryOutput::from_error("syntax error");
        assert!(output.is_error());
        assert_eq!(output.error_message().as_deref(), Some("syntax error"));

        let ok = QueryOutput::new(vec!["n".into()], vec![vec![Value::from(1)], vec![Value::Null]]);
        assert!(!ok.is_error());
        assert_eq!(ok.preview(1), "n\n1\n... (2 rows total)");
    }

    #[test]
    fn sql_is_taken_from_fences() {
        assert_eq!(extract_sql("Here:\n```sql\nSELECT 1;\n```"), "SELECT 1;");
        assert_eq!(extract_sql("  SELECT 2;  "), "SELECT 2;");
    }

    #[tokio::test]
    async fn empty_generator_reply_is_a_producer_failure() {
        let blank = LlmClient::mock(|_req: MockRequest| Ok("```sql\n```".to_string()));
        let critic = LlmClient::mock(|_req: MockRequest| Ok("{\"feedback\": \"\"}".to_string()));
        let runner = ScriptedRunner {
            seen: Mutex::new(Vec::new()),
        };
        let agent = SqlAgent::from_runner(blank, critic, runner).await.unwrap();

        let err = agent.produce("Total revenue?", None, None).await.unwrap_err();
        assert!(matches!(err, RefineError::Validation(_)));

        match run_site(&agent, "Total revenue?").await.unwrap_err() {
            RefineError::Producer(cause) => assert!(cause.contains("no SQL")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fixes_failing_query_then_stops_on_success() {
        let critic = LlmClient::mock(|req: MockRequest| {
            assert!(req.last_text().contains("no such column: totl"));
            Ok("{\"feedback\": \"The column is `total`; alias it as revenue.\"}".to_string())
        });
        let runner = ScriptedRunner {
            seen: Mutex::new(Vec::new()),
        };
        let agent = SqlAgent::from_runner(generator(), critic, runner).await.unwrap();
        assert!(agent.schema().contains("orders"));

        let result = run_site(&agent, "Total revenue?").await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.stop_reason, StopReason::Success);
        assert_eq!(result.final_candidate(), "SELECT SUM(total) AS revenue FROM orders;");
        assert_eq!(result.best().artifact_ref.as_deref(), Some("revenue\n42.0"));
    }
}
