//! Chart generation with visual critique.
//!
//! The generator writes matplotlib code, a [`ChartRenderer`] turns it into a
//! PNG, and a multimodal critic looks at the image and says what to fix.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::{
    config::RefinementConfig,
    controller::{Evaluator, Executor, Producer},
    error::{RefineError, Result},
    llm::{
        extract::{fenced_block, tagged_block},
        LlmClient, Message,
    },
    models::{Execution, IterationRecord},
};

use super::CallSite;

const CODE_TAG: &str = "execute_python";

/// Dataset metadata injected into every prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetContext {
    pub schema: String,
    pub sample_rows_json: String,
}

impl DatasetContext {
    pub fn new(schema: impl Into<String>, sample_rows_json: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            sample_rows_json: sample_rows_json.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Text, boolean, or low-cardinality integers.
    Categorical,
    Numeric,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
}

/// Column summary used to suggest a default instruction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub row_count: usize,
    pub columns: Vec<ColumnProfile>,
}

impl DatasetProfile {
    pub fn new(row_count: usize) -> Self {
        Self {
            row_count,
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.push(ColumnProfile {
            name: name.into(),
            kind,
        });
        self
    }

    fn names_of(&self, kind: ColumnKind) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// One `- name (kind)` line per column.
    pub fn schema_text(&self) -> String {
        self.columns
            .iter()
            .map(|c| {
                let kind = match c.kind {
                    ColumnKind::Categorical => "categorical",
                    ColumnKind::Numeric => "numeric",
                    ColumnKind::Other => "other",
                };
                format!("- {} ({kind})", c.name)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// First column matching a preferred name (case-insensitive), else the first column.
fn pick<'a>(columns: &[&'a str], preferred: &[&str]) -> Option<&'a str> {
    preferred
        .iter()
        .find_map(|p| columns.iter().find(|c| c.eq_ignore_ascii_case(p)).copied())
        .or_else(|| columns.first().copied())
}

/// Default exploratory instruction for a dataset when the caller has none.
pub fn suggest_instruction(profile: &DatasetProfile) -> String {
    if profile.row_count == 0 {
        return "The dataframe `df` is empty. Produce a simple chart stating that no records \
                are available."
            .to_string();
    }

    let categorical = profile.names_of(ColumnKind::Categorical);
    let numeric = profile.names_of(ColumnKind::Numeric);
    let mut panels = Vec::new();

    if let Some(primary) = pick(&categorical, &["category", "type", "label"]) {
        panels.push(format!(
            "A bar chart of `{primary}` showing the top categories and their counts."
        ));
        if let Some(secondary) = categorical.iter().find(|c| **c != primary) {
            panels.push(format!(
                "A grouped bar chart or heatmap comparing `{primary}` against `{secondary}`."
            ));
        }
    }
    if let Some(measure) = pick(&numeric, &["price", "value", "amount"]) {
        panels.push(format!(
            "A distribution plot (histogram or box plot) of `{measure}` with notable \
             percentiles annotated."
        ));
    }
    if panels.is_empty() {
        panels.push(
            "A simple table-style chart of row counts, since no clear categorical or numeric \
             columns were found."
                .to_string(),
        );
    }

    let numbered = panels
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}) {p}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Create an exploratory multi-panel figure for the dataframe `df` that includes:\n\
         {numbered}\n\n\
         Use pandas/matplotlib, give each subplot a descriptive title, label axes clearly, \
         annotate notable trends, and use a tight layout."
    )
}

/// Parsed generator reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartDraft {
    pub description: Option<String>,
    pub code: String,
}

#[derive(Debug, Deserialize)]
struct DescriptionLine {
    description: String,
}

/// Split a reply into its optional first-line `{"description": ...}` and the code.
///
/// Code comes from `<execute_python>` tags, else a ```python fence, else the
/// whole reply minus the description line.
pub fn parse_chart_response(text: &str) -> ChartDraft {
    let text = text.trim();
    let first_line = text.lines().next().unwrap_or_default().trim();
    let description = serde_json::from_str::<DescriptionLine>(first_line)
        .ok()
        .map(|d| d.description.trim().to_string())
        .filter(|d| !d.is_empty());

    let code = tagged_block(text, CODE_TAG)
        .or_else(|| fenced_block(text, "python"))
        .map(str::to_string)
        .unwrap_or_else(|| {
            let body = if description.is_some() {
                text.split_once('\n').map_or("", |(_, rest)| rest)
            } else {
                text
            };
            body.trim().to_string()
        });

    ChartDraft { description, code }
}

/// Turns plotting code into an image at `output_path`.
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(&self, code: &str, output_path: &Path) -> Result<()>;
}

/// Runs plotting code with a Python interpreter in a subprocess.
///
/// The target path is passed as `OUTPUT_PATH`. When a CSV is configured, a
/// preamble loads it into `df` from `DATA_PATH`.
#[derive(Debug, Clone)]
pub struct PythonRenderer {
    interpreter: String,
    data_csv: Option<PathBuf>,
    timeout: Duration,
}

impl Default for PythonRenderer {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            data_csv: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl PythonRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_data_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_csv = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn script(&self, code: &str) -> String {
        let mut script = String::from("import os\nimport matplotlib\nmatplotlib.use('Agg')\n");
        if self.data_csv.is_some() {
            script.push_str("import pandas as pd\ndf = pd.read_csv(os.environ['DATA_PATH'])\n");
        }
        script.push_str(code);
        script.push('\n');
        script
    }
}

#[async_trait]
impl ChartRenderer for PythonRenderer {
    #[instrument(skip_all, fields(output = %output_path.display()))]
    async fn render(&self, code: &str, output_path: &Path) -> Result<()> {
        let mut command = tokio::process::Command::new(&self.interpreter);
        command
            .arg("-")
            .env("OUTPUT_PATH", output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(csv) = &self.data_csv {
            command.env("DATA_PATH", csv);
        }

        let mut child = command.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(self.script(code).as_bytes()).await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                RefineError::Execution(format!(
                    "chart code timed out after {}s",
                    self.timeout.as_secs()
                ))
            })??;

        if output.status.success() {
            debug!("Chart code exited cleanly");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(RefineError::Execution(last_lines(&stderr, 15)))
        }
    }
}

/// Tail of a traceback; the last frames carry the actual error.
fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Structured critic reply.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ChartCritique {
    /// What to change. Empty when the chart needs nothing further.
    pub feedback: String,
    /// One-line description of the improved chart.
    #[serde(default)]
    pub description: Option<String>,
}

/// Chart call site.
///
/// Each execution renders to `{output_dir}/{basename}_v{n}.png`, where `n`
/// counts renders since the last [`CallSite::begin_run`].
pub struct ChartAgent {
    generator: LlmClient,
    critic: LlmClient,
    renderer: Arc<dyn ChartRenderer>,
    context: DatasetContext,
    output_dir: PathBuf,
    basename: String,
    config: RefinementConfig,
    renders: AtomicUsize,
}

impl ChartAgent {
    pub fn new(
        generator: LlmClient,
        critic: LlmClient,
        renderer: impl ChartRenderer + 'static,
        context: DatasetContext,
    ) -> Self {
        Self {
            generator,
            critic,
            renderer: Arc::new(renderer),
            context,
            output_dir: PathBuf::from("."),
            basename: "chart".to_string(),
            config: RefinementConfig::chart(),
            renders: AtomicUsize::new(0),
        }
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_basename(mut self, basename: impl Into<String>) -> Self {
        self.basename = basename.into();
        self
    }

    pub fn with_config(mut self, config: RefinementConfig) -> Self {
        self.config = config;
        self
    }

    pub fn chart_path(&self, version: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_v{version}.png", self.basename))
    }

    fn generation_prompt(&self, instruction: &str) -> String {
        format!(
            "You are a data visualization expert.\n\n\
             Dataset schema:\n{schema}\n\n\
             Sample rows (JSON):\n{rows}\n\n\
             Reply in exactly this shape:\n\
             1) First line: a JSON object {{\"description\": \"...\"}} describing the chart.\n\
             2) Then the Python code wrapped in <{CODE_TAG}> and </{CODE_TAG}>.\n\n\
             {rules}\n\n\
             User instruction: {instruction}",
            schema = self.context.schema,
            rows = self.context.sample_rows_json,
            rules = CODE_RULES,
        )
    }

    fn refinement_prompt(&self, instruction: &str, prior_code: &str, feedback: &str) -> String {
        format!(
            "You are a data visualization expert improving an existing chart.\n\n\
             Dataset schema:\n{schema}\n\n\
             Sample rows (JSON):\n{rows}\n\n\
             Original instruction:\n{instruction}\n\n\
             Current code:\n{prior_code}\n\n\
             Critique to address:\n{feedback}\n\n\
             Reply in exactly this shape:\n\
             1) First line: a JSON object {{\"description\": \"...\"}} describing the improved chart.\n\
             2) Then the complete revised Python code wrapped in <{CODE_TAG}> and </{CODE_TAG}>.\n\n\
             {rules}",
            schema = self.context.schema,
            rows = self.context.sample_rows_json,
            rules = CODE_RULES,
        )
    }

    fn critique_prompt(&self, instruction: &str, code: &str) -> String {
        format!(
            "You are an expert chart critic grounded in perception research and information \
             design.\n\n\
             Dataset schema:\n{schema}\n\n\
             Sample rows (JSON):\n{rows}\n\n\
             Original instruction:\n{instruction}\n\n\
             Code that produced the chart:\n{code}\n\n\
             Evaluate the attached chart on:\n\
             1. Chart type: does the encoding fit the data and the intent?\n\
             2. Truthfulness: zero baselines for bars, honest scales, sensible aspect ratio.\n\
             3. Readability: legible non-overlapping labels, useful legend, accessible colors.\n\
             4. Data-ink: no gridline clutter or decoration that carries no information.\n\
             5. Statistics: aggregation stated, outliers handled, uncertainty where relevant.\n\n\
             Put concrete, prioritized fixes in `feedback`. If the chart needs no further \
             changes, return an empty `feedback` string.",
            schema = self.context.schema,
            rows = self.context.sample_rows_json,
        )
    }

    fn failure_prompt(&self, instruction: &str, code: &str, error: &str) -> String {
        format!(
            "The chart code below failed to produce an image.\n\n\
             Dataset schema:\n{schema}\n\n\
             Original instruction:\n{instruction}\n\n\
             Code:\n{code}\n\n\
             Error:\n{error}\n\n\
             Explain in `feedback` what caused the failure and how to fix the code.",
            schema = self.context.schema,
        )
    }
}

const CODE_RULES: &str = "Constraints:\n\
     1. A pandas DataFrame named `df` already exists; do not load data from disk.\n\
     2. Use matplotlib (pandas allowed for wrangling) and include every import.\n\
     3. Add a clear title, axis labels, and a legend when it helps.\n\
     4. Save the figure to os.environ['OUTPUT_PATH'] with dpi=300.\n\
     5. Never call plt.show(); call plt.close() after saving.\n\
     6. Do not use deprecated styles such as 'seaborn-whitegrid'.";

#[async_trait]
impl Producer for ChartAgent {
    async fn produce(
        &self,
        task: &str,
        prior_candidate: Option<&str>,
        feedback: Option<&str>,
    ) -> Result<String> {
        let prompt = match prior_candidate {
            None => self.generation_prompt(task),
            Some(prior) => self.refinement_prompt(task, prior, feedback.unwrap_or_default()),
        };
        let reply = self.generator.complete(&[Message::user(prompt)]).await?;
        let draft = parse_chart_response(&reply);
        if draft.code.is_empty() {
            return Err(RefineError::Validation(
                "generator reply contained no code".to_string(),
            ));
        }
        if let Some(description) = &draft.description {
            debug!(%description, "Chart draft");
        }
        Ok(draft.code)
    }
}

#[async_trait]
impl Executor for ChartAgent {
    async fn execute(&self, candidate: &str) -> Execution {
        let version = self.renders.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.chart_path(version);

        if let Err(err) = tokio::fs::create_dir_all(&self.output_dir).await {
            return Execution::failure(format!("cannot create output directory: {err}"));
        }
        // a stale image from an earlier run must not count as output
        let _ = tokio::fs::remove_file(&path).await;

        if let Err(err) = self.renderer.render(candidate, &path).await {
            return Execution::failure(err.to_string());
        }
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Execution::success(path.display().to_string()),
            _ => Execution::failure(format!(
                "code ran but no image was written to {}",
                path.display()
            )),
        }
    }
}

#[async_trait]
impl Evaluator for ChartAgent {
    async fn evaluate(&self, task: &str, latest: &IterationRecord) -> Result<String> {
        let message = match (&latest.artifact_ref, latest.succeeded) {
            (Some(image), true) => {
                Message::user_with_image_file(self.critique_prompt(task, &latest.candidate), image)
                    .await?
            }
            _ => {
                let error = latest.error.as_deref().unwrap_or("unknown error");
                warn!(iteration = latest.index, "Critiquing a failed render from its error text");
                Message::user(self.failure_prompt(task, &latest.candidate, error))
            }
        };
        let critique: ChartCritique = self.critic.complete_json(&[message]).await?;
        Ok(critique.feedback)
    }
}

impl CallSite for ChartAgent {
    fn name(&self) -> &str {
        "chart"
    }

    fn config(&self) -> RefinementConfig {
        self.config.clone()
    }

    fn begin_run(&self) {
        self.renders.store(0, Ordering::SeqCst);
    }
}
