//! Writing a finished run to disk.
//!
//! Layout under `output_dir`:
//!
//! ```text
//! {basename}_v1.{ext}            candidate of iteration 1
//! {basename}_feedback_v1.md      critique of iteration 1 (if any)
//! {basename}_v2.{ext}            ...
//! {basename}_final.{ext}         selected candidate
//! run.json                       the serialized RunResult
//! ```

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, ResultExt};
use crate::models::RunResult;

/// Paths written by [`ArtifactWriter::write_run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavedArtifacts {
    pub candidates: Vec<PathBuf>,
    pub feedback: Vec<PathBuf>,
    pub final_candidate: PathBuf,
    pub manifest: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
    basename: String,
    extension: String,
}

impl ArtifactWriter {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        basename: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            basename: basename.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn path(&self, suffix: &str, extension: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{suffix}.{extension}", self.basename))
    }

    /// Feedback stored on iteration `n + 1` critiques iteration `n`, so it is
    /// saved as `feedback_v{n}`.
    pub async fn write_run(&self, result: &RunResult) -> Result<SavedArtifacts> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(format!("creating {}", self.output_dir.display()))?;

        let mut saved = SavedArtifacts::default();
        for record in &result.history {
            let path = self.path(&format!("v{}", record.index), &self.extension);
            tokio::fs::write(&path, &record.candidate).await?;
            saved.candidates.push(path);

            if let Some(feedback) = record.feedback.as_deref().filter(|f| !f.trim().is_empty()) {
                let critiqued = record.index.saturating_sub(1);
                let path = self.path(&format!("feedback_v{critiqued}"), "md");
                tokio::fs::write(&path, feedback).await?;
                saved.feedback.push(path);
            }
        }

        saved.final_candidate = self.path("final", &self.extension);
        tokio::fs::write(&saved.final_candidate, result.final_candidate()).await?;

        saved.manifest = self.output_dir.join("run.json");
        tokio::fs::write(&saved.manifest, serde_json::to_vec_pretty(result)?).await?;

        info!(
            dir = %self.output_dir.display(),
            files = saved.candidates.len() + saved.feedback.len() + 2,
            "Saved run artifacts"
        );
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Execution, IterationRecord, StopReason};
    use chrono::Utc;
    use uuid::Uuid;

    fn result() -> RunResult {
        let history = vec![
            IterationRecord::new(1, "Draft one.".into(), None, Execution::success("2 words")),
            IterationRecord::new(
                2,
                "Draft two.".into(),
                Some("Needs a thesis.".into()),
                Execution::success("2 words"),
            ),
        ];
        RunResult::finish(Uuid::new_v4(), history, StopReason::MaxIterationsReached, Utc::now())
    }

    #[tokio::test]
    async fn writes_every_iteration_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("essays"), "essay", ".md");
        let result = result();
        let saved = writer.write_run(&result).await.unwrap();

        assert_eq!(saved.candidates.len(), 2);
        assert_eq!(saved.feedback, vec![dir.path().join("essays/essay_feedback_v1.md")]);
        let final_text = tokio::fs::read_to_string(&saved.final_candidate).await.unwrap();
        assert_eq!(final_text, "Draft two.");
        assert!(saved.final_candidate.ends_with("essay_final.md"));

        let manifest = tokio::fs::read_to_string(&saved.manifest).await.unwrap();
        let parsed: RunResult = serde_json::from_str(&manifest).unwrap();
        assert_eq!(parsed.run_id, result.run_id);
        assert_eq!(parsed.stop_reason, StopReason::MaxIterationsReached);
    }
}
