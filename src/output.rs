//! Result types returned by [`crate::convert::convert`].
//!
//! Everything here is `Serialize + Deserialize` so a transport layer can hand
//! the structures to clients as-is (the CLI's `--json` flag does exactly
//! that).

use crate::error::{ItemError, SkipReason};
use crate::pipeline::classify::StrategyTag;
use crate::pipeline::page::PageSize;
use crate::store::StoredArtifact;
use serde::{Deserialize, Serialize};

/// Summary of a delivered batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Number of uploaded items that contributed at least one page.
    pub succeeded_count: usize,

    /// Original names of the converted items, in batch order.
    pub processed_names: Vec<String>,

    pub artifact: StoredArtifact,

    pub total_pages: usize,

    /// One report per uploaded item (skipped and failed ones included).
    pub items: Vec<ItemReport>,

    pub duration_ms: u64,
}

impl BatchResult {
    /// Human-readable one-line summary.
    pub fn message(&self) -> String {
        format!(
            "{} file(s) converted successfully! Total pages: {}.",
            self.succeeded_count, self.total_pages
        )
    }

    /// Items that were skipped or failed.
    pub fn rejected(&self) -> impl Iterator<Item = &ItemReport> {
        self.items.iter().filter(|r| !r.is_converted())
    }
}

/// What happened to one item (or one archive member).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    pub name: String,

    /// Strategy chosen by the classifier; absent when none applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyTag>,

    pub outcome: Outcome,

    /// Per-member reports when the item is an archive.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<ItemReport>,
}

/// Tagged per-item result. Never partially both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Converted { pages: Vec<PageSize> },
    Skipped { reason: SkipReason },
    Failed { error: ItemError },
}

impl ItemReport {
    pub fn converted(name: impl Into<String>, strategy: StrategyTag, pages: Vec<PageSize>) -> Self {
        Self::new(name, Some(strategy), Outcome::Converted { pages })
    }

    pub fn skipped(name: impl Into<String>, strategy: Option<StrategyTag>, reason: SkipReason) -> Self {
        Self::new(name, strategy, Outcome::Skipped { reason })
    }

    pub fn failed(name: impl Into<String>, strategy: Option<StrategyTag>, error: ItemError) -> Self {
        Self::new(name, strategy, Outcome::Failed { error })
    }

    fn new(name: impl Into<String>, strategy: Option<StrategyTag>, outcome: Outcome) -> Self {
        Self {
            name: name.into(),
            strategy,
            outcome,
            entries: Vec::new(),
        }
    }

    pub fn with_entries(mut self, entries: Vec<ItemReport>) -> Self {
        self.entries = entries;
        self
    }

    pub fn is_converted(&self) -> bool {
        matches!(self.outcome, Outcome::Converted { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }

    /// Pages this item contributed to the artifact.
    pub fn page_count(&self) -> usize {
        match &self.outcome {
            Outcome::Converted { pages } => pages.len(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn artifact() -> StoredArtifact {
        StoredArtifact {
            file_name: "out.pdf".into(),
            path: PathBuf::from("/srv/processed/out.pdf"),
            download_path: "/downloads/out.pdf".into(),
        }
    }

    #[test]
    fn message_matches_summary_line() {
        let result = BatchResult {
            succeeded_count: 2,
            processed_names: vec!["a.png".into(), "b.docx".into()],
            artifact: artifact(),
            total_pages: 5,
            items: Vec::new(),
            duration_ms: 12,
        };
        assert_eq!(result.message(), "2 file(s) converted successfully! Total pages: 5.");
    }

    #[test]
    fn outcome_is_tagged_by_status() {
        let report = ItemReport::skipped("x.psd", None, SkipReason::NoConvertibleEntries);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["status"], "skipped");
        assert_eq!(json["outcome"]["reason"]["type"], "no_convertible_entries");
        assert!(json.get("strategy").is_none());
        assert!(json.get("entries").is_none());
    }

    #[test]
    fn page_count_only_counts_converted() {
        let ok = ItemReport::converted(
            "a.png",
            StrategyTag::Office,
            vec![PageSize::new(1.0, 2.0), PageSize::new(3.0, 4.0)],
        );
        assert_eq!(ok.page_count(), 2);
        assert!(ok.is_converted());

        let bad = ItemReport::failed("b", Some(StrategyTag::Office), ItemError::Timeout { file: "b".into(), secs: 1 });
        assert_eq!(bad.page_count(), 0);
        assert!(bad.is_failed());
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = ItemReport::converted("bundle.zip", StrategyTag::Archive, vec![PageSize::new(10.0, 20.0)])
            .with_entries(vec![ItemReport::skipped(
                "inner.zip",
                None,
                SkipReason::Unsupported {
                    media_type: None,
                    extension: ".zip".into(),
                    tool: "zip-to-pdf".into(),
                },
            )]);
        let json = serde_json::to_string(&report).unwrap();
        let back: ItemReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.entries.len(), 1);
        assert_eq!(back.outcome, report.outcome);
    }
}
