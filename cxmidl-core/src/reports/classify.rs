//! Table classification by name.

use serde::{Deserialize, Serialize};

/// Functional category of a table, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableCategory {
    /// Workflow, job and task tables
    #[serde(rename = "Orchestration_Core")]
    OrchestrationCore,
    /// Log, audit and history tables
    #[serde(rename = "Logging_Audit")]
    LoggingAudit,
    /// Configuration, setting and parameter tables
    Configuration,
    /// Everything else
    General,
}

const RULES: &[(TableCategory, &[&str])] = &[
    (
        TableCategory::OrchestrationCore,
        &["orchestr", "workflow", "job", "task"],
    ),
    (TableCategory::LoggingAudit, &["log", "audit", "history"]),
    (TableCategory::Configuration, &["config", "setting", "param"]),
];

impl TableCategory {
    /// Classifies a table name; the first matching rule wins.
    ///
    /// Matching is a case-insensitive substring test, so `workflow_config`
    /// is `Orchestration_Core` and `catalog` is `Logging_Audit`.
    ///
    /// # Example
    /// ```rust
    /// use cxmidl_core::reports::TableCategory;
    ///
    /// assert_eq!(TableCategory::classify("JobQueue"), TableCategory::OrchestrationCore);
    /// assert_eq!(TableCategory::classify("AuditTrail"), TableCategory::LoggingAudit);
    /// assert_eq!(TableCategory::classify("Customers"), TableCategory::General);
    /// ```
    pub fn classify(table_name: &str) -> Self {
        let lowered = table_name.to_lowercase();
        RULES
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| lowered.contains(n)))
            .map_or(Self::General, |(category, _)| *category)
    }

    /// Label used in reports and for ordering
    pub fn label(self) -> &'static str {
        match self {
            Self::OrchestrationCore => "Orchestration_Core",
            Self::LoggingAudit => "Logging_Audit",
            Self::Configuration => "Configuration",
            Self::General => "General",
        }
    }
}

impl std::fmt::Display for TableCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
