//! Wire shapes of the spreadsheet API and the canonical normalized row.

use crate::values::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A single sheet; cells carry `columnId`.
    #[default]
    Sheet,
    /// A cross-sheet report; cells may carry `virtualColumnId`.
    Report,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Sheet => f.write_str("sheet"),
            SourceKind::Report => f.write_str("report"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceColumn {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub virtual_id: Option<u64>,
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCell {
    #[serde(default)]
    pub column_id: Option<u64>,
    #[serde(default)]
    pub virtual_column_id: Option<u64>,
    #[serde(default)]
    pub value: Option<CellValue>,
    #[serde(default)]
    pub display_value: Option<String>,
}

impl SourceCell {
    /// `displayValue` when present, otherwise `value`, otherwise null.
    pub fn effective_value(&self) -> CellValue {
        if let Some(display) = &self.display_value {
            return CellValue::Text(display.clone());
        }
        self.value.clone().unwrap_or(CellValue::Null)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRow {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub sheet_id: Option<u64>,
    #[serde(default)]
    pub sheet_name: Option<String>,
    #[serde(default)]
    pub cells: Vec<SourceCell>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSheet {
    pub id: u64,
    pub name: String,
}

/// A fetched sheet or report, as returned by the spreadsheet API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSource {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub columns: Vec<SourceColumn>,
    #[serde(default)]
    pub rows: Vec<SourceRow>,
    #[serde(default)]
    pub source_sheets: Vec<SourceSheet>,
}

impl RawSource {
    pub fn label(&self) -> String {
        match (&self.name, self.id) {
            (Some(name), _) => name.clone(),
            (None, Some(id)) => format!("{} {}", self.kind, id),
            (None, None) => self.kind.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KnownField {
    Rid,
    ClientName,
    ProjectName,
    ProjectManager,
    WorkflowStatus,
    RagStatus,
    BudgetForecast,
    Oop,
    Actuals,
    Overage,
    Ecosystem,
    RequestType,
    ApprovedInvestment,
    WinProbability,
    PipelineStage,
    Recommendation,
    AssignedTo,
    Department,
    TeamMember,
    BillableHours,
    AvailableHours,
    StartDate,
    EndDate,
}

impl KnownField {
    pub const ALL: [KnownField; 23] = [
        KnownField::Rid,
        KnownField::ClientName,
        KnownField::ProjectName,
        KnownField::ProjectManager,
        KnownField::WorkflowStatus,
        KnownField::RagStatus,
        KnownField::BudgetForecast,
        KnownField::Oop,
        KnownField::Actuals,
        KnownField::Overage,
        KnownField::Ecosystem,
        KnownField::RequestType,
        KnownField::ApprovedInvestment,
        KnownField::WinProbability,
        KnownField::PipelineStage,
        KnownField::Recommendation,
        KnownField::AssignedTo,
        KnownField::Department,
        KnownField::TeamMember,
        KnownField::BillableHours,
        KnownField::AvailableHours,
        KnownField::StartDate,
        KnownField::EndDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KnownField::Rid => "rid",
            KnownField::ClientName => "client_name",
            KnownField::ProjectName => "project_name",
            KnownField::ProjectManager => "project_manager",
            KnownField::WorkflowStatus => "workflow_status",
            KnownField::RagStatus => "rag_status",
            KnownField::BudgetForecast => "budget_forecast",
            KnownField::Oop => "oop",
            KnownField::Actuals => "actuals",
            KnownField::Overage => "overage",
            KnownField::Ecosystem => "ecosystem",
            KnownField::RequestType => "request_type",
            KnownField::ApprovedInvestment => "approved_investment",
            KnownField::WinProbability => "win_probability",
            KnownField::PipelineStage => "pipeline_stage",
            KnownField::Recommendation => "recommendation",
            KnownField::AssignedTo => "assigned_to",
            KnownField::Department => "department",
            KnownField::TeamMember => "team_member",
            KnownField::BillableHours => "billable_hours",
            KnownField::AvailableHours => "available_hours",
            KnownField::StartDate => "start_date",
            KnownField::EndDate => "end_date",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.as_str() == name)
    }
}

/// The canonical normalized row.
///
/// Known fields stay `None` when the source row has no such column. Columns
/// with no dictionary entry are kept in `extra` under their verbatim title.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_manager: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_status: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_status: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_forecast: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oop: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actuals: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overage: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecosystem: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_type: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_investment: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub win_probability: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_stage: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_member: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billable_hours: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_hours: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<CellValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<CellValue>,

    /// Name of the sheet the row came from, used for classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, CellValue>,
}

impl FieldRecord {
    pub fn field(&self, field: KnownField) -> Option<&CellValue> {
        let slot = match field {
            KnownField::Rid => &self.rid,
            KnownField::ClientName => &self.client_name,
            KnownField::ProjectName => &self.project_name,
            KnownField::ProjectManager => &self.project_manager,
            KnownField::WorkflowStatus => &self.workflow_status,
            KnownField::RagStatus => &self.rag_status,
            KnownField::BudgetForecast => &self.budget_forecast,
            KnownField::Oop => &self.oop,
            KnownField::Actuals => &self.actuals,
            KnownField::Overage => &self.overage,
            KnownField::Ecosystem => &self.ecosystem,
            KnownField::RequestType => &self.request_type,
            KnownField::ApprovedInvestment => &self.approved_investment,
            KnownField::WinProbability => &self.win_probability,
            KnownField::PipelineStage => &self.pipeline_stage,
            KnownField::Recommendation => &self.recommendation,
            KnownField::AssignedTo => &self.assigned_to,
            KnownField::Department => &self.department,
            KnownField::TeamMember => &self.team_member,
            KnownField::BillableHours => &self.billable_hours,
            KnownField::AvailableHours => &self.available_hours,
            KnownField::StartDate => &self.start_date,
            KnownField::EndDate => &self.end_date,
        };
        slot.as_ref()
    }

    fn field_mut(&mut self, field: KnownField) -> &mut Option<CellValue> {
        match field {
            KnownField::Rid => &mut self.rid,
            KnownField::ClientName => &mut self.client_name,
            KnownField::ProjectName => &mut self.project_name,
            KnownField::ProjectManager => &mut self.project_manager,
            KnownField::WorkflowStatus => &mut self.workflow_status,
            KnownField::RagStatus => &mut self.rag_status,
            KnownField::BudgetForecast => &mut self.budget_forecast,
            KnownField::Oop => &mut self.oop,
            KnownField::Actuals => &mut self.actuals,
            KnownField::Overage => &mut self.overage,
            KnownField::Ecosystem => &mut self.ecosystem,
            KnownField::RequestType => &mut self.request_type,
            KnownField::ApprovedInvestment => &mut self.approved_investment,
            KnownField::WinProbability => &mut self.win_probability,
            KnownField::PipelineStage => &mut self.pipeline_stage,
            KnownField::Recommendation => &mut self.recommendation,
            KnownField::AssignedTo => &mut self.assigned_to,
            KnownField::Department => &mut self.department,
            KnownField::TeamMember => &mut self.team_member,
            KnownField::BillableHours => &mut self.billable_hours,
            KnownField::AvailableHours => &mut self.available_hours,
            KnownField::StartDate => &mut self.start_date,
            KnownField::EndDate => &mut self.end_date,
        }
    }

    /// Assigns by field name; unknown names go to `extra`.
    pub fn set(&mut self, name: &str, value: CellValue) {
        match KnownField::from_name(name) {
            Some(field) => *self.field_mut(field) = Some(value),
            None => {
                self.extra.insert(name.to_string(), value);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&CellValue> {
        match KnownField::from_name(name) {
            Some(field) => self.field(field),
            None => self.extra.get(name),
        }
    }

    /// Trimmed text of a field, `None` when absent or blank.
    pub fn text(&self, field: KnownField) -> Option<String> {
        self.field(field).and_then(CellValue::as_text)
    }

    pub fn with(mut self, name: &str, value: impl Into<CellValue>) -> Self {
        self.set(name, value.into());
        self
    }

    pub fn with_sheet(mut self, sheet_name: &str) -> Self {
        self.sheet_name = Some(sheet_name.to_string());
        self
    }
}
