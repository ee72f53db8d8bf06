//! CLI presentation: text and JSON formatters for coordinator results.

use crate::cli::parse::OutputFormat;
use crate::coordinator::{SectionView, VersionSummary};
use crate::error::CoordinatorError;
use crate::execution::Execution;
use crate::poller::{CompletionEvent, FinalStatus};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde_json::json;

fn to_json(value: serde_json::Value) -> Result<String, CoordinatorError> {
    serde_json::to_string_pretty(&value)
        .map_err(|e| CoordinatorError::InvalidRequest(format!("Failed to render JSON: {}", e)))
}

pub fn format_versions(rows: &[VersionSummary], format: OutputFormat) -> Result<String, CoordinatorError> {
    if format == OutputFormat::Json {
        return to_json(json!({ "versions": rows }));
    }
    if rows.is_empty() {
        return Ok("No versions yet.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["", "Execution", "Name", "Status", "Created"]);
    for row in rows {
        table.add_row(vec![
            if row.is_active { "*" } else { "" }.to_string(),
            row.execution_id.to_string(),
            row.name.clone(),
            row.status.to_string(),
            row.created_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    Ok(table.to_string())
}

pub fn format_sections(rows: &[SectionView], format: OutputFormat) -> Result<String, CoordinatorError> {
    if format == OutputFormat::Json {
        return to_json(json!({ "sections": rows }));
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["#", "Section", "Type", "Title", "Editable", "Regenerable"]);
    for (index, row) in rows.iter().enumerate() {
        table.add_row(vec![
            index.to_string(),
            row.section_id.to_string(),
            row.kind.to_string(),
            row.title.clone(),
            yes_no(row.editable).to_string(),
            yes_no(row.regenerable).to_string(),
        ]);
    }
    Ok(table.to_string())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

pub fn format_execution(execution: &Execution, format: OutputFormat) -> Result<String, CoordinatorError> {
    if format == OutputFormat::Json {
        return to_json(json!({ "execution": execution }));
    }
    let mut s = format!(
        "{} ({})\n  Status: {}\n  LLM: {}\n  Sections: {}",
        execution.name,
        execution.id,
        execution.status,
        execution.llm_id,
        execution.sections.len()
    );
    for output in &execution.sections {
        let label = output
            .section_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| output.id.to_string());
        let preview: String = output.content.chars().take(60).collect();
        s.push_str(&format!("\n  - {}: {}", label, preview));
    }
    Ok(s)
}

pub fn format_completion(event: &CompletionEvent, format: OutputFormat) -> Result<String, CoordinatorError> {
    let status = match &event.status {
        FinalStatus::Completed => "completed".to_string(),
        FinalStatus::Failed => "failed".to_string(),
        FinalStatus::Cancelled => "cancelled".to_string(),
        FinalStatus::Approved => "approved".to_string(),
        FinalStatus::ApprovalRejected { reverted_to } => format!("approval rejected (back to {})", reverted_to),
        FinalStatus::Removed => "removed".to_string(),
        FinalStatus::Unknown { attempts, .. } => format!("unknown after {} attempts", attempts),
    };
    if format == OutputFormat::Json {
        return to_json(json!({
            "execution_id": event.execution_id,
            "document_id": event.document_id,
            "status": status,
            "failed_sections": event.failed_sections,
        }));
    }
    let mut s = format!("Execution {}: {}", event.execution_id, status);
    if !event.failed_sections.is_empty() {
        let failed: Vec<String> = event.failed_sections.iter().map(|i| i.to_string()).collect();
        s.push_str(&format!("\n  Failed sections: {}", failed.join(", ")));
    }
    Ok(s)
}

pub fn format_accepted(execution_id: &str, job_id: Option<&str>, format: OutputFormat) -> Result<String, CoordinatorError> {
    if format == OutputFormat::Json {
        return to_json(json!({ "execution_id": execution_id, "job_id": job_id, "status": "accepted" }));
    }
    Ok(match job_id {
        Some(job) => format!("Accepted: execution {} (job {})", execution_id, job),
        None => format!("Accepted: execution {}", execution_id),
    })
}
