// Copyright 2026 Tender Archive Contributors

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Diesel row types. Kept separate from [`crate::types`] the same way the source
//! keeps `InsertBlockOwned` separate from the chain-facing block type: the owned,
//! batch-friendly shape that diesel serializes is not necessarily the shape the rest
//! of the crate wants to reason about.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};

use super::schema::{runs, tenders};
use crate::normalize::{norm_portal_name, norm_tender_id};
use crate::types::{LifecycleStatus, Run, RunStatus, ScopeMode, Tender};

fn scope_mode_str(mode: ScopeMode) -> &'static str {
	match mode {
		ScopeMode::OnlyNew => "only_new",
		ScopeMode::FullRescrape => "full_rescrape",
	}
}

fn run_status_str(status: RunStatus) -> &'static str {
	match status {
		RunStatus::Running => "running",
		RunStatus::Completed => "completed",
		RunStatus::Failed => "failed",
		RunStatus::Cancelled => "cancelled",
	}
}

pub fn run_status_from_str(s: &str) -> RunStatus {
	match s {
		"completed" => RunStatus::Completed,
		"failed" => RunStatus::Failed,
		"cancelled" => RunStatus::Cancelled,
		_ => RunStatus::Running,
	}
}

fn lifecycle_status_str(status: LifecycleStatus) -> &'static str {
	match status {
		LifecycleStatus::Active => "active",
		LifecycleStatus::Cancelled => "cancelled",
		LifecycleStatus::Archived => "archived",
	}
}

pub fn lifecycle_status_from_str(s: &str) -> LifecycleStatus {
	match s {
		"cancelled" => LifecycleStatus::Cancelled,
		"archived" => LifecycleStatus::Archived,
		_ => LifecycleStatus::Active,
	}
}

#[derive(Debug, Clone, Insertable)]
#[table_name = "runs"]
pub struct NewRun<'a> {
	pub portal_name: &'a str,
	pub scope_mode: &'static str,
	pub started_at: DateTime<Utc>,
	pub status: &'static str,
	pub expected_total_tenders: i64,
	pub extracted_total_tenders: i64,
	pub skipped_existing_total: i64,
	pub changed_closing_date_count: i64,
}

impl<'a> NewRun<'a> {
	pub fn starting(portal_name: &'a str, scope_mode: ScopeMode, started_at: DateTime<Utc>) -> Self {
		NewRun {
			portal_name,
			scope_mode: scope_mode_str(scope_mode),
			started_at,
			status: run_status_str(RunStatus::Running),
			expected_total_tenders: 0,
			extracted_total_tenders: 0,
			skipped_existing_total: 0,
			changed_closing_date_count: 0,
		}
	}
}

#[derive(Debug, Clone, Queryable)]
pub struct RunRow {
	pub id: i64,
	pub portal_name: String,
	pub scope_mode: String,
	pub started_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub status: String,
	pub expected_total_tenders: i64,
	pub extracted_total_tenders: i64,
	pub skipped_existing_total: i64,
	pub changed_closing_date_count: i64,
	pub error_message: Option<String>,
	pub output_file_path: Option<String>,
}

impl From<RunRow> for Run {
	fn from(row: RunRow) -> Run {
		Run {
			id: row.id,
			portal_name: row.portal_name,
			scope_mode: if row.scope_mode == "full_rescrape" { ScopeMode::FullRescrape } else { ScopeMode::OnlyNew },
			started_at: row.started_at,
			completed_at: row.completed_at,
			status: run_status_from_str(&row.status),
			expected_total_tenders: row.expected_total_tenders,
			extracted_total_tenders: row.extracted_total_tenders,
			skipped_existing_total: row.skipped_existing_total,
			changed_closing_date_count: row.changed_closing_date_count,
			error_message: row.error_message,
			output_file_path: row.output_file_path,
		}
	}
}

/// Owned, batch-friendly tender row. Built from a [`Tender`] plus the run id that
/// first/last observed it; chunked inserts move `Vec<NewTender>` rather than
/// borrowing from the caller's tenders (teacher pattern: `InsertBlockOwned`).
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[table_name = "tenders"]
pub struct NewTender {
	pub portal_name: String,
	pub portal_name_norm: String,
	pub tender_id_raw: String,
	pub tender_id_norm: String,
	pub department_name: String,
	pub title_ref: String,
	pub organisation_chain: String,
	pub published_at_text: String,
	pub closing_at_text: String,
	pub opening_at_text: String,
	pub closing_at_ist: Option<DateTime<Utc>>,
	pub emd_amount_text: String,
	pub emd_amount_numeric: Option<BigDecimal>,
	pub tender_value_text: String,
	pub tender_value_numeric: Option<BigDecimal>,
	pub location: String,
	pub contract_type: String,
	pub inviting_officer: String,
	pub work_description: String,
	pub direct_url: String,
	pub status_url: String,
	pub lifecycle_status: String,
	pub raw_json: serde_json::Value,
	pub first_seen_run_id: i64,
	pub last_seen_run_id: i64,
	pub updated_at: DateTime<Utc>,
}

impl NewTender {
	pub fn from_domain(t: &Tender, run_id: i64, now: DateTime<Utc>) -> Self {
		NewTender {
			portal_name: t.portal_name.clone(),
			portal_name_norm: norm_portal_name(&t.portal_name),
			tender_id_raw: t.tender_id_raw.clone(),
			tender_id_norm: norm_tender_id(&t.tender_id_extracted),
			department_name: t.department_name.clone(),
			title_ref: t.title_ref.clone(),
			organisation_chain: t.organisation_chain.clone(),
			published_at_text: t.published_at_text.clone(),
			closing_at_text: t.closing_at_text.clone(),
			opening_at_text: t.opening_at_text.clone(),
			closing_at_ist: t.closing_at_ist.or_else(|| crate::util::parse_closing_date(&t.closing_at_text)),
			emd_amount_text: t.emd_amount_text.clone(),
			emd_amount_numeric: t.emd_amount_numeric.clone(),
			tender_value_text: t.tender_value_text.clone(),
			tender_value_numeric: t.tender_value_numeric.clone(),
			location: t.location.clone(),
			contract_type: t.contract_type.clone(),
			inviting_officer: t.inviting_officer.clone(),
			work_description: t.work_description.clone(),
			direct_url: t.direct_url.clone(),
			status_url: t.status_url.clone(),
			lifecycle_status: lifecycle_status_str(t.lifecycle_status).to_string(),
			raw_json: t.raw_json.clone(),
			first_seen_run_id: run_id,
			last_seen_run_id: run_id,
			updated_at: now,
		}
	}
}

#[derive(Debug, Clone, Queryable)]
pub struct TenderRow {
	pub id: i64,
	pub portal_name: String,
	pub portal_name_norm: String,
	pub tender_id_raw: String,
	pub tender_id_norm: String,
	pub department_name: String,
	pub title_ref: String,
	pub organisation_chain: String,
	pub published_at_text: String,
	pub closing_at_text: String,
	pub opening_at_text: String,
	pub closing_at_ist: Option<DateTime<Utc>>,
	pub emd_amount_text: String,
	pub emd_amount_numeric: Option<BigDecimal>,
	pub tender_value_text: String,
	pub tender_value_numeric: Option<BigDecimal>,
	pub location: String,
	pub contract_type: String,
	pub inviting_officer: String,
	pub work_description: String,
	pub direct_url: String,
	pub status_url: String,
	pub lifecycle_status: String,
	pub raw_json: serde_json::Value,
	pub first_seen_run_id: i64,
	pub last_seen_run_id: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<TenderRow> for Tender {
	fn from(row: TenderRow) -> Tender {
		Tender {
			portal_name: row.portal_name,
			tender_id_raw: row.tender_id_raw,
			tender_id_extracted: row.tender_id_norm,
			department_name: row.department_name,
			title_ref: row.title_ref,
			organisation_chain: row.organisation_chain,
			published_at_text: row.published_at_text,
			closing_at_text: row.closing_at_text,
			opening_at_text: row.opening_at_text,
			closing_at_ist: row.closing_at_ist,
			emd_amount_text: row.emd_amount_text,
			emd_amount_numeric: row.emd_amount_numeric,
			tender_value_text: row.tender_value_text,
			tender_value_numeric: row.tender_value_numeric,
			location: row.location,
			contract_type: row.contract_type,
			inviting_officer: row.inviting_officer,
			work_description: row.work_description,
			direct_url: row.direct_url,
			status_url: row.status_url,
			lifecycle_status: lifecycle_status_from_str(&row.lifecycle_status),
			raw_json: row.raw_json,
		}
	}
}
