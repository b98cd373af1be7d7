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

//! Chunked batch upsert. Postgres has a bind-parameter ceiling per statement; a Run
//! that extracts tens of thousands of tenders must never assemble one giant insert.
//! Mirrors the source's `Batch`/`Chunk` splitting.

use diesel::pg::upsert::excluded;
use diesel::prelude::*;

use super::models::NewTender;
use super::schema::tenders::dsl::*;
use crate::error::Result;

/// Postgres caps bind parameters at 65535 per statement; `NewTender` carries 27
/// columns, so this is comfortably under that ceiling with room for the conflict
/// clause's `excluded` references.
pub const CHUNK_MAX: usize = 2_000;

pub struct Chunk<'a> {
	rows: &'a [NewTender],
}

impl<'a> Chunk<'a> {
	/// Split `rows` into `CHUNK_MAX`-sized slices.
	pub fn chunks(rows: &'a [NewTender]) -> impl Iterator<Item = Chunk<'a>> {
		rows.chunks(CHUNK_MAX).map(|rows| Chunk { rows })
	}

	/// Upsert this chunk: insert new rows, and on a `(portal_name_norm, tender_id_norm)`
	/// conflict, update the mutable fields and bump `last_seen_run_id` (§3 invariant 2:
	/// re-observing an existing tender updates its last-seen marker, never its identity).
	pub fn upsert(&self, conn: &PgConnection) -> Result<usize> {
		if self.rows.is_empty() {
			return Ok(0);
		}
		let affected = diesel::insert_into(tenders)
			.values(self.rows)
			.on_conflict((portal_name_norm, tender_id_norm))
			.do_update()
			.set((
				portal_name.eq(excluded(portal_name)),
				tender_id_raw.eq(excluded(tender_id_raw)),
				department_name.eq(excluded(department_name)),
				title_ref.eq(excluded(title_ref)),
				organisation_chain.eq(excluded(organisation_chain)),
				published_at_text.eq(excluded(published_at_text)),
				closing_at_text.eq(excluded(closing_at_text)),
				opening_at_text.eq(excluded(opening_at_text)),
				closing_at_ist.eq(excluded(closing_at_ist)),
				emd_amount_text.eq(excluded(emd_amount_text)),
				emd_amount_numeric.eq(excluded(emd_amount_numeric)),
				tender_value_text.eq(excluded(tender_value_text)),
				tender_value_numeric.eq(excluded(tender_value_numeric)),
				location.eq(excluded(location)),
				contract_type.eq(excluded(contract_type)),
				inviting_officer.eq(excluded(inviting_officer)),
				work_description.eq(excluded(work_description)),
				direct_url.eq(excluded(direct_url)),
				status_url.eq(excluded(status_url)),
				lifecycle_status.eq(excluded(lifecycle_status)),
				raw_json.eq(excluded(raw_json)),
				last_seen_run_id.eq(excluded(last_seen_run_id)),
				updated_at.eq(excluded(updated_at)),
			))
			.execute(conn)?;
		Ok(affected)
	}
}

/// Upsert every row in `rows`, chunked, returning the total number of rows affected.
pub fn upsert_all(conn: &PgConnection, rows: &[NewTender]) -> Result<usize> {
	let mut total = 0;
	for chunk in Chunk::chunks(rows) {
		total += chunk.upsert(conn)?;
	}
	Ok(total)
}
