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

table! {
	runs (id) {
		id -> Int8,
		portal_name -> Varchar,
		scope_mode -> Varchar,
		started_at -> Timestamptz,
		completed_at -> Nullable<Timestamptz>,
		status -> Varchar,
		expected_total_tenders -> Int8,
		extracted_total_tenders -> Int8,
		skipped_existing_total -> Int8,
		changed_closing_date_count -> Int8,
		error_message -> Nullable<Text>,
		output_file_path -> Nullable<Text>,
	}
}

table! {
	tenders (id) {
		id -> Int8,
		portal_name -> Varchar,
		portal_name_norm -> Varchar,
		tender_id_raw -> Varchar,
		tender_id_norm -> Varchar,
		department_name -> Varchar,
		title_ref -> Text,
		organisation_chain -> Text,
		published_at_text -> Varchar,
		closing_at_text -> Varchar,
		opening_at_text -> Varchar,
		closing_at_ist -> Nullable<Timestamptz>,
		emd_amount_text -> Varchar,
		emd_amount_numeric -> Nullable<Numeric>,
		tender_value_text -> Varchar,
		tender_value_numeric -> Nullable<Numeric>,
		location -> Varchar,
		contract_type -> Varchar,
		inviting_officer -> Varchar,
		work_description -> Text,
		direct_url -> Text,
		status_url -> Text,
		lifecycle_status -> Varchar,
		raw_json -> Jsonb,
		first_seen_run_id -> Int8,
		last_seen_run_id -> Int8,
		created_at -> Timestamptz,
		updated_at -> Timestamptz,
	}
}

allow_tables_to_appear_in_same_query!(runs, tenders,);
