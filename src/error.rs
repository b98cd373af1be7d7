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

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error. Fatal-only: recoverable per-tender/per-department failures
/// never become an `Error`, they are encoded in a `DepartmentResult` instead (see
/// `extraction::DepartmentResult`).
#[derive(Debug, Error)]
pub enum Error {
	#[error("configuration: {0}")]
	Config(String),
	#[error("unknown portal: {0}")]
	UnknownPortal(String),
	#[error("database: {0}")]
	Db(#[from] diesel::result::Error),
	#[error("database connection: {0}")]
	DbConnection(#[from] diesel::ConnectionError),
	#[error("database pool: {0}")]
	DbPool(#[from] r2d2::Error),
	#[error("database migration: {0}")]
	Migration(#[from] diesel_migrations::RunMigrationsError),
	#[error("io: {0}")]
	Io(#[from] std::io::Error),
	#[error("json: {0}")]
	Json(#[from] serde_json::Error),
	#[error("csv: {0}")]
	Csv(#[from] csv::Error),
	#[error("toml: {0}")]
	Toml(#[from] toml::de::Error),
	#[error("environment: {0}")]
	Env(#[from] std::env::VarError),
	#[error("a worker thread panicked")]
	WorkerPanicked,
	#[error("run was cancelled")]
	Cancelled,
	#[error("{0}")]
	Msg(String),
}

impl From<String> for Error {
	fn from(err: String) -> Error {
		Error::Msg(err)
	}
}

impl From<&str> for Error {
	fn from(err: &str) -> Error {
		Error::Msg(err.to_string())
	}
}

/// Fine-grained outcome of one extraction-capable operation (navigate, extract row,
/// etc). Distinguishes retryable conditions from fatal ones, per the error taxonomy
/// in the design notes: transient network/navigation failures get retried with
/// backoff, everything else that escapes a Skill is surfaced as-is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractErrorKind {
	#[error("navigation timed out or failed transiently")]
	Transient,
	#[error("dom element went stale")]
	StaleElement,
	#[error("captcha or login wall detected")]
	CaptchaRequired,
	#[error("navigation failed fatally")]
	Fatal,
}

/// Error returned by a `Skill`/`Session` operation, carrying enough context for the
/// extraction engine to decide whether to retry.
#[derive(Debug, Error, Clone)]
#[error("{kind}: {detail}")]
pub struct ExtractError {
	pub kind: ExtractErrorKind,
	pub detail: String,
}

impl ExtractError {
	pub fn new(kind: ExtractErrorKind, detail: impl Into<String>) -> Self {
		Self { kind, detail: detail.into() }
	}

	pub fn transient(detail: impl Into<String>) -> Self {
		Self::new(ExtractErrorKind::Transient, detail)
	}

	pub fn fatal(detail: impl Into<String>) -> Self {
		Self::new(ExtractErrorKind::Fatal, detail)
	}

	pub fn captcha(detail: impl Into<String>) -> Self {
		Self::new(ExtractErrorKind::CaptchaRequired, detail)
	}

	pub fn is_retryable(&self) -> bool {
		matches!(self.kind, ExtractErrorKind::Transient | ExtractErrorKind::StaleElement)
	}
}

impl From<reqwest::Error> for ExtractError {
	fn from(err: reqwest::Error) -> Self {
		if err.is_timeout() || err.is_connect() {
			ExtractError::transient(err.to_string())
		} else {
			ExtractError::fatal(err.to_string())
		}
	}
}
