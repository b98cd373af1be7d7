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

//! Scraping orchestration and persistence engine for government tender portals.
//!
//! The entry point most callers want is [`orchestrator::run_portal`]. Everything
//! else in this crate is the machinery that function wires together: a per-portal
//! [`skill::Skill`] that knows one portal family's HTML, a [`browser::Session`] that
//! owns the HTTP/DOM state for one worker, an [`extraction`] engine that drives a
//! Skill over a Session for one department, a [`workers`] pool that runs many
//! departments in parallel, a [`checkpoint`] saver for crash-safe resume, and a
//! [`database`] layer that enforces the dedup and delta invariants.

#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_migrations;

pub mod browser;
pub mod checkpoint;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod extraction;
pub mod normalize;
pub mod orchestrator;
pub mod ratelimit;
pub mod skill;
pub mod types;
pub mod util;
pub mod workers;

pub use config::Config;
pub use database::Datastore;
pub use error::{Error, Result};
pub use events::{Event, EventBus};
pub use orchestrator::{run_portal, RunSummary};
pub use types::{Department, Portal, Run, ScopeMode, Tender};
pub use util::init_logger;
