// Copyright 2019-2021 Parity Technologies (UK) Ltd.
// This file is part of fair-pool.

// fair-pool is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// fair-pool is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with fair-pool. If not, see <http://www.gnu.org/licenses/>.

//! The seam between actors and whatever executes them.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::pool::{FairPool, Job};

/// Capability of running jobs asynchronously. No ordering is guaranteed
/// between separately scheduled jobs.
///
/// Actors hold one of these instead of a concrete pool, so the same actor
/// code runs on a [`FairPool`], on the process-default pool from
/// [`global`], or on anything a host wires up.
pub trait Scheduler: Send + Sync {
	fn schedule(&self, job: Job);
}

impl Scheduler for FairPool {
	fn schedule(&self, job: Job) {
		self.submit(job);
	}
}

static GLOBAL: Lazy<Arc<FairPool>> = Lazy::new(|| {
	let pool = FairPool::builder()
		.name("fair-pool-global")
		.threads(num_cpus::get())
		.build()
		.expect("num_cpus is never zero; qed");
	Arc::new(pool)
});

/// The process-default pool, spawned on first use and sized to the machine.
/// Lives for the rest of the process; callers that need teardown make their
/// own pool.
pub fn global() -> Arc<FairPool> {
	Arc::clone(&GLOBAL)
}
