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

//! In-process concurrency toolkit built around tag-fair scheduling.
//!
//! [`FairQueue`] is a FIFO that serves tags round-robin; [`FairPool`] runs
//! jobs drawn from one across a resizable set of worker threads; [`Future`]
//! carries a job's outcome back to its submitter; [`Actor`] multiplexes
//! message loops over any [`Scheduler`], a fair pool included.

#![forbid(unsafe_code)]

pub mod actor;
pub mod error;
pub mod future;
pub mod pool;
pub mod queue;
pub mod scheduler;

pub use crate::{
	actor::Actor,
	error::{Error, PerformError, Result},
	future::{Future, Waitable},
	pool::{FairPool, Job, PoolConfig},
	queue::{FairQueue, Tag},
	scheduler::{global, Scheduler},
};
