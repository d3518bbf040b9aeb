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

use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Catch-all error for failures produced inside a submitted job.
pub type PerformError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
	/// Dequeue on a queue with no elements left in any bucket.
	#[error("dequeue from an empty queue")]
	EmptyQueue,
	/// A future may be published exactly once.
	#[error("future has already been set")]
	FutureAlreadySet,
	/// The job behind a future failed; the producer's error is carried inside.
	#[error("job failed: {0}")]
	FutureValue(Arc<dyn std::error::Error + Send + Sync>),
	/// A second continuation was registered while one is already pending.
	#[error("actor is already suspended in a receive or react")]
	ActorAlreadySuspended,
	/// Pools always keep at least one worker.
	#[error("pool requires at least one thread, got {0}")]
	InvalidThreadCount(usize),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("{0}")]
	Msg(String),
}

impl Error {
	/// The producer-side failure wrapped by [`Error::FutureValue`], if this is one.
	pub fn job_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
		match self {
			Error::FutureValue(inner) => Some(inner.as_ref()),
			_ => None,
		}
	}
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
