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

//! One-shot result cell shared between a producer and any number of waiters.

use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, PerformError, Result};

enum State<T> {
	Empty,
	Value(T),
	Failed(Arc<dyn std::error::Error + Send + Sync>),
}

struct Shared<T> {
	state: Mutex<State<T>>,
	ready: Condvar,
}

/// A cell that is published exactly once with either a value or an error.
///
/// Handles are cheap clones of the same cell; whichever side sets it first
/// wins and every current and future waiter observes that outcome. This is
/// the blocking, thread-oriented cousin of an async oneshot, which is what
/// the pool and the actors need since their waiters are plain OS threads.
pub struct Future<T> {
	shared: Arc<Shared<T>>,
}

impl<T> Clone for Future<T> {
	fn clone(&self) -> Self {
		Future { shared: Arc::clone(&self.shared) }
	}
}

impl<T> Default for Future<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Future<T> {
	pub fn new() -> Self {
		Future { shared: Arc::new(Shared { state: Mutex::new(State::Empty), ready: Condvar::new() }) }
	}

	/// Publish a value and wake every waiter.
	///
	/// Fails with [`Error::FutureAlreadySet`] if the cell was already
	/// published, by either side.
	pub fn set_value(&self, value: T) -> Result<()> {
		let mut state = self.shared.state.lock();
		if !matches!(*state, State::Empty) {
			return Err(Error::FutureAlreadySet);
		}
		*state = State::Value(value);
		self.shared.ready.notify_all();
		Ok(())
	}

	/// Publish a failure and wake every waiter.
	pub fn set_error(&self, error: PerformError) -> Result<()> {
		let mut state = self.shared.state.lock();
		if !matches!(*state, State::Empty) {
			return Err(Error::FutureAlreadySet);
		}
		*state = State::Failed(Arc::from(error));
		self.shared.ready.notify_all();
		Ok(())
	}

	pub fn is_set(&self) -> bool {
		!matches!(*self.shared.state.lock(), State::Empty)
	}

	/// Block until the cell is published.
	pub fn wait(&self) {
		let mut state = self.shared.state.lock();
		while matches!(*state, State::Empty) {
			self.shared.ready.wait(&mut state);
		}
	}

	/// Block for at most `timeout` milliseconds; returns whether the cell
	/// was published on return.
	pub fn wait_ms(&self, timeout: u64) -> bool {
		self.wait_for(Duration::from_millis(timeout))
	}

	/// Block for at most `timeout`; returns whether the cell was published
	/// on return. The whole duration counts, not just its sub-second part.
	pub fn wait_for(&self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		let mut state = self.shared.state.lock();
		while matches!(*state, State::Empty) {
			if self.shared.ready.wait_until(&mut state, deadline).timed_out() {
				break;
			}
		}
		!matches!(*state, State::Empty)
	}
}

impl<T: Clone> Future<T> {
	/// Block until published, then return the value, or the producer's error
	/// wrapped in [`Error::FutureValue`] so transport failures stay
	/// distinguishable from the payload.
	pub fn get_value(&self) -> Result<T> {
		let mut state = self.shared.state.lock();
		loop {
			match &*state {
				State::Empty => {}
				State::Value(value) => return Ok(value.clone()),
				State::Failed(inner) => return Err(Error::FutureValue(Arc::clone(inner))),
			}
			self.shared.ready.wait(&mut state);
		}
	}
}

/// The wait-only face of a completion future handed out by
/// [`crate::FairPool::submit_waitable`]: it tells you the job finished but
/// carries no value.
pub struct Waitable {
	inner: Future<bool>,
}

impl Waitable {
	pub(crate) fn new(inner: Future<bool>) -> Self {
		Waitable { inner }
	}

	pub fn wait(&self) {
		self.inner.wait()
	}

	pub fn wait_ms(&self, timeout: u64) -> bool {
		self.inner.wait_ms(timeout)
	}

	pub fn wait_for(&self, timeout: Duration) -> bool {
		self.inner.wait_for(timeout)
	}

	pub fn is_done(&self) -> bool {
		self.inner.is_set()
	}
}
