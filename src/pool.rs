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

//! Worker pool that dispatches submitted jobs in tag-fair order.
//!
//! One mutex and one condvar guard the queue, the wanted/live worker counts,
//! the disposing flag and the worker handle set; nothing is ever locked while
//! another lock is held. Workers resize the pool themselves: after every job
//! each worker compares the live count against the wanted count, exits when
//! over it and spawns the shortfall when under it.

use std::{
	any::Any,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	thread,
	time::{Duration, Instant},
};

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use serde::Deserialize;

use crate::{
	error::{Error, PerformError, Result},
	future::{Future, Waitable},
	queue::{FairQueue, Tag},
};

/// A unit of work accepted by the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Feeds the `fair-pool-N` default names.
static POOL_ID: AtomicUsize = AtomicUsize::new(0);

/// Pool sizing and teardown knobs, deserializable from host configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct PoolConfig {
	/// Number of worker threads to start with.
	#[serde(default = "default_threads")]
	pub threads: usize,
	/// Pool name; also the prefix of its worker thread names.
	#[serde(default)]
	pub name: Option<String>,
	/// Upper bound on how long `dispose` waits for workers to drain.
	#[serde(default = "default_join_timeout_ms")]
	pub join_timeout_ms: u64,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self { threads: default_threads(), name: None, join_timeout_ms: default_join_timeout_ms() }
	}
}

fn default_threads() -> usize {
	num_cpus::get()
}

const fn default_join_timeout_ms() -> u64 {
	100
}

/// Builder pattern struct for [`FairPool`].
#[derive(Default)]
pub struct Builder {
	threads: Option<usize>,
	name: Option<String>,
	join_timeout: Option<Duration>,
}

impl Builder {
	/// Number of worker threads. Defaults to the number of logical CPUs.
	pub fn threads(mut self, threads: usize) -> Self {
		self.threads = Some(threads);
		self
	}

	/// Name the pool; worker threads are named `{pool}-{worker}`.
	pub fn name<S: AsRef<str>>(mut self, name: S) -> Self {
		self.name = Some(name.as_ref().to_string());
		self
	}

	/// Upper bound on how long `dispose` waits for workers to drain.
	pub fn join_timeout(mut self, timeout: Duration) -> Self {
		self.join_timeout = Some(timeout);
		self
	}

	pub fn build(self) -> Result<FairPool> {
		let threads = self.threads.unwrap_or_else(num_cpus::get);
		if threads == 0 {
			return Err(Error::InvalidThreadCount(threads));
		}
		let name =
			self.name.unwrap_or_else(|| format!("fair-pool-{}", POOL_ID.fetch_add(1, Ordering::Relaxed)));
		let join_timeout =
			self.join_timeout.unwrap_or_else(|| Duration::from_millis(default_join_timeout_ms()));

		let shared = Arc::new(Shared {
			name,
			state: Mutex::new(PoolState {
				queue: FairQueue::new(),
				wanted: threads,
				alive: 0,
				disposing: false,
				workers: HashMap::new(),
				next_worker: 0,
			}),
			work: Condvar::new(),
			running: AtomicUsize::new(0),
			join_timeout,
		});
		{
			let mut state = shared.state.lock();
			for _ in 0..threads {
				spawn_worker(&shared, &mut state)?;
			}
		}
		log::debug!("pool {} started with {} threads", shared.name, threads);
		Ok(FairPool { shared })
	}
}

struct PoolState {
	queue: FairQueue<Job>,
	/// Worker count requested via `set_threads`; workers converge on it.
	wanted: usize,
	/// Workers currently live, including ones mid-job.
	alive: usize,
	disposing: bool,
	workers: HashMap<usize, thread::JoinHandle<()>>,
	next_worker: usize,
}

struct Shared {
	name: String,
	state: Mutex<PoolState>,
	work: Condvar,
	running: AtomicUsize,
	join_timeout: Duration,
}

/// A pool of worker threads pulling jobs off a shared [`FairQueue`].
///
/// Jobs submitted under the same tag run in submission order (with respect to
/// each other); tags are served round-robin, so a flood under one tag cannot
/// starve the rest. Handles are cheap clones; `dispose` tears the workers
/// down from any of them.
#[derive(Clone)]
pub struct FairPool {
	shared: Arc<Shared>,
}

impl FairPool {
	/// Pool with `threads` workers and a generated name.
	pub fn new(threads: usize) -> Result<Self> {
		Self::builder().threads(threads).build()
	}

	pub fn builder() -> Builder {
		Builder::default()
	}

	pub fn from_config(config: &PoolConfig) -> Result<Self> {
		let mut builder = Self::builder()
			.threads(config.threads)
			.join_timeout(Duration::from_millis(config.join_timeout_ms));
		if let Some(name) = &config.name {
			builder = builder.name(name);
		}
		builder.build()
	}

	pub fn name(&self) -> &str {
		&self.shared.name
	}

	/// Enqueue a job under the default tag.
	pub fn submit<F>(&self, job: F)
	where
		F: FnOnce() + Send + 'static,
	{
		self.submit_tagged(0, job)
	}

	/// Enqueue a job under `tag`. Never fails; once the pool is disposing the
	/// job is dropped without running.
	pub fn submit_tagged<F>(&self, tag: Tag, job: F)
	where
		F: FnOnce() + Send + 'static,
	{
		let mut state = self.shared.state.lock();
		if state.disposing {
			log::debug!("pool {}: dropping submission, pool is disposing", self.shared.name);
			return;
		}
		state.queue.enqueue_tagged(tag, Box::new(job));
		self.shared.work.notify_one();
	}

	/// Enqueue a job and get a handle that can be waited on for completion.
	/// A job that panics still completes its waitable.
	pub fn submit_waitable<F>(&self, tag: Tag, job: F) -> Waitable
	where
		F: FnOnce() + Send + 'static,
	{
		let future = Future::new();
		let done = future.clone();
		self.submit_tagged(tag, move || match catch_unwind(AssertUnwindSafe(job)) {
			Ok(()) => {
				let _ = done.set_value(true);
			}
			Err(panic) => {
				let _ = done.set_error(extract_panic_info(&panic));
			}
		});
		Waitable::new(future)
	}

	/// Enqueue a value-producing job; its result (or failure) is published
	/// into the returned future.
	pub fn submit_future<T, F>(&self, tag: Tag, job: F) -> Future<T>
	where
		T: Send + 'static,
		F: FnOnce() -> std::result::Result<T, PerformError> + Send + 'static,
	{
		let future = Future::new();
		let published = future.clone();
		self.submit_tagged(tag, move || match catch_unwind(AssertUnwindSafe(job)) {
			Ok(Ok(value)) => {
				let _ = published.set_value(value);
			}
			Ok(Err(error)) => {
				let _ = published.set_error(error);
			}
			Err(panic) => {
				let _ = published.set_error(extract_panic_info(&panic));
			}
		});
		future
	}

	/// Jobs waiting in the queue.
	pub fn pending(&self) -> usize {
		self.shared.state.lock().queue.count()
	}

	/// Jobs currently executing on a worker.
	pub fn running(&self) -> usize {
		self.shared.running.load(Ordering::SeqCst)
	}

	/// Workers currently live.
	pub fn threads(&self) -> usize {
		self.shared.state.lock().alive
	}

	/// Request a new worker count. Growing spawns eagerly the next time any
	/// worker reconciles; shrinking lets excess workers exit one by one as
	/// they come off a job. Idle workers are woken so both happen without
	/// waiting for a submission.
	pub fn set_threads(&self, threads: usize) -> Result<()> {
		if threads == 0 {
			return Err(Error::InvalidThreadCount(threads));
		}
		let mut state = self.shared.state.lock();
		if state.disposing {
			return Ok(());
		}
		state.wanted = threads;
		self.shared.work.notify_all();
		Ok(())
	}

	/// Shut the pool down. Jobs already running finish; queued jobs are
	/// released without being run; workers are joined for at most the
	/// configured timeout and detached past it. Calling this more than once
	/// is harmless.
	pub fn dispose(&self) {
		let handles: Vec<thread::JoinHandle<()>> = {
			let mut state = self.shared.state.lock();
			state.disposing = true;
			let dropped = state.queue.count();
			if dropped > 0 {
				log::debug!("pool {}: discarding {} queued jobs on dispose", self.shared.name, dropped);
			}
			while state.queue.dequeue().is_ok() {}
			let handles = state.workers.drain().map(|(_, handle)| handle).collect();
			self.shared.work.notify_all();
			handles
		};

		let deadline = Instant::now() + self.shared.join_timeout;
		{
			let mut state = self.shared.state.lock();
			while state.alive > 0 {
				if self.shared.work.wait_until(&mut state, deadline).timed_out() {
					log::warn!(
						"pool {}: {} workers still busy after {:?}, detaching",
						self.shared.name,
						state.alive,
						self.shared.join_timeout
					);
					break;
				}
			}
		}

		let current = thread::current().id();
		for handle in handles {
			// disposing from inside a job must not join the calling worker
			if handle.thread().id() == current || !handle.is_finished() {
				continue;
			}
			if handle.join().is_err() {
				log::error!("pool {}: worker terminated abnormally", self.shared.name);
			}
		}
	}
}

#[cfg(any(test, feature = "test_components"))]
impl FairPool {
	/// Block until the queue is drained and nothing is executing.
	pub fn join(&self) {
		let mut state = self.shared.state.lock();
		while !(state.queue.is_empty() && self.shared.running.load(Ordering::SeqCst) == 0) {
			self.shared.work.wait_for(&mut state, Duration::from_millis(10));
		}
	}
}

/// Must be called with the pool lock held.
fn spawn_worker(shared: &Arc<Shared>, state: &mut PoolState) -> Result<()> {
	let id = state.next_worker;
	state.next_worker += 1;
	let for_worker = Arc::clone(shared);
	let handle = thread::Builder::new()
		.name(format!("{}-{}", shared.name, id))
		.spawn(move || worker_loop(for_worker, id))?;
	state.workers.insert(id, handle);
	state.alive += 1;
	Ok(())
}

fn worker_loop(shared: Arc<Shared>, id: usize) {
	loop {
		if let Some(job) = next_job(&shared) {
			shared.running.fetch_add(1, Ordering::SeqCst);
			let outcome = catch_unwind(AssertUnwindSafe(job));
			shared.running.fetch_sub(1, Ordering::SeqCst);
			if let Err(panic) = outcome {
				// a failed job never takes its worker down with it
				log::warn!("pool {}: {}", shared.name, extract_panic_info(&panic));
			}
		}
		if !reconcile(&shared, id) {
			return;
		}
	}
}

fn next_job(shared: &Shared) -> Option<Job> {
	let mut state = shared.state.lock();
	while !state.disposing && state.queue.is_empty() && state.alive == state.wanted {
		shared.work.wait(&mut state);
	}
	if state.disposing {
		return None;
	}
	state.queue.dequeue().ok().map(|(job, _tag)| job)
}

/// Compare the live worker count against the wanted one and adjust; returns
/// `false` when this worker should exit.
fn reconcile(shared: &Arc<Shared>, id: usize) -> bool {
	let mut state = shared.state.lock();
	if state.disposing || state.alive > state.wanted {
		state.alive -= 1;
		state.workers.remove(&id);
		shared.work.notify_all();
		return false;
	}
	while state.alive < state.wanted {
		if let Err(error) = spawn_worker(shared, &mut state) {
			log::error!("pool {}: failed to spawn worker: {}", shared.name, error);
			break;
		}
	}
	if state.queue.is_empty() && shared.running.load(Ordering::SeqCst) == 0 {
		// lets `dispose` and `join` waiters re-check
		shared.work.notify_all();
	}
	true
}

/// Render a panic payload into a job error, in the same shapes `panic!`
/// produces them.
fn extract_panic_info(panic: &(dyn Any + Send + 'static)) -> PerformError {
	if let Some(message) = panic.downcast_ref::<&'static str>() {
		format!("job panicked: {}", message).into()
	} else if let Some(message) = panic.downcast_ref::<String>() {
		format!("job panicked: {}", message).into()
	} else {
		"job panicked".into()
	}
}
