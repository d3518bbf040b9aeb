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

//! Message-driven entities multiplexed onto a shared [`Scheduler`].
//!
//! An actor owns a mailbox of `(message, sender)` pairs and processes them
//! one at a time. Two modes exist: `receive` parks the calling thread until
//! a message arrives, while `react` registers a continuation and returns,
//! letting a handful of pool workers drive any number of actors. The state
//! machine guarantees at most one continuation is ever pending and at most
//! one thread runs a given actor's handler at a time.

use std::{
	collections::VecDeque,
	panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
	sync::Arc,
};

use parking_lot::{Condvar, Mutex};

use crate::{
	error::{Error, Result},
	scheduler::Scheduler,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ActorState {
	/// No continuation pending; `receive` and `react` are both allowed.
	Inactive,
	/// A thread is parked inside `receive`.
	Receiving,
	/// A handler is registered and waits for the next post to arm it.
	PendingReact,
	/// A drain pass is live on some worker.
	Reacting,
}

type Handler<M> = Box<dyn FnOnce(M, Option<Actor<M>>) + Send>;
type Act<M> = Box<dyn Fn(Actor<M>) + Send + Sync>;

struct Mailbox<M: Send + 'static> {
	queue: VecDeque<(M, Option<Actor<M>>)>,
	state: ActorState,
	handler: Option<Handler<M>>,
}

struct Inner<M: Send + 'static> {
	scheduler: Arc<dyn Scheduler>,
	mailbox: Mutex<Mailbox<M>>,
	available: Condvar,
	act: Act<M>,
}

/// Handle to a message-driven entity processing messages of type `M`.
///
/// Handles are cheap clones of the same actor; posting from several threads
/// is fine. The actor has no thread of its own; its `react` continuations
/// run wherever its scheduler puts them, and `receive` borrows the caller's
/// thread.
pub struct Actor<M: Send + 'static> {
	inner: Arc<Inner<M>>,
}

impl<M: Send + 'static> Clone for Actor<M> {
	fn clone(&self) -> Self {
		Actor { inner: Arc::clone(&self.inner) }
	}
}

/// Identity comparison, so a handler can tell senders apart.
impl<M: Send + 'static> PartialEq for Actor<M> {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl<M: Send + 'static> Eq for Actor<M> {}

impl<M: Send + 'static> std::fmt::Debug for Actor<M> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Actor").field("state", &self.inner.mailbox.lock().state).finish()
	}
}

impl<M: Send + 'static> Actor<M> {
	/// An actor with no entry point; drive it with `receive`/`react`
	/// directly, or post to it from elsewhere.
	pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
		Self::with_act(scheduler, |_| {})
	}

	/// An actor whose message loop is `act`; [`Actor::start`] schedules it.
	pub fn with_act<F>(scheduler: Arc<dyn Scheduler>, act: F) -> Self
	where
		F: Fn(Actor<M>) + Send + Sync + 'static,
	{
		Actor {
			inner: Arc::new(Inner {
				scheduler,
				mailbox: Mutex::new(Mailbox {
					queue: VecDeque::new(),
					state: ActorState::Inactive,
					handler: None,
				}),
				available: Condvar::new(),
				act: Box::new(act),
			}),
		}
	}

	/// Schedule the actor's `act` entry point.
	pub fn start(&self) {
		let this = self.clone();
		self.inner.scheduler.schedule(Box::new(move || {
			let actor = this.clone();
			(this.inner.act)(actor);
		}));
	}

	/// Enqueue a message with no sender attached.
	pub fn post(&self, message: M) {
		self.deliver(message, None);
	}

	/// Enqueue a message and record who sent it.
	pub fn post_from(&self, message: M, sender: &Actor<M>) {
		self.deliver(message, Some(sender.clone()));
	}

	fn deliver(&self, message: M, sender: Option<Actor<M>>) {
		let mut mailbox = self.inner.mailbox.lock();
		mailbox.queue.push_back((message, sender));
		match mailbox.state {
			ActorState::Receiving => {
				self.inner.available.notify_one();
			}
			ActorState::PendingReact => {
				mailbox.state = ActorState::Reacting;
				drop(mailbox);
				self.schedule_drain();
			}
			// a live drain picks the message up; otherwise it waits for a
			// receive/react
			ActorState::Reacting | ActorState::Inactive => {}
		}
	}

	/// Block the calling thread until a message arrives, then handle it.
	///
	/// Only allowed while the actor has no continuation pending
	/// ([`Error::ActorAlreadySuspended`] otherwise). This mode pins the
	/// calling thread for the duration of the wait.
	pub fn receive<F>(&self, handler: F) -> Result<()>
	where
		F: FnOnce(M),
	{
		self.receive_from(|message, _| handler(message))
	}

	/// Like [`Actor::receive`], with the sender visible to the handler.
	pub fn receive_from<F>(&self, handler: F) -> Result<()>
	where
		F: FnOnce(M, Option<Actor<M>>),
	{
		let (message, sender) = {
			let mut mailbox = self.inner.mailbox.lock();
			if mailbox.state != ActorState::Inactive {
				return Err(Error::ActorAlreadySuspended);
			}
			mailbox.state = ActorState::Receiving;
			loop {
				if let Some(pair) = mailbox.queue.pop_front() {
					mailbox.state = ActorState::Inactive;
					break pair;
				}
				self.inner.available.wait(&mut mailbox);
			}
		};
		handler(message, sender);
		Ok(())
	}

	/// Register a one-shot continuation for the next message and return
	/// immediately. The continuation runs on the actor's scheduler.
	pub fn react<F>(&self, handler: F) -> Result<()>
	where
		F: FnOnce(M) + Send + 'static,
	{
		self.react_from(move |message, _| handler(message))
	}

	/// Like [`Actor::react`], with the sender visible to the handler.
	pub fn react_from<F>(&self, handler: F) -> Result<()>
	where
		F: FnOnce(M, Option<Actor<M>>) + Send + 'static,
	{
		let mut mailbox = self.inner.mailbox.lock();
		match mailbox.state {
			ActorState::Receiving | ActorState::PendingReact => {
				return Err(Error::ActorAlreadySuspended)
			}
			ActorState::Reacting | ActorState::Inactive => {}
		}
		mailbox.handler = Some(Box::new(handler));
		match mailbox.state {
			// called from inside a handler: the live drain continues with
			// the new handler, nothing to schedule
			ActorState::Reacting => {}
			_ if !mailbox.queue.is_empty() => {
				mailbox.state = ActorState::Reacting;
				drop(mailbox);
				self.schedule_drain();
			}
			_ => mailbox.state = ActorState::PendingReact,
		}
		Ok(())
	}

	/// Keep reacting with `handler` until it returns `false`. Re-arming
	/// happens from inside the handler, so a message burst is drained
	/// without a scheduler round-trip per message.
	pub fn loop_react<F>(&self, handler: F) -> Result<()>
	where
		F: FnMut(M) -> bool + Send + 'static,
	{
		let mut handler = handler;
		self.loop_react_from(move |message, _| handler(message))
	}

	/// Like [`Actor::loop_react`], with the sender visible to the handler.
	pub fn loop_react_from<F>(&self, handler: F) -> Result<()>
	where
		F: FnMut(M, Option<Actor<M>>) -> bool + Send + 'static,
	{
		let this = self.clone();
		let mut handler = handler;
		self.react_from(move |message, sender| {
			if handler(message, sender) {
				// re-arms while the drain is live, so this cannot fail
				let _ = this.loop_react_from(handler);
			}
		})
	}

	fn schedule_drain(&self) {
		let this = self.clone();
		self.inner.scheduler.schedule(Box::new(move || this.drain()));
	}

	/// Drain pass over the mailbox, run on a scheduler worker. Bounded by the
	/// mailbox size at entry so one busy actor cannot monopolise the worker;
	/// leftovers trigger a reschedule instead.
	fn drain(self) {
		let mut budget = self.inner.mailbox.lock().queue.len();
		loop {
			let (handler, message, sender) = {
				let mut mailbox = self.inner.mailbox.lock();
				if mailbox.queue.is_empty() {
					// handler stays registered; the next post re-arms us
					mailbox.state = ActorState::PendingReact;
					return;
				}
				if budget == 0 {
					drop(mailbox);
					self.schedule_drain();
					return;
				}
				let handler = match mailbox.handler.take() {
					Some(handler) => handler,
					None => {
						mailbox.state = ActorState::Inactive;
						return;
					}
				};
				let (message, sender) =
					mailbox.queue.pop_front().expect("mailbox checked non-empty above; qed");
				budget -= 1;
				(handler, message, sender)
			};

			let outcome = catch_unwind(AssertUnwindSafe(|| handler(message, sender)));
			if let Err(panic) = outcome {
				// restore the actor so it can be restarted, then let the
				// panic continue to the scheduler's worker
				let mut mailbox = self.inner.mailbox.lock();
				mailbox.state = ActorState::Inactive;
				mailbox.handler = None;
				drop(mailbox);
				log::error!("actor handler panicked, actor reset to inactive");
				resume_unwind(panic);
			}

			let mut mailbox = self.inner.mailbox.lock();
			if mailbox.handler.is_none() {
				mailbox.state = ActorState::Inactive;
				return;
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::pool::Job;
	use std::{
		sync::atomic::{AtomicUsize, Ordering},
		thread,
		time::Duration,
	};

	/// Runs jobs on the calling thread, making drains synchronous and the
	/// tests deterministic.
	struct Immediate;

	impl Scheduler for Immediate {
		fn schedule(&self, job: Job) {
			job();
		}
	}

	fn immediate() -> Arc<dyn Scheduler> {
		Arc::new(Immediate)
	}

	#[test]
	fn react_handles_a_later_post() {
		let actor: Actor<u32> = Actor::new(immediate());
		let seen = Arc::new(AtomicUsize::new(0));
		let sink = Arc::clone(&seen);
		actor.react(move |n| sink.store(n as usize, Ordering::SeqCst)).unwrap();

		assert_eq!(seen.load(Ordering::SeqCst), 0);
		actor.post(17);
		assert_eq!(seen.load(Ordering::SeqCst), 17);
	}

	#[test]
	fn react_drains_messages_posted_first() {
		let actor: Actor<u32> = Actor::new(immediate());
		actor.post(5);
		let seen = Arc::new(AtomicUsize::new(0));
		let sink = Arc::clone(&seen);
		actor.react(move |n| sink.store(n as usize, Ordering::SeqCst)).unwrap();
		assert_eq!(seen.load(Ordering::SeqCst), 5);
	}

	#[test]
	fn loop_react_consumes_a_burst_in_order() {
		let actor: Actor<u32> = Actor::new(immediate());
		for n in 0..6 {
			actor.post(n);
		}
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		actor
			.loop_react(move |n| {
				sink.lock().push(n);
				n < 4
			})
			.unwrap();
		// handler said stop at 4; the last message stays queued
		assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
	}

	#[test]
	fn second_continuation_is_rejected() {
		let actor: Actor<u32> = Actor::new(immediate());
		actor.react(|_| {}).unwrap();
		assert!(matches!(actor.react(|_| {}), Err(Error::ActorAlreadySuspended)));
		assert!(matches!(actor.receive(|_| {}), Err(Error::ActorAlreadySuspended)));

		// arming it clears the suspension
		actor.post(1);
		actor.react(|_| {}).unwrap();
	}

	#[test]
	fn receive_blocks_until_a_message_arrives() {
		let actor: Actor<String> = Actor::new(immediate());
		let from_actor = actor.clone();
		let poster = thread::spawn(move || {
			thread::sleep(Duration::from_millis(20));
			from_actor.post("hello".to_string());
		});

		let mut observed = None;
		actor.receive_from(|message, sender| observed = Some((message, sender))).unwrap();
		poster.join().unwrap();

		let (message, sender) = observed.unwrap();
		assert_eq!(message, "hello");
		assert!(sender.is_none());
	}

	#[test]
	fn sender_identity_travels_with_the_message() {
		let a1: Actor<&'static str> = Actor::new(immediate());
		let a2: Actor<&'static str> = Actor::new(immediate());

		a2.post_from("ping", &a1);
		let mut observed = None;
		a2.receive_from(|message, sender| observed = Some((message, sender))).unwrap();

		let (message, sender) = observed.unwrap();
		assert_eq!(message, "ping");
		assert_eq!(sender, Some(a1.clone()));
		assert_ne!(sender, Some(a2));
	}

	#[test]
	fn start_schedules_the_act_entry_point() {
		let entered = Arc::new(AtomicUsize::new(0));
		let marker = Arc::clone(&entered);
		let actor: Actor<u32> = Actor::with_act(immediate(), move |actor| {
			marker.fetch_add(1, Ordering::SeqCst);
			let _ = actor.react(|_| {});
		});
		actor.start();
		assert_eq!(entered.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn handler_panic_restores_the_actor() {
		let actor: Actor<u32> = Actor::new(immediate());
		actor.react(|_| panic!("handler failed")).unwrap();
		let result = std::panic::catch_unwind(AssertUnwindSafe(|| actor.post(1)));
		assert!(result.is_err());

		// restartable afterwards
		let seen = Arc::new(AtomicUsize::new(0));
		let sink = Arc::clone(&seen);
		actor.react(move |n| sink.store(n as usize, Ordering::SeqCst)).unwrap();
		actor.post(9);
		assert_eq!(seen.load(Ordering::SeqCst), 9);
	}
}
