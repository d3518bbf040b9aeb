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

//! FIFO queue with round-robin rotation over per-tag buckets, so no tag can
//! starve another. The queue is deliberately not synchronised; owners wrap it
//! in whatever locking regime they already have (the pool holds it under its
//! own mutex).

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::error::{Error, Result};

/// Fairness label attached to each queued element.
pub type Tag = i64;

/// Per-tag FIFO plus its position in the list of non-empty buckets.
/// Buckets are created on first use and kept for the life of the queue;
/// they re-enter the list whenever they become non-empty again.
struct Bucket<T> {
	tag: Tag,
	fifo: VecDeque<T>,
	next: Option<usize>,
}

/// A FIFO container that serves tags round-robin.
///
/// Elements carry a [`Tag`]; dequeuing pops from the least-recently-served
/// non-empty tag and rotates that tag to the back of the service order.
/// Within one tag, elements come out in insertion order. All operations
/// are O(1).
pub struct FairQueue<T> {
	/// Bucket arena, indexed by the slots stored in `index` and the links.
	buckets: Vec<Bucket<T>>,
	index: HashMap<Tag, usize>,
	/// Intrusive list of the currently non-empty buckets, in service order.
	head: Option<usize>,
	tail: Option<usize>,
	len: usize,
}

impl<T> Default for FairQueue<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> FairQueue<T> {
	pub fn new() -> Self {
		FairQueue { buckets: Vec::new(), index: HashMap::new(), head: None, tail: None, len: 0 }
	}

	/// Append `value` under the default tag (`0`).
	pub fn enqueue(&mut self, value: T) {
		self.enqueue_tagged(0, value)
	}

	/// Append `value` to its tag's FIFO. A bucket that was empty before this
	/// call joins the service order at the back.
	pub fn enqueue_tagged(&mut self, tag: Tag, value: T) {
		let slot = match self.index.get(&tag) {
			Some(&slot) => slot,
			None => {
				let slot = self.buckets.len();
				self.buckets.push(Bucket { tag, fifo: VecDeque::new(), next: None });
				self.index.insert(tag, slot);
				slot
			}
		};
		let was_empty = self.buckets[slot].fifo.is_empty();
		self.buckets[slot].fifo.push_back(value);
		if was_empty {
			self.link_tail(slot);
		}
		self.len += 1;
	}

	/// Remove and return the first element of the bucket at the front of the
	/// service order, together with its tag. The bucket is then rotated to
	/// the back (if it still has elements and is not alone) or dropped from
	/// the order (if it drained).
	pub fn dequeue(&mut self) -> Result<(T, Tag)> {
		let slot = self.head.ok_or(Error::EmptyQueue)?;
		let value = self.buckets[slot].fifo.pop_front().expect("listed buckets are non-empty; qed");
		let tag = self.buckets[slot].tag;
		self.len -= 1;

		if self.buckets[slot].fifo.is_empty() {
			self.unlink_head(slot);
		} else if self.tail != Some(slot) {
			self.unlink_head(slot);
			self.link_tail(slot);
		}
		// a lone non-empty bucket stays at the head

		Ok((value, tag))
	}

	pub fn count(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Number of queued elements carrying `tag`.
	pub fn count_tagged(&self, tag: Tag) -> usize {
		self.index.get(&tag).map_or(0, |&slot| self.buckets[slot].fifo.len())
	}

	fn link_tail(&mut self, slot: usize) {
		self.buckets[slot].next = None;
		match self.tail {
			Some(tail) => self.buckets[tail].next = Some(slot),
			None => self.head = Some(slot),
		}
		self.tail = Some(slot);
	}

	fn unlink_head(&mut self, slot: usize) {
		self.head = self.buckets[slot].next.take();
		if self.head.is_none() {
			self.tail = None;
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn tags_cycle_round_robin() {
		let mut queue = FairQueue::new();
		for tag in 1..=3 {
			for n in 1..=4 {
				queue.enqueue_tagged(tag, format!("{}{}", tag, n));
			}
		}
		assert_eq!(queue.count(), 12);

		let mut order = Vec::new();
		for _ in 0..12 {
			let (value, tag) = queue.dequeue().unwrap();
			order.push((value, tag));
		}
		let tags: Vec<Tag> = order.iter().map(|(_, tag)| *tag).collect();
		assert_eq!(tags, vec![1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3]);

		assert!(queue.is_empty());
		assert!(matches!(queue.dequeue(), Err(Error::EmptyQueue)));
	}

	#[test]
	fn fifo_order_within_a_tag() {
		let mut queue = FairQueue::new();
		for n in 0..8 {
			queue.enqueue_tagged(7, n);
			queue.enqueue_tagged(9, n + 100);
		}
		let mut sevens = Vec::new();
		let mut nines = Vec::new();
		while let Ok((value, tag)) = queue.dequeue() {
			match tag {
				7 => sevens.push(value),
				9 => nines.push(value),
				_ => unreachable!(),
			}
		}
		assert_eq!(sevens, (0..8).collect::<Vec<_>>());
		assert_eq!(nines, (100..108).collect::<Vec<_>>());
	}

	#[test]
	fn drained_bucket_rejoins_at_the_back() {
		let mut queue = FairQueue::new();
		queue.enqueue_tagged(1, "a");
		queue.enqueue_tagged(2, "b");
		queue.enqueue_tagged(2, "c");

		assert_eq!(queue.dequeue().unwrap(), ("a", 1));
		// tag 1 drained; re-enqueuing puts it behind tag 2
		queue.enqueue_tagged(1, "d");
		assert_eq!(queue.dequeue().unwrap(), ("b", 2));
		assert_eq!(queue.dequeue().unwrap(), ("d", 1));
		assert_eq!(queue.dequeue().unwrap(), ("c", 2));
		assert!(queue.is_empty());
	}

	#[test]
	fn lone_bucket_keeps_serving() {
		let mut queue = FairQueue::new();
		queue.enqueue(1);
		queue.enqueue(2);
		queue.enqueue(3);
		assert_eq!(queue.dequeue().unwrap(), (1, 0));
		assert_eq!(queue.dequeue().unwrap(), (2, 0));
		assert_eq!(queue.dequeue().unwrap(), (3, 0));
	}

	#[test]
	fn counts_track_every_operation() {
		let mut queue = FairQueue::new();
		assert!(queue.is_empty());
		assert_eq!(queue.count_tagged(5), 0);

		queue.enqueue_tagged(5, ());
		queue.enqueue_tagged(5, ());
		queue.enqueue_tagged(-3, ());
		assert_eq!(queue.count(), 3);
		assert_eq!(queue.count_tagged(5), 2);
		assert_eq!(queue.count_tagged(-3), 1);

		queue.dequeue().unwrap();
		assert_eq!(queue.count(), 2);
		assert_eq!(queue.count_tagged(5), 1);
	}

	#[test]
	fn interleaved_enqueues_stay_within_fair_window() {
		// after k*j dequeues every tag has been served j +/- 1 times
		let tags: Vec<Tag> = (0..5).collect();
		let mut queue = FairQueue::new();
		for n in 0..20 {
			for &tag in &tags {
				queue.enqueue_tagged(tag, n);
			}
		}
		let mut served: HashMap<Tag, usize> = HashMap::new();
		for round in 1..=20 {
			for _ in 0..tags.len() {
				let (_, tag) = queue.dequeue().unwrap();
				*served.entry(tag).or_insert(0) += 1;
			}
			for &tag in &tags {
				let count = served[&tag];
				assert!(count + 1 >= round && count <= round + 1, "tag {} served {} times after round {}", tag, count, round);
			}
		}
	}
}
