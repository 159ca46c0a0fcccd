//! Join output tracks the keyed cross product of its live inputs.

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use strand_network::{Network, Producer, Query, Result, SourceNode, Subscription, raw_join_on};
use strand_primitives::{JoinPair, Match, Token};

type Pair = JoinPair<u8, u8, u8>;

/// Live pair multiplicities seen by one collector.
#[derive(Default)]
struct Tally {
	counts: FxHashMap<Pair, i32>,
	negative: bool,
}

impl Tally {
	fn live(&self) -> FxHashSet<Pair> {
		self.counts.iter().filter(|(_, count)| **count != 0).map(|(pair, _)| pair.clone()).collect()
	}

	fn duplicated(&self) -> bool {
		self.counts.values().any(|count| *count > 1)
	}
}

fn tally(producer: &dyn Producer<Pair>) -> (Arc<Mutex<Tally>>, Subscription) {
	let tally = Arc::new(Mutex::new(Tally::default()));
	let sink = Arc::clone(&tally);
	let subscription = producer
		.collect(Box::new(move |token: Token<Pair>| -> Result<()> {
			let mut tally = sink.lock();
			let count = tally.counts.entry(token.value().clone()).or_default();
			*count += if token.added { 1 } else { -1 };
			if *count < 0 {
				tally.negative = true;
			}
			Ok(())
		}))
		.expect("delivery succeeds");
	(tally, subscription)
}

fn expected(left: &FxHashSet<(u8, u8)>, right: &FxHashSet<(u8, u8)>) -> FxHashSet<Pair> {
	let mut pairs = FxHashSet::default();
	for (l, lk) in left {
		for (r, rk) in right {
			if lk == rk {
				pairs.insert(JoinPair {
					left: *l,
					right: *r,
					key: *lk,
				});
			}
		}
	}
	pairs
}

/// Retracts `value` if live, asserts it otherwise.
fn toggle(source: &SourceNode<(u8, u8)>, live: &mut FxHashSet<(u8, u8)>, value: (u8, u8)) {
	if live.remove(&value) {
		source.retract(Match::new(value)).expect("retract of live match");
	} else {
		live.insert(value);
		source.assert(Match::new(value)).expect("assert");
	}
}

proptest! {
	#[test]
	fn join_matches_cross_product(
		ops in prop::collection::vec((any::<bool>(), 0u8..4, 0u8..3), 0..80),
		split in 0usize..80,
	) {
		let network = Network::detached();
		let left: SourceNode<(u8, u8)> = SourceNode::new();
		let right: SourceNode<(u8, u8)> = SourceNode::new();
		let producer = raw_join_on(left.clone(), right.clone()).producer(&network).expect("build");
		let (early, _early_subscription) = tally(producer.as_ref());

		let mut live_left = FxHashSet::default();
		let mut live_right = FxHashSet::default();
		let split = split.min(ops.len());
		let mut late = None;
		for (index, (is_left, value, key)) in ops.iter().copied().enumerate() {
			if index == split {
				late = Some(tally(producer.as_ref()));
			}
			if is_left {
				toggle(&left, &mut live_left, (value, key));
			} else {
				toggle(&right, &mut live_right, (value, key));
			}
		}
		let (late, _late_subscription) = late.unwrap_or_else(|| tally(producer.as_ref()));

		let want = expected(&live_left, &live_right);
		for seen in [early, late] {
			let seen = seen.lock();
			prop_assert!(!seen.negative);
			prop_assert!(!seen.duplicated());
			prop_assert_eq!(seen.live(), want.clone());
		}
	}
}

#[test]
fn late_subscriber_sees_state_once() {
	let network = Network::detached();
	let left: SourceNode<(u8, u8)> = SourceNode::new();
	let right: SourceNode<(u8, u8)> = SourceNode::new();
	let producer = raw_join_on(left.clone(), right.clone()).producer(&network).expect("build");

	left.assert(Match::new((1, 0))).expect("left");
	left.assert(Match::new((2, 0))).expect("left");
	right.assert(Match::new((7, 0))).expect("right");
	left.retract(Match::new((1, 0))).expect("left");

	let (seen, _subscription) = tally(producer.as_ref());
	right.assert(Match::new((8, 0))).expect("right");

	let seen = seen.lock();
	let mut live: Vec<Pair> = seen.live().into_iter().collect();
	live.sort_by_key(|pair| pair.right);
	assert_eq!(
		live,
		vec![
			JoinPair {
				left: 2,
				right: 7,
				key: 0,
			},
			JoinPair {
				left: 2,
				right: 8,
				key: 0,
			},
		]
	);
	assert!(!seen.duplicated());
}

#[test]
fn retract_without_assert_reaches_the_caller() {
	let network = Network::detached();
	let left: SourceNode<(u8, u8)> = SourceNode::new();
	let right: SourceNode<(u8, u8)> = SourceNode::new();
	let _producer = raw_join_on(left.clone(), right.clone()).producer(&network).expect("build");

	let err = left.apply([Token::retract(Match::new((3, 1)))]).expect_err("protocol violation");
	assert_eq!(err.to_string(), "left join input retracted a match never asserted under key 1");
}

#[test]
fn subscribing_during_concurrent_writes_neither_gaps_nor_duplicates() {
	for round in 0..50usize {
		let network = Network::detached();
		let left: SourceNode<(u8, u8)> = SourceNode::new();
		let right: SourceNode<(u8, u8)> = SourceNode::new();
		let producer = raw_join_on(left.clone(), right.clone()).producer(&network).expect("build");

		let (seen, _subscription, live_left, live_right) = std::thread::scope(|threads| {
			let (left, right) = (left.clone(), right.clone());
			let writer = threads.spawn(move || {
				let mut live_left = FxHashSet::default();
				let mut live_right = FxHashSet::default();
				for step in 0..200usize {
					let value = ((step * 7 + round) % 4) as u8;
					let key = (step % 3) as u8;
					if step % 2 == 0 {
						toggle(&left, &mut live_left, (value, key));
					} else {
						toggle(&right, &mut live_right, (value, key));
					}
					if step % 16 == 0 {
						std::thread::yield_now();
					}
				}
				(live_left, live_right)
			});
			let (seen, subscription) = tally(producer.as_ref());
			let (live_left, live_right) = writer.join().expect("writer finishes");
			(seen, subscription, live_left, live_right)
		});

		let seen = seen.lock();
		assert!(!seen.negative, "round {round}: retraction before assertion");
		assert!(!seen.duplicated(), "round {round}: pair delivered twice");
		assert_eq!(seen.live(), expected(&live_left, &live_right), "round {round}");
	}
}
