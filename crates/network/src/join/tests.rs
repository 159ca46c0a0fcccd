use pretty_assertions::assert_eq;
use strand_primitives::{ObservableMatch, TerminalId, Validity};

use super::*;
use crate::source::SourceNode;

type Pair = JoinPair<&'static str, &'static str, u32>;

fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<Token<T>>>>, BoxCollector<T>) {
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	(
		seen,
		Box::new(move |token: Token<T>| -> Result<()> {
			sink.lock().push(token);
			Ok(())
		}),
	)
}

fn keyed(value: &'static str, key: u32) -> Match<(&'static str, u32)> {
	Match::new((value, key))
}

fn pair_of(left: &'static str, right: &'static str, key: u32) -> Pair {
	JoinPair { left, right, key }
}

struct Fixture {
	left: SourceNode<(&'static str, u32)>,
	right: SourceNode<(&'static str, u32)>,
	node: JoinNode<&'static str, &'static str, u32>,
}

fn fixture(diagnostics: bool) -> Fixture {
	let left = SourceNode::new();
	let right = SourceNode::new();
	let node = JoinNode::connect(Arc::new(left.clone()), Arc::new(right.clone()), diagnostics).expect("empty inputs connect");
	Fixture { left, right, node }
}

#[test]
fn assert_then_retract_pair() {
	let f = fixture(false);
	let (seen, collector) = recorder();
	let _subscription = f.node.collect(collector).expect("empty snapshot");

	f.left.assert(keyed("L1", 1)).expect("left assert");
	f.right.assert(keyed("R1", 1)).expect("right assert");
	assert_eq!(*seen.lock(), vec![Token::assert(Match::new(pair_of("L1", "R1", 1)))]);

	f.left.retract(keyed("L1", 1)).expect("left retract");
	assert_eq!(seen.lock().last(), Some(&Token::retract(Match::new(pair_of("L1", "R1", 1)))));
	assert!(!f.node.contains_key(JoinSide::Left, &1));
	assert!(f.node.contains_key(JoinSide::Right, &1));
}

#[test]
fn keys_do_not_cross() {
	let f = fixture(false);
	let (seen, collector) = recorder();
	let _subscription = f.node.collect(collector).expect("empty snapshot");

	f.left.assert(keyed("L1", 1)).expect("left assert");
	f.right.assert(keyed("R2", 2)).expect("right assert");
	assert!(seen.lock().is_empty());
}

#[test]
fn late_collector_sees_cross_product_once() {
	let f = fixture(false);
	f.left.assert(keyed("a", 1)).expect("left");
	f.left.assert(keyed("b", 1)).expect("left");
	f.left.assert(keyed("c", 2)).expect("left");
	f.right.assert(keyed("x", 1)).expect("right");
	f.right.assert(keyed("y", 3)).expect("right");

	let (seen, collector) = recorder();
	let _subscription = f.node.collect(collector).expect("snapshot");
	let mut snapshot: Vec<Pair> = seen.lock().iter().map(|t| t.value().clone()).collect();
	snapshot.sort_by_key(|p| p.left);
	assert_eq!(snapshot, vec![pair_of("a", "x", 1), pair_of("b", "x", 1)]);

	f.right.assert(keyed("z", 2)).expect("right");
	assert_eq!(seen.lock().len(), 3);
	assert_eq!(seen.lock().last(), Some(&Token::assert(Match::new(pair_of("c", "z", 2)))));
}

#[test]
fn retract_without_assert_fails_and_leaves_memory() {
	let f = fixture(false);
	let (seen, collector) = recorder();
	let _subscription = f.node.collect(collector).expect("empty snapshot");
	f.left.assert(keyed("L1", 1)).expect("left assert");
	f.right.assert(keyed("R1", 1)).expect("right assert");

	let err = f.right.retract(keyed("ghost", 1)).expect_err("retract of unknown match");
	assert_eq!(
		err,
		NetworkError::RetractWithoutAssert {
			side: JoinSide::Right,
			key: "1".to_owned(),
		}
	);
	assert_eq!(f.node.match_count(JoinSide::Right), 1);
	assert_eq!(seen.lock().len(), 1);
}

#[test]
fn diagnostics_pass_on_consistent_memory() {
	let f = fixture(true);
	f.left.assert(keyed("L1", 1)).expect("left assert");
	f.left.retract(keyed("L1", 1)).expect("left retract");
	f.right.assert(keyed("R1", 4)).expect("right assert");
	assert_eq!(f.node.match_count(JoinSide::Left), 0);
}

#[test]
fn pair_validity_follows_both_parents() {
	let f = fixture(false);
	let (seen, collector) = recorder();
	let _subscription = f.node.collect(collector).expect("empty snapshot");

	let signal = ObservableMatch::new(TerminalId(1));
	f.left.assert(keyed("L1", 1).observed(signal.clone())).expect("left");
	f.right.assert(keyed("R1", 1)).expect("right");

	let joined = seen.lock()[0].matched.clone();
	assert_eq!(joined.validate(), Validity::Valid);
	assert_eq!(joined.observable_submatches(), vec![signal.clone()]);

	signal.invalidate();
	assert_eq!(joined.validate(), Validity::Invalid);
}

#[test]
fn join_on_maps_keys_and_filters() {
	let network = Network::detached();
	let words = SourceNode::new();
	let lengths = SourceNode::new();
	let query = join_on(
		words.clone(),
		|w: &&'static str| Some(w.len()).filter(|len| *len > 0),
		lengths.clone(),
		|n: &usize| [*n],
	);
	let producer = query.producer(&network).expect("build");
	let (seen, collector) = recorder();
	let _subscription = producer.collect(collector).expect("snapshot");

	words.assert(Match::new("")).expect("filtered out");
	words.assert(Match::new("ab")).expect("word");
	lengths.assert(Match::new(2)).expect("length");
	lengths.assert(Match::new(0)).expect("length");

	let values: Vec<_> = seen.lock().iter().map(|t| (t.added, t.value().clone())).collect();
	assert_eq!(
		values,
		vec![(
			true,
			JoinPair {
				left: "ab",
				right: 2,
				key: 2,
			}
		)]
	);
}

#[test]
fn multi_key_values_pair_per_key() {
	let network = Network::detached();
	let tags = SourceNode::new();
	let items = SourceNode::new();
	let query = join_on(tags.clone(), |t: &u8| [*t], items.clone(), |i: &(char, [u8; 2])| i.1);
	let producer = query.producer(&network).expect("build");

	tags.assert(Match::new(1)).expect("tag");
	tags.assert(Match::new(2)).expect("tag");
	items.assert(Match::new(('a', [1, 2]))).expect("item");

	let (seen, collector) = recorder();
	let _subscription = producer.collect(collector).expect("snapshot");
	let mut keys: Vec<u8> = seen.lock().iter().map(|t| t.value().key).collect();
	keys.sort_unstable();
	assert_eq!(keys, vec![1, 2]);
}

#[test]
fn disposed_node_stops_listening() {
	let f = fixture(false);
	f.node.dispose();
	assert_eq!(f.left.subscriber_count(), 0);
	assert_eq!(f.right.subscriber_count(), 0);
	f.left.assert(keyed("L1", 1)).expect("no downstream");
	assert_eq!(f.node.match_count(JoinSide::Left), 0);
}
