use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use alloy_primitives::{Address, TxHash};

use crate::types::GameEvent;

/// Canonical, deduplicated list of settled bets plus per-contract progress.
///
/// The list is always ordered most recent first and never holds two events
/// with the same transaction hash.
#[derive(Debug, Default)]
pub struct ReconciliationStore {
    events: Vec<GameEvent>,
    seen: HashSet<TxHash>,
    /// Highest block incorporated per contract.
    high_water_marks: HashMap<Address, u64>,
}

/// What a single merge changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Events that were new to the store, most recent first.
    pub added: Vec<GameEvent>,
    /// Events dropped because their transaction hash was already known.
    pub duplicates: usize,
    pub high_water_mark: Option<u64>,
}

/// Most recent first. Same-block events are ordered by transaction index,
/// then log index (both descending), then transaction hash.
pub fn recency(a: &GameEvent, b: &GameEvent) -> Ordering {
    b.block_number
        .cmp(&a.block_number)
        .then_with(|| b.transaction_index.cmp(&a.transaction_index))
        .then_with(|| b.log_index.cmp(&a.log_index))
        .then_with(|| a.transaction_hash.cmp(&b.transaction_hash))
}

impl ReconciliationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a freshly decoded batch from `contract`.
    ///
    /// Events whose transaction hash is already present (or repeated inside
    /// the batch) are dropped. The contract's high-water-mark is raised to the
    /// highest block in the batch and never lowered.
    pub fn merge(&mut self, contract: Address, new_events: Vec<GameEvent>) -> MergeOutcome {
        if let Some(batch_max) = new_events.iter().map(|e| e.block_number).max() {
            let mark = self.high_water_marks.entry(contract).or_insert(batch_max);
            *mark = (*mark).max(batch_max);
        }

        let total = new_events.len();
        let mut added: Vec<GameEvent> = new_events
            .into_iter()
            .filter(|e| self.seen.insert(e.transaction_hash))
            .collect();
        let duplicates = total - added.len();

        if !added.is_empty() {
            added.sort_by(recency);
            let previous = std::mem::take(&mut self.events);
            self.events = added.iter().cloned().chain(previous).collect();
            self.events.sort_by(recency);
        }

        MergeOutcome {
            added,
            duplicates,
            high_water_mark: self.high_water_mark(contract),
        }
    }

    /// Most recent first.
    pub fn events(&self) -> &[GameEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, tx: &TxHash) -> bool {
        self.seen.contains(tx)
    }

    pub fn high_water_mark(&self, contract: Address) -> Option<u64> {
        self.high_water_marks.get(&contract).copied()
    }

    /// First block the next query for `contract` should request: 0 before
    /// anything was seen, otherwise one past the high-water-mark.
    pub fn next_from_block(&self, contract: Address) -> u64 {
        self.high_water_mark(contract).map_or(0, |b| b + 1)
    }

    /// Bets placed by `player`, most recent first.
    pub fn for_player(&self, player: Address) -> impl Iterator<Item = &GameEvent> {
        self.events.iter().filter(move |e| e.player == player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{COINFLIP, DICE, OTHER_PLAYER, game_event};
    use crate::types::GameType;

    fn dice(block: u64, seed: u64) -> GameEvent {
        game_event(DICE, GameType::Dice, block, seed)
    }

    fn coinflip(block: u64, seed: u64) -> GameEvent {
        game_event(COINFLIP, GameType::Coinflip, block, seed)
    }

    fn blocks(store: &ReconciliationStore) -> Vec<u64> {
        store.events().iter().map(|e| e.block_number).collect()
    }

    fn assert_sorted_and_unique(store: &ReconciliationStore) {
        for pair in store.events().windows(2) {
            assert!(pair[0].block_number >= pair[1].block_number);
        }
        let unique: HashSet<_> = store.events().iter().map(|e| e.transaction_hash).collect();
        assert_eq!(unique.len(), store.len());
    }

    #[test]
    fn first_load() {
        let mut store = ReconciliationStore::new();
        assert_eq!(store.next_from_block(DICE), 0);

        let outcome = store.merge(DICE, vec![dice(100, 1), dice(105, 2)]);
        assert_eq!(blocks(&store), vec![105, 100]);
        assert_eq!(outcome.added.len(), 2);
        assert_eq!(outcome.duplicates, 0);
        assert_eq!(outcome.high_water_mark, Some(105));
        assert_eq!(store.next_from_block(DICE), 106);
    }

    #[test]
    fn incremental_poll() {
        let mut store = ReconciliationStore::new();
        store.merge(DICE, vec![dice(100, 1), dice(105, 2)]);
        store.merge(DICE, vec![dice(110, 3)]);
        assert_eq!(blocks(&store), vec![110, 105, 100]);
        assert_eq!(store.high_water_mark(DICE), Some(110));
    }

    #[test]
    fn duplicate_replay_is_ignored() {
        let mut store = ReconciliationStore::new();
        store.merge(DICE, vec![dice(100, 1), dice(105, 2)]);
        store.merge(DICE, vec![dice(110, 3)]);

        let outcome = store.merge(DICE, vec![dice(110, 3)]);
        assert!(outcome.added.is_empty());
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(store.len(), 3);
        assert_eq!(blocks(&store), vec![110, 105, 100]);
    }

    #[test]
    fn merge_is_idempotent() {
        let batch = vec![dice(100, 1), dice(90, 2), dice(95, 3)];

        let mut once = ReconciliationStore::new();
        once.merge(DICE, batch.clone());

        let mut twice = ReconciliationStore::new();
        twice.merge(DICE, batch.clone());
        twice.merge(DICE, batch);

        assert_eq!(once.events(), twice.events());
        assert_eq!(once.high_water_mark(DICE), twice.high_water_mark(DICE));
    }

    #[test]
    fn duplicates_inside_one_batch() {
        let mut store = ReconciliationStore::new();
        let outcome = store.merge(DICE, vec![dice(100, 1), dice(100, 1)]);
        assert_eq!(store.len(), 1);
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn empty_merge_leaves_mark_unchanged() {
        let mut store = ReconciliationStore::new();
        let outcome = store.merge(DICE, Vec::new());
        assert_eq!(outcome.high_water_mark, None);
        assert_eq!(store.next_from_block(DICE), 0);

        store.merge(DICE, vec![dice(50, 1)]);
        store.merge(DICE, Vec::new());
        assert_eq!(store.high_water_mark(DICE), Some(50));
    }

    #[test]
    fn high_water_mark_never_decreases() {
        let mut store = ReconciliationStore::new();
        let mut previous = None;
        for (block, seed) in [(100, 1), (80, 2), (120, 3), (119, 4), (120, 5), (10, 6)] {
            store.merge(DICE, vec![dice(block, seed)]);
            let mark = store.high_water_mark(DICE);
            assert!(mark >= previous);
            previous = mark;
        }
        assert_eq!(previous, Some(120));
    }

    #[test]
    fn contracts_tracked_independently() {
        let mut store = ReconciliationStore::new();
        store.merge(DICE, vec![dice(200, 1)]);
        store.merge(COINFLIP, vec![coinflip(150, 2), coinflip(210, 3)]);

        assert_eq!(store.high_water_mark(DICE), Some(200));
        assert_eq!(store.high_water_mark(COINFLIP), Some(210));
        assert_eq!(blocks(&store), vec![210, 200, 150]);
        assert_sorted_and_unique(&store);
    }

    #[test]
    fn older_batch_lands_in_order() {
        let mut store = ReconciliationStore::new();
        store.merge(COINFLIP, vec![coinflip(300, 1)]);
        store.merge(DICE, vec![dice(120, 2), dice(310, 3)]);
        assert_eq!(blocks(&store), vec![310, 300, 120]);
    }

    #[test]
    fn same_block_tie_break_is_deterministic() {
        let mut a = dice(100, 1);
        a.transaction_index = 3;
        let mut b = dice(100, 2);
        b.transaction_index = 7;
        let mut c = dice(100, 3);
        c.transaction_index = 7;
        c.log_index = 2;

        let mut forward = ReconciliationStore::new();
        forward.merge(DICE, vec![a.clone(), b.clone(), c.clone()]);
        let mut reverse = ReconciliationStore::new();
        reverse.merge(DICE, vec![c.clone(), b.clone()]);
        reverse.merge(DICE, vec![a.clone()]);

        assert_eq!(forward.events(), reverse.events());
        assert_eq!(forward.events(), &[c, b, a][..]);
    }

    #[test]
    fn list_never_shrinks_across_merge_sequence() {
        let mut store = ReconciliationStore::new();
        let batches = vec![
            vec![dice(10, 1), dice(12, 2)],
            vec![dice(12, 2)],
            vec![coinflip(11, 3), dice(15, 4), dice(10, 1)],
            vec![],
            vec![coinflip(9, 5)],
        ];
        let mut previous_len = 0;
        for batch in batches {
            let contract = batch.first().map_or(DICE, |e| e.contract);
            store.merge(contract, batch);
            assert!(store.len() >= previous_len);
            previous_len = store.len();
            assert_sorted_and_unique(&store);
        }
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn filter_by_player() {
        let mut store = ReconciliationStore::new();
        let mut theirs = dice(101, 2);
        theirs.player = OTHER_PLAYER;
        store.merge(DICE, vec![dice(100, 1), theirs, dice(102, 3)]);

        let mine: Vec<u64> = store
            .for_player(crate::fixtures::PLAYER)
            .map(|e| e.block_number)
            .collect();
        assert_eq!(mine, vec![102, 100]);
        assert!(store.contains(&crate::fixtures::tx_hash(2)));
    }
}
