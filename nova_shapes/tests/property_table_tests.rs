// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;

use nova_shapes::{PropertyKey, PropertyTable, SymbolId, heap::HeapBudget, shape::MIN_SIZE};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Operation {
    Insert(PropertyKey, u32),
    Remove(PropertyKey),
}

fn key_strategy() -> impl Strategy<Value = PropertyKey> {
    prop_oneof![
        (0u32..48).prop_map(PropertyKey::Integer),
        (0u32..48).prop_map(|id| PropertyKey::Symbol(SymbolId(id))),
    ]
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => (key_strategy(), any::<u32>()).prop_map(|(key, value)| Operation::Insert(key, value)),
        2 => key_strategy().prop_map(Operation::Remove),
    ]
}

fn insert(table: &mut PropertyTable<u32>, budget: &mut HeapBudget, key: PropertyKey, value: u32) {
    if table.needs_to_grow() {
        table.grow(budget).unwrap();
    }
    let slot = table.search(key, true);
    table.store(slot, key, value);
}

fn remove(table: &mut PropertyTable<u32>, budget: &mut HeapBudget, key: PropertyKey) -> bool {
    let slot = table.search(key, false);
    if table.get(slot).is_none() {
        return false;
    }
    table.remove(slot);
    table.maybe_shrink(budget);
    true
}

#[test]
fn probing_passes_over_tombstones() {
    let mut budget = HeapBudget::new(None);
    let mut table = PropertyTable::new(&mut budget, 0).unwrap();
    assert_eq!(table.capacity(), MIN_SIZE);
    // Fill the table right up to the growth threshold.
    let keys: Vec<PropertyKey> = (0..12).map(PropertyKey::Integer).collect();
    for (value, key) in keys.iter().enumerate() {
        insert(&mut table, &mut budget, *key, value as u32);
    }
    assert!(table.needs_to_grow());

    for key in keys.iter().step_by(2) {
        assert!(remove(&mut table, &mut budget, *key));
    }
    assert_eq!(table.entry_count(), 6);
    for (value, key) in keys.iter().enumerate() {
        let expected = (value % 2 == 1).then_some(value as u32);
        assert_eq!(table.lookup(*key), expected);
    }

    for key in keys.iter().step_by(2) {
        let slot = table.search(*key, true);
        assert_eq!(table.get(slot), None);
    }
    for key in keys.iter().step_by(2) {
        insert(&mut table, &mut budget, *key, 100);
    }
    assert_eq!(table.entry_count(), 12);
    for (value, key) in keys.iter().enumerate() {
        let expected = if value % 2 == 0 { 100 } else { value as u32 };
        assert_eq!(table.lookup(*key), Some(expected));
    }
}

#[test]
fn rebuilding_drops_tombstones_and_keeps_entries() {
    let mut budget = HeapBudget::new(None);
    let mut table = PropertyTable::new(&mut budget, 0).unwrap();
    let keys: Vec<PropertyKey> = (0..40).map(|id| PropertyKey::Symbol(SymbolId(id))).collect();
    for (value, key) in keys.iter().enumerate() {
        insert(&mut table, &mut budget, *key, value as u32);
    }
    let grown = table.generation();
    assert!(grown > 0);
    assert_eq!(budget.used(), table.size_of_excluding_this());

    for key in &keys[..36] {
        assert!(remove(&mut table, &mut budget, *key));
    }
    assert!(table.generation() > grown);
    assert_eq!(budget.used(), table.size_of_excluding_this());
    let mut live: Vec<(PropertyKey, u32)> = table.iter().collect();
    live.sort();
    let expected: Vec<(PropertyKey, u32)> = keys[36..]
        .iter()
        .zip(36u32..)
        .map(|(key, value)| (*key, value))
        .collect();
    assert_eq!(live, expected);
}

#[test]
fn clear_keeps_the_allocation() {
    let mut budget = HeapBudget::new(None);
    let mut table = PropertyTable::new(&mut budget, 20).unwrap();
    for id in 0..20 {
        insert(&mut table, &mut budget, PropertyKey::Integer(id), id);
    }
    let capacity = table.capacity();
    table.clear();
    assert_eq!(table.capacity(), capacity);
    assert_eq!(table.entry_count(), 0);
    assert_eq!(table.removed_count(), 0);
    assert_eq!(table.iter().count(), 0);
    assert_eq!(table.lookup(PropertyKey::Integer(3)), None);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn table_agrees_with_a_hash_map(
        operations in prop::collection::vec(operation_strategy(), 0..200),
    ) {
        let mut budget = HeapBudget::new(None);
        let mut table = PropertyTable::new(&mut budget, 0).unwrap();
        let mut model: HashMap<PropertyKey, u32> = HashMap::new();

        for operation in operations {
            match operation {
                Operation::Insert(key, value) => {
                    insert(&mut table, &mut budget, key, value);
                    model.insert(key, value);
                }
                Operation::Remove(key) => {
                    let removed = remove(&mut table, &mut budget, key);
                    prop_assert_eq!(removed, model.remove(&key).is_some());
                }
            }
            prop_assert_eq!(table.entry_count() as usize, model.len());
            prop_assert!(
                ((table.entry_count() + table.removed_count()) as usize) < table.capacity()
            );
            prop_assert!(table.capacity() >= MIN_SIZE);
            prop_assert!(table.capacity().is_power_of_two());
        }

        for (key, value) in &model {
            prop_assert_eq!(table.lookup(*key), Some(*value));
            let slot = table.search(*key, false);
            prop_assert_eq!(table.get(slot), Some(*value));
        }
        for id in 48..56 {
            prop_assert_eq!(table.lookup(PropertyKey::Integer(id)), None);
        }
        prop_assert_eq!(table.iter().count(), model.len());
        prop_assert_eq!(budget.used(), table.size_of_excluding_this());
    }
}
