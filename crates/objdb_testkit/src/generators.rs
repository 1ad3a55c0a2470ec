//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use objdb_core::{DictId, FieldKind, Value};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for generating display names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9 _-]{0,23}").expect("Invalid regex")
}

/// Strategy for generating `(name, age)` pairs.
pub fn person_strategy() -> impl Strategy<Value = (String, u32)> {
    (name_strategy(), 0u32..130)
}

/// Strategy for generating a value matching `kind`.
///
/// Object references are always null; they need a live transaction.
pub fn value_strategy(kind: &FieldKind) -> BoxedStrategy<Value> {
    match kind {
        FieldKind::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        FieldKind::U8 => any::<u8>().prop_map(Value::U8).boxed(),
        FieldKind::U32 => any::<u32>().prop_map(Value::U32).boxed(),
        FieldKind::U64 => any::<u64>().prop_map(Value::U64).boxed(),
        FieldKind::I32 => any::<i32>().prop_map(Value::I32).boxed(),
        FieldKind::I64 => any::<i64>().prop_map(Value::I64).boxed(),
        FieldKind::F64 => (-1.0e12f64..1.0e12).prop_map(Value::F64).boxed(),
        FieldKind::String => name_strategy().prop_map(Value::String).boxed(),
        FieldKind::Bytes => prop::collection::vec(any::<u8>(), 0..64)
            .prop_map(Value::Bytes)
            .boxed(),
        FieldKind::Guid => prop::array::uniform16(any::<u8>())
            .prop_map(|bytes| Value::Guid(Uuid::from_bytes(bytes)))
            .boxed(),
        FieldKind::List(item) => prop::collection::vec(value_strategy(item), 0..8)
            .prop_map(Value::List)
            .boxed(),
        FieldKind::Optional(item) => prop::option::of(value_strategy(item))
            .prop_map(Value::optional)
            .boxed(),
        FieldKind::Object => Just(Value::Object(None)).boxed(),
        FieldKind::Dictionary => (1u64..1000)
            .prop_map(|id| Value::Dictionary(DictId::new(id)))
            .boxed(),
    }
}

/// One operation against a relation keyed by a signed integer.
#[derive(Debug, Clone)]
pub enum RelationOperation {
    /// Insert a row; fails if the key exists.
    Insert {
        /// Primary key.
        at: i64,
        /// Value field.
        value: f64,
    },
    /// Insert or replace a row.
    Upsert {
        /// Primary key.
        at: i64,
        /// Value field.
        value: f64,
    },
    /// Remove a row if present.
    Remove {
        /// Primary key.
        at: i64,
    },
}

/// Strategy for generating a single relation operation.
///
/// Keys are drawn from a small range so operations collide.
pub fn relation_operation_strategy() -> impl Strategy<Value = RelationOperation> {
    let key = -20i64..20;
    let value = -1000.0f64..1000.0;
    prop_oneof![
        (key.clone(), value.clone()).prop_map(|(at, value)| RelationOperation::Insert { at, value }),
        (key.clone(), value).prop_map(|(at, value)| RelationOperation::Upsert { at, value }),
        key.prop_map(|at| RelationOperation::Remove { at }),
    ]
}

/// Strategy for generating a batch of relation operations.
pub fn relation_operations_strategy(
    max_ops: usize,
) -> impl Strategy<Value = Vec<RelationOperation>> {
    prop::collection::vec(relation_operation_strategy(), 1..=max_ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    proptest! {
        #[test]
        fn generated_values_match_their_kind(value in value_strategy(&FieldKind::list(FieldKind::optional(FieldKind::I32)))) {
            prop_assert!(value.matches(&FieldKind::list(FieldKind::optional(FieldKind::I32))));
        }

        #[test]
        fn names_are_never_empty(name in name_strategy()) {
            prop_assert!(!name.is_empty());
        }
    }

    #[test]
    fn operation_batches_respect_bounds() {
        let mut runner = TestRunner::default();
        let strategy = relation_operations_strategy(5);
        for _ in 0..20 {
            let ops = strategy.new_tree(&mut runner).unwrap().current();
            assert!(!ops.is_empty() && ops.len() <= 5);
        }
    }
}
