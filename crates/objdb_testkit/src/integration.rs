//! Cross-crate integration test helpers.
//!
//! Provides a harness that mirrors a relation in an in-memory model and
//! checks the two agree, plus reusable transaction scenarios.

use crate::generators::RelationOperation;
use crate::samples::Reading;
use objdb_core::{CoreError, ObjectDb, Value};
use std::collections::BTreeMap;

/// A test harness that applies operations to the `Reading` relation and to
/// a `BTreeMap` model side by side.
pub struct RelationHarness {
    /// The database instance.
    pub db: ObjectDb,
    model: BTreeMap<i64, f64>,
}

impl RelationHarness {
    /// Creates a new harness with an in-memory database.
    pub fn new() -> Self {
        Self {
            db: ObjectDb::open_in_memory().expect("Failed to open database"),
            model: BTreeMap::new(),
        }
    }

    /// Applies a batch of operations in one committed transaction.
    ///
    /// A duplicate insert must fail exactly when the model already holds
    /// the key; the failure leaves the row untouched.
    pub fn apply(&mut self, ops: &[RelationOperation]) {
        let model = &mut self.model;
        self.db
            .transaction(|tx| {
                let readings = tx.relation::<Reading>()?;
                for op in ops {
                    match *op {
                        RelationOperation::Insert { at, value } => {
                            let result = readings.insert(&Reading::new(at, value));
                            match model.entry(at) {
                                std::collections::btree_map::Entry::Occupied(_) => assert!(
                                    matches!(result, Err(CoreError::DuplicateKey { .. })),
                                    "duplicate insert of {at} must fail"
                                ),
                                std::collections::btree_map::Entry::Vacant(slot) => {
                                    result?;
                                    slot.insert(value);
                                }
                            }
                        }
                        RelationOperation::Upsert { at, value } => {
                            let replaced = readings.upsert(&Reading::new(at, value))?;
                            assert_eq!(replaced, model.insert(at, value).is_some());
                        }
                        RelationOperation::Remove { at } => {
                            let removed = readings.remove_by_key(&[Value::I64(at)], false)?;
                            assert_eq!(removed, model.remove(&at).is_some());
                        }
                    }
                }
                Ok(())
            })
            .expect("Failed to apply operations");
    }

    /// Verifies the relation holds exactly the model's rows, in key order.
    pub fn verify_all(&self) {
        let tx = self.db.begin_read().expect("Failed to begin read");
        let readings = tx.relation::<Reading>().expect("Failed to open relation");
        let rows: Vec<(i64, f64)> = readings
            .iter()
            .map(|row| row.map(|r| (r.at, r.value)))
            .collect::<Result<_, _>>()
            .expect("Failed to enumerate");
        let expected: Vec<(i64, f64)> = self.model.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(rows, expected);
        assert_eq!(readings.count().expect("Failed to count"), expected.len());
        for (at, value) in &self.model {
            let row = readings
                .find_by_key(&[Value::I64(*at)], true)
                .expect("Failed to find");
            assert_eq!(row.map(|r| r.value), Some(*value));
        }
    }

    /// Returns the number of rows in the model.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

impl Default for RelationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Test transaction integration.
pub mod transaction {
    use super::*;
    use crate::samples::Person;

    /// Tests that a reader keeps its snapshot while a writer commits.
    pub fn test_transaction_isolation(db: &ObjectDb) {
        let oid = db
            .transaction(|tx| tx.store(&Person::named("before", 1)))
            .expect("Failed to store");

        let reader = db.begin_read().expect("Failed to begin read");
        db.transaction(|tx| {
            let person = tx.get::<Person>(oid)?.expect("stored person");
            person.borrow_mut().name = "after".to_owned();
            tx.store(&person)
        })
        .expect("Failed to update");

        let seen = reader.get::<Person>(oid).expect("Failed to get");
        assert_eq!(seen.expect("stored person").borrow().name, "before");

        let fresh = db.begin_read().expect("Failed to begin read");
        let seen = fresh.get::<Person>(oid).expect("Failed to get");
        assert_eq!(seen.expect("stored person").borrow().name, "after");
    }

    /// Tests that a failed transaction does not affect the database.
    pub fn test_transaction_abort(db: &ObjectDb) {
        let oid = db
            .transaction(|tx| tx.store(&Person::named("original", 30)))
            .expect("Failed to store");

        let result: Result<(), CoreError> = db.transaction(|tx| {
            let person = tx.get::<Person>(oid)?.expect("stored person");
            person.borrow_mut().age = 99;
            tx.store(&person)?;
            tx.store(&Person::named("stray", 1))?;
            Err(CoreError::invalid_operation("simulated abort"))
        });
        assert!(result.is_err());

        let tx = db.begin_read().expect("Failed to begin read");
        let person = tx.get::<Person>(oid).expect("Failed to get");
        assert_eq!(person.expect("stored person").borrow().age, 30);
        assert_eq!(tx.enumerate::<Person>().expect("Failed to enumerate").count(), 1);
    }
}
