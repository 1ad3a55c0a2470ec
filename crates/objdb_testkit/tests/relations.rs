//! Relations: key ordering, secondary keys, nested dictionary cleanup,
//! inline object graphs and enumeration under mutation.

use objdb_core::{
    CoreError, CoreResult, FieldDef, FieldKind, Obj, ObjectTransaction, Record, Relation,
    SecondaryKeyDef, TableFamily, Value,
};
use objdb_testkit::prelude::*;

fn add_job(tx: &ObjectTransaction, company: &str, number: u64, title: &str) -> CoreResult<Job> {
    let tags = tx.allocate_dictionary_id()?;
    tx.dictionary(tags).insert(title.as_bytes(), b"1")?;
    let job = Job::new(company, number, title, 1000, tags);
    tx.relation::<Job>()?.insert(&job)?;
    Ok(job)
}

fn readings(tx: &ObjectTransaction) -> Vec<i64> {
    tx.relation::<Reading>()
        .unwrap()
        .iter()
        .map(|row| row.map(|r| r.at))
        .collect::<CoreResult<_>>()
        .unwrap()
}

#[test]
fn rows_are_enumerated_in_key_order() {
    with_temp_db(|db| {
        db.transaction(|tx| {
            let table = tx.relation::<Reading>()?;
            for at in [5, -3, 1000, 0, -700, 42] {
                table.insert(&Reading::new(at, at as f64))?;
            }
            Ok(())
        })
        .unwrap();

        let tx = db.begin_read().unwrap();
        assert_eq!(readings(&tx), [-700, -3, 0, 5, 42, 1000]);
    });
}

#[test]
fn insert_rejects_duplicate_keys() {
    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        let table = tx.relation::<Reading>().unwrap();
        table.insert(&Reading::new(1, 1.0)).unwrap();
        assert!(matches!(
            table.insert(&Reading::new(1, 2.0)),
            Err(CoreError::DuplicateKey { .. })
        ));
        let row = table.find_by_key(&[Value::I64(1)], true).unwrap().unwrap();
        assert_eq!(row.value, 1.0);
        assert_eq!(table.count().unwrap(), 1);
    });
}

#[test]
fn upsert_update_and_remove() {
    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        let table = tx.relation::<Reading>().unwrap();
        assert!(!table.upsert(&Reading::new(7, 1.0)).unwrap());
        assert!(table.upsert(&Reading::new(7, 2.0)).unwrap());
        table.update(&Reading::new(7, 3.0)).unwrap();
        assert!(matches!(
            table.update(&Reading::new(8, 3.0)),
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(
            table.find_by_key(&[Value::I64(7)], false).unwrap(),
            Some(Reading::new(7, 3.0))
        );

        assert!(table.remove_by_key(&[Value::I64(7)], true).unwrap());
        assert!(!table.remove_by_key(&[Value::I64(7)], false).unwrap());
        assert!(matches!(
            table.remove_by_key(&[Value::I64(7)], true),
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            table.find_by_key(&[Value::I64(7)], true),
            Err(CoreError::NotFound { .. })
        ));
        assert!(!table.contains_key(&[Value::I64(7)]).unwrap());
    });
}

#[test]
fn read_only_transactions_cannot_write_rows() {
    with_temp_db(|db| {
        let tx = db.begin_read().unwrap();
        let table = tx.relation::<Reading>().unwrap();
        assert_eq!(table.count().unwrap(), 0);
        assert!(matches!(
            table.insert(&Reading::new(1, 1.0)),
            Err(CoreError::ReadOnlyTransaction)
        ));
    });
}

#[test]
fn composite_keys_group_by_leading_field() {
    with_temp_db(|db| {
        db.transaction(|tx| {
            add_job(tx, "beta", 2, "tester")?;
            add_job(tx, "alpha", 10, "engineer")?;
            add_job(tx, "alpha", 9, "designer")?;
            Ok(())
        })
        .unwrap();

        let tx = db.begin_read().unwrap();
        let keys: Vec<(String, u64)> = tx
            .relation::<Job>()
            .unwrap()
            .iter()
            .map(|job| job.map(|j| (j.company, j.number)))
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(
            keys,
            [
                ("alpha".to_owned(), 9),
                ("alpha".to_owned(), 10),
                ("beta".to_owned(), 2)
            ]
        );
    });
}

#[test]
fn secondary_keys_follow_row_changes() {
    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        add_job(&tx, "alpha", 1, "engineer").unwrap();
        add_job(&tx, "beta", 1, "engineer").unwrap();
        let moving = add_job(&tx, "gamma", 1, "designer").unwrap();
        let table = tx.relation::<Job>().unwrap();

        let engineers = table
            .find_by_secondary_key("by_title", &[Value::from("engineer")])
            .unwrap();
        let companies: Vec<&str> = engineers.iter().map(|j| j.company.as_str()).collect();
        assert_eq!(companies, ["alpha", "beta"]);
        assert_eq!(table.count_by_secondary_key("by_title", &[]).unwrap(), 3);

        let mut promoted = moving.clone();
        promoted.title = "engineer".to_owned();
        table.update(&promoted).unwrap();
        assert_eq!(
            table
                .count_by_secondary_key("by_title", &[Value::from("engineer")])
                .unwrap(),
            3
        );
        assert_eq!(
            table
                .count_by_secondary_key("by_title", &[Value::from("designer")])
                .unwrap(),
            0
        );

        table
            .remove_by_key(&Job::key_of("alpha", 1), true)
            .unwrap();
        assert_eq!(table.count_by_secondary_key("by_title", &[]).unwrap(), 2);

        assert!(matches!(
            table.find_by_secondary_key("by_salary", &[]),
            Err(CoreError::NotFound { .. })
        ));
    });
}

#[test]
fn removing_a_row_frees_its_dictionaries() {
    let test_db = TestDatabase::memory();
    let job = test_db
        .transaction(|tx| add_job(tx, "alpha", 1, "engineer"))
        .unwrap();

    let test_db = test_db.reopen();
    test_db
        .transaction(|tx| {
            assert_eq!(tx.dictionary(job.tags).len()?, 1);
            tx.relation::<Job>()?
                .remove_by_key(&Job::key_of("alpha", 1), true)?;
            assert!(tx.dictionary(job.tags).is_empty()?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn replacing_a_dictionary_frees_the_old_one() {
    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        let job = add_job(&tx, "alpha", 1, "engineer").unwrap();
        let table = tx.relation::<Job>().unwrap();

        let mut same = job.clone();
        same.salary = 2000;
        table.update(&same).unwrap();
        assert_eq!(tx.dictionary(job.tags).len().unwrap(), 1);

        let fresh = tx.allocate_dictionary_id().unwrap();
        tx.dictionary(fresh).insert(b"new", b"1").unwrap();
        let mut moved = same.clone();
        moved.tags = fresh;
        assert!(table.upsert(&moved).unwrap());
        assert!(tx.dictionary(job.tags).is_empty().unwrap());
        assert_eq!(tx.dictionary(fresh).len().unwrap(), 1);
    });
}

#[test]
fn inserting_ahead_of_the_cursor_is_seen() {
    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        let table = tx.relation::<Reading>().unwrap();
        for at in [0, 10, 20, 30] {
            table.insert(&Reading::new(at, 0.0)).unwrap();
        }

        let mut seen = Vec::new();
        let mut rows = table.iter();
        seen.push(rows.next().unwrap().unwrap().at);
        table.insert(&Reading::new(5, 0.5)).unwrap();
        seen.push(rows.next().unwrap().unwrap().at);
        table.insert(&Reading::new(-5, 0.5)).unwrap();
        seen.push(rows.next().unwrap().unwrap().at);
        table.remove_by_key(&[Value::I64(10)], true).unwrap();
        table.upsert(&Reading::new(30, 3.5)).unwrap();
        for row in rows {
            let row = row.unwrap();
            seen.push(row.at);
            if row.at == 30 {
                assert_eq!(row.value, 3.5);
            }
        }
        assert_eq!(seen, [0, 5, 10, 20, 30]);
    });
}

#[test]
fn removing_the_current_row_does_not_skip_the_next() {
    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        let table = tx.relation::<Reading>().unwrap();
        for at in 0..6 {
            table.insert(&Reading::new(at, 0.0)).unwrap();
        }

        let mut seen = Vec::new();
        for row in table.iter() {
            let at = row.unwrap().at;
            table.remove_by_key(&[Value::I64(at)], true).unwrap();
            seen.push(at);
        }
        assert_eq!(seen, [0, 1, 2, 3, 4, 5]);
        assert_eq!(table.count().unwrap(), 0);
    });
}

#[test]
fn creation_hook_runs_once() {
    let test_db = TestDatabase::memory();
    {
        let tx = test_db.begin_read().unwrap();
        assert_eq!(tx.relation::<Currency>().unwrap().count().unwrap(), 0);
    }
    test_db
        .transaction(|tx| {
            let table = tx.relation::<Currency>()?;
            let eur = table.find_by_key(&[Value::from("EUR")], true)?;
            assert_eq!(eur.map(|c| c.minor_units), Some(100));
            assert!(table.remove_by_key(&[Value::from("EUR")], true)?);
            Ok(())
        })
        .unwrap();

    let test_db = test_db.reopen();
    let tx = test_db.begin_write().unwrap();
    assert_eq!(tx.relation::<Currency>().unwrap().count().unwrap(), 0);
}

#[test]
fn inline_graphs_keep_shared_and_cyclic_references() {
    let test_db = TestDatabase::memory();
    test_db.register::<Node>().unwrap();
    test_db
        .transaction(|tx| {
            tx.relation::<Snapshot>()?.insert(&Snapshot {
                id: 1,
                root: Some(Node::cycle("a", "b")),
            })
        })
        .unwrap();

    let test_db = test_db.reopen();
    test_db.register::<Node>().unwrap();
    let tx = test_db.begin_read().unwrap();
    let snapshot = tx
        .relation::<Snapshot>()
        .unwrap()
        .find_by_key(&[Value::U64(1)], true)
        .unwrap()
        .unwrap();
    let a = snapshot.root.unwrap();
    let b = a.borrow().next.clone().unwrap();
    let back = b.borrow().next.clone().unwrap();
    assert_eq!(a.borrow().label, "a");
    assert_eq!(b.borrow().label, "b");
    assert!(Obj::ptr_eq(&a, &back));
    assert!(tx.get_oid(&a).is_none());
    assert_eq!(tx.enumerate::<Node>().unwrap().count(), 0);
}

#[test]
fn stored_objects_are_referenced_by_oid_from_rows() {
    with_temp_db(|db| {
        let node = Node::labeled("shared");
        let oid = db
            .transaction(|tx| {
                let oid = tx.store(&node)?;
                tx.relation::<Snapshot>()?.insert(&Snapshot {
                    id: 7,
                    root: Some(node.clone()),
                })?;
                Ok(oid)
            })
            .unwrap();

        let tx = db.begin_read().unwrap();
        let stored = tx.get::<Node>(oid).unwrap().unwrap();
        let snapshot = tx
            .relation::<Snapshot>()
            .unwrap()
            .find_by_key(&[Value::U64(7)], true)
            .unwrap()
            .unwrap();
        assert!(Obj::ptr_eq(&stored, &snapshot.root.unwrap()));
    });
}

#[test]
fn unknown_inline_types_can_be_skipped() {
    let test_db = TestDatabase::memory();
    test_db.register::<Node>().unwrap();
    test_db
        .transaction(|tx| {
            tx.relation::<Snapshot>()?.insert(&Snapshot {
                id: 1,
                root: Some(Node::labeled("orphan")),
            })
        })
        .unwrap();

    let test_db = test_db.reopen();
    let tx = test_db.begin_read().unwrap();
    let table = tx.relation::<Snapshot>().unwrap();
    assert!(matches!(
        table.find_by_key(&[Value::U64(1)], true),
        Err(CoreError::UnknownStorageTypeId { .. })
    ));

    tx.set_skip_unknown_types(true);
    let snapshot = table.find_by_key(&[Value::U64(1)], true).unwrap().unwrap();
    assert!(snapshot.root.is_none());
}

/// `Reading` with an added `unit` field.
#[derive(Debug)]
struct ReadingWithUnit {
    at: i64,
    value: f64,
    unit: String,
}

impl Relation for ReadingWithUnit {
    const NAME: &'static str = "Reading";

    fn primary_key() -> Vec<FieldDef> {
        vec![FieldDef::new("at", FieldKind::I64)]
    }

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("value", FieldKind::F64),
            FieldDef::new("unit", FieldKind::String).with_init(|| Value::from("celsius")),
        ]
    }

    fn key(&self) -> Vec<Value> {
        vec![Value::I64(self.at)]
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::F64(self.value), Value::from(self.unit.as_str())]
    }

    fn from_record(record: &mut Record) -> CoreResult<Self> {
        Ok(Self {
            at: record.take_i64("at")?,
            value: record.take_f64("value")?,
            unit: record.take_string("unit")?,
        })
    }
}

/// `Reading` keyed by an unsigned integer instead.
#[derive(Debug)]
struct ReadingByIndex {
    at: u64,
}

impl Relation for ReadingByIndex {
    const NAME: &'static str = "Reading";

    fn primary_key() -> Vec<FieldDef> {
        vec![FieldDef::new("at", FieldKind::U64)]
    }

    fn fields() -> Vec<FieldDef> {
        Vec::new()
    }

    fn key(&self) -> Vec<Value> {
        vec![Value::U64(self.at)]
    }

    fn values(&self) -> Vec<Value> {
        Vec::new()
    }

    fn from_record(record: &mut Record) -> CoreResult<Self> {
        Ok(Self {
            at: record.take_u64("at")?,
        })
    }
}

/// `Job` with an extra secondary key on the salary.
#[derive(Debug)]
struct IndexedJob(Job);

impl Relation for IndexedJob {
    const NAME: &'static str = "Job";

    fn primary_key() -> Vec<FieldDef> {
        Job::primary_key()
    }

    fn fields() -> Vec<FieldDef> {
        Job::fields()
    }

    fn secondary_keys() -> Vec<SecondaryKeyDef> {
        let mut keys = Job::secondary_keys();
        keys.push(SecondaryKeyDef::new("by_salary", 2, &["salary"]));
        keys
    }

    fn key(&self) -> Vec<Value> {
        self.0.key()
    }

    fn values(&self) -> Vec<Value> {
        self.0.values()
    }

    fn from_record(record: &mut Record) -> CoreResult<Self> {
        Job::from_record(record).map(Self)
    }
}

#[test]
fn added_value_fields_read_their_initializer() {
    let test_db = TestDatabase::memory();
    test_db
        .transaction(|tx| tx.relation::<Reading>()?.insert(&Reading::new(1, 21.5)))
        .unwrap();

    let test_db = test_db.reopen();
    test_db
        .transaction(|tx| {
            let table = tx.relation::<ReadingWithUnit>()?;
            let old = table.find_by_key(&[Value::I64(1)], true)?.unwrap();
            assert_eq!(old.value, 21.5);
            assert_eq!(old.unit, "celsius");
            table.insert(&ReadingWithUnit {
                at: 2,
                value: 70.0,
                unit: "fahrenheit".to_owned(),
            })
        })
        .unwrap();

    let id = test_db
        .registry()
        .table_id(TableFamily::Relations, "Reading")
        .unwrap();
    assert_eq!(
        test_db.registry().versions(TableFamily::Relations, id),
        [1, 2]
    );
    assert_eq!(
        test_db
            .registry()
            .last_persisted_version(TableFamily::Relations, id),
        2
    );

    let test_db = test_db.reopen();
    let tx = test_db.begin_read().unwrap();
    let units: Vec<String> = tx
        .relation::<ReadingWithUnit>()
        .unwrap()
        .iter()
        .map(|row| row.map(|r| r.unit))
        .collect::<CoreResult<_>>()
        .unwrap();
    assert_eq!(units, ["celsius", "fahrenheit"]);
}

#[test]
fn changed_primary_keys_are_rejected() {
    let test_db = TestDatabase::memory();
    test_db
        .transaction(|tx| tx.relation::<Reading>()?.insert(&Reading::new(1, 1.0)))
        .unwrap();

    let test_db = test_db.reopen();
    let tx = test_db.begin_read().unwrap();
    assert!(matches!(
        tx.relation::<ReadingByIndex>(),
        Err(CoreError::SchemaMismatch { .. })
    ));
}

#[test]
fn new_secondary_keys_are_built_from_existing_rows() {
    let test_db = TestDatabase::memory();
    test_db
        .transaction(|tx| {
            add_job(tx, "alpha", 1, "engineer")?;
            add_job(tx, "beta", 2, "designer")?;
            Ok(())
        })
        .unwrap();

    let test_db = test_db.reopen();
    test_db
        .transaction(|tx| {
            let table = tx.relation::<IndexedJob>()?;
            let tags = tx.allocate_dictionary_id()?;
            table.insert(&IndexedJob(Job::new("gamma", 3, "tester", 500, tags)))?;
            assert_eq!(table.count_by_secondary_key("by_salary", &[])?, 3);
            assert_eq!(table.count_by_secondary_key("by_title", &[])?, 3);
            let cheapest = table.find_by_secondary_key("by_salary", &[Value::I64(500)])?;
            assert_eq!(cheapest.len(), 1);
            assert_eq!(cheapest[0].0.company, "gamma");
            Ok(())
        })
        .unwrap();
}

#[test]
fn object_fields_are_rejected_in_keys() {
    #[derive(Debug)]
    struct Bad;

    impl Relation for Bad {
        const NAME: &'static str = "Bad";

        fn primary_key() -> Vec<FieldDef> {
            vec![FieldDef::new("owner", FieldKind::Object)]
        }

        fn fields() -> Vec<FieldDef> {
            Vec::new()
        }

        fn key(&self) -> Vec<Value> {
            vec![Value::Object(None)]
        }

        fn values(&self) -> Vec<Value> {
            Vec::new()
        }

        fn from_record(_record: &mut Record) -> CoreResult<Self> {
            Ok(Self)
        }
    }

    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        assert!(matches!(
            tx.relation::<Bad>(),
            Err(CoreError::UnsupportedType { .. })
        ));
    });
}

#[test]
fn relation_names_are_listed() {
    with_temp_db(|db| {
        db.transaction(|tx| {
            tx.relation::<Reading>()?;
            tx.relation::<Job>()?;
            Ok(())
        })
        .unwrap();
        let tx = db.begin_read().unwrap();
        let mut names = tx.enumerate_relation_names();
        names.sort();
        assert_eq!(names, ["Job", "Reading"]);
    });
}
