//! Object persistence: identity, references, deletion, enumeration and
//! singletons.

use objdb_codec::ByteWriter;
use objdb_core::layout::object_key;
use objdb_core::{
    BTreeKeyValueDb, CoreError, CoreResult, DbOptions, KeyValueDb, Obj, ObjectDb, Oid,
    TableFamily, TransactionState,
};
use objdb_storage::KeyValueTransaction;
use objdb_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn same_oid_yields_same_instance() {
    let (test_db, oids) = scenarios::populated_database(3);
    let tx = test_db.begin_read().unwrap();
    let first = tx.get::<Person>(oids[0]).unwrap().unwrap();
    let again = tx.get::<Person>(oids[0]).unwrap().unwrap();
    let other = tx.get::<Person>(oids[1]).unwrap().unwrap();
    assert!(Obj::ptr_eq(&first, &again));
    assert!(!Obj::ptr_eq(&first, &other));
    assert_eq!(tx.get_oid(&first), oids[0]);
}

#[test]
fn identity_holds_past_cache_upgrade() {
    let (test_db, oids) = scenarios::populated_database(31);
    let tx = test_db.begin_read().unwrap();
    let loaded: Vec<Obj<Person>> = oids
        .iter()
        .map(|oid| tx.get::<Person>(*oid).unwrap().unwrap())
        .collect();
    for (oid, held) in oids.iter().zip(&loaded) {
        let again = tx.get::<Person>(*oid).unwrap().unwrap();
        assert!(Obj::ptr_eq(held, &again));
        assert_eq!(tx.get_oid(held), *oid);
    }

    drop(loaded);
    for (i, oid) in oids.iter().enumerate() {
        let reloaded = tx.get::<Person>(*oid).unwrap().unwrap();
        assert_eq!(reloaded.borrow().name, format!("person-{i}"));
    }
}

#[test]
fn new_instances_past_threshold_keep_their_oids() {
    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        let people: Vec<Obj<Person>> = (0..40).map(|i| Person::named("p", i)).collect();
        let oids: Vec<Oid> = people.iter().map(|p| tx.store(p).unwrap()).collect();
        for (person, oid) in people.iter().zip(&oids) {
            assert_eq!(tx.get_oid(person), *oid);
            assert!(Obj::ptr_eq(person, &tx.get::<Person>(*oid).unwrap().unwrap()));
        }
        tx.commit().unwrap();

        let tx = db.begin_read().unwrap();
        assert_eq!(tx.enumerate::<Person>().unwrap().count(), 40);
    });
}

#[test]
fn fields_round_trip_across_reopen() {
    let test_db = TestDatabase::memory();
    let ada = Person::named("Ada", 36);
    let oid = test_db.transaction(|tx| tx.store(&ada)).unwrap();

    let test_db = test_db.reopen();
    let tx = test_db.begin_read().unwrap();
    let loaded = tx.get::<Person>(oid).unwrap().unwrap();
    assert_eq!(loaded.borrow().name, "Ada");
    assert_eq!(loaded.borrow().age, 36);
    assert!(loaded.borrow().friend.is_none());
}

#[test]
fn referenced_objects_are_stored_with_their_own_oid() {
    with_temp_db(|db| {
        let ada = Person::named("Ada", 36);
        let charles = Person::named("Charles", 45);
        ada.borrow_mut().friend = Some(charles.clone());

        let (ada_oid, charles_oid) = db
            .transaction(|tx| {
                let oid = tx.store(&ada)?;
                assert!(tx.get_oid(&charles).is_none());
                Ok(oid)
            })
            .map(|oid| (oid, Oid::new(oid.as_u64() + 1)))
            .unwrap();

        let tx = db.begin_read().unwrap();
        let loaded_charles = tx.get::<Person>(charles_oid).unwrap().unwrap();
        let loaded_ada = tx.get::<Person>(ada_oid).unwrap().unwrap();
        let friend = loaded_ada.borrow().friend.clone().unwrap();
        assert!(Obj::ptr_eq(&friend, &loaded_charles));
        assert_eq!(friend.borrow().name, "Charles");
    });
}

#[test]
fn cycles_through_oids_resolve_to_the_same_instances() {
    let test_db = TestDatabase::memory();
    let head = Node::cycle("a", "b");
    let oid = test_db.transaction(|tx| tx.store(&head)).unwrap();

    let test_db = test_db.reopen();
    let tx = test_db.begin_read().unwrap();
    let a = tx.get::<Node>(oid).unwrap().unwrap();
    let b = a.borrow().next.clone().unwrap();
    let back = b.borrow().next.clone().unwrap();
    assert_eq!(b.borrow().label, "b");
    assert!(Obj::ptr_eq(&a, &back));
    assert_eq!(tx.enumerate::<Node>().unwrap().count(), 2);
}

#[test]
fn store_is_deferred_until_commit() {
    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        let oid = tx.store(&Person::named("lazy", 1)).unwrap();
        assert_eq!(tx.get_storage_size(oid).unwrap(), None);
        tx.commit().unwrap();

        let tx = db.begin_read().unwrap();
        let (key, value) = tx.get_storage_size(oid).unwrap().unwrap();
        assert!(key > 0 && value > 0);
    });
}

#[test]
fn store_and_flush_writes_immediately() {
    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        let person = Person::named("eager", 2);
        let oid = tx.store_and_flush(&person).unwrap();
        assert!(tx.get_storage_size(oid).unwrap().is_some());

        person.borrow_mut().age = 3;
        assert_eq!(tx.store_and_flush(&person).unwrap(), oid);
        tx.commit().unwrap();

        let tx = db.begin_read().unwrap();
        assert_eq!(tx.get::<Person>(oid).unwrap().unwrap().borrow().age, 3);
    });
}

#[test]
fn commit_retried_after_a_failed_write_stores_everything() {
    let test_db = TestDatabase::memory();
    let tx = test_db.begin_write().unwrap();
    let people = [
        Person::named("first", 1),
        Person::named("held", 2),
        Person::named("last", 3),
    ];
    let oids: Vec<Oid> = people.iter().map(|p| tx.store(p).unwrap()).collect();
    {
        let _held = people[1].borrow_mut();
        assert!(matches!(tx.commit(), Err(CoreError::InvalidOperation { .. })));
    }
    assert_eq!(tx.state(), TransactionState::Active);
    tx.commit().unwrap();

    let test_db = test_db.reopen();
    let tx = test_db.begin_read().unwrap();
    for (oid, age) in oids.iter().zip(1u32..) {
        assert_eq!(tx.get::<Person>(*oid).unwrap().unwrap().borrow().age, age);
    }
}

#[test]
fn mutations_need_a_second_store_after_commit() {
    with_temp_db(|db| {
        let oid = db
            .transaction(|tx| tx.store(&Person::named("Ada", 36)))
            .unwrap();

        db.transaction(|tx| {
            let ada = tx.get::<Person>(oid)?.unwrap();
            ada.borrow_mut().age = 37;
            Ok(())
        })
        .unwrap();
        let tx = db.begin_read().unwrap();
        assert_eq!(tx.get::<Person>(oid).unwrap().unwrap().borrow().age, 36);
        drop(tx);

        db.transaction(|tx| {
            let ada = tx.get::<Person>(oid)?.unwrap();
            ada.borrow_mut().age = 37;
            tx.store(&ada)
        })
        .unwrap();
        let tx = db.begin_read().unwrap();
        assert_eq!(tx.get::<Person>(oid).unwrap().unwrap().borrow().age, 37);
    });
}

#[test]
fn deleted_instances_cannot_be_stored_again() {
    with_temp_db(|db| {
        let oid = db
            .transaction(|tx| tx.store(&Person::named("gone", 1)))
            .unwrap();

        let tx = db.begin_write().unwrap();
        let person = tx.get::<Person>(oid).unwrap().unwrap();
        tx.delete(&person).unwrap();
        assert!(tx.get::<Person>(oid).unwrap().is_none());
        assert!(matches!(
            tx.store(&person),
            Err(CoreError::ObjectDeleted { .. })
        ));

        let never_stored = Person::named("never", 2);
        tx.delete(&never_stored).unwrap();
        assert!(matches!(
            tx.store(&never_stored),
            Err(CoreError::ObjectDeleted { .. })
        ));
        tx.commit().unwrap();

        let tx = db.begin_read().unwrap();
        assert!(tx.get::<Person>(oid).unwrap().is_none());
        assert_eq!(tx.enumerate::<Person>().unwrap().count(), 0);
    });
}

#[test]
fn delete_by_oid_erases_unloaded_rows() {
    let (test_db, oids) = scenarios::populated_database(3);
    test_db.transaction(|tx| tx.delete_by_oid(oids[1])).unwrap();

    let tx = test_db.begin_read().unwrap();
    let names: Vec<String> = tx
        .enumerate::<Person>()
        .unwrap()
        .map(|p| p.map(|p| p.borrow().name.clone()))
        .collect::<CoreResult<_>>()
        .unwrap();
    assert_eq!(names, ["person-0", "person-2"]);
}

#[test]
fn references_to_deleted_objects_are_written_as_null() {
    with_temp_db(|db| {
        let ada = Person::named("Ada", 36);
        let charles = Person::named("Charles", 45);
        ada.borrow_mut().friend = Some(charles.clone());

        let ada_oid = db
            .transaction(|tx| {
                tx.delete(&charles)?;
                tx.store(&ada)
            })
            .unwrap();

        let tx = db.begin_read().unwrap();
        let loaded = tx.get::<Person>(ada_oid).unwrap().unwrap();
        assert!(loaded.borrow().friend.is_none());
        assert_eq!(tx.enumerate::<Person>().unwrap().count(), 1);
    });
}

#[test]
fn enumeration_yields_unflushed_objects_last() {
    let (test_db, _) = scenarios::populated_database(2);
    let tx = test_db.begin_write().unwrap();
    let fresh = Person::named("fresh", 9);
    tx.store(&fresh).unwrap();

    let all: Vec<Obj<Person>> = tx
        .enumerate::<Person>()
        .unwrap()
        .collect::<CoreResult<_>>()
        .unwrap();
    assert_eq!(all.len(), 3);
    assert!(Obj::ptr_eq(&all[2], &fresh));
    assert_eq!(all[0].borrow().name, "person-0");
}

#[test]
fn enumeration_tolerates_deletes_and_stores() {
    let (test_db, oids) = scenarios::populated_database(4);
    let tx = test_db.begin_write().unwrap();
    let mut seen = Vec::new();
    for person in tx.enumerate::<Person>().unwrap() {
        let person = person.unwrap();
        let name = person.borrow().name.clone();
        if name == "person-0" {
            tx.delete_by_oid(oids[1]).unwrap();
            tx.store(&Person::named("late", 5)).unwrap();
        }
        seen.push(name);
    }
    assert_eq!(seen, ["person-0", "person-2", "person-3", "late"]);
}

#[test]
fn enumerate_any_spans_types() {
    with_temp_db(|db| {
        db.transaction(|tx| {
            tx.store(&Person::named("p", 1))?;
            tx.store(&Node::labeled("n"))?;
            Ok(())
        })
        .unwrap();
        let tx = db.begin_read().unwrap();
        assert_eq!(tx.enumerate_any().unwrap().count(), 2);
    });
}

#[test]
fn delete_all_removes_only_that_type() {
    with_temp_db(|db| {
        db.transaction(|tx| {
            for i in 0..5 {
                tx.store(&Person::named("p", i))?;
            }
            tx.store(&Node::labeled("keep"))?;
            Ok(())
        })
        .unwrap();

        let deleted = db.transaction(|tx| tx.delete_all::<Person>()).unwrap();
        assert_eq!(deleted, 5);

        let tx = db.begin_read().unwrap();
        assert_eq!(tx.enumerate::<Person>().unwrap().count(), 0);
        assert_eq!(tx.enumerate::<Node>().unwrap().count(), 1);
    });
}

#[test]
fn get_with_wrong_type_is_a_mismatch() {
    with_temp_db(|db| {
        let oid = db
            .transaction(|tx| tx.store(&Person::named("p", 1)))
            .unwrap();
        let tx = db.begin_read().unwrap();
        assert!(matches!(
            tx.get::<Node>(oid),
            Err(CoreError::TypeMismatch { .. })
        ));
        assert!(tx.get::<Person>(Oid::new(999)).unwrap().is_none());
    });
}

#[test]
fn singleton_is_created_once_and_persisted() {
    let test_db = TestDatabase::memory();
    {
        let tx = test_db.begin_read().unwrap();
        let settings = tx.singleton::<Settings>().unwrap();
        assert_eq!(settings.borrow().launches, 0);
        assert!(tx.get_oid(&settings).is_none());
    }

    test_db
        .transaction(|tx| {
            let settings = tx.singleton::<Settings>()?;
            assert!(Obj::ptr_eq(&settings, &tx.singleton::<Settings>()?));
            settings.borrow_mut().theme = "dark".to_owned();
            settings.borrow_mut().launches = 1;
            Ok(())
        })
        .unwrap();

    let test_db = test_db.reopen();
    let tx = test_db.begin_write().unwrap();
    let settings = tx.singleton::<Settings>().unwrap();
    assert_eq!(settings.borrow().theme, "dark");
    assert_eq!(settings.borrow().launches, 1);
    assert_eq!(tx.enumerate_singleton_types(), ["Settings"]);
    assert_eq!(tx.enumerate::<Settings>().unwrap().count(), 1);
}

#[test]
fn new_object_is_stored_explicitly() {
    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        let person = tx.new_object::<Person>().unwrap();
        assert!(tx.get_oid(&person).is_none());
        person.borrow_mut().name = "made".to_owned();
        let oid = tx.store(&person).unwrap();
        assert_eq!(tx.get_oid(&person), oid);
        tx.commit().unwrap();

        let tx = db.begin_read().unwrap();
        assert_eq!(tx.get::<Person>(oid).unwrap().unwrap().borrow().name, "made");
    });
}

#[test]
fn references_to_unstored_new_objects_are_written_as_null() {
    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        let pending = tx.new_object::<Person>().unwrap();
        let ada = Person::named("Ada", 36);
        ada.borrow_mut().friend = Some(pending.clone());
        let oid = tx.store(&ada).unwrap();
        tx.commit().unwrap();

        let tx = db.begin_read().unwrap();
        let loaded = tx.get::<Person>(oid).unwrap().unwrap();
        assert!(loaded.borrow().friend.is_none());
        assert_eq!(tx.enumerate::<Person>().unwrap().count(), 1);
    });
}

#[test]
fn disposed_transactions_leave_no_trace() {
    with_temp_db(|db| {
        let tx = db.begin_write().unwrap();
        tx.store(&Person::named("discarded", 1)).unwrap();
        tx.dispose();
        assert_eq!(tx.state(), TransactionState::Disposed);
        assert!(matches!(tx.commit(), Err(CoreError::TransactionClosed)));
        drop(tx);

        let tx = db.begin_read().unwrap();
        assert_eq!(tx.enumerate::<Person>().unwrap().count(), 0);
    });
}

#[test]
fn oids_are_never_reused_after_reopen() {
    let test_db = TestDatabase::memory();
    let first = test_db
        .transaction(|tx| tx.store(&Person::named("a", 1)))
        .unwrap();
    test_db.transaction(|tx| tx.delete_by_oid(first)).unwrap();

    let test_db = test_db.reopen();
    let second = test_db
        .transaction(|tx| tx.store(&Person::named("b", 2)))
        .unwrap();
    assert!(second > first);
}

#[test]
fn unregistered_types_are_rejected_without_auto_registration() {
    let test_db = TestDatabase::memory_with(DbOptions::new().without_auto_registration());
    let result = test_db.transaction(|tx| tx.store(&Person::named("p", 1)));
    assert!(matches!(result, Err(CoreError::UnregisteredType { .. })));

    test_db.register::<Person>().unwrap();
    test_db
        .transaction(|tx| tx.store(&Person::named("p", 1)))
        .unwrap();
    assert_eq!(test_db.registry().names(TableFamily::Objects), ["Person"]);
}

#[test]
fn unknown_types_fail_or_are_skipped() {
    let test_db = TestDatabase::memory();
    test_db
        .transaction(|tx| {
            tx.store(&Person::named("p", 1))?;
            tx.store(&Node::labeled("n"))?;
            Ok(())
        })
        .unwrap();

    let test_db = test_db.reopen();
    test_db.register::<Person>().unwrap();
    let tx = test_db.begin_read().unwrap();
    let result: CoreResult<Vec<_>> = tx.enumerate_any().unwrap().collect();
    assert!(matches!(result, Err(CoreError::UnknownStorageTypeId { .. })));
    drop(tx);

    let tx = test_db.begin_read().unwrap();
    tx.set_skip_unknown_types(true);
    let found: Vec<_> = tx
        .enumerate_any()
        .unwrap()
        .collect::<CoreResult<_>>()
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(Obj::<Person>::from_any(&found[0]).is_some());
}

fn corrupt_row(kv: &dyn KeyValueDb, db: &ObjectDb, oid: Oid) {
    let table = db
        .registry()
        .table_id(TableFamily::Objects, "Person")
        .unwrap();
    let mut row = ByteWriter::new();
    row.write_vuint(u64::from(table.as_u32()));
    row.write_vuint(1);
    row.write_vuint(200);
    let mut tx = kv.begin_write().unwrap();
    tx.create_or_update(&object_key(oid), row.as_bytes()).unwrap();
    tx.commit().unwrap();
}

#[test]
fn self_healing_skips_unreadable_rows() {
    let kv: Arc<dyn KeyValueDb> = Arc::new(BTreeKeyValueDb::in_memory());
    let db = ObjectDb::open_with_options(Arc::clone(&kv), DbOptions::new().self_healing(true))
        .unwrap();
    db.transaction(|tx| tx.store(&Person::named("fine", 1)))
        .unwrap();
    corrupt_row(kv.as_ref(), &db, Oid::new(50));

    let tx = db.begin_read().unwrap();
    assert!(tx.get::<Person>(Oid::new(50)).unwrap().is_none());
    assert_eq!(tx.enumerate::<Person>().unwrap().count(), 1);
    drop(tx);
    drop(db);

    let strict = ObjectDb::open(kv).unwrap();
    let tx = strict.begin_read().unwrap();
    let err = tx.get::<Person>(Oid::new(50)).unwrap_err();
    assert!(err.is_decode_failure());
}

#[test]
fn commit_ulong_and_rollback_advice() {
    let test_db = TestDatabase::memory();
    test_db
        .transaction(|tx| {
            assert_eq!(tx.commit_ulong()?, 0);
            tx.set_commit_ulong(42)?;
            assert!(!tx.rollback_advised()?);
            tx.set_rollback_advised(true)?;
            assert!(tx.rollback_advised()?);
            Ok(())
        })
        .unwrap();

    let test_db = test_db.reopen();
    let tx = test_db.begin_read().unwrap();
    assert_eq!(tx.commit_ulong().unwrap(), 42);
    assert!(matches!(
        tx.set_commit_ulong(1),
        Err(CoreError::ReadOnlyTransaction)
    ));
}

#[test]
fn delete_all_data_keeps_metadata() {
    let test_db = TestDatabase::memory();
    test_db
        .transaction(|tx| {
            tx.store(&Person::named("p", 1))?;
            let id = tx.allocate_dictionary_id()?;
            tx.dictionary(id).insert(b"k", b"v")?;
            tx.relation::<Reading>()?.insert(&Reading::new(1, 1.0))?;
            Ok(())
        })
        .unwrap();

    test_db.transaction(|tx| tx.delete_all_data()).unwrap();

    let test_db = test_db.reopen();
    let tx = test_db.begin_read().unwrap();
    assert_eq!(tx.enumerate::<Person>().unwrap().count(), 0);
    assert_eq!(tx.relation::<Reading>().unwrap().count().unwrap(), 0);
    assert_eq!(test_db.registry().names(TableFamily::Objects), ["Person"]);
    assert_eq!(tx.enumerate_relation_names(), ["Reading"]);
}

#[test]
fn dictionaries_hold_ordered_entries() {
    let test_db = TestDatabase::memory();
    let id = test_db
        .transaction(|tx| {
            let id = tx.allocate_dictionary_id()?;
            let dict = tx.dictionary(id);
            assert!(dict.insert(b"b", b"2")?);
            assert!(dict.insert(b"a", b"1")?);
            assert!(!dict.insert(b"a", b"one")?);
            Ok(id)
        })
        .unwrap();

    let test_db = test_db.reopen();
    let tx = test_db.begin_write().unwrap();
    let dict = tx.dictionary(id);
    assert_eq!(dict.len().unwrap(), 2);
    assert_eq!(dict.get(b"a").unwrap().as_deref(), Some(&b"one"[..]));
    let keys: Vec<Vec<u8>> = dict.entries().unwrap().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, [b"a".to_vec(), b"b".to_vec()]);
    assert!(dict.remove(b"b").unwrap());
    assert!(!dict.remove(b"b").unwrap());
    assert_eq!(dict.clear().unwrap(), 1);
    assert!(dict.is_empty().unwrap());
}

#[test]
fn file_databases_persist_objects() {
    let test_db = TestDatabase::file();
    let oid = test_db
        .transaction(|tx| tx.store(&Node::cycle("x", "y")))
        .unwrap();
    let test_db = test_db.reopen();
    let tx = test_db.begin_read().unwrap();
    let x = tx.get::<Node>(oid).unwrap().unwrap();
    assert_eq!(x.borrow().next.as_ref().unwrap().borrow().label, "y");
}

#[test]
fn custom_type_name_is_used_for_storage() {
    let options = DbOptions::new().with_type_name::<Person>("Human");
    let test_db = TestDatabase::memory_with(options.clone());
    let oid = test_db
        .transaction(|tx| tx.store(&Person::named("Ada", 36)))
        .unwrap();
    assert!(test_db.registry().table_id(TableFamily::Objects, "Human").is_some());
    assert!(test_db.registry().table_id(TableFamily::Objects, "Person").is_none());

    let test_db = test_db.reopen_with(options);
    let tx = test_db.begin_read().unwrap();
    assert_eq!(tx.get::<Person>(oid).unwrap().unwrap().borrow().name, "Ada");
    assert_eq!(tx.enumerate::<Person>().unwrap().count(), 1);
}
