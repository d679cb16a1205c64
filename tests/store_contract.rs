//! Behaviour every `FragmentStore` backend must share

use curator::storage::Batch;
use curator::{FragmentStore, MemoryStore, OpenStore, SqliteStore, Triple};
use std::time::Duration;

fn backends() -> Vec<(&'static str, Box<dyn FragmentStore>)> {
    vec![
        ("memory", Box::new(MemoryStore::new())),
        ("sqlite", Box::new(SqliteStore::open_in_memory().unwrap())),
    ]
}

#[test]
fn values_round_trip_and_delete() {
    for (name, store) in backends() {
        assert_eq!(store.get("k").unwrap(), None, "{name}");
        store.set("k", "v1", None).unwrap();
        store.set("k", "v2", None).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"), "{name}");
        assert!(store.exists("k").unwrap(), "{name}");
        assert!(store.delete("k").unwrap(), "{name}");
        assert!(!store.delete("k").unwrap(), "{name}");
    }
}

#[test]
fn expired_values_are_gone() {
    for (name, store) in backends() {
        store.set("short", "1", Some(Duration::from_millis(20))).unwrap();
        store.set("long", "1", Some(Duration::from_secs(60))).unwrap();
        store.set("forever", "1", None).unwrap();

        let ttl = store.ttl("long").unwrap().unwrap();
        assert!(ttl > Duration::from_secs(50) && ttl <= Duration::from_secs(60), "{name}");
        assert_eq!(store.ttl("forever").unwrap(), None, "{name}");

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(store.get("short").unwrap(), None, "{name}");
        assert_eq!(store.ttl("short").unwrap(), None, "{name}");
        assert_eq!(store.keys("").unwrap(), vec!["forever", "long"], "{name}");
    }
}

#[test]
fn set_if_absent_only_writes_once() {
    for (name, store) in backends() {
        assert!(store.set_if_absent("lock", "a", Some(Duration::from_millis(20))).unwrap(), "{name}");
        assert!(!store.set_if_absent("lock", "b", None).unwrap(), "{name}");
        assert_eq!(store.get("lock").unwrap().as_deref(), Some("a"), "{name}");

        std::thread::sleep(Duration::from_millis(40));
        assert!(store.set_if_absent("lock", "b", None).unwrap(), "{name}");
        assert_eq!(store.get("lock").unwrap().as_deref(), Some("b"), "{name}");
    }
}

#[test]
fn set_if_present_never_creates() {
    for (name, store) in backends() {
        assert!(!store.set_if_present("sink:x", "v").unwrap(), "{name}");
        assert_eq!(store.get("sink:x").unwrap(), None, "{name}");

        store.set("sink:x", "v1", Some(Duration::from_secs(60))).unwrap();
        assert!(store.set_if_present("sink:x", "v2").unwrap(), "{name}");
        assert_eq!(store.get("sink:x").unwrap().as_deref(), Some("v2"), "{name}");
        assert!(store.ttl("sink:x").unwrap().is_some(), "{name}");

        store.delete("sink:x").unwrap();
        assert!(!store.set_if_present("sink:x", "v3").unwrap(), "{name}");
        assert!(store.keys("sink:").unwrap().is_empty(), "{name}");
    }
}

#[test]
fn delete_if_equals_checks_the_owner() {
    for (name, store) in backends() {
        store.set("lock", "owner-a", None).unwrap();
        assert!(!store.delete_if_equals("lock", "owner-b").unwrap(), "{name}");
        assert!(store.exists("lock").unwrap(), "{name}");
        assert!(store.delete_if_equals("lock", "owner-a").unwrap(), "{name}");
        assert!(!store.exists("lock").unwrap(), "{name}");
    }
}

#[test]
fn sets_are_sorted_and_deduplicated() {
    for (name, store) in backends() {
        assert!(store.set_add("s", "b").unwrap(), "{name}");
        assert!(store.set_add("s", "a").unwrap(), "{name}");
        assert!(!store.set_add("s", "a").unwrap(), "{name}");
        assert_eq!(store.set_members("s").unwrap(), vec!["a", "b"], "{name}");
        assert_eq!(store.set_len("s").unwrap(), 2, "{name}");
        assert!(store.is_member("s", "b").unwrap(), "{name}");

        assert!(store.set_remove("s", "b").unwrap(), "{name}");
        assert!(!store.set_remove("s", "b").unwrap(), "{name}");
        assert_eq!(store.set_len("missing").unwrap(), 0, "{name}");
    }
}

#[test]
fn triple_contexts_hold_distinct_triples() {
    for (name, store) in backends() {
        let a = Triple::new("a", "p", "b");
        let b = Triple::new("b", "p", "c");
        assert!(store.add_triple("ctx", &b).unwrap(), "{name}");
        assert!(store.add_triple("ctx", &a).unwrap(), "{name}");
        assert!(!store.add_triple("ctx", &a).unwrap(), "{name}");
        assert_eq!(store.triples("ctx").unwrap(), vec![a.clone(), b.clone()], "{name}");

        assert!(store.remove_triple("ctx", &a).unwrap(), "{name}");
        assert_eq!(store.triples("ctx").unwrap(), vec![b], "{name}");
        assert!(store.triples("other").unwrap().is_empty(), "{name}");
    }
}

#[test]
fn delete_clears_every_namespace() {
    for (name, store) in backends() {
        store.set("x", "1", None).unwrap();
        store.set_add("x", "m").unwrap();
        store.add_triple("x", &Triple::new("a", "p", "b")).unwrap();

        assert!(store.delete("x").unwrap(), "{name}");
        assert_eq!(store.get("x").unwrap(), None, "{name}");
        assert_eq!(store.set_len("x").unwrap(), 0, "{name}");
        assert!(store.triples("x").unwrap().is_empty(), "{name}");
    }
}

#[test]
fn keys_list_names_across_namespaces_once() {
    for (name, store) in backends() {
        store.set("fragment:f:pulling", "1", None).unwrap();
        store.set_add("fragment:f:requests", "r1").unwrap();
        store.add_triple("fragment:f:context:p1", &Triple::new("a", "p", "b")).unwrap();
        store.set("fragment:f:context:p1", "marker", None).unwrap();
        store.set("sink:r1", "{}", None).unwrap();

        assert_eq!(
            store.keys("fragment:f:").unwrap(),
            vec![
                "fragment:f:context:p1",
                "fragment:f:pulling",
                "fragment:f:requests",
            ],
            "{name}"
        );
    }
}

#[test]
fn batch_applies_every_command() {
    for (name, store) in backends() {
        store.set("old", "1", None).unwrap();
        store.set_add("members", "gone").unwrap();

        let mut batch = Batch::new();
        batch
            .set("a", "1")
            .set_with_ttl("b", "2", Duration::from_secs(60))
            .delete("old")
            .set_add("members", "new")
            .set_remove("members", "gone")
            .add_triple("ctx", Triple::new("s", "p", "o"));
        assert_eq!(batch.len(), 6);
        store.execute(&batch).unwrap();

        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"), "{name}");
        assert!(store.ttl("b").unwrap().is_some(), "{name}");
        assert!(!store.exists("old").unwrap(), "{name}");
        assert_eq!(store.set_members("members").unwrap(), vec!["new"], "{name}");
        assert_eq!(store.triples("ctx").unwrap().len(), 1, "{name}");
    }
}

#[test]
fn empty_batch_is_a_no_op() {
    for (name, store) in backends() {
        store.execute(&Batch::new()).unwrap();
        assert!(store.keys("").unwrap().is_empty(), "{name}");
    }
}

#[test]
fn unavailable_memory_store_fails_every_call() {
    let store = MemoryStore::new();
    store.set_available(false);
    assert!(store.get("k").is_err());
    assert!(store.execute(&Batch::new()).is_err());
    store.set_available(true);
    assert!(store.get("k").is_ok());
}
