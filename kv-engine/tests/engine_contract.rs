//! Shared behavioral contract run against both engine variants, covering the
//! literal end-to-end scenarios and quantified invariants from the command
//! surface's end-to-end scenario table.

use std::sync::Arc;
use std::time::Duration;

use kv_common::{ParamMask, StoreError, Value};
use kv_engine::{HashEngine, RbTreeEngine, StorageEngine};

fn engines() -> Vec<(&'static str, Arc<dyn StorageEngine>)> {
    vec![("hash", HashEngine::new()), ("tree", RbTreeEngine::new())]
}

#[test]
fn scenario_set_get_ttl_sentinel() {
    for (name, engine) in engines() {
        engine
            .set(
                "user1".into(),
                Value::new("Smith", "John", 1990, "NYC", 100),
                0,
            )
            .unwrap_or_else(|e| panic!("{name}: set failed: {e}"));
        assert_eq!(
            engine.get("user1"),
            Some(Value::new("Smith", "John", 1990, "NYC", 100)),
            "{name}"
        );
        assert_eq!(engine.ttl("user1").unwrap_err(), StoreError::HasNoTtl, "{name}");
    }
}

#[test]
fn scenario_ttl_expiry() {
    for (name, engine) in engines() {
        engine
            .set("user2".into(), Value::new("Doe", "Jane", 1985, "LA", 50), 1)
            .unwrap();
        std::thread::sleep(Duration::from_secs(3));
        assert!(!engine.exists("user2"), "{name}");
        assert_eq!(engine.ttl("user2").unwrap_err(), StoreError::KeyNotFound, "{name}");
    }
}

#[test]
fn scenario_set_twice_rejects_second() {
    for (name, engine) in engines() {
        engine.set("a".into(), Value::new("X", "Y", 2000, "Z", 1), 0).unwrap();
        let err = engine
            .set("a".into(), Value::new("X", "Y", 2000, "Z", 1), 0)
            .unwrap_err();
        assert_eq!(err, StoreError::KeyAlreadyExists, "{name}");
    }
}

#[test]
fn scenario_find_by_birth_year() {
    for (name, engine) in engines() {
        engine.set("k1".into(), Value::new("A", "B", 1, "C", 1), 0).unwrap();
        engine.set("k2".into(), Value::new("A", "B", 2, "C", 1), 0).unwrap();
        engine.set("k3".into(), Value::new("A", "B", 2, "C", 1), 0).unwrap();

        let probe = Value::new("", "", 2, "", 0);
        let mut found = engine.find(&probe, 0, ParamMask::BIRTH_YEAR);
        found.sort();
        assert_eq!(found, vec!["k2".to_string(), "k3".to_string()], "{name}");
    }
}

#[test]
fn scenario_rename_preserves_deadline() {
    for (name, engine) in engines() {
        engine
            .set("old".into(), Value::new("A", "B", 1, "C", 1), 100)
            .unwrap();
        engine.rename("old", "new").unwrap();
        assert!(!engine.exists("old"), "{name}");
        let remaining = engine.ttl("new").unwrap();
        assert!((98..=100).contains(&remaining), "{name}: remaining was {remaining}");
    }
}

#[test]
fn scenario_update_masked_fields_only() {
    for (name, engine) in engines() {
        engine.set("k".into(), Value::new("A", "B", 1, "C", 1), 0).unwrap();
        let probe = Value::new("", "", 0, "", 0);
        engine
            .update("k", &probe, 5, ParamMask::COINS | ParamMask::TTL)
            .unwrap();
        let got = engine.get("k").unwrap();
        assert_eq!(got, Value::new("A", "B", 1, "C", 0), "{name}");
        let remaining = engine.ttl("k").unwrap();
        assert!((1..=5).contains(&remaining), "{name}");
    }
}

#[test]
fn scenario_export_then_import_round_trips() {
    for (name, engine) in engines() {
        engine.set("k1".into(), Value::new("Doe", "Jane", 1985, "LA", 50), 0).unwrap();
        engine
            .set("k2".into(), Value::new("Van Der Berg", "Mary Jane", 1972, "Los Angeles", 7), 0)
            .unwrap();

        let dir = std::env::temp_dir().join(format!("kv-engine-contract-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("export.txt");

        let written = engine.export(&path).unwrap();
        assert_eq!(written, 2, "{name}");

        let fresh = engines().into_iter().find(|(n, _)| *n == name).unwrap().1;
        let imported = fresh.import(&path).unwrap();
        assert_eq!(imported, 2, "{name}");

        let mut original = engine.showall();
        let mut reloaded = fresh.showall();
        original.sort_by(|a, b| a.0.cmp(&b.0));
        reloaded.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(original, reloaded, "{name}");

        std::fs::remove_dir_all(&dir).ok();
    }
}

#[test]
fn scenario_size_tracks_inserts_and_deletes() {
    for (name, engine) in engines() {
        for i in 0..10 {
            engine
                .set(format!("k{i}"), Value::new("A", "B", i, "C", 0), 0)
                .unwrap();
        }
        assert_eq!(engine.size(), 10, "{name}");
        for i in 0..4 {
            engine.del(&format!("k{i}")).unwrap();
        }
        assert_eq!(engine.size(), 6, "{name}");
    }
}

#[test]
fn import_skips_colliding_keys() {
    for (name, engine) in engines() {
        engine.set("k1".into(), Value::new("Orig", "O", 1, "C", 0), 0).unwrap();

        let dir = std::env::temp_dir().join(format!("kv-engine-collide-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("import.txt");
        std::fs::write(&path, "k1 New N 2 D 9\nk2 Fresh F 3 E 1\n").unwrap();

        let inserted = engine.import(&path).unwrap();
        assert_eq!(inserted, 1, "{name}: only k2 should insert");
        assert_eq!(engine.get("k1"), Some(Value::new("Orig", "O", 1, "C", 0)), "{name}");
        assert!(engine.exists("k2"), "{name}");

        std::fs::remove_dir_all(&dir).ok();
    }
}
