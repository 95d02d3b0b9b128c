use std::thread;

use super::*;
use crate::mock::MockMetric;

fn db2() -> StatsDb<MockMetric> {
    StatsDb::new(MockMetric::schema2())
}

fn db3() -> StatsDb<MockMetric> {
    StatsDb::new(MockMetric::schema3())
}

#[test]
fn update_and_get() {
    let db = db2();
    db.update(&["k1", "k2"], |c| c.add_ci(10), || MockMetric::child(0))
        .unwrap();
    db.update(&["k1"], |v| v.add_i2(20), || MockMetric::value(0))
        .unwrap();

    assert_eq!(db.get(&["k1", "k2"]), Some(MockMetric::child(10)));
    assert_eq!(db.get(&["k1"]), Some(MockMetric::value(20)));
    assert_eq!(db.get(&["k1", "missing"]), None);
    assert_eq!(db.get(&["missing"]), None);
    assert_eq!(db.get(&[]), None);
}

#[test]
fn update_rejects_invalid_paths() {
    let db = db2();
    assert!(db.update(&[], |c| c.add_ci(1), || MockMetric::child(0)).is_err());
    assert!(db
        .update(&["a", "b", "c"], |c| c.add_ci(1), || MockMetric::child(0))
        .is_err());
}

#[test]
fn children_lists_immediate_values() {
    let db = db2();
    db.update(&["k1", "k2"], |c| c.add_ci(10), || MockMetric::child(0))
        .unwrap();
    db.update(&["k1", "k3"], |c| c.add_ci(3), || MockMetric::child(0))
        .unwrap();
    db.update(&["k2", "k4"], |c| c.add_ci(4), || MockMetric::child(0))
        .unwrap();
    db.update(&["k1"], |v| v.add_i2(10), || MockMetric::value(0))
        .unwrap();

    let k1 = db.children(&["k1"]);
    assert_eq!(k1.len(), 2);
    assert!(k1.contains(&MockMetric::child(10)));
    assert!(k1.contains(&MockMetric::child(3)));

    assert_eq!(db.children(&["k2"]), vec![MockMetric::child(4)]);
    assert!(db.children(&["unknown"]).is_empty());
    assert!(db.children(&["k1", "k2"]).is_empty());
}

#[test]
fn select2_joins_both_ranks() {
    let db = db2();
    db.update(&["k1"], |v| v.add_i2(1), || MockMetric::value(0))
        .unwrap();
    db.update(&["k1", "a"], |c| c.add_ci(10), || MockMetric::child(0))
        .unwrap();
    db.update(&["k1", "b"], |c| c.add_ci(20), || MockMetric::child(0))
        .unwrap();

    let mut rows = db.select2();
    rows.sort_by_key(|r| r.v2.as_ref().map(MockMetric::ci));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].v1, Some(MockMetric::value(1)));
    assert_eq!(rows[0].v2, Some(MockMetric::child(10)));
    assert_eq!(rows[1].v2, Some(MockMetric::child(20)));
}

#[test]
fn select3_yields_one_row_per_complete_path() {
    let db = db3();
    db.update(&["k1", "k2", "k3"], |c| c.add_ci(1), || MockMetric::child(0))
        .unwrap();
    db.update(&["k1", "k2", "k4"], |c| c.add_ci(2), || MockMetric::child(0))
        .unwrap();
    // A two-deep path contributes no three-deep row.
    db.update(&["k9", "k2"], |c| c.add_ci(3), || MockMetric::child(0))
        .unwrap();

    let rows = db.select3();
    assert_eq!(rows.len(), 2);
    // Intermediate nodes were created valueless by update().
    assert!(rows.iter().all(|r| r.v1.is_none() && r.v2.is_none()));

    assert_eq!(db.select2().len(), 2);
}

#[test]
fn remove_all_clears_everything() {
    let db = db2();
    db.update(&["k1", "k2"], |c| c.add_ci(1), || MockMetric::child(0))
        .unwrap();
    db.remove_all();
    assert_eq!(db.get(&["k1"]), None);
    assert!(db.select2().is_empty());
}

#[test]
fn take_snapshot_swaps_atomically() {
    let db = db2();
    db.update(&["k1", "k2"], |c| c.add_ci(10), || MockMetric::child(0))
        .unwrap();

    let snapshot = db.take_snapshot();
    assert_eq!(
        snapshot["k1"].children["k2"].value,
        Some(MockMetric::child(10))
    );
    assert_eq!(db.get(&["k1", "k2"]), None);
    assert!(db.take_snapshot().is_empty());
}

#[test]
fn merge_data_accumulates_and_aggregates() {
    let db = db2();
    let mut remote = NodeData::with_value(Some(MockMetric::value(20)));
    let _ = remote
        .children
        .insert("k2".to_owned(), NodeData::with_value(Some(MockMetric::child(10))));
    let _ = remote
        .children
        .insert("k3".to_owned(), NodeData::with_value(Some(MockMetric::child(1))));
    let data = [("k1".to_owned(), remote)].into_iter().collect();

    let failed = db.merge_data(&data);
    assert!(failed.is_empty());
    assert_eq!(db.get(&["k1", "k2"]).unwrap().ci(), 10);
    assert_eq!(db.get(&["k1"]).unwrap().i2(), 20);
    assert_eq!(db.get(&["k1"]).unwrap().sum(), 11);

    // Merging the same snapshot again doubles the raw counters.
    let failed = db.merge_data(&data);
    assert!(failed.is_empty());
    assert_eq!(db.get(&["k1", "k2"]).unwrap().ci(), 20);
    assert_eq!(db.get(&["k1"]).unwrap().i2(), 40);
    assert_eq!(db.get(&["k1"]).unwrap().sum(), 22);
}

#[test]
fn merge_data_reports_kind_mismatch_and_continues() {
    let db = db2();
    db.update(&["k1", "k2"], |c| c.add_ci(1), || MockMetric::child(0))
        .unwrap();

    // Remote claims k1/k2 is a Value and k1/k3 is a well-formed Child.
    let mut remote = NodeData::with_value(Some(MockMetric::value(5)));
    let _ = remote
        .children
        .insert("k2".to_owned(), NodeData::with_value(Some(MockMetric::value(9))));
    let _ = remote
        .children
        .insert("k3".to_owned(), NodeData::with_value(Some(MockMetric::child(7))));
    let data = [("k1".to_owned(), remote)].into_iter().collect();

    let failed = db.merge_data(&data);
    assert_eq!(failed, vec![vec!["k1".to_owned(), "k2".to_owned()]]);

    // The incompatible node kept its value; the sibling still merged.
    assert_eq!(db.get(&["k1", "k2"]).unwrap().ci(), 1);
    assert_eq!(db.get(&["k1", "k3"]).unwrap().ci(), 7);
    assert_eq!(db.get(&["k1"]).unwrap().i2(), 5);
}

#[test]
fn merge_data_materializes_defaults_from_schema() {
    let db = db2();
    // Remote has only a leaf; the k1 node must be created from the level-0
    // factory and aggregate over the merged child.
    let mut remote = NodeData::<MockMetric>::with_value(None);
    let _ = remote
        .children
        .insert("k2".to_owned(), NodeData::with_value(Some(MockMetric::child(4))));
    let data = [("k1".to_owned(), remote)].into_iter().collect();

    assert!(db.merge_data(&data).is_empty());
    assert_eq!(db.get(&["k1"]).unwrap().i2(), 0);
    assert_eq!(db.get(&["k1"]).unwrap().sum(), 4);
}

#[test]
fn update_aggregates_all_rebuilds_after_load() {
    let db = db2();
    let mut remote = NodeData::with_value(Some(MockMetric::value(20)));
    let _ = remote
        .children
        .insert("k2".to_owned(), NodeData::with_value(Some(MockMetric::child(10))));
    let data: std::collections::BTreeMap<_, _> =
        [("k1".to_owned(), remote)].into_iter().collect();

    db.load_from(data);
    assert_eq!(db.get(&["k1"]).unwrap().sum(), 0);

    db.update_aggregates_all();
    assert_eq!(db.get(&["k1"]).unwrap().sum(), 10);
}

#[test]
fn concurrent_updates_to_one_leaf_lose_nothing() {
    let db = db3();
    let writers: i64 = 16;
    let per_writer: i64 = 500;

    thread::scope(|scope| {
        for _ in 0..writers {
            let db = &db;
            let _ = scope.spawn(move || {
                for _ in 0..per_writer {
                    db.update(&["k1", "k2", "k3"], |c| c.add_ci(1), || {
                        MockMetric::child(0)
                    })
                    .unwrap();
                }
            });
        }
    });

    assert_eq!(
        db.get(&["k1", "k2", "k3"]).unwrap().ci(),
        writers * per_writer
    );
}

#[test]
fn concurrent_updates_to_disjoint_leaves() {
    let db = db2();
    thread::scope(|scope| {
        for i in 0..8 {
            let db = &db;
            let _ = scope.spawn(move || {
                let key = format!("c{i}");
                for _ in 0..200 {
                    db.update(&["k1", &key], |c| c.add_ci(1), || MockMetric::child(0))
                        .unwrap();
                }
            });
        }
    });

    for i in 0..8 {
        assert_eq!(db.get(&["k1", &format!("c{i}")]).unwrap().ci(), 200);
    }
}
