//! End-to-end node to master synchronisation through the loopback
//! transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use statsdb::mock::MockMetric;
use statsdb::scheduler::FixedDelayScheduler;
use statsdb::{IncrementalIdGenerator, KeySchema, SyncEnvelope};
use statsdb_master::{LoopbackTransport, NullStorage, StatsDbMaster};
use statsdb_node::{StatsDbNode, Transport};

type Master = StatsDbMaster<MockMetric, NullStorage>;

fn master(schema: KeySchema<MockMetric>) -> Arc<Master> {
    Arc::new(StatsDbMaster::new(schema, NullStorage).unwrap())
}

fn node(
    schema: KeySchema<MockMetric>,
    origin: &str,
    transport: Arc<dyn Transport<MockMetric>>,
) -> StatsDbNode<MockMetric> {
    StatsDbNode::with_id_generator(
        schema,
        origin,
        transport,
        None,
        Arc::new(IncrementalIdGenerator::new(0)),
    )
}

/// Delivers to the master but pretends the acknowledgment got lost.
struct LossyAck<T> {
    inner: T,
    drop_ack: AtomicBool,
}

impl<T: Transport<MockMetric>> Transport<MockMetric> for LossyAck<T> {
    fn send(&self, sync: &SyncEnvelope<MockMetric>) -> eyre::Result<()> {
        self.inner.send(sync)?;
        if self.drop_ack.swap(false, Ordering::SeqCst) {
            eyre::bail!("acknowledgment lost");
        }
        Ok(())
    }
}

/// Fails outright while the link is down.
struct Unreliable<T> {
    inner: T,
    down: AtomicBool,
}

impl<T: Transport<MockMetric>> Transport<MockMetric> for Unreliable<T> {
    fn send(&self, sync: &SyncEnvelope<MockMetric>) -> eyre::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            eyre::bail!("link down");
        }
        self.inner.send(sync)
    }
}

#[test]
fn node_sync_reaches_master() {
    let master = master(MockMetric::schema2());
    let node = node(
        MockMetric::schema2(),
        "node-a",
        Arc::new(LoopbackTransport::new(Arc::clone(&master))),
    );

    node.update(&["k1", "k2"], |c| c.add_ci(10), || MockMetric::child(0))
        .unwrap();
    node.update(&["k1", "k3"], |c| c.add_ci(1), || MockMetric::child(0))
        .unwrap();
    node.sync();

    assert!(node.last_sync_success());
    assert!(node.get(&["k1", "k2"]).is_none());
    assert_eq!(master.get(&["k1", "k2"]).unwrap().ci(), 10);
    assert_eq!(master.get(&["k1"]).unwrap().sum(), 11);
}

#[test]
fn empty_sync_leaves_master_untouched() {
    let master = master(MockMetric::schema2());
    let node = node(
        MockMetric::schema2(),
        "node-a",
        Arc::new(LoopbackTransport::new(Arc::clone(&master))),
    );

    node.sync();

    assert!(node.last_sync_success());
    assert!(master.select2().is_empty());
}

#[test]
fn deep_totals_roll_up_across_rounds() {
    let master = master(MockMetric::schema3());
    let node = node(
        MockMetric::schema3(),
        "node-a",
        Arc::new(LoopbackTransport::new(Arc::clone(&master))),
    );

    node.update(&["p", "c"], |c| c.add_ci(1), || MockMetric::child(0))
        .unwrap();
    node.update(&["p", "c", "g"], |c| c.add_ci(2), || MockMetric::child(0))
        .unwrap();
    node.sync();

    assert_eq!(master.get(&["p"]).unwrap().sum(), 3);

    node.update(&["p", "c"], |c| c.add_ci(1), || MockMetric::child(0))
        .unwrap();
    node.update(&["p", "c", "g"], |c| c.add_ci(1), || MockMetric::child(0))
        .unwrap();
    node.sync();

    assert_eq!(master.get(&["p", "c"]).unwrap().ci(), 2);
    assert_eq!(master.get(&["p", "c", "g"]).unwrap().ci(), 3);
    assert_eq!(master.get(&["p"]).unwrap().sum(), 5);
}

#[test]
fn origins_accumulate_independently() {
    let master = master(MockMetric::schema2());
    let node_a = node(
        MockMetric::schema2(),
        "node-a",
        Arc::new(LoopbackTransport::new(Arc::clone(&master))),
    );
    let node_b = node(
        MockMetric::schema2(),
        "node-b",
        Arc::new(LoopbackTransport::new(Arc::clone(&master))),
    );

    node_a
        .update(&["k1", "k2"], |c| c.add_ci(10), || MockMetric::child(0))
        .unwrap();
    node_b
        .update(&["k1", "k2"], |c| c.add_ci(5), || MockMetric::child(0))
        .unwrap();
    node_a.sync();
    node_b.sync();

    // Both nodes used id "1"; watermarks are per origin.
    assert_eq!(master.get(&["k1", "k2"]).unwrap().ci(), 15);
}

#[test]
fn lost_acknowledgment_does_not_double_count() {
    let master = master(MockMetric::schema2());
    let node = node(
        MockMetric::schema2(),
        "node-a",
        Arc::new(LossyAck {
            inner: LoopbackTransport::new(Arc::clone(&master)),
            drop_ack: AtomicBool::new(true),
        }),
    );

    node.update(&["k1", "k2"], |c| c.add_ci(10), || MockMetric::child(0))
        .unwrap();
    node.sync();
    assert!(!node.last_sync_success());

    // The retry redelivers the same envelope; the watermark absorbs it.
    node.sync();
    assert!(node.last_sync_success());
    assert_eq!(master.get(&["k1", "k2"]).unwrap().ci(), 10);
}

#[test]
fn outage_recovers_without_loss() {
    let master = master(MockMetric::schema2());
    let transport = Arc::new(Unreliable {
        inner: LoopbackTransport::new(Arc::clone(&master)),
        down: AtomicBool::new(true),
    });
    let node = node(
        MockMetric::schema2(),
        "node-a",
        Arc::clone(&transport) as Arc<dyn Transport<MockMetric>>,
    );

    node.update(&["k1", "k2"], |c| c.add_ci(3), || MockMetric::child(0))
        .unwrap();
    node.sync();
    assert!(!node.last_sync_success());

    // Updates during the outage accumulate for the next snapshot.
    node.update(&["k1", "k2"], |c| c.add_ci(4), || MockMetric::child(0))
        .unwrap();

    transport.down.store(false, Ordering::SeqCst);
    node.sync();
    node.sync();

    assert_eq!(master.get(&["k1", "k2"]).unwrap().ci(), 7);
}

#[test]
fn scheduled_sync_drains_periodically() {
    let master = master(MockMetric::schema2());
    let node = Arc::new(node(
        MockMetric::schema2(),
        "node-a",
        Arc::new(LoopbackTransport::new(Arc::clone(&master))),
    ));

    let scheduled = Arc::clone(&node);
    let _scheduler = FixedDelayScheduler::new(Duration::from_millis(10), move || scheduled.sync());

    node.update(&["k1", "k2"], |c| c.add_ci(6), || MockMetric::child(0))
        .unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if master.get(&["k1", "k2"]).map(|c| c.ci()) == Some(6) {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "sync never arrived");
        thread::sleep(Duration::from_millis(5));
    }
}
