//! End-to-end scheduler scenarios against scripted chain and node clients.

mod common;

use std::sync::Arc;

use common::fixtures::{
    config, farm, fleet, gib, seed_node_client, statistics, unit_request, NodeBuilder,
};
use farmerbot::{Error, PowerState, Scheduler, Updater};
use farmerbot_client::memory::{MemoryChain, MemoryNodeClient};
use farmerbot_proto::{Capacity, Gpu, NodeFilter, Power, PowerTarget};

fn unit_filter() -> NodeFilter {
    NodeFilter {
        cru: 1,
        mru: 1,
        sru: 1,
        hru: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn finds_the_priority_node_and_reserves_it() {
    // S1: two on nodes, N2 is priority, request needs one public IP
    let mut cfg = config(1);
    cfg.priority_nodes = vec![2];
    let fleet = fleet(
        farm(1, 1),
        cfg,
        vec![NodeBuilder::new(1).build(), NodeBuilder::new(2).build()],
    );
    let chain = MemoryChain::new();
    let scheduler = Scheduler::new(Arc::clone(&fleet));

    let mut filter = unit_filter();
    filter.public_ips = 1;

    let node_id = scheduler.find_node(&chain, &filter).await.unwrap();
    assert_eq!(node_id, 2);

    let node = fleet.node(2).await.unwrap();
    assert_eq!(node.resources.used, unit_request());
    assert_eq!(node.public_ips_used, 1);
    assert!(node.timeout_claimed_resources.is_some());
    assert_eq!(node.power_state, PowerState::On);

    // an on node never needs a chain power call
    assert!(chain.power_calls().is_empty());

    let untouched = fleet.node(1).await.unwrap();
    assert!(untouched.resources.used.is_empty());
}

#[tokio::test]
async fn wakes_an_off_node() {
    // S2: both nodes are off; the chosen one transitions to waking up
    let fleet = fleet(
        farm(1, 0),
        config(1),
        vec![
            NodeBuilder::new(1).power_state(PowerState::Off).build(),
            NodeBuilder::new(2).power_state(PowerState::Off).build(),
        ],
    );
    let chain = MemoryChain::new();
    let scheduler = Scheduler::new(Arc::clone(&fleet));

    let node_id = scheduler.find_node(&chain, &unit_filter()).await.unwrap();

    assert_eq!(chain.power_calls(), vec![(node_id, true)]);
    let node = fleet.node(node_id).await.unwrap();
    assert_eq!(node.power_state, PowerState::WakingUp);
}

#[tokio::test]
async fn rejects_public_ip_oversubscription() {
    // S3: the farm owns one IP and it is already used
    let fleet = fleet(
        farm(1, 1),
        config(1),
        vec![
            NodeBuilder::new(1).public_ips_used(1).build(),
            NodeBuilder::new(2).build(),
        ],
    );
    let chain = MemoryChain::new();
    let scheduler = Scheduler::new(Arc::clone(&fleet));

    let before = fleet.snapshot().await;

    let mut filter = NodeFilter::default();
    filter.public_ips = 1;
    let err = scheduler.find_node(&chain, &filter).await.unwrap_err();

    assert!(matches!(err, Error::NoSuitableNode));
    assert_eq!(fleet.snapshot().await, before);
    assert!(chain.power_calls().is_empty());
}

#[tokio::test]
async fn failed_wake_up_rolls_the_reservation_back() {
    let fleet = fleet(
        farm(1, 0),
        config(1),
        vec![
            NodeBuilder::new(1).power_state(PowerState::Off).build(),
            NodeBuilder::new(2).power_state(PowerState::Off).build(),
        ],
    );
    let chain = MemoryChain::new();
    chain.fail_power_target(true);
    for id in [1, 2] {
        chain.seed_power_target(
            id,
            PowerTarget {
                state: Power::Down,
                target: Power::Down,
            },
        );
    }
    let scheduler = Scheduler::new(Arc::clone(&fleet));

    let before = fleet.snapshot().await;
    let err = scheduler.find_node(&chain, &unit_filter()).await.unwrap_err();

    assert!(matches!(err, Error::ReservationConflict { .. }));
    assert_eq!(fleet.snapshot().await, before);
}

#[tokio::test]
async fn dedicated_requests_claim_the_whole_node() {
    let total = Capacity {
        cru: 8,
        mru: gib(16),
        sru: gib(16),
        hru: gib(16),
    };
    let fleet = fleet(
        farm(1, 0),
        config(1),
        vec![
            NodeBuilder::new(1).dedicated().total(total).build(),
            NodeBuilder::new(2).build(),
        ],
    );
    let chain = MemoryChain::new();
    let scheduler = Scheduler::new(Arc::clone(&fleet));

    let mut filter = unit_filter();
    filter.dedicated = true;
    let node_id = scheduler.find_node(&chain, &filter).await.unwrap();

    assert_eq!(node_id, 1);
    assert_eq!(fleet.node(1).await.unwrap().resources.used, total);
}

#[tokio::test]
async fn dedicated_node_cannot_be_rented_partially() {
    let fleet = fleet(
        farm(1, 0),
        config(1),
        vec![NodeBuilder::new(1).dedicated().build()],
    );
    let chain = MemoryChain::new();
    let scheduler = Scheduler::new(Arc::clone(&fleet));

    // partial request against a dedicated node finds nothing
    let err = scheduler.find_node(&chain, &unit_filter()).await.unwrap_err();
    assert!(matches!(err, Error::NoSuitableNode));

    // asking for exactly the node total works
    let mut filter = NodeFilter::default();
    filter.cru = 4;
    filter.mru = 8;
    filter.sru = 8;
    filter.hru = 8;
    let node_id = scheduler.find_node(&chain, &filter).await.unwrap();
    assert_eq!(node_id, 1);
}

#[tokio::test]
async fn gpu_constraints_imply_a_whole_node_claim() {
    let gpus = vec![
        Gpu {
            id: "0000:28:00.0".to_owned(),
            vendor: "nvidia".to_owned(),
            device: "a100".to_owned(),
            contract: 0,
        },
        Gpu {
            id: "0000:29:00.0".to_owned(),
            vendor: "amd".to_owned(),
            device: "mi300".to_owned(),
            contract: 0,
        },
    ];
    let fleet = fleet(
        farm(1, 0),
        config(1),
        vec![
            NodeBuilder::new(1).build(),
            NodeBuilder::new(2).gpus(gpus).build(),
        ],
    );
    let chain = MemoryChain::new();
    let scheduler = Scheduler::new(Arc::clone(&fleet));

    let mut filter = unit_filter();
    filter.gpu_vendors = vec!["nvidia".to_owned()];
    let node_id = scheduler.find_node(&chain, &filter).await.unwrap();

    assert_eq!(node_id, 2);
    let node = fleet.node(2).await.unwrap();
    assert_eq!(node.resources.used, node.resources.total);

    // nobody carries two nvidia GPUs
    let mut filter = unit_filter();
    filter.num_gpu = 2;
    filter.gpu_vendors = vec!["nvidia".to_owned()];
    assert!(matches!(
        scheduler.find_node(&chain, &filter).await,
        Err(Error::NoSuitableNode)
    ));
}

#[tokio::test]
async fn excluded_and_rented_nodes_are_skipped() {
    let fleet = fleet(
        farm(1, 0),
        config(1),
        vec![
            NodeBuilder::new(1).rent_contract().build(),
            NodeBuilder::new(2).build(),
            NodeBuilder::new(3).build(),
        ],
    );
    let chain = MemoryChain::new();
    let scheduler = Scheduler::new(Arc::clone(&fleet));

    let mut filter = unit_filter();
    filter.nodes_excluded = vec![2];
    let node_id = scheduler.find_node(&chain, &filter).await.unwrap();
    assert_eq!(node_id, 3);
}

#[tokio::test]
async fn claimed_resources_survive_the_data_updater() {
    // S7: the node reports zero usage after a reservation; the claim wins
    // until its timeout
    let fleet = fleet(
        farm(1, 0),
        config(1),
        vec![NodeBuilder::new(1).build(), NodeBuilder::new(2).build()],
    );
    let chain = MemoryChain::new();
    let node_client = Arc::new(MemoryNodeClient::new());
    seed_node_client(&node_client, &fleet.snapshot().await);

    let scheduler = Scheduler::new(Arc::clone(&fleet));
    let node_id = scheduler.find_node(&chain, &unit_filter()).await.unwrap();

    // the node itself still reports an empty machine
    let idle = NodeBuilder::new(node_id).build();
    node_client.set_statistics(idle.twin_id, statistics(&idle));

    let updater = Updater::new(Arc::clone(&fleet), node_client.clone());
    updater.update_all(&chain, chrono::Local::now()).await;

    let node = fleet.node(node_id).await.unwrap();
    assert_eq!(node.resources.used, unit_request());
    // only the liveness probe ran against the claimed node
    assert_eq!(node_client.statistics_probes(node.twin_id), 0);
    assert_eq!(node_client.version_probes(node.twin_id), 1);
}
