//! Both participants acting at once on a multi-threaded runtime.
//!
//! Counters and logs are updated through store-side transactions and
//! ordered appends, so no interleaving may lose or duplicate an update.

use duochat_core::{ChatConfig, ChatError, derive_id, store::parse_key};
use duochat_harness::{InvariantRegistry, TestCluster};

const PER_SENDER: usize = 25;

async fn send_burst(cluster: &TestCluster, from: usize, to: usize) -> Vec<tokio::task::JoinHandle<Result<(), ChatError>>> {
    (0..PER_SENDER)
        .map(|i| {
            let client = cluster.client(from).clone();
            let partner = cluster.uid(to).clone();
            tokio::spawn(async move { client.send(&partner, &format!("{from}:{i}")).await.map(drop) })
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_sends_keep_exact_counts() {
    let cluster = TestCluster::new(5, &["alice", "bob"]).unwrap();

    let mut tasks = send_burst(&cluster, 0, 1).await;
    tasks.extend(send_burst(&cluster, 1, 0).await);
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let snapshot = cluster.snapshot().unwrap();
    InvariantRegistry::standard().assert_all(&snapshot, "after parallel sends");

    let room = derive_id(cluster.uid(0), cluster.uid(1)).unwrap();
    let log = &snapshot.conversations[room.key()];
    let indices: Vec<_> = log.keys().map(|k| parse_key(k).unwrap()).collect();
    assert_eq!(indices, (0..2 * PER_SENDER as u64).collect::<Vec<_>>());

    assert_eq!(snapshot.roster["alice"]["bob"].unread_count, PER_SENDER as i64);
    assert_eq!(snapshot.roster["bob"]["alice"].unread_count, PER_SENDER as i64);

    // Both roster records point at the newest message.
    let newest = log.keys().next_back().cloned();
    assert_eq!(snapshot.roster["alice"]["bob"].last_message_id, newest);
    assert_eq!(snapshot.roster["bob"]["alice"].last_message_id, newest);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn open_racing_with_sends_never_loses_a_message() {
    let cluster = TestCluster::with_config(9, &["alice", "bob"], ChatConfig::default()).unwrap();

    let sends = send_burst(&cluster, 0, 1).await;
    let opener = {
        let client = cluster.client(1).clone();
        let partner = cluster.uid(0).clone();
        tokio::spawn(async move {
            for _ in 0..PER_SENDER {
                client.open_conversation(&partner).await?;
                tokio::task::yield_now().await;
            }
            Ok::<_, ChatError>(())
        })
    };
    for task in sends {
        task.await.unwrap().unwrap();
    }
    opener.await.unwrap().unwrap();

    // A final open settles whatever arrived after the last racing open.
    let history = cluster.client(1).open_conversation(cluster.uid(0)).await.unwrap();

    assert_eq!(history.len(), PER_SENDER);
    assert!(history.iter().all(|m| m.seen));
    assert_eq!(cluster.client(1).roster().await.unwrap()[0].unread_count, 0);
    InvariantRegistry::standard().assert_all(&cluster.snapshot().unwrap(), "after racing open");
}
