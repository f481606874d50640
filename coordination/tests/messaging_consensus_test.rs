//! Message routing and consensus through a running coordinator

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use swarm_coordination::consensus::ResolutionReason;
use swarm_coordination::events::{message_types, BusError, Mailbox};
use swarm_coordination::{
    ConsensusStatus, DeliveryMode, Fixed, Requirements, SimulatedExecutor, SwarmConfig,
    SwarmCoordinator, SwarmError, SwarmMessage, WorkerId, WorkerSnapshot,
};

fn config() -> SwarmConfig {
    SwarmConfig {
        seed: Some(3),
        bus_idle_poll_ms: 20,
        consensus_sweep_interval_ms: 10,
        ..SwarmConfig::default()
    }
}

async fn swarm(config: SwarmConfig, workers: &[&str]) -> SwarmCoordinator {
    let executor = SimulatedExecutor::new(Arc::new(Fixed(0.0)), Arc::new(Fixed(0.8)));
    let swarm = SwarmCoordinator::new(config)
        .with_executor(Arc::new(executor))
        .with_innovation(Arc::new(Fixed(0.5)));
    for id in workers {
        swarm
            .add_worker(WorkerSnapshot::new(*id, "general"))
            .await
            .unwrap();
    }
    swarm
}

/// Read until a message of `message_type` arrives or the mailbox goes quiet
async fn wait_for_type(mailbox: &mut Mailbox, message_type: &str) -> Option<SwarmMessage> {
    while let Ok(Some(message)) = timeout(Duration::from_secs(2), mailbox.recv()).await {
        if message.message_type == message_type {
            return Some(message);
        }
    }
    None
}

#[tokio::test]
async fn test_workers_hear_task_completion() {
    let swarm = swarm(config(), &["a", "b"]).await;
    let mut mailbox = swarm.open_mailbox(&WorkerId::from("a"));
    swarm.start().await.unwrap();

    let result = swarm
        .submit_task("observe", Requirements::new(), 0.1, None)
        .await
        .unwrap();

    let message = wait_for_type(&mut mailbox, message_types::TASK_COMPLETED)
        .await
        .expect("task_completed delivered");
    assert_eq!(message.content["task_id"], result.task_id.as_str());
    assert_eq!(message.ttl, swarm_coordination::events::DEFAULT_TTL - 1);

    swarm.shutdown().await;
}

#[tokio::test]
async fn test_direct_message_reaches_only_receiver() {
    let swarm = swarm(config(), &["a", "b"]).await;
    let mut inbox_a = swarm.open_mailbox(&WorkerId::from("a"));
    let mut inbox_b = swarm.open_mailbox(&WorkerId::from("b"));
    swarm.start().await.unwrap();

    swarm
        .publish(SwarmMessage::direct("a", "b", "negotiate", json!({ "offer": 3 })))
        .unwrap();

    let received = wait_for_type(&mut inbox_b, "negotiate")
        .await
        .expect("direct message delivered");
    assert_eq!(received.content["offer"], 3);
    assert_eq!(received.mode, DeliveryMode::Direct);

    swarm.shutdown().await;
    while let Ok(message) = inbox_a.try_recv() {
        assert_ne!(message.message_type, "negotiate");
    }
}

#[tokio::test]
async fn test_publish_rejected_after_shutdown() {
    let swarm = swarm(config(), &[]).await;
    swarm.start().await.unwrap();
    swarm.shutdown().await;

    let result = swarm.publish(SwarmMessage::broadcast("x", "late", json!({})));
    assert!(matches!(result, Err(SwarmError::Bus(BusError::Closed))));
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let swarm = swarm(config(), &[]).await;
    swarm.start().await.unwrap();
    assert!(matches!(
        swarm.start().await,
        Err(SwarmError::Bus(BusError::RouterAlreadyRunning))
    ));
    swarm.shutdown().await;
}

#[tokio::test]
async fn test_unanimous_proposal_is_reached() {
    let swarm = swarm(config(), &["a", "b", "c"]).await;
    let participants: Vec<WorkerId> = ["a", "b", "c"].into_iter().map(WorkerId::from).collect();
    swarm
        .propose_consensus("adopt-plan", json!({ "plan": "B" }), participants.clone())
        .await
        .unwrap();

    let mut last = None;
    for id in &participants {
        last = swarm.cast_vote("adopt-plan", id, true, 1.0).await.unwrap().resolution;
    }

    let resolution = last.expect("resolved on the final vote");
    assert_eq!(resolution.status, ConsensusStatus::ConsensusReached);
    assert_eq!(resolution.ratio, 1.0);
    assert_eq!(
        swarm
            .wait_for_consensus("adopt-plan", Duration::from_millis(10))
            .await
            .unwrap(),
        ConsensusStatus::ConsensusReached
    );
}

#[tokio::test]
async fn test_confident_rejection_fails_proposal() {
    let swarm = swarm(config(), &["a", "b", "c"]).await;
    let participants: Vec<WorkerId> = ["a", "b", "c"].into_iter().map(WorkerId::from).collect();
    swarm
        .propose_consensus("risky", json!({}), participants)
        .await
        .unwrap();

    swarm.cast_vote("risky", &"a".into(), false, 1.0).await.unwrap();
    swarm.cast_vote("risky", &"b".into(), false, 1.0).await.unwrap();
    let receipt = swarm.cast_vote("risky", &"c".into(), true, 0.1).await.unwrap();

    let resolution = receipt.resolution.unwrap();
    assert_eq!(resolution.status, ConsensusStatus::ConsensusFailed);
    assert!(resolution.ratio < 0.1);
}

#[tokio::test]
async fn test_stalled_proposal_expires_via_sweeper() {
    let config = SwarmConfig {
        consensus_deadline_ms: 50,
        ..config()
    };
    let swarm = swarm(config, &["a", "b", "c"]).await;
    swarm.start().await.unwrap();

    let participants: Vec<WorkerId> = ["a", "b", "c"].into_iter().map(WorkerId::from).collect();
    swarm
        .propose_consensus("stalled", json!({}), participants)
        .await
        .unwrap();
    swarm.cast_vote("stalled", &"a".into(), true, 1.0).await.unwrap();

    let status = swarm
        .wait_for_consensus("stalled", Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(status, ConsensusStatus::ConsensusFailed);

    let proposal = swarm.proposal("stalled").await.unwrap();
    assert_eq!(proposal.reason, Some(ResolutionReason::DeadlineExpired));
    assert!(matches!(
        swarm.cast_vote("stalled", &"b".into(), true, 1.0).await,
        Err(SwarmError::Consensus(_))
    ));

    swarm.shutdown().await;
}

#[tokio::test]
async fn test_history_records_pipeline_messages() {
    let swarm = swarm(config(), &["a"]).await;
    swarm
        .submit_task("trace", Requirements::new(), 0.5, None)
        .await
        .unwrap();

    let bus = swarm.bus();
    assert_eq!(bus.messages_of_type(message_types::TASK_SUBMITTED).len(), 1);
    assert_eq!(bus.messages_of_type(message_types::BID_REQUEST).len(), 2);
    assert_eq!(bus.messages_of_type(message_types::TASK_COMPLETED).len(), 1);

    let stats = bus.with_history(|history| history.replay(|_| {}));
    assert!(stats.total_messages >= 5);
}
