//! Unit tests for the pending-request correlator.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mcp_relay::bridge::correlator::Correlator;
use mcp_relay::bridge::MessageId;
use mcp_relay::AppError;

const LONG: Duration = Duration::from_secs(30);

fn correlator() -> Arc<Correlator> {
    Arc::new(Correlator::new())
}

#[tokio::test]
async fn matching_response_resolves_pending_request() {
    let correlator = correlator();
    let rx = correlator
        .register(MessageId::String("1".into()), LONG)
        .expect("register");

    let response = json!({"jsonrpc": "2.0", "id": "1", "result": "pong"});
    assert!(correlator.resolve_incoming(response.clone()));

    let outcome = rx.await.expect("reply delivered");
    assert_eq!(outcome, Ok(response));
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test]
async fn string_and_number_ids_do_not_collide() {
    let correlator = correlator();
    let num_rx = correlator.register(MessageId::Number(7), LONG).unwrap();
    let str_rx = correlator
        .register(MessageId::String("7".into()), LONG)
        .unwrap();

    assert!(correlator.resolve_incoming(json!({"id": 7, "result": "n"})));
    assert_eq!(correlator.pending_count(), 1);
    assert!(correlator.resolve_incoming(json!({"id": "7", "result": "s"})));

    assert_eq!(num_rx.await.unwrap().unwrap()["result"], "n");
    assert_eq!(str_rx.await.unwrap().unwrap()["result"], "s");
}

#[tokio::test]
async fn unknown_and_id_less_messages_are_dropped() {
    let correlator = correlator();
    let _rx = correlator.register(MessageId::Number(1), LONG).unwrap();

    assert!(!correlator.resolve_incoming(json!({"id": 99, "result": null})));
    assert!(!correlator.resolve_incoming(json!({"method": "notifications/progress"})));
    assert!(!correlator.resolve_incoming(json!([1, 2, 3])));
    assert_eq!(correlator.pending_count(), 1, "pending entry must be untouched");
}

#[tokio::test]
async fn duplicate_id_is_rejected_and_first_kept() {
    let correlator = correlator();
    let first = correlator.register(MessageId::String("dup".into()), LONG).unwrap();

    let second = correlator.register(MessageId::String("dup".into()), LONG);
    assert!(matches!(second, Err(AppError::DuplicateId(_))));
    assert_eq!(correlator.pending_count(), 1);

    assert!(correlator.resolve_incoming(json!({"id": "dup", "result": 1})));
    assert_eq!(first.await.unwrap().unwrap()["result"], 1);
}

#[tokio::test]
async fn reject_all_fails_every_pending_request() {
    let correlator = correlator();
    let receivers: Vec<_> = (1..=3)
        .map(|n| correlator.register(MessageId::Number(n), LONG).unwrap())
        .collect();

    let rejected =
        correlator.reject_all(&AppError::ProcessExited("process exited with code 3".into()));
    assert_eq!(rejected, 3);
    assert_eq!(correlator.pending_count(), 0);

    for rx in receivers {
        let outcome = rx.await.expect("rejection delivered");
        assert!(matches!(outcome, Err(AppError::ProcessExited(ref msg)) if msg.contains("code 3")));
    }

    assert_eq!(correlator.reject_all(&AppError::ProcessExited(String::new())), 0);
}

#[tokio::test(start_paused = true)]
async fn request_times_out_and_late_response_is_dropped() {
    let correlator = correlator();
    let rx = correlator
        .register(MessageId::String("slow".into()), Duration::from_millis(100))
        .unwrap();

    let outcome = rx.await.expect("timeout delivered");
    assert!(matches!(outcome, Err(AppError::Timeout(_))), "got {outcome:?}");
    assert!(!correlator.is_pending(&MessageId::String("slow".into())));

    assert!(
        !correlator.resolve_incoming(json!({"id": "slow", "result": "late"})),
        "late response must not resolve anything"
    );
}

#[tokio::test(start_paused = true)]
async fn timeout_only_affects_its_own_request() {
    let correlator = correlator();
    let fast = correlator
        .register(MessageId::Number(1), Duration::from_millis(50))
        .unwrap();
    let slow = correlator.register(MessageId::Number(2), LONG).unwrap();

    assert!(matches!(fast.await.unwrap(), Err(AppError::Timeout(_))));
    assert!(correlator.is_pending(&MessageId::Number(2)));

    assert!(correlator.resolve_incoming(json!({"id": 2, "result": "ok"})));
    assert_eq!(slow.await.unwrap().unwrap()["result"], "ok");
}

#[tokio::test(start_paused = true)]
async fn reused_id_is_not_expired_by_earlier_timer() {
    let correlator = correlator();
    let id = MessageId::String("again".into());

    let first = correlator.register(id.clone(), Duration::from_millis(100)).unwrap();
    assert!(correlator.resolve_incoming(json!({"id": "again", "result": 1})));
    first.await.unwrap().unwrap();

    let second = correlator.register(id.clone(), Duration::from_secs(10)).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(correlator.is_pending(&id), "first timer must not expire the reused id");

    assert!(correlator.resolve_incoming(json!({"id": "again", "result": 2})));
    assert_eq!(second.await.unwrap().unwrap()["result"], 2);
}

#[tokio::test]
async fn cancel_removes_entry_and_closes_receiver() {
    let correlator = correlator();
    let id = MessageId::Number(5);
    let rx = correlator.register(id.clone(), LONG).unwrap();

    assert!(correlator.cancel(&id));
    assert!(!correlator.cancel(&id));
    assert!(rx.await.is_err(), "receiver must observe a closed channel");
    assert!(!correlator.resolve_incoming(json!({"id": 5, "result": null})));
}

#[tokio::test]
async fn error_response_is_delivered_as_is() {
    let correlator = correlator();
    let rx = correlator.register(MessageId::Number(3), LONG).unwrap();

    let response = json!({
        "jsonrpc": "2.0",
        "id": 3,
        "error": {"code": -32601, "message": "Method not found"}
    });
    assert!(correlator.resolve_incoming(response.clone()));
    assert_eq!(rx.await.unwrap(), Ok(response));
}

#[tokio::test]
async fn dropped_reply_withdraws_its_registration() {
    let correlator = correlator();
    let id = MessageId::String("r".into());

    let abandoned = correlator.register(id.clone(), LONG).unwrap();
    assert!(correlator.is_pending(&id));
    drop(abandoned);
    assert!(!correlator.is_pending(&id), "abandoned id must be released");

    let retry = correlator.register(id.clone(), LONG).expect("id is free again");
    assert!(correlator.resolve_incoming(json!({"id": "r", "result": "ok"})));
    assert_eq!(retry.await.unwrap().unwrap()["result"], "ok");
}

#[tokio::test]
async fn dropping_settled_reply_leaves_reused_id_alone() {
    let correlator = correlator();
    let id = MessageId::Number(9);

    let first = correlator.register(id.clone(), LONG).unwrap();
    assert!(correlator.resolve_incoming(json!({"id": 9, "result": 1})));

    let second = correlator.register(id.clone(), LONG).unwrap();
    drop(first);
    assert!(
        correlator.is_pending(&id),
        "an earlier reply must not withdraw a newer registration"
    );

    assert!(correlator.resolve_incoming(json!({"id": 9, "result": 2})));
    assert_eq!(second.await.unwrap().unwrap()["result"], 2);
}
