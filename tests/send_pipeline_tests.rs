// Send pipeline tests
// These drive the optimistic-send state machine over the loopback transport
// under a paused clock, so timer races are exercised deterministically.

mod common;
use common::{canonical, Harness};

use std::time::Duration;

use chatlink::chat::events;
use chatlink::errors::ChatError;
use chatlink::models::{MessageStatus, MessagesMarkedReadPayload};

#[tokio::test(start_paused = true)]
async fn accepted_submit_creates_exactly_one_pending() {
    let harness = Harness::in_conversation("me", "conv-1").await;

    let local_id = harness.client.submit("hello").await.unwrap();

    let messages = harness.client.messages();
    let pending: Vec<_> = messages
        .iter()
        .filter(|m| m.status == MessageStatus::Pending)
        .collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, local_id);
    assert!(pending[0].sender_id.is_empty());
    assert_eq!(harness.transport.sent_count(events::SEND_MESSAGE), 1);
}

#[tokio::test(start_paused = true)]
async fn reconciliation_before_timer_prevents_duplicate_send() {
    let harness = Harness::in_conversation("me", "conv-1").await;

    let local_id = harness.client.submit("hello").await.unwrap();
    assert_eq!(harness.transport.sent_count(events::SEND_MESSAGE), 1);

    // Canonical echo arrives at t=2s, well before the 5s ack timer.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let echo = canonical("srv-1", "conv-1", "me", "hello");
    harness.echo(&echo);

    // Walk past the point the ack timer would have fired.
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(
        harness.transport.sent_count(events::SEND_MESSAGE),
        1,
        "retry timer must not re-publish after reconciliation"
    );

    let messages = harness.client.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "srv-1");
    assert!(
        !messages.iter().any(|m| m.id == local_id),
        "placeholder must be removed, never kept alongside the canonical message"
    );
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_send_retries_three_times_then_escalates() {
    let harness = Harness::in_conversation("me", "conv-1").await;

    let local_id = harness.client.submit("hello").await.unwrap();

    // Initial publish plus retries at t=5s, 10s, 15s; exhaustion at t=20s.
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(harness.transport.sent_count(events::SEND_MESSAGE), 4);

    // Terminal state: placeholder forced to SENT, terminal notice persists.
    let messages = harness.client.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, local_id);
    assert_eq!(messages[0].status, MessageStatus::Sent);
    assert_eq!(
        harness.client.current_notice(),
        Some(ChatError::DeliveryTimeout)
    );

    // No further timers are scheduled once exhausted.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.transport.sent_count(events::SEND_MESSAGE), 4);
    assert_eq!(
        harness.client.current_notice(),
        Some(ChatError::DeliveryTimeout),
        "terminal notices persist until acknowledged"
    );
}

#[tokio::test(start_paused = true)]
async fn oversize_submit_is_rejected_without_insertion_or_publish() {
    let harness = Harness::in_conversation("me", "conv-1").await;

    let oversize = "x".repeat(5001);
    let result = harness.client.submit(&oversize).await;

    assert_eq!(result, Err(ChatError::MessageTooLong { limit: 5000 }));
    assert!(harness.client.messages().is_empty());
    assert_eq!(harness.transport.sent_count(events::SEND_MESSAGE), 0);
}

#[tokio::test(start_paused = true)]
async fn blank_submit_is_rejected() {
    let harness = Harness::in_conversation("me", "conv-1").await;

    assert_eq!(
        harness.client.submit("   ").await,
        Err(ChatError::EmptyMessage)
    );
    assert!(harness.client.messages().is_empty());

    // Transient validation notices auto-clear.
    assert_eq!(
        harness.client.current_notice(),
        Some(ChatError::EmptyMessage)
    );
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(harness.client.current_notice(), None);
}

#[tokio::test(start_paused = true)]
async fn submit_without_conversation_is_rejected() {
    let harness = Harness::connected("me").await;

    assert_eq!(
        harness.client.submit("hello").await,
        Err(ChatError::NoConversation)
    );
}

#[tokio::test(start_paused = true)]
async fn rapid_submits_are_rate_limited() {
    let harness = Harness::in_conversation("me", "conv-1").await;

    harness.client.submit("first").await.unwrap();
    assert_eq!(
        harness.client.submit("second").await,
        Err(ChatError::RateLimited)
    );

    // After the 500ms window the next submit is accepted again.
    tokio::time::sleep(Duration::from_millis(600)).await;
    harness.client.submit("third").await.unwrap();

    assert_eq!(harness.transport.sent_count(events::SEND_MESSAGE), 2);
}

#[tokio::test(start_paused = true)]
async fn disconnected_submit_creates_no_optimistic_entry() {
    let harness = Harness::in_conversation("me", "conv-1").await;
    harness.transport.force_offline();

    assert_eq!(
        harness.client.submit("hello").await,
        Err(ChatError::NotConnected)
    );
    assert!(
        harness.client.messages().is_empty(),
        "connection-rejected submits must not insert a placeholder"
    );
    assert_eq!(harness.transport.sent_count(events::SEND_MESSAGE), 0);
}

#[tokio::test(start_paused = true)]
async fn inbound_read_receipts_mark_messages_read() {
    let harness = Harness::in_conversation("me", "conv-1").await;

    harness.echo(&canonical("srv-1", "conv-1", "me", "one"));
    harness.echo(&canonical("srv-2", "conv-1", "me", "two"));

    let payload = MessagesMarkedReadPayload {
        user_id: "bob".to_string(),
        message_ids: vec!["srv-1".to_string(), "srv-2".to_string()],
    };
    harness.transport.inject(
        events::MESSAGES_MARKED_READ,
        serde_json::to_value(&payload).unwrap(),
    );

    assert!(harness
        .client
        .messages()
        .iter()
        .all(|m| m.status == MessageStatus::Read));
}

#[tokio::test(start_paused = true)]
async fn conversation_switch_cancels_pending_timers() {
    let harness = Harness::in_conversation("me", "conv-1").await;

    harness.client.submit("hello").await.unwrap();
    assert_eq!(harness.transport.sent_count(events::SEND_MESSAGE), 1);

    // Switching conversations tears the pipeline down mid-retry.
    harness.client.open_conversation("conv-2").await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        harness.transport.sent_count(events::SEND_MESSAGE),
        1,
        "no retry may fire after teardown"
    );
}

#[tokio::test(start_paused = true)]
async fn late_echo_for_a_previous_conversation_is_dropped() {
    let harness = Harness::in_conversation("me", "conv-1").await;

    harness.client.submit("hello").await.unwrap();
    harness.client.open_conversation("conv-2").await.unwrap();

    // The echo of the conv-1 send arrives after the switch.
    harness.echo(&canonical("srv-1", "conv-1", "me", "hello"));

    assert!(
        harness.client.messages().is_empty(),
        "messages for an inactive conversation must never enter the window"
    );
}

#[tokio::test(start_paused = true)]
async fn unrelated_inbound_message_does_not_consume_pending() {
    let harness = Harness::in_conversation("me", "conv-1").await;

    let local_id = harness.client.submit("hello").await.unwrap();

    // Different content: a genuinely different message from someone else.
    harness.echo(&canonical("srv-9", "conv-1", "bob", "something else"));

    let messages = harness.client.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().any(|m| m.id == local_id));
    assert!(messages.iter().any(|m| m.id == "srv-9"));
}
