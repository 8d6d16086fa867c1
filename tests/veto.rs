//! Veto window integration tests, on a paused clock.
//!
//! The mock messenger issues prompt ids deterministically in delivery
//! order ("p-0", "p-1", ...): candidates outermost, participants in
//! sorted order within each candidate.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use quorum::core::{VetoCoordinator, VetoOutcome};
use quorum::domain::{CancelSignal, CandidateStatus, DecisionCandidate};

use common::MockMessenger;

const WINDOW: Duration = Duration::from_secs(120);

fn participants(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn veto(prompt_id: &str, participant: &str) -> CancelSignal {
    CancelSignal {
        prompt_id: prompt_id.to_string(),
        participant_id: participant.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_all_candidates_confirmed_after_exact_window() {
    let messenger = Arc::new(MockMessenger::default());
    let coordinator = VetoCoordinator::new(messenger.clone(), WINDOW);
    let (_tx, mut rx) = mpsc::channel(8);

    let candidates = vec![
        DecisionCandidate::new("ship the billing migration", "alice"),
        DecisionCandidate::new("move standup to 9am", "bob"),
    ];

    let start = tokio::time::Instant::now();
    let outcome = coordinator
        .run(
            Uuid::new_v4(),
            "standup",
            &participants(&["alice", "bob"]),
            candidates,
            &mut rx,
        )
        .await
        .unwrap();

    // Resolution happens when the timers elapse, not before
    assert_eq!(start.elapsed(), WINDOW);

    match outcome {
        VetoOutcome::Resolved { confirmed, canceled } => {
            assert_eq!(confirmed.len(), 2);
            assert!(canceled.is_empty());
            assert!(confirmed
                .iter()
                .all(|c| c.status == CandidateStatus::Confirmed));
        }
        other => panic!("expected Resolved, got {:?}", other),
    }

    // One prompt per (candidate, participant)
    let sent = messenger.sent_prompts();
    assert_eq!(sent.len(), 4);
    assert!(sent.iter().all(|p| p.participant.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_one_veto_cancels_candidate_for_everyone() {
    let messenger = Arc::new(MockMessenger::default());
    let coordinator = VetoCoordinator::new(messenger, WINDOW);
    let (tx, mut rx) = mpsc::channel(8);

    // Candidate 0 gets p-0/p-1, candidate 1 gets p-2/p-3. Bob vetoes
    // candidate 1 through his own prompt.
    tx.send(veto("p-3", "bob")).await.unwrap();

    let start = tokio::time::Instant::now();
    let outcome = coordinator
        .run(
            Uuid::new_v4(),
            "standup",
            &participants(&["alice", "bob"]),
            vec![
                DecisionCandidate::new("ship the billing migration", "alice"),
                DecisionCandidate::new("move standup to 9am", "bob"),
            ],
            &mut rx,
        )
        .await
        .unwrap();

    // The surviving candidate's timers still run the full window
    assert_eq!(start.elapsed(), WINDOW);

    match outcome {
        VetoOutcome::Resolved { confirmed, canceled } => {
            assert_eq!(confirmed.len(), 1);
            assert_eq!(confirmed[0].text, "ship the billing migration");
            assert_eq!(canceled.len(), 1);
            assert_eq!(canceled[0].text, "move standup to 9am");
            assert_eq!(canceled[0].status, CandidateStatus::Canceled);
        }
        other => panic!("expected Resolved, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_and_unknown_vetoes_are_noops() {
    let messenger = Arc::new(MockMessenger::default());
    let coordinator = VetoCoordinator::new(messenger, WINDOW);
    let (tx, mut rx) = mpsc::channel(8);

    // Both participants veto the same candidate, plus one signal for a
    // prompt that never existed.
    tx.send(veto("p-2", "alice")).await.unwrap();
    tx.send(veto("p-3", "bob")).await.unwrap();
    tx.send(veto("p-99", "mallory")).await.unwrap();

    let outcome = coordinator
        .run(
            Uuid::new_v4(),
            "standup",
            &participants(&["alice", "bob"]),
            vec![
                DecisionCandidate::new("ship the billing migration", "alice"),
                DecisionCandidate::new("move standup to 9am", "bob"),
            ],
            &mut rx,
        )
        .await
        .unwrap();

    match outcome {
        VetoOutcome::Resolved { confirmed, canceled } => {
            // Exactly one cancellation despite two vetoes for it
            assert_eq!(confirmed.len(), 1);
            assert_eq!(canceled.len(), 1);
        }
        other => panic!("expected Resolved, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_zero_candidates_resolve_empty_after_window() {
    let messenger = Arc::new(MockMessenger::default());
    let coordinator = VetoCoordinator::new(messenger.clone(), WINDOW);
    let (_tx, mut rx) = mpsc::channel(8);

    let start = tokio::time::Instant::now();
    let outcome = coordinator
        .run(
            Uuid::new_v4(),
            "standup",
            &participants(&["alice", "bob"]),
            Vec::new(),
            &mut rx,
        )
        .await
        .unwrap();

    assert_eq!(start.elapsed(), WINDOW);
    assert!(matches!(
        outcome,
        VetoOutcome::Resolved { confirmed, canceled } if confirmed.is_empty() && canceled.is_empty()
    ));

    // One "no decision detected" prompt per participant
    assert_eq!(messenger.sent_prompts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_zero_decision_veto_flags_manual_review() {
    let messenger = Arc::new(MockMessenger::default());
    let coordinator = VetoCoordinator::new(messenger, WINDOW);
    let (tx, mut rx) = mpsc::channel(8);

    tx.send(veto("p-0", "alice")).await.unwrap();

    let start = tokio::time::Instant::now();
    let outcome = coordinator
        .run(
            Uuid::new_v4(),
            "standup",
            &participants(&["alice", "bob"]),
            Vec::new(),
            &mut rx,
        )
        .await
        .unwrap();

    assert!(start.elapsed() < WINDOW);
    assert!(matches!(outcome, VetoOutcome::ManualReview));
}

#[tokio::test(start_paused = true)]
async fn test_zero_decision_ignores_unknown_prompts() {
    let messenger = Arc::new(MockMessenger::default());
    let coordinator = VetoCoordinator::new(messenger, WINDOW);
    let (tx, mut rx) = mpsc::channel(8);

    tx.send(veto("p-99", "mallory")).await.unwrap();

    let outcome = coordinator
        .run(
            Uuid::new_v4(),
            "standup",
            &participants(&["alice"]),
            Vec::new(),
            &mut rx,
        )
        .await
        .unwrap();

    assert!(matches!(outcome, VetoOutcome::Resolved { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_denied_direct_delivery_falls_back_to_channel() {
    let messenger = Arc::new(MockMessenger::denying(&["bob"]));
    let coordinator = VetoCoordinator::new(messenger.clone(), WINDOW);
    let (tx, mut rx) = mpsc::channel(8);

    // Alice's DM is p-0; bob's fallback channel mention is p-1. A veto
    // through the fallback prompt works like any other.
    tx.send(veto("p-1", "bob")).await.unwrap();

    let outcome = coordinator
        .run(
            Uuid::new_v4(),
            "standup",
            &participants(&["alice", "bob"]),
            vec![DecisionCandidate::new("ship the billing migration", "alice")],
            &mut rx,
        )
        .await
        .unwrap();

    let sent = messenger.sent_prompts();
    assert_eq!(sent.len(), 2);
    let fallback = sent.iter().find(|p| p.channel.is_some()).unwrap();
    assert_eq!(fallback.channel.as_deref(), Some("standup"));
    assert!(fallback.content.starts_with("@bob "));

    match outcome {
        VetoOutcome::Resolved { confirmed, canceled } => {
            assert!(confirmed.is_empty());
            assert_eq!(canceled.len(), 1);
        }
        other => panic!("expected Resolved, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_delivery_does_not_extend_other_timers() {
    // Bob's DM hangs far past the window; alice's and carol's prompts
    // and the coordinator's resolution are unaffected.
    let messenger = Arc::new(MockMessenger::delaying("bob", Duration::from_secs(300)));
    let coordinator = VetoCoordinator::new(messenger.clone(), WINDOW);
    let (_tx, mut rx) = mpsc::channel(8);

    let start = tokio::time::Instant::now();
    let outcome = coordinator
        .run(
            Uuid::new_v4(),
            "standup",
            &participants(&["alice", "bob", "carol"]),
            vec![DecisionCandidate::new("ship the billing migration", "alice")],
            &mut rx,
        )
        .await
        .unwrap();

    assert_eq!(start.elapsed(), WINDOW);
    match outcome {
        VetoOutcome::Resolved { confirmed, canceled } => {
            assert_eq!(confirmed.len(), 1);
            assert!(canceled.is_empty());
        }
        other => panic!("expected Resolved, got {:?}", other),
    }

    // The hung delivery was abandoned at the deadline
    let sent = messenger.sent_prompts();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|p| p.participant.as_deref() != Some("bob")));
}

#[tokio::test(start_paused = true)]
async fn test_zero_decision_window_unaffected_by_slow_delivery() {
    let messenger = Arc::new(MockMessenger::delaying("bob", Duration::from_secs(300)));
    let coordinator = VetoCoordinator::new(messenger.clone(), WINDOW);
    let (_tx, mut rx) = mpsc::channel(8);

    let start = tokio::time::Instant::now();
    let outcome = coordinator
        .run(
            Uuid::new_v4(),
            "standup",
            &participants(&["alice", "bob"]),
            Vec::new(),
            &mut rx,
        )
        .await
        .unwrap();

    assert_eq!(start.elapsed(), WINDOW);
    assert!(matches!(outcome, VetoOutcome::Resolved { .. }));
    assert_eq!(messenger.sent_prompts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_veto_after_prompt_window_elapsed_is_a_noop() {
    let messenger = Arc::new(MockMessenger::default());
    let coordinator = VetoCoordinator::new(messenger, WINDOW);
    let (tx, mut rx) = mpsc::channel(8);

    let parts = participants(&["alice", "bob"]);
    let candidates = vec![
        DecisionCandidate::new("ship the billing migration", "alice"),
        DecisionCandidate::new("move standup to 9am", "bob"),
    ];
    let handle = tokio::spawn(async move {
        coordinator
            .run(Uuid::new_v4(), "standup", &parts, candidates, &mut rx)
            .await
    });

    // Alice vetoes candidate 1 through her prompt; both of that
    // candidate's timers short-circuit and elapse.
    tx.send(veto("p-2", "alice")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Bob's copy of the same prompt is past its window by now; his late
    // veto changes nothing.
    tx.send(veto("p-3", "bob")).await.unwrap();

    let outcome = handle.await.unwrap().unwrap();
    match outcome {
        VetoOutcome::Resolved { confirmed, canceled } => {
            assert_eq!(confirmed.len(), 1);
            assert_eq!(confirmed[0].text, "ship the billing migration");
            assert_eq!(canceled.len(), 1);
            assert_eq!(canceled[0].text, "move standup to 9am");
        }
        other => panic!("expected Resolved, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_prompt_routing_recorded_on_candidates() {
    let messenger = Arc::new(MockMessenger::default());
    let coordinator = VetoCoordinator::new(messenger, WINDOW);
    let (_tx, mut rx) = mpsc::channel(8);

    let outcome = coordinator
        .run(
            Uuid::new_v4(),
            "standup",
            &participants(&["alice", "bob"]),
            vec![DecisionCandidate::new("ship the billing migration", "alice")],
            &mut rx,
        )
        .await
        .unwrap();

    match outcome {
        VetoOutcome::Resolved { confirmed, .. } => {
            assert_eq!(confirmed[0].prompts.len(), 2);
            assert!(confirmed[0].prompts.contains_key("alice"));
            assert!(confirmed[0].prompts.contains_key("bob"));
        }
        other => panic!("expected Resolved, got {:?}", other),
    }
}
