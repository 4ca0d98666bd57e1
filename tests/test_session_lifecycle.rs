/// Session lifecycle integration tests
///
/// Exercises the registry the way a request handler would: start, turns, end.
use simpatient::config::{Config, DialogMode};
use simpatient::dialog::{ReplyKind, Script};
use simpatient::embedding::HashingEmbedder;
use simpatient::scoring::Rubric;
use simpatient::session::{ConversationId, SessionRegistry};
use simpatient::SimPatientError;
use std::sync::Arc;

fn registry_with(mode: DialogMode) -> Arc<SessionRegistry> {
    let mut config = Config::default();
    config.dialog.mode = mode;
    let provider = Arc::new(HashingEmbedder::new(config.embedding.dimension).unwrap());
    Arc::new(SessionRegistry::from_config(provider, &config).unwrap())
}

fn scenario_script() -> Script {
    Script::from_json(r#"[{"q":"How are you?","a":"I feel fine."}]"#).unwrap()
}

fn scenario_rubric() -> Rubric {
    Rubric::from_json(r#"[{"reference_text":"I feel fine","label":"wellbeing","score":10}]"#)
        .unwrap()
}

fn clinic_script() -> Script {
    Script::from_json(
        r#"[
            {"question": "What brings you in today?", "answer": "I have had a headache for three days."},
            {"question": "Where exactly is the headache?", "answer": "Mostly behind my eyes."},
            {"question": "Are you taking any medication?", "answer": "Just some ibuprofen."},
            {"question": "Do you have any allergies?", "answer": "I'm allergic to penicillin."}
        ]"#,
    )
    .unwrap()
}

fn clinic_rubric() -> Rubric {
    Rubric::from_json(
        r#"[
            {"reference_text": "What brings you in today", "label": "chief complaint", "score": 5},
            {"reference_text": "Do you have any allergies", "label": "allergies", "score": 3},
            {"reference_text": "Are you taking any medication", "label": "medication", "score": 4}
        ]"#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_scenario_fine_patient() {
    let registry = registry_with(DialogMode::Retrieval);
    let id = ConversationId::new();

    let opening = registry
        .start(id, scenario_script(), scenario_rubric())
        .await
        .unwrap();
    assert_eq!(opening, "I feel fine.");

    // Rubric match: the answer text equals the reference text.
    let turn = registry.turn(id, "I feel fine").await.unwrap();
    assert!(turn.similarity > 0.99);
    assert_eq!(turn.score, 10.0);
    assert_eq!(turn.matched_criterion.as_deref(), Some("wellbeing"));
    // Retrieval matches questions, not rubric text.
    assert_eq!(turn.reply_kind, ReplyKind::Clarification);

    // A near-duplicate of the scripted question gets the scripted answer.
    let turn = registry.turn(id, "how are you").await.unwrap();
    assert_eq!(turn.next_utterance, "I feel fine.");
    assert_eq!(turn.reply_kind, ReplyKind::Scripted);
}

#[tokio::test]
async fn test_nonsense_answer_end_to_end() {
    let registry = registry_with(DialogMode::Retrieval);
    let id = ConversationId::new();
    registry
        .start(id, scenario_script(), scenario_rubric())
        .await
        .unwrap();

    let turn = registry.turn(id, "zxqv blorp wibble").await.unwrap();
    assert_eq!(turn.score, 0.0);
    assert!(turn.matched_criterion.is_none());
    assert_eq!(turn.reply_kind, ReplyKind::Clarification);

    let summary = registry.end(id).await.unwrap();
    assert_eq!(summary.turns, 1);
    assert_eq!(summary.average_score, 0.0);

    let err = registry.get(id).await.unwrap_err();
    assert!(matches!(err, SimPatientError::SessionExpired { .. }));
}

#[tokio::test]
async fn test_end_is_idempotent() {
    let registry = registry_with(DialogMode::Retrieval);
    let id = ConversationId::new();
    registry
        .start(id, scenario_script(), scenario_rubric())
        .await
        .unwrap();

    assert!(registry.end(id).await.is_some());
    assert!(registry.end(id).await.is_none());
    assert!(registry.end(ConversationId::new()).await.is_none());
    assert_eq!(registry.active_count().await, 0);
}

#[tokio::test]
async fn test_turns_rejected_outside_active_state() {
    let registry = registry_with(DialogMode::Retrieval);
    let id = ConversationId::new();

    let err = registry.turn(id, "hello").await.unwrap_err();
    assert!(matches!(err, SimPatientError::SessionExpired { .. }));
    assert!(err.user_message().contains("start a new conversation"));

    registry
        .start(id, scenario_script(), scenario_rubric())
        .await
        .unwrap();
    registry.end(id).await;

    let err = registry.turn(id, "hello").await.unwrap_err();
    assert!(matches!(err, SimPatientError::SessionExpired { .. }));
}

#[tokio::test]
async fn test_average_over_several_turns() {
    let registry = registry_with(DialogMode::Retrieval);
    let id = ConversationId::new();
    registry.start(id, clinic_script(), clinic_rubric()).await.unwrap();

    let first = registry.turn(id, "What brings you in today?").await.unwrap();
    assert_eq!(first.score, 5.0);
    assert_eq!(first.next_utterance, "I have had a headache for three days.");

    let second = registry.turn(id, "Do you have any allergies?").await.unwrap();
    assert_eq!(second.score, 3.0);
    assert_eq!(second.next_utterance, "I'm allergic to penicillin.");

    let third = registry.turn(id, "purple monkey dishwasher").await.unwrap();
    assert_eq!(third.score, 0.0);

    let summary = registry.end(id).await.unwrap();
    assert_eq!(summary.turns, 3);
    assert_eq!(summary.total_score, 8.0);
    assert!((summary.average_score - 8.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let registry = registry_with(DialogMode::Sequential);
    let a = ConversationId::new();
    let b = ConversationId::new();

    registry.start(a, clinic_script(), clinic_rubric()).await.unwrap();
    registry.start(b, clinic_script(), clinic_rubric()).await.unwrap();

    registry.turn(a, "first").await.unwrap();
    registry.turn(a, "second").await.unwrap();

    assert_eq!(registry.get(a).await.unwrap().cursor().await, 3);
    assert_eq!(registry.get(b).await.unwrap().cursor().await, 1);

    registry.end(a).await;
    assert!(registry.is_active(b).await);
}

#[tokio::test]
async fn test_concurrent_turns_do_not_corrupt_cursor() {
    let registry = registry_with(DialogMode::Sequential);
    let id = ConversationId::new();
    registry.start(id, clinic_script(), clinic_rubric()).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.turn(id, &format!("duplicate {}", i)).await })
        })
        .collect();

    let mut scripted = 0;
    for handle in handles {
        let turn = handle.await.unwrap().unwrap();
        if turn.reply_kind == ReplyKind::Scripted {
            scripted += 1;
        }
    }

    // Opening consumed entry 0; exactly the remaining three are handed out.
    assert_eq!(scripted, 3);
    let session = registry.get(id).await.unwrap();
    assert_eq!(session.cursor().await, 4);
    assert_eq!(session.turn_count().await, 16);
}

#[tokio::test]
async fn test_concurrent_start_admits_one() {
    let registry = registry_with(DialogMode::Retrieval);
    let id = ConversationId::new();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.start(id, clinic_script(), clinic_rubric()).await })
        })
        .collect();

    let mut started = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => started += 1,
            Err(e) => assert!(matches!(e, SimPatientError::DuplicateSession { .. })),
        }
    }

    assert_eq!(started, 1);
    assert_eq!(registry.active_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_start_and_end_leave_no_half_session() {
    let registry = registry_with(DialogMode::Retrieval);

    for _ in 0..20 {
        let id = ConversationId::new();
        let starter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.start(id, clinic_script(), clinic_rubric()).await })
        };
        let ender = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.end(id).await })
        };

        let started = starter.await.unwrap();
        ender.await.unwrap();

        // Either the session survived the race intact or it is gone for good.
        match started {
            Ok(_) => {
                if registry.is_active(id).await {
                    assert!(registry.turn(id, "Do you have any allergies?").await.is_ok());
                    assert!(registry.end(id).await.is_some());
                }
            }
            Err(e) => assert!(matches!(e, SimPatientError::SessionExpired { .. })),
        }

        // Every interleaving ends with the id retired.
        assert!(!registry.is_active(id).await);
        let restart = registry.start(id, clinic_script(), clinic_rubric()).await;
        assert!(matches!(
            restart,
            Err(SimPatientError::DuplicateSession { .. })
        ));
    }
}
