//! Session workflow and rollout journeys
//!
//! Drives the conversational state machine end-to-end through the session
//! manager, and exercises the rollout gate across a large user population.

use std::sync::Arc;
use std::time::Duration;

use cohort_e2e_tests::fixtures::{self, FixedClusterer};
use cohort_core::{
    AudienceSource, Config, RetrievalService, SearchRouter, SessionError, SessionManager,
    SessionState, SessionStore,
};

fn manager(service: RetrievalService) -> SessionManager {
    SessionManager::new(
        SessionStore::new(Duration::from_secs(1800)),
        Arc::new(service),
        Arc::new(FixedClusterer),
    )
}

fn unified_service() -> RetrievalService {
    let config = Config { use_unified: true, ..Config::default() };
    let snapshot = fixtures::engine(fixtures::reference_variables());
    RetrievalService::new(config, Some(snapshot), None)
}

// ============================================================================
// S4 - SESSION STATE MACHINE JOURNEY
// ============================================================================

#[tokio::test]
async fn s4_full_session_journey() {
    let sessions = manager(unified_service());

    let (id, state) = sessions.create("user-1").await;
    assert_eq!(state, SessionState::AwaitingDataType);

    let state = sessions
        .select_data_type(&id, AudienceSource::FirstParty, "RampID".to_string())
        .await
        .unwrap();
    assert_eq!(state, SessionState::AwaitingQuery);

    let (state, response) = sessions.submit_query(&id, "urban millennials").await.unwrap();
    assert_eq!(state, SessionState::CandidatesPresented);
    assert!(!response.results.is_empty());

    // Confirm one of the presented candidates
    let first = response.results[0].variable.code.clone();
    let state = sessions.confirm_variables(&id, &[first.clone()]).await.unwrap();
    assert_eq!(state, SessionState::VariablesConfirmed);

    // Refine after confirming: permitted, and the confirmed set survives
    let (state, refined) =
        sessions.refine_query(&id, "urban millennials in toronto").await.unwrap();
    assert_eq!(state, SessionState::CandidatesPresented);
    assert!(refined.results.iter().any(|hit| hit.variable.code == first));

    // Confirm an additional candidate; the stored set is the union
    let second = refined
        .results
        .iter()
        .map(|hit| hit.variable.code.clone())
        .find(|code| *code != first)
        .expect("a second candidate");
    let state = sessions.confirm_variables(&id, &[second.clone()]).await.unwrap();
    assert_eq!(state, SessionState::VariablesConfirmed);

    let session = sessions.inspect(&id).await.unwrap();
    assert_eq!(session.confirmed_variables, vec![first.clone(), second.clone()]);

    // Cluster into segments
    let (state, segments) = sessions.compute_segments(&id, Some(2)).await.unwrap();
    assert_eq!(state, SessionState::SegmentsComputed);
    assert_eq!(segments.len(), 2);

    // The data-type choice is now locked in
    let err = sessions
        .select_data_type(&id, AudienceSource::ThirdParty, "panel".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidSessionState { .. }));

    // And the confirmed set is frozen
    let err = sessions.confirm_variables(&id, &[first.clone()]).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidSessionState { .. }));
    let session = sessions.inspect(&id).await.unwrap();
    assert_eq!(session.confirmed_variables, vec![first, second]);
}

#[tokio::test]
async fn s4_accept_then_terminal() {
    let sessions = manager(unified_service());
    let (id, _) = sessions.create("user-2").await;

    sessions
        .select_data_type(&id, AudienceSource::CleanRoom, "habu".to_string())
        .await
        .unwrap();
    let (_, response) = sessions.submit_query(&id, "urban shoppers").await.unwrap();
    let code = response.results[0].variable.code.clone();
    sessions.confirm_variables(&id, &[code]).await.unwrap();
    sessions.compute_segments(&id, None).await.unwrap();

    let state = sessions.accept_segments(&id).await.unwrap();
    assert_eq!(state, SessionState::DistributionReady);

    // Cancel releases the session entirely
    let state = sessions.cancel(&id).await.unwrap();
    assert_eq!(state, SessionState::Terminal);
    assert!(matches!(
        sessions.inspect(&id).await,
        Err(SessionError::UnknownSession(_))
    ));
}

#[tokio::test]
async fn retrieval_failure_leaves_session_state_unchanged() {
    // Service with no catalog: retrieval returns ServiceUnavailable
    let service = RetrievalService::new(Config::default(), None, None);
    let sessions = manager(service);

    let (id, _) = sessions.create("user-3").await;
    sessions
        .select_data_type(&id, AudienceSource::FirstParty, "crm".to_string())
        .await
        .unwrap();

    let err = sessions.submit_query(&id, "urban millennials").await.unwrap_err();
    assert!(matches!(err, SessionError::Retrieval(_)));

    let session = sessions.inspect(&id).await.unwrap();
    assert_eq!(session.state, SessionState::AwaitingQuery);
    assert!(session.candidates.is_empty());
}

#[tokio::test]
async fn confirming_unknown_codes_is_rejected() {
    let sessions = manager(unified_service());
    let (id, _) = sessions.create("user-4").await;

    sessions
        .select_data_type(&id, AudienceSource::FirstParty, "crm".to_string())
        .await
        .unwrap();
    sessions.submit_query(&id, "urban millennials").await.unwrap();

    let err = sessions
        .confirm_variables(&id, &["NOT_A_CANDIDATE".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::UnknownVariables(_)));

    let session = sessions.inspect(&id).await.unwrap();
    assert_eq!(session.state, SessionState::CandidatesPresented);
}

#[tokio::test]
async fn idle_sessions_are_evicted() {
    let store = SessionStore::new(Duration::ZERO);
    let (id, _) = store.create("user-5").await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.evict_idle().await, 1);
    assert!(matches!(store.get(&id).await, Err(SessionError::UnknownSession(_))));
}

// ============================================================================
// S5 - ROUTER ROLLOUT
// ============================================================================

#[test]
fn s5_rollout_share_and_determinism() {
    let router = SearchRouter::new(false, 50);

    let mut unified = 0usize;
    for i in 0..1000 {
        let user = format!("user-{i}");
        let first = router.decide(&user);
        // Same user, same answer, every time
        assert_eq!(router.decide(&user), first);
        if first.unified {
            unified += 1;
        }
    }

    // Aggregate unified share within +-5% of the configured 50%
    assert!(
        (450..=550).contains(&unified),
        "unified share was {unified}/1000"
    );
}

#[test]
fn s5_migration_test_is_a_dry_run() {
    let snapshot = fixtures::engine(fixtures::reference_variables());
    let service = RetrievalService::new(Config::default(), Some(snapshot), None);

    let decision = service.route("user-42");
    assert_eq!(service.route("user-42"), decision);

    // Status echoes the boot configuration
    let status = service.router().status();
    assert!(!status.use_unified);
    assert_eq!(status.rollout_percentage, 0);
}
