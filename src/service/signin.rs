//! Sign-in match-check flow
//!
//! Layered on top of authentication: after a successful sign-in, the flow
//! asks the match checker whether the user has new face matches and, if so,
//! triggers a background update. The check is strictly best-effort; sign-in
//! never fails because of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::index::FaceIndex;
use crate::storage::MatchStorage;

use super::match_service::MatchService;
use super::types::{MatchCheckReport, MatchEvent, SignInResult};
use super::updater::{UpdateHandle, UpdateJob};

/// Match-checker collaborator invoked at sign-in.
///
/// Returns the raw response payload; the sign-in flow parses it, so a
/// misbehaving checker cannot take sign-in down with it.
#[async_trait]
pub trait MatchChecker: Send + Sync + 'static {
    async fn invoke(&self, user_id: &str) -> anyhow::Result<Value>;
}

/// Match checker backed by the local match service.
///
/// Skips the index search entirely when the user's matches were refreshed
/// within the re-check interval, and stamps the refresh timestamp as soon
/// as an update is warranted so repeated sign-ins do not re-trigger it.
pub struct SignInChecker<S: MatchStorage, I: FaceIndex> {
    service: Arc<MatchService<S, I>>,
    update_interval: Duration,
}

impl<S: MatchStorage, I: FaceIndex> SignInChecker<S, I> {
    pub fn new(service: Arc<MatchService<S, I>>, update_interval: Duration) -> Self {
        Self {
            service,
            update_interval,
        }
    }
}

#[async_trait]
impl<S: MatchStorage, I: FaceIndex> MatchChecker for SignInChecker<S, I> {
    async fn invoke(&self, user_id: &str) -> anyhow::Result<Value> {
        let profile = self.service.storage().get_user_profile(user_id).await?;
        let last_update = profile.map(|p| p.last_match_update).unwrap_or(0);
        let now = Utc::now().timestamp_millis();
        let elapsed = now.saturating_sub(last_update);

        if elapsed < self.update_interval.as_millis() as i64 {
            info!(
                "User {} matches are up to date (updated {} hours ago)",
                user_id,
                elapsed / 3_600_000
            );
            let report = MatchCheckReport {
                success: true,
                recently_updated: true,
                user_id: Some(user_id.to_string()),
                ..Default::default()
            };
            return Ok(serde_json::to_value(report)?);
        }

        let report = self.service.check_matches(user_id).await?;

        if report.matches_updated {
            // Stamp immediately so concurrent sign-ins do not queue
            // duplicate updates
            if let Err(e) = self.service.storage().set_last_match_update(user_id, now).await {
                warn!(
                    "Failed to update last match timestamp for user {}: {:#}",
                    user_id, e
                );
            }
        }

        Ok(serde_json::to_value(report)?)
    }
}

/// Post-authentication match-check flow
pub struct SignInFlow {
    checker: Arc<dyn MatchChecker>,
    updates: UpdateHandle,
    events: broadcast::Sender<MatchEvent>,
    check_timeout: Duration,
}

impl SignInFlow {
    pub fn new(
        checker: Arc<dyn MatchChecker>,
        updates: UpdateHandle,
        events: broadcast::Sender<MatchEvent>,
        check_timeout: Duration,
    ) -> Self {
        Self {
            checker,
            updates,
            events,
            check_timeout,
        }
    }

    /// Run the match check for a user whose credentials were already
    /// verified. Always resolves; checker failures, timeouts, and malformed
    /// payloads degrade to a failure report or null results.
    pub async fn handle_sign_in(&self, user_id: &str) -> SignInResult {
        let payload = match timeout(self.check_timeout, self.checker.invoke(user_id)).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                // Don't fail sign-in if the match checker fails
                let err = Error::AuxiliaryCheckFailed(e.to_string());
                error!("{}", err);
                json!({
                    "success": false,
                    "error": e.to_string(),
                })
            }
            Err(_) => {
                warn!(
                    "Match checker timed out after {}ms",
                    self.check_timeout.as_millis()
                );
                json!({
                    "success": false,
                    "timedOut": true,
                    "error": format!(
                        "match check timed out after {}ms",
                        self.check_timeout.as_millis()
                    ),
                })
            }
        };

        let results = match serde_json::from_value::<MatchCheckReport>(payload) {
            Ok(results) => Some(results),
            Err(e) => {
                error!("{}", Error::PayloadParse(e));
                None
            }
        };

        if let Some(ref results) = results {
            if results.matches_updated {
                info!("Found new matches for user {}, triggering update", user_id);
                self.updates.enqueue(UpdateJob {
                    user_id: user_id.to_string(),
                });
            }

            let _ = self.events.send(MatchEvent::CheckCompleted {
                user_id: user_id.to_string(),
                results: results.clone(),
            });
        }

        SignInResult {
            user_id: user_id.to_string(),
            match_check_results: results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct StaticChecker(Value);

    #[async_trait]
    impl MatchChecker for StaticChecker {
        async fn invoke(&self, _user_id: &str) -> anyhow::Result<Value> {
            Ok(self.0.clone())
        }
    }

    struct FailingChecker;

    #[async_trait]
    impl MatchChecker for FailingChecker {
        async fn invoke(&self, _user_id: &str) -> anyhow::Result<Value> {
            anyhow::bail!("checker unavailable")
        }
    }

    struct HangingChecker;

    #[async_trait]
    impl MatchChecker for HangingChecker {
        async fn invoke(&self, _user_id: &str) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!({}))
        }
    }

    fn test_flow(checker: Arc<dyn MatchChecker>) -> (SignInFlow, mpsc::Receiver<UpdateJob>) {
        let (tx, rx) = mpsc::channel(8);
        let (events, _) = broadcast::channel(8);
        let flow = SignInFlow::new(
            checker,
            UpdateHandle::for_tests(tx),
            events,
            Duration::from_millis(100),
        );
        (flow, rx)
    }

    #[tokio::test]
    async fn test_signin_survives_checker_failure() {
        let (flow, _rx) = test_flow(Arc::new(FailingChecker));

        let result = flow.handle_sign_in("user-1").await;
        let results = result.match_check_results.unwrap();
        assert!(!results.success);
        assert_eq!(results.error.as_deref(), Some("checker unavailable"));
        assert!(!results.matches_updated);
    }

    #[tokio::test]
    async fn test_signin_null_results_on_malformed_payload() {
        let (flow, _rx) = test_flow(Arc::new(StaticChecker(json!("not an object"))));

        let result = flow.handle_sign_in("user-1").await;
        assert!(result.match_check_results.is_none());
        assert_eq!(result.user_id, "user-1");
    }

    #[tokio::test]
    async fn test_signin_times_out() {
        let (flow, _rx) = test_flow(Arc::new(HangingChecker));

        let result = flow.handle_sign_in("user-1").await;
        let results = result.match_check_results.unwrap();
        assert!(!results.success);
        assert!(results.timed_out);
        assert!(results.error.is_some());
    }

    #[tokio::test]
    async fn test_signin_enqueues_update_when_matches_found() {
        let (flow, mut rx) = test_flow(Arc::new(StaticChecker(json!({
            "success": true,
            "matchesUpdated": true,
            "newMatches": 2,
            "totalMatches": 5,
            "userId": "user-1",
        }))));

        let result = flow.handle_sign_in("user-1").await;
        let results = result.match_check_results.unwrap();
        assert!(results.success);
        assert!(results.matches_updated);

        let job = rx.try_recv().unwrap();
        assert_eq!(job.user_id, "user-1");
    }

    #[tokio::test]
    async fn test_signin_no_update_without_new_matches() {
        let (flow, mut rx) = test_flow(Arc::new(StaticChecker(json!({
            "success": true,
            "matchesUpdated": false,
        }))));

        flow.handle_sign_in("user-1").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signin_emits_check_event() {
        let (tx, _rx) = mpsc::channel(8);
        let (events, mut event_rx) = broadcast::channel(8);
        let flow = SignInFlow::new(
            Arc::new(StaticChecker(json!({"success": true}))),
            UpdateHandle::for_tests(tx),
            events,
            Duration::from_millis(100),
        );

        flow.handle_sign_in("user-1").await;

        match event_rx.try_recv().unwrap() {
            MatchEvent::CheckCompleted { user_id, results } => {
                assert_eq!(user_id, "user-1");
                assert!(results.success);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_payload_parses_with_defaults() {
        let (flow, _rx) = test_flow(Arc::new(StaticChecker(json!({
            "success": true,
            "noFaceRegistered": true,
        }))));

        let result = flow.handle_sign_in("user-1").await;
        let results = result.match_check_results.unwrap();
        assert!(results.success);
        assert!(results.no_face_registered);
        assert!(!results.matches_updated);
        assert_eq!(results.total_matches, 0);
    }
}
