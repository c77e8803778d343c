use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use foundation_urlsession::{
    AuthChallenge, ChallengeDisposition, ChallengeResolution, Completion, Credential, SessionTask,
};

use super::hooks::ChallengeHook;

/// Shared retry budget for credential challenges.
///
/// Owned by the scenario and captured by [`credential_retry_hook`], so the
/// scenario can inspect how many tries remain once the task settled.
#[derive(Debug)]
pub struct AuthRetry {
    remaining: AtomicUsize,
    challenges: AtomicUsize,
}

impl AuthRetry {
    #[must_use]
    pub fn new(tries: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(tries),
            challenges: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Challenges answered so far.
    #[must_use]
    pub fn challenges(&self) -> usize {
        self.challenges.load(Ordering::SeqCst)
    }

    /// Decrements while more than one try remains; returns whether it did.
    fn spend(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                (remaining > 1).then(|| remaining - 1)
            })
            .is_ok()
    }
}

/// Answers challenges with `wrong` while more than one try remains, then with `right`.
#[must_use]
pub fn credential_retry_hook(
    retry: Arc<AuthRetry>,
    wrong: Credential,
    right: Credential,
) -> ChallengeHook {
    Arc::new(
        move |_task: &SessionTask,
              challenge: &AuthChallenge,
              completion: Completion<ChallengeResolution>| {
            retry.challenges.fetch_add(1, Ordering::SeqCst);

            let credential = if retry.spend() {
                wrong.clone()
            } else {
                right.clone()
            };
            tracing::debug!(
                "Answering challenge #{} ({} previous failures) for {}",
                retry.challenges(),
                challenge.previous_failure_count,
                credential.user
            );
            completion.complete((ChallengeDisposition::UseCredential, Some(credential)));
        },
    )
}
