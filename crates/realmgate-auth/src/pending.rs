//! Realm-side session-key lookups.
//!
//! A realm cannot verify an [`AuthSession`] on its own: the key lives with
//! the login directory. [`SessionKeyRequester`] records each joining client
//! as a [`PendingAuthRequest`], emits a [`SessionKeyQuery`], and resolves the
//! request when the matching [`SessionKeyReply`] arrives, verifying the
//! client digest against the returned key before handing it out.
//!
//! [`SessionDirectory`] is the directory side: it remembers the key of every
//! authenticated account and answers queries.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use realmgate_net::{
    Completion, ConnectionLossHook, PendingRequests, RequestError, RequestId,
};

use crate::join::{SEED_LEN, verify_join_digest};
use crate::messages::{AuthSession, JoinResult, SessionKeyQuery, SessionKeyReply};
use crate::srp6::{Digest20, SessionKey};

/// A join waiting on the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthRequest {
    pub account: String,
    pub client_seed: [u8; SEED_LEN],
    pub server_seed: [u8; SEED_LEN],
    pub client_proof: Digest20,
}

/// Issues session-key queries and resolves their replies.
#[derive(Default)]
pub struct SessionKeyRequester {
    pending: PendingRequests<PendingAuthRequest, SessionKey>,
}

impl SessionKeyRequester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a join and build the query to send upstream. `completion` runs
    /// exactly once: with the verified key, a rejection, or
    /// [`RequestError::ConnectionLost`].
    pub fn request(
        &self,
        session: &AuthSession,
        server_seed: [u8; SEED_LEN],
        completion: Completion<SessionKey>,
    ) -> SessionKeyQuery {
        let request = PendingAuthRequest {
            account: session.identity.clone(),
            client_seed: session.client_seed,
            server_seed,
            client_proof: session.digest,
        };
        let id = self.pending.insert(request, completion);
        tracing::debug!(%id, account = %session.identity, "Session key requested");
        SessionKeyQuery {
            request_id: id.0,
            identity: session.identity.clone(),
        }
    }

    /// Resolve the request a reply belongs to. Returns `false` for replies
    /// that match nothing outstanding.
    pub fn on_reply(&self, reply: &SessionKeyReply) -> bool {
        let id = RequestId(reply.request_id);
        let Some((request, completion)) = self.pending.take(id) else {
            tracing::debug!(%id, "Session key reply for unknown request");
            return false;
        };

        let result = match (reply.result, reply.key) {
            (JoinResult::Ok, Some(bytes)) => {
                let key = SessionKey::from_bytes(bytes);
                if verify_join_digest(
                    &request.account,
                    &request.client_seed,
                    &request.server_seed,
                    &key,
                    &request.client_proof,
                ) {
                    Ok(key)
                } else {
                    Err(RequestError::Rejected(JoinResult::BadProof.to_string()))
                }
            }
            (result, _) => Err(RequestError::Rejected(result.to_string())),
        };
        if let Err(e) = &result {
            tracing::info!(%id, account = %request.account, "Join refused: {e}");
        }
        completion(result);
        true
    }

    /// Number of joins waiting on the directory.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

impl ConnectionLossHook for SessionKeyRequester {
    fn on_connection_lost(&self) {
        self.pending.on_connection_lost();
    }
}

/// Directory-side registry of authenticated sessions.
#[derive(Debug, Default)]
pub struct SessionDirectory {
    keys: Mutex<HashMap<String, SessionKey>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the key of a freshly authenticated account, replacing any
    /// previous session.
    pub fn insert(&self, identity: &str, key: SessionKey) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.to_ascii_uppercase(), key);
    }

    pub fn get(&self, identity: &str) -> Option<SessionKey> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&identity.to_ascii_uppercase())
            .cloned()
    }

    /// Answer a realm's query.
    pub fn answer(&self, query: &SessionKeyQuery) -> SessionKeyReply {
        match self.get(&query.identity) {
            Some(key) => SessionKeyReply {
                request_id: query.request_id,
                result: JoinResult::Ok,
                key: Some(*key.as_bytes()),
            },
            None => SessionKeyReply {
                request_id: query.request_id,
                result: JoinResult::UnknownAccount,
                key: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::{JoinClient, JoinVerifier};
    use std::sync::Arc;

    type Outcomes = Arc<Mutex<Vec<Result<SessionKey, RequestError>>>>;

    fn recorder(outcomes: &Outcomes) -> Completion<SessionKey> {
        let outcomes = Arc::clone(outcomes);
        Box::new(move |result| outcomes.lock().unwrap().push(result))
    }

    fn joining(identity: &str, key: &SessionKey, verifier: &JoinVerifier) -> AuthSession {
        JoinClient::new(identity, key.clone())
            .on_challenge(&verifier.challenge())
            .unwrap()
    }

    #[test]
    fn test_reply_resolves_with_verified_key() {
        let key = SessionKey::from_bytes([0x42; 40]);
        let directory = SessionDirectory::new();
        directory.insert("alice", key.clone());
        let verifier = JoinVerifier::with_seed([1; SEED_LEN]);

        let requester = SessionKeyRequester::new();
        let outcomes = Outcomes::default();
        let session = joining("alice", &key, &verifier);
        let query = requester.request(&session, *verifier.server_seed(), recorder(&outcomes));
        assert_eq!(requester.outstanding(), 1);

        assert!(requester.on_reply(&directory.answer(&query)));
        assert_eq!(*outcomes.lock().unwrap(), vec![Ok(key)]);
        assert_eq!(requester.outstanding(), 0);
    }

    #[test]
    fn test_stale_key_fails_digest_check() {
        let directory = SessionDirectory::new();
        directory.insert("alice", SessionKey::from_bytes([0x01; 40]));
        let verifier = JoinVerifier::with_seed([1; SEED_LEN]);

        let requester = SessionKeyRequester::new();
        let outcomes = Outcomes::default();
        let session = joining("alice", &SessionKey::from_bytes([0x02; 40]), &verifier);
        let query = requester.request(&session, *verifier.server_seed(), recorder(&outcomes));
        requester.on_reply(&directory.answer(&query));

        let outcomes = outcomes.lock().unwrap();
        assert!(matches!(outcomes.as_slice(), [Err(RequestError::Rejected(_))]));
    }

    #[test]
    fn test_unknown_account_rejected() {
        let directory = SessionDirectory::new();
        let verifier = JoinVerifier::new();
        let requester = SessionKeyRequester::new();
        let outcomes = Outcomes::default();

        let session = joining("ghost", &SessionKey::from_bytes([0; 40]), &verifier);
        let query = requester.request(&session, *verifier.server_seed(), recorder(&outcomes));
        requester.on_reply(&directory.answer(&query));
        assert!(matches!(
            outcomes.lock().unwrap().as_slice(),
            [Err(RequestError::Rejected(_))]
        ));
    }

    #[test]
    fn test_out_of_order_replies_match_by_id() {
        let directory = SessionDirectory::new();
        let alice = SessionKey::from_bytes([0xA1; 40]);
        let bob = SessionKey::from_bytes([0xB0; 40]);
        directory.insert("alice", alice.clone());
        directory.insert("bob", bob.clone());
        let verifier = JoinVerifier::new();

        let requester = SessionKeyRequester::new();
        let alice_out = Outcomes::default();
        let bob_out = Outcomes::default();
        let q_alice = requester.request(
            &joining("alice", &alice, &verifier),
            *verifier.server_seed(),
            recorder(&alice_out),
        );
        let q_bob = requester.request(
            &joining("bob", &bob, &verifier),
            *verifier.server_seed(),
            recorder(&bob_out),
        );

        requester.on_reply(&directory.answer(&q_bob));
        requester.on_reply(&directory.answer(&q_alice));
        assert_eq!(*alice_out.lock().unwrap(), vec![Ok(alice)]);
        assert_eq!(*bob_out.lock().unwrap(), vec![Ok(bob)]);
    }

    #[test]
    fn test_duplicate_reply_ignored() {
        let key = SessionKey::from_bytes([0x42; 40]);
        let directory = SessionDirectory::new();
        directory.insert("alice", key.clone());
        let verifier = JoinVerifier::new();
        let requester = SessionKeyRequester::new();
        let outcomes = Outcomes::default();

        let query = requester.request(
            &joining("alice", &key, &verifier),
            *verifier.server_seed(),
            recorder(&outcomes),
        );
        let reply = directory.answer(&query);
        assert!(requester.on_reply(&reply));
        assert!(!requester.on_reply(&reply));
        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_connection_loss_fails_outstanding_once() {
        let verifier = JoinVerifier::new();
        let requester = SessionKeyRequester::new();
        let outcomes = Outcomes::default();
        for name in ["a", "b", "c"] {
            let session = joining(name, &SessionKey::from_bytes([9; 40]), &verifier);
            requester.request(&session, *verifier.server_seed(), recorder(&outcomes));
        }

        requester.on_connection_lost();
        requester.on_connection_lost();

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(
            outcomes
                .iter()
                .all(|o| *o == Err(RequestError::ConnectionLost))
        );
    }
}
