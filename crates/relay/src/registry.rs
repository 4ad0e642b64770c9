//! In-memory registry: agents, pairing codes, and sessions.
//!
//! Every lookup table lives behind one mutex, so the multi-table
//! operations (register, pair, invalidate) are atomic with respect to each
//! other. No await point is ever reached while the lock is held; all
//! socket I/O happens through [`PeerSender`] try-sends or after the lock
//! is released.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::Rng;

use claude_mobile_protocol::constants::PAIRING_CODE_LEN;

use crate::peer::PeerSender;

/// One registered agent. Retained across socket drops so the pairing code
/// survives brief agent outages.
#[derive(Debug)]
struct AgentEntry {
    socket: Option<PeerSender>,
    pairing_code: String,
    connected_at: DateTime<Utc>,
}

/// One mobile-agent binding, keyed by session token.
#[derive(Debug)]
struct Session {
    agent_identity: String,
    pairing_code: String,
    mobile: Option<PeerSender>,
}

#[derive(Default)]
struct Tables {
    /// AgentIdentity → entry (which carries the inverse identity → code).
    agents: HashMap<String, AgentEntry>,
    /// PairingCode → AgentIdentity.
    codes: HashMap<String, String>,
    /// SessionToken → session (carries token → identity/code/socket).
    sessions: HashMap<String, Session>,
}

/// Result of an agent registration.
pub struct Registration {
    /// The code to advertise: fresh on first registration, otherwise the
    /// code the identity already holds.
    pub pairing_code: String,
    /// Socket displaced by this registration, if any. The caller closes it.
    pub displaced: Option<PeerSender>,
}

/// Result of a pairing invalidation.
pub struct Invalidation {
    /// Live agent socket and the rotated code to push to it. `None` when
    /// the agent was absent, in which case its entry was destroyed.
    pub rotated: Option<(PeerSender, String)>,
    /// Live mobile sockets of every other session revoked alongside the
    /// invalidating one. The caller closes them.
    pub revoked_mobiles: Vec<PeerSender>,
}

/// The relay's lookup tables.
#[derive(Default)]
pub struct Registry {
    tables: Mutex<Tables>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent socket under an identity.
    ///
    /// First registration mints a pairing code; later ones reuse the
    /// stored code unchanged. The previous socket pointer, if any, is
    /// displaced and returned for closing.
    pub fn register_agent(&self, identity: &str, socket: PeerSender) -> Registration {
        let mut t = self.tables.lock().unwrap();

        if let Some(entry) = t.agents.get_mut(identity) {
            let displaced = entry.socket.replace(socket);
            entry.connected_at = Utc::now();
            return Registration {
                pairing_code: entry.pairing_code.clone(),
                displaced,
            };
        }

        let code = mint_code(&t.codes);
        t.codes.insert(code.clone(), identity.to_string());
        t.agents.insert(
            identity.to_string(),
            AgentEntry {
                socket: Some(socket),
                pairing_code: code.clone(),
                connected_at: Utc::now(),
            },
        );
        Registration {
            pairing_code: code,
            displaced: None,
        }
    }

    /// Clears the agent socket pointer, keeping the entry and its code.
    ///
    /// No-op unless the stored socket is the one identified by `conn_id`;
    /// a displaced socket's late disconnect must not detach its
    /// replacement.
    pub fn detach_agent(&self, identity: &str, conn_id: u64) {
        let mut t = self.tables.lock().unwrap();
        if let Some(entry) = t.agents.get_mut(identity)
            && entry.socket.as_ref().is_some_and(|s| s.conn_id() == conn_id)
        {
            entry.socket = None;
            let connected_for = Utc::now().signed_duration_since(entry.connected_at);
            tracing::debug!(
                agent = %identity,
                connected_secs = connected_for.num_seconds(),
                "agent socket detached"
            );
        }
    }

    /// Redeems a pairing code, minting a fresh session token.
    ///
    /// The code stays valid: successive redemptions each get their own
    /// token. Returns `None` for an unknown code.
    pub fn redeem_code(&self, code: &str, mobile: PeerSender) -> Option<String> {
        let mut t = self.tables.lock().unwrap();
        let identity = t.codes.get(code)?.clone();
        let token = uuid::Uuid::new_v4().to_string();
        t.sessions.insert(
            token.clone(),
            Session {
                agent_identity: identity,
                pairing_code: code.to_string(),
                mobile: Some(mobile),
            },
        );
        Some(token)
    }

    /// Re-attaches a returning mobile to its session. Returns `false` when
    /// the token no longer resolves.
    pub fn attach_mobile(&self, token: &str, mobile: PeerSender) -> bool {
        let mut t = self.tables.lock().unwrap();
        match t.sessions.get_mut(token) {
            Some(session) => {
                session.mobile = Some(mobile);
                true
            }
            None => false,
        }
    }

    /// Clears the mobile socket pointer of a session, keeping the session.
    pub fn detach_mobile(&self, token: &str, conn_id: u64) {
        let mut t = self.tables.lock().unwrap();
        if let Some(session) = t.sessions.get_mut(token)
            && session.mobile.as_ref().is_some_and(|s| s.conn_id() == conn_id)
        {
            session.mobile = None;
        }
    }

    /// Live agent socket for a session token, if both exist.
    pub fn agent_for_session(&self, token: &str) -> Option<PeerSender> {
        let t = self.tables.lock().unwrap();
        let session = t.sessions.get(token)?;
        t.agents.get(&session.agent_identity)?.socket.clone()
    }

    /// Live mobile socket bound to a session token, provided the session
    /// belongs to `agent_identity`. Frames for someone else's session are
    /// not routable.
    pub fn mobile_for_session(&self, token: &str, agent_identity: &str) -> Option<PeerSender> {
        let t = self.tables.lock().unwrap();
        let session = t.sessions.get(token)?;
        if session.agent_identity != agent_identity {
            return None;
        }
        session.mobile.clone()
    }

    /// Invalidates the pairing behind a session.
    ///
    /// Destroys every session derived from the originating code, removes
    /// the code itself, and either rotates the agent's code (agent live)
    /// or destroys the agent entry (agent absent). Returns `None` for an
    /// unknown token.
    pub fn invalidate(&self, token: &str) -> Option<Invalidation> {
        let mut guard = self.tables.lock().unwrap();
        let t = &mut *guard;
        let session = t.sessions.remove(token)?;
        let code = session.pairing_code;
        let identity = session.agent_identity;

        // Every sibling session from the same code dies with it.
        let revoked: Vec<String> = t
            .sessions
            .iter()
            .filter(|(_, s)| s.pairing_code == code)
            .map(|(tok, _)| tok.clone())
            .collect();
        let mut revoked_mobiles = Vec::new();
        for tok in revoked {
            if let Some(s) = t.sessions.remove(&tok)
                && let Some(mobile) = s.mobile
            {
                revoked_mobiles.push(mobile);
            }
        }

        t.codes.remove(&code);

        // Live agent: rotate its code in place. Absent agent: the entry
        // dies with the code and a reconnect starts from scratch.
        let rotated = match t.agents.remove(&identity) {
            Some(mut entry) if entry.socket.is_some() => {
                let new_code = mint_code(&t.codes);
                entry.pairing_code = new_code.clone();
                let socket = entry.socket.clone();
                t.codes.insert(new_code.clone(), identity.clone());
                t.agents.insert(identity.clone(), entry);
                socket.map(|s| (s, new_code))
            }
            _ => None,
        };

        Some(Invalidation {
            rotated,
            revoked_mobiles,
        })
    }

    /// The code currently assigned to an identity (test and log support).
    pub fn pairing_code_of(&self, identity: &str) -> Option<String> {
        let t = self.tables.lock().unwrap();
        t.agents.get(identity).map(|e| e.pairing_code.clone())
    }

    /// The identity a session token is bound to.
    pub fn agent_identity_of(&self, token: &str) -> Option<String> {
        let t = self.tables.lock().unwrap();
        t.sessions.get(token).map(|s| s.agent_identity.clone())
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.tables.lock().unwrap().sessions.len()
    }
}

/// Draws a uniformly random six-digit code not currently live.
fn mint_code(live: &HashMap<String, String>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let code = format!("{:0width$}", rng.gen_range(0..1_000_000u32), width = PAIRING_CODE_LEN);
        if !live.contains_key(&code) {
            return code;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn peer() -> (PeerSender, mpsc::Receiver<tokio_tungstenite::tungstenite::Message>) {
        let (tx, rx) = mpsc::channel(16);
        (PeerSender::new(tx), rx)
    }

    #[test]
    fn register_mints_six_digit_code() {
        let registry = Registry::new();
        let (socket, _rx) = peer();
        let reg = registry.register_agent("A1", socket);
        assert_eq!(reg.pairing_code.len(), 6);
        assert!(reg.pairing_code.chars().all(|c| c.is_ascii_digit()));
        assert!(reg.displaced.is_none());
    }

    #[test]
    fn code_is_stable_across_reconnects() {
        let registry = Registry::new();
        let (s1, _r1) = peer();
        let first = registry.register_agent("A1", s1);

        let (s2, _r2) = peer();
        let second = registry.register_agent("A1", s2);
        assert_eq!(first.pairing_code, second.pairing_code);
        assert!(second.displaced.is_some(), "old socket should be displaced");
    }

    #[test]
    fn redeem_known_code_mints_uuid_token() {
        let registry = Registry::new();
        let (agent, _ar) = peer();
        let code = registry.register_agent("A1", agent).pairing_code;

        let (mobile, _mr) = peer();
        let token = registry.redeem_code(&code, mobile).unwrap();
        assert!(uuid::Uuid::parse_str(&token).is_ok());
        assert_eq!(registry.agent_identity_of(&token).as_deref(), Some("A1"));
    }

    #[test]
    fn redeem_unknown_code_fails() {
        let registry = Registry::new();
        let (mobile, _mr) = peer();
        assert!(registry.redeem_code("000000", mobile).is_none());
    }

    #[test]
    fn code_is_multi_use_with_distinct_tokens() {
        let registry = Registry::new();
        let (agent, _ar) = peer();
        let code = registry.register_agent("A1", agent).pairing_code;

        let (m1, _r1) = peer();
        let (m2, _r2) = peer();
        let t1 = registry.redeem_code(&code, m1).unwrap();
        let t2 = registry.redeem_code(&code, m2).unwrap();
        assert_ne!(t1, t2);
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn session_survives_mobile_detach() {
        let registry = Registry::new();
        let (agent, _ar) = peer();
        let code = registry.register_agent("A1", agent).pairing_code;

        let (mobile, _mr) = peer();
        let conn_id = mobile.conn_id();
        let token = registry.redeem_code(&code, mobile).unwrap();

        registry.detach_mobile(&token, conn_id);
        assert_eq!(registry.session_count(), 1);
        assert!(registry.mobile_for_session(&token, "A1").is_none());

        let (back, _br) = peer();
        assert!(registry.attach_mobile(&token, back));
        assert!(registry.mobile_for_session(&token, "A1").is_some());
    }

    #[test]
    fn attach_unknown_token_fails() {
        let registry = Registry::new();
        let (mobile, _mr) = peer();
        assert!(!registry.attach_mobile("not-a-token", mobile));
    }

    #[test]
    fn detach_agent_ignores_stale_conn_id() {
        let registry = Registry::new();
        let (s1, _r1) = peer();
        let old_id = s1.conn_id();
        registry.register_agent("A1", s1);

        let (s2, _r2) = peer();
        registry.register_agent("A1", s2);

        // Late disconnect of the displaced socket must not clear the new one.
        registry.detach_agent("A1", old_id);

        let (mobile, _mr) = peer();
        let code = registry.pairing_code_of("A1").unwrap();
        let token = registry.redeem_code(&code, mobile).unwrap();
        assert!(registry.agent_for_session(&token).is_some());
    }

    #[test]
    fn routing_requires_matching_agent_identity() {
        let registry = Registry::new();
        let (a1, _r1) = peer();
        let (a2, _r2) = peer();
        let code = registry.register_agent("A1", a1).pairing_code;
        registry.register_agent("A2", a2);

        let (mobile, _mr) = peer();
        let token = registry.redeem_code(&code, mobile).unwrap();

        assert!(registry.mobile_for_session(&token, "A1").is_some());
        // A2 cannot route into A1's session.
        assert!(registry.mobile_for_session(&token, "A2").is_none());
    }

    #[test]
    fn invalidate_rotates_code_for_live_agent() {
        let registry = Registry::new();
        let (agent, _ar) = peer();
        let old_code = registry.register_agent("A1", agent).pairing_code;

        let (mobile, _mr) = peer();
        let token = registry.redeem_code(&old_code, mobile).unwrap();

        let outcome = registry.invalidate(&token).unwrap();
        let (_, new_code) = outcome.rotated.expect("agent is live, code must rotate");
        assert_ne!(new_code, old_code);
        assert_eq!(registry.pairing_code_of("A1").unwrap(), new_code);

        // Old code is dead, new code redeems.
        let (m2, _r2) = peer();
        assert!(registry.redeem_code(&old_code, m2).is_none());
        let (m3, _r3) = peer();
        assert!(registry.redeem_code(&new_code, m3).is_some());
    }

    #[test]
    fn invalidate_revokes_sibling_sessions() {
        let registry = Registry::new();
        let (agent, _ar) = peer();
        let code = registry.register_agent("A1", agent).pairing_code;

        let (m1, _r1) = peer();
        let (m2, _r2) = peer();
        let t1 = registry.redeem_code(&code, m1).unwrap();
        let t2 = registry.redeem_code(&code, m2).unwrap();

        let outcome = registry.invalidate(&t1).unwrap();
        assert_eq!(outcome.revoked_mobiles.len(), 1);
        assert_eq!(registry.session_count(), 0);
        assert!(registry.agent_identity_of(&t2).is_none());
    }

    #[test]
    fn invalidate_with_absent_agent_destroys_entry() {
        let registry = Registry::new();
        let (agent, _ar) = peer();
        let agent_id = agent.conn_id();
        let code = registry.register_agent("A1", agent).pairing_code;

        let (mobile, _mr) = peer();
        let token = registry.redeem_code(&code, mobile).unwrap();

        registry.detach_agent("A1", agent_id);
        let outcome = registry.invalidate(&token).unwrap();
        assert!(outcome.rotated.is_none());
        assert!(registry.pairing_code_of("A1").is_none());
    }

    #[test]
    fn invalidate_unknown_token_is_none() {
        let registry = Registry::new();
        assert!(registry.invalidate("nope").is_none());
    }

    #[test]
    fn tokens_unique_across_lifetime() {
        let registry = Registry::new();
        let (agent, _ar) = peer();
        let code = registry.register_agent("A1", agent).pairing_code;

        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let (m, _r) = peer();
            let token = registry.redeem_code(&code, m).unwrap();
            assert!(seen.insert(token));
        }
    }
}
