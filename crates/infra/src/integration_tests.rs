//! Integration tests for sessions, CSRF tokens and the sweeper together.
//!
//! Verifies:
//! - Concurrent resolve/touch racing a sweep never loses a live session
//! - Login rotation kills both the old session id and its CSRF token
//! - Expiry is detected lazily even when no sweep has run

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use sentinel_auth::{Role, Subject};
    use sentinel_core::SessionId;

    use crate::csrf::{CsrfError, CsrfGuard};
    use crate::session::{SessionManager, SessionSettings};
    use crate::workers::session_sweeper::SessionSweeper;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn setup(max_lifetime_secs: u64) -> (Arc<SessionManager>, Arc<CsrfGuard>) {
        let settings = SessionSettings::from_secs(60, max_lifetime_secs).unwrap();
        (
            Arc::new(SessionManager::in_memory(settings)),
            Arc::new(CsrfGuard::new()),
        )
    }

    #[test]
    fn concurrent_touches_survive_sweeps() {
        let (sessions, csrf) = setup(100);
        let live: Vec<SessionId> = (0..64).map(|_| sessions.resolve(None, t(0)).session.id).collect();
        let stale: Vec<SessionId> = (0..64).map(|_| sessions.resolve(None, t(-500)).session.id).collect();
        for id in live.iter().chain(&stale) {
            csrf.token_for(id, t(0));
        }

        let barrier = Arc::new(Barrier::new(5));
        let mut workers = Vec::new();
        for w in 0..4 {
            let sessions = Arc::clone(&sessions);
            let live = live.clone();
            let barrier = Arc::clone(&barrier);
            workers.push(thread::spawn(move || {
                barrier.wait();
                for step in 0..50 {
                    for id in &live {
                        let now = t(w * 10 + step);
                        let r = sessions.resolve(Some(id.as_str()), now);
                        assert!(!r.created, "live session lost");
                    }
                }
            }));
        }

        let sweeper = {
            let sessions = Arc::clone(&sessions);
            let csrf = Arc::clone(&csrf);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..20)
                    .map(|_| SessionSweeper::sweep_once(&sessions, &csrf, t(50)).sessions_removed)
                    .sum::<usize>()
            })
        };

        for w in workers {
            w.join().unwrap();
        }
        let removed = sweeper.join().unwrap();

        assert_eq!(removed, stale.len());
        assert_eq!(sessions.len(), live.len());
        for id in &live {
            let s = sessions.get(id).unwrap();
            assert!(s.last_access_at >= s.created_at);
            assert!(csrf.current(id).is_some());
        }
        for id in &stale {
            assert!(csrf.current(id).is_none());
        }
    }

    #[test]
    fn last_access_never_decreases_under_races() {
        let (sessions, _) = setup(3600);
        let id = sessions.resolve(None, t(0)).session.id;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sessions = Arc::clone(&sessions);
                let id = id.clone();
                thread::spawn(move || {
                    // Threads deliberately touch with out-of-order clocks.
                    for k in (0..100).rev() {
                        sessions.touch(&id, t(i * 100 + k));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(sessions.get(&id).unwrap().last_access_at, t(799));
    }

    #[test]
    fn login_rotation_kills_old_id_and_token() {
        let (sessions, csrf) = setup(3600);
        let anon = sessions.resolve(None, t(0)).session.id;
        let stale_token = csrf.token_for(&anon, t(0));

        let subject = Subject::authenticated("alice", vec![Role::new("admin")]);
        let session = sessions.authenticate(&anon, subject, t(1));
        csrf.revoke(&anon);
        let fresh_token = csrf.issue(&session.id, t(1));

        assert!(sessions.resolve(Some(anon.as_str()), t(2)).created);
        assert_eq!(
            csrf.validate("POST", &session.id, Some(stale_token.value())),
            Err(CsrfError::Mismatch)
        );
        assert_eq!(csrf.validate("POST", &session.id, Some(fresh_token.value())), Ok(()));
    }

    #[test]
    fn expiry_is_lazy_without_sweeper() {
        let (sessions, _) = setup(10);
        let id = sessions.resolve(None, t(0)).session.id;
        assert_eq!(sessions.len(), 1);

        let r = sessions.resolve(Some(id.as_str()), t(11));
        assert!(r.created);
        assert_eq!(sessions.len(), 1);
        assert!(sessions.get(&id).is_none());
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let (sessions, _) = setup(3600);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sessions = Arc::clone(&sessions);
                thread::spawn(move || {
                    (0..500)
                        .map(|_| sessions.resolve(None, t(0)).session.id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(sessions.len(), 4000);
    }

    #[test]
    fn lifetime_is_measured_from_last_access() {
        let (sessions, _) = setup(100);
        let id = sessions.resolve(None, t(0)).session.id;
        sessions.touch(&id, t(90));

        let s = sessions.get(&id).unwrap();
        assert_eq!(s.expires_at - s.last_access_at, Duration::seconds(100));
        assert!(sessions.sweep(t(150)).is_empty());
        assert_eq!(sessions.sweep(t(191)), vec![id]);
    }
}
