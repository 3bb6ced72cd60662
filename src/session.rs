//! Session/Membership Resolver: answers "who is using this client, on
//! behalf of which household", caches the answer, and keeps the persisted
//! mirror in lockstep with the in-memory view.

use std::sync::{Arc, Mutex, Weak};

use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::household::{self, CurrentHousehold, Household, Role};
use crate::identity::{Account, AuthEvent, Identity};
use crate::mirror::StoreHandle;

/// Where gate failures send the user. The original redirected to the login
/// page; tests inject a recorder.
pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self);
}

pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn redirect_to_login(&self) {}
}

/// Identity of the acting member, handed to ledger and settlement
/// operations once the gates have passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub account_id: String,
    pub household_id: String,
    pub role: Role,
}

#[derive(Default)]
struct SessionState {
    account: Option<Account>,
    membership: Option<CurrentHousehold>,
}

struct Inner {
    pool: SqlitePool,
    identity: Identity,
    mirror: StoreHandle,
    navigator: Arc<dyn Navigator>,
    state: Mutex<SessionState>,
    init: OnceCell<bool>,
}

#[derive(Clone)]
pub struct Resolver {
    inner: Arc<Inner>,
}

impl Resolver {
    pub fn new(pool: SqlitePool, identity: Identity, mirror: StoreHandle) -> Self {
        Self::with_navigator(pool, identity, mirror, Arc::new(NoopNavigator))
    }

    pub fn with_navigator(
        pool: SqlitePool,
        identity: Identity,
        mirror: StoreHandle,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                identity,
                mirror,
                navigator,
                state: Mutex::new(SessionState::default()),
                init: OnceCell::new(),
            }),
        }
    }

    /// Idempotent startup: the first call does the work, every later call
    /// awaits the same outcome. Returns whether the backend was reachable;
    /// on `false` the resolver stays in its terminal uninitialized state
    /// and every identity query reports "no session".
    pub async fn initialize(&self) -> bool {
        *self
            .inner
            .init
            .get_or_init(|| async {
                if let Err(err) = self.inner.identity.ready().await {
                    warn!(
                        target: "messmate",
                        event = "resolver_init_degraded",
                        error = %err
                    );
                    return false;
                }
                if let Some(session) = self.inner.identity.session() {
                    if let Err(err) = Inner::resolve(&self.inner, &session.account_id).await {
                        warn!(
                            target: "messmate",
                            event = "resolver_session_resolve_failed",
                            error = %err
                        );
                    }
                }
                Inner::spawn_listener(&self.inner, self.inner.identity.subscribe());
                info!(target: "messmate", event = "resolver_ready");
                true
            })
            .await
    }

    pub fn current_account(&self) -> Option<Account> {
        self.inner
            .state
            .lock()
            .ok()
            .and_then(|guard| guard.account.clone())
    }

    /// In-memory value, falling back to the persisted mirror for the
    /// window before `initialize()` completes. The mirror is a hint; a
    /// caller needing a verified value awaits `initialize()` first.
    pub fn current_membership(&self) -> Option<CurrentHousehold> {
        if let Ok(guard) = self.inner.state.lock() {
            if let Some(current) = guard.membership.clone() {
                return Some(current);
            }
        }
        self.inner.mirror.snapshot()
    }

    /// Gate: authenticated session present. Redirects on failure only.
    pub fn require_session(&self) -> bool {
        if self.current_account().is_some() {
            return true;
        }
        self.inner.navigator.redirect_to_login();
        false
    }

    /// Gate: authenticated session plus a current household.
    pub fn require_session_and_membership(&self) -> bool {
        if self.current_account().is_some() && self.current_membership().is_some() {
            return true;
        }
        self.inner.navigator.redirect_to_login();
        false
    }

    /// Acting identity for ledger and settlement operations.
    pub fn caller(&self) -> Result<Caller> {
        let account = self.current_account().ok_or(Error::Authentication)?;
        let membership = self.current_membership().ok_or(Error::NotFound {
            entity: "membership",
        })?;
        Ok(Caller {
            account_id: account.id,
            household_id: membership.household_id,
            role: membership.role,
        })
    }

    pub async fn create_household(&self, name: &str, secret: &str) -> Result<Household> {
        let account = self.current_account().ok_or(Error::Authentication)?;
        let (created, membership) =
            household::create_household(&self.inner.pool, &account.id, name, secret).await?;
        self.inner.set_current(CurrentHousehold {
            household_id: created.id.clone(),
            household_name: created.name.clone(),
            role: membership.role,
        });
        Ok(created)
    }

    pub async fn join_household(&self, name: &str, secret: &str) -> Result<Household> {
        let account = self.current_account().ok_or(Error::Authentication)?;
        let (joined, membership) =
            household::join_household(&self.inner.pool, &account.id, name, secret).await?;
        self.inner.set_current(CurrentHousehold {
            household_id: joined.id.clone(),
            household_name: joined.name.clone(),
            role: membership.role,
        });
        Ok(joined)
    }

    /// Re-resolve from the live backend session right now, instead of
    /// waiting for the auth-event listener. For callers that need the
    /// fresh value on the next line.
    pub async fn refresh(&self) -> Result<()> {
        match self.inner.identity.session() {
            Some(session) => Inner::resolve(&self.inner, &session.account_id).await,
            None => {
                self.inner.clear();
                Ok(())
            }
        }
    }

    /// Local state and the mirror are cleared unconditionally; a backend
    /// sign-out failure is reported but never leaves a lingering local
    /// session.
    pub async fn sign_out(&self) -> Result<()> {
        let backend = self.inner.identity.sign_out().await;
        self.inner.clear();
        if let Err(ref err) = backend {
            warn!(
                target: "messmate",
                event = "sign_out_backend_failed",
                error = %err
            );
        }
        backend
    }
}

impl Inner {
    /// Resolve account + membership for a live session and publish both
    /// views (memory and mirror) under one lock.
    async fn resolve(inner: &Arc<Inner>, account_id: &str) -> Result<()> {
        let account = inner.identity.account(account_id).await?;
        let membership = household::current_membership_for(&inner.pool, account_id).await?;
        if let Ok(mut guard) = inner.state.lock() {
            guard.account = Some(account);
            guard.membership = membership.clone();
            match &membership {
                Some(current) => inner.mirror.write(current),
                None => inner.mirror.clear(),
            }
        }
        Ok(())
    }

    fn set_current(&self, current: CurrentHousehold) {
        if let Ok(mut guard) = self.state.lock() {
            guard.membership = Some(current.clone());
            self.mirror.write(&current);
        }
    }

    fn clear(&self) {
        if let Ok(mut guard) = self.state.lock() {
            guard.account = None;
            guard.membership = None;
            self.mirror.clear();
        }
    }

    /// React to sign-in/sign-out events the resolver did not trigger
    /// (another component sharing the Identity handle). Holds only a weak
    /// reference so dropping the resolver ends the task.
    fn spawn_listener(inner: &Arc<Inner>, mut rx: broadcast::Receiver<AuthEvent>) {
        let weak: Weak<Inner> = Arc::downgrade(inner);
        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            target: "messmate",
                            event = "auth_events_lagged",
                            skipped
                        );
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else { break };
                match event {
                    AuthEvent::SignedOut => inner.clear(),
                    AuthEvent::SignedIn { account_id } => {
                        if let Err(err) = Inner::resolve(&inner, &account_id).await {
                            warn!(
                                target: "messmate",
                                event = "auth_event_resolve_failed",
                                error = %err
                            );
                        }
                    }
                }
            }
        });
    }
}
