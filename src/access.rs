//! Authorization-level dispatch.
//!
//! Each [`AuthLevel`] maps to exactly one verification strategy. The table
//! is supplied at construction and validated for completeness — a missing
//! level is a configuration error, not a runtime retry. Strategies populate
//! request metadata as a side effect; stamping already performed is kept
//! even when verification ultimately fails.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::authorize::{AuthLevel, Authorizer};
use crate::context::Context;
use crate::metadata::{Metadata, keys};
use crate::session::Session;
use crate::{Error, Result};

/// A verification strategy for one authorization level.
#[async_trait]
pub trait AccessStrategy: Send + Sync {
    /// Verify the caller, stamping identity metadata into `req`. Returns the
    /// bound session when one exists at this level.
    async fn verify(
        &self,
        ctx: &dyn Context,
        req: &mut Metadata,
        require_elevated: bool,
    ) -> Result<Option<Arc<Session>>>;
}

async fn authenticated(ctx: &dyn Context) -> Result<Arc<Session>> {
    match ctx.verify().await? {
        Some(session) => Ok(session),
        None => Err(Error::NotLoggedIn),
    }
}

fn stamp_socket(ctx: &dyn Context, req: &mut Metadata) {
    if let Some(id) = ctx.socket_id() {
        req.stamp(keys::SOCKET_ID, id.to_string());
    }
}

fn check_elevated(session: &Session, require_elevated: bool) -> Result<()> {
    if require_elevated && !session.is_developer() {
        return Err(Error::DeveloperRequired);
    }
    Ok(())
}

/// `AuthLevel::None`: no identity check, caller metadata only.
pub struct NoneAccess;

#[async_trait]
impl AccessStrategy for NoneAccess {
    async fn verify(
        &self,
        ctx: &dyn Context,
        req: &mut Metadata,
        _require_elevated: bool,
    ) -> Result<Option<Arc<Session>>> {
        stamp_socket(ctx, req);
        req.stamp(keys::CLIENT_IP, ctx.remote_addr());
        Ok(None)
    }
}

/// `AuthLevel::OAuth`: a verified account identity.
pub struct OAuthAccess;

#[async_trait]
impl AccessStrategy for OAuthAccess {
    async fn verify(
        &self,
        ctx: &dyn Context,
        req: &mut Metadata,
        require_elevated: bool,
    ) -> Result<Option<Arc<Session>>> {
        let session = authenticated(ctx).await?;
        stamp_socket(ctx, req);
        req.stamp(keys::GUID, session.guid());
        req.stamp(keys::CLIENT_IP, ctx.remote_addr());
        check_elevated(&session, require_elevated)?;
        Ok(Some(session))
    }
}

/// `AuthLevel::Select` / `AuthLevel::Player`: identity plus a selected role.
pub struct PlayerAccess;

#[async_trait]
impl AccessStrategy for PlayerAccess {
    async fn verify(
        &self,
        ctx: &dyn Context,
        req: &mut Metadata,
        require_elevated: bool,
    ) -> Result<Option<Arc<Session>>> {
        let session = authenticated(ctx).await?;
        let Some(uid) = session.uid() else {
            return Err(Error::RoleNotSelected);
        };
        stamp_socket(ctx, req);
        req.stamp(keys::GUID, session.guid());
        req.stamp(keys::UID, uid);
        req.stamp(keys::CLIENT_IP, ctx.remote_addr());
        check_elevated(&session, require_elevated)?;
        Ok(Some(session))
    }
}

/// The level-to-strategy registry and the single authorization entry point.
pub struct AccessDispatcher {
    authorizer: Arc<Authorizer>,
    strategies: HashMap<AuthLevel, Box<dyn AccessStrategy>>,
}

impl AccessDispatcher {
    /// Build a dispatcher from an explicit strategy table. Fails when any
    /// level lacks a strategy.
    pub fn new(
        authorizer: Arc<Authorizer>,
        strategies: HashMap<AuthLevel, Box<dyn AccessStrategy>>,
    ) -> Result<Self> {
        for level in AuthLevel::ALL {
            if !strategies.contains_key(&level) {
                return Err(Error::Config(format!(
                    "no access strategy registered for level {level:?}"
                )));
            }
        }
        Ok(Self {
            authorizer,
            strategies,
        })
    }

    /// The standard table: `None`, `OAuth`, and one player strategy shared
    /// by `Select` and `Player`.
    #[must_use]
    pub fn with_defaults(authorizer: Arc<Authorizer>) -> Self {
        let strategies: HashMap<AuthLevel, Box<dyn AccessStrategy>> = HashMap::from([
            (AuthLevel::None, Box::new(NoneAccess) as Box<dyn AccessStrategy>),
            (AuthLevel::OAuth, Box::new(OAuthAccess) as Box<dyn AccessStrategy>),
            (AuthLevel::Select, Box::new(PlayerAccess) as Box<dyn AccessStrategy>),
            (AuthLevel::Player, Box::new(PlayerAccess) as Box<dyn AccessStrategy>),
        ]);
        Self::new(authorizer, strategies).expect("default strategy table is complete")
    }

    /// The authorization table backing this dispatcher.
    #[must_use]
    pub fn authorizer(&self) -> &Arc<Authorizer> {
        &self.authorizer
    }

    /// Resolve the endpoint's level, run its strategy, and stamp the cleared
    /// level into request metadata on success.
    pub async fn verify(
        &self,
        ctx: &dyn Context,
        req: &mut Metadata,
        service_path: &str,
        service_method: &str,
    ) -> Result<Option<Arc<Session>>> {
        let (level, path) = self.authorizer.resolve(service_path, service_method);
        let require_elevated = self.authorizer.is_elevated(&path);
        // Constructor validation guarantees every level has a strategy.
        let strategy = self
            .strategies
            .get(&level)
            .expect("strategy table covers every level");
        let session = strategy.verify(ctx, req, require_elevated).await?;
        req.set(keys::PERMISSION, level.as_u8().to_string());
        Ok(session)
    }
}
