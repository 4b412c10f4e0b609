//! Envelope dispatch and the per-connection lifecycle.
//!
//! Each connection moves `Anonymous -> Authenticated -> Disconnected`. The
//! directory is the authority on whether a connection is authenticated; the
//! context's state only tracks the lifecycle so cleanup runs exactly once.

use std::sync::Arc;

use parlor_core::envelope::Envelope;
use parlor_core::payload::ClientRequest;
use parlor_core::user::User;

use crate::directory::{ConnectionDirectory, Rebind};
use crate::error::RouteError;
use crate::history::MessageLog;
use crate::identity::{IdentityError, IdentityStore};
use crate::rooms::{BroadcastReport, EchoPolicy, RoomRegistry};
use crate::session::{
    ConnectionHandle, ConnectionId, ConnectionIdAllocator, OutboundSender, Session, encode_frame,
};

/// Routing behavior switches.
#[derive(Debug, Clone, Copy)]
pub struct RoutingPolicy {
    pub echo: EchoPolicy,
    /// Echo an `error` envelope to the sender of a rejected operation.
    pub error_replies: bool,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            echo: EchoPolicy::IncludeSender,
            error_replies: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Anonymous,
    Authenticated(User),
    Disconnected,
}

/// Per-connection routing state, owned by the connection's task.
#[derive(Debug)]
pub struct ConnectionContext {
    handle: ConnectionHandle,
    state: ConnectionState,
}

impl ConnectionContext {
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    fn username(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Authenticated(user) => Some(&user.username),
            _ => None,
        }
    }
}

/// What a successfully routed envelope did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Authenticated { user: User, rebind: Rebind },
    Joined { room: String, created: bool, newly_joined: bool },
    Broadcast { room: String, report: BroadcastReport },
    Delivered { to: String },
}

/// Interprets inbound envelopes against the shared directory and rooms.
pub struct MessageRouter {
    directory: Arc<ConnectionDirectory>,
    rooms: Arc<RoomRegistry>,
    identity: Arc<dyn IdentityStore>,
    log: Arc<dyn MessageLog>,
    policy: RoutingPolicy,
    ids: ConnectionIdAllocator,
}

impl MessageRouter {
    pub fn new(
        identity: Arc<dyn IdentityStore>,
        log: Arc<dyn MessageLog>,
        policy: RoutingPolicy,
    ) -> Self {
        Self {
            directory: Arc::new(ConnectionDirectory::new()),
            rooms: Arc::new(RoomRegistry::new()),
            identity,
            log,
            policy,
            ids: ConnectionIdAllocator::default(),
        }
    }

    pub fn directory(&self) -> &Arc<ConnectionDirectory> {
        &self.directory
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    pub fn identity(&self) -> &Arc<dyn IdentityStore> {
        &self.identity
    }

    pub fn message_log(&self) -> &Arc<dyn MessageLog> {
        &self.log
    }

    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    /// Register a new anonymous connection that sends through `sender`.
    pub fn open(&self, sender: OutboundSender) -> ConnectionContext {
        let handle = ConnectionHandle::new(self.ids.next_id(), sender);
        tracing::debug!(connection_id = %handle.id(), "Connection opened");
        ConnectionContext {
            handle,
            state: ConnectionState::Anonymous,
        }
    }

    /// Route one envelope, report the result to operators, and echo an error
    /// envelope to the sender when the policy asks for it.
    pub async fn dispatch(
        &self,
        ctx: &mut ConnectionContext,
        envelope: &Envelope,
    ) -> Result<Outcome, RouteError> {
        let result = self.handle(ctx, envelope).await;
        match &result {
            Ok(outcome) => log_outcome(ctx, outcome),
            Err(err) => self.report(ctx, err),
        }
        result
    }

    /// Report a rejected operation that never reached `handle` (for example a
    /// frame that failed to decode).
    pub fn report(&self, ctx: &ConnectionContext, err: &RouteError) {
        tracing::warn!(
            connection_id = %ctx.id(),
            user = ctx.username().unwrap_or("-"),
            code = err.code(),
            error = %err,
            "Operation rejected"
        );
        if self.policy.error_replies
            && !err.is_fatal()
            && let Err(e) = ctx
                .handle
                .send(&Envelope::error(err.code(), &err.to_string()))
        {
            tracing::debug!(connection_id = %ctx.id(), error = %e, "Failed to send error reply");
        }
    }

    /// Route one envelope without reporting.
    pub async fn handle(
        &self,
        ctx: &mut ConnectionContext,
        envelope: &Envelope,
    ) -> Result<Outcome, RouteError> {
        if ctx.state == ConnectionState::Disconnected {
            return Err(RouteError::Transport("connection closed".to_string()));
        }
        match ClientRequest::parse(envelope)? {
            ClientRequest::Auth { username, password } => {
                self.authenticate(ctx, &username, &password).await
            },
            ClientRequest::Join { room } => self.join(ctx, &room).await,
            ClientRequest::Room { room, text } => self.room_message(ctx, &room, &text).await,
            ClientRequest::Dm { username, text } => {
                self.direct_message(ctx, &username, &text).await
            },
        }
    }

    async fn authenticate(
        &self,
        ctx: &mut ConnectionContext,
        username: &str,
        password: &str,
    ) -> Result<Outcome, RouteError> {
        let user = self
            .identity
            .verify(username, password)
            .await
            .map_err(|e| RouteError::Auth(format!("{username}: {e}")))?;

        // Leave the previous identity's rooms before rebinding so no broadcast
        // addressed to them reaches the new identity.
        let mut left = 0;
        if let Some(current) = self.directory.lookup(ctx.id()).await
            && current.user.id != user.id
        {
            let rooms = self.directory.rooms_of(ctx.id()).await;
            left = self.rooms.leave_all(ctx.id(), &rooms).await;
        }

        let rebind = self.directory.bind(ctx.handle.clone(), user.clone()).await;
        if let Rebind::Replaced { previous, rooms } = &rebind {
            left += self.rooms.leave_all(ctx.id(), rooms).await;
            tracing::info!(
                connection_id = %ctx.id(),
                previous = %previous.username,
                user = %user.username,
                rooms_left = left,
                "Connection re-authenticated as a different user"
            );
        }
        ctx.state = ConnectionState::Authenticated(user.clone());
        self.acknowledge(ctx, &Envelope::auth_ok(&user.username));
        Ok(Outcome::Authenticated { user, rebind })
    }

    async fn join(&self, ctx: &mut ConnectionContext, name: &str) -> Result<Outcome, RouteError> {
        let session = self.require_session(ctx).await?;
        let (room, created) = self.rooms.get_or_create(name).await;

        // Record first: if the session vanished meanwhile nothing is joined.
        if !self.directory.record_join(ctx.id(), name).await {
            return Err(RouteError::NotAuthenticated);
        }
        let newly_joined = room.join(&session).await;
        self.acknowledge(ctx, &Envelope::joined(name));
        Ok(Outcome::Joined {
            room: name.to_string(),
            created,
            newly_joined,
        })
    }

    async fn room_message(
        &self,
        ctx: &mut ConnectionContext,
        name: &str,
        text: &str,
    ) -> Result<Outcome, RouteError> {
        let session = self.require_session(ctx).await?;
        let room = self
            .rooms
            .get(name)
            .await
            .ok_or_else(|| RouteError::UnknownRoom(name.to_string()))?;

        let report = room.broadcast(&session, text, self.policy.echo).await?;

        if let Err(e) = self.log.append(room.id(), session.user.id, text).await {
            tracing::warn!(room = name, error = %e, "Failed to record room message");
        }
        Ok(Outcome::Broadcast {
            room: name.to_string(),
            report,
        })
    }

    async fn direct_message(
        &self,
        ctx: &mut ConnectionContext,
        target: &str,
        text: &str,
    ) -> Result<Outcome, RouteError> {
        let session = self.require_session(ctx).await?;
        let recipient = match self.identity.find_by_username(target).await {
            Ok(user) => user,
            Err(IdentityError::NotFound) => {
                return Err(RouteError::UnknownUser(target.to_string()));
            },
            Err(e) => {
                tracing::warn!(to = target, error = %e, "Identity lookup failed");
                return Err(RouteError::UnknownUser(target.to_string()));
            },
        };

        let handle = self
            .directory
            .lookup_by_user(recipient.id)
            .await
            .ok_or_else(|| RouteError::UserUnreachable(target.to_string()))?;

        let frame = encode_frame(&Envelope::direct_message(&session.user.username, text))?;
        handle.send_frame(frame).map_err(|e| {
            tracing::debug!(
                to = target,
                connection_id = %handle.id(),
                error = %e,
                "Direct delivery failed"
            );
            RouteError::UserUnreachable(target.to_string())
        })?;

        Ok(Outcome::Delivered {
            to: recipient.username,
        })
    }

    async fn require_session(&self, ctx: &ConnectionContext) -> Result<Session, RouteError> {
        self.directory
            .lookup(ctx.id())
            .await
            .ok_or(RouteError::NotAuthenticated)
    }

    fn acknowledge(&self, ctx: &ConnectionContext, envelope: &Envelope) {
        if let Err(e) = ctx.handle.send(envelope) {
            tracing::debug!(connection_id = %ctx.id(), error = %e, "Failed to send acknowledgement");
        }
    }

    /// Tear down the connection's session and memberships. Runs at most once
    /// per connection; returns false on repeat calls.
    pub async fn disconnect(&self, ctx: &mut ConnectionContext) -> bool {
        if ctx.state == ConnectionState::Disconnected {
            return false;
        }
        ctx.state = ConnectionState::Disconnected;

        match self.directory.unbind(ctx.id()).await {
            Some(unbound) => {
                let left = self.rooms.leave_all(ctx.id(), &unbound.rooms).await;
                tracing::info!(
                    connection_id = %ctx.id(),
                    user = %unbound.session.user.username,
                    rooms_left = left,
                    "User disconnected"
                );
            },
            None => {
                tracing::debug!(connection_id = %ctx.id(), "Anonymous connection closed");
            },
        }
        true
    }
}

fn log_outcome(ctx: &ConnectionContext, outcome: &Outcome) {
    let conn = ctx.id();
    match outcome {
        Outcome::Authenticated { user, .. } => {
            tracing::info!(connection_id = %conn, user = %user.username, "User authenticated");
        },
        Outcome::Joined {
            room,
            created,
            newly_joined,
        } => {
            tracing::info!(
                connection_id = %conn,
                user = ctx.username().unwrap_or("-"),
                room = %room,
                created,
                newly_joined,
                "Joined room"
            );
        },
        Outcome::Broadcast { room, report } => {
            tracing::debug!(
                connection_id = %conn,
                user = ctx.username().unwrap_or("-"),
                room = %room,
                delivered = report.delivered,
                skipped = report.skipped,
                "Room message broadcast"
            );
        },
        Outcome::Delivered { to } => {
            tracing::debug!(
                connection_id = %conn,
                user = ctx.username().unwrap_or("-"),
                to = %to,
                "Direct message delivered"
            );
        },
    }
}
