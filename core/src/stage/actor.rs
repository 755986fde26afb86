//! User-supplied game logic contracts: `IStage` and `IActor`. Stored as trait objects since one Play node's
//! `PlayDispatcher` hosts many concrete Stage implementations side by side,
//! selected at runtime by `stageType` — a plugin registry, not a single
//! generic instantiation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use protocol::{ClientPacket, Payload};

use crate::senders::{ActorSender, StageSender};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `Absent → Authenticating → Joined(connected) ↔ Joined(!connected) → Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    Authenticating,
    Joined { connected: bool },
    Destroyed,
}

/// Game-supplied room/lobby/battle logic, one instance per Stage.
pub trait IStage: Send {
    /// Called once, right after construction, with the `IStageSender` bound
    /// to this instance. Most implementations stash it in a field so later
    /// callbacks (`onDispatch`, timers) can reach `addRepeatTimer`,
    /// `sendToClient`, etc. without it being threaded through every method.
    fn bind_sender(&mut self, sender: Arc<StageSender>) {
        let _ = sender;
    }

    fn on_create<'a>(&'a mut self, payload: &'a Payload) -> BoxFuture<'a, (bool, Option<Payload>)>;

    fn on_post_create(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn on_join_stage<'a>(&'a mut self, actor: &'a mut dyn IActor, sender: &'a ActorSender) -> BoxFuture<'a, bool>;

    fn on_post_join_stage<'a>(&'a mut self, actor: &'a mut dyn IActor) -> BoxFuture<'a, ()> {
        let _ = actor;
        Box::pin(async {})
    }

    /// User traffic addressed to an Actor within this Stage.
    fn on_dispatch_actor<'a>(&'a mut self, actor: &'a mut dyn IActor, packet: &'a ClientPacket) -> BoxFuture<'a, ()>;

    /// Server-to-server traffic addressed to this Stage with no Actor (step 3).
    fn on_dispatch<'a>(&'a mut self, packet: &'a ClientPacket) -> BoxFuture<'a, ()> {
        let _ = packet;
        Box::pin(async {})
    }

    fn on_connection_changed<'a>(&'a mut self, actor: &'a mut dyn IActor, connected: bool) -> BoxFuture<'a, ()> {
        let _ = (actor, connected);
        Box::pin(async {})
    }

    fn on_destroy(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Game-supplied per-player logic, one instance per Actor.
pub trait IActor: Send {
    /// Called once, right after construction, with
    /// the `IActorSender` bound to this instance.
    fn bind_sender(&mut self, sender: Arc<ActorSender>) {
        let _ = sender;
    }

    fn on_create(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    /// MUST call `sender.set_account_id(...)` with a non-empty id before
    /// returning `true`.
    fn on_authenticate<'a>(&'a mut self, auth_payload: &'a Payload, sender: &'a ActorSender) -> BoxFuture<'a, bool>;

    fn on_post_authenticate(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn on_destroy(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

pub type StageFactory = std::sync::Arc<dyn Fn() -> Box<dyn IStage> + Send + Sync>;
pub type ActorFactory = std::sync::Arc<dyn Fn() -> Box<dyn IActor> + Send + Sync>;
