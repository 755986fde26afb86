//! Stage Runtime: the per-Stage single-consumer event loop and its dispatch
//! table, plus the Actor/Session binding lifecycle.

pub mod actor;
pub mod envelope;
pub mod play_dispatcher;

pub use play_dispatcher::PlayDispatcher;

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures_util::FutureExt;
use protocol::base_commands::{
    CreateStageReq, CreateStageRes, DisconnectNotice, GetOrCreateStageReq, GetOrCreateStageRes,
    JoinStageReq, JoinStageRes, MSG_CREATE_STAGE, MSG_DESTROY_STAGE, MSG_DISCONNECT_NOTICE,
    MSG_GET_OR_CREATE_STAGE, MSG_JOIN_STAGE, MSG_RECONNECT_NOTICE, ReconnectNotice, ReconnectRes,
};
use protocol::{AccountId, ClientPacket, ErrorCode, Nid, Payload, RoutePacket};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, warn};

use crate::mesh::MeshTransport;
use crate::offload::OffloadService;
use crate::request_cache::RequestCache;
use crate::senders::context::{SenderCore, with_current_header};
use crate::senders::{ActorSender, ISender, StageSender};
use crate::timer::TimerService;
use actor::{ActorFactory, ActorState, IActor, IStage};
use envelope::{StageEnvelope, StagePoster};

/// Dependencies every Stage needs, shared node-wide and handed down by the
/// `PlayDispatcher` at creation time.
pub struct StageDeps {
    pub self_nid: Nid,
    pub service_id: u32,
    pub transport: Arc<MeshTransport>,
    pub request_cache: Arc<RequestCache>,
    pub request_timeout: std::time::Duration,
    pub timer: Arc<TimerService>,
    pub offload: Arc<OffloadService>,
    pub poster: Arc<dyn StagePoster>,
}

struct ActorEntry {
    actor: Box<dyn IActor>,
    sender: Arc<ActorSender>,
    state: ActorState,
}

/// One room/lobby/battle instance. Owns its queue, its user-supplied
/// `IStage`, and the Actors currently joined to it.
pub struct Stage {
    stage_id: i64,
    stage_type: String,
    deps: Arc<StageDeps>,
    actor_factory: ActorFactory,
    queue: std::sync::Mutex<VecDeque<StageEnvelope>>,
    running: AtomicBool,
    created: AtomicBool,
    user_stage: AsyncMutex<Box<dyn IStage>>,
    actors: AsyncMutex<HashMap<AccountId, ActorEntry>>,
    timer_callbacks: DashMap<u64, std::sync::Mutex<Box<dyn FnMut(&mut dyn IStage) + Send>>>,
    stage_sender: Arc<StageSender>,
    on_destroyed: Box<dyn Fn(i64) + Send + Sync>,
}

impl Stage {
    pub fn new(
        stage_id: i64,
        stage_type: impl Into<String>,
        mut user_stage: Box<dyn IStage>,
        actor_factory: ActorFactory,
        deps: Arc<StageDeps>,
        on_destroyed: Box<dyn Fn(i64) + Send + Sync>,
    ) -> Arc<Self> {
        let stage_type = stage_type.into();
        let core = SenderCore::new(
            deps.self_nid,
            deps.service_id,
            deps.transport.clone(),
            deps.request_cache.clone(),
            deps.request_timeout,
        );
        let stage_sender = Arc::new(StageSender::new(
            core,
            stage_id,
            stage_type.clone(),
            deps.timer.clone(),
            deps.offload.clone(),
            deps.poster.clone(),
        ));
        user_stage.bind_sender(stage_sender.clone());

        Arc::new(Self {
            stage_id,
            stage_type,
            deps,
            actor_factory,
            queue: std::sync::Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            created: AtomicBool::new(false),
            user_stage: AsyncMutex::new(user_stage),
            actors: AsyncMutex::new(HashMap::new()),
            timer_callbacks: DashMap::new(),
            stage_sender,
            on_destroyed,
        })
    }

    pub fn stage_id(&self) -> i64 {
        self.stage_id
    }

    pub fn stage_type(&self) -> &str {
        &self.stage_type
    }

    /// Best-effort, non-blocking: used by discovery's actor-count gauge,
    /// which tolerates a stale read far more than it tolerates blocking the
    /// Stage's own turn.
    pub fn try_actor_count(&self) -> Option<u32> {
        self.actors.try_lock().ok().map(|a| a.len() as u32)
    }

    pub fn register_timer_callback(&self, timer_id: u64, callback: Box<dyn FnMut(&mut dyn IStage) + Send>) {
        self.timer_callbacks.insert(timer_id, std::sync::Mutex::new(callback));
    }

    /// Enqueues `envelope` and, if the Stage was idle, spawns the consumer
    /// task that will drain the queue.
    pub fn enqueue(self: &Arc<Self>, envelope: StageEnvelope) {
        self.queue.lock().unwrap().push_back(envelope);
        if self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            let stage = self.clone();
            tokio::spawn(async move { stage.run_consumer().await });
        }
    }

    async fn run_consumer(self: Arc<Self>) {
        loop {
            let next = self.queue.lock().unwrap().pop_front();
            match next {
                Some(envelope) => self.execute_turn(envelope).await,
                None => {
                    self.running.store(false, Ordering::Release);
                    let more_work = !self.queue.lock().unwrap().is_empty();
                    if more_work && self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                        continue;
                    }
                    break;
                }
            }
        }
    }

    async fn execute_turn(self: &Arc<Self>, envelope: StageEnvelope) {
        match envelope {
            StageEnvelope::Packet(packet) => self.execute_packet_turn(packet).await,
            StageEnvelope::TimerFire { timer_id } => {
                self.guarded(async { self.dispatch_timer_fire(timer_id).await }, None).await
            }
            StageEnvelope::AsyncPostBack { token, result } => {
                self.guarded(async { self.dispatch_async_post_back(token, result).await }, None).await
            }
            StageEnvelope::LeaveStage { account_id } => {
                self.guarded(async { self.dispatch_leave_stage(&account_id).await }, None).await
            }
        }
    }

    async fn execute_packet_turn(self: &Arc<Self>, packet: RoutePacket) {
        let header = packet.route_header.clone();
        self.guarded(with_current_header(header.clone(), async { self.dispatch_packet(packet).await }), Some(header))
            .await
    }

    /// Runs `fut` behind `catch_unwind`; logs and, for a packet turn with a
    /// live reply address, answers `UncheckedContentsError` so the caller
    /// never hangs on a panicking handler.
    async fn guarded<F: std::future::Future<Output = ()>>(
        self: &Arc<Self>,
        fut: F,
        header: Option<protocol::RouteHeader>,
    ) {
        if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
            let message = panic_message(&panic);
            error!(stage_id = self.stage_id, error = %message, "stage turn panicked");
            if let Some(header) = header {
                if header.msg_seq() > 0 {
                    let reply = RoutePacket::reply_of(
                        self.deps.self_nid,
                        self.deps.service_id,
                        &header,
                        ErrorCode::UncheckedContentsError,
                        None,
                    );
                    self.deps.transport.send(header.from, reply);
                }
            }
        }
    }

    async fn dispatch_packet(&self, packet: RoutePacket) {
        if packet.route_header.is_base {
            self.dispatch_base(packet).await;
        } else if !packet.route_header.account_id.is_empty() {
            self.dispatch_actor_traffic(packet).await;
        } else {
            self.dispatch_stage_traffic(packet).await;
        }
    }

    async fn dispatch_base(&self, packet: RoutePacket) {
        match packet.route_header.msg_id() {
            MSG_CREATE_STAGE => self.handle_create_stage(packet).await,
            MSG_GET_OR_CREATE_STAGE => self.handle_get_or_create_stage(packet).await,
            MSG_JOIN_STAGE => self.handle_join_stage(packet).await,
            MSG_DISCONNECT_NOTICE => self.handle_disconnect_notice(packet).await,
            MSG_RECONNECT_NOTICE => self.handle_reconnect_notice(packet).await,
            MSG_DESTROY_STAGE => self.handle_destroy_stage(packet).await,
            other => {
                warn!(msg_id = other, stage_id = self.stage_id, "unrecognized base command");
                if packet.route_header.msg_seq() > 0 {
                    self.stage_sender.reply(ErrorCode::NotRegisteredMessage, None);
                }
            }
        }
    }

    async fn handle_create_stage(&self, packet: RoutePacket) {
        let req: CreateStageReq = match packet.decode_payload() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed CreateStageReq");
                self.stage_sender.reply(ErrorCode::InvalidParameter, None);
                return;
            }
        };

        if self.created.swap(true, Ordering::AcqRel) {
            warn!(stage_id = self.stage_id, "duplicate CreateStage for an already-created stage");
            self.reply_create_result(false, req.payload_id, Payload::Empty);
            return;
        }

        let (ok, reply_payload) = {
            let mut user_stage = self.user_stage.lock().await;
            user_stage.on_create(&req.payload).await
        };
        if ok {
            self.user_stage.lock().await.on_post_create().await;
        }
        self.reply_create_result(ok, req.payload_id, reply_payload.unwrap_or_default());
    }

    fn reply_create_result(&self, ok: bool, payload_id: String, payload: Payload) {
        let res = CreateStageRes { ok, payload_id, payload };
        match Payload::encode(&res) {
            Ok(p) => self.stage_sender.reply(ErrorCode::Success, Some(p)),
            Err(e) => {
                error!(error = %e, "failed to encode CreateStageRes");
                self.stage_sender.reply(ErrorCode::SystemError, None);
            }
        }
    }

    /// `join` on the request is advisory only,
    /// so the existing-stage branch here never consumes it.
    async fn handle_get_or_create_stage(&self, packet: RoutePacket) {
        let req: GetOrCreateStageReq = match packet.decode_payload() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed GetOrCreateStageReq");
                self.stage_sender.reply(ErrorCode::InvalidParameter, None);
                return;
            }
        };

        if self.created.swap(true, Ordering::AcqRel) {
            let res = GetOrCreateStageRes {
                ok: true,
                is_created: false,
                payload_id: String::new(),
                payload: Payload::Empty,
            };
            self.reply_encoded(&res);
            return;
        }

        let (ok, reply_payload) = {
            let mut user_stage = self.user_stage.lock().await;
            user_stage.on_create(&req.create.payload).await
        };
        if ok {
            self.user_stage.lock().await.on_post_create().await;
        }
        let res = GetOrCreateStageRes {
            ok,
            is_created: true,
            payload_id: req.create.payload_id,
            payload: reply_payload.unwrap_or_default(),
        };
        self.reply_encoded(&res);
    }

    fn reply_encoded<T: serde::Serialize>(&self, value: &T) {
        match Payload::encode(value) {
            Ok(p) => self.stage_sender.reply(ErrorCode::Success, Some(p)),
            Err(e) => {
                error!(error = %e, "failed to encode reply payload");
                self.stage_sender.reply(ErrorCode::SystemError, None);
            }
        }
    }

    async fn handle_join_stage(&self, packet: RoutePacket) {
        let req: JoinStageReq = match packet.decode_payload() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed JoinStageReq");
                self.stage_sender.reply(ErrorCode::InvalidParameter, None);
                return;
            }
        };

        let core = SenderCore::new(
            self.deps.self_nid,
            self.deps.service_id,
            self.deps.transport.clone(),
            self.deps.request_cache.clone(),
            self.deps.request_timeout,
        );
        let actor_sender = Arc::new(ActorSender::new(
            core,
            self.stage_id,
            req.session_nid,
            req.sid,
            self.deps.poster.clone(),
        ));

        let mut actor: Box<dyn IActor> = (self.actor_factory)();
        actor.bind_sender(actor_sender.clone());
        actor.on_create().await;

        let authenticated = actor.on_authenticate(&req.auth_payload, &actor_sender).await;
        if !authenticated || actor_sender.account_id().is_empty() {
            // Closing the socket is the client edge's responsibility once it
            // sees this reply, not something the Stage reaches across the
            // mesh to do itself.
            self.stage_sender.reply(ErrorCode::AuthenticationFailed, None);
            return;
        }

        actor.on_post_authenticate().await;

        let joined = {
            let mut user_stage = self.user_stage.lock().await;
            user_stage.on_join_stage(actor.as_mut(), &actor_sender).await
        };
        if !joined {
            actor.on_destroy().await;
            self.stage_sender.reply(ErrorCode::JoinStageFailed, None);
            return;
        }

        let account_id = actor_sender.account_id();
        {
            let mut actors = self.actors.lock().await;
            actors.insert(
                account_id.clone(),
                ActorEntry {
                    actor,
                    sender: actor_sender,
                    state: ActorState::Joined { connected: true },
                },
            );
            let mut user_stage = self.user_stage.lock().await;
            if let Some(entry) = actors.get_mut(&account_id) {
                user_stage.on_post_join_stage(entry.actor.as_mut()).await;
            }
        }

        self.reply_encoded(&JoinStageRes { ok: true, account_id });
    }

    async fn handle_disconnect_notice(&self, packet: RoutePacket) {
        let notice: DisconnectNotice = match packet.decode_payload() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "malformed DisconnectNotice");
                return;
            }
        };
        let mut actors = self.actors.lock().await;
        let Some(entry) = actors.get_mut(&notice.account_id) else {
            warn!(account_id = %notice.account_id, "DisconnectNotice for unknown actor");
            return;
        };
        entry.state = ActorState::Joined { connected: false };
        let mut user_stage = self.user_stage.lock().await;
        user_stage.on_connection_changed(entry.actor.as_mut(), false).await;
    }

    async fn handle_reconnect_notice(&self, packet: RoutePacket) {
        let notice: ReconnectNotice = match packet.decode_payload() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "malformed ReconnectNotice");
                return;
            }
        };
        let mut actors = self.actors.lock().await;
        let Some(entry) = actors.get_mut(&notice.account_id) else {
            warn!(account_id = %notice.account_id, "ReconnectNotice for unknown actor");
            return;
        };
        entry.sender.rebind_session(notice.new_session_nid, notice.new_sid);

        // Only step 4 (onAuthenticate) re-runs on reconnect; onCreate and
        // onJoinStage already ran when the Actor first joined.
        let reauthenticated = entry
            .actor
            .on_authenticate(&notice.auth_payload, &entry.sender)
            .await;
        if !reauthenticated || entry.sender.account_id().is_empty() {
            self.stage_sender.reply(ErrorCode::AuthenticationFailed, None);
            return;
        }

        entry.state = ActorState::Joined { connected: true };
        let mut user_stage = self.user_stage.lock().await;
        user_stage.on_connection_changed(entry.actor.as_mut(), true).await;
        self.reply_encoded(&ReconnectRes { ok: true });
    }

    async fn handle_destroy_stage(&self, _packet: RoutePacket) {
        {
            let mut actors = self.actors.lock().await;
            for (_, mut entry) in actors.drain() {
                entry.actor.on_destroy().await;
            }
        }
        self.user_stage.lock().await.on_destroy().await;
        self.stage_sender.cancel_owned_timers();
        (self.on_destroyed)(self.stage_id);
    }

    async fn dispatch_actor_traffic(&self, packet: RoutePacket) {
        let account_id = packet.route_header.account_id.clone();
        let client_packet = to_client_packet(&packet);
        let mut actors = self.actors.lock().await;
        let Some(entry) = actors.get_mut(&account_id) else {
            warn!(account_id = %account_id, stage_id = self.stage_id, "packet for unknown actor");
            if packet.route_header.msg_seq() > 0 {
                self.stage_sender.reply(ErrorCode::InvalidParameter, None);
            }
            return;
        };
        let mut user_stage = self.user_stage.lock().await;
        user_stage.on_dispatch_actor(entry.actor.as_mut(), &client_packet).await;
    }

    async fn dispatch_stage_traffic(&self, packet: RoutePacket) {
        let client_packet = to_client_packet(&packet);
        self.user_stage.lock().await.on_dispatch(&client_packet).await;
    }

    async fn dispatch_timer_fire(&self, timer_id: u64) {
        let Some(entry) = self.timer_callbacks.get(&timer_id) else {
            warn!(timer_id, stage_id = self.stage_id, "TimerFire with no registered callback");
            return;
        };
        let mut callback = entry.lock().unwrap();
        let mut user_stage = self.user_stage.lock().await;
        (callback)(&mut **user_stage);
    }

    async fn dispatch_async_post_back(&self, token: u64, result: Box<dyn std::any::Any + Send>) {
        let mut user_stage = self.user_stage.lock().await;
        self.deps.offload.resolve(token, result, &mut **user_stage);
    }

    async fn dispatch_leave_stage(&self, account_id: &str) {
        let mut actors = self.actors.lock().await;
        if let Some(mut entry) = actors.remove(account_id) {
            entry.actor.on_destroy().await;
        }
    }
}

fn to_client_packet(packet: &RoutePacket) -> ClientPacket {
    ClientPacket {
        msg_id: packet.route_header.msg_id().to_string(),
        msg_seq: packet.route_header.msg_seq(),
        stage_id: packet.route_header.stage_id(),
        error_code: packet.route_header.error_code(),
        payload: packet.payload.clone(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
