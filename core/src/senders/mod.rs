//! Sender façades layered on the mesh transport and request cache.

pub mod context;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use protocol::base_commands::{
    CreateStagePacket, CreateStageReq, CreateStageRes, GetOrCreateStageReq, GetOrCreateStageRes,
    JoinStagePacket, MSG_CREATE_STAGE, MSG_GET_OR_CREATE_STAGE,
};
use protocol::{AccountId, ClientPacket, ErrorCode, Nid, Payload, PlayHouseError, RoutePacket};
use tracing::{error, warn};

use crate::discovery::ServerInfoCenter;
use crate::offload::OffloadService;
use crate::stage::envelope::{StageEnvelope, StagePoster};
use crate::timer::TimerService;
use context::SenderCore;

/// Base façade: reply addressing and raw request/reply against the
/// `currentHeader` scoped value.
pub trait ISender {
    fn core(&self) -> &SenderCore;

    /// Replies to whoever sent the packet currently being handled. No-op
    /// (logged) if there is no current header, or if its `msgSeq == 0`
    /// (fire-and-forget source has nothing to reply to).
    fn reply(&self, error_code: ErrorCode, payload: Option<Payload>) {
        let Some(header) = self.core().current_header() else {
            warn!("reply() called outside of any packet's execution context");
            return;
        };
        if header.msg_seq() == 0 {
            return;
        }
        let packet = RoutePacket::reply_of(self.core().self_nid, self.core().service_id, &header, error_code, payload);
        self.core().transport.send(header.from, packet);
    }

    fn send_to_api(&self, api_nid: Nid, packet: RoutePacket) {
        self.core().fire_and_forget(api_nid, packet);
    }

    fn send_to_stage(&self, play_nid: Nid, packet: RoutePacket) {
        self.core().fire_and_forget(play_nid, packet);
    }

    fn send_to_system(&self, server_nid: Nid, packet: RoutePacket) {
        self.core().fire_and_forget(server_nid, packet);
    }

    async fn request_to_api(&self, api_nid: Nid, packet: RoutePacket) -> Result<RoutePacket, PlayHouseError> {
        self.core().request(api_nid, packet).await
    }

    async fn request_to_stage(&self, play_nid: Nid, packet: RoutePacket) -> Result<RoutePacket, PlayHouseError> {
        self.core().request(play_nid, packet).await
    }

    async fn request_to_system(&self, server_nid: Nid, packet: RoutePacket) -> Result<RoutePacket, PlayHouseError> {
        self.core().request(server_nid, packet).await
    }
}

/// Result of `createStage`: `result` is the reply's success bit.
pub struct CreateStageResult {
    pub result: bool,
    pub create_res: Option<CreateStageRes>,
}

/// `(result, isCreated)` is the three-state signal from a get-or-create call:
/// `(true,false)` existing, `(true,true)` new, `(false,false)` failed.
pub struct GetOrCreateStageResult {
    pub result: bool,
    pub is_created: bool,
    pub create_res: Option<GetOrCreateStageRes>,
}

/// Bound to no specific Stage; used by API handlers to drive Stage
/// management on a target Play node.
pub struct ApiSender {
    core: SenderCore,
    pub server_info: Arc<ServerInfoCenter>,
}

impl ApiSender {
    pub fn new(core: SenderCore, server_info: Arc<ServerInfoCenter>) -> Self {
        Self { core, server_info }
    }

    pub async fn create_stage(
        &self,
        play_nid: Nid,
        stage_type: impl Into<String>,
        stage_id: i64,
        create: CreateStagePacket,
    ) -> CreateStageResult {
        let req = CreateStageReq {
            stage_type: stage_type.into(),
            stage_id,
            payload_id: create.payload_id,
            payload: create.payload,
        };
        let payload = match Payload::encode(&req) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode CreateStageReq");
                return CreateStageResult { result: false, create_res: None };
            }
        };
        let packet = RoutePacket::stage_of(
            self.core.self_nid,
            self.core.service_id,
            MSG_CREATE_STAGE,
            stage_id,
            AccountId::new(),
            payload,
            true,
            true,
        );

        match self.request_to_stage(play_nid, packet).await {
            Ok(reply) => match reply.decode_payload::<CreateStageRes>() {
                Ok(res) => CreateStageResult { result: res.ok, create_res: Some(res) },
                Err(e) => {
                    warn!(error = %e, "malformed CreateStageRes");
                    CreateStageResult { result: false, create_res: None }
                }
            },
            Err(_) => CreateStageResult { result: false, create_res: None },
        }
    }

    pub async fn get_or_create_stage(
        &self,
        play_nid: Nid,
        stage_type: impl Into<String>,
        stage_id: i64,
        create: CreateStagePacket,
        join: Option<JoinStagePacket>,
    ) -> GetOrCreateStageResult {
        let req = GetOrCreateStageReq {
            stage_type: stage_type.into(),
            stage_id,
            create,
            join,
        };
        let payload = match Payload::encode(&req) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode GetOrCreateStageReq");
                return GetOrCreateStageResult { result: false, is_created: false, create_res: None };
            }
        };
        let packet = RoutePacket::stage_of(
            self.core.self_nid,
            self.core.service_id,
            MSG_GET_OR_CREATE_STAGE,
            stage_id,
            AccountId::new(),
            payload,
            true,
            true,
        );

        match self.request_to_stage(play_nid, packet).await {
            Ok(reply) => match reply.decode_payload::<GetOrCreateStageRes>() {
                Ok(res) => GetOrCreateStageResult {
                    result: res.ok,
                    is_created: res.is_created,
                    create_res: Some(res),
                },
                Err(e) => {
                    warn!(error = %e, "malformed GetOrCreateStageRes");
                    GetOrCreateStageResult { result: false, is_created: false, create_res: None }
                }
            },
            Err(_) => GetOrCreateStageResult { result: false, is_created: false, create_res: None },
        }
    }
}

impl ISender for ApiSender {
    fn core(&self) -> &SenderCore {
        &self.core
    }
}

/// Bound to a specific `{stageId, stageType}`; used from within a Stage's
/// event loop turn.
pub struct StageSender {
    core: SenderCore,
    pub stage_id: i64,
    pub stage_type: String,
    timer: Arc<TimerService>,
    offload: Arc<OffloadService>,
    owned_timer_ids: std::sync::Mutex<Vec<u64>>,
    poster: Arc<dyn StagePoster>,
}

impl StageSender {
    pub fn new(
        core: SenderCore,
        stage_id: i64,
        stage_type: impl Into<String>,
        timer: Arc<TimerService>,
        offload: Arc<OffloadService>,
        poster: Arc<dyn StagePoster>,
    ) -> Self {
        Self {
            core,
            stage_id,
            stage_type: stage_type.into(),
            timer,
            offload,
            owned_timer_ids: std::sync::Mutex::new(Vec::new()),
            poster,
        }
    }

    pub fn add_repeat_timer(
        &self,
        initial_delay: Duration,
        period: Duration,
        callback: impl FnMut(&mut dyn crate::stage::actor::IStage) + Send + 'static,
    ) -> u64 {
        let id = self.timer.add_repeat_timer(self.stage_id, initial_delay, period);
        self.owned_timer_ids.lock().unwrap().push(id);
        self.poster.register_timer_callback(self.stage_id, id, Box::new(callback));
        id
    }

    pub fn add_count_timer(
        &self,
        initial_delay: Duration,
        period: Duration,
        count: u32,
        callback: impl FnMut(&mut dyn crate::stage::actor::IStage) + Send + 'static,
    ) -> u64 {
        let id = self.timer.add_count_timer(self.stage_id, initial_delay, period, count);
        self.owned_timer_ids.lock().unwrap().push(id);
        self.poster.register_timer_callback(self.stage_id, id, Box::new(callback));
        id
    }

    pub fn cancel_timer(&self, timer_id: u64) {
        self.timer.cancel_timer(timer_id);
    }

    pub fn has_timer(&self, timer_id: u64) -> bool {
        self.timer.has_timer(timer_id)
    }

    pub fn async_compute<R, Pre, Post>(self: &Arc<Self>, pre: Pre, post: Option<Post>)
    where
        R: Send + 'static,
        Pre: FnOnce() -> R + Send + 'static,
        Post: FnOnce(&mut dyn crate::stage::actor::IStage, R) + Send + 'static,
    {
        self.offload.async_compute(self.stage_id, pre, post);
    }

    pub fn async_io<R, Pre, Post>(self: &Arc<Self>, pre: Pre, post: Option<Post>)
    where
        R: Send + 'static,
        Pre: FnOnce() -> R + Send + 'static,
        Post: FnOnce(&mut dyn crate::stage::actor::IStage, R) + Send + 'static,
    {
        self.offload.async_io(self.stage_id, pre, post);
    }

    /// Cancels every timer this Stage owns and enqueues a Destroy command.
    pub fn close_stage(&self) {
        self.cancel_owned_timers();
        self.poster.post(self.stage_id, StageEnvelope::Packet(self.destroy_packet()));
    }

    /// Cancels every timer this Stage owns without enqueuing a Destroy
    /// command — used by the Stage's own `DestroyStage` handler, which is
    /// already inside that turn and must not re-post another one.
    pub fn cancel_owned_timers(&self) {
        let ids: Vec<u64> = self.owned_timer_ids.lock().unwrap().drain(..).collect();
        self.timer.cancel_all(&ids);
    }

    fn destroy_packet(&self) -> RoutePacket {
        RoutePacket::stage_of(
            self.core.self_nid,
            self.core.service_id,
            protocol::base_commands::MSG_DESTROY_STAGE,
            self.stage_id,
            AccountId::new(),
            Payload::Empty,
            true,
            true,
        )
    }

    /// Encodes `packet` into a client-frame and wraps it in a
    /// `clientOf(...)` RoutePacket; when `session_nid` is this node's own NID
    /// the mesh's self-connection delivers it locally, giving local and
    /// remote client targeting the same code path.
    pub fn send_to_client(&self, session_nid: Nid, sid: i64, packet: &ClientPacket) {
        let client_frame = match packet.encode() {
            Ok(bytes) => Payload::from_bytes(bytes),
            Err(e) => {
                error!(error = %e, "failed to encode client frame");
                return;
            }
        };
        let route_packet = RoutePacket::client_of(self.core.self_nid, self.core.service_id, sid, self.stage_id, client_frame);
        self.core.fire_and_forget(session_nid, route_packet);
    }
}

impl ISender for StageSender {
    fn core(&self) -> &SenderCore {
        &self.core
    }
}

/// Bound to a single Actor. Holds a non-owning reference to its
/// Stage via the sender's bound identity, not a cyclic pointer.
pub struct ActorSender {
    core: SenderCore,
    pub stage_id: i64,
    account_id: std::sync::RwLock<AccountId>,
    pub session_nid: std::sync::RwLock<Nid>,
    pub sid: std::sync::atomic::AtomicI64,
    poster: Arc<dyn StagePoster>,
}

impl ActorSender {
    pub fn new(core: SenderCore, stage_id: i64, session_nid: Nid, sid: i64, poster: Arc<dyn StagePoster>) -> Self {
        Self {
            core,
            stage_id,
            account_id: std::sync::RwLock::new(String::new()),
            session_nid: std::sync::RwLock::new(session_nid),
            sid: std::sync::atomic::AtomicI64::new(sid),
            poster,
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id.read().unwrap().clone()
    }

    /// Must be called with a non-empty id from inside `onAuthenticate` before
    /// it returns `true`.
    pub fn set_account_id(&self, account_id: AccountId) {
        *self.account_id.write().unwrap() = account_id;
    }

    pub fn rebind_session(&self, session_nid: Nid, sid: i64) {
        *self.session_nid.write().unwrap() = session_nid;
        self.sid.store(sid, Ordering::Relaxed);
    }

    /// Enqueues a LeaveStage command so actor removal runs inside the
    /// owning Stage's turn, not on the caller's thread.
    pub fn leave_stage(&self) {
        self.poster.post(
            self.stage_id,
            StageEnvelope::LeaveStage { account_id: self.account_id() },
        );
    }

    pub fn send_to_client(&self, packet: &ClientPacket) {
        let client_frame = match packet.encode() {
            Ok(bytes) => Payload::from_bytes(bytes),
            Err(e) => {
                error!(error = %e, "failed to encode client frame");
                return;
            }
        };
        let route_packet = RoutePacket::client_of(
            self.core.self_nid,
            self.core.service_id,
            self.sid.load(Ordering::Relaxed),
            self.stage_id,
            client_frame,
        );
        self.core.fire_and_forget(*self.session_nid.read().unwrap(), route_packet);
    }
}

impl ISender for ActorSender {
    fn core(&self) -> &SenderCore {
        &self.core
    }
}
