//! Per-node Stage registry and router.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use protocol::base_commands::{MSG_CREATE_STAGE, MSG_GET_OR_CREATE_STAGE};
use protocol::{ErrorCode, Nid, RoutePacket};
use tracing::warn;

use crate::mesh::MeshTransport;
use crate::offload::OffloadService;
use crate::request_cache::RequestCache;
use crate::timer::TimerService;
use super::actor::{ActorFactory, IStage, StageFactory};
use super::envelope::{StageEnvelope, StagePoster};
use super::{Stage, StageDeps};

/// The `StagePoster` every `TimerService`/`OffloadService`/sender in a node
/// shares: posting just looks the target Stage up in the same map the
/// dispatcher routes through.
struct PlayPoster {
    stages: Arc<DashMap<i64, Arc<Stage>>>,
}

impl StagePoster for PlayPoster {
    fn post(&self, stage_id: i64, envelope: StageEnvelope) {
        if let Some(stage) = self.stages.get(&stage_id) {
            stage.enqueue(envelope);
        } else {
            warn!(stage_id, "posted envelope for a Stage that no longer exists");
        }
    }

    fn register_timer_callback(&self, stage_id: i64, timer_id: u64, callback: Box<dyn FnMut(&mut dyn IStage) + Send>) {
        if let Some(stage) = self.stages.get(&stage_id) {
            stage.register_timer_callback(timer_id, callback);
        } else {
            warn!(stage_id, timer_id, "timer callback registered for a Stage that no longer exists");
        }
    }
}

/// Owns `map<stageId, Stage>` and the `stageType -> factory` registry
/// installed at bootstrap.
pub struct PlayDispatcher {
    self_nid: Nid,
    service_id: u32,
    transport: Arc<MeshTransport>,
    request_cache: Arc<RequestCache>,
    request_timeout: Duration,
    timer: Arc<TimerService>,
    offload: Arc<OffloadService>,
    poster: Arc<dyn StagePoster>,
    stages: Arc<DashMap<i64, Arc<Stage>>>,
    stage_factories: DashMap<String, StageFactory>,
    actor_factories: DashMap<String, ActorFactory>,
}

impl PlayDispatcher {
    /// Builds the dispatcher along with the Timer and Offload services that
    /// share its Stage map through a `PlayPoster`, so the caller never has
    /// to construct those independently of the Stages they post into.
    pub fn new(
        self_nid: Nid,
        service_id: u32,
        transport: Arc<MeshTransport>,
        request_cache: Arc<RequestCache>,
        request_timeout: Duration,
        io_concurrency: usize,
    ) -> Self {
        let stages: Arc<DashMap<i64, Arc<Stage>>> = Arc::new(DashMap::new());
        let poster: Arc<dyn StagePoster> = Arc::new(PlayPoster { stages: stages.clone() });
        let timer = Arc::new(TimerService::new(poster.clone()));
        let offload = Arc::new(OffloadService::new(poster.clone(), io_concurrency));

        Self {
            self_nid,
            service_id,
            transport,
            request_cache,
            request_timeout,
            timer,
            offload,
            poster,
            stages,
            stage_factories: DashMap::new(),
            actor_factories: DashMap::new(),
        }
    }

    pub fn register_stage_type(&self, stage_type: impl Into<String>, stage_factory: StageFactory, actor_factory: ActorFactory) {
        let stage_type = stage_type.into();
        self.stage_factories.insert(stage_type.clone(), stage_factory);
        self.actor_factories.insert(stage_type, actor_factory);
    }

    /// Non-blocking, approximate: summed over whatever Stages aren't mid-turn
    /// right now. Feeds the discovery gauge, not anything load-bearing.
    pub fn actor_count(&self) -> u32 {
        self.stages.iter().filter_map(|e| e.value().try_actor_count()).sum()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Routes an inbound RoutePacket to its Stage, creating one first if this
    /// is a `CreateStage`/`GetOrCreateStage` for an id with no Stage yet.
    pub fn route(&self, packet: RoutePacket) {
        let stage_id = packet.route_header.stage_id();
        let msg_id = packet.route_header.msg_id();
        let is_bootstrap = packet.route_header.is_base && (msg_id == MSG_CREATE_STAGE || msg_id == MSG_GET_OR_CREATE_STAGE);

        if is_bootstrap && !self.stages.contains_key(&stage_id) {
            match self.create_stage_instance(&packet) {
                Ok(stage) => {
                    self.stages.insert(stage_id, stage.clone());
                    stage.enqueue(StageEnvelope::Packet(packet));
                }
                Err(reason) => {
                    warn!(stage_id, reason = %reason, "failed to create stage for bootstrap packet");
                    self.reply_no_stage(&packet);
                }
            }
            return;
        }

        if let Some(stage) = self.stages.get(&stage_id) {
            stage.enqueue(StageEnvelope::Packet(packet));
        } else {
            warn!(stage_id, msg_id, "no stage for packet");
            self.reply_no_stage(&packet);
        }
    }

    fn create_stage_instance(&self, packet: &RoutePacket) -> Result<Arc<Stage>, String> {
        let stage_id = packet.route_header.stage_id();
        let msg_id = packet.route_header.msg_id();

        let stage_type = if msg_id == MSG_CREATE_STAGE {
            packet
                .decode_payload::<protocol::base_commands::CreateStageReq>()
                .map(|r| r.stage_type)
        } else {
            packet
                .decode_payload::<protocol::base_commands::GetOrCreateStageReq>()
                .map(|r| r.stage_type)
        }
        .map_err(|e| format!("malformed payload: {e}"))?;

        let stage_factory = self
            .stage_factories
            .get(&stage_type)
            .ok_or_else(|| format!("no Stage factory registered for stageType {stage_type:?}"))?
            .clone();
        let actor_factory = self
            .actor_factories
            .get(&stage_type)
            .ok_or_else(|| format!("no Actor factory registered for stageType {stage_type:?}"))?
            .clone();

        let stages = self.stages.clone();
        let on_destroyed: Box<dyn Fn(i64) + Send + Sync> = Box::new(move |id| {
            stages.remove(&id);
        });

        let deps = Arc::new(StageDeps {
            self_nid: self.self_nid,
            service_id: self.service_id,
            transport: self.transport.clone(),
            request_cache: self.request_cache.clone(),
            request_timeout: self.request_timeout,
            timer: self.timer.clone(),
            offload: self.offload.clone(),
            poster: self.poster.clone(),
        });

        Ok(Stage::new(stage_id, stage_type, stage_factory(), actor_factory, deps, on_destroyed))
    }

    fn reply_no_stage(&self, packet: &RoutePacket) {
        if packet.route_header.msg_seq() == 0 {
            return;
        }
        let reply = RoutePacket::reply_of(self.self_nid, self.service_id, &packet.route_header, ErrorCode::NoStage, None);
        self.transport.send(packet.route_header.from, reply);
    }
}
