//! Internal-only messages a Stage's event loop consumes alongside wire-level
//! [`RoutePacket`]s. `TimerFire`/`AsyncPostBack` never cross the network —
//! conceptually they're RoutePacket factories (`timerOf`, `asyncPostOf`), but
//! since they carry in-process callbacks/results that can't generically
//! serialize, they're kept as a plain Rust enum next to the loop instead of
//! forced into the wire schema.

use std::any::Any;

use protocol::RoutePacket;

pub enum StageEnvelope {
    /// A RoutePacket from the mesh, a local sender, or a session handler.
    Packet(RoutePacket),
    /// Posted by the Timer Service when a timer fires.
    TimerFire { timer_id: u64 },
    /// Posted by an offload worker after `preCb` completes.
    AsyncPostBack {
        token: u64,
        result: Box<dyn Any + Send>,
    },
    /// `IActorSender::leave_stage`: actor removal must run
    /// inside the owning Stage's turn, not on the caller's thread.
    LeaveStage { account_id: String },
}

impl std::fmt::Debug for StageEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageEnvelope::Packet(p) => f.debug_tuple("Packet").field(&p.route_header.msg_id()).finish(),
            StageEnvelope::TimerFire { timer_id } => {
                f.debug_struct("TimerFire").field("timer_id", timer_id).finish()
            }
            StageEnvelope::AsyncPostBack { token, .. } => {
                f.debug_struct("AsyncPostBack").field("token", token).finish()
            }
            StageEnvelope::LeaveStage { account_id } => {
                f.debug_struct("LeaveStage").field("account_id", account_id).finish()
            }
        }
    }
}

/// Lets the Timer Service and Offload Service post into an arbitrary Stage's
/// queue without depending on the Stage/PlayDispatcher internals directly.
pub trait StagePoster: Send + Sync {
    fn post(&self, stage_id: i64, envelope: StageEnvelope);

    /// Records the user callback for a timer a `StageSender` just armed.
    /// Bookkeeping only — it does not touch `IStage` state, so it runs
    /// immediately rather than going through the queue.
    fn register_timer_callback(
        &self,
        stage_id: i64,
        timer_id: u64,
        callback: Box<dyn FnMut(&mut dyn crate::stage::actor::IStage) + Send>,
    );
}
