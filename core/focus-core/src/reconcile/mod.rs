//! Timer orchestration and retroactive settlement.

mod contracts;
mod idle;
mod reconciler;
mod scheduler;

pub use contracts::{
    BossOutcome, BossSpawn, ExperienceOutcome, ProgressionManager, Reward, RewardCalculator,
    StandardProgression, StandardRewards,
};
pub use idle::{collect_idle, IdleCollection, IdleEconomy};
pub use reconciler::{
    BreakClose, FireOutcome, IdleCollected, ReconcilerOptions, ResumeReport, ScheduleReconciler,
    SessionClose, StartRequest, TimerPhase,
};
pub use scheduler::{ManualScheduler, Scheduler, TimerKind, TimerSpec};
