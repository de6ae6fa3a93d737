//! Reward and progression contracts consumed by the reconciler.
//!
//! The reconciler only needs these to be deterministic functions of their
//! inputs. `StandardRewards` and `StandardProgression` are simple linear
//! implementations so the daemon runs without a game-balance layer plugged in.

use serde::{Deserialize, Serialize};

use crate::session::SessionResult;
use crate::types::{Player, Progression, StatVector};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub primary_currency: u64,
    pub secondary_currency: u64,
    pub boss_damage: u64,
    pub was_critical_hit: bool,
}

pub trait RewardCalculator: Send + Sync {
    fn calculate(&self, result: &SessionResult, stats: &StatVector) -> Reward;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperienceOutcome {
    pub new_level: u32,
    pub leveled_up: bool,
    pub skill_points_granted: u32,
    /// Experience carried into the new level.
    pub experience: u64,
    pub experience_to_next_level: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BossSpawn {
    pub index: u32,
    pub resolve: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BossOutcome {
    pub remaining_resolve: u64,
    pub was_defeated: bool,
    pub next_boss: Option<BossSpawn>,
}

pub trait ProgressionManager: Send + Sync {
    fn add_experience(&self, amount: u64, player: &Player) -> ExperienceOutcome;
    fn damage_boss(&self, amount: u64, progression: &Progression, player_level: u32)
        -> BossOutcome;
    /// Experience needed to advance from `level` to the next.
    fn level_threshold(&self, level: u32) -> u64;
}

// ─────────────────────────────────────────────────────────────────────────────
// Standard implementations
// ─────────────────────────────────────────────────────────────────────────────

/// Per-minute linear rewards scaled by the stat vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardRewards {
    pub currency_per_minute: f64,
    pub experience_per_minute: f64,
    pub damage_per_minute: f64,
    /// Multiplier applied to everything when the session was compromised.
    pub compromised_multiplier: f64,
    /// Uncompromised sessions at least this long land a critical hit.
    pub critical_minutes: u64,
}

impl Default for StandardRewards {
    fn default() -> Self {
        Self {
            currency_per_minute: 1.0,
            experience_per_minute: 4.0,
            damage_per_minute: 2.0,
            compromised_multiplier: 0.5,
            critical_minutes: 45,
        }
    }
}

impl RewardCalculator for StandardRewards {
    fn calculate(&self, result: &SessionResult, stats: &StatVector) -> Reward {
        let minutes = result.active_seconds / 60;
        let multiplier = if result.is_compromised {
            self.compromised_multiplier
        } else {
            1.0
        };
        let scaled = |rate: f64, stat: f64| -> u64 {
            let value = minutes as f64 * rate * stat.max(0.0) * multiplier;
            if value.is_finite() {
                value.floor() as u64
            } else {
                0
            }
        };

        let was_critical_hit = !result.is_compromised && minutes >= self.critical_minutes;
        let mut boss_damage = scaled(self.damage_per_minute, stats.soulflow);
        if was_critical_hit {
            boss_damage = boss_damage.saturating_mul(2);
        }

        Reward {
            primary_currency: scaled(self.currency_per_minute, stats.spirit),
            secondary_currency: scaled(self.experience_per_minute, stats.harmony),
            boss_damage,
            was_critical_hit,
        }
    }
}

/// Linear level curve and boss ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardProgression {
    pub experience_per_level: u64,
    pub skill_points_per_level: u32,
    pub base_boss_resolve: u64,
    pub resolve_per_boss: u64,
    pub resolve_per_player_level: u64,
}

impl Default for StandardProgression {
    fn default() -> Self {
        Self {
            experience_per_level: 100,
            skill_points_per_level: 1,
            base_boss_resolve: 100,
            resolve_per_boss: 50,
            resolve_per_player_level: 10,
        }
    }
}

impl StandardProgression {
    pub fn boss_resolve(&self, index: u32, player_level: u32) -> u64 {
        self.base_boss_resolve
            .saturating_add(self.resolve_per_boss.saturating_mul(u64::from(index)))
            .saturating_add(
                self.resolve_per_player_level
                    .saturating_mul(u64::from(player_level.saturating_sub(1))),
            )
    }
}

impl ProgressionManager for StandardProgression {
    fn add_experience(&self, amount: u64, player: &Player) -> ExperienceOutcome {
        let mut level = player.level.max(1);
        let mut experience = player.experience.saturating_add(amount);
        let mut skill_points_granted = 0;

        loop {
            let threshold = self.level_threshold(level);
            if threshold == 0 || experience < threshold {
                break;
            }
            experience -= threshold;
            level = level.saturating_add(1);
            skill_points_granted += self.skill_points_per_level;
        }

        ExperienceOutcome {
            new_level: level,
            leveled_up: level > player.level.max(1),
            skill_points_granted,
            experience,
            experience_to_next_level: self.level_threshold(level),
        }
    }

    fn damage_boss(
        &self,
        amount: u64,
        progression: &Progression,
        player_level: u32,
    ) -> BossOutcome {
        let remaining = progression.current_boss_resolve.saturating_sub(amount);
        if amount == 0 || remaining > 0 {
            return BossOutcome {
                remaining_resolve: remaining,
                was_defeated: false,
                next_boss: None,
            };
        }

        let index = progression.current_boss_index.saturating_add(1);
        BossOutcome {
            remaining_resolve: 0,
            was_defeated: true,
            next_boss: Some(BossSpawn {
                index,
                resolve: self.boss_resolve(index, player_level),
            }),
        }
    }

    fn level_threshold(&self, level: u32) -> u64 {
        self.experience_per_level
            .saturating_mul(u64::from(level.max(1)))
    }
}
