//! Commander stats to AI behaviour profile

use serde::{Deserialize, Serialize};

use crate::battle::fleet::Formation;
use crate::battle::types::CharacterId;
use crate::world::CommanderStats;

/// Charm and command above these switch the commander to formation play
const FORMATION_CHARM: u8 = 70;
const FORMATION_COMMAND: u8 = 60;

/// Added to caution / thresholds when the situation turns
const OUTNUMBERED_CAUTION: f32 = 15.0;
const OUTNUMBERED_RETREAT: f32 = 5.0;
const LOW_SUPPLY_CAUTION: f32 = 10.0;
const LOW_SUPPLY_RETREAT: f32 = 5.0;
const WINNING_AGGRESSION: f32 = 15.0;

/// High-level fighting style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AiStrategy {
    Aggressive,
    Defensive,
    Cautious,
    Flanking,
    FocusFire,
    Kiting,
    Formation,
}

/// How an AI fleet ranks enemy fleets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPriority {
    Nearest,
    Weakest,
    Strongest,
    Damaged,
    Isolated,
    /// Largest commanded fleet, standing in for a flagship
    Flagship,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
    Expert,
}

impl Difficulty {
    /// Band the average of the five stats
    pub fn from_average(average: f32) -> Self {
        if average >= 85.0 {
            Difficulty::Expert
        } else if average >= 70.0 {
            Difficulty::Hard
        } else if average >= 50.0 {
            Difficulty::Normal
        } else {
            Difficulty::Easy
        }
    }
}

/// Numeric behaviour parameters for one AI-controlled fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiProfile {
    pub commander_id: Option<CharacterId>,
    /// 0-100
    pub aggressiveness: f32,
    /// 0-100
    pub caution: f32,
    /// Retreat at or below this hp percent
    pub retreat_threshold: f32,
    /// Retreat at or below this morale
    pub morale_threshold: f32,
    pub preferred_formation: Formation,
    /// Walked in order until one resolves a target
    pub target_priorities: Vec<TargetPriority>,
    /// Ticks between decisions
    pub reaction_ticks: u64,
    /// Ticks between attack orders
    pub attack_interval_ticks: u64,
    pub strategy: AiStrategy,
    pub fallback_strategy: AiStrategy,
    pub difficulty: Difficulty,
}

impl Default for AiProfile {
    /// Neutral profile for unknown commanders
    fn default() -> Self {
        AiProfileBuilder::from_stats(&CommanderStats::default())
    }
}

/// Conditions that shift a profile for the current tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SituationalFactors {
    pub outnumbered: bool,
    pub winning: bool,
    pub low_supply: bool,
}

/// Builds AI profiles from commander stats
pub struct AiProfileBuilder;

impl AiProfileBuilder {
    pub fn from_stats(stats: &CommanderStats) -> AiProfile {
        let command = stats.command as f32;
        let might = stats.might as f32;
        let intellect = stats.intellect as f32;
        let politics = stats.politics as f32;
        let charm = stats.charm as f32;

        let strategy = Self::preferred_strategy(stats);

        AiProfile {
            commander_id: None,
            aggressiveness: ((6.0 * might + 4.0 * command) / 10.0).clamp(0.0, 100.0),
            caution: ((5.0 * intellect + 5.0 * politics) / 10.0).clamp(0.0, 100.0),
            retreat_threshold: (20.0 + (3.0 * (politics - 50.0) + 2.0 * (intellect - 50.0)) / 10.0)
                .clamp(10.0, 50.0),
            morale_threshold: (25.0 + (2.0 * (charm - 50.0) + (command - 50.0)) / 10.0)
                .clamp(10.0, 40.0),
            preferred_formation: Self::formation_for(strategy),
            target_priorities: Self::target_priorities(strategy),
            reaction_ticks: Self::reaction_ticks(stats.intellect),
            attack_interval_ticks: Self::attack_interval_ticks(stats.might),
            strategy,
            fallback_strategy: Self::fallback_for(strategy),
            difficulty: Difficulty::from_average(stats.average()),
        }
    }

    /// Profile bound to a commander
    pub fn for_commander(commander_id: CharacterId, stats: &CommanderStats) -> AiProfile {
        AiProfile {
            commander_id: Some(commander_id),
            ..Self::from_stats(stats)
        }
    }

    /// Highest composite score wins; earlier entries win ties.
    /// Weights are tenths so integer stats score exactly.
    pub fn preferred_strategy(stats: &CommanderStats) -> AiStrategy {
        if stats.charm > FORMATION_CHARM && stats.command > FORMATION_COMMAND {
            return AiStrategy::Formation;
        }

        let command = stats.command as f32;
        let might = stats.might as f32;
        let intellect = stats.intellect as f32;
        let politics = stats.politics as f32;

        let scores = [
            (AiStrategy::Aggressive, 6.0 * might + 4.0 * command),
            (AiStrategy::Defensive, 5.0 * politics + 3.0 * command + 2.0 * intellect),
            (AiStrategy::Flanking, 6.0 * intellect + 4.0 * command),
            (AiStrategy::FocusFire, 5.0 * command + 3.0 * intellect + 2.0 * might),
            (AiStrategy::Kiting, 5.0 * intellect + 3.0 * might + 2.0 * politics),
        ];

        let mut best = scores[0];
        for candidate in &scores[1..] {
            if candidate.1 > best.1 {
                best = *candidate;
            }
        }
        best.0
    }

    pub fn fallback_for(strategy: AiStrategy) -> AiStrategy {
        match strategy {
            AiStrategy::Aggressive => AiStrategy::FocusFire,
            AiStrategy::Defensive => AiStrategy::Cautious,
            AiStrategy::Cautious => AiStrategy::Defensive,
            AiStrategy::Flanking => AiStrategy::Aggressive,
            AiStrategy::FocusFire => AiStrategy::Aggressive,
            AiStrategy::Kiting => AiStrategy::Cautious,
            AiStrategy::Formation => AiStrategy::Defensive,
        }
    }

    pub fn formation_for(strategy: AiStrategy) -> Formation {
        match strategy {
            AiStrategy::Aggressive => Formation::Wedge,
            AiStrategy::Defensive | AiStrategy::Cautious => Formation::Circle,
            AiStrategy::Flanking | AiStrategy::Kiting => Formation::Spread,
            AiStrategy::FocusFire => Formation::Line,
            AiStrategy::Formation => Formation::Column,
        }
    }

    pub fn target_priorities(strategy: AiStrategy) -> Vec<TargetPriority> {
        use TargetPriority::*;
        match strategy {
            AiStrategy::Aggressive => vec![Nearest, Weakest],
            AiStrategy::Defensive => vec![Nearest, Strongest],
            AiStrategy::Cautious => vec![Weakest, Nearest],
            AiStrategy::Flanking => vec![Isolated, Weakest, Nearest],
            AiStrategy::FocusFire => vec![Damaged, Weakest, Nearest],
            AiStrategy::Kiting => vec![Nearest, Damaged],
            AiStrategy::Formation => vec![Flagship, Strongest, Nearest],
        }
    }

    /// 30 ticks at intellect 0 down to 5 at intellect 100
    pub fn reaction_ticks(intellect: u8) -> u64 {
        (30.0 - 0.25 * intellect.min(100) as f32).round().clamp(5.0, 30.0) as u64
    }

    /// 20 ticks at might 0 down to 5 at might 100
    pub fn attack_interval_ticks(might: u8) -> u64 {
        (20.0 - 0.15 * might.min(100) as f32).round().clamp(5.0, 20.0) as u64
    }

    /// Shift a profile for the current situation. Only ever raises values.
    pub fn adjust(profile: &AiProfile, factors: SituationalFactors) -> AiProfile {
        let mut adjusted = profile.clone();
        if factors.outnumbered {
            adjusted.caution += OUTNUMBERED_CAUTION;
            adjusted.retreat_threshold += OUTNUMBERED_RETREAT;
        }
        if factors.low_supply {
            adjusted.caution += LOW_SUPPLY_CAUTION;
            adjusted.retreat_threshold += LOW_SUPPLY_RETREAT;
        }
        if factors.winning {
            adjusted.aggressiveness += WINNING_AGGRESSION;
        }

        adjusted.caution = adjusted.caution.min(100.0);
        adjusted.aggressiveness = adjusted.aggressiveness.min(100.0);
        adjusted.retreat_threshold = adjusted.retreat_threshold.min(50.0);
        adjusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_stats_give_baseline_profile() {
        let profile = AiProfile::default();
        assert_eq!(profile.aggressiveness, 50.0);
        assert_eq!(profile.caution, 50.0);
        assert_eq!(profile.retreat_threshold, 20.0);
        assert_eq!(profile.morale_threshold, 25.0);
        assert_eq!(profile.difficulty, Difficulty::Normal);
        // All composites tie at 50, first listed wins
        assert_eq!(profile.strategy, AiStrategy::Aggressive);
        assert_eq!(profile.fallback_strategy, AiStrategy::FocusFire);
    }

    #[test]
    fn thresholds_are_clamped() {
        let timid = AiProfileBuilder::from_stats(&CommanderStats::new(100, 0, 100, 100, 100));
        assert_eq!(timid.retreat_threshold, 45.0);
        assert_eq!(timid.morale_threshold, 40.0);

        let reckless = AiProfileBuilder::from_stats(&CommanderStats::new(0, 100, 0, 0, 0));
        assert_eq!(reckless.retreat_threshold, 10.0);
        assert_eq!(reckless.morale_threshold, 10.0);
        assert_eq!(reckless.strategy, AiStrategy::Aggressive);
        assert_eq!(reckless.difficulty, Difficulty::Easy);
    }

    #[test]
    fn charismatic_commanders_fight_in_formation() {
        let stats = CommanderStats::new(65, 40, 40, 40, 75);
        assert_eq!(AiProfileBuilder::preferred_strategy(&stats), AiStrategy::Formation);

        let stats = CommanderStats::new(60, 40, 40, 40, 75);
        assert_ne!(AiProfileBuilder::preferred_strategy(&stats), AiStrategy::Formation);
    }

    #[test]
    fn intellect_favours_flanking_and_fast_reactions() {
        let stats = CommanderStats::new(60, 30, 95, 30, 30);
        let profile = AiProfileBuilder::from_stats(&stats);
        assert_eq!(profile.strategy, AiStrategy::Flanking);
        assert_eq!(profile.target_priorities[0], TargetPriority::Isolated);
        assert!(profile.reaction_ticks < AiProfile::default().reaction_ticks);
        assert_eq!(AiProfileBuilder::reaction_ticks(100), 5);
        assert_eq!(AiProfileBuilder::reaction_ticks(0), 30);
        assert_eq!(AiProfileBuilder::attack_interval_ticks(100), 5);
        assert_eq!(AiProfileBuilder::attack_interval_ticks(0), 20);
    }

    #[test]
    fn difficulty_bands() {
        assert_eq!(Difficulty::from_average(85.0), Difficulty::Expert);
        assert_eq!(Difficulty::from_average(84.9), Difficulty::Hard);
        assert_eq!(Difficulty::from_average(70.0), Difficulty::Hard);
        assert_eq!(Difficulty::from_average(50.0), Difficulty::Normal);
        assert_eq!(Difficulty::from_average(49.0), Difficulty::Easy);
    }

    #[test]
    fn adjustment_raises_caution_when_outnumbered() {
        let base = AiProfile::default();
        let adjusted = AiProfileBuilder::adjust(
            &base,
            SituationalFactors {
                outnumbered: true,
                low_supply: true,
                winning: false,
            },
        );
        assert_eq!(adjusted.caution, 75.0);
        assert_eq!(adjusted.retreat_threshold, 30.0);
        assert_eq!(adjusted.aggressiveness, base.aggressiveness);

        let winning = AiProfileBuilder::adjust(
            &base,
            SituationalFactors {
                winning: true,
                ..SituationalFactors::default()
            },
        );
        assert_eq!(winning.aggressiveness, 65.0);
    }
}
