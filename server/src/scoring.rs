//! Round scoring and leaderboard ordering.

use crate::config::ScoringConfig;
use crate::roster::Roster;
use shared::{ConnectionId, LeaderboardEntry, PlayerOutcome, Question};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Points for a correct answer given `elapsed` since the round opened.
///
/// Decays linearly from `base_points` to `base_points * min_fraction` over the
/// time budget; anything slower than the budget earns nothing.
pub fn points_for(config: &ScoringConfig, elapsed: Duration) -> u32 {
    if elapsed > config.time_budget {
        return 0;
    }
    let budget = config.time_budget.as_secs_f64();
    let fraction = (1.0 - elapsed.as_secs_f64() / budget).max(config.min_fraction);
    (config.base_points as f64 * fraction).round() as u32
}

/// Scores every player who answered `question` and credits their totals.
///
/// Crediting goes through [`crate::roster::Player::award`], so calling this
/// again for the same question reports the same outcomes without adding
/// points twice.
pub fn score_round(
    roster: &mut Roster,
    question_index: usize,
    question: &Question,
    round_started: Instant,
    config: &ScoringConfig,
) -> BTreeMap<ConnectionId, PlayerOutcome> {
    let mut results = BTreeMap::new();

    for player in roster.iter_mut() {
        let Some(answer) = player.current_answer else {
            continue;
        };

        let elapsed = answer.at.saturating_duration_since(round_started);
        let in_time = elapsed <= config.time_budget;
        let correct = in_time && answer.index == question.correct_index;
        let points = if correct { points_for(config, elapsed) } else { 0 };

        // A question already credited reports what it earned the first time
        let score_added = if player.is_scored(question_index) {
            player.awarded_for(question_index).unwrap_or(0)
        } else {
            player.award(question_index, points);
            points
        };

        results.insert(
            player.connection_id,
            PlayerOutcome {
                nickname: player.nickname.clone(),
                correct,
                score_added,
            },
        );
    }

    results
}

/// Players by score, highest first; ties keep join order.
pub fn leaderboard(roster: &Roster) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = roster
        .iter()
        .map(|p| LeaderboardEntry {
            nickname: p.nickname.clone(),
            score: p.score,
        })
        .collect();
    // sort_by is stable
    entries.sort_by(|a, b| b.score.cmp(&a.score));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn config() -> ScoringConfig {
        ScoringConfig {
            base_points: 1000,
            time_budget: Duration::from_secs(20),
            min_fraction: 0.1,
        }
    }

    fn question() -> Question {
        Question::new("What is 2 + 2?", &["3", "4", "5", "6"], 1)
    }

    #[test]
    fn test_points_decay_with_latency() {
        let config = config();
        assert_eq!(points_for(&config, Duration::ZERO), 1000);
        assert_eq!(points_for(&config, Duration::from_secs(5)), 750);
        assert_eq!(points_for(&config, Duration::from_secs(10)), 500);
        assert!(
            points_for(&config, Duration::from_secs(1)) > points_for(&config, Duration::from_secs(2))
        );
    }

    #[test]
    fn test_points_follow_linear_curve() {
        let config = config();
        for millis in (0..=18_000).step_by(1_500) {
            let elapsed = Duration::from_millis(millis);
            let expected = 1000.0 * (1.0 - millis as f64 / 20_000.0);
            assert_approx_eq!(points_for(&config, elapsed) as f64, expected, 0.5);
        }
    }

    #[test]
    fn test_points_floor_within_budget() {
        let config = config();
        assert_eq!(points_for(&config, Duration::from_secs(19)), 100);
        assert_eq!(points_for(&config, Duration::from_secs(20)), 100);
        assert_eq!(points_for(&config, Duration::from_millis(20_001)), 0);
    }

    #[test]
    fn test_points_round_to_nearest() {
        let config = ScoringConfig {
            base_points: 10,
            time_budget: Duration::from_secs(3),
            min_fraction: 0.01,
        };
        // 10 * (1 - 1/3) = 6.67
        assert_eq!(points_for(&config, Duration::from_secs(1)), 7);
    }

    #[test]
    fn test_score_round_outcomes() {
        let config = config();
        let start = Instant::now();
        let mut roster = Roster::new(20);
        roster.add(1, "Ana").unwrap();
        roster.add(2, "Bo").unwrap();
        roster.add(3, "Cy").unwrap();

        roster
            .get_mut(1)
            .unwrap()
            .record_answer(1, start + Duration::from_secs(2));
        roster
            .get_mut(2)
            .unwrap()
            .record_answer(0, start + Duration::from_secs(1));

        let results = score_round(&mut roster, 0, &question(), start, &config);

        assert_eq!(results.len(), 2);
        let ana = &results[&1];
        assert!(ana.correct);
        assert_eq!(ana.score_added, 900);
        let bo = &results[&2];
        assert!(!bo.correct);
        assert_eq!(bo.score_added, 0);
        // Cy never answered
        assert!(!results.contains_key(&3));

        assert_eq!(roster.get(1).unwrap().score, 900);
        assert_eq!(roster.get(2).unwrap().score, 0);
    }

    #[test]
    fn test_late_correct_answer_scores_nothing() {
        let config = config();
        let start = Instant::now();
        let mut roster = Roster::new(20);
        roster.add(1, "Ana").unwrap();
        roster
            .get_mut(1)
            .unwrap()
            .record_answer(1, start + Duration::from_secs(25));

        let results = score_round(&mut roster, 0, &question(), start, &config);

        assert!(!results[&1].correct);
        assert_eq!(results[&1].score_added, 0);
        assert_eq!(roster.get(1).unwrap().score, 0);
    }

    #[test]
    fn test_score_round_is_idempotent() {
        let config = config();
        let start = Instant::now();
        let mut roster = Roster::new(20);
        roster.add(1, "Ana").unwrap();
        roster
            .get_mut(1)
            .unwrap()
            .record_answer(1, start + Duration::from_secs(4));

        let first = score_round(&mut roster, 0, &question(), start, &config);
        let second = score_round(&mut roster, 0, &question(), start, &config);

        assert_eq!(first, second);
        assert_eq!(roster.get(1).unwrap().score, 800);
        assert_eq!(roster.get(1).unwrap().audited_score(), 800);
    }

    #[test]
    fn test_rescoring_reports_first_credit() {
        let config = config();
        let start = Instant::now();
        let mut roster = Roster::new(20);
        roster.add(1, "Ana").unwrap();
        roster
            .get_mut(1)
            .unwrap()
            .record_answer(1, start + Duration::from_secs(4));
        score_round(&mut roster, 0, &question(), start, &config);

        // A later, faster answer for the same question changes nothing
        roster
            .get_mut(1)
            .unwrap()
            .record_answer(1, start + Duration::from_secs(1));
        let again = score_round(&mut roster, 0, &question(), start, &config);

        assert_eq!(again[&1].score_added, 800);
        assert!(roster.get(1).unwrap().is_scored(0));
        assert_eq!(roster.get(1).unwrap().score, 800);
    }

    #[test]
    fn test_leaderboard_orders_by_score_then_join() {
        let mut roster = Roster::new(20);
        roster.add(1, "Ana").unwrap();
        roster.add(2, "Bo").unwrap();
        roster.add(3, "Cy").unwrap();
        roster.add(4, "Di").unwrap();

        roster.get_mut(2).unwrap().award(0, 500);
        roster.get_mut(4).unwrap().award(0, 500);
        roster.get_mut(3).unwrap().award(0, 900);

        let board = leaderboard(&roster);
        let names: Vec<&str> = board.iter().map(|e| e.nickname.as_str()).collect();
        assert_eq!(names, vec!["Cy", "Bo", "Di", "Ana"]);
        assert_eq!(board[0].score, 900);
        assert_eq!(board[3].score, 0);
    }
}
