//! Award scoring over participants, predictions, and consumption counts.
//!
//! Four rankings are computed independently and may share winners:
//!
//! 1. **Most consumed** -- highest own consumption count.
//! 2. **Best predictor** -- lowest mean absolute error (MAE) among
//!    predictors that covered enough of the other participants.
//! 3. **Hardest to predict** -- highest crowd MAE as a target, for targets
//!    predicted by at least [`MIN_CROWD_SIZE`] participants.
//! 4. **Worst predictor** -- highest MAE over the same eligible set as (2).
//!
//! Ties are never broken: every participant sharing the winning value is
//! a winner. With no participants there are no awards; with no usable
//! predictions only "most consumed" is produced.

use std::collections::HashMap;

use tallyboard_types::{Award, AwardKind, AwardWinner, Participant, ParticipantId, Prediction};

use crate::store::EventStore;

/// Coverage thresholds tried in order before falling back to "at least
/// one prediction".
pub const COVERAGE_LADDER: [f64; 2] = [0.5, 0.33];

/// Minimum number of predictors a target needs to be ranked as hardest
/// to predict.
pub const MIN_CROWD_SIZE: usize = 2;

/// Values closer than this are treated as tied.
const TIE_EPSILON: f64 = 1e-9;

/// Compute every award from the current store contents.
pub fn awards_for(store: &EventStore) -> Vec<Award> {
    compute_awards(
        store.participants(),
        store.predictions(),
        &store.consumption_counts(),
    )
}

/// Compute every award from explicit inputs.
///
/// Predictions referencing unknown participants, or a participant
/// predicting themselves, are ignored. Participants missing from
/// `consumed` count as zero.
pub fn compute_awards(
    participants: &[Participant],
    predictions: &[Prediction],
    consumed: &HashMap<ParticipantId, u32>,
) -> Vec<Award> {
    if participants.is_empty() {
        return Vec::new();
    }
    let actual = |id: ParticipantId| consumed.get(&id).copied().unwrap_or(0);

    let mut awards = vec![most_consumed(participants, &actual)];

    let known = |id: ParticipantId| participants.iter().any(|p| p.id == id);
    let usable: Vec<&Prediction> = predictions
        .iter()
        .filter(|p| p.predictor_id != p.target_id && known(p.predictor_id) && known(p.target_id))
        .collect();
    if usable.is_empty() {
        return awards;
    }

    let scores = predictor_scores(participants, &usable, &actual);
    let others = participants.len().saturating_sub(1);
    let (eligible, threshold) = eligible_predictors(&scores, others);

    awards.push(Award {
        kind: AwardKind::BestPredictor,
        winners: winners(participants, &eligible, Extreme::Min),
        coverage_threshold: threshold,
    });

    if let Some(hardest) = hardest_to_predict(participants, &usable, &actual) {
        awards.push(hardest);
    }

    awards.push(Award {
        kind: AwardKind::WorstPredictor,
        winners: winners(participants, &eligible, Extreme::Max),
        coverage_threshold: threshold,
    });

    awards
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extreme {
    Min,
    Max,
}

/// Accumulated absolute error for one participant.
#[derive(Debug, Clone, Copy)]
struct ErrorSum {
    id: ParticipantId,
    count: u32,
    total_error: u32,
}

impl ErrorSum {
    fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        f64::from(self.total_error) / f64::from(self.count)
    }
}

fn most_consumed(participants: &[Participant], actual: &impl Fn(ParticipantId) -> u32) -> Award {
    let best = participants.iter().map(|p| actual(p.id)).max().unwrap_or(0);
    Award {
        kind: AwardKind::MostConsumed,
        winners: participants
            .iter()
            .filter(|p| actual(p.id) == best)
            .map(|p| AwardWinner {
                participant_id: p.id,
                name: p.name.clone(),
                value: f64::from(best),
            })
            .collect(),
        coverage_threshold: None,
    }
}

/// Per-predictor error sums, in participant order, for predictors with at
/// least one usable prediction.
fn predictor_scores(
    participants: &[Participant],
    usable: &[&Prediction],
    actual: &impl Fn(ParticipantId) -> u32,
) -> Vec<ErrorSum> {
    participants
        .iter()
        .filter_map(|p| {
            let mine = usable.iter().filter(|pred| pred.predictor_id == p.id);
            let mut sum = ErrorSum {
                id: p.id,
                count: 0,
                total_error: 0,
            };
            for pred in mine {
                sum.count = sum.count.saturating_add(1);
                sum.total_error = sum
                    .total_error
                    .saturating_add(pred.predicted_drinks.abs_diff(actual(pred.target_id)));
            }
            (sum.count > 0).then_some(sum)
        })
        .collect()
}

/// Walk the coverage ladder and return the first non-empty eligible set,
/// with the threshold that admitted it (`None` for the final fallback).
fn eligible_predictors(scores: &[ErrorSum], others: usize) -> (Vec<ErrorSum>, Option<f64>) {
    let Ok(others) = u32::try_from(others) else {
        return (scores.to_vec(), None);
    };
    if others > 0 {
        for threshold in COVERAGE_LADDER {
            let eligible: Vec<ErrorSum> = scores
                .iter()
                .filter(|s| f64::from(s.count) / f64::from(others) + TIE_EPSILON >= threshold)
                .copied()
                .collect();
            if !eligible.is_empty() {
                return (eligible, Some(threshold));
            }
        }
    }
    (scores.to_vec(), None)
}

fn hardest_to_predict(
    participants: &[Participant],
    usable: &[&Prediction],
    actual: &impl Fn(ParticipantId) -> u32,
) -> Option<Award> {
    let crowd: Vec<ErrorSum> = participants
        .iter()
        .filter_map(|target| {
            let about: Vec<&&Prediction> =
                usable.iter().filter(|pred| pred.target_id == target.id).collect();
            if about.len() < MIN_CROWD_SIZE {
                return None;
            }
            let truth = actual(target.id);
            Some(ErrorSum {
                id: target.id,
                count: u32::try_from(about.len()).unwrap_or(u32::MAX),
                total_error: about.iter().fold(0_u32, |acc, pred| {
                    acc.saturating_add(pred.predicted_drinks.abs_diff(truth))
                }),
            })
        })
        .collect();
    if crowd.is_empty() {
        return None;
    }
    Some(Award {
        kind: AwardKind::HardestToPredict,
        winners: winners(participants, &crowd, Extreme::Max),
        coverage_threshold: None,
    })
}

/// All entries tied for the extreme mean, in input order.
fn winners(participants: &[Participant], sums: &[ErrorSum], extreme: Extreme) -> Vec<AwardWinner> {
    let means = sums.iter().map(ErrorSum::mean);
    let target = match extreme {
        Extreme::Min => means.fold(f64::INFINITY, f64::min),
        Extreme::Max => means.fold(f64::NEG_INFINITY, f64::max),
    };
    sums.iter()
        .filter(|s| (s.mean() - target).abs() <= TIE_EPSILON)
        .filter_map(|s| {
            participants.iter().find(|p| p.id == s.id).map(|p| AwardWinner {
                participant_id: p.id,
                name: p.name.clone(),
                value: s.mean(),
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::float_cmp)]
mod tests {
    use tallyboard_types::PredictionId;

    use super::*;

    fn people(names: &[&str]) -> Vec<Participant> {
        names
            .iter()
            .map(|name| Participant {
                id: ParticipantId::new(),
                name: (*name).to_owned(),
                avatar_ref: None,
                self_estimate: 0,
            })
            .collect()
    }

    fn guess(from: &Participant, to: &Participant, drinks: u32) -> Prediction {
        Prediction {
            id: PredictionId::new(),
            predictor_id: from.id,
            target_id: to.id,
            predicted_drinks: drinks,
        }
    }

    fn award(awards: &[Award], kind: AwardKind) -> Option<&Award> {
        awards.iter().find(|a| a.kind == kind)
    }

    fn winner_names(award: &Award) -> Vec<&str> {
        award.winners.iter().map(|w| w.name.as_str()).collect()
    }

    #[test]
    fn no_participants_no_awards() {
        assert!(compute_awards(&[], &[], &HashMap::new()).is_empty());
    }

    #[test]
    fn no_predictions_only_most_consumed() {
        let ps = people(&["Ada", "Bob"]);
        let consumed = HashMap::from([(ps[0].id, 2), (ps[1].id, 5)]);
        let awards = compute_awards(&ps, &[], &consumed);
        assert_eq!(awards.len(), 1);
        assert_eq!(awards[0].kind, AwardKind::MostConsumed);
        assert_eq!(winner_names(&awards[0]), ["Bob"]);
        assert_eq!(awards[0].winners[0].value, 5.0);
    }

    #[test]
    fn most_consumed_keeps_ties() {
        let ps = people(&["Ada", "Bob", "Cy"]);
        let consumed = HashMap::from([(ps[0].id, 3), (ps[1].id, 1), (ps[2].id, 3)]);
        let awards = compute_awards(&ps, &[], &consumed);
        assert_eq!(winner_names(&awards[0]), ["Ada", "Cy"]);
    }

    #[test]
    fn two_person_scenario() {
        let ps = people(&["A", "B"]);
        let predictions = vec![guess(&ps[0], &ps[1], 5), guess(&ps[1], &ps[0], 3)];
        let consumed = HashMap::from([(ps[0].id, 4), (ps[1].id, 5)]);
        let awards = compute_awards(&ps, &predictions, &consumed);

        let best = award(&awards, AwardKind::BestPredictor).unwrap();
        assert_eq!(winner_names(best), ["A"]);
        assert_eq!(best.winners[0].value, 0.0);

        let worst = award(&awards, AwardKind::WorstPredictor).unwrap();
        assert_eq!(winner_names(worst), ["B"]);
        assert_eq!(worst.winners[0].value, 1.0);

        // One predictor per target is below the crowd minimum.
        assert!(award(&awards, AwardKind::HardestToPredict).is_none());
    }

    #[test]
    fn perfect_predictions_tie_best_and_worst() {
        let ps = people(&["A", "B", "C"]);
        let consumed = HashMap::from([(ps[0].id, 1), (ps[1].id, 2), (ps[2].id, 3)]);
        let mut predictions = Vec::new();
        for from in &ps {
            for to in &ps {
                if from.id != to.id {
                    predictions.push(guess(from, to, consumed[&to.id]));
                }
            }
        }
        let awards = compute_awards(&ps, &predictions, &consumed);
        let best = award(&awards, AwardKind::BestPredictor).unwrap();
        let worst = award(&awards, AwardKind::WorstPredictor).unwrap();
        assert_eq!(best.winners, worst.winners);
        assert_eq!(best.winners.len(), 3);
    }

    #[test]
    fn coverage_ladder_prefers_well_covered_predictors() {
        // Five participants, four possible targets each. Ada covers all
        // four with error 2; Bob covers one with error 0.
        let ps = people(&["Ada", "Bob", "Cy", "Di", "Ed"]);
        let consumed: HashMap<_, _> = ps.iter().map(|p| (p.id, 2)).collect();
        let mut predictions: Vec<_> = ps[1..].iter().map(|t| guess(&ps[0], t, 4)).collect();
        predictions.push(guess(&ps[1], &ps[2], 2));

        let awards = compute_awards(&ps, &predictions, &consumed);
        let best = award(&awards, AwardKind::BestPredictor).unwrap();
        assert_eq!(winner_names(best), ["Ada"]);
        assert_eq!(best.coverage_threshold, Some(0.5));
    }

    #[test]
    fn coverage_ladder_relaxes_to_a_third() {
        // Seven participants, six possible targets. Two predictions is
        // 0.33 coverage, below one half.
        let ps = people(&["A", "B", "C", "D", "E", "F", "G"]);
        let consumed: HashMap<_, _> = ps.iter().map(|p| (p.id, 0)).collect();
        let predictions = vec![
            guess(&ps[0], &ps[1], 1),
            guess(&ps[0], &ps[2], 1),
            guess(&ps[3], &ps[4], 0),
        ];
        let awards = compute_awards(&ps, &predictions, &consumed);
        let best = award(&awards, AwardKind::BestPredictor).unwrap();
        assert_eq!(best.coverage_threshold, Some(0.33));
        assert_eq!(winner_names(best), ["A"]);
    }

    #[test]
    fn coverage_ladder_falls_back_to_any_prediction() {
        let ps = people(&["A", "B", "C", "D", "E", "F", "G", "H"]);
        let consumed: HashMap<_, _> = ps.iter().map(|p| (p.id, 3)).collect();
        let predictions = vec![guess(&ps[0], &ps[1], 5), guess(&ps[2], &ps[3], 3)];
        let awards = compute_awards(&ps, &predictions, &consumed);

        let best = award(&awards, AwardKind::BestPredictor).unwrap();
        assert_eq!(best.coverage_threshold, None);
        assert_eq!(winner_names(best), ["C"]);

        let worst = award(&awards, AwardKind::WorstPredictor).unwrap();
        assert_eq!(winner_names(worst), ["A"]);
    }

    #[test]
    fn hardest_to_predict_uses_crowd_error() {
        let ps = people(&["A", "B", "C"]);
        let consumed = HashMap::from([(ps[0].id, 10), (ps[1].id, 2), (ps[2].id, 2)]);
        let predictions = vec![
            guess(&ps[1], &ps[0], 2),
            guess(&ps[2], &ps[0], 4),
            guess(&ps[0], &ps[1], 2),
            guess(&ps[2], &ps[1], 3),
        ];
        let awards = compute_awards(&ps, &predictions, &consumed);
        let hardest = award(&awards, AwardKind::HardestToPredict).unwrap();
        assert_eq!(winner_names(hardest), ["A"]);
        assert_eq!(hardest.winners[0].value, 7.0);
    }

    #[test]
    fn dangling_and_self_predictions_are_ignored() {
        let ps = people(&["A", "B"]);
        let stranger = people(&["Z"]);
        let predictions = vec![guess(&ps[0], &ps[0], 1), guess(&ps[0], &stranger[0], 1)];
        let awards = compute_awards(&ps, &predictions, &HashMap::new());
        assert_eq!(awards.len(), 1);
    }

    #[test]
    fn awards_are_ordered() {
        let ps = people(&["A", "B", "C"]);
        let predictions = vec![guess(&ps[0], &ps[2], 1), guess(&ps[1], &ps[2], 1)];
        let kinds: Vec<_> = compute_awards(&ps, &predictions, &HashMap::new())
            .iter()
            .map(|a| a.kind)
            .collect();
        assert_eq!(
            kinds,
            [
                AwardKind::MostConsumed,
                AwardKind::BestPredictor,
                AwardKind::HardestToPredict,
                AwardKind::WorstPredictor,
            ]
        );
    }
}
