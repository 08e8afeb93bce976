use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::session::Player;

/// One row of the ranked standings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntry {
    /// Dense 1-based rank; never shared between two players.
    pub rank: usize,
    pub user_id: String,
    pub display_name: String,
    pub score: u64,
}

/// Rank players by descending score, breaking ties by join order.
///
/// `players` must iterate in join order, which the session roster guarantees.
pub fn rank(players: &IndexMap<String, Player>) -> Vec<LeaderboardEntry> {
    let mut ordered: Vec<&Player> = players.values().collect();
    // Stable sort keeps earlier joiners ahead on equal scores.
    ordered.sort_by(|a, b| b.score.cmp(&a.score));

    ordered
        .into_iter()
        .enumerate()
        .map(|(index, player)| LeaderboardEntry {
            rank: index + 1,
            user_id: player.user_id.clone(),
            display_name: player.display_name.clone(),
            score: player.score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(entries: &[(&str, u64)]) -> IndexMap<String, Player> {
        entries
            .iter()
            .map(|(id, score)| {
                let mut player = Player::new((*id).into(), format!("{id}-name"), None);
                player.score = *score;
                ((*id).to_string(), player)
            })
            .collect()
    }

    fn summary(board: &[LeaderboardEntry]) -> Vec<(usize, &str, u64)> {
        board
            .iter()
            .map(|entry| (entry.rank, entry.user_id.as_str(), entry.score))
            .collect()
    }

    #[test]
    fn ties_are_broken_by_join_order() {
        let board = rank(&roster(&[("A", 10), ("B", 10), ("C", 5)]));
        assert_eq!(summary(&board), vec![(1, "A", 10), (2, "B", 10), (3, "C", 5)]);
    }

    #[test]
    fn higher_score_wins_regardless_of_join_order() {
        let board = rank(&roster(&[("A", 1), ("B", 0), ("C", 7), ("D", 7)]));
        assert_eq!(
            summary(&board),
            vec![(1, "C", 7), (2, "D", 7), (3, "A", 1), (4, "B", 0)]
        );
    }

    #[test]
    fn empty_roster_yields_empty_board() {
        assert!(rank(&IndexMap::new()).is_empty());
    }

    #[test]
    fn ranking_does_not_touch_the_roster() {
        let players = roster(&[("A", 3), ("B", 9)]);
        let before: Vec<_> = players.keys().cloned().collect();
        let first = rank(&players);
        let second = rank(&players);
        assert_eq!(first, second);
        assert_eq!(players.keys().cloned().collect::<Vec<_>>(), before);
        assert_eq!(first[0].display_name, "B-name");
    }
}
