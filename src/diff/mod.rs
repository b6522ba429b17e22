pub mod engine;

pub use engine::{diff_ranking, diff_roster, PlayerDelta, RankMove, RankingChange, ScoreDelta, Trend};
