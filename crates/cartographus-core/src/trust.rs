use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCORE: i32 = 100;
pub const MIN_SCORE: i32 = 0;
pub const MAX_SCORE: i32 = 100;
pub const RESTRICTED_THRESHOLD: i32 = 50;

/// Integer trust score in `[0, 100]` summarising a user's recent violation
/// history. `restricted` is recomputed on every write, never set directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustScore {
    pub user_id: i64,
    pub username: String,
    pub score: i32,
    pub violations_count: i64,
    pub last_violation_at: Option<DateTime<Utc>>,
    pub restricted: bool,
    pub updated_at: DateTime<Utc>,
}

impl TrustScore {
    /// A user with no row is treated as if they had this fresh record.
    pub fn fresh(user_id: i64, username: impl Into<String>, now: DateTime<Utc>) -> Self {
        TrustScore {
            user_id,
            username: username.into(),
            score: DEFAULT_SCORE,
            violations_count: 0,
            last_violation_at: None,
            restricted: false,
            updated_at: now,
        }
    }
}

pub fn clamp_score(score: i32) -> i32 {
    score.clamp(MIN_SCORE, MAX_SCORE)
}

pub fn is_restricted(score: i32) -> bool {
    score < RESTRICTED_THRESHOLD
}
