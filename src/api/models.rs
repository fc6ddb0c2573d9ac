use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A compact summary of one game shown in the live banner ticker.
///
/// Produced fresh on every poll of the banner endpoint; equality is by
/// content only and nothing is ever persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BannerItem {
    pub id: i64,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub home_team_name: String,
    pub away_team_name: String,
    pub home_team_abbr: Option<String>,
    pub away_team_abbr: Option<String>,
    /// Scheduled start, GMT. The API sends "YYYY-MM-DD HH:MM" strings.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// e.g. "Regular Season", "Playoff", "Exhibition"
    pub game_type: Option<String>,
    pub venue: Option<String>,
    pub home_goals: i32,
    pub away_goals: i32,
    pub status: GameStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl GameStatus {
    /// Map the API's numeric status codes. Unknown codes are treated as
    /// not-started so a new backend status never fakes a live game.
    pub fn from_code(code: i64) -> GameStatus {
        match code {
            2 => GameStatus::InProgress,
            3 => GameStatus::Completed,
            _ => GameStatus::NotStarted,
        }
    }
}

/// Parse the banner-list endpoint payload.
///
/// Any non-array payload is treated as an empty list; rows missing the
/// mandatory identifiers are skipped rather than failing the whole poll.
pub fn parse_banner_response(raw: &serde_json::Value) -> Vec<BannerItem> {
    let rows = match raw.as_array() {
        Some(a) => a,
        None => return vec![],
    };

    rows.iter()
        .filter_map(|row| {
            let id = int_field(row, "id")?;
            let home_team_id = int_field(row, "home_team_id")?;
            let away_team_id = int_field(row, "away_team_id")?;
            let home_team_name = row["home_team_name"].as_str().unwrap_or("").to_string();
            let away_team_name = row["away_team_name"].as_str().unwrap_or("").to_string();

            let scheduled_at = row["game_date"]
                .as_str()
                .and_then(parse_gmt_timestamp);

            Some(BannerItem {
                id,
                home_team_id,
                away_team_id,
                home_team_name,
                away_team_name,
                home_team_abbr: row["home_team_abbr"].as_str().map(str::to_string),
                away_team_abbr: row["away_team_abbr"].as_str().map(str::to_string),
                scheduled_at,
                game_type: row["game_type"].as_str().map(str::to_string),
                venue: row["venue"].as_str().map(str::to_string),
                home_goals: goal_count(row, "home_goals"),
                away_goals: goal_count(row, "away_goals"),
                status: GameStatus::from_code(int_field(row, "status").unwrap_or(1)),
            })
        })
        .collect()
}

/// The backend serializes some numeric columns as strings.
fn int_field(row: &serde_json::Value, key: &str) -> Option<i64> {
    row[key]
        .as_i64()
        .or_else(|| row[key].as_str().and_then(|s| s.parse().ok()))
}

/// Goals default to 0 when absent; a value that does not fit an i32 is as
/// malformed as a missing one.
fn goal_count(row: &serde_json::Value, key: &str) -> i32 {
    int_field(row, key)
        .and_then(|n| i32::try_from(n).ok())
        .unwrap_or(0)
}

/// The API stores all game times in GMT as "YYYY-MM-DD HH:MM" (seconds
/// optional); local rendering is the display layer's problem.
fn parse_gmt_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()?;
    Some(naive.and_utc())
}
