//! SQLite storage for match records

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::{MatchOutcome, MatchRecord, Result};

/// Database connection and operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT,
                home_team TEXT NOT NULL,
                away_team TEXT NOT NULL,
                competition TEXT,
                season TEXT,
                home_form REAL,
                away_form REAL,
                home_ranking REAL,
                away_ranking REAL,
                home_goals_scored REAL,
                away_goals_scored REAL,
                home_goals_conceded REAL,
                away_goals_conceded REAL,
                home_score INTEGER,
                away_score INTEGER,
                result TEXT,
                UNIQUE(date, home_team, away_team)
            );

            CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(date);
            CREATE INDEX IF NOT EXISTS idx_matches_teams ON matches(home_team, away_team);
            "#,
        )?;
        Ok(())
    }

    /// Insert or update a match record
    pub fn upsert_match(&self, record: &MatchRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO matches (date, home_team, away_team, competition, season,
                                 home_form, away_form, home_ranking, away_ranking,
                                 home_goals_scored, away_goals_scored,
                                 home_goals_conceded, away_goals_conceded,
                                 home_score, away_score, result)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT(date, home_team, away_team) DO UPDATE SET
                competition = COALESCE(excluded.competition, competition),
                season = COALESCE(excluded.season, season),
                home_form = COALESCE(excluded.home_form, home_form),
                away_form = COALESCE(excluded.away_form, away_form),
                home_ranking = COALESCE(excluded.home_ranking, home_ranking),
                away_ranking = COALESCE(excluded.away_ranking, away_ranking),
                home_goals_scored = COALESCE(excluded.home_goals_scored, home_goals_scored),
                away_goals_scored = COALESCE(excluded.away_goals_scored, away_goals_scored),
                home_goals_conceded = COALESCE(excluded.home_goals_conceded, home_goals_conceded),
                away_goals_conceded = COALESCE(excluded.away_goals_conceded, away_goals_conceded),
                home_score = COALESCE(excluded.home_score, home_score),
                away_score = COALESCE(excluded.away_score, away_score),
                result = COALESCE(excluded.result, result)
            "#,
            params![
                record.date.map(|d| d.format("%Y-%m-%d").to_string()),
                record.home_team,
                record.away_team,
                record.competition,
                record.season,
                record.home_form,
                record.away_form,
                record.home_ranking,
                record.away_ranking,
                record.home_goals_scored,
                record.away_goals_scored,
                record.home_goals_conceded,
                record.away_goals_conceded,
                record.home_score,
                record.away_score,
                record.result.map(outcome_to_str),
            ],
        )?;
        Ok(())
    }

    /// Insert multiple match records; returns the number written
    pub fn upsert_matches(&self, records: &[MatchRecord]) -> Result<usize> {
        let mut count = 0;
        for record in records {
            self.upsert_match(record)?;
            count += 1;
        }
        Ok(count)
    }

    /// All matches, ordered by date
    pub fn all_matches(&self) -> Result<Vec<MatchRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, home_team, away_team, competition, season,
                    home_form, away_form, home_ranking, away_ranking,
                    home_goals_scored, away_goals_scored,
                    home_goals_conceded, away_goals_conceded,
                    home_score, away_score, result
             FROM matches
             ORDER BY date, id",
        )?;

        let matches = stmt
            .query_map([], row_to_match)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(matches)
    }

    /// Import a JSON fixture file holding an array of match records
    pub fn import_json<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let records: Vec<MatchRecord> = serde_json::from_str(&content)?;
        self.upsert_matches(&records)
    }

    /// Row counts and date range
    pub fn stats(&self) -> Result<DatabaseStats> {
        let match_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM matches", [], |row| row.get(0))?;

        let team_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM (SELECT home_team AS t FROM matches
                                   UNION SELECT away_team FROM matches)",
            [],
            |row| row.get(0),
        )?;

        let min_date: Option<String> = self
            .conn
            .query_row("SELECT MIN(date) FROM matches", [], |row| row.get(0))
            .optional()?
            .flatten();
        let max_date: Option<String> = self
            .conn
            .query_row("SELECT MAX(date) FROM matches", [], |row| row.get(0))
            .optional()?
            .flatten();

        Ok(DatabaseStats {
            match_count: match_count as usize,
            team_count: team_count as usize,
            earliest_match: min_date.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            latest_match: max_date.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        })
    }
}

fn row_to_match(row: &rusqlite::Row) -> rusqlite::Result<MatchRecord> {
    let date_str: Option<String> = row.get(0)?;
    let result_str: Option<String> = row.get(15)?;

    Ok(MatchRecord {
        date: date_str.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        home_team: row.get(1)?,
        away_team: row.get(2)?,
        competition: row.get(3)?,
        season: row.get(4)?,
        home_form: row.get(5)?,
        away_form: row.get(6)?,
        home_ranking: row.get(7)?,
        away_ranking: row.get(8)?,
        home_goals_scored: row.get(9)?,
        away_goals_scored: row.get(10)?,
        home_goals_conceded: row.get(11)?,
        away_goals_conceded: row.get(12)?,
        home_score: row.get(13)?,
        away_score: row.get(14)?,
        result: result_str.as_deref().and_then(outcome_from_str),
    })
}

fn outcome_to_str(outcome: MatchOutcome) -> &'static str {
    match outcome {
        MatchOutcome::HomeWin => "home_win",
        MatchOutcome::Draw => "draw",
        MatchOutcome::AwayWin => "away_win",
    }
}

fn outcome_from_str(s: &str) -> Option<MatchOutcome> {
    match s {
        "home_win" => Some(MatchOutcome::HomeWin),
        "draw" => Some(MatchOutcome::Draw),
        "away_win" => Some(MatchOutcome::AwayWin),
        _ => None,
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub match_count: usize,
    pub team_count: usize,
    pub earliest_match: Option<NaiveDate>,
    pub latest_match: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(date: (i32, u32, u32), home: &str, away: &str) -> MatchRecord {
        MatchRecord {
            home_team: home.to_string(),
            away_team: away.to_string(),
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2),
            home_score: Some(2),
            away_score: Some(1),
            result: Some(MatchOutcome::HomeWin),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_database() {
        let db = Database::in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.match_count, 0);
        assert_eq!(stats.team_count, 0);
        assert!(stats.earliest_match.is_none());
    }

    #[test]
    fn test_upsert_and_read_back() {
        let db = Database::in_memory().unwrap();
        db.upsert_match(&sample((2024, 3, 1), "Ajax", "Porto")).unwrap();
        db.upsert_match(&sample((2024, 3, 8), "Porto", "Celtic")).unwrap();

        let matches = db.all_matches().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].home_team, "Ajax");
        assert_eq!(matches[0].result, Some(MatchOutcome::HomeWin));
        assert_eq!(matches[0].date, NaiveDate::from_ymd_opt(2024, 3, 1));

        let stats = db.stats().unwrap();
        assert_eq!(stats.match_count, 2);
        assert_eq!(stats.team_count, 3);
    }

    #[test]
    fn test_upsert_same_fixture_updates() {
        let db = Database::in_memory().unwrap();
        let mut record = sample((2024, 3, 1), "Ajax", "Porto");
        db.upsert_match(&record).unwrap();

        record.home_score = Some(3);
        record.home_form = Some(1.5);
        db.upsert_match(&record).unwrap();

        let matches = db.all_matches().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].home_score, Some(3));
        assert_eq!(matches[0].home_form, Some(1.5));
    }

    #[test]
    fn test_import_json_fixture() {
        let db = Database::in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixtures.json");
        let records = vec![
            sample((2024, 4, 1), "Ajax", "Celtic"),
            sample((2024, 4, 8), "Porto", "Ajax"),
        ];
        std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

        let imported = db.import_json(&path).unwrap();
        assert_eq!(imported, 2);
        assert_eq!(db.stats().unwrap().match_count, 2);
    }
}
