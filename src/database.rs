use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;
use crate::models::SurveyQuery;
use crate::output::ListingRow;

/// Headline numbers of one survey run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunCounts {
    pub raw: usize,
    pub normalized: usize,
    pub filtered: usize,
    pub deduplicated: usize,
    pub failures: usize,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("Failed to open database {}", path))?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS survey_runs (
                uuid TEXT PRIMARY KEY,
                station TEXT NOT NULL,
                query TEXT NOT NULL,
                started_at TEXT NOT NULL,
                raw_count INTEGER NOT NULL,
                normalized_count INTEGER NOT NULL,
                filtered_count INTEGER NOT NULL,
                deduplicated_count INTEGER NOT NULL,
                failure_count INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS listings (
                run_uuid TEXT NOT NULL REFERENCES survey_runs(uuid),
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                site TEXT NOT NULL,
                sources TEXT NOT NULL,
                duplicate_count INTEGER NOT NULL,
                url TEXT,
                rent INTEGER NOT NULL,
                common_fee INTEGER NOT NULL,
                total_rent INTEGER NOT NULL,
                deposit INTEGER,
                key_money INTEGER,
                area REAL NOT NULL,
                madori TEXT,
                built TEXT,
                age_months INTEGER,
                age_diff_months INTEGER,
                station TEXT,
                walk_minutes INTEGER,
                building_type TEXT,
                auto_lock TEXT NOT NULL,
                bath_toilet_separate TEXT NOT NULL,
                aspect TEXT,
                collected_at TEXT NOT NULL,
                PRIMARY KEY (run_uuid, position)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_listings_site ON listings(site)",
            [],
        )?;

        Ok(())
    }

    /// Stores a run and its listings in one transaction; returns the new run id
    pub fn insert_run(
        &mut self,
        query: &SurveyQuery,
        started_at: DateTime<Utc>,
        counts: &RunCounts,
        rows: &[ListingRow],
    ) -> Result<Uuid> {
        let uuid = Uuid::new_v4();
        let query_json = serde_json::to_string(query)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO survey_runs (
                uuid, station, query, started_at, raw_count, normalized_count,
                filtered_count, deduplicated_count, failure_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                uuid.to_string(),
                &query.station,
                query_json,
                started_at,
                counts.raw as i64,
                counts.normalized as i64,
                counts.filtered as i64,
                counts.deduplicated as i64,
                counts.failures as i64,
            ],
        )?;

        for (position, row) in rows.iter().enumerate() {
            tx.execute(
                "INSERT INTO listings (
                    run_uuid, position, name, site, sources, duplicate_count, url,
                    rent, common_fee, total_rent, deposit, key_money, area, madori,
                    built, age_months, age_diff_months, station, walk_minutes,
                    building_type, auto_lock, bath_toilet_separate, aspect, collected_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                          ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
                params![
                    uuid.to_string(),
                    position as i64,
                    &row.name,
                    &row.site,
                    row.sources.join(";"),
                    row.duplicate_count as i64,
                    &row.url,
                    row.rent as i64,
                    row.common_fee as i64,
                    row.total_rent as i64,
                    row.deposit.map(|v| v as i64),
                    row.key_money.map(|v| v as i64),
                    row.area,
                    &row.madori,
                    &row.built,
                    row.age_months,
                    row.age_diff_months,
                    &row.station,
                    row.walk_minutes,
                    &row.building_type,
                    row.auto_lock.as_str(),
                    row.bath_toilet_separate.as_str(),
                    row.aspect.map(|a| a.as_str()),
                    row.collected_at,
                ],
            )?;
        }
        tx.commit()?;

        tracing::info!("Stored survey run {} with {} listings", uuid, rows.len());
        Ok(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Amenity, Aspect, OutputFormat, Preference};
    use chrono::{NaiveDate, TimeZone};
    use rusqlite::OptionalExtension;

    #[derive(Debug, Clone, PartialEq)]
    struct RunRecord {
        uuid: Uuid,
        station: String,
        query: SurveyQuery,
        started_at: DateTime<Utc>,
        counts: RunCounts,
    }

    fn amenity_from_str(s: &str) -> Amenity {
        match s {
            "yes" => Amenity::Yes,
            "no" => Amenity::No,
            _ => Amenity::Unknown,
        }
    }

    fn text_conversion_err(column: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    }

    impl Database {
        fn get_run(&self, uuid: &Uuid) -> Result<Option<RunRecord>> {
            let record = self.conn
                .query_row(
                    "SELECT uuid, station, query, started_at, raw_count, normalized_count,
                            filtered_count, deduplicated_count, failure_count
                     FROM survey_runs WHERE uuid = ?1",
                    params![uuid.to_string()],
                    |row| {
                        let uuid = Uuid::parse_str(&row.get::<_, String>(0)?).map_err(|e| text_conversion_err(0, e))?;
                        let query: SurveyQuery = serde_json::from_str(&row.get::<_, String>(2)?).map_err(|e| text_conversion_err(2, e))?;
                        Ok(RunRecord {
                            uuid,
                            station: row.get(1)?,
                            query,
                            started_at: row.get(3)?,
                            counts: RunCounts {
                                raw: row.get::<_, i64>(4)? as usize,
                                normalized: row.get::<_, i64>(5)? as usize,
                                filtered: row.get::<_, i64>(6)? as usize,
                                deduplicated: row.get::<_, i64>(7)? as usize,
                                failures: row.get::<_, i64>(8)? as usize,
                            },
                        })
                    },
                )
                .optional()?;

            Ok(record)
        }

        /// Listings of one run in output order
        fn get_listings(&self, run: &Uuid) -> Result<Vec<ListingRow>> {
            let mut stmt = self.conn.prepare(
                "SELECT name, site, sources, duplicate_count, url, rent, common_fee, total_rent,
                        deposit, key_money, area, madori, built, age_months, age_diff_months,
                        station, walk_minutes, building_type, auto_lock, bath_toilet_separate,
                        aspect, collected_at
                 FROM listings
                 WHERE run_uuid = ?1
                 ORDER BY position"
            )?;

            let rows = stmt
                .query_map(params![run.to_string()], |row| {
                    let sources: String = row.get(2)?;
                    let aspect: Option<String> = row.get(20)?;
                    Ok(ListingRow {
                        name: row.get(0)?,
                        site: row.get(1)?,
                        sources: sources.split(';').filter(|s| !s.is_empty()).map(String::from).collect(),
                        duplicate_count: row.get::<_, i64>(3)? as usize,
                        url: row.get(4)?,
                        rent: row.get::<_, i64>(5)? as u64,
                        common_fee: row.get::<_, i64>(6)? as u64,
                        total_rent: row.get::<_, i64>(7)? as u64,
                        deposit: row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
                        key_money: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
                        area: row.get(10)?,
                        madori: row.get(11)?,
                        built: row.get(12)?,
                        age_months: row.get(13)?,
                        age_diff_months: row.get(14)?,
                        station: row.get(15)?,
                        walk_minutes: row.get(16)?,
                        building_type: row.get(17)?,
                        auto_lock: amenity_from_str(&row.get::<_, String>(18)?),
                        bath_toilet_separate: amenity_from_str(&row.get::<_, String>(19)?),
                        aspect: aspect.as_deref().and_then(Aspect::parse),
                        collected_at: row.get(21)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        }

        fn run_count(&self) -> Result<usize> {
            let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM survey_runs", [], |row| row.get(0))?;
            Ok(count as usize)
        }
    }

    fn query() -> SurveyQuery {
        SurveyQuery {
            station: "恵比寿".to_string(),
            max_walk_minutes: Some(10),
            area: Some(25.0),
            area_tolerance: 5.0,
            madori: None,
            subject_built: NaiveDate::from_ymd_opt(2016, 3, 1),
            age_max_years: None,
            age_diff_years: Some(5),
            building_type: None,
            auto_lock: Preference::Yes,
            bath_toilet: Preference::Any,
            aspect: Some(Aspect::South),
            max_listings: 50,
            sites: vec!["suumo".to_string(), "homes".to_string()],
            output_format: OutputFormat::Sqlite,
            brand_new_separate_stats: true,
            surveyed_on: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
        }
    }

    fn row(name: &str, aspect: Option<Aspect>) -> ListingRow {
        ListingRow {
            name: name.to_string(),
            site: "suumo".to_string(),
            sources: vec!["suumo".to_string(), "homes".to_string()],
            duplicate_count: 2,
            url: Some("https://suumo.jp/chintai/jnc_000012345678/".to_string()),
            rent: 95_000,
            common_fee: 5_000,
            total_rent: 100_000,
            deposit: Some(95_000),
            key_money: None,
            area: 25.5,
            madori: Some("1K".to_string()),
            built: Some("2016-03".to_string()),
            age_months: Some(127),
            age_diff_months: Some(0),
            station: Some("恵比寿".to_string()),
            walk_minutes: Some(5),
            building_type: None,
            auto_lock: Amenity::Yes,
            bath_toilet_separate: Amenity::Unknown,
            aspect,
            collected_at: Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_insert_and_read_back_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.db");
        let mut db = Database::new(path.to_str().unwrap()).unwrap();

        let started_at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        let counts = RunCounts {
            raw: 12,
            normalized: 10,
            filtered: 8,
            deduplicated: 2,
            failures: 2,
        };
        let rows = vec![row("メゾン恵比寿", Some(Aspect::SouthEast)), row("コーポ広尾", None)];
        let uuid = db.insert_run(&query(), started_at, &counts, &rows).unwrap();

        let run = db.get_run(&uuid).unwrap().unwrap();
        assert_eq!(run.uuid, uuid);
        assert_eq!(run.station, "恵比寿");
        assert_eq!(run.query, query());
        assert_eq!(run.started_at, started_at);
        assert_eq!(run.counts, counts);

        assert_eq!(db.get_listings(&uuid).unwrap(), rows);
    }

    #[test]
    fn test_runs_are_kept_apart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.db");
        let mut db = Database::new(path.to_str().unwrap()).unwrap();

        let first = db.insert_run(&query(), Utc::now(), &RunCounts::default(), &[row("A", None)]).unwrap();
        let second = db.insert_run(&query(), Utc::now(), &RunCounts::default(), &[]).unwrap();

        assert_ne!(first, second);
        assert_eq!(db.run_count().unwrap(), 2);
        assert_eq!(db.get_listings(&first).unwrap().len(), 1);
        assert!(db.get_listings(&second).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.db");
        let uuid = {
            let mut db = Database::new(path.to_str().unwrap()).unwrap();
            db.insert_run(&query(), Utc::now(), &RunCounts::default(), &[]).unwrap()
        };

        let db = Database::new(path.to_str().unwrap()).unwrap();
        assert!(db.get_run(&uuid).unwrap().is_some());
        assert!(db.get_run(&Uuid::new_v4()).unwrap().is_none());
    }
}
