//! Asset inventory rows. Import tooling lives outside the engine; this is
//! just the persisted snapshot the dashboard joins against.

use crate::{AssetRecord, Db};
use anyhow::Result;
use rusqlite::params;

impl Db {
    /// Insert or replace on (kind, value).
    pub fn upsert_asset(&self, asset: &AssetRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO assets (ts, kind, value, tags, owner, environment) VALUES (?,?,?,?,?,?)
             ON CONFLICT(kind, value) DO UPDATE SET ts=excluded.ts, tags=excluded.tags,
             owner=excluded.owner, environment=excluded.environment",
            params![
                asset.ts,
                asset.kind,
                asset.value,
                asset.tags.join(","),
                asset.owner,
                asset.environment,
            ],
        )?;
        Ok(())
    }

    pub fn list_assets(&self, limit: usize, offset: usize) -> Result<Vec<AssetRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT ts, kind, value, tags, owner, environment FROM assets ORDER BY value ASC LIMIT ? OFFSET ?",
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], |r| {
            Ok(AssetRecord {
                ts: r.get(0)?,
                kind: r.get(1)?,
                value: r.get(2)?,
                tags: split_tags(&r.get::<_, String>(3)?),
                owner: r.get(4)?,
                environment: r.get(5)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count_assets(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(1) FROM assets", [], |r| r.get(0))?)
    }
}

fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(kind: &str, value: &str, owner: &str) -> AssetRecord {
        AssetRecord {
            kind: kind.into(),
            value: value.into(),
            tags: vec!["in-scope".into(), "edge".into()],
            owner: owner.into(),
            environment: "prod".into(),
            ts: 100,
        }
    }

    #[test]
    fn upsert_is_unique_on_kind_value() {
        let db = Db::open_in_memory().unwrap();
        db.upsert_asset(&asset("host", "a.example.com", "alice")).unwrap();
        db.upsert_asset(&asset("host", "a.example.com", "bob")).unwrap();
        db.upsert_asset(&asset("url", "a.example.com", "carol")).unwrap();

        assert_eq!(db.count_assets().unwrap(), 2);
        let rows = db.list_assets(10, 0).unwrap();
        let host = rows
            .iter()
            .find(|a| a.kind == "host")
            .unwrap();
        assert_eq!(host.owner, "bob");
    }

    #[test]
    fn tags_round_trip() {
        let db = Db::open_in_memory().unwrap();
        db.upsert_asset(&asset("host", "x", "o")).unwrap();
        let rows = db.list_assets(10, 0).unwrap();
        assert_eq!(rows[0].tags, vec!["in-scope", "edge"]);
    }

    #[test]
    fn invalid_kind_is_rejected() {
        let db = Db::open_in_memory().unwrap();
        let mut bad = asset("host", "x", "o");
        bad.kind = "planet".into();
        assert!(db.upsert_asset(&bad).is_err());
    }

    #[test]
    fn list_orders_by_value() {
        let db = Db::open_in_memory().unwrap();
        db.upsert_asset(&asset("host", "b", "")).unwrap();
        db.upsert_asset(&asset("host", "a", "")).unwrap();
        let rows = db.list_assets(10, 0).unwrap();
        assert_eq!(rows[0].value, "a");
        assert_eq!(rows[1].value, "b");
    }
}
