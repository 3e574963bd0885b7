//! Camera locations. `timeseries_analytics.source_id` holds the text form of
//! `locations.id`.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{format_timestamp, Database};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub id: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub input_stream_url: Option<String>,
    pub output_stream_url: Option<String>,
    pub thumbnail: Option<String>,
    #[serde(rename = "user_id")]
    pub owner_user_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewLocation {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub input_stream_url: Option<String>,
    pub output_stream_url: Option<String>,
    pub thumbnail: Option<String>,
    pub owner_user_id: Option<String>,
}

impl NewLocation {
    pub fn new(address: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            address: address.into(),
            latitude,
            longitude,
            description: None,
            tags: Vec::new(),
            input_stream_url: None,
            output_stream_url: None,
            thumbnail: None,
            owner_user_id: None,
        }
    }

    pub fn owned_by(mut self, user_id: impl Into<String>) -> Self {
        self.owner_user_id = Some(user_id.into());
        self
    }
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationChanges {
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub input_stream_url: Option<String>,
    pub output_stream_url: Option<String>,
    pub thumbnail: Option<String>,
}

const LOCATION_COLUMNS: &str = "id, address, latitude, longitude, description, tags, input_stream_url, output_stream_url, thumbnail, owner_user_id, created_at, updated_at";

fn row_to_location(row: &rusqlite::Row) -> rusqlite::Result<Location> {
    let tags_json: String = row.get(5)?;
    Ok(Location {
        id: row.get(0)?,
        address: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        description: row.get(4)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        input_stream_url: row.get(6)?,
        output_stream_url: row.get(7)?,
        thumbnail: row.get(8)?,
        owner_user_id: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl Database {
    pub fn create_location(&self, location: &NewLocation) -> Result<Location> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        {
            let conn = self.conn()?;
            conn.execute(
                &format!(
                    "INSERT INTO locations ({LOCATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)"
                ),
                params![
                    id,
                    location.address,
                    location.latitude,
                    location.longitude,
                    location.description,
                    serde_json::to_string(&location.tags)?,
                    location.input_stream_url,
                    location.output_stream_url,
                    location.thumbnail,
                    location.owner_user_id,
                    now,
                ],
            )?;
        }
        self.get_location(&id)?
            .ok_or_else(|| anyhow::anyhow!("Location {} vanished after insert", id))
    }

    pub fn get_location(&self, id: &str) -> Result<Option<Location>> {
        let conn = self.conn()?;
        let location = conn
            .query_row(
                &format!("SELECT {LOCATION_COLUMNS} FROM locations WHERE id = ?1"),
                [id],
                row_to_location,
            )
            .optional()?;
        Ok(location)
    }

    pub fn list_locations_for_owner(&self, owner_user_id: &str, skip: u32, limit: u32) -> Result<Vec<Location>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {LOCATION_COLUMNS}
            FROM locations
            WHERE owner_user_id = ?1
            ORDER BY created_at, id
            LIMIT ?2 OFFSET ?3
            "#
        ))?;
        let locations = stmt
            .query_map(params![owner_user_id, limit, skip], row_to_location)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(locations)
    }

    pub fn update_location(&self, id: &str, changes: &LocationChanges) -> Result<Option<Location>> {
        let tags_json = changes
            .tags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let updated = {
            let conn = self.conn()?;
            conn.execute(
                r#"
                UPDATE locations SET
                    address = COALESCE(?2, address),
                    latitude = COALESCE(?3, latitude),
                    longitude = COALESCE(?4, longitude),
                    description = COALESCE(?5, description),
                    tags = COALESCE(?6, tags),
                    input_stream_url = COALESCE(?7, input_stream_url),
                    output_stream_url = COALESCE(?8, output_stream_url),
                    thumbnail = COALESCE(?9, thumbnail),
                    updated_at = ?10
                WHERE id = ?1
                "#,
                params![
                    id,
                    changes.address,
                    changes.latitude,
                    changes.longitude,
                    changes.description,
                    tags_json,
                    changes.input_stream_url,
                    changes.output_stream_url,
                    changes.thumbnail,
                    format_timestamp(Utc::now()),
                ],
            )?
        };
        if updated == 0 {
            return Ok(None);
        }
        self.get_location(id)
    }

    pub fn delete_location(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM locations WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_location_crud() {
        let db = test_db();
        let mut new = NewLocation::new("1 Main St", 40.7, -74.0);
        new.tags = vec!["downtown".to_string(), "intersection".to_string()];
        let created = db.create_location(&new).unwrap();
        assert_eq!(created.tags, vec!["downtown", "intersection"]);
        assert!(created.owner_user_id.is_none());

        let changes = LocationChanges {
            description: Some("North corner".to_string()),
            ..Default::default()
        };
        let updated = db.update_location(&created.id, &changes).unwrap().unwrap();
        assert_eq!(updated.description.as_deref(), Some("North corner"));
        assert_eq!(updated.address, "1 Main St");
        assert_eq!(updated.tags.len(), 2);

        assert!(db.delete_location(&created.id).unwrap());
        assert!(db.get_location(&created.id).unwrap().is_none());
        assert!(!db.delete_location(&created.id).unwrap());
    }

    #[test]
    fn test_list_only_returns_owned_locations() {
        let db = test_db();
        let owner = db
            .create_user(&crate::db::NewUser {
                email: "owner@example.com".to_string(),
                password_hash: "x".to_string(),
                first_name: "O".to_string(),
                last_name: "W".to_string(),
                company_name: None,
                industry: None,
            })
            .unwrap();
        db.create_location(&NewLocation::new("Mine", 0.0, 0.0).owned_by(&owner.id)).unwrap();
        db.create_location(&NewLocation::new("Unowned", 1.0, 1.0)).unwrap();

        let mine = db.list_locations_for_owner(&owner.id, 0, 100).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].address, "Mine");
    }
}
