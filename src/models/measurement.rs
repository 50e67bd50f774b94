use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{CollectionSchema, FieldDef, Record};

/// A body measurement such as weight or body fat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub kind: String,
    pub value: f64,
    pub unit: String,
    pub measured_at: DateTime<Utc>,
}

impl Measurement {
    pub fn new(kind: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            kind: kind.into(),
            value,
            unit: unit.into(),
            measured_at: Utc::now(),
        }
    }
}

impl Record for Measurement {
    const COLLECTION: &'static str = "measurements";

    fn schema() -> CollectionSchema {
        CollectionSchema::tracked(
            Self::COLLECTION,
            vec![
                FieldDef::text("user_id"),
                FieldDef::text("kind").required().with_default("''"),
                FieldDef::real("value").required().with_default("0"),
                FieldDef::text("unit").required().with_default("''"),
                FieldDef::timestamp("measured_at").required(),
            ],
        )
    }

    fn id(&self) -> String {
        self.id.to_string()
    }
}
