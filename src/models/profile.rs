use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::db::{CollectionSchema, FieldDef, Record};

/// The user's profile. The remote returns it as a singleton, not an array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: Uuid,
    pub user_id: String,
    pub display_name: String,
    pub height_cm: Option<f64>,
    pub birth_date: Option<NaiveDate>,
    pub units: String,
    pub preferences: Value,
}

impl Profile {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            height_cm: None,
            birth_date: None,
            units: "metric".to_string(),
            preferences: Value::Object(Default::default()),
        }
    }
}

impl Record for Profile {
    const COLLECTION: &'static str = "profile";

    fn schema() -> CollectionSchema {
        CollectionSchema::tracked(
            Self::COLLECTION,
            vec![
                FieldDef::text("user_id").unique(),
                FieldDef::text("display_name").required().with_default("''"),
                FieldDef::real("height_cm"),
                FieldDef::text("birth_date"),
                FieldDef::text("units").required().with_default("'metric'"),
                FieldDef::json("preferences")
                    .required()
                    .with_default("'{}'")
                    .remote_encoded(),
            ],
        )
    }

    fn id(&self) -> String {
        self.id.to_string()
    }
}
