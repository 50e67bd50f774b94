use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{CollectionSchema, FieldDef, Record};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Goal {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub title: String,
    pub metric: String,
    pub target_value: f64,
    pub current_value: f64,
    pub deadline: Option<NaiveDate>,
    pub achieved: bool,
}

impl Goal {
    pub fn new(title: impl Into<String>, metric: impl Into<String>, target_value: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            title: title.into(),
            metric: metric.into(),
            target_value,
            current_value: 0.0,
            deadline: None,
            achieved: false,
        }
    }

    pub fn with_deadline(mut self, deadline: NaiveDate) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn progress(&self) -> f64 {
        if self.target_value == 0.0 {
            return 0.0;
        }
        (self.current_value / self.target_value).clamp(0.0, 1.0)
    }
}

impl Record for Goal {
    const COLLECTION: &'static str = "goals";

    fn schema() -> CollectionSchema {
        CollectionSchema::tracked(
            Self::COLLECTION,
            vec![
                FieldDef::text("user_id"),
                FieldDef::text("title").required().with_default("''"),
                FieldDef::text("metric").required().with_default("''"),
                FieldDef::real("target_value").required().with_default("0"),
                FieldDef::real("current_value").required().with_default("0"),
                FieldDef::text("deadline"),
                FieldDef::boolean("achieved").required().with_default("0"),
            ],
        )
    }

    fn id(&self) -> String {
        self.id.to_string()
    }
}
