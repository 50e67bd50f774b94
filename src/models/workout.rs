use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{CollectionSchema, FieldDef, Record};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExerciseSet {
    pub reps: u32,
    pub weight_kg: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exercise {
    pub name: String,
    pub sets: Vec<ExerciseSet>,
}

impl Exercise {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sets: Vec::new(),
        }
    }

    pub fn with_set(mut self, reps: u32, weight_kg: Option<f64>) -> Self {
        self.sets.push(ExerciseSet { reps, weight_kg });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workout {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
    pub exercises: Vec<Exercise>,
    pub completed: bool,
    pub notes: Option<String>,
}

impl Workout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            name: name.into(),
            started_at: Utc::now(),
            duration_minutes: None,
            exercises: Vec::new(),
            completed: false,
            notes: None,
        }
    }

    pub fn with_exercises(mut self, exercises: Vec<Exercise>) -> Self {
        self.exercises = exercises;
        self
    }

    pub fn with_duration(mut self, minutes: i64) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn completed(mut self) -> Self {
        self.completed = true;
        self
    }
}

impl Record for Workout {
    const COLLECTION: &'static str = "workouts";

    fn schema() -> CollectionSchema {
        CollectionSchema::tracked(
            Self::COLLECTION,
            vec![
                FieldDef::text("user_id"),
                FieldDef::text("name").required().with_default("''"),
                FieldDef::timestamp("started_at").required(),
                FieldDef::integer("duration_minutes"),
                FieldDef::json("exercises")
                    .required()
                    .with_default("'[]'")
                    .remote_encoded(),
                FieldDef::boolean("completed").required().with_default("0"),
                FieldDef::text("notes"),
            ],
        )
    }

    fn id(&self) -> String {
        self.id.to_string()
    }
}
