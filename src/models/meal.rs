use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::db::{CollectionSchema, FieldDef, Record};

/// Where a meal sits in the day, or relative to a training session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
    PreWorkout,
    PostWorkout,
}

impl MealType {
    pub const ALL: [MealType; 6] = [
        MealType::Breakfast,
        MealType::Lunch,
        MealType::Dinner,
        MealType::Snack,
        MealType::PreWorkout,
        MealType::PostWorkout,
    ];

    /// Stored and wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
            MealType::PreWorkout => "pre_workout",
            MealType::PostWorkout => "post_workout",
        }
    }

    pub fn is_around_training(&self) -> bool {
        matches!(self, MealType::PreWorkout | MealType::PostWorkout)
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts any case, with `-` or `_` as separator.
impl FromStr for MealType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|meal_type| meal_type.as_str() == normalized)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(MealType::as_str).collect();
                format!("unknown meal type '{}' (known: {})", s, known.join(", "))
            })
    }
}

/// Macronutrient totals for one logged meal, in grams.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Macros {
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Meal {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub name: String,
    pub meal_type: MealType,
    pub eaten_at: DateTime<Utc>,
    pub calories: Option<f64>,
    pub macros: Option<Macros>,
    pub notes: Option<String>,
}

impl Meal {
    pub fn new(name: impl Into<String>, meal_type: MealType) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            name: name.into(),
            meal_type,
            eaten_at: Utc::now(),
            calories: None,
            macros: None,
            notes: None,
        }
    }

    pub fn with_calories(mut self, calories: f64) -> Self {
        self.calories = Some(calories);
        self
    }

    pub fn with_macros(mut self, macros: Macros) -> Self {
        self.macros = Some(macros);
        self
    }
}

impl Record for Meal {
    const COLLECTION: &'static str = "meals";

    fn schema() -> CollectionSchema {
        CollectionSchema::tracked(
            Self::COLLECTION,
            vec![
                FieldDef::text("user_id"),
                FieldDef::text("name").required().with_default("''"),
                FieldDef::text("meal_type").required().with_default("'snack'"),
                FieldDef::timestamp("eaten_at").required(),
                FieldDef::real("calories"),
                FieldDef::json("macros").remote_encoded(),
                FieldDef::text("notes"),
            ],
        )
    }

    fn id(&self) -> String {
        self.id.to_string()
    }
}
