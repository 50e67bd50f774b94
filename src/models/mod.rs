mod goal;
mod meal;
mod measurement;
mod profile;
mod workout;

pub use goal::Goal;
pub use meal::{Macros, Meal, MealType};
pub use measurement::Measurement;
pub use profile::Profile;
pub use workout::{Exercise, ExerciseSet, Workout};

use crate::db::{ActionLogEntry, SchemaRegistry, SyncRun};

impl SchemaRegistry {
    /// Registry with every domain collection plus the action log and the
    /// sync run audit trail.
    pub fn default_registry() -> Self {
        SchemaRegistry::new()
            .register::<Workout>()
            .register::<Meal>()
            .register::<Measurement>()
            .register::<Goal>()
            .register::<Profile>()
            .register::<ActionLogEntry>()
            .register::<SyncRun>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_collections() {
        let registry = SchemaRegistry::default_registry();
        assert_eq!(
            registry.names(),
            vec![
                "action_log",
                "goals",
                "meals",
                "measurements",
                "profile",
                "sync_runs",
                "workouts"
            ]
        );
        assert!(registry.get("workouts").unwrap().sync_tracked);
        assert!(!registry.get("action_log").unwrap().sync_tracked);
        assert!(!registry.get("sync_runs").unwrap().sync_tracked);
    }
}
