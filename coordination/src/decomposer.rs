//! Task decomposition by complexity tier
//!
//! | complexity      | subtasks                                          |
//! |-----------------|---------------------------------------------------|
//! | `< 0.3`         | `<id>_0` (the task itself)                        |
//! | `0.3 ..< 0.7`   | `<id>_1`, `<id>_2` (two phases)                   |
//! | `>= 0.7`        | `<id>_data`, `_analysis`, `_synthesis`, `_validation` |
//!
//! Specialized subtasks keep the task's requirements and override the
//! `specialization` key. Synthesis is handled by generalists.

use crate::state::types::{
    Requirements, Subtask, Task, GENERAL_SPECIALIZATION, SPECIALIZATION_KEY,
};

/// Below this a task runs as a single unit
pub const SIMPLE_CEILING: f64 = 0.3;

/// At or above this a task is split by specialization
pub const SPECIALIZED_FLOOR: f64 = 0.7;

/// (suffix, description prefix, specialization) for the specialized tier
const SPECIALIZED_PHASES: [(&str, &str, &str); 4] = [
    ("data", "Data processing", "data"),
    ("analysis", "Analysis", "analysis"),
    ("synthesis", "Synthesis", GENERAL_SPECIALIZATION),
    ("validation", "Validation", "validation"),
];

/// Split a task into ordered subtasks. Pure and deterministic.
pub fn decompose(task: &Task) -> Vec<Subtask> {
    let unit = |suffix: &str, description: String, requirements: Requirements| Subtask {
        id: format!("{}_{}", task.id, suffix),
        task_id: task.id.clone(),
        description,
        requirements,
    };

    if task.complexity < SIMPLE_CEILING {
        return vec![unit("0", task.description.clone(), task.requirements.clone())];
    }

    if task.complexity < SPECIALIZED_FLOOR {
        return (1..=2)
            .map(|phase| {
                unit(
                    &phase.to_string(),
                    format!("Phase {}: {}", phase, task.description),
                    task.requirements.clone(),
                )
            })
            .collect();
    }

    SPECIALIZED_PHASES
        .iter()
        .map(|(suffix, label, specialization)| {
            let mut requirements = task.requirements.clone();
            requirements.insert(SPECIALIZATION_KEY.to_string(), specialization.to_string());
            unit(suffix, format!("{}: {}", label, task.description), requirements)
        })
        .collect()
}
