//! Rubrics and the engine that grades learner answers against them

mod engine;
mod rubric;

pub use engine::{Assessment, ScoreEngine, ScoreSettings};
pub use rubric::{Criterion, Rubric};
