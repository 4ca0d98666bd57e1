//! Simpatient - Virtual Patient Conversation Engine
//!
//! Session engine for simulated clinical-interview training. A learner talks
//! to a scripted virtual patient; every answer is graded against a rubric by
//! semantic similarity, and the patient's reply is drawn from its script
//! either in order or by matching the learner's question.

pub mod cli;
pub mod config;
pub mod dialog;
pub mod embedding;
pub mod error;
pub mod patient;
pub mod scoring;
pub mod session;

pub use error::{Result, SimPatientError};
