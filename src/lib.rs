//! # tutor
//!
//! Grades exam-style essays with a hosted language model and keeps a
//! follow-up tutoring conversation grounded in the resulting report.
//!
//! A [`session::GradingSession`] sends a [`submission::Submission`] to a
//! [`gateway::CompletionGateway`], splits the answer into a narrative report
//! and a per-axis [`extract::ScoreRecord`], and then answers questions about
//! that report without ever re-scoring.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Environment-driven configuration
pub mod config;
/// A module defining a bunch of constant values to be used throughout
pub mod constants;
/// Error types surfaced by sessions and gateways
pub mod error;
/// Splits a completion into report and scores
pub mod extract;
/// The completion-service boundary and its implementations
pub mod gateway;
/// Grammar of the machine-readable score line
pub mod grammar;
/// Composes grading and chat requests
pub mod prompt;
/// Session lookup for the HTTP server
pub mod registry;
/// HTTP API
pub mod server;
/// The grading session orchestrator
pub mod session;
/// State container for one session
pub mod store;
/// Submission, chat and rubric-selection types
pub mod submission;
