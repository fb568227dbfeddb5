//! The query layer: a pest grammar parses SQL text into an [`intent::Intent`],
//! [`planner`] compiles an `Intent` against a schema snapshot into a
//! [`planner::CompiledPlan`] (cached by intent + schema cookie + view
//! generation), and [`exec`] walks that plan against a page source to
//! produce a [`exec::QueryOutput`].

pub mod ast;
pub mod exec;
pub mod intent;
pub mod parser;
pub mod planner;
pub mod views;
