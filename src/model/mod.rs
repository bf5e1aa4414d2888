//! Data models for fb.
//!
//! This module contains the domain models:
//! - Case (identity, snapshot, staged changes)
//! - NewCase (the form behind `new`)
//! - CaseStatus, Field, FieldValue
//! - Comment
//! - Person

pub mod case;

pub use case::{
    Case, CaseId, CaseSnapshot, CaseStatus, Comment, Field, FieldChanges, FieldValue, NewCase,
    Person, Revision,
};
