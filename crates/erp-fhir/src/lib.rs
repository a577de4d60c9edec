//! Profile-aware structural validation of FHIR documents.
//!
//! The crate has four layers:
//!
//! * [`model`] — a polymorphic [`model::Element`] over parsed JSON or XML
//!   documents plus literal values from profile definitions;
//! * [`repository`] — the immutable profile repository:
//!   StructureDefinitions, CodeSystems, ValueSets, version views;
//! * [`path`] — the FHIRPath expression engine used by constraints and
//!   slicing discriminators;
//! * [`validator`] — the walk that validates an element against a set of
//!   profiles simultaneously, including slicing, cardinality, bindings,
//!   and document-wide reference integrity.
//!
//! The repository is loaded once at startup and shared read-only across
//! workers; a validation run owns all of its mutable state.

#![deny(unsafe_code)]

pub mod model;
pub mod path;
pub mod repository;
pub mod validator;

pub use model::Element;
pub use repository::{FhirStructureRepository, Pet, ProfileLoadError, RepositoryView};
pub use validator::{
    FhirPathValidator, Severity, ValidationError, ValidationResults, ValidatorOptions,
};
