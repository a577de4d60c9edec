//! Core subsystems of an e-prescription processing service.
//!
//! This crate re-exports the workspace members that make up the core:
//!
//! * [`fhir`] — profile repository, FHIRPath engine, and the structural
//!   validator with slicing and reference-integrity checks;
//! * [`cades`] — CAdES-BES signature creation and verification with ESS
//!   signing-certificate attributes and embedded OCSP responses;
//! * [`jwt`] — strict BP-256 access-token verification;
//! * [`x509`] — certificate utilities and the trust-store interface;
//! * [`config`], [`error`], [`time`], [`model`] — the shared ambient
//!   pieces.
//!
//! The intended data flow for an incoming signed prescription: the
//! access token is verified first (identifying the sender role), the
//! CAdES-BES container second (yielding the payload and the QES signer),
//! and the extracted FHIR document last (against the applicable profile
//! set). Receipts re-enter the CAdES engine to produce a counter-signed
//! artifact.

#![deny(unsafe_code)]

pub use erp_cades as cades;
pub use erp_config as config;
pub use erp_error as error;
pub use erp_fhir as fhir;
pub use erp_jwt as jwt;
pub use erp_model as model;
pub use erp_time as time;
pub use erp_x509 as x509;
