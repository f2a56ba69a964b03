//! Core domain types and shared logic for the TopCAT catalog client.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Facility configuration and the facility registry
//! - Session records and the patches that build them up during login
//! - Query normalization (fragments and bind parameters to JPQL text)
//! - Entity wrapping of raw catalog rows
//! - Application configuration

pub mod config;
pub mod entity;
pub mod error;
pub mod facility;
pub mod query;
pub mod session;

pub use entity::{Entity, Row};
pub use error::{Error, Result};
pub use facility::{AuthenticationType, Facility, FacilityConfig, FacilityRegistry};
pub use query::{NormalizedQuery, Param, Query, QueryPart};
pub use session::{Session, SessionPatch};

/// Plugin name of the CAS single sign-on authenticator.
pub const CAS_PLUGIN: &str = "cas";

/// Username sent when a non-CAS plugin is used without one.
pub const ANONYMOUS_USERNAME: &str = "anon";
