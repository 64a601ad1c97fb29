//! # neurolink-sync: cloud persistence for the NeuroLink pet
//!
//! Keeps one `PetState` per signed-in user in a remote document store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐  request_save / timer   ┌────────────────────┐
//! │ AutosaveCoordinator  │ ───────────────────────► │ DocumentStore      │
//! │ (live PetState,      │  one write in flight     │ (FirestoreClient)  │
//! │  session lifecycle)  │ ◄─────────────────────── │                    │
//! └──────────┬───────────┘   Document / StoreError  └─────────┬──────────┘
//!            │                                                │
//!            ▼                                                ▼
//! ┌──────────────────────┐                          ┌────────────────────┐
//! │ Credential           │                          │ codec              │
//! │ (Authenticator)      │                          │ StructuredValue ⇄  │
//! └──────────────────────┘                          │ typed JSON         │
//!                                                   └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: typed-value JSON encoding used on the wire
//! - [`client`]: document paths, store errors and the REST document client
//! - [`auth`]: credentials and the email / password sign-in client
//! - [`autosave`]: session binding and single-flight autosave
//! - [`config`]: endpoints, timeouts and autosave period

pub mod auth;
pub mod autosave;
pub mod client;
pub mod codec;
pub mod config;

pub use auth::{AuthError, Authenticator, Credential, IdentityToolkitClient};
pub use autosave::{
    AutosaveCoordinator, AutosaveError, AutosaveEvent, LoadOutcome, SaveRequest, SessionState,
};
pub use client::{
    classify_failure, Document, DocumentPath, DocumentStore, ErrorKind, FirestoreClient,
    PathError, StoreError,
};
pub use codec::{WireFields, WireValue};
pub use config::{AuthConfig, AutosaveConfig, ConfigError, StoreConfig};
