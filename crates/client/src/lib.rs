//! Catalog data-access layer.
//!
//! [`CatalogClient`] binds one facility to:
//! - authenticated, versioned HTTP calls against the catalog REST API
//! - cached querying through a per-facility [`ResultCache`]
//! - entity wrapping of raw rows
//! - the login/logout protocol and the shared [`SessionStore`]
//!
//! The download/cart backend is reached through [`DownloadApi`].

pub mod cache;
pub mod client;
pub mod dispatch;
pub mod download_api;
pub mod error;
pub mod http;
pub mod login;
pub mod query_builder;
pub mod session_store;
pub mod signout;

pub use cache::{CacheRegistry, ResultCache};
pub use client::{CatalogClient, DEFAULT_QUERY_TTL, QueryCache, QueryCacheRegistry, Rows};
pub use dispatch::{
    Arg, ArgKind, EntitiesInput, LogoutInput, Overloads, QueryInput, WriteInput,
};
pub use download_api::{Download, DownloadApi, DownloadItem, DownloadStatus, SubmitCartRequest};
pub use error::{ClientError, ClientResult};
pub use http::RequestOptions;
pub use login::{LoginOutcome, credentials_payload};
pub use query_builder::{Direction, QueryBuilder};
pub use session_store::{SessionEvent, SessionEventKind, SessionStore};
pub use signout::{ExternalSignOut, HttpSignOut, NoSignOut};
