//! Client SDK for the dl-api backend.
//!
//! A [`DlClient`] turns collection queries into HTTP requests against the configured
//! endpoint, keeps the user session in a [`CredentialStore`](auth::CredentialStore), and
//! opens realtime channels over an event stream or a WAMP websocket session.
//!
//! ```no_run
//! use dl_api_sdk::{DlClient, DlOptions};
//!
//! # async fn run() -> dl_api_sdk::error::DlResult<()> {
//! let client = DlClient::new(DlOptions::new("1", "public-key").with_url("http://localhost/api/"))?;
//! let latest = client
//!     .collection("posts")?
//!     .where_op("votes", ">", 10)?
//!     .sort("created_at", -1)
//!     .limit(5)
//!     .get()
//!     .await?;
//! println!("{latest}");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod channel;
pub mod client;
pub mod collection;
pub mod error;
pub mod files;
pub mod key_values;
pub mod logger;
pub mod platform;
pub mod plugins;
pub mod request;
pub mod system;

#[cfg(test)]
pub mod test_support;

pub use channel::{ChannelOptions, PublishOptions, RealtimeChannel, TransportKind};
pub use client::{DlClient, DlOptions};
pub use collection::{Collection, Pagination, QuerySpec};
pub use error::{DlError, DlErrorCode, DlResult};
pub use request::{RequestData, RequestHandle};
