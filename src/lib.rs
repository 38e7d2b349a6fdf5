//! Mockhub Server
//!
//! A dynamic mock server. Owners register versioned mock endpoints and any
//! client can then call them through the dispatch prefix (`/mock/...`),
//! getting back the stored status and JSON body of the best matching
//! definition.
//!
//! # Features
//!
//! - **Versioned Mocks**: Every change appends a new version; older versions stay queryable
//! - **Conditional Matching**: Header and query rules: exact, regex, contains, prefix, suffix
//! - **Priorities**: Highest priority wins, newest version breaks ties
//! - **Per-call Overrides**: Delay, status and method through request headers
//! - **Rate Limiting**: Token buckets per authenticated owner or client address
//! - **Response Templates**: `{{uuid}}`, `{{timestamp}}`, `{{random 1 10}}`, request fields, ...
//!
//! # Example Configuration
//!
//! ```yaml
//! listen: 127.0.0.1:8080
//! owners:
//!   - id: 1
//!     username: demo
//! mocks:
//!   - owner: demo
//!     path: /hello
//!     method: GET
//!     response_body: '{"message":"Hello, World!","id":"{{uuid}}"}'
//! ```
//!
//! `curl -H 'X-Mock-User: demo' http://127.0.0.1:8080/mock/hello`

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod matcher;
pub mod model;
pub mod page;
pub mod pattern;
pub mod ratelimit;
pub mod registry;
pub mod server;
pub mod store;
pub mod template;

pub use config::MockServerConfig;
pub use dispatcher::{DispatchRequest, DispatchResponse, Dispatcher};
pub use error::{MockError, Result};
pub use model::{MockDefinition, MockDraft, MockId, OwnerId};
pub use registry::MockRegistry;
pub use server::MockServer;
