pub mod catalog;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod executor;
pub mod feed;
pub mod query;
pub mod tokens;
pub mod tracking;
pub mod transport;
pub mod value;

pub use catalog::{Catalog, CatalogEntry, ResourceResolver};
pub use client::SDataClient;
pub use config::{Credentials, SDataConfig};
pub use entity::{Entity, Field, FieldValue, WireType};
pub use error::{SDataError, SDataResult};
pub use executor::{Executor, Materializer, PageFetcher};
pub use feed::{FeedCodec, FeedEntry, FeedPage, JsonFeedCodec};
pub use query::{Expr, Projected, Query, QueryNode, TranslationResult, Translator};
pub use tokens::{EntityKey, TokenScope, TokenStore};
pub use tracking::{EntityState, Tracked};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
pub use value::{Record, Value};

pub mod prelude {
    pub use crate::catalog::*;
    pub use crate::client::*;
    pub use crate::config::*;
    pub use crate::entity::{Entity, Field, FieldValue, WireType};
    pub use crate::error::*;
    pub use crate::query::{call, capture, construct, lit, member, param, Expr, Projected, Query};
    pub use crate::tokens::*;
    pub use crate::tracking::*;
    pub use crate::transport::*;
    pub use crate::value::*;
}
