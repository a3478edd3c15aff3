//! Paged execution of translated queries.
//!
//! A query executes as a lazy, forward-only stream. Pages are requested only
//! when the consumer has drained the previous one, and the page fetch is the
//! only suspension point. Entries within a page are materialized
//! synchronously. The first error ends the stream after being yielded;
//! entities yielded before it stay valid.

use crate::catalog::ResourceResolver;
use crate::entity::Entity;
use crate::error::{SDataError, SDataResult};
use crate::feed::{with_query_param, FeedCodec, FeedEntry, FeedPage};
use crate::query::{evaluate, Expr};
use crate::tokens::TokenStore;
use crate::tracking::Tracked;
use crate::transport::{HttpRequest, Method, Transport};
use crate::value::Value;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Issues GET requests and decodes the responses as feed pages.
#[derive(Clone)]
pub struct PageFetcher {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn FeedCodec>,
}

impl PageFetcher {
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<dyn FeedCodec>) -> Self {
        Self { transport, codec }
    }

    pub async fn fetch(&self, url: &str) -> SDataResult<FeedPage> {
        let request = HttpRequest::new(Method::Get, url, self.codec.media_type());
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(SDataError::Transport {
                status: response.status,
                body: response.body_text(),
            });
        }
        let page = self.codec.decode_page(&response.body, url)?;
        debug!(
            "Fetched page {} with {} entries (total: {:?})",
            url,
            page.entries.len(),
            page.total_results
        );
        Ok(page)
    }
}

/// Builds tracked entities from feed entries.
#[derive(Clone)]
pub struct Materializer {
    resolver: Arc<ResourceResolver>,
    tokens: Arc<TokenStore>,
}

impl Materializer {
    pub fn new(resolver: Arc<ResourceResolver>, tokens: Arc<TokenStore>) -> Self {
        Self { resolver, tokens }
    }

    /// Instantiates `E`, copies every non-relationship payload field through
    /// its wire coercion, then assigns the key and records the version token.
    pub fn materialize<E: Entity>(&self, entry: &FeedEntry) -> SDataResult<Tracked<E>> {
        let mut entity = self.resolver.instantiate::<E>()?;
        for field in E::fields().iter().filter(|f| !f.is_relationship()) {
            match entry.payload.get(field.name()) {
                None | Some(serde_json::Value::Null) => {}
                Some(raw) => field.set_from_wire(&mut entity, raw)?,
            }
        }

        let tracked = Tracked::materialized(entity, entry.key.clone());
        if let (Some(identity), Some(version)) = (tracked.identity(), entry.version.as_ref()) {
            self.tokens.insert(identity, version.clone());
        }
        Ok(tracked)
    }
}

struct Cursor<F> {
    pages: PageFetcher,
    pending: VecDeque<FeedEntry>,
    next: Option<String>,
    convert: F,
}

async fn advance<T, F>(mut cursor: Cursor<F>) -> SDataResult<Option<(T, Cursor<F>)>>
where
    F: FnMut(FeedEntry) -> SDataResult<T>,
{
    loop {
        if let Some(entry) = cursor.pending.pop_front() {
            let item = (cursor.convert)(entry)?;
            return Ok(Some((item, cursor)));
        }

        let Some(url) = cursor.next.take() else {
            debug!("Feed exhausted");
            return Ok(None);
        };
        let page = cursor.pages.fetch(&url).await?;
        cursor.pending.extend(page.entries);
        cursor.next = match page.next {
            Some(next) if next == url => {
                warn!("Feed at {} links to itself; stopping", url);
                None
            }
            next => next,
        };
    }
}

pub struct Executor {
    pages: PageFetcher,
    materializer: Materializer,
    page_size: Option<u32>,
}

impl Executor {
    pub fn new(pages: PageFetcher, materializer: Materializer) -> Self {
        Self {
            pages,
            materializer,
            page_size: None,
        }
    }

    pub fn with_page_size(mut self, page_size: Option<u32>) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    pub fn pages(&self) -> &PageFetcher {
        &self.pages
    }

    /// URL of the first page for `query_text`.
    pub fn first_page_url(&self, query_text: &str) -> String {
        match self.page_size {
            Some(count) => with_query_param(query_text, "count", &count.to_string()),
            None => query_text.to_string(),
        }
    }

    /// Streams every entry of the feed at `query_text` through `convert`.
    pub fn stream<T, F>(&self, query_text: &str, convert: F) -> BoxStream<'static, SDataResult<T>>
    where
        T: Send + 'static,
        F: FnMut(FeedEntry) -> SDataResult<T> + Send + 'static,
    {
        let cursor = Cursor {
            pages: self.pages.clone(),
            pending: VecDeque::new(),
            next: Some(self.first_page_url(query_text)),
            convert,
        };
        stream::try_unfold(cursor, advance).fuse().boxed()
    }

    pub fn entities<E: Entity>(&self, query_text: &str) -> BoxStream<'static, SDataResult<Tracked<E>>> {
        let materializer = self.materializer.clone();
        self.stream(query_text, move |entry| materializer.materialize::<E>(&entry))
    }

    /// Materializes each entity, then reshapes it through `projector`.
    pub fn projected<E: Entity>(
        &self,
        query_text: &str,
        projector: Expr,
    ) -> BoxStream<'static, SDataResult<Value>> {
        let materializer = self.materializer.clone();
        self.stream(query_text, move |entry| {
            let tracked = materializer.materialize::<E>(&entry)?;
            evaluate(&projector, Some(&Value::Record(tracked.entity().to_record())))
        })
    }
}
