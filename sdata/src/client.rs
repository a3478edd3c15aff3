use crate::catalog::{Catalog, ResourceResolver};
use crate::config::SDataConfig;
use crate::entity::Entity;
use crate::error::{SDataError, SDataResult};
use crate::executor::{Executor, Materializer, PageFetcher};
use crate::feed::{FeedCodec, FeedEntry, JsonFeedCodec};
use crate::query::{
    evaluate, partial_eval_node, Expr, Projected, Query, QueryNode, TranslationResult, Translator,
};
use crate::tokens::{EntityKey, TokenStore};
use crate::tracking::{EntityState, Tracked};
use crate::transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
use crate::value::{Record, Value};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entry point for querying and persisting SData resources.
pub struct SDataClient {
    config: SDataConfig,
    translator: Translator,
    executor: Executor,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn FeedCodec>,
    tokens: Arc<TokenStore>,
}

impl SDataClient {
    /// Client over HTTP, configured from `config`.
    pub fn new(config: SDataConfig, catalog: Catalog) -> SDataResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Self::with_transport(config, catalog, transport)
    }

    /// Client over an arbitrary transport.
    pub fn with_transport(
        config: SDataConfig,
        catalog: Catalog,
        transport: Arc<dyn Transport>,
    ) -> SDataResult<Self> {
        config
            .validate()
            .map_err(|message| SDataError::InvalidConfig { message })?;

        let tokens = match config.token_cache_capacity {
            Some(capacity) => Arc::new(TokenStore::with_capacity(capacity)),
            None => TokenStore::global(),
        };
        let resolver = Arc::new(ResourceResolver::new(Arc::new(catalog)));
        let translator = Translator::new(config.normalized_base_url(), Arc::clone(&resolver));
        let codec: Arc<dyn FeedCodec> = Arc::new(JsonFeedCodec::new());
        let executor = Self::build_executor(&config, &transport, &codec, resolver, &tokens);

        info!(
            "SData client for {} using {} transport",
            translator.base_url(),
            transport.transport_name()
        );

        Ok(Self {
            config,
            translator,
            executor,
            transport,
            codec,
            tokens,
        })
    }

    fn build_executor(
        config: &SDataConfig,
        transport: &Arc<dyn Transport>,
        codec: &Arc<dyn FeedCodec>,
        resolver: Arc<ResourceResolver>,
        tokens: &Arc<TokenStore>,
    ) -> Executor {
        Executor::new(
            PageFetcher::new(Arc::clone(transport), Arc::clone(codec)),
            Materializer::new(resolver, Arc::clone(tokens)),
        )
        .with_page_size(config.page_size)
    }

    fn rebuild_executor(&mut self) {
        self.executor = Self::build_executor(
            &self.config,
            &self.transport,
            &self.codec,
            Arc::clone(self.translator.resolver()),
            &self.tokens,
        );
    }

    pub fn with_codec(mut self, codec: Arc<dyn FeedCodec>) -> Self {
        self.codec = codec;
        self.rebuild_executor();
        self
    }

    pub fn with_token_store(mut self, tokens: Arc<TokenStore>) -> Self {
        self.tokens = tokens;
        self.rebuild_executor();
        self
    }

    pub fn config(&self) -> &SDataConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    pub fn query<E: Entity>(&self) -> Query<E> {
        Query::new()
    }

    /// Folds closed sub-expressions and translates the chain.
    pub fn translate(&self, node: &QueryNode) -> SDataResult<TranslationResult> {
        let node = partial_eval_node(node.clone())?;
        let result = self.translator.translate(&node)?;
        debug!("Translated query: {}", result.query_text);
        Ok(result)
    }

    /// URL the chain would fetch, without executing it.
    pub fn query_text(&self, node: &QueryNode) -> SDataResult<String> {
        Ok(self.translate(node)?.query_text)
    }

    pub fn fetch<E: Entity>(
        &self,
        query: &Query<E>,
    ) -> SDataResult<BoxStream<'static, SDataResult<Tracked<E>>>> {
        let translation = self.translate(query.node())?;
        if translation.projector.is_some() {
            return Err(SDataError::shape("entity query carries a projection"));
        }
        Ok(self.executor.entities::<E>(&translation.query_text))
    }

    pub async fn fetch_all<E: Entity>(&self, query: &Query<E>) -> SDataResult<Vec<Tracked<E>>> {
        let entities: Vec<Tracked<E>> = self.fetch(query)?.try_collect().await?;
        info!("Fetched {} {} entities", entities.len(), E::KIND);
        Ok(entities)
    }

    pub fn fetch_projected<E: Entity>(
        &self,
        query: &Projected<E>,
    ) -> SDataResult<BoxStream<'static, SDataResult<Value>>> {
        let (query_text, projector) = self.translate_projected(query)?;
        Ok(self.executor.projected::<E>(&query_text, projector))
    }

    pub async fn fetch_projected_all<E: Entity>(
        &self,
        query: &Projected<E>,
    ) -> SDataResult<Vec<Value>> {
        self.fetch_projected(query)?.try_collect().await
    }

    /// Projected results deserialized into `T`.
    pub fn fetch_projected_as<E, T>(
        &self,
        query: &Projected<E>,
    ) -> SDataResult<BoxStream<'static, SDataResult<T>>>
    where
        E: Entity,
        T: DeserializeOwned + Send + 'static,
    {
        let (query_text, projector) = self.translate_projected(query)?;
        let materializer = self.executor.materializer().clone();
        Ok(self.executor.stream(&query_text, move |entry| {
            let tracked = materializer.materialize::<E>(&entry)?;
            evaluate(&projector, Some(&Value::Record(tracked.entity().to_record())))?
                .deserialize::<T>()
        }))
    }

    fn translate_projected<E: Entity>(
        &self,
        query: &Projected<E>,
    ) -> SDataResult<(String, Expr)> {
        let translation = self.translate(query.node())?;
        let projector = translation
            .projector
            .ok_or_else(|| SDataError::shape("projected query has no selector"))?;
        Ok((translation.query_text, projector))
    }

    /// Reads the single resource of kind `E` with key `id`.
    pub async fn get<E: Entity>(&self, id: &str) -> SDataResult<Tracked<E>> {
        let url = self.translator.id_to_query_text(E::KIND, id)?;
        let response = self
            .send(HttpRequest::new(Method::Get, &url, self.codec.media_type()))
            .await?;
        if !response.is_success() {
            return Err(SDataError::Transport {
                status: response.status,
                body: response.body_text(),
            });
        }
        let mut entry = self.codec.decode_entry(&response.body)?;
        if entry.version.is_none() {
            entry.version = response.etag;
        }
        self.executor.materializer().materialize::<E>(&entry)
    }

    /// Fresh instance of `E` in state `New`.
    pub fn create<E: Entity>(&self) -> SDataResult<Tracked<E>> {
        Ok(Tracked::new(self.translator.resolver().instantiate::<E>()?))
    }

    /// Dispatches on persistence state: insert when new, update when modified.
    pub async fn save<E: Entity>(&self, tracked: &mut Tracked<E>) -> SDataResult<()> {
        match tracked.state() {
            EntityState::New => self.insert(tracked).await,
            EntityState::Modified => self.update(tracked).await,
            EntityState::Unmodified => Ok(()),
            EntityState::Deleted => Err(invalid_state("save", EntityState::Deleted)),
        }
    }

    /// POSTs every writable field to the resource collection.
    pub async fn insert<E: Entity>(&self, tracked: &mut Tracked<E>) -> SDataResult<()> {
        let state = tracked.state();
        if state != EntityState::New {
            return Err(invalid_state("insert", state));
        }

        let url = self.translator.resource_url(E::KIND)?;
        let entry = FeedEntry {
            payload: to_payload(tracked.writable_record()),
            ..FeedEntry::default()
        };
        let request = HttpRequest::new(Method::Post, &url, self.codec.media_type())
            .with_body(self.codec.encode_entry(&entry)?);
        let response = self.send_mutation(request).await?;

        let created = self.codec.decode_entry(&response.body)?;
        let key = created.key.ok_or_else(|| {
            SDataError::from(<serde_json::Error as serde::de::Error>::custom(
                "insert response carries no resource key",
            ))
        })?;
        let identity = EntityKey::new(E::KIND, key.clone());
        if let Some(version) = created.version.or(response.etag) {
            self.tokens.insert(identity.clone(), version);
        }
        tracked.mark_persisted(Some(key));
        info!("Inserted {}", identity);
        Ok(())
    }

    /// PUTs the fields that differ from the last persisted values.
    pub async fn update<E: Entity>(&self, tracked: &mut Tracked<E>) -> SDataResult<()> {
        let state = tracked.state();
        if matches!(state, EntityState::New | EntityState::Deleted) {
            return Err(invalid_state("update", state));
        }
        let changed = tracked.changed_fields();
        if changed.is_empty() {
            debug!("No changed fields on {}; skipping update", E::KIND);
            return Ok(());
        }
        let identity = require_identity(tracked, "update")?;

        let url = self.translator.id_to_query_text(E::KIND, &identity.id)?;
        let entry = FeedEntry {
            payload: to_payload(changed),
            ..FeedEntry::default()
        };
        let request = HttpRequest::new(Method::Put, &url, self.codec.media_type())
            .with_if_match(self.if_match(&identity))
            .with_body(self.codec.encode_entry(&entry)?);
        let response = self.send_mutation(request).await?;

        // The update is committed once the status is 2xx; a body that is not
        // an entry only means the version comes from the header.
        let version = match self.codec.decode_entry(&response.body) {
            Ok(entry) => entry.version,
            Err(e) => {
                if !response.body.is_empty() {
                    debug!("Update response for {} is not an entry: {}", identity, e);
                }
                None
            }
        };
        if let Some(version) = version.or(response.etag) {
            self.tokens.insert(identity.clone(), version);
        }
        tracked.mark_persisted(None);
        info!("Updated {}", identity);
        Ok(())
    }

    pub async fn delete<E: Entity>(&self, tracked: &mut Tracked<E>) -> SDataResult<()> {
        let state = tracked.state();
        if matches!(state, EntityState::New | EntityState::Deleted) {
            return Err(invalid_state("delete", state));
        }
        let identity = require_identity(tracked, "delete")?;

        let url = self.translator.id_to_query_text(E::KIND, &identity.id)?;
        let request = HttpRequest::new(Method::Delete, &url, self.codec.media_type())
            .with_if_match(self.if_match(&identity));
        self.send_mutation(request).await?;

        self.tokens.remove(&identity);
        tracked.mark_deleted();
        info!("Deleted {}", identity);
        Ok(())
    }

    /// Cached token for `identity`, or an empty precondition when none is known.
    fn if_match(&self, identity: &EntityKey) -> String {
        self.tokens.get(identity).unwrap_or_else(|| {
            debug!("No version token cached for {}", identity);
            String::new()
        })
    }

    async fn send(&self, request: HttpRequest) -> SDataResult<HttpResponse> {
        self.transport.send(request).await
    }

    async fn send_mutation(&self, request: HttpRequest) -> SDataResult<HttpResponse> {
        let method = request.method;
        let url = request.url.clone();
        let response = self.send(request).await?;
        if response.is_success() {
            return Ok(response);
        }
        let err = SDataError::from_mutation_status(response.status, response.body_text());
        if err.is_conflict() {
            warn!("{} {} rejected with {}: stale version", method, url, response.status);
        }
        Err(err)
    }
}

fn invalid_state(operation: &'static str, state: EntityState) -> SDataError {
    SDataError::InvalidState {
        operation,
        state: state.to_string(),
    }
}

fn require_identity<E: Entity>(
    tracked: &Tracked<E>,
    operation: &'static str,
) -> SDataResult<EntityKey> {
    tracked.identity().ok_or(SDataError::InvalidState {
        operation,
        state: format!("{} without key", tracked.state()),
    })
}

fn to_payload(record: Record) -> BTreeMap<String, serde_json::Value> {
    record
        .into_iter()
        .map(|(name, value)| (name, value.to_json()))
        .collect()
}
