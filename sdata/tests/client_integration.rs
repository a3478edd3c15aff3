use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use sdata::prelude::*;
use sdata::{FeedCodec, JsonFeedCodec, Materializer};
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};

const BASE: &str = "https://x/sdata";
const CONTACTS: &str = "https://x/sdata/-/contacts";

#[derive(Debug, Default, Clone, PartialEq)]
struct Contact {
    first_name: String,
    last_name: String,
    age: Option<i32>,
    do_not_email: bool,
    created: Option<DateTime<Utc>>,
    account_id: String,
}

impl Entity for Contact {
    const KIND: &'static str = "Contact";

    fn fields() -> &'static [Field<Self>] {
        static FIELDS: OnceLock<Vec<Field<Contact>>> = OnceLock::new();
        FIELDS.get_or_init(|| {
            vec![
                Field::new(
                    "FirstName",
                    |c: &Contact| &c.first_name,
                    |c: &mut Contact| &mut c.first_name,
                ),
                Field::new(
                    "LastName",
                    |c: &Contact| &c.last_name,
                    |c: &mut Contact| &mut c.last_name,
                ),
                Field::new("Age", |c: &Contact| &c.age, |c: &mut Contact| &mut c.age),
                Field::new(
                    "DoNotEmail",
                    |c: &Contact| &c.do_not_email,
                    |c: &mut Contact| &mut c.do_not_email,
                ),
                Field::new(
                    "CreateDate",
                    |c: &Contact| &c.created,
                    |c: &mut Contact| &mut c.created,
                )
                .read_only(),
                Field::new(
                    "Account",
                    |c: &Contact| &c.account_id,
                    |c: &mut Contact| &mut c.account_id,
                )
                .relationship(),
            ]
        })
    }
}

/// Serves canned responses per (method, url) and records every request.
#[derive(Default)]
struct MockTransport {
    responses: Mutex<HashMap<(Method, String), VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    fn respond(&self, method: Method, url: &str, response: HttpResponse) {
        self.responses
            .lock()
            .unwrap()
            .entry((method, url.to_string()))
            .or_default()
            .push_back(response);
    }

    fn respond_json(&self, method: Method, url: &str, body: serde_json::Value) {
        self.respond(method, url, HttpResponse::new(200, body.to_string()));
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> SDataResult<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let response = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&(request.method, request.url.clone()))
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| HttpResponse::new(404, format!("no route for {}", request.url)));
        Ok(response)
    }

    fn transport_name(&self) -> &'static str {
        "mock"
    }
}

fn catalog() -> Catalog {
    Catalog::new().with::<Contact>("contacts")
}

fn client_with(config: SDataConfig) -> (SDataClient, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::default());
    let client = SDataClient::with_transport(
        config.with_token_cache_capacity(100),
        catalog(),
        transport.clone(),
    )
    .unwrap();
    (client, transport)
}

fn client() -> (SDataClient, Arc<MockTransport>) {
    client_with(SDataConfig::new().with_base_url(BASE))
}

fn tom() -> serde_json::Value {
    json!({
        "$key": "C1",
        "$etag": "W/\"7\"",
        "FirstName": "Tom",
        "LastName": "Jones",
        "Age": 41,
        "DoNotEmail": "0",
        "CreateDate": "/Date(1700000000000)/",
        "Account": {"$key": "A1"}
    })
}

async fn load_tom(client: &SDataClient, transport: &MockTransport) -> Tracked<Contact> {
    transport.respond_json(Method::Get, &format!("{}('C1')", CONTACTS), tom());
    client.get::<Contact>("C1").await.unwrap()
}

fn body_json(request: &HttpRequest) -> serde_json::Value {
    serde_json::from_slice(request.body.as_deref().unwrap()).unwrap()
}

#[test]
fn test_filter_translates_to_where_clause() {
    let (client, _) = client();
    let query = client
        .query::<Contact>()
        .filter(member("FirstName").eq("Tom"));
    assert_eq!(
        client.query_text(query.node()).unwrap(),
        "https://x/sdata/-/contacts?where=(FirstName eq 'Tom')"
    );
}

#[test]
fn test_closed_host_value_is_inlined() {
    let (client, _) = client();
    let first = String::from("To");
    let query = client.query::<Contact>().filter(
        member("FirstName")
            .eq(capture("first", move || Value::from(first.clone())) + lit("m"))
            .and(member("Age").gt(lit(20) * lit(2))),
    );
    assert_eq!(
        client.query_text(query.node()).unwrap(),
        "https://x/sdata/-/contacts?where=((FirstName eq 'Tom') and (Age gt 40))"
    );
}

#[tokio::test]
async fn test_projection_reshapes_each_contact() {
    let (client, transport) = client();
    let url = "https://x/sdata/-/contacts?where=(FirstName eq 'Tom')&select=FirstName";
    transport.respond_json(
        Method::Get,
        url,
        json!({"$resources": [{"$key": "C1", "FirstName": "Tom"}, {"$key": "C2", "FirstName": "Tom"}]}),
    );

    let query = client
        .query::<Contact>()
        .filter(member("FirstName").eq("Tom"))
        .select(construct([("FN", member("FirstName"))]));
    let rows = client.fetch_projected_all(&query).await.unwrap();

    assert_eq!(transport.requests()[0].url, url);
    assert_eq!(rows.len(), 2);
    for row in rows {
        let Value::Record(fields) = row else {
            panic!("expected a record, got {:?}", row);
        };
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("FN"), Some(&Value::from("Tom")));
    }
}

#[tokio::test]
async fn test_projection_deserializes_into_caller_type() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "NextAge")]
        next_age: i64,
    }

    let (client, transport) = client();
    transport.respond_json(
        Method::Get,
        "https://x/sdata/-/contacts?select=LastName,FirstName,Age",
        json!({"$resources": [{"$key": "C1", "FirstName": "Tom", "LastName": "Jones", "Age": 41}]}),
    );

    let query = client.query::<Contact>().select(construct([
        ("Name", member("LastName") + lit(", ") + member("FirstName")),
        ("NextAge", member("Age") + lit(1)),
    ]));
    let rows: Vec<Row> = client
        .fetch_projected_as::<Contact, Row>(&query)
        .unwrap()
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<SDataResult<_>>()
        .unwrap();

    assert_eq!(
        rows,
        vec![Row {
            name: "Jones, Tom".to_string(),
            next_age: 42
        }]
    );
}

#[tokio::test]
async fn test_paging_is_lazy_and_fused() {
    let (client, transport) = client_with(SDataConfig::new().with_base_url(BASE).with_page_size(2));
    transport.respond_json(
        Method::Get,
        "https://x/sdata/-/contacts?count=2",
        json!({
            "$totalResults": 3, "$startIndex": 1, "$itemsPerPage": 2,
            "$resources": [{"$key": "C1", "FirstName": "A"}, {"$key": "C2", "FirstName": "B"}]
        }),
    );
    transport.respond_json(
        Method::Get,
        "https://x/sdata/-/contacts?count=2&startIndex=3",
        json!({
            "$totalResults": 3, "$startIndex": 3, "$itemsPerPage": 2,
            "$resources": [{"$key": "C3", "FirstName": "C"}]
        }),
    );

    let mut stream = client.fetch(&client.query::<Contact>()).unwrap();
    assert!(transport.requests().is_empty());

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.key(), Some("C1"));
    assert_eq!(transport.requests().len(), 1);

    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.first_name, "B");
    assert_eq!(transport.requests().len(), 1);

    let third = stream.next().await.unwrap().unwrap();
    assert_eq!(third.key(), Some("C3"));
    assert_eq!(transport.requests().len(), 2);

    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn test_materialization_applies_wire_coercions() {
    let (client, transport) = client();
    let contact = load_tom(&client, &transport).await;

    assert_eq!(contact.state(), EntityState::Unmodified);
    assert_eq!(contact.age, Some(41));
    assert!(!contact.do_not_email);
    assert_eq!(
        contact.created,
        Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
    );
    // Relationship fields are never materialized.
    assert_eq!(contact.account_id, "");
    assert_eq!(
        client.tokens().get(&EntityKey::new("Contact", "C1")).as_deref(),
        Some("W/\"7\"")
    );
}

#[tokio::test]
async fn test_format_error_ends_the_read() {
    let (client, transport) = client();
    transport.respond_json(
        Method::Get,
        CONTACTS,
        json!({
            "$next": "https://x/sdata/-/contacts?startIndex=3",
            "$resources": [
                {"$key": "C1", "Age": 30},
                {"$key": "C2", "Age": 30.5},
                {"$key": "C3", "Age": 31}
            ]
        }),
    );

    let results: Vec<_> = client
        .fetch(&client.query::<Contact>())
        .unwrap()
        .collect()
        .await;

    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    match &results[1] {
        Err(SDataError::Format {
            field,
            raw,
            expected,
        }) => {
            assert_eq!(field, "Age");
            assert_eq!(raw, "30.5");
            assert_eq!(expected, "int32");
        }
        other => panic!("expected a format error, got {:?}", other),
    }
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_failed_page_fetch_is_a_transport_error() {
    let (client, transport) = client();
    transport.respond(Method::Get, CONTACTS, HttpResponse::new(500, "down"));

    let err = client.fetch_all(&client.query::<Contact>()).await.unwrap_err();
    assert!(matches!(err, SDataError::Transport { status: 500, ref body } if body == "down"));
}

#[tokio::test]
async fn test_include_on_nested_member_fails_before_network() {
    let (client, transport) = client();
    let err = client
        .query::<Contact>()
        .include(member("Account").member("Address"))
        .unwrap_err();
    assert!(matches!(err, SDataError::InvalidQueryShape { .. }));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_include_is_appended_last() {
    let (client, transport) = client();
    let url = "https://x/sdata/-/contacts?where=(Age lt 30)&include=Account";
    transport.respond_json(Method::Get, url, json!({"$resources": []}));

    let query = client
        .query::<Contact>()
        .include(member("Account"))
        .unwrap()
        .filter(member("Age").lt(30));
    let contacts = client.fetch_all(&query).await.unwrap();

    assert!(contacts.is_empty());
    assert_eq!(transport.requests()[0].url, url);
}

#[tokio::test]
async fn test_update_sends_only_changed_fields_with_cached_token() {
    let (client, transport) = client();
    let mut contact = load_tom(&client, &transport).await;

    contact.first_name = "Thomas".to_string();
    contact.age = Some(42);
    contact.last_name = "Jones".to_string();
    contact.account_id = "A2".to_string();
    assert_eq!(contact.state(), EntityState::Modified);

    transport.respond(
        Method::Put,
        "https://x/sdata/-/contacts('C1')",
        HttpResponse::new(200, "").with_etag("W/\"8\""),
    );
    client.update(&mut contact).await.unwrap();

    let put = transport.requests().pop().unwrap();
    assert_eq!(put.method, Method::Put);
    assert_eq!(put.if_match.as_deref(), Some("W/\"7\""));
    assert_eq!(body_json(&put), json!({"FirstName": "Thomas", "Age": 42}));

    assert_eq!(contact.state(), EntityState::Unmodified);
    assert_eq!(
        client.tokens().get(&EntityKey::new("Contact", "C1")).as_deref(),
        Some("W/\"8\"")
    );
}

#[tokio::test]
async fn test_update_with_non_entry_body_takes_header_token() {
    let (client, transport) = client();
    let mut contact = load_tom(&client, &transport).await;
    contact.first_name = "Thomas".to_string();

    transport.respond(
        Method::Put,
        "https://x/sdata/-/contacts('C1')",
        HttpResponse::new(200, "<feed xmlns=\"http://www.w3.org/2005/Atom\"/>")
            .with_etag("W/\"8\""),
    );
    client.update(&mut contact).await.unwrap();

    assert_eq!(contact.state(), EntityState::Unmodified);
    assert_eq!(
        client.tokens().get(&EntityKey::new("Contact", "C1")).as_deref(),
        Some("W/\"8\"")
    );
}

#[tokio::test]
async fn test_conflict_leaves_entity_modified() {
    let (client, transport) = client();
    let mut contact = load_tom(&client, &transport).await;
    contact.last_name = "Smith".to_string();

    transport.respond(
        Method::Put,
        "https://x/sdata/-/contacts('C1')",
        HttpResponse::new(412, "version mismatch"),
    );
    let err = client.save(&mut contact).await.unwrap_err();

    assert!(matches!(
        err,
        SDataError::ConcurrencyConflict { status: 412, .. }
    ));
    assert_eq!(contact.state(), EntityState::Modified);
    assert_eq!(
        client.tokens().get(&EntityKey::new("Contact", "C1")).as_deref(),
        Some("W/\"7\"")
    );
}

#[tokio::test]
async fn test_update_without_changes_sends_nothing() {
    let (client, transport) = client();
    let mut contact = load_tom(&client, &transport).await;
    contact.first_name = "Tom".to_string();

    client.update(&mut contact).await.unwrap();
    client.save(&mut contact).await.unwrap();
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_unknown_token_sends_empty_if_match() {
    let (client, transport) = client();
    let mut contact = load_tom(&client, &transport).await;
    client.tokens().remove(&EntityKey::new("Contact", "C1"));
    contact.age = None;

    transport.respond(
        Method::Put,
        "https://x/sdata/-/contacts('C1')",
        HttpResponse::new(200, ""),
    );
    client.update(&mut contact).await.unwrap();

    let put = transport.requests().pop().unwrap();
    assert_eq!(put.if_match.as_deref(), Some(""));
    assert_eq!(body_json(&put), json!({"Age": null}));
}

#[tokio::test]
async fn test_insert_posts_writable_fields_and_assigns_key() {
    let (client, transport) = client();
    let mut contact = client.create::<Contact>().unwrap();
    assert_eq!(contact.state(), EntityState::New);

    contact.first_name = "Ada".to_string();
    contact.last_name = "Lovelace".to_string();
    contact.do_not_email = true;
    contact.account_id = "A1".to_string();
    contact.created = Some(Utc::now());

    transport.respond_json(
        Method::Post,
        CONTACTS,
        json!({"$key": "C9", "$etag": "W/\"1\"", "FirstName": "Ada"}),
    );
    client.save(&mut contact).await.unwrap();

    let post = transport.requests().pop().unwrap();
    assert_eq!(post.method, Method::Post);
    assert_eq!(post.accept, "application/json");
    assert_eq!(
        body_json(&post),
        json!({"FirstName": "Ada", "LastName": "Lovelace", "Age": null, "DoNotEmail": true})
    );

    assert_eq!(contact.key(), Some("C9"));
    assert_eq!(contact.state(), EntityState::Unmodified);
    assert_eq!(
        client.tokens().get(&EntityKey::new("Contact", "C9")).as_deref(),
        Some("W/\"1\"")
    );

    let err = client.insert(&mut contact).await.unwrap_err();
    assert!(matches!(err, SDataError::InvalidState { operation: "insert", .. }));
}

#[tokio::test]
async fn test_insert_failure_keeps_entity_new() {
    let (client, transport) = client();
    let mut contact = client.create::<Contact>().unwrap();
    transport.respond(Method::Post, CONTACTS, HttpResponse::new(400, "bad payload"));

    let err = client.insert(&mut contact).await.unwrap_err();
    assert!(matches!(err, SDataError::Transport { status: 400, .. }));
    assert_eq!(contact.state(), EntityState::New);
    assert!(contact.key().is_none());
}

#[tokio::test]
async fn test_delete_evicts_token_and_is_terminal() {
    let (client, transport) = client();
    let mut contact = load_tom(&client, &transport).await;

    transport.respond(
        Method::Delete,
        "https://x/sdata/-/contacts('C1')",
        HttpResponse::new(204, ""),
    );
    client.delete(&mut contact).await.unwrap();

    let delete = transport.requests().pop().unwrap();
    assert_eq!(delete.if_match.as_deref(), Some("W/\"7\""));
    assert!(delete.body.is_none());
    assert_eq!(contact.state(), EntityState::Deleted);
    assert!(client.tokens().get(&EntityKey::new("Contact", "C1")).is_none());

    assert!(matches!(
        client.save(&mut contact).await,
        Err(SDataError::InvalidState { operation: "save", .. })
    ));
    assert!(matches!(
        client.delete(&mut contact).await,
        Err(SDataError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_get_missing_resource() {
    let (client, _) = client();
    let err = client.get::<Contact>("nope").await.unwrap_err();
    assert!(matches!(err, SDataError::Transport { status: 404, .. }));
}

#[tokio::test]
async fn test_insert_payload_materializes_back_to_equal_entity() {
    let (client, transport) = client();
    let mut contact = client.create::<Contact>().unwrap();
    contact.first_name = "Grace".to_string();
    contact.last_name = "Hopper".to_string();
    contact.age = Some(85);
    contact.do_not_email = true;

    transport.respond_json(Method::Post, CONTACTS, json!({"$key": "C5"}));
    client.insert(&mut contact).await.unwrap();

    let post = transport.requests().pop().unwrap();
    let entry = JsonFeedCodec.decode_entry(post.body.as_deref().unwrap()).unwrap();
    let resolver = Arc::new(ResourceResolver::new(Arc::new(catalog())));
    let materializer = Materializer::new(resolver, Arc::new(TokenStore::new()));
    let copy = materializer.materialize::<Contact>(&entry).unwrap();

    assert_eq!(copy.writable_record(), contact.writable_record());
}
