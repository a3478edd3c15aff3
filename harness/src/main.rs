mod entities;

use clap::{Parser, Subcommand, ValueEnum};
use entities::{Account, Contact};
use futures::StreamExt;
use sdata::prelude::*;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "A CLI tool for querying and editing SData resources")]
struct Cli {
    /// TOML file with client settings
    #[arg(short, long, env = "SDATA_CONFIG")]
    config: Option<PathBuf>,
    /// Endpoint root, e.g. https://host/sdata/slx/dynamic
    #[arg(long, env = "SDATA_BASE_URL")]
    base_url: Option<String>,
    #[arg(long, env = "SDATA_USER")]
    user: Option<String>,
    #[arg(long, env = "SDATA_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Entries requested per page
    #[arg(long)]
    page_size: Option<u32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Contact,
    Account,
}

#[derive(clap::Args)]
struct QueryArgs {
    kind: Kind,
    /// Equality filter FIELD=VALUE; repeated filters are and-ed
    #[arg(short = 'w', long = "where", value_parser = parse_assignment)]
    filters: Vec<(String, String)>,
    /// Comma-separated fields to project
    #[arg(short, long, value_delimiter = ',')]
    select: Vec<String>,
    /// Related member to include
    #[arg(short, long)]
    include: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the URL a query translates to
    Translate {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Stream query results as JSON lines
    List {
        #[command(flatten)]
        query: QueryArgs,
        /// Stop after this many results
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Read a single resource
    Get { kind: Kind, id: String },
    /// Change fields on a resource and save it
    Set {
        kind: Kind,
        id: String,
        /// Assignment FIELD=VALUE
        #[arg(required = true, value_parser = parse_assignment)]
        assignments: Vec<(String, String)>,
    },
    /// Delete a resource
    Delete { kind: Kind, id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = SDataClient::new(load_config(&cli)?, entities::catalog())?;

    let result = match cli.command {
        Commands::Translate { query } => match query.kind {
            Kind::Contact => translate::<Contact>(&client, &query),
            Kind::Account => translate::<Account>(&client, &query),
        },
        Commands::List { query, limit } => match query.kind {
            Kind::Contact => list::<Contact>(&client, &query, limit).await,
            Kind::Account => list::<Account>(&client, &query, limit).await,
        },
        Commands::Get { kind, id } => match kind {
            Kind::Contact => get::<Contact>(&client, &id).await,
            Kind::Account => get::<Account>(&client, &id).await,
        },
        Commands::Set {
            kind,
            id,
            assignments,
        } => match kind {
            Kind::Contact => set::<Contact>(&client, &id, &assignments).await,
            Kind::Account => set::<Account>(&client, &id, &assignments).await,
        },
        Commands::Delete { kind, id } => match kind {
            Kind::Contact => delete::<Contact>(&client, &id).await,
            Kind::Account => delete::<Account>(&client, &id).await,
        },
    };

    if let Err(e) = &result {
        error!("Command failed: {}", e);
    }
    Ok(result?)
}

fn load_config(cli: &Cli) -> Result<SDataConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => SDataConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => SDataConfig::new(),
    };
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url.as_str());
    }
    if let Some(user) = &cli.user {
        config = config.with_credentials(user.as_str(), cli.password.clone().unwrap_or_default());
    }
    if let Some(page_size) = cli.page_size {
        config = config.with_page_size(page_size);
    }
    config
        .validate()
        .map_err(|message| SDataError::InvalidConfig { message })?;
    Ok(config)
}

fn parse_assignment(text: &str) -> Result<(String, String), String> {
    match text.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected FIELD=VALUE, got '{}'", text)),
    }
}

/// Reads a command-line literal: null, booleans and numbers, else text.
fn parse_literal(text: &str) -> Value {
    if text == "null" {
        Value::Null
    } else if let Ok(b) = text.parse::<bool>() {
        Value::Bool(b)
    } else if let Ok(i) = text.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(f) = text.parse::<f64>() {
        Value::Float(f)
    } else {
        Value::Text(text.to_string())
    }
}

fn build_query<E: Entity>(args: &QueryArgs) -> SDataResult<Query<E>> {
    let mut query = Query::<E>::new();
    let predicate = args
        .filters
        .iter()
        .map(|(field, value)| member(field.as_str()).eq(lit(parse_literal(value))))
        .reduce(|all, next| all.and(next));
    if let Some(predicate) = predicate {
        query = query.filter(predicate);
    }
    for name in &args.include {
        query = query.include(member(name.as_str()))?;
    }
    Ok(query)
}

fn selector(fields: &[String]) -> Expr {
    construct(fields.iter().map(|f| (f.as_str(), member(f.as_str()))))
}

fn translate<E: Entity>(client: &SDataClient, args: &QueryArgs) -> SDataResult<()> {
    let query = build_query::<E>(args)?;
    let text = if args.select.is_empty() {
        client.query_text(query.node())?
    } else {
        client.query_text(query.select(selector(&args.select)).node())?
    };
    println!("{}", text);
    Ok(())
}

async fn list<E: Entity>(
    client: &SDataClient,
    args: &QueryArgs,
    limit: Option<usize>,
) -> SDataResult<()> {
    let query = build_query::<E>(args)?;
    let rows = if args.select.is_empty() {
        client
            .fetch(&query)?
            .map(|item| item.map(|tracked| record_json(tracked.entity())))
            .boxed()
    } else {
        client
            .fetch_projected(&query.select(selector(&args.select)))?
            .map(|item| item.map(|value| value.to_json()))
            .boxed()
    };

    let mut rows = rows.take(limit.unwrap_or(usize::MAX));
    let mut count = 0;
    while let Some(row) = rows.next().await {
        println!("{}", row?);
        count += 1;
    }
    info!("Listed {} {} resources", count, E::KIND);
    Ok(())
}

async fn get<E: Entity>(client: &SDataClient, id: &str) -> SDataResult<()> {
    let tracked = client.get::<E>(id).await?;
    println!("{}", record_json(tracked.entity()));
    Ok(())
}

async fn set<E: Entity>(
    client: &SDataClient,
    id: &str,
    assignments: &[(String, String)],
) -> SDataResult<()> {
    let mut tracked = client.get::<E>(id).await?;
    for (name, text) in assignments {
        let field = E::fields()
            .iter()
            .find(|field| field.name() == name && field.is_writable())
            .ok_or_else(|| SDataError::UnsupportedMember(name.clone()))?;
        field.set_from_wire(tracked.entity_mut(), &parse_literal(text).to_json())?;
    }
    client.save(&mut tracked).await?;
    println!("{}", record_json(tracked.entity()));
    Ok(())
}

async fn delete<E: Entity>(client: &SDataClient, id: &str) -> SDataResult<()> {
    let mut tracked = client.get::<E>(id).await?;
    client.delete(&mut tracked).await?;
    println!("Deleted {}('{}')", E::KIND, id);
    Ok(())
}

fn record_json<E: Entity>(entity: &E) -> serde_json::Value {
    Value::Record(entity.to_record()).to_json()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(filters: &[(&str, &str)], select: &[&str]) -> QueryArgs {
        QueryArgs {
            kind: Kind::Contact,
            filters: filters
                .iter()
                .map(|(f, v)| (f.to_string(), v.to_string()))
                .collect(),
            select: select.iter().map(|s| s.to_string()).collect(),
            include: vec!["Account".to_string()],
        }
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("FirstName=Tom").unwrap(),
            ("FirstName".to_string(), "Tom".to_string())
        );
        assert_eq!(
            parse_assignment("Note=a=b").unwrap(),
            ("Note".to_string(), "a=b".to_string())
        );
        assert!(parse_assignment("=Tom").is_err());
        assert!(parse_assignment("Tom").is_err());
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("null"), Value::Null);
        assert_eq!(parse_literal("true"), Value::Bool(true));
        assert_eq!(parse_literal("42"), Value::Int(42));
        assert_eq!(parse_literal("2.5"), Value::Float(2.5));
        assert_eq!(parse_literal("Tom"), Value::from("Tom"));
    }

    #[test]
    fn test_translate_builds_filters_and_projection() {
        let client = SDataClient::new(
            SDataConfig::new()
                .with_base_url("https://x/sdata")
                .with_token_cache_capacity(10),
            entities::catalog(),
        )
        .unwrap();

        let filters = [("FirstName", "Tom"), ("DoNotEmail", "false")];
        let query = build_query::<Contact>(&args(&filters, &[])).unwrap();
        assert_eq!(
            client.query_text(query.node()).unwrap(),
            "https://x/sdata/-/contacts?where=((FirstName eq 'Tom') and (DoNotEmail eq 0))&include=Account"
        );

        let projected = build_query::<Contact>(&args(&[], &["FirstName", "Email"]))
            .unwrap()
            .select(selector(&["FirstName".to_string(), "Email".to_string()]));
        assert_eq!(
            client.query_text(projected.node()).unwrap(),
            "https://x/sdata/-/contacts?select=FirstName,Email&include=Account"
        );
    }

    #[test]
    fn test_cli_parses_list_command() {
        let cli = Cli::try_parse_from([
            "harness",
            "--base-url",
            "https://x/sdata",
            "list",
            "contact",
            "--where",
            "LastName=Smith",
            "--select",
            "FirstName,LastName",
            "--limit",
            "5",
        ])
        .unwrap();
        match cli.command {
            Commands::List { query, limit } => {
                assert_eq!(query.filters, vec![("LastName".to_string(), "Smith".to_string())]);
                assert_eq!(query.select, vec!["FirstName", "LastName"]);
                assert_eq!(limit, Some(5));
            }
            _ => panic!("expected list command"),
        }
    }
}
