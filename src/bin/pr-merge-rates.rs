use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

#[path = "../bigquery.rs"]
mod bigquery;
#[path = "../credentials.rs"]
mod credentials;
#[path = "../logging.rs"]
mod logging;

use bigquery::{format_row, Client, QueryRequest, DEFAULT_ENDPOINT};
use credentials::Credentials;

const QUERY: &str = r#"
SELECT language, 100*sum(merged="true")/count(*), "% of prs merged of", count(*)
FROM (
    SELECT
        repo_name,
        JSON_EXTRACT(payload, '$.action') as action,
        JSON_EXTRACT(payload, '$.pull_request.merged') as merged,
        JSON_EXTRACT(payload, '$.repo.language') as language,
        payload
    FROM [githubarchive:month.201604]
    WHERE type = "PullRequestEvent"
    LIMIT 1000
)
WHERE action = '"closed"'
GROUP BY language
;"#;

/// Ask BigQuery which share of closed pull requests got merged, per language
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Google Cloud project the query job is billed to
    project_id: String,

    /// BigQuery REST API base URL
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// How long the service may work on the query before answering
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(args.verbose);

    let credentials = Credentials::from_environment()?;
    let client = Client::new(&args.endpoint, credentials);

    info!("running query for project {}", args.project_id);
    let resp = client
        .query(&args.project_id, &QueryRequest::legacy(QUERY, args.timeout_ms))
        .with_context(|| format!("query in project {} failed", args.project_id))?;

    debug!(
        "{} rows, columns: {}",
        resp.total_rows.as_deref().unwrap_or("0"),
        resp.column_names().join(", ")
    );

    println!("Query Results:");
    for row in &resp.rows {
        println!("{}", format_row(row));
    }
    Ok(())
}
