//! Run one SOQL SELECT and print the rows as JSON lines.
//!
//! ```sh
//! export SF_ACCESS_TOKEN=... SF_INSTANCE_URL=https://mydomain.my.salesforce.com
//! # or SF_CONSUMER_KEY, SF_CONSUMER_SECRET, SF_USERNAME, SF_PASSWORD [, SF_HOST]
//! cargo run --bin soql -- [--dict] "SELECT Id, Account.Name FROM Contact LIMIT 5"
//! ```
//!
//! Set `RUST_LOG=busbar_sf_dbapi=debug` to see the requests.

use std::sync::Arc;

use busbar_sf_auth::{Authenticator, ConnectionSettings, PasswordAuth, StaticTokenAuth};
use busbar_sf_client::ClientConfig;
use busbar_sf_dbapi::{Connections, DatabaseConfig, RowType, DEFAULT_ALIAS};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut row_type = RowType::List;
    let mut soql = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--dict" => row_type = RowType::Dict,
            _ if soql.is_none() => soql = Some(arg),
            _ => usage(),
        }
    }
    let Some(soql) = soql else { usage() };

    let config = DatabaseConfig::builder(DEFAULT_ALIAS)
        .row_type(row_type)
        .build();
    let authenticator = authenticator(&config.client).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let connections = Connections::new();
    if let Err(e) = connections.connect(config, authenticator).await {
        eprintln!("Error: Failed to connect: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(&connections, &soql).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(connections: &Connections, soql: &str) -> busbar_sf_dbapi::Result<()> {
    let mut cursor = connections.cursor(DEFAULT_ALIAS)?;
    cursor.execute_soql(soql, vec![]).await?;
    eprintln!("{} rows", cursor.rowcount());
    while let Some(row) = cursor.fetch_one().await? {
        println!("{}", row.to_json());
    }
    cursor.close();
    Ok(())
}

/// A static token when one is exported, otherwise the password grant sent
/// with the timeouts and user agent of `client`.
fn authenticator(client: &ClientConfig) -> busbar_sf_auth::Result<Arc<dyn Authenticator>> {
    if std::env::var_os("SF_ACCESS_TOKEN").is_some() {
        return Ok(Arc::new(StaticTokenAuth::from_env()?));
    }
    let settings = ConnectionSettings::from_env()?;
    Ok(Arc::new(PasswordAuth::with_client_config(settings, client)?))
}

fn usage() -> ! {
    eprintln!("Usage: soql [--dict] \"SELECT ...\"");
    std::process::exit(2);
}
