use std::{env, time::Duration};

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::debug;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DATABASE: &str = "songsheet_sync";
const PING_ATTEMPTS: u32 = 5;
const FIRST_PING_RETRY: Duration = Duration::from_millis(200);
const MAX_PING_RETRY: Duration = Duration::from_secs(2);

/// Parsed client options plus the database holding the session collections.
#[derive(Clone)]
pub struct MongoConfig {
    options: ClientOptions,
    database_name: String,
}

impl MongoConfig {
    /// Parse `uri`; `database_name` defaults to `songsheet_sync`.
    pub async fn from_uri(uri: &str, database_name: Option<&str>) -> MongoResult<Self> {
        let options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;

        Ok(Self {
            options,
            database_name: database_name.unwrap_or(DEFAULT_DATABASE).to_owned(),
        })
    }

    /// `MONGO_URI` is required, `MONGO_DB` defaults to `songsheet_sync`.
    pub async fn from_env() -> MongoResult<Self> {
        let uri =
            env::var("MONGO_URI").map_err(|_| MongoDaoError::MissingEnvVar { var: "MONGO_URI" })?;
        let database_name = env::var("MONGO_DB").ok();
        Self::from_uri(&uri, database_name.as_deref()).await
    }

    /// Database holding the session collections.
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Open the database and wait for the server to answer a ping.
    ///
    /// The driver connects lazily; the ping is the first real round trip.
    pub async fn open_database(&self) -> MongoResult<Database> {
        let client = Client::with_options(self.options.clone())
            .map_err(|source| MongoDaoError::ClientConstruction { source })?;
        let database = client.database(&self.database_name);

        let mut attempt = 1;
        let mut retry_in = FIRST_PING_RETRY;
        loop {
            match database.run_command(doc! { "ping": 1 }).await {
                Ok(_) => return Ok(database),
                Err(source) if attempt >= PING_ATTEMPTS => {
                    return Err(MongoDaoError::InitialPing {
                        attempts: attempt,
                        source,
                    });
                }
                Err(err) => {
                    debug!(attempt, error = %err, database = %self.database_name, "MongoDB ping failed; retrying");
                    sleep(retry_in).await;
                    retry_in = (retry_in * 2).min(MAX_PING_RETRY);
                    attempt += 1;
                }
            }
        }
    }
}
