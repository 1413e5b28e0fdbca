//! Redshift `COPY` over the Postgres wire protocol

use super::{CopyOptions, TableRef, Warehouse};
use crate::config::RedshiftConfig;
use crate::storage::ObjectLocation;
use async_trait::async_trait;
use eyre::{Context, Result};
use tokio_postgres::{NoTls, SimpleQueryMessage};

/// Redshift cluster loading objects straight from S3
///
/// A connection is opened per load. The `COPY` statement runs as a single
/// implicit transaction, so a failed load leaves the table unchanged.
pub struct RedshiftWarehouse {
    config: RedshiftConfig,
}

impl RedshiftWarehouse {
    pub fn new(config: RedshiftConfig) -> Self {
        Self { config }
    }

    /// Build the `COPY` statement for one object
    pub fn copy_statement(&self, source: &ObjectLocation, table: &TableRef, options: &CopyOptions) -> String {
        let mut sql = format!(
            "COPY {} FROM '{}' IAM_ROLE '{}'",
            table,
            quote(&format!("s3://{}/{}", source.bucket, source.key)),
            quote(&self.config.iam_role)
        );
        if let Some(region) = &self.config.region {
            sql.push_str(&format!(" REGION '{}'", quote(region)));
        }
        sql.push(' ');
        sql.push_str(&options.to_sql());
        sql
    }

    async fn connect(&self) -> Result<tokio_postgres::Client> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.config.host)
            .port(self.config.port)
            .user(&self.config.user)
            .password(&self.config.password)
            .dbname(&self.config.database);

        let (client, connection) = pg
            .connect(NoTls)
            .await
            .with_context(|| format!("Failed to connect to {}", self.describe()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::warn!("Redshift connection closed with error: {}", e);
            }
        });
        Ok(client)
    }
}

fn rows_copied(messages: &[SimpleQueryMessage]) -> u64 {
    messages
        .iter()
        .filter_map(|message| match message {
            SimpleQueryMessage::CommandComplete(rows) => Some(*rows),
            _ => None,
        })
        .sum()
}

fn quote(literal: &str) -> String {
    literal.replace('\'', "''")
}

#[async_trait]
impl Warehouse for RedshiftWarehouse {
    async fn copy_from(
        &self,
        source: &ObjectLocation,
        table: &TableRef,
        options: &CopyOptions,
    ) -> Result<u64> {
        let client = self.connect().await?;
        let sql = self.copy_statement(source, table, options);
        log::debug!("COPY {} FROM s3://{}/{} {}", table, source.bucket, source.key, options.to_sql());

        // Simple-query protocol: Redshift only prepares DML
        let messages = client
            .simple_query(&sql)
            .await
            .with_context(|| format!("COPY into {} failed", table))?;
        Ok(rows_copied(&messages))
    }

    fn describe(&self) -> String {
        format!(
            "redshift://{}@{}:{}/{}",
            self.config.user, self.config.host, self.config.port, self.config.database
        )
    }
}
