use anyhow::{Context, Result};
use discovery_core::{ConnectionOptions, DatasetDescriptor, DatasetLocator, Endpoint};
use discovery_flight::{DiscoveryClient, DiscoveryError, ErrorKind};
use futures::StreamExt;
use serde_json::{json, Value};
use std::io::Write;
use tracing::info;

use crate::config::OutputFormat;

/// Fully resolved invocation of `discover`
#[derive(Debug, Clone)]
pub struct DiscoverRequest {
    pub endpoint: Endpoint,
    pub options: ConnectionOptions,
    pub criteria: Option<String>,
    pub output: OutputFormat,
}

/// Connect, list the catalog into `out` and close. Returns the dataset count.
pub async fn discover<W: Write>(request: &DiscoverRequest, out: &mut W) -> Result<usize> {
    let client =
        DiscoveryClient::connect(request.endpoint.clone(), request.options.clone()).await?;

    let result = list(&client, request, out).await;
    client.close();
    result
}

async fn list<W: Write>(
    client: &DiscoveryClient,
    request: &DiscoverRequest,
    out: &mut W,
) -> Result<usize> {
    let mut datasets = match &request.criteria {
        Some(criteria) => client.list_datasets_with(criteria.clone()).await?,
        None => client.list_datasets().await?,
    };

    let mut count = 0;
    let mut rows = Vec::new();

    while let Some(item) = datasets.next().await {
        let descriptor = match item {
            Ok(descriptor) => descriptor,
            Err(e) if count > 0 && request.output != OutputFormat::Json => {
                return Err(anyhow::Error::new(e).context(format!(
                    "listing incomplete: only {} datasets were printed",
                    count
                )));
            }
            Err(e) => return Err(e.into()),
        };

        count += 1;
        match request.output {
            OutputFormat::Plain => writeln!(out, "{}", descriptor)?,
            OutputFormat::Long => writeln!(out, "{}", long_line(&descriptor))?,
            OutputFormat::Json => rows.push(descriptor_json(&descriptor)),
        }
        out.flush()?;
    }

    if request.output == OutputFormat::Json {
        serde_json::to_writer_pretty(&mut *out, &rows).context("writing JSON output")?;
        writeln!(out)?;
    }

    info!("Listed {} datasets from {}", count, request.endpoint);
    Ok(count)
}

fn long_line(descriptor: &DatasetDescriptor) -> String {
    let or_dash = |value: Option<u64>| value.map_or_else(|| "-".to_string(), |v| v.to_string());
    let fields = descriptor
        .schema()
        .map_or_else(|| "-".to_string(), |s| s.fields().len().to_string());

    format!(
        "{}\t{}\t{}\t{}",
        descriptor.identifier(),
        or_dash(descriptor.total_records()),
        or_dash(descriptor.total_bytes()),
        fields
    )
}

fn descriptor_json(descriptor: &DatasetDescriptor) -> Value {
    let locator = match descriptor.locator() {
        DatasetLocator::Path(segments) => json!({ "path": segments }),
        DatasetLocator::Command(cmd) => {
            json!({ "command": String::from_utf8_lossy(cmd) })
        }
    };

    let fields: Option<Vec<Value>> = descriptor.schema().map(|schema| {
        schema
            .fields()
            .iter()
            .map(|f| {
                json!({
                    "name": f.name(),
                    "type": f.data_type().to_string(),
                    "nullable": f.is_nullable(),
                })
            })
            .collect()
    });

    json!({
        "identifier": descriptor.identifier(),
        "locator": locator,
        "fields": fields,
        "total_records": descriptor.total_records(),
        "total_bytes": descriptor.total_bytes(),
        "ordered": descriptor.ordered(),
        "locations": descriptor.locations(),
    })
}

/// Process exit code for a failed run
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match error_kind(err) {
        Some(ErrorKind::Connection) => 2,
        Some(ErrorKind::Request) => 3,
        _ => 1,
    }
}

/// Kind of the discovery error behind `err`, if any
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DiscoveryError>())
        .map(DiscoveryError::kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field, Schema};
    use discovery_flight::MockCatalogServer;

    fn request(endpoint: Endpoint, output: OutputFormat) -> DiscoverRequest {
        DiscoverRequest {
            endpoint,
            options: ConnectionOptions::new().with_timeout_ms(2_000),
            criteria: None,
            output,
        }
    }

    #[tokio::test]
    async fn test_plain_output_one_per_line() {
        let server = MockCatalogServer::new()
            .with_dataset("sales/2023")
            .with_dataset("sales/2024")
            .spawn()
            .await
            .unwrap();

        let mut out = Vec::new();
        let count = discover(&request(server.endpoint(), OutputFormat::Plain), &mut out)
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(String::from_utf8(out).unwrap(), "sales/2023\nsales/2024\n");
    }

    #[tokio::test]
    async fn test_long_output() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]);
        let server = MockCatalogServer::new()
            .with_table("users", &schema, 5)
            .unwrap()
            .with_dataset("logs")
            .spawn()
            .await
            .unwrap();

        let mut out = Vec::new();
        discover(&request(server.endpoint(), OutputFormat::Long), &mut out)
            .await
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["users\t5\t-\t2", "logs\t-\t-\t-"]);
    }

    #[tokio::test]
    async fn test_json_output() {
        let schema = Schema::new(vec![Field::new("id", DataType::Int64, false)]);
        let server = MockCatalogServer::new()
            .with_table("users", &schema, 3)
            .unwrap()
            .spawn()
            .await
            .unwrap();

        let mut out = Vec::new();
        discover(&request(server.endpoint(), OutputFormat::Json), &mut out)
            .await
            .unwrap();

        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed[0]["identifier"], "users");
        assert_eq!(parsed[0]["locator"]["path"][0], "users");
        assert_eq!(parsed[0]["total_records"], 3);
        assert_eq!(parsed[0]["total_bytes"], Value::Null);
        assert_eq!(parsed[0]["fields"][0]["name"], "id");
        assert_eq!(parsed[0]["fields"][0]["type"], "Int64");
    }

    #[tokio::test]
    async fn test_partial_listing_is_reported() {
        let server = MockCatalogServer::new()
            .with_dataset("a")
            .with_dataset("b")
            .with_dataset("c")
            .fail_after(2)
            .spawn()
            .await
            .unwrap();

        let mut out = Vec::new();
        let err = discover(&request(server.endpoint(), OutputFormat::Plain), &mut out)
            .await
            .unwrap_err();

        assert_eq!(String::from_utf8(out).unwrap(), "a\nb\n");
        assert_eq!(error_kind(&err), Some(ErrorKind::Request));
        assert_eq!(exit_code(&err), 3);
        assert!(err.to_string().contains("listing incomplete"));
    }

    #[tokio::test]
    async fn test_json_output_withheld_on_failure() {
        let server = MockCatalogServer::new()
            .with_dataset("a")
            .with_dataset("b")
            .fail_after(1)
            .spawn()
            .await
            .unwrap();

        let mut out = Vec::new();
        let err = discover(&request(server.endpoint(), OutputFormat::Json), &mut out)
            .await
            .unwrap_err();

        assert!(out.is_empty());
        assert_eq!(exit_code(&err), 3);
    }

    #[tokio::test]
    async fn test_connection_failure_exit_code() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut out = Vec::new();
        let err = discover(
            &request(Endpoint::new("127.0.0.1", port), OutputFormat::Plain),
            &mut out,
        )
        .await
        .unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Connection));
        assert_eq!(exit_code(&err), 2);
        assert!(out.is_empty());
    }

    #[test]
    fn test_non_discovery_errors_exit_with_one() {
        let err = anyhow::anyhow!("bad flag");
        assert_eq!(exit_code(&err), 1);
        assert!(error_kind(&err).is_none());
    }
}
