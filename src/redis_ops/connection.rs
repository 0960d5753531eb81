use std::collections::HashSet;
use std::path::Path;

use redis::aio::MultiplexedConnection;
use redis::{ClientTlsConfig, TlsCertificates};
use tracing::debug;

use crate::config::{DumpPlan, TlsSettings};
use crate::dump::DumpError;

const SCAN_COUNT: usize = 1000;

pub(crate) fn connection_url(plan: &DumpPlan, db: u8) -> String {
    let scheme = if plan.tls.is_some() { "rediss" } else { "redis" };
    match &plan.credential {
        Some(credential) => format!(
            "{scheme}://:{credential}@{}:{}/{db}",
            plan.host, plan.port
        ),
        None => format!("{scheme}://{}:{}/{db}", plan.host, plan.port),
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, DumpError> {
    std::fs::read(path).map_err(|source| DumpError::TlsMaterial {
        path: path.to_path_buf(),
        source,
    })
}

fn tls_certificates(tls: &TlsSettings) -> Result<TlsCertificates, DumpError> {
    let root_cert = tls.ca_cert.as_deref().map(read_pem).transpose()?;
    let client_tls = match (&tls.cert, &tls.key) {
        (Some(cert), Some(key)) => Some(ClientTlsConfig {
            client_cert: read_pem(cert)?,
            client_key: read_pem(key)?,
        }),
        (None, None) => None,
        _ => return Err(DumpError::IncompleteClientCertificate),
    };
    Ok(TlsCertificates {
        client_tls,
        root_cert,
    })
}

fn build_client(plan: &DumpPlan, db: u8) -> Result<redis::Client, DumpError> {
    let url = connection_url(plan, db);
    let client = match &plan.tls {
        Some(tls) if *tls != TlsSettings::default() => {
            redis::Client::build_with_tls(url, tls_certificates(tls)?)?
        }
        _ => redis::Client::open(url)?,
    };
    Ok(client)
}

pub(crate) async fn connect_redis(
    plan: &DumpPlan,
    db: u8,
) -> Result<MultiplexedConnection, DumpError> {
    let client = build_client(plan, db)?;
    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|source| DumpError::Connection {
            addr: format!("{}:{}", plan.host, plan.port),
            source,
        })
}

async fn scan_keys(
    connection: &mut MultiplexedConnection,
    pattern: &str,
) -> Result<Vec<Vec<u8>>, DumpError> {
    let mut cursor = 0;
    let mut all_keys = Vec::new();

    loop {
        let (new_cursor, keys): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_COUNT)
            .query_async(connection)
            .await?;

        all_keys.extend(keys);
        cursor = new_cursor;

        if cursor == 0 {
            break;
        }
    }

    // SCAN may return a key more than once.
    let mut seen = HashSet::with_capacity(all_keys.len());
    all_keys.retain(|key| seen.insert(key.clone()));
    Ok(all_keys)
}

/// Keys of the selected database matching `pattern`, as raw bytes, using `KEYS` when
/// `use_keys_command` is set (servers without `SCAN`).
pub(crate) async fn list_keys(
    connection: &mut MultiplexedConnection,
    pattern: &str,
    use_keys_command: bool,
) -> Result<Vec<Vec<u8>>, DumpError> {
    if use_keys_command {
        let keys: Vec<Vec<u8>> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(connection)
            .await?;
        return Ok(keys);
    }
    scan_keys(connection, pattern).await
}

/// Database numbers listed by `INFO keyspace`, e.g. `db0:keys=1,expires=0`.
pub(crate) fn parse_keyspace(info: &str) -> Vec<u8> {
    let mut databases = Vec::new();

    for line in info.lines() {
        let Some(rest) = line.trim().strip_prefix("db") else {
            continue;
        };
        let Some((db_str, stats)) = rest.split_once(':') else {
            continue;
        };
        let Ok(db) = db_str.parse::<u8>() else {
            continue;
        };
        let empty = stats
            .split(',')
            .any(|field| field.trim() == "keys=0");
        if !empty {
            databases.push(db);
        }
    }

    databases.sort_unstable();
    databases.dedup();
    databases
}

pub(crate) async fn discover_databases(
    connection: &mut MultiplexedConnection,
) -> Result<Vec<u8>, DumpError> {
    let info: String = redis::cmd("INFO")
        .arg("keyspace")
        .query_async(connection)
        .await?;
    let databases = parse_keyspace(&info);
    debug!(?databases, "discovered non-empty databases");
    Ok(databases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DumpTarget;
    use crate::testing::plan;

    #[test]
    fn test_connection_url_without_credential() {
        let plan = plan(DumpTarget::AllDatabases);
        assert_eq!(connection_url(&plan, 3), "redis://127.0.0.1:6379/3");
    }

    #[test]
    fn test_connection_url_with_credential_and_tls() {
        let mut plan = plan(DumpTarget::SingleDatabase(1));
        plan.credential = Some("p%40ss".to_string());
        plan.tls = Some(TlsSettings::default());
        assert_eq!(connection_url(&plan, 1), "rediss://:p%40ss@127.0.0.1:6379/1");
    }

    #[test]
    fn test_client_certificate_requires_both_parts() {
        let tls = TlsSettings {
            ca_cert: None,
            cert: Some("client.pem".into()),
            key: None,
        };
        assert!(matches!(
            tls_certificates(&tls),
            Err(DumpError::IncompleteClientCertificate)
        ));
    }

    #[test]
    fn test_missing_ca_file_is_reported() {
        let tls = TlsSettings {
            ca_cert: Some("/nonexistent/ca.pem".into()),
            cert: None,
            key: None,
        };
        match tls_certificates(&tls) {
            Err(DumpError::TlsMaterial { path, .. }) => {
                assert_eq!(path, Path::new("/nonexistent/ca.pem"))
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_parse_keyspace() {
        let info = "# Keyspace\r\ndb0:keys=12,expires=0,avg_ttl=0\r\ndb3:keys=1,expires=1,avg_ttl=100\r\n";
        assert_eq!(parse_keyspace(info), vec![0, 3]);
    }

    #[test]
    fn test_parse_keyspace_skips_empty_and_garbage() {
        let info = "# Keyspace\ndb2:keys=0,expires=0\ndbx:keys=4\nused_memory:100\ndb15:keys=9\ndb1:keys=2\n";
        assert_eq!(parse_keyspace(info), vec![1, 15]);
    }

    #[test]
    fn test_parse_keyspace_empty_server() {
        assert!(parse_keyspace("# Keyspace\r\n").is_empty());
    }
}
