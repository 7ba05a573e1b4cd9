//! AWS client construction and the shared retry wrapper.
//!
//! Clients are built per source from the connection config: static keys win
//! over a named profile, and the default provider chain is the fallback. A
//! custom endpoint turns the region into `Region::Custom`, which is how
//! localstack and MinIO targets are addressed.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use log::warn;
use rusoto_core::{HttpClient, Region, RusotoError};
use rusoto_credential::{ChainProvider, ProfileProvider, StaticProvider};
use rusoto_logs::CloudWatchLogsClient;
use rusoto_s3::S3Client;
use tokio::time::sleep;

use crate::collector::RunContext;
use crate::config::ConnectionConfig;
use crate::constants::{DEFAULT_REGION, RETRY_MAX_DELAY_SECS};
use crate::errors::{CollectError, CollectResult};

/// Resolve the effective region: source region, then connection default,
/// then the global default. A configured endpoint forces `Region::Custom`.
pub(crate) fn resolve_region(
    connection: &ConnectionConfig,
    source_region: Option<&str>,
) -> CollectResult<Region> {
    let name = source_region
        .map(str::to_string)
        .or_else(|| connection.default_region.clone())
        .unwrap_or_else(|| DEFAULT_REGION.to_string());

    if let Some(endpoint) = &connection.endpoint_url {
        return Ok(Region::Custom {
            name,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        });
    }

    Region::from_str(&name)
        .map_err(|e| CollectError::Config(format!("invalid region '{}': {}", name, e)))
}

enum Credentials {
    Static(StaticProvider),
    Profile(ProfileProvider),
    Chain(ChainProvider),
}

fn credentials(connection: &ConnectionConfig) -> CollectResult<Credentials> {
    if let (Some(key), Some(secret)) = (&connection.access_key, &connection.secret_key) {
        return Ok(Credentials::Static(StaticProvider::new(
            key.clone(),
            secret.clone(),
            connection.session_token.clone(),
            None,
        )));
    }
    if let Some(profile) = &connection.profile {
        let mut provider = ProfileProvider::new()
            .map_err(|e| CollectError::Auth(format!("shared credentials unavailable: {}", e)))?;
        provider.set_profile(profile.clone());
        return Ok(Credentials::Profile(provider));
    }
    Ok(Credentials::Chain(ChainProvider::new()))
}

fn http_client() -> CollectResult<HttpClient> {
    HttpClient::new().map_err(|e| CollectError::Fatal(format!("TLS initialization failed: {}", e)))
}

pub(crate) fn s3_client(connection: &ConnectionConfig, region: Region) -> CollectResult<S3Client> {
    if connection.path_style_is_noop() {
        warn!("s3_force_path_style is set without endpoint_url and has no effect");
    }
    match credentials(connection)? {
        Credentials::Static(p) => Ok(S3Client::new_with(http_client()?, p, region)),
        Credentials::Profile(p) => Ok(S3Client::new_with(http_client()?, p, region)),
        Credentials::Chain(p) => Ok(S3Client::new_with(http_client()?, p, region)),
    }
}

pub(crate) fn logs_client(
    connection: &ConnectionConfig,
    region: Region,
) -> CollectResult<CloudWatchLogsClient> {
    match credentials(connection)? {
        Credentials::Static(p) => Ok(CloudWatchLogsClient::new_with(http_client()?, p, region)),
        Credentials::Profile(p) => Ok(CloudWatchLogsClient::new_with(http_client()?, p, region)),
        Credentials::Chain(p) => Ok(CloudWatchLogsClient::new_with(http_client()?, p, region)),
    }
}

/// Run an AWS call with cancellation and exponential backoff.
///
/// `classify` maps service errors the caller knows about (not-found,
/// ignorable codes) to their terminal kind; everything it leaves alone is
/// either retried (dispatch failures, throttling, 5xx) or surfaced as a
/// backend error.
pub(crate) async fn retry_call<T, E, F, Fut, C>(
    ctx: &RunContext,
    connection: &ConnectionConfig,
    what: &str,
    mut call: F,
    classify: C,
) -> CollectResult<T>
where
    E: std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RusotoError<E>>>,
    C: Fn(&RusotoError<E>) -> Option<CollectError>,
{
    let attempts = connection.retry_attempts().max(1);
    let base_delay = connection.retry_base_delay_ms();
    let mut attempt: u32 = 0;

    loop {
        if ctx.is_cancelled() {
            return Err(CollectError::Cancelled);
        }
        let result = tokio::select! {
            _ = ctx.cancelled() => return Err(CollectError::Cancelled),
            result = call() => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if let Some(mapped) = classify(&err) {
            return Err(mapped);
        }
        if let RusotoError::Credentials(cause) = &err {
            return Err(CollectError::Auth(format!("{}: {}", what, cause)));
        }
        if !is_retryable(&err) {
            return Err(terminal_kind(what, &err));
        }

        attempt += 1;
        if attempt >= attempts {
            return Err(CollectError::TransientBackend(format!(
                "{} failed after {} attempts: {:?}",
                what, attempt, err
            )));
        }

        let delay = backoff_delay(base_delay, attempt);
        warn!(
            "{} attempt {}/{} failed, retrying in {:?}: {:?}",
            what, attempt, attempts, delay, err
        );
        tokio::select! {
            _ = ctx.cancelled() => return Err(CollectError::Cancelled),
            _ = sleep(delay) => {}
        }
    }
}

/// Dispatch failures, throttling, and server errors are worth retrying.
fn is_retryable<E: std::fmt::Debug>(err: &RusotoError<E>) -> bool {
    match err {
        RusotoError::HttpDispatch(_) => true,
        RusotoError::Unknown(response) => {
            response.status.is_server_error() || response.status.as_u16() == 429
        }
        RusotoError::Service(service) => {
            // rusoto surfaces throttling as service variants with no common
            // trait; match on the error code in the debug rendering.
            let rendered = format!("{:?}", service);
            rendered.contains("Throttling")
                || rendered.contains("ServiceUnavailable")
                || rendered.contains("SlowDown")
                || rendered.contains("RequestTimeout")
        }
        _ => false,
    }
}

fn terminal_kind<E: std::fmt::Debug>(what: &str, err: &RusotoError<E>) -> CollectError {
    if let RusotoError::Unknown(response) = err {
        let status = response.status.as_u16();
        if status == 401 || status == 403 {
            return CollectError::Auth(format!("{}: HTTP {}", what, status));
        }
    }
    CollectError::TransientBackend(format!("{}: {:?}", what, err))
}

fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let millis = base_ms.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(millis.min(RETRY_MAX_DELAY_SECS * 1000))
}
