// File: testing-framework/src/utilities/client_version.rs
//
// Blockchain Client Version Check
//
// Run once per session before any test when a blockchain client is
// configured. An unsupported client is a configuration error: every test
// would fail for a reason unrelated to what it checks.

use log::{debug, info};
use tokio::process::Command;
use tos_supervisor_common::ethereum_clients::{is_supported_version, ClientVersionCheck, EthClient};
use tos_supervisor_common::ConfigurationError;

/// Identification printed by the client binary
pub async fn query_client_version(client: EthClient) -> Result<String, ConfigurationError> {
    let (program, argument) = client.version_command();
    debug!("Probing {} with `{} {}`", client, program, argument);

    let output = Command::new(program)
        .arg(argument)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| ConfigurationError::ClientQuery {
            client: client.to_string(),
            reason: err.to_string(),
        })?;

    if !output.status.success() {
        return Err(ConfigurationError::ClientQuery {
            client: client.to_string(),
            reason: format!("`{} {}` exited with {}", program, argument, output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check a client identification against the supported range
pub fn ensure_supported(
    client: EthClient,
    identification: &str,
) -> Result<ClientVersionCheck, ConfigurationError> {
    let check = is_supported_version(identification, client, client.lowest_supported_version());
    if !check.is_supported() {
        return Err(ConfigurationError::UnsupportedClient {
            client: client.to_string(),
            found: check
                .version
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| identification.trim().to_string()),
            minimum: client.lowest_supported_version(),
            highest: client.highest_supported_version(),
        });
    }

    Ok(check)
}

/// Query the installed client and fail if its version is not supported
pub async fn check_client_version(
    client: EthClient,
) -> Result<ClientVersionCheck, ConfigurationError> {
    let identification = query_client_version(client).await?;
    let check = ensure_supported(client, &identification)?;
    if let Some(version) = &check.version {
        info!("Running tests against {} {}", client, version);
    }
    Ok(check)
}
