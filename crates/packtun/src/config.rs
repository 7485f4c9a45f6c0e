use std::fs;
use std::path::Path;

use packtun_http::TunnelConfig;

use crate::exit::{io_error, tunnel_error, CliError, CliResult, CONFIG_INVALID};

/// Load a tunnel config from a JSON file, or the defaults without one.
///
/// Missing fields take their default values; unknown fields are rejected.
pub fn load(path: Option<&Path>) -> CliResult<TunnelConfig> {
    let Some(path) = path else {
        return Ok(TunnelConfig::default());
    };

    let text = fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    let config: TunnelConfig = serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            CONFIG_INVALID,
            format!("invalid config {}: {err}", path.display()),
        )
    })?;
    config
        .validate()
        .map_err(|err| tunnel_error(&format!("invalid config {}", path.display()), err))?;

    tracing::debug!(path = %path.display(), ?config, "loaded tunnel config");
    Ok(config)
}
