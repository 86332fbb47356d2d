//! Shared CLI argument parsers.

use qgactl::{Error, Result};
use qga_protocol::Arguments;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Parse a duration string (e.g., "30s", "5m", "1h").
pub fn parse_duration(s: &str) -> std::result::Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Parse a socket timeout: a humantime duration, or a bare number of seconds.
pub fn parse_timeout(s: &str) -> std::result::Result<Duration, String> {
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| format!("invalid timeout '{}': {}", s, e))
}

/// Validate an environment variable specification (KEY=VALUE).
pub fn parse_env_spec(spec: &str) -> std::result::Result<String, String> {
    match spec.split_once('=') {
        Some((key, _)) if !key.is_empty() => Ok(spec.to_string()),
        _ => Err(format!("invalid env '{}': expected KEY=VALUE", spec)),
    }
}

/// Parse raw command arguments given as a JSON object.
pub fn parse_json_arguments(text: &str) -> Result<Arguments> {
    match serde_json::from_str(text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::protocol(
            "parse arguments",
            format!("expected a JSON object, got {}", other),
        )),
        Err(e) => Err(Error::protocol("parse arguments", e.to_string())),
    }
}

/// Read input bytes from a file, or from stdin when the path is "-".
pub fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut data = Vec::new();
        std::io::stdin().read_to_end(&mut data)?;
        return Ok(data);
    }
    Ok(std::fs::read(path)?)
}
