use super::{BridgeConfig, ConfigError};
use crate::eventstream::{MAX_FRAME_LEN, MIN_FRAME_LEN};

/// Validate the full bridge config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &BridgeConfig) -> Result<(), ConfigError> {
    validate_stream_config(config)?;
    validate_log_level(config)?;
    validate_log_format(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_stream_config(config: &BridgeConfig) -> Result<(), ConfigError> {
    let stream = &config.stream;
    if stream.context_window_tokens == 0 {
        return Err(validation_err(
            "stream.context_window_tokens must be greater than 0",
        ));
    }
    if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&stream.max_frame_bytes) {
        return Err(validation_err(format!(
            "stream.max_frame_bytes must be between {MIN_FRAME_LEN} and {MAX_FRAME_LEN}"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &BridgeConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_log_format(config: &BridgeConfig) -> Result<(), ConfigError> {
    let format = config.features.log_format.to_ascii_lowercase();
    if format != "text" && format != "json" {
        return Err(validation_err("log_format must be \"text\" or \"json\""));
    }
    Ok(())
}
