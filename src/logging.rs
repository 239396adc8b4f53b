use time::UtcOffset;
use tracing_subscriber::{
    fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

use crate::{errors::InitializationError, RelayConfig, RelayError};

/// Sets up the global `tracing` subscriber from `config.logging`. Called once
/// from `main`; every component below reaches the global dispatcher rather
/// than holding its own logger handle.
pub fn setup_logging(config: &RelayConfig) -> Result<(), RelayError> {
    let timer = OffsetTime::new(
        UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        time::format_description::well_known::Rfc3339,
    );

    let base_level = config.logging.get_level_filter();

    let mut env_filter = EnvFilter::default().add_directive(base_level.into());

    if config.logging.trace_frames {
        env_filter = env_filter
            .add_directive("modbus_relay::modbus=trace".parse().unwrap())
            .add_directive("modbus_relay::rtu_transport=trace".parse().unwrap());
    }

    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(config.logging.thread_ids)
        .with_thread_names(config.logging.thread_names)
        .with_file(config.logging.include_location)
        .with_line_number(config.logging.include_location)
        .with_level(true)
        .with_timer(timer)
        .with_filter(env_filter);

    Registry::default().with(layer).try_init().map_err(|e| {
        RelayError::Init(InitializationError::logging(format!(
            "Failed to initialize logging: {}",
            e
        )))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_falls_back_to_info_on_garbage() {
        let mut config = RelayConfig::default();
        config.logging.level = "not-a-level".into();
        assert_eq!(
            config.logging.get_level_filter(),
            tracing::level_filters::LevelFilter::INFO
        );
    }
}
