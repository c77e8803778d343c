//! Shared fixtures for the session scenarios.

use std::time::Duration;

use foundation_testing::http::EchoEndpoint;
use foundation_testing::session::scenario_configuration;
use foundation_testing::SessionObserver;
use foundation_urlsession::SessionConfiguration;

/// One second of httpbin time, scaled down for the local echo server.
pub const TIME_UNIT: Duration = Duration::from_millis(100);

pub fn endpoint() -> EchoEndpoint {
    EchoEndpoint::from_env(TIME_UNIT)
}

/// `count` time units of `endpoint`.
pub fn units(endpoint: &EchoEndpoint, count: u32) -> Duration {
    endpoint.time_unit() * count
}

/// Observer over the scenario configuration, see `SESSION_CONFIG`.
pub fn observer() -> SessionObserver {
    observer_with(scenario_configuration().expect("scenario configuration"))
}

pub fn observer_with(config: SessionConfiguration) -> SessionObserver {
    tracing::debug!(
        "observer with request timeout {:?}",
        config.timeout_interval_for_request
    );
    SessionObserver::new(config)
        .expect("session observer")
        .with_grace_margin(Duration::from_secs(2))
}

/// Observer for scenarios whose transfers outlast the session timeout.
///
/// The runner's deadline only covers the timeout plus the grace margin, so the
/// margin is scaled to the endpoint's time unit.
pub fn timed_observer(endpoint: &EchoEndpoint, config: SessionConfiguration) -> SessionObserver {
    observer_with(config).with_grace_margin(units(endpoint, 20))
}
