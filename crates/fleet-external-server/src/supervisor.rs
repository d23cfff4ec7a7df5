//! Process-level supervisor.
//!
//! Builds one [`CarServer`] per configured car (loading every handler
//! library up front, so a broken configuration is caught before any session
//! talks to the broker), spawns each session on its own task and collects
//! their outcomes. Sessions are strictly independent: one car's failure
//! never touches the others.

use tokio::task::JoinSet;
use tracing::{error, info};

use crate::bus::{MqttBus, TlsFiles};
use crate::config::ServerConfig;
use crate::error::{CarError, StartupError};
use crate::modules::ModuleRegistry;
use crate::session::{CarHandle, CarServer};

/// The assembled server, one session per configured car.
pub struct ExternalServer {
    cars: Vec<(String, CarServer<MqttBus>)>,
}

impl ExternalServer {
    /// Builds every car session from the validated configuration. Any
    /// module or bus failure aborts startup.
    pub fn from_config(
        config: &ServerConfig,
        tls: Option<TlsFiles>,
    ) -> Result<Self, StartupError> {
        let mut cars = Vec::new();
        for car_name in config.car_names() {
            let car_config = config.car_config(car_name);
            let modules =
                ModuleRegistry::load_dynamic(&car_config).map_err(|source| StartupError::Module {
                    car: car_name.to_string(),
                    source,
                })?;
            let bus = MqttBus::new(&car_config, tls.as_ref()).map_err(|source| StartupError::Bus {
                car: car_name.to_string(),
                source,
            })?;
            cars.push((
                car_name.to_string(),
                CarServer::new(car_config, bus, modules),
            ));
        }
        Ok(Self { cars })
    }

    /// Number of configured car sessions.
    #[must_use]
    pub fn car_count(&self) -> usize {
        self.cars.len()
    }

    /// Spawns every session on its own task.
    #[must_use]
    pub fn start(self) -> RunningServer {
        let mut tasks = JoinSet::new();
        let mut handles = Vec::new();
        for (name, car) in self.cars {
            handles.push((name.clone(), car.handle()));
            tasks.spawn(async move {
                let result = car.run().await;
                (name, result)
            });
        }
        RunningServer { handles, tasks }
    }
}

/// Handle on the spawned sessions.
pub struct RunningServer {
    handles: Vec<(String, CarHandle)>,
    tasks: JoinSet<(String, Result<(), CarError>)>,
}

impl RunningServer {
    /// Stop handles of every session, for signal-driven shutdown.
    #[must_use]
    pub fn car_handles(&self) -> Vec<CarHandle> {
        self.handles.iter().map(|(_, handle)| handle.clone()).collect()
    }

    /// Requests a graceful stop of every session.
    pub fn stop_all(&self) {
        for (name, handle) in &self.handles {
            info!(car = %name, "requesting session stop");
            handle.stop();
        }
    }

    /// Waits for every session to finish and reports the outcomes.
    pub async fn join(mut self) -> ServerOutcome {
        let mut sessions = Vec::new();
        let mut panicked = 0;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((car, result)) => {
                    match &result {
                        Ok(()) => info!(car = %car, "session stopped cleanly"),
                        Err(error) => error!(car = %car, %error, "session ended with an error"),
                    }
                    sessions.push((car, result));
                }
                Err(join_error) => {
                    error!(%join_error, "a session task did not complete");
                    panicked += 1;
                }
            }
        }
        ServerOutcome { sessions, panicked }
    }
}

/// Final state of every session, for the process exit code.
pub struct ServerOutcome {
    /// Per-car results in completion order.
    pub sessions: Vec<(String, Result<(), CarError>)>,
    /// Sessions whose task died without reporting.
    pub panicked: usize,
}

impl ServerOutcome {
    /// Whether the process may exit 0: every session stopped cleanly.
    #[must_use]
    pub fn all_clean(&self) -> bool {
        self.panicked == 0 && self.sessions.iter().all(|(_, result)| result.is_ok())
    }
}
