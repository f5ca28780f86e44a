use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use porta::{Core, Notification, Now, PortConfig, PortDriver, Value};

use crate::clock::SystemClock;
use crate::config::RuntimeConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::state::save_state;

// Capacity of the request channel.
const COMMAND_BUFFER: usize = 16;

type Reply<T> = oneshot::Sender<porta::Result<T>>;

enum Command {
    SetValue {
        id: String,
        value: f64,
        reply: Reply<()>,
    },
    SetExpression {
        id: String,
        source: String,
        reply: Reply<()>,
    },
    Enable {
        id: String,
        reply: Reply<()>,
    },
    Disable {
        id: String,
        reply: Reply<()>,
    },
    Value {
        id: String,
        reply: Reply<Value>,
    },
}

/// A cloneable handle sending requests to a running [`Runtime`].
///
/// Requests are served between two ticks.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    sender: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetValue { id, value, .. } => write!(f, "SetValue({id}, {value})"),
            Self::SetExpression { id, source, .. } => write!(f, "SetExpression({id}, {source})"),
            Self::Enable { id, .. } => write!(f, "Enable({id})"),
            Self::Disable { id, .. } => write!(f, "Disable({id})"),
            Self::Value { id, .. } => write!(f, "Value({id})"),
        }
    }
}

impl RuntimeHandle {
    /// Writes a value to an output port.
    ///
    /// # Errors
    ///
    /// Fails when the core rejects the value or when the runtime stopped.
    pub async fn set_value(&self, id: impl Into<String>, value: f64) -> Result<()> {
        let id = id.into();
        self.request(|reply| Command::SetValue { id, value, reply })
            .await
    }

    /// Assigns the value expression of an output port.
    ///
    /// # Errors
    ///
    /// Fails when the core rejects the expression or when the runtime
    /// stopped.
    pub async fn set_expression(
        &self,
        id: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<()> {
        let (id, source) = (id.into(), source.into());
        self.request(|reply| Command::SetExpression { id, source, reply })
            .await
    }

    /// Enables a port.
    ///
    /// # Errors
    ///
    /// Fails when the port does not exist or when the runtime stopped.
    pub async fn enable(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.request(|reply| Command::Enable { id, reply }).await
    }

    /// Disables a port.
    ///
    /// # Errors
    ///
    /// Fails when the port does not exist or when the runtime stopped.
    pub async fn disable(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        self.request(|reply| Command::Disable { id, reply }).await
    }

    /// Returns the value of a port.
    ///
    /// # Errors
    ///
    /// Fails when the port does not exist or when the runtime stopped.
    pub async fn value(&self, id: impl Into<String>) -> Result<Value> {
        let id = id.into();
        self.request(|reply| Command::Value { id, reply }).await
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| stopped())?;
        Ok(response.await.map_err(|_| stopped())??)
    }
}

fn stopped() -> Error {
    Error::new(ErrorKind::Stopped, "The runtime is not running")
}

/// The task driving a [`Core`].
pub struct Runtime {
    config: RuntimeConfig,
    core: Core,
    clock: SystemClock,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<Notification>,
    // Last saved configuration of every port.
    state: Vec<PortConfig>,
}

impl Runtime {
    /// Creates a [`Runtime`] for a [`Core`] whose ports are already
    /// registered.
    ///
    /// The core is expected to be built with [`Core::new`] from
    /// [`RuntimeConfig::core`]. Use [`Runtime::with_ports`] to let the
    /// runtime build it.
    ///
    /// Returns the runtime along with the handle to send it requests and the
    /// receiver of the notifications queued by the core.
    #[must_use]
    pub fn new(
        config: RuntimeConfig,
        core: Core,
    ) -> (Self, RuntimeHandle, mpsc::Receiver<Notification>) {
        if core.config() != config.core {
            warn!("The core was not built from the runtime configuration");
        }

        let (sender, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events, receiver) = mpsc::channel(config.event_buffer.max(1));
        let state = core.port_configs();

        let runtime = Self {
            config,
            core,
            clock: SystemClock::new(),
            commands,
            events,
            state,
        };
        (runtime, RuntimeHandle { sender }, receiver)
    }

    /// Creates a [`Runtime`] along with its [`Core`], built from
    /// [`RuntimeConfig::core`].
    ///
    /// Ports are registered in order, typically from the configurations
    /// returned by [`load_state`](crate::state::load_state). A port the core
    /// rejects is skipped with an error log.
    #[must_use]
    pub fn with_ports(
        config: RuntimeConfig,
        ports: impl IntoIterator<Item = (PortConfig, Option<Box<dyn PortDriver>>)>,
    ) -> (Self, RuntimeHandle, mpsc::Receiver<Notification>) {
        let mut core = Core::new(config.core);
        for (port, driver) in ports {
            let id = port.id.clone();
            if let Err(e) = core.add_port(port, driver) {
                error!("Skipping port `{id}`: {e}");
            }
        }
        Self::new(config, core)
    }

    /// Runs the scheduler until the cancellation token is cancelled.
    ///
    /// Pending persisted values are saved before returning.
    ///
    /// # Errors
    ///
    /// Fails when the final save of the state file fails.
    pub async fn run(mut self, cancellation_token: CancellationToken) -> Result<()> {
        let period = Duration::from_millis(self.config.tick_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Runtime started with {} ports, ticking every {} ms",
            self.state.len(),
            period.as_millis()
        );

        loop {
            tokio::select! {
                // Use the cancellation token to stop the loop
                () = cancellation_token.cancelled() => { break; }
                _ = interval.tick() => {
                    let now = self.clock.now();
                    let stats = self.core.tick(now);
                    debug!(
                        "Tick: {} sampled, {} evaluated, {} committed",
                        stats.sampled, stats.evaluated, stats.committed
                    );
                    self.forward_notifications();
                    if let Err(e) = self.persist(now, false).await {
                        error!("Impossible to save the state: {e}");
                    }
                }
                Some(command) = self.commands.recv() => {
                    self.handle(command);
                    self.forward_notifications();
                }
            }
        }

        let now = self.clock.now();
        self.persist(now, true).await?;
        info!("Runtime stopped");
        Ok(())
    }

    fn handle(&mut self, command: Command) {
        debug!("Request: {command:?}");
        let delivered = match command {
            Command::SetValue { id, value, reply } => {
                reply.send(self.core.set_port_value(&id, value)).is_ok()
            }
            Command::SetExpression { id, source, reply } => {
                reply.send(self.core.set_expression(&id, &source)).is_ok()
            }
            Command::Enable { id, reply } => reply.send(self.core.enable(&id)).is_ok(),
            Command::Disable { id, reply } => reply.send(self.core.disable(&id)).is_ok(),
            Command::Value { id, reply } => reply.send(self.core.value(&id)).is_ok(),
        };
        if !delivered {
            warn!("The requester went away before the reply");
        }
    }

    fn forward_notifications(&mut self) {
        for notification in self.core.take_notifications() {
            if let Err(e) = self.events.try_send(notification) {
                warn!("Discarding notification: {e}");
            }
        }
    }

    async fn persist(&mut self, now: Now, force: bool) -> Result<()> {
        let dirty = self.core.take_dirty_configs(now, force);
        if dirty.is_empty() {
            return Ok(());
        }

        for config in dirty {
            match self.state.iter_mut().find(|saved| saved.id == config.id) {
                Some(saved) => *saved = config,
                None => self.state.push(config),
            }
        }

        let Some(path) = &self.config.state_path else {
            return Ok(());
        };
        save_state(path, &self.state).await?;
        info!("State saved to {}", path.display());
        Ok(())
    }
}
