use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::Utc;
use chrono_tz::Tz;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, LastWill, MqttOptions, QoS,
};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, watch, Mutex},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use shop_thermostat_common::{
    discovery_messages, parse_mqtt_command, state_messages,
    topics::{PAYLOAD_OFFLINE, PAYLOAD_ONLINE},
    CommandOutcome, ConfigError, ConnectivityAction, Device, DeviceStatus, DiscoveryContext,
    HardwarePort, LinkPort, NetworkConfig, OperatorCommand, OutboundMessage, RuntimeConfig,
    Schedule, SensorId, Topics, WallClock,
};

use crate::{
    api,
    sim::{HostLink, SimulatedPlant},
};

const CONTROL_TICK_MS: u64 = 250;
const COMMAND_QUEUE_DEPTH: usize = 32;
const SESSION_EVENT_DEPTH: usize = 64;
const MQTT_REQUEST_DEPTH: usize = 128;

/// What the API reads. Rebuilt by the control loop after every tick.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub status: DeviceStatus,
    pub schedule: Schedule,
}

impl Snapshot {
    pub fn capture<H: HardwarePort>(device: &Device<H>, now_ms: u64) -> Self {
        Self {
            status: device.status(now_ms),
            schedule: device.schedule().clone(),
        }
    }
}

/// Operator command queued for the control loop, answered with the state
/// right after it was applied.
pub struct ControlRequest {
    pub command: OperatorCommand,
    pub reply: oneshot::Sender<Result<Snapshot, ConfigError>>,
}

/// Broker task gate. Every `ConnectSession` bumps `attempt`; after a failure
/// the broker task idles until the next attempt is granted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SessionGate {
    enabled: bool,
    attempt: u64,
}

#[derive(Debug)]
enum SessionEvent {
    Connected,
    Failed(String),
    Message { topic: String, payload: Vec<u8> },
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    schedule_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime.network);

    let schedule = store.load_schedule().await.unwrap_or_else(|err| {
        warn!("failed to load schedule from store: {err:#}");
        Schedule::default()
    });

    let device_id = std::env::var("THERMOSTAT_DEVICE_ID").unwrap_or_else(|_| "host".to_string());
    let now_ms = monotonic_ms();
    let device = Device::new(simulated_plant(), runtime, schedule, now_ms);
    let topics = Topics::new(&device.config().network.base_topic);

    let mqtt_options = build_mqtt_options(&device.config().network, &topics, &device_id);
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, MQTT_REQUEST_DEPTH);

    let (gate_tx, gate_rx) = watch::channel(SessionGate::default());
    let (event_tx, event_rx) = mpsc::channel(SESSION_EVENT_DEPTH);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::capture(&device, now_ms));

    spawn_session_loop(eventloop, gate_rx, event_tx.clone());

    let controller = Controller {
        device,
        link: HostLink::default(),
        mqtt,
        gate: gate_tx,
        session_events: event_tx,
        topics,
        device_id,
        store,
        snapshot: snapshot_tx,
        last_tick_ms: now_ms,
        last_state_publish_ms: None,
    };
    tokio::spawn(controller.run(command_rx, event_rx));

    let app = api::router(api::ApiState {
        commands: command_tx,
        snapshot: snapshot_rx,
    });

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn apply_env_overrides(network: &mut NetworkConfig) {
    if let Ok(ssid) = std::env::var("WIFI_SSID") {
        network.wifi_ssid = ssid;
    }
    if let Ok(pass) = std::env::var("WIFI_PASS") {
        network.wifi_pass = pass;
    }
    if let Ok(host) = std::env::var("MQTT_HOST") {
        network.mqtt_enabled = !host.trim().is_empty();
        network.mqtt_host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
}

/// `SIM_UNPLUGGED=water_in,outdoor` starts the simulation with those sensors
/// off the bus.
fn simulated_plant() -> SimulatedPlant {
    let mut plant = SimulatedPlant::default();
    let unplugged = std::env::var("SIM_UNPLUGGED").unwrap_or_default();
    for name in unplugged.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        match name.parse::<SensorId>() {
            Ok(sensor) => {
                info!("simulating unplugged {} sensor", sensor.display_name());
                plant.set_disconnected(sensor, true);
            }
            Err(err) => warn!("SIM_UNPLUGGED: {err}"),
        }
    }
    plant
}

fn build_mqtt_options(network: &NetworkConfig, topics: &Topics, device_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(
        format!("shop-thermostat-{device_id}"),
        network.mqtt_host.clone(),
        network.mqtt_port,
    );
    options.set_keep_alive(Duration::from_secs(60));
    options.set_last_will(LastWill::new(
        topics.availability(),
        PAYLOAD_OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));
    if !network.mqtt_user.is_empty() {
        options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }
    options
}

/// Polls the broker only while the gate is open. Retry timing is left to the
/// connectivity supervisor.
fn spawn_session_loop(
    mut eventloop: EventLoop,
    mut gate: watch::Receiver<SessionGate>,
    events: mpsc::Sender<SessionEvent>,
) {
    tokio::spawn(async move {
        loop {
            let current = *gate.borrow_and_update();
            if !current.enabled {
                eventloop.clean();
                if gate.changed().await.is_err() {
                    return;
                }
                continue;
            }

            let event = tokio::select! {
                changed = gate.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
                polled = eventloop.poll() => match polled {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            SessionEvent::Connected
                        } else {
                            SessionEvent::Failed(format!("broker refused connection: {:?}", ack.code))
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(message))) => SessionEvent::Message {
                        topic: message.topic,
                        payload: message.payload.to_vec(),
                    },
                    Ok(_) => continue,
                    Err(err) => SessionEvent::Failed(err.to_string()),
                },
            };

            let failed = matches!(event, SessionEvent::Failed(_));
            if events.send(event).await.is_err() {
                return;
            }
            if failed {
                eventloop.clean();
                loop {
                    if gate.changed().await.is_err() {
                        return;
                    }
                    let next = *gate.borrow_and_update();
                    if !next.enabled || next.attempt != current.attempt {
                        break;
                    }
                }
            }
        }
    });
}

struct Controller {
    device: Device<SimulatedPlant>,
    link: HostLink,
    mqtt: AsyncClient,
    gate: watch::Sender<SessionGate>,
    session_events: mpsc::Sender<SessionEvent>,
    topics: Topics,
    device_id: String,
    store: AppStore,
    snapshot: watch::Sender<Snapshot>,
    last_tick_ms: u64,
    last_state_publish_ms: Option<u64>,
}

impl Controller {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ControlRequest>,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        let mut interval = tokio::time::interval(Duration::from_millis(CONTROL_TICK_MS));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                Some(request) = commands.recv() => self.handle_request(request).await,
                Some(event) = events.recv() => self.handle_session_event(event).await,
            }
        }
    }

    async fn tick(&mut self) {
        let now_ms = monotonic_ms();
        self.device
            .hardware_mut()
            .advance(now_ms.saturating_sub(self.last_tick_ms));
        self.last_tick_ms = now_ms;

        let clock = wall_clock_in(&self.device.config().timezone);
        let report = self.device.tick(now_ms, clock, self.link.is_link_up());
        if let Some(actuations) = &report.actuations {
            debug!("control pass: {actuations:?}");
        }
        self.execute(report.connectivity, now_ms).await;

        let interval_ms = self.device.config().thermostat.state_publish_interval_ms;
        let publish_due = self
            .last_state_publish_ms
            .map(|last| now_ms.saturating_sub(last) >= interval_ms)
            .unwrap_or(true);
        if publish_due {
            self.publish_state(now_ms).await;
        }

        self.snapshot
            .send_replace(Snapshot::capture(&self.device, now_ms));
    }

    async fn handle_request(&mut self, request: ControlRequest) {
        let now_ms = monotonic_ms();
        let result = self.apply_command(request.command, now_ms).await;
        let snapshot = Snapshot::capture(&self.device, now_ms);
        self.snapshot.send_replace(snapshot.clone());
        if request.reply.send(result.map(|()| snapshot)).is_err() {
            debug!("api caller went away before the reply");
        }
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        let now_ms = monotonic_ms();
        match event {
            SessionEvent::Connected => {
                let actions = self.device.session_established(now_ms);
                self.execute(actions, now_ms).await;
            }
            SessionEvent::Failed(reason) => {
                warn!("broker session error: {reason}");
                self.device.session_failed(now_ms);
            }
            SessionEvent::Message { topic, payload } => {
                match parse_mqtt_command(&self.topics, &topic, &payload) {
                    Ok(command) => {
                        if let Err(err) = self.apply_command(command, now_ms).await {
                            warn!("rejected command from {topic}: {err}");
                        }
                    }
                    Err(err) => warn!("dropping mqtt message on {topic}: {err}"),
                }
            }
        }
    }

    async fn apply_command(
        &mut self,
        command: OperatorCommand,
        now_ms: u64,
    ) -> Result<(), ConfigError> {
        debug!("applying {command:?}");
        let outcome = self.device.apply_command(command, now_ms)?;
        self.persist(&outcome).await;
        if outcome.broker_changed {
            self.rebuild_broker_client();
        }
        self.execute(outcome.connectivity, now_ms).await;
        if outcome.discovery_changed && self.device.supervisor().is_session_connected() {
            self.announce(now_ms).await;
        }
        // Publish once the next control pass has acted on the change.
        self.last_state_publish_ms = None;
        Ok(())
    }

    /// New client and session task for changed broker settings. The old task
    /// exits once its gate sender is dropped here.
    fn rebuild_broker_client(&mut self) {
        let network = &self.device.config().network;
        self.topics = Topics::new(&network.base_topic);
        let options = build_mqtt_options(network, &self.topics, &self.device_id);
        let (mqtt, eventloop) = AsyncClient::new(options, MQTT_REQUEST_DEPTH);
        let (gate_tx, gate_rx) = watch::channel(SessionGate::default());
        spawn_session_loop(eventloop, gate_rx, self.session_events.clone());
        self.mqtt = mqtt;
        self.gate = gate_tx;
        info!("broker client rebuilt for {}:{}", network.mqtt_host, network.mqtt_port);
    }

    async fn persist(&self, outcome: &CommandOutcome) {
        if outcome.config_changed {
            if let Err(err) = self.store.save_runtime_config(self.device.config()).await {
                warn!("failed to persist runtime config: {err:#}");
            }
        }
        if outcome.schedule_changed {
            if let Err(err) = self.store.save_schedule(self.device.schedule()).await {
                warn!("failed to persist schedule: {err:#}");
            }
        }
    }

    async fn execute(&mut self, actions: Vec<ConnectivityAction>, now_ms: u64) {
        for action in actions {
            debug!("connectivity action: {action:?}");
            match action {
                ConnectivityAction::StartAssociation => {
                    let network = &self.device.config().network;
                    self.link
                        .start_association(&network.wifi_ssid, &network.wifi_pass);
                }
                ConnectivityAction::StopAssociation => self.link.stop_association(),
                ConnectivityAction::StartAccessPoint => self.link.start_access_point(),
                ConnectivityAction::StopAccessPoint => self.link.stop_access_point(),
                ConnectivityAction::ConnectSession => self.gate.send_modify(|gate| {
                    gate.enabled = true;
                    gate.attempt = gate.attempt.wrapping_add(1);
                }),
                ConnectivityAction::DisconnectSession => {
                    self.gate.send_modify(|gate| gate.enabled = false)
                }
                ConnectivityAction::AnnounceSession => self.announce(now_ms).await,
            }
        }
    }

    async fn announce(&mut self, now_ms: u64) {
        let mut messages = vec![OutboundMessage::new(
            self.topics.availability(),
            PAYLOAD_ONLINE,
            true,
        )];
        messages.extend(discovery_messages(&DiscoveryContext {
            topics: &self.topics,
            device_id: &self.device_id,
            device_name: &self.device.config().network.device_name,
        }));
        self.publish_all(messages).await;

        for topic in self.topics.command_topics() {
            if let Err(err) = self.mqtt.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                warn!("subscribe to {topic} failed: {err}");
            }
        }

        self.publish_state(now_ms).await;
    }

    async fn publish_state(&mut self, now_ms: u64) {
        if !self.device.supervisor().is_session_connected() {
            return;
        }
        let status = self.device.status(now_ms);
        self.publish_all(state_messages(&self.topics, &status)).await;
        self.last_state_publish_ms = Some(now_ms);
    }

    async fn publish_all(&self, messages: Vec<OutboundMessage>) {
        for message in messages {
            let topic = message.topic;
            if let Err(err) = self
                .mqtt
                .publish(
                    topic.clone(),
                    QoS::AtMostOnce,
                    message.retained,
                    message.payload.into_bytes(),
                )
                .await
            {
                warn!("publish to {topic} failed: {err}");
            }
        }
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("THERMOSTAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.thermostat"));
        Self::in_dir(data_dir)
    }

    fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            schedule_path: Arc::new(data_dir.join("schedule.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)
                .context("runtime.json is not a valid runtime config")?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }

    async fn load_schedule(&self) -> anyhow::Result<Schedule> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.schedule_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<Schedule>(&raw)
                .context("schedule.json is not a valid schedule")?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Schedule::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_schedule(&self, schedule: &Schedule) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.schedule_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(schedule)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

/// Local wall clock, or `None` when the zone name does not parse.
fn wall_clock_in(timezone: &str) -> Option<WallClock> {
    let tz: Tz = timezone.parse().ok()?;
    Some(WallClock::from_datetime(&Utc::now().with_timezone(&tz)))
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
