//! The cooperative main loop.
//!
//! [`Runtime::initialize`] brings peripherals up in a fixed order, then
//! [`Runtime::tick`] is called forever. A tick answers at most one HTTP
//! request, checks the card, handles the deletion input, and samples every
//! sensor into the data file. Nothing that happens inside a tick, error or
//! panic, escapes it.

use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::board::{AccessPoint, AccessPointSettings, BusScanner, InputPin, Peripherals};
use crate::clock::Clock;
use crate::config::{Config, DeleteTrigger};
use crate::error::Result;
use crate::http::{HttpServer, HttpSettings, Status};
use crate::logger::Logger;
use crate::protocol;
use crate::sensor::{Measurement, Sensor};
use crate::storage::{AppendTarget, DeletionReport, StorageManager};

/// Lifecycle of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Peripherals are being brought up.
    Initializing,
    /// The loop is running.
    Serving,
}

/// How a tick ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickOutcome {
    /// Every step ran.
    #[default]
    Completed,
    /// The card was out; storage work was skipped.
    StorageAbsent,
    /// The tick body returned an error.
    Failed,
    /// The tick body panicked.
    Panicked,
}

/// What a tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// How the tick ended.
    pub outcome: TickOutcome,
    /// Status of the request answered this tick, if any.
    pub request: Option<Status>,
    /// Result of a bulk deletion, if one ran.
    pub deletion: Option<DeletionReport>,
    /// Data lines appended.
    pub records_written: usize,
}

impl TickReport {
    fn ended(outcome: TickOutcome) -> Self {
        Self {
            outcome,
            ..Self::default()
        }
    }
}

/// The bulk-delete input with its trigger semantics.
#[derive(Debug)]
pub struct DeletionTrigger {
    pin: Box<dyn InputPin>,
    mode: DeleteTrigger,
    was_asserted: bool,
}

impl DeletionTrigger {
    /// Watch `pin` with the given trigger mode.
    #[must_use]
    pub fn new(pin: Box<dyn InputPin>, mode: DeleteTrigger) -> Self {
        Self {
            pin,
            mode,
            was_asserted: false,
        }
    }

    /// Name of the watched input.
    #[must_use]
    pub fn name(&self) -> &str {
        self.pin.name()
    }

    /// Whether a deletion should run now.
    ///
    /// In edge mode this fires once per assertion; in level mode on every
    /// call while asserted. An unreadable input never fires.
    pub fn poll(&mut self, logger: &Logger) -> bool {
        let asserted = match self.pin.is_high() {
            Ok(level) => level,
            Err(err) => {
                logger.report("Could not read deletion input", &err);
                false
            }
        };
        let fire = match self.mode {
            DeleteTrigger::Edge => asserted && !self.was_asserted,
            DeleteTrigger::Level => asserted,
        };
        self.was_asserted = asserted;
        fire
    }
}

/// Everything the loop owns.
pub struct Runtime {
    state: State,
    config: Config,
    logger: Logger,
    clock: Rc<dyn Clock>,
    storage: StorageManager,
    sensors: Vec<Sensor>,
    bus: Box<dyn BusScanner>,
    access_point: Box<dyn AccessPoint>,
    deletion: DeletionTrigger,
    server: Option<HttpServer>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state)
            .field("storage", &self.storage)
            .field("sensors", &self.sensors)
            .field("deletion", &self.deletion)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Assemble a runtime. Nothing is touched until [`initialize`](Self::initialize).
    #[must_use]
    pub fn new(peripherals: Peripherals, config: &Config, logger: Logger, clock: Rc<dyn Clock>) -> Self {
        let Peripherals {
            presence,
            delete,
            bus,
            accelerometer,
            barometer,
            access_point,
        } = peripherals;

        let mut sensors = vec![
            Sensor::Accelerometer(accelerometer),
            Sensor::PressureTemp(barometer),
        ];
        sensors.sort_by_key(|sensor| {
            Measurement::POLL_ORDER
                .iter()
                .position(|m| *m == sensor.measurement())
        });

        Self {
            state: State::Initializing,
            config: config.clone(),
            logger,
            clock,
            storage: StorageManager::from_config(&config.storage, presence),
            sensors,
            bus,
            access_point,
            deletion: DeletionTrigger::new(delete, config.board.delete_trigger),
            server: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// The runtime logger.
    #[must_use]
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// The storage manager.
    #[must_use]
    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Address of the HTTP listener, once bound.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bring every peripheral up.
    ///
    /// Order: storage (blocking until a card is present), access point, bus
    /// scan, sensors, deletion input, HTTP listener. Sensor and bus problems
    /// are logged and tolerated.
    ///
    /// # Errors
    ///
    /// Returns an error, already logged, if storage cannot be mounted, the
    /// access point does not start, or the listener cannot bind.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state == State::Serving {
            return Ok(());
        }
        self.try_initialize().map_err(|err| {
            self.logger.report("Initialization failed", &err);
            err
        })
    }

    fn try_initialize(&mut self) -> Result<()> {
        info!("Initializing on {}", crate::board::platform_name());

        let handle = self.storage.mount(&self.logger)?;
        self.logger.attach(handle);
        self.print_files();

        let ip = self.start_access_point()?;
        self.scan_bus();

        for sensor in &mut self.sensors {
            sensor.init(&self.logger);
        }

        self.logger.info(format!(
            "Deletion input {} ready ({} trigger).",
            self.deletion.name(),
            self.config.board.delete_trigger
        ));

        self.logger.info("Starting server ...");
        let server = HttpServer::bind(
            SocketAddr::new(ip, self.config.network.port),
            HttpSettings::from_config(&self.config),
        )?;
        let addr = server.local_addr()?;
        self.logger.info(format!("Serving default webpage at {addr}"));
        self.server = Some(server);

        self.logger.info("Peripheral initialization complete.");
        self.state = State::Serving;
        Ok(())
    }

    fn print_files(&self) {
        match self.storage.dump_tree() {
            Ok(lines) => {
                self.logger.console("Files on filesystem:");
                self.logger.console("====================");
                for line in lines {
                    self.logger.console(&line);
                }
            }
            Err(err) => self.logger.report("Could not list files", &err),
        }
    }

    fn start_access_point(&mut self) -> Result<IpAddr> {
        let network = &self.config.network;
        let settings = AccessPointSettings {
            ssid: network.ssid.clone(),
            password: network.password.clone(),
            max_connections: network.max_connections,
            address: network.address,
        };
        let ip = self.access_point.start(&settings)?;
        self.logger.info("Access point created.");
        self.logger
            .debug(format!("SSID: {}, password: {}", settings.ssid, settings.password));
        Ok(ip)
    }

    fn scan_bus(&mut self) {
        self.logger.info("Initializing the I2C bus ...");
        match self.bus.scan() {
            Ok(addresses) => {
                let found: Vec<String> = addresses.iter().map(|a| format!("{a:#x}")).collect();
                self.logger
                    .info(format!("I2C addresses found: [{}]", found.join(", ")));
            }
            Err(err) => self.logger.report("Could not scan the I2C bus", &err),
        }
    }

    /// Run one iteration of the loop. Never fails and never panics.
    pub fn tick(&mut self) -> TickReport {
        match panic::catch_unwind(AssertUnwindSafe(|| self.tick_body())) {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => {
                self.logger.report("Unexpected error in main loop", &err);
                TickReport::ended(TickOutcome::Failed)
            }
            Err(payload) => {
                self.logger.error(format!(
                    "Unexpected panic in main loop: {}",
                    panic_message(payload.as_ref())
                ));
                TickReport::ended(TickOutcome::Panicked)
            }
        }
    }

    fn tick_body(&mut self) -> Result<TickReport> {
        let mut report = TickReport {
            request: self.service_network(),
            ..TickReport::default()
        };

        self.storage.handle()?;
        if !self.storage.is_present() {
            self.logger.error("No storage card inserted.");
            report.outcome = TickOutcome::StorageAbsent;
            return Ok(report);
        }

        if self.deletion.poll(&self.logger) {
            report.deletion = Some(self.storage.delete_all(&self.logger));
        }

        report.records_written = self.service_sensors();
        Ok(report)
    }

    /// Answer at most one pending HTTP request.
    fn service_network(&mut self) -> Option<Status> {
        let server = self.server.as_ref()?;
        match server.poll(&self.storage, &self.logger) {
            Ok(status) => status,
            Err(err) => {
                self.logger.report("Could not answer HTTP request", &err);
                None
            }
        }
    }

    /// Sample every sensor into the data file. Returns lines written.
    fn service_sensors(&mut self) -> usize {
        let data_path = self.storage.layout().path(AppendTarget::Data);
        let mut written = 0;
        for sensor in &mut self.sensors {
            let reading = sensor.sample(&self.logger, self.clock.as_ref());
            let line = protocol::encode(&reading);
            self.logger.debug(format!(
                "Appending '{line}' to {}",
                data_path.display()
            ));
            match self.storage.append(AppendTarget::Data, &line) {
                Ok(()) => written += 1,
                Err(err) => self.logger.report(
                    &format!("Could not store {} reading", reading.measurement()),
                    &err,
                ),
            }
        }
        written
    }

    /// Initialize, then tick forever.
    ///
    /// # Errors
    ///
    /// Returns only if initialization fails.
    pub fn run(&mut self) -> Result<Infallible> {
        self.initialize()?;
        let pause = self.config.tick_pause();
        debug!("Entering main loop, pause {pause:?}");
        loop {
            self.tick();
            if pause > Duration::ZERO {
                thread::sleep(pause);
            }
        }
    }
}

/// Stop doing anything, forever. Used after a fatal startup error when the
/// process must not exit.
pub fn halt(logger: &Logger) -> ! {
    logger.error("Halting.");
    loop {
        thread::park();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::sim::{SimulatedBus, SimulatedPin, StaticAccessPoint};
    use crate::clock::ManualClock;
    use crate::testing::{ScriptedAccelerometer, ScriptedBarometer, SharedBuffer};
    use std::fs;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpStream};
    use std::path::{Path, PathBuf};

    struct Rig {
        runtime: Runtime,
        console: SharedBuffer,
        clock: Rc<ManualClock>,
        presence: SimulatedPin,
        delete: SimulatedPin,
        accel: ScriptedAccelerometer,
        baro: ScriptedBarometer,
        root: PathBuf,
        _dir: tempfile::TempDir,
    }

    impl Rig {
        fn data(&self) -> String {
            fs::read_to_string(self.root.join("data.txt")).unwrap_or_default()
        }

        fn file_exists(&self, name: &str) -> bool {
            self.root.join(name).exists()
        }
    }

    fn config(root: &Path, trigger: DeleteTrigger) -> Config {
        let mut config = Config::default();
        config.storage.root = root.to_path_buf();
        config.storage.mount_poll_ms = 0;
        config.network.address = IpAddr::from(Ipv4Addr::LOCALHOST);
        config.network.port = 0;
        config.board.delete_trigger = trigger;
        config
    }

    fn rig_with(trigger: DeleteTrigger) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sd");
        let presence = SimulatedPin::new("card detect", true);
        let delete = SimulatedPin::new("delete", false);
        let accel = ScriptedAccelerometer::steady([0.0, 0.5, 9.75]);
        let baro = ScriptedBarometer::steady(1013.25, 21.5);

        let peripherals = Peripherals {
            presence: Rc::new(presence.clone()),
            delete: Box::new(delete.clone()),
            bus: Box::new(SimulatedBus::new(vec![0x4a, 0x77])),
            accelerometer: Box::new(accel.clone()),
            barometer: Box::new(baro.clone()),
            access_point: Box::new(StaticAccessPoint),
        };

        let clock = Rc::new(ManualClock::at(120_000));
        let console = SharedBuffer::default();
        let logger = Logger::new(clock.clone(), Box::new(console.clone()));
        let mut runtime = Runtime::new(peripherals, &config(&root, trigger), logger, clock.clone());
        runtime.initialize().unwrap();

        Rig {
            runtime,
            console,
            clock,
            presence,
            delete,
            accel,
            baro,
            root,
            _dir: dir,
        }
    }

    fn rig() -> Rig {
        rig_with(DeleteTrigger::Edge)
    }

    fn request(rig: &mut Rig, raw: &str) -> (TickReport, String) {
        let addr = rig.runtime.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(raw.as_bytes()).unwrap();

        let mut report = TickReport::default();
        for _ in 0..500 {
            report = rig.runtime.tick();
            if report.request.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        (report, response)
    }

    #[test]
    fn test_initialize_sequence() {
        let rig = rig();
        assert_eq!(rig.runtime.state(), State::Serving);
        assert!(rig.runtime.logger().is_attached());
        assert!(rig.runtime.local_addr().is_some());

        let console = rig.console.contents();
        let order = [
            "Mounted storage at",
            "Access point created.",
            "I2C addresses found: [0x4a, 0x77]",
            "Initializing dps310 sensor ...",
            "Initializing bno08x sensor ...",
            "Deletion input delete ready (edge trigger).",
            "Serving default webpage at 127.0.0.1:",
            "Peripheral initialization complete.",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|needle| console.find(needle).unwrap_or_else(|| panic!("missing {needle}")))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(console.contains("[DEBUG] - [120000]: SSID: AUXSPACE, password: wifipassword"));
    }

    #[test]
    fn test_tick_writes_one_line_per_sensor() {
        let mut rig = rig();
        let report = rig.runtime.tick();

        assert_eq!(report.outcome, TickOutcome::Completed);
        assert_eq!(report.records_written, 2);
        assert_eq!(
            rig.data(),
            "dps310 pressure=1013.25,temp=21.5 120000\r\nbno08x accel_x=0,accel_y=0.5,accel_z=9.75 120000\r\n"
        );
    }

    #[test]
    fn test_sensors_follow_poll_order() {
        let rig = rig();
        let order: Vec<Measurement> = rig.runtime.sensors.iter().map(Sensor::measurement).collect();
        assert_eq!(order, [Measurement::PressureTemp, Measurement::Accelerometer]);
        assert_eq!(order, Measurement::POLL_ORDER);
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let mut rig = rig();
        for _ in 0..5 {
            rig.runtime.tick();
            rig.clock.advance(7);
        }

        let stamps: Vec<u64> = rig
            .data()
            .lines()
            .map(|line| protocol::LineRecord::parse(line).unwrap().timestamp_ms)
            .collect();
        assert_eq!(stamps.len(), 10);
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_absent_card_skips_storage_work() {
        let mut rig = rig();
        rig.presence.set(false);
        rig.delete.set(true);
        rig.console.clear();

        for _ in 0..3 {
            let report = rig.runtime.tick();
            assert_eq!(report.outcome, TickOutcome::StorageAbsent);
            assert_eq!(report.records_written, 0);
            assert!(report.deletion.is_none());
        }

        assert_eq!(rig.console.lines_with("[ERROR]").len(), 3);
        assert_eq!(rig.console.lines_with("No storage card inserted.").len(), 3);
        assert!(!rig.file_exists("data.txt"));
        assert!(!rig.file_exists("error.log"));
        assert_eq!(rig.accel.reads(), 0);
        assert_eq!(rig.baro.reads(), 0);

        // Card back, with the delete input still held from before.
        rig.presence.set(true);
        let report = rig.runtime.tick();
        assert_eq!(report.outcome, TickOutcome::Completed);
        assert_eq!(report.records_written, 2);
        assert!(rig.file_exists("data.txt"));
    }

    #[test]
    fn test_delete_input_edge_triggered() {
        let mut rig = rig();
        rig.runtime.tick();
        assert!(rig.file_exists("data.txt"));

        rig.delete.set(true);
        let first = rig.runtime.tick();
        assert!(first.deletion.is_some());
        // Sensors still ran after the deletion, recreating the data file.
        assert_eq!(first.records_written, 2);
        assert_eq!(rig.data().lines().count(), 2);

        let held = rig.runtime.tick();
        assert!(held.deletion.is_none());
        assert_eq!(rig.data().lines().count(), 4);

        rig.delete.set(false);
        rig.runtime.tick();
        rig.delete.set(true);
        assert!(rig.runtime.tick().deletion.is_some());
    }

    #[test]
    fn test_delete_input_level_triggered() {
        let mut rig = rig_with(DeleteTrigger::Level);
        rig.delete.set(true);

        assert!(rig.runtime.tick().deletion.is_some());
        assert!(rig.runtime.tick().deletion.is_some());
        assert_eq!(rig.data().lines().count(), 2);
    }

    #[test]
    fn test_sensor_fault_does_not_stop_tick() {
        let mut rig = rig();
        rig.accel.fail_next();
        rig.baro.fail_temperature_next();

        let report = rig.runtime.tick();
        assert_eq!(report.outcome, TickOutcome::Completed);
        assert_eq!(report.records_written, 2);
        assert_eq!(
            rig.data(),
            "dps310 pressure=1013.25,temp=0 120000\r\nbno08x accel_x=0,accel_y=0,accel_z=0 120000\r\n"
        );
        let errors = fs::read_to_string(rig.root.join("error.log")).unwrap();
        assert!(errors.contains("Could not read temperature"));
        assert!(errors.contains("Could not read bno08x"));
    }

    #[test]
    fn test_append_failure_does_not_skip_next_sensor() {
        let mut rig = rig();
        // A directory where the data file should be makes every append fail.
        fs::create_dir(rig.root.join("data.txt")).unwrap();

        let report = rig.runtime.tick();
        assert_eq!(report.outcome, TickOutcome::Completed);
        assert_eq!(report.records_written, 0);
        assert_eq!(rig.baro.reads(), 1);
        assert_eq!(rig.accel.reads(), 1);
        assert_eq!(rig.console.lines_with("Could not store").len(), 2);
    }

    #[test]
    fn test_panic_is_contained() {
        let mut rig = rig();
        rig.accel.panic_next();

        let report = rig.runtime.tick();
        assert_eq!(report.outcome, TickOutcome::Panicked);
        assert!(rig
            .console
            .contents()
            .contains("Unexpected panic in main loop: scripted accelerometer panic"));

        let next = rig.runtime.tick();
        assert_eq!(next.outcome, TickOutcome::Completed);
        assert_eq!(next.records_written, 2);
    }

    #[test]
    fn test_tick_before_initialize_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let peripherals = crate::board::sim::peripherals(&Config::default());
        let clock: Rc<dyn Clock> = Rc::new(ManualClock::default());
        let console = SharedBuffer::default();
        let logger = Logger::new(clock.clone(), Box::new(console.clone()));
        let mut runtime = Runtime::new(
            peripherals,
            &config(dir.path(), DeleteTrigger::Edge),
            logger,
            clock,
        );

        let report = runtime.tick();
        assert_eq!(report.outcome, TickOutcome::Failed);
        assert!(console.contents().contains("storage not mounted"));
    }

    #[test]
    fn test_bind_failure_is_fatal() {
        let blocker = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = blocker.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), DeleteTrigger::Edge);
        config.network.port = port;

        let clock: Rc<dyn Clock> = Rc::new(ManualClock::default());
        let console = SharedBuffer::default();
        let logger = Logger::new(clock.clone(), Box::new(console.clone()));
        let mut runtime = Runtime::new(
            crate::board::sim::peripherals(&config),
            &config,
            logger,
            clock,
        );

        let err = runtime.initialize().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(runtime.state(), State::Initializing);
        assert!(console.lines_with("[ERROR]")[0].contains("Initialization failed"));
    }

    #[test]
    fn test_http_delete_missing_file() {
        let mut rig = rig();
        let (report, response) = request(&mut rig, "GET /delete/data.txt HTTP/1.1\r\n\r\n");

        assert_eq!(report.request, Some(Status::InternalServerError));
        assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.contains("data.txt"));
        // The same tick still sampled the sensors.
        assert_eq!(report.records_written, 2);
    }

    #[test]
    fn test_http_malformed_request_then_sensors() {
        let mut rig = rig();
        let (report, response) = request(&mut rig, "BLAH\r\n\r\n");

        assert_eq!(report.request, Some(Status::BadRequest));
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_eq!(report.outcome, TickOutcome::Completed);
        assert_eq!(report.records_written, 2);
    }

    #[test]
    fn test_http_download_after_ticks() {
        let mut rig = rig();
        rig.runtime.tick();
        let expected = rig.data();

        let (report, response) = request(&mut rig, "GET /sd/data.txt HTTP/1.1\r\n\r\n");
        assert_eq!(report.request, Some(Status::Ok));
        let (_, body) = response.split_once("\r\n\r\n").unwrap();
        assert_eq!(body, expected);
    }

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }
}
