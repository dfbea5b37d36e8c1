//! Worker-side lever sessions and the polling loop

use crate::config::RegistryConfig;
use crate::message::{LeverCommand, LeverHandle, LeverReport};
use crate::registry::REPORT_QUEUE_CAPACITY;
use crate::PortOpenError;
use lever_protocol::{
    read_state, set_direction, set_force_grams, Direction, LeverConnection, LeverState,
    SerialTransport,
};
use mailbox::MailboxReceiver;
use ring_buffer::QueueWriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

pub(crate) type ReportWriter = QueueWriter<LeverReport, REPORT_QUEUE_CAPACITY>;

/// Worker-owned session for one lever
pub(crate) struct RemoteInstance {
    handle: LeverHandle,
    commands: MailboxReceiver<LeverCommand>,
    connection: Option<Box<dyn LeverConnection>>,
    /// Last values confirmed by hardware
    force: Option<i32>,
    direction: Option<Direction>,
    state: Option<LeverState>,
    /// Last values requested by the control thread
    commanded_force: i32,
    commanded_direction: Direction,
    need_send_state: bool,
    /// Open result not yet delivered to the control thread
    open_result: Option<Result<(), PortOpenError>>,
}

impl RemoteInstance {
    pub(crate) fn new(handle: LeverHandle, commands: MailboxReceiver<LeverCommand>) -> Self {
        Self {
            handle,
            commands,
            connection: None,
            force: None,
            direction: None,
            state: None,
            commanded_force: 0,
            commanded_direction: Direction::Forward,
            need_send_state: false,
            open_result: None,
        }
    }

    fn is_open(&self) -> bool {
        self.connection.as_ref().map_or(false, |c| c.is_open())
    }

    /// Drop the connection and forget everything learned from it. A pending
    /// open result survives so the control thread still hears about it.
    fn reset(&mut self) {
        self.connection = None;
        self.force = None;
        self.direction = None;
        self.state = None;
        self.commanded_force = 0;
        self.commanded_direction = Direction::Forward;
        self.need_send_state = false;
    }

    /// Apply one command. Returns true if a state report is now due.
    fn apply(&mut self, command: LeverCommand, transport: &dyn SerialTransport, config: &RegistryConfig) -> bool {
        match command {
            LeverCommand::SetForceOrDirection { force, direction } => {
                if let Some(force) = force {
                    self.commanded_force = force;
                }
                if let Some(direction) = direction {
                    self.commanded_direction = direction;
                }
                false
            }
            LeverCommand::OpenPort { port } => {
                debug_assert!(self.open_result.is_none(), "open while a result is pending");
                self.reset();

                match transport.open(&port, config.baud_rate, config.io_timeout()) {
                    Ok(connection) => {
                        info!("{} connected on {}", self.handle, port);
                        self.connection = Some(connection);
                        self.open_result = Some(Ok(()));
                    }
                    Err(e) => {
                        warn!("{} failed to open {}: {}", self.handle, port, e);
                        self.open_result = Some(Err(PortOpenError::FailedToOpen {
                            port,
                            reason: e.to_string(),
                        }));
                    }
                }
                true
            }
            LeverCommand::ClosePort => {
                if self.connection.is_some() {
                    info!("{} closing connection", self.handle);
                }
                self.reset();
                true
            }
        }
    }

    /// Push commanded values to the lever and read its state back. Any
    /// failure degrades the matching observed value to unknown.
    fn exchange(&mut self) {
        let Some(conn) = self.connection.as_deref_mut() else {
            return;
        };

        self.force = match set_force_grams(conn, self.commanded_force) {
            Ok(_) => Some(self.commanded_force),
            Err(e) => {
                debug!("{} set force failed: {}", self.handle, e);
                None
            }
        };

        self.direction = match set_direction(conn, self.commanded_direction) {
            Ok(()) => Some(self.commanded_direction),
            Err(e) => {
                debug!("{} set direction failed: {}", self.handle, e);
                None
            }
        };

        self.state = match read_state(conn) {
            Ok(state) => Some(state),
            Err(e) => {
                debug!("{} read state failed: {}", self.handle, e);
                None
            }
        };
    }

    /// One worker pass over this lever
    fn poll(&mut self, transport: &dyn SerialTransport, config: &RegistryConfig, reports: &mut ReportWriter) {
        if let Some(command) = self.commands.try_take() {
            if self.apply(command, transport, config) {
                self.need_send_state = true;
            }
        }

        let open = self.is_open();
        if self.connection.is_some() && !open {
            warn!("{} connection lost", self.handle);
            self.reset();
            self.need_send_state = true;
        }

        if let Some(result) = &self.open_result {
            let report = LeverReport::PortStatus {
                handle: self.handle,
                result: result.clone(),
                is_open: open,
            };
            if reports.maybe_write(report) {
                self.open_result = None;
            } else {
                debug!("{} report queue full, port status retried next pass", self.handle);
            }
        }

        if open {
            self.need_send_state = true;
            self.exchange();
        }

        if self.need_send_state {
            let report = LeverReport::ShareState {
                handle: self.handle,
                force: self.force,
                direction: self.direction,
                state: self.state,
                is_open: open,
            };
            if reports.maybe_write(report) {
                self.need_send_state = false;
            }
        }
    }
}

/// Owns every worker-side session and the producer half of the report
/// queue.
///
/// [`crate::LeverRegistry::initialize`] moves it onto a dedicated thread;
/// [`crate::LeverRegistry::initialize_stepped`] hands it to the caller, who
/// drives it with [`LeverWorker::step`].
pub struct LeverWorker {
    transport: Arc<dyn SerialTransport>,
    config: RegistryConfig,
    remotes: Vec<RemoteInstance>,
    reports: ReportWriter,
}

impl LeverWorker {
    pub(crate) fn new(
        transport: Arc<dyn SerialTransport>,
        config: RegistryConfig,
        remotes: Vec<RemoteInstance>,
        reports: ReportWriter,
    ) -> Self {
        Self {
            transport,
            config,
            remotes,
            reports,
        }
    }

    /// Run one pass over every lever, in handle order
    pub fn step(&mut self) {
        for remote in &mut self.remotes {
            remote.poll(self.transport.as_ref(), &self.config, &mut self.reports);
        }
    }

    /// Number of levers served
    pub fn lever_count(&self) -> usize {
        self.remotes.len()
    }

    /// Step until `keep_running` is cleared, sleeping between passes
    pub(crate) fn run(mut self, keep_running: Arc<AtomicBool>) {
        info!("Lever worker started for {} levers", self.remotes.len());
        let interval = self.config.worker_interval();

        while keep_running.load(Ordering::Acquire) {
            self.step();
            thread::sleep(interval);
        }

        info!("Lever worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lever_protocol::{MockCommand, MockTransport};
    use mailbox::MailboxSender;
    use ring_buffer::{BoundedQueue, QueueReader};

    type ReportReader = QueueReader<LeverReport, REPORT_QUEUE_CAPACITY>;

    fn remote() -> (RemoteInstance, MailboxSender<LeverCommand>) {
        let (sender, receiver) = mailbox::channel();
        (RemoteInstance::new(LeverHandle::new(1), receiver), sender)
    }

    fn queue() -> (ReportWriter, ReportReader) {
        BoundedQueue::new().split()
    }

    fn filler() -> LeverReport {
        LeverReport::ShareState {
            handle: LeverHandle::new(99),
            force: None,
            direction: None,
            state: None,
            is_open: false,
        }
    }

    #[test]
    fn test_open_reports_status_then_state() {
        let mock = MockTransport::new();
        let config = RegistryConfig::default();
        let (mut remote, mut sender) = remote();
        let (mut writer, mut reader) = queue();

        sender.publish(LeverCommand::OpenPort { port: "COM1".to_string() }).unwrap();
        remote.poll(&mock, &config, &mut writer);

        let reports: Vec<_> = reader.drain().collect();
        assert_eq!(reports.len(), 2);
        assert!(matches!(
            reports[0],
            LeverReport::PortStatus { result: Ok(()), is_open: true, .. }
        ));
        match &reports[1] {
            LeverReport::ShareState { force, direction, state, is_open, .. } => {
                assert_eq!(*force, Some(0));
                assert_eq!(*direction, Some(Direction::Forward));
                assert!(state.is_some());
                assert!(is_open);
            }
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[test]
    fn test_open_failure_reported_once() {
        let mock = MockTransport::new();
        mock.refuse_port("COM9");
        let config = RegistryConfig::default();
        let (mut remote, mut sender) = remote();
        let (mut writer, mut reader) = queue();

        sender.publish(LeverCommand::OpenPort { port: "COM9".to_string() }).unwrap();
        remote.poll(&mock, &config, &mut writer);
        remote.poll(&mock, &config, &mut writer);

        let reports: Vec<_> = reader.drain().collect();
        let statuses: Vec<_> = reports
            .iter()
            .filter(|r| matches!(r, LeverReport::PortStatus { .. }))
            .collect();
        assert_eq!(statuses.len(), 1);
        assert!(matches!(
            statuses[0],
            LeverReport::PortStatus { result: Err(PortOpenError::FailedToOpen { .. }), is_open: false, .. }
        ));
        assert_eq!(
            mock.commands_for("COM9"),
            vec![MockCommand::Open],
            "no retry after a failed open"
        );
    }

    #[test]
    fn test_full_queue_retries_port_status() {
        let mock = MockTransport::new();
        let config = RegistryConfig::default();
        let (mut remote, mut sender) = remote();
        let (mut writer, mut reader) = queue();

        while writer.maybe_write(filler()) {}
        assert!(writer.full());

        sender.publish(LeverCommand::OpenPort { port: "COM1".to_string() }).unwrap();
        remote.poll(&mock, &config, &mut writer);
        assert!(remote.open_result.is_some());
        assert!(remote.need_send_state);

        reader.read();
        remote.poll(&mock, &config, &mut writer);
        assert!(remote.open_result.is_none());
        assert!(remote.need_send_state, "state report still waiting for room");

        let reports: Vec<_> = reader.drain().collect();
        assert!(matches!(reports.last(), Some(LeverReport::PortStatus { result: Ok(()), .. })));

        remote.poll(&mock, &config, &mut writer);
        assert!(!remote.need_send_state);
    }

    #[test]
    fn test_silent_lever_degrades_to_unknown() {
        let mock = MockTransport::new();
        let config = RegistryConfig::default();
        let (mut remote, mut sender) = remote();
        let (mut writer, mut reader) = queue();

        sender.publish(LeverCommand::OpenPort { port: "COM1".to_string() }).unwrap();
        remote.poll(&mock, &config, &mut writer);
        reader.clear();

        mock.set_silent(true);
        remote.poll(&mock, &config, &mut writer);
        assert_eq!(
            reader.read(),
            LeverReport::ShareState {
                handle: LeverHandle::new(1),
                force: None,
                direction: None,
                state: None,
                is_open: true,
            }
        );

        mock.set_silent(false);
        remote.poll(&mock, &config, &mut writer);
        assert!(matches!(
            reader.read(),
            LeverReport::ShareState { force: Some(0), state: Some(_), is_open: true, .. }
        ));
    }

    #[test]
    fn test_lost_connection_reported_closed() {
        let mock = MockTransport::new();
        let config = RegistryConfig::default();
        let (mut remote, mut sender) = remote();
        let (mut writer, mut reader) = queue();

        sender.publish(LeverCommand::OpenPort { port: "COM1".to_string() }).unwrap();
        remote.poll(&mock, &config, &mut writer);
        reader.clear();

        mock.unplug("COM1");
        remote.poll(&mock, &config, &mut writer);
        assert!(remote.connection.is_none());
        assert!(matches!(
            reader.read(),
            LeverReport::ShareState { state: None, is_open: false, .. }
        ));

        remote.poll(&mock, &config, &mut writer);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_set_command_updates_commanded_only() {
        let mock = MockTransport::new();
        let config = RegistryConfig::default();
        let (mut remote, mut sender) = remote();
        let (mut writer, reader) = queue();

        sender
            .publish(LeverCommand::SetForceOrDirection { force: Some(80), direction: None })
            .unwrap();
        remote.poll(&mock, &config, &mut writer);

        assert_eq!(remote.commanded_force, 80);
        assert_eq!(remote.commanded_direction, Direction::Forward);
        assert!(reader.is_empty(), "closed lever has nothing to report");
        assert!(mock.commands().is_empty());
    }

    #[test]
    fn test_close_resets_session() {
        let mock = MockTransport::new();
        let config = RegistryConfig::default();
        let (mut remote, mut sender) = remote();
        let (mut writer, mut reader) = queue();

        sender.publish(LeverCommand::OpenPort { port: "COM1".to_string() }).unwrap();
        remote.poll(&mock, &config, &mut writer);
        assert!(sender.try_acknowledge());
        sender
            .publish(LeverCommand::SetForceOrDirection { force: Some(30), direction: Some(Direction::Reverse) })
            .unwrap();
        remote.poll(&mock, &config, &mut writer);
        assert_eq!(mock.force_on("COM1"), Some(30));

        assert!(sender.try_acknowledge());
        sender.publish(LeverCommand::ClosePort).unwrap();
        reader.clear();
        remote.poll(&mock, &config, &mut writer);

        assert!(!remote.is_open());
        assert_eq!(remote.commanded_force, 0);
        assert_eq!(
            reader.read(),
            LeverReport::ShareState {
                handle: LeverHandle::new(1),
                force: None,
                direction: None,
                state: None,
                is_open: false,
            }
        );
    }
}
