//! Control-thread side of the lever registry

use crate::config::RegistryConfig;
use crate::message::{LeverCommand, LeverHandle, LeverReport};
use crate::worker::{LeverWorker, RemoteInstance};
use crate::{PortOpenError, RegistryError};
use lever_protocol::{Direction, LeverState, SerialTransport};
use mailbox::MailboxSender;
use ring_buffer::{BoundedQueue, QueueReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Slots in the shared report queue; one is reserved, so seven reports fit
pub const REPORT_QUEUE_CAPACITY: usize = 8;

/// Control-thread view of one lever
struct LocalInstance {
    handle: LeverHandle,
    mailbox: MailboxSender<LeverCommand>,

    commanded_force: i32,
    commanded_direction: Direction,

    canonical_force: Option<i32>,
    canonical_direction: Option<Direction>,
    state: Option<LeverState>,

    pending_open: Option<String>,
    pending_close: bool,
    pending_force: Option<i32>,
    pending_direction: Option<Direction>,

    awaiting_open: bool,
    is_open: bool,
    open_error: Option<PortOpenError>,
}

impl LocalInstance {
    fn new(handle: LeverHandle, mailbox: MailboxSender<LeverCommand>) -> Self {
        Self {
            handle,
            mailbox,
            commanded_force: 0,
            commanded_direction: Direction::Forward,
            canonical_force: None,
            canonical_direction: None,
            state: None,
            pending_open: None,
            pending_close: false,
            pending_force: None,
            pending_direction: None,
            awaiting_open: false,
            is_open: false,
            open_error: None,
        }
    }

    /// Reclaim the mailbox if possible, then publish at most one staged
    /// command: close, else open, else force and direction together.
    fn flush_commands(&mut self) {
        self.mailbox.try_acknowledge();
        if !self.mailbox.is_free() {
            return;
        }

        let command = if self.pending_close {
            self.pending_close = false;
            LeverCommand::ClosePort
        } else if let Some(port) = self.pending_open.take() {
            LeverCommand::OpenPort { port }
        } else if self.pending_force.is_some() || self.pending_direction.is_some() {
            LeverCommand::SetForceOrDirection {
                force: self.pending_force.take(),
                direction: self.pending_direction.take(),
            }
        } else {
            return;
        };

        debug!("{} publishing {:?}", self.handle, command);
        // Free was checked above, so the mailbox cannot reject it.
        let _ = self.mailbox.publish(command);
    }

    fn apply_report(&mut self, report: LeverReport) {
        match report {
            LeverReport::ShareState {
                force,
                direction,
                state,
                is_open,
                ..
            } => {
                self.canonical_force = force;
                self.canonical_direction = direction;
                self.state = state;
                self.is_open = is_open;
            }
            LeverReport::PortStatus { result, is_open, .. } => {
                debug_assert!(self.awaiting_open, "port status without a pending open");
                self.awaiting_open = false;
                self.is_open = is_open;
                self.open_error = result.err();
            }
        }
    }
}

/// Registry of serial levers.
///
/// Created empty; [`LeverRegistry::initialize`] allocates the levers and
/// starts the worker, [`LeverRegistry::terminate`] (or drop) stops it. The
/// control thread owns the registry and passes it to whoever needs it.
pub struct LeverRegistry {
    transport: Arc<dyn SerialTransport>,
    config: RegistryConfig,
    locals: Vec<LocalInstance>,
    reports: Option<QueueReader<LeverReport, REPORT_QUEUE_CAPACITY>>,
    worker: Option<JoinHandle<()>>,
    keep_running: Arc<AtomicBool>,
    next_id: u32,
}

impl LeverRegistry {
    /// Create an uninitialized registry that opens ports through `transport`
    pub fn new(transport: Arc<dyn SerialTransport>, config: RegistryConfig) -> Self {
        Self {
            transport,
            config,
            locals: Vec::new(),
            reports: None,
            worker: None,
            keep_running: Arc::new(AtomicBool::new(false)),
            next_id: 1,
        }
    }

    fn allocate(&mut self, count: usize) -> Result<(Vec<LeverHandle>, LeverWorker), RegistryError> {
        if self.reports.is_some() {
            debug_assert!(false, "lever registry initialized twice");
            return Err(RegistryError::AlreadyInitialized(self.locals.len()));
        }

        let mut handles = Vec::with_capacity(count);
        let mut remotes = Vec::with_capacity(count);
        for _ in 0..count {
            let handle = LeverHandle::new(self.next_id);
            self.next_id += 1;

            let (sender, receiver) = mailbox::channel();
            self.locals.push(LocalInstance::new(handle, sender));
            remotes.push(RemoteInstance::new(handle, receiver));
            handles.push(handle);
        }

        let (writer, reader) = BoundedQueue::<LeverReport, REPORT_QUEUE_CAPACITY>::new().split();
        self.reports = Some(reader);

        let worker = LeverWorker::new(Arc::clone(&self.transport), self.config.clone(), remotes, writer);
        Ok((handles, worker))
    }

    /// Allocate `count` levers and start the worker thread
    pub fn initialize(&mut self, count: usize) -> Result<Vec<LeverHandle>, RegistryError> {
        let (handles, worker) = self.allocate(count)?;

        let keep_running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&keep_running);
        let spawned = thread::Builder::new()
            .name("lever-worker".to_string())
            .spawn(move || worker.run(flag));

        match spawned {
            Ok(join) => {
                info!("Lever registry initialized with {} levers", count);
                self.keep_running = keep_running;
                self.worker = Some(join);
                Ok(handles)
            }
            Err(e) => {
                error!("Failed to spawn lever worker: {}", e);
                self.locals.clear();
                self.reports = None;
                Err(RegistryError::WorkerSpawn(e))
            }
        }
    }

    /// Allocate `count` levers without starting a thread. The caller drives
    /// the returned worker with [`LeverWorker::step`].
    pub fn initialize_stepped(
        &mut self,
        count: usize,
    ) -> Result<(Vec<LeverHandle>, LeverWorker), RegistryError> {
        let allocated = self.allocate(count)?;
        info!("Lever registry initialized with {} levers (stepped)", count);
        Ok(allocated)
    }

    /// Stop the worker, wait for it, and release every lever. Handles
    /// issued so far are never reused.
    pub fn terminate(&mut self) {
        self.keep_running.store(false, Ordering::Release);
        if let Some(join) = self.worker.take() {
            if join.join().is_err() {
                error!("Lever worker thread panicked");
            }
        }

        if self.reports.take().is_some() {
            info!("Lever registry terminated, released {} levers", self.locals.len());
        }
        self.locals.clear();
    }

    /// Publish staged commands and apply every queued report. Call once per
    /// control tick.
    pub fn update(&mut self) {
        let Some(reports) = self.reports.as_mut() else {
            return;
        };

        for local in &mut self.locals {
            local.flush_commands();
        }

        for report in reports.drain() {
            let handle = report.handle();
            match self.locals.iter_mut().find(|l| l.handle == handle) {
                Some(local) => local.apply_report(report),
                None => warn!("Report for unknown {}", handle),
            }
        }
    }

    fn local(&self, handle: LeverHandle) -> Option<&LocalInstance> {
        let found = self.locals.iter().find(|l| l.handle == handle);
        if found.is_none() {
            debug_assert!(false, "unknown lever handle {}", handle);
            error!("Unknown lever handle {}", handle);
        }
        found
    }

    fn local_mut(&mut self, handle: LeverHandle) -> Option<&mut LocalInstance> {
        let found = self.locals.iter_mut().find(|l| l.handle == handle);
        if found.is_none() {
            debug_assert!(false, "unknown lever handle {}", handle);
            error!("Unknown lever handle {}", handle);
        }
        found
    }

    /// Command a resisting force in grams
    pub fn set_force(&mut self, handle: LeverHandle, grams: i32) {
        if let Some(local) = self.local_mut(handle) {
            local.commanded_force = grams;
            local.pending_force = Some(grams);
        }
    }

    /// Command a motor direction
    pub fn set_direction(&mut self, handle: LeverHandle, direction: Direction) {
        if let Some(local) = self.local_mut(handle) {
            local.commanded_direction = direction;
            local.pending_direction = Some(direction);
        }
    }

    /// Request that `port` be opened for this lever. The outcome arrives via
    /// [`LeverRegistry::is_pending_open`], [`LeverRegistry::is_open`] and
    /// [`LeverRegistry::open_error`].
    pub fn open_connection(&mut self, handle: LeverHandle, port: &str) {
        if let Some(local) = self.local_mut(handle) {
            debug_assert!(!local.awaiting_open, "open requested while one is pending");
            info!("{} requesting port {}", handle, port);

            local.pending_open = Some(port.to_string());
            local.awaiting_open = true;
            local.open_error = None;
            // The worker starts each session blank, so resend the intent.
            local.pending_force = Some(local.commanded_force);
            local.pending_direction = Some(local.commanded_direction);
        }
    }

    /// Request that this lever's port be closed
    pub fn close_connection(&mut self, handle: LeverHandle) {
        if let Some(local) = self.local_mut(handle) {
            info!("{} requesting close", handle);
            local.pending_close = true;
        }
    }

    /// An open request has not been answered yet
    pub fn is_pending_open(&self, handle: LeverHandle) -> bool {
        self.local(handle).map_or(false, |l| l.awaiting_open)
    }

    /// The worker last reported an open connection
    pub fn is_open(&self, handle: LeverHandle) -> bool {
        self.local(handle).map_or(false, |l| l.is_open)
    }

    /// Force last confirmed by hardware
    pub fn canonical_force(&self, handle: LeverHandle) -> Option<i32> {
        self.local(handle).and_then(|l| l.canonical_force)
    }

    /// Direction last confirmed by hardware
    pub fn canonical_direction(&self, handle: LeverHandle) -> Option<Direction> {
        self.local(handle).and_then(|l| l.canonical_direction)
    }

    /// Telemetry from the last successful read
    pub fn state(&self, handle: LeverHandle) -> Option<LeverState> {
        self.local(handle).and_then(|l| l.state)
    }

    /// Last commanded force, confirmed or not
    pub fn commanded_force(&self, handle: LeverHandle) -> i32 {
        self.local(handle).map_or(0, |l| l.commanded_force)
    }

    /// Last commanded direction, confirmed or not
    pub fn commanded_direction(&self, handle: LeverHandle) -> Direction {
        self.local(handle)
            .map_or(Direction::default(), |l| l.commanded_direction)
    }

    /// Error from the most recent open attempt, cleared by the next request
    pub fn open_error(&self, handle: LeverHandle) -> Option<&PortOpenError> {
        self.local(handle).and_then(|l| l.open_error.as_ref())
    }

    /// Reports queued by the worker and not yet applied
    pub fn num_pending_reports(&self) -> usize {
        self.reports.as_ref().map_or(0, |r| r.size())
    }

    /// Handles of every live lever, in creation order
    pub fn handles(&self) -> Vec<LeverHandle> {
        self.locals.iter().map(|l| l.handle).collect()
    }

    /// The worker thread is running
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for LeverRegistry {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lever_protocol::MockTransport;

    fn stepped(count: usize) -> (LeverRegistry, Vec<LeverHandle>, LeverWorker, MockTransport) {
        let mock = MockTransport::new();
        let mut registry = LeverRegistry::new(Arc::new(mock.clone()), RegistryConfig::default());
        let (handles, worker) = registry.initialize_stepped(count).unwrap();
        (registry, handles, worker, mock)
    }

    #[test]
    fn test_handles_are_sequential_and_unique() {
        let (registry, handles, worker, _) = stepped(3);
        assert_eq!(handles.iter().map(|h| h.id()).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(registry.handles(), handles);
        assert_eq!(worker.lever_count(), 3);
    }

    #[test]
    fn test_handles_not_reused_after_terminate() {
        let (mut registry, first, _worker, _) = stepped(2);
        registry.terminate();
        assert!(registry.handles().is_empty());

        let (second, _worker) = registry.initialize_stepped(2).unwrap();
        assert!(second.iter().all(|h| !first.contains(h)));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "initialized twice")]
    fn test_double_initialize_panics_in_debug() {
        let (mut registry, _, _worker, _) = stepped(1);
        let _ = registry.initialize_stepped(1);
    }

    #[test]
    fn test_commanded_values_visible_immediately() {
        let (mut registry, handles, _worker, _) = stepped(1);
        let h = handles[0];

        registry.set_force(h, 50);
        registry.set_force(h, 60);
        registry.set_direction(h, Direction::Reverse);

        assert_eq!(registry.commanded_force(h), 60);
        assert_eq!(registry.commanded_direction(h), Direction::Reverse);
        assert_eq!(registry.canonical_force(h), None);
        assert_eq!(registry.state(h), None);
    }

    #[test]
    fn test_flush_coalesces_force_and_direction() {
        let (sender, mut receiver) = mailbox::channel();
        let mut local = LocalInstance::new(LeverHandle::new(1), sender);
        local.pending_force = Some(50);
        local.pending_force = Some(60);
        local.pending_direction = Some(Direction::Reverse);

        local.flush_commands();
        assert_eq!(
            receiver.try_take(),
            Some(LeverCommand::SetForceOrDirection {
                force: Some(60),
                direction: Some(Direction::Reverse),
            })
        );

        local.flush_commands();
        assert_eq!(receiver.try_take(), None);
    }

    #[test]
    fn test_flush_priority_close_open_force() {
        let (sender, mut receiver) = mailbox::channel();
        let mut local = LocalInstance::new(LeverHandle::new(1), sender);
        local.pending_force = Some(10);
        local.pending_open = Some("COM1".to_string());
        local.pending_close = true;

        let mut seen = Vec::new();
        for _ in 0..4 {
            local.flush_commands();
            if let Some(command) = receiver.try_take() {
                seen.push(command);
            }
        }

        assert_eq!(
            seen,
            vec![
                LeverCommand::ClosePort,
                LeverCommand::OpenPort { port: "COM1".to_string() },
                LeverCommand::SetForceOrDirection { force: Some(10), direction: None },
            ]
        );
    }

    #[test]
    fn test_flush_waits_for_acknowledgement() {
        let (sender, mut receiver) = mailbox::channel();
        let mut local = LocalInstance::new(LeverHandle::new(1), sender);

        local.pending_force = Some(1);
        local.flush_commands();
        local.pending_force = Some(2);
        local.flush_commands();
        assert_eq!(local.pending_force, Some(2));

        assert!(receiver.try_take().is_some());
        local.flush_commands();
        assert_eq!(
            receiver.try_take(),
            Some(LeverCommand::SetForceOrDirection { force: Some(2), direction: None })
        );
    }

    #[test]
    fn test_port_status_sets_flags() {
        let (sender, _receiver) = mailbox::channel();
        let mut local = LocalInstance::new(LeverHandle::new(1), sender);
        local.awaiting_open = true;

        let failure = PortOpenError::FailedToOpen {
            port: "COM9".to_string(),
            reason: "refused".to_string(),
        };
        local.apply_report(LeverReport::PortStatus {
            handle: local.handle,
            result: Err(failure.clone()),
            is_open: false,
        });

        assert!(!local.awaiting_open);
        assert!(!local.is_open);
        assert_eq!(local.open_error, Some(failure));
    }

    #[test]
    fn test_update_before_initialize_is_noop() {
        let mut registry = LeverRegistry::new(Arc::new(MockTransport::new()), RegistryConfig::default());
        registry.update();
        assert_eq!(registry.num_pending_reports(), 0);
        assert!(!registry.is_running());
    }
}
