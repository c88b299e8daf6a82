use parking_lot::Mutex;
use tessera_core::{FrameRoute, ProcessId};
use tessera_ipc::{FrameMsg, IpcError, OutgoingMessage, ProcessHost};

/// Process host that records what would have been sent.
#[derive(Default)]
pub(crate) struct RecordingHost {
    sent: Mutex<Vec<(ProcessId, OutgoingMessage)>>,
    pub(crate) terminated: Mutex<Vec<ProcessId>>,
}

impl RecordingHost {
    /// Drains the recorded messages as (route, message) pairs.
    pub(crate) fn take(&self) -> Vec<(FrameRoute, FrameMsg)> {
        self.sent
            .lock()
            .drain(..)
            .map(|(process_id, out)| (FrameRoute::new(process_id, out.routing_id), out.message))
            .collect()
    }
}

impl ProcessHost for RecordingHost {
    fn send(&self, process_id: ProcessId, message: OutgoingMessage) -> Result<(), IpcError> {
        self.sent.lock().push((process_id, message));
        Ok(())
    }

    fn terminate(&self, process_id: ProcessId, _reason: &str) {
        self.terminated.lock().push(process_id);
    }

    fn is_connected(&self, process_id: ProcessId) -> bool {
        !self.terminated.lock().contains(&process_id)
    }
}
