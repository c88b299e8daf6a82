//! Where protocol violations end up.
//!
//! A renderer that sends something it could never legitimately send is
//! assumed compromised. Every report is logged and counted; with
//! `ipc.terminate_misbehaving_processes` set the process is also killed.

use actix::prelude::*;
use log::{error, info};
use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::ProcessId;
use tessera_ipc::ProcessHost;

#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct BadMessage {
    pub process_id: ProcessId,
    pub reason: String,
}

#[derive(Message, Debug)]
#[rtype(result = "u32")]
pub struct GetBadMessageCount {
    pub process_id: ProcessId,
}

pub struct BadMessageSink {
    host: Arc<dyn ProcessHost>,
    terminate: bool,
    counts: HashMap<ProcessId, u32>,
}

impl BadMessageSink {
    pub fn new(host: Arc<dyn ProcessHost>, terminate: bool) -> Self {
        Self {
            host,
            terminate,
            counts: HashMap::new(),
        }
    }
}

impl Actor for BadMessageSink {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        info!("BadMessageSink started (terminate: {}).", self.terminate);
    }
}

impl Handler<BadMessage> for BadMessageSink {
    type Result = ();

    fn handle(&mut self, msg: BadMessage, _ctx: &mut Context<Self>) {
        let count = self.counts.entry(msg.process_id).or_insert(0);
        *count += 1;
        error!(
            "Bad message #{} from {}: {}",
            count, msg.process_id, msg.reason
        );
        if self.terminate {
            self.host.terminate(msg.process_id, &msg.reason);
        }
    }
}

impl Handler<GetBadMessageCount> for BadMessageSink {
    type Result = u32;

    fn handle(&mut self, msg: GetBadMessageCount, _ctx: &mut Context<Self>) -> u32 {
        self.counts.get(&msg.process_id).copied().unwrap_or(0)
    }
}
