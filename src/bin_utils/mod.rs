//! Line oriented transport for [`wallet_ledger`]: request frames come in as
//! JSON lines, responses and balance notifications go out the same way.
//! Kept in the library so integration tests can drive it directly.

use std::{
    io::{BufRead, Write},
    sync::Arc,
};

use anyhow::{Context, Result};
use frame_parser::{FrameError, FrameParser};
use frame_printer::FramePrinter;
use serde_json::Value;

use crate::{
    engine::TransferEngine,
    notify::OutboxNotifier,
    rpc::{self, error_payload},
};

pub mod frame_parser;
pub mod frame_printer;

pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub engine: TransferEngine,
    /// Must be the notifier `engine` was built with.
    pub outbox: Arc<OutboxNotifier>,
    pub error_printer: Box<dyn FnMut(u64, serde_json::Error)>,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: BufRead,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let parser = FrameParser::new(self.input);
        let mut printer = FramePrinter::new(self.output);

        for (line, frame) in parser {
            match frame {
                Ok(frame) => {
                    let data = match frame.caller() {
                        Some(caller) => {
                            rpc::handle(&self.engine, &frame.endpoint, &caller, frame.data)
                        }
                        None => error_payload("permission_denied"),
                    };
                    printer.response(&frame.tag, &data)?;
                }
                Err(FrameError::Json(err)) => {
                    (self.error_printer)(line, err);
                    printer.response(&Value::Null, &error_payload("invalid_input_data"))?;
                }
                Err(FrameError::Io(err)) => {
                    return Err(err).with_context(|| format!("Failed to read line {line}"));
                }
            }

            for (user, notification) in self.outbox.drain() {
                printer.notification(user, &notification)?;
            }
            printer.flush()?;
        }
        Ok(())
    }
}
