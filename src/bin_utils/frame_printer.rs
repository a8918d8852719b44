use std::io::Write;

use serde::Serialize;
use serde_json::Value;

use crate::{notify::BalanceNotification, wallet::UserId};

#[derive(Debug, Serialize)]
struct ResponseFrame<'a> {
    tag: &'a Value,
    data: &'a Value,
}

#[derive(Debug, Serialize)]
struct NotificationFrame<'a> {
    user: UserId,
    data: &'a BalanceNotification,
}

/// Writes one JSON object per line.
pub struct FramePrinter<'w, W> {
    output: &'w mut W,
}

impl<'w, W> FramePrinter<'w, W>
where
    W: Write,
{
    pub fn new(output: &'w mut W) -> Self {
        Self { output }
    }

    pub fn response(&mut self, tag: &Value, data: &Value) -> anyhow::Result<()> {
        self.write_line(&ResponseFrame { tag, data })
    }

    pub fn notification(
        &mut self,
        user: UserId,
        notification: &BalanceNotification,
    ) -> anyhow::Result<()> {
        self.write_line(&NotificationFrame {
            user,
            data: notification,
        })
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        if let Err(err) = self.output.flush() {
            anyhow::bail!("Failed to flush output: {err}")
        }
        Ok(())
    }

    fn write_line(&mut self, frame: &impl Serialize) -> anyhow::Result<()> {
        if let Err(err) = serde_json::to_writer(&mut *self.output, frame) {
            anyhow::bail!("Failed to write frame: {err}")
        }
        if let Err(err) = self.output.write_all(b"\n") {
            anyhow::bail!("Failed to write frame: {err}")
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use crate::notify::{NotificationKind, NotificationOrigin};

    use super::*;

    #[test]
    fn writes_one_frame_per_line() {
        let mut output = Vec::new();
        let user = Uuid::new_v4();
        let wallet_id = Uuid::new_v4();

        let mut printer = FramePrinter::new(&mut output);
        printer
            .response(&json!(7), &json!({"ok": true}))
            .unwrap();
        printer
            .notification(
                user,
                &BalanceNotification {
                    kind: NotificationKind::IncomingTransaction,
                    origin: NotificationOrigin::Send,
                    wallet_id,
                    balance: 5,
                },
            )
            .unwrap();
        printer.flush().unwrap();

        let lines: Vec<Value> = std::str::from_utf8(&output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines[0], json!({"tag": 7, "data": {"ok": true}}));
        assert_eq!(lines[1]["user"], json!(user.to_string()));
        assert_eq!(lines[1]["data"]["notify-id"], "incoming-transaction");
        assert_eq!(lines[1]["data"]["wallet_uuid"], json!(wallet_id.to_string()));
    }
}
