use std::io::{self, BufRead, Lines};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{command::Caller, wallet::UserId};

/// One request line.
///
/// `user` is set by the gateway for end-user calls, `ms` by internal
/// services. `tag` is echoed back untouched so callers can match responses.
#[derive(Debug, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub tag: Value,
    pub endpoint: Vec<String>,
    #[serde(default)]
    pub data: Value,
    pub user: Option<UserId>,
    pub ms: Option<String>,
}

impl Frame {
    pub fn caller(&self) -> Option<Caller> {
        match (&self.user, &self.ms) {
            (Some(user), _) => Some(Caller::User(*user)),
            (None, Some(service)) => Some(Caller::Service(service.clone())),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Failed to read input: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parses newline delimited JSON frames, skipping blank lines.
pub struct FrameParser<R> {
    lines: Lines<R>,
    line: u64,
}

impl<R> FrameParser<R>
where
    R: BufRead,
{
    pub fn new(source: R) -> Self {
        Self {
            lines: source.lines(),
            line: 0,
        }
    }
}

impl<R> Iterator for FrameParser<R>
where
    R: BufRead,
{
    type Item = (u64, Result<Frame, FrameError>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = self.lines.next()?;
            self.line += 1;
            let raw = match raw {
                Ok(raw) => raw,
                Err(err) => return Some((self.line, Err(err.into()))),
            };
            if raw.trim().is_empty() {
                continue;
            }
            return Some((
                self.line,
                serde_json::from_str(&raw).map_err(FrameError::from),
            ));
        }
    }
}
