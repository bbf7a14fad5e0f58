use std::io::Write;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::io::{stdin, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::error::ConsoleError;

#[async_trait]
pub trait LineSource: Send {
    /// The next line of operator input, or `None` once input is closed.
    async fn next_line(&mut self) -> Result<Option<String>, ConsoleError>;
}

pub struct StdinLines {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinLines {
    pub fn new() -> Self {
        StdinLines { lines: BufReader::new(stdin()).lines() }
    }
}

impl Default for StdinLines {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineSource for StdinLines {
    async fn next_line(&mut self) -> Result<Option<String>, ConsoleError> {
        Ok(self.lines.next_line().await?)
    }
}

/// Operator console shared by device selection and the write loop. Only one prompt reads at a time.
#[derive(Clone)]
pub struct Console {
    source: Arc<Mutex<Box<dyn LineSource>>>,
}

impl Console {
    pub fn new(source: Box<dyn LineSource>) -> Self {
        Console { source: Arc::new(Mutex::new(source)) }
    }

    pub fn stdin() -> Self {
        Console::new(Box::new(StdinLines::new()))
    }

    pub async fn prompt(&self, message: &str) -> Result<String, ConsoleError> {
        let mut source = self.source.lock().await;

        print!("{}", message);
        std::io::stdout().flush()?;

        match source.next_line().await? {
            Some(line) => Ok(line),
            None => Err(ConsoleError::Closed),
        }
    }
}
