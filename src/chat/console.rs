//! Line-oriented console transport for local operation.
//!
//! Each stdin line is one event:
//!
//! ```text
//! <user-id> <text>        typed message or menu tap
//! <user-id> !<callback>   inline button press, e.g. `42 !method:upi`
//! <user-id> #upload       photo/file upload
//! ```
//!
//! Outbound messages are printed to stdout with their keyboards.

use super::traits::*;
use crate::ledger::UserId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct ConsoleClient {
    lines: Arc<Mutex<Lines<BufReader<Stdin>>>>,
    wait: Duration,
}

impl ConsoleClient {
    /// `wait` bounds how long one receive blocks so the bot loop keeps ticking.
    pub fn new(wait: Duration) -> Self {
        Self {
            lines: Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines())),
            wait,
        }
    }
}

/// Parse one console line into an event. Blank or id-only lines yield `None`.
pub fn parse_line(line: &str) -> Option<Event> {
    let (user, rest) = line.trim().split_once(char::is_whitespace)?;
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }
    let user = UserId::new(user);

    Some(if rest == "#upload" {
        Event::upload(&user)
    } else if let Some(data) = rest.strip_prefix('!') {
        Event::callback(&user, data)
    } else {
        Event::text(&user, rest)
    })
}

/// Render an outbound message the way the console prints it.
pub fn render(to: &UserId, message: &Outgoing) -> String {
    let mut out = format!("[to {}] {}", to, message.text);
    match &message.keyboard {
        Keyboard::None => {}
        Keyboard::Inline(rows) => {
            for row in rows {
                let buttons: Vec<String> = row
                    .iter()
                    .map(|b| format!("[{} !{}]", b.label, b.data))
                    .collect();
                out.push_str(&format!("\n    {}", buttons.join(" ")));
            }
        }
        Keyboard::Menu(rows) => {
            for row in rows {
                out.push_str(&format!("\n    | {} |", row.join(" | ")));
            }
        }
    }
    out
}

#[async_trait]
impl ChatClient for ConsoleClient {
    async fn send(&self, to: &UserId, message: &Outgoing) -> ChatResult<()> {
        println!("{}", render(to, message));
        Ok(())
    }

    async fn receive_events(&self) -> ChatResult<Vec<Event>> {
        let mut lines = self.lines.lock().await;
        match tokio::time::timeout(self.wait, lines.next_line()).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(Some(line))) => Ok(parse_line(&line).into_iter().collect()),
            Ok(Ok(None)) => Err(ChatError::Closed),
            Ok(Err(e)) => Err(ChatError::Network(e.to_string())),
        }
    }
}
