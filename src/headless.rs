//! Headless console
//!
//! Line-oriented stand-in for the webview when the `desktop` feature is off.
//! Slash commands map onto the API tree; any other line is a prompt sent to
//! `ollama.generate` for the current chat (a new one on first use). Streamed
//! chunks are printed as they arrive. `/bg` sends a prompt without waiting;
//! its reply prints when the stream finishes.

use crate::state::HostState;
use chat_desktop_core::api::{StreamChunk, NEW_CHAT_ID};
use chat_desktop_core::events::Disposer;
use chat_desktop_core::Envelope;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub type SharedOutput = Arc<Mutex<Box<dyn Write + Send>>>;

const HELP: &str = "\
Commands:
  /list              list chats
  /new               start a new chat
  /use <id>          switch to a chat
  /history [id]      show messages of a chat
  /delete <id>       delete a chat
  /models            list installed models
  /bg <prompt>       send a prompt without waiting for the reply
  /help              this text
  /quit              exit
Anything else is sent as a prompt.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    New,
    Use(String),
    History(Option<String>),
    Delete(String),
    Models,
    Background(String),
    Help,
    Quit,
    Prompt(String),
    Empty,
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Prompt(line.to_string());
        };

        if let Some(prompt) = rest.strip_prefix("bg ") {
            return match prompt.trim() {
                "" => Command::Invalid(line.to_string()),
                prompt => Command::Background(prompt.to_string()),
            };
        }

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::to_string);
        match (name, arg) {
            ("list", None) => Command::List,
            ("new", None) => Command::New,
            ("use", Some(id)) => Command::Use(id),
            ("history", id) => Command::History(id),
            ("delete", Some(id)) => Command::Delete(id),
            ("models", None) => Command::Models,
            ("help", None) => Command::Help,
            ("quit" | "exit", None) => Command::Quit,
            _ => Command::Invalid(line.to_string()),
        }
    }
}

/// Prints `stream:response` chunks for the message being generated.
#[derive(Default)]
struct StreamView {
    streamed: bool,
    /// Chat of the last finished reply
    finished_in: Option<String>,
}

pub struct Console {
    state: HostState,
    chat: Option<String>,
    view: Arc<Mutex<StreamView>>,
    out: SharedOutput,
    subscriptions: Vec<Disposer>,
}

impl Console {
    pub fn new(state: HostState, out: SharedOutput) -> Self {
        let mut subscriptions = Vec::new();
        let view = Arc::new(Mutex::new(StreamView::default()));

        let stream_out = out.clone();
        let stream_view = view.clone();
        let subscribed = state
            .listeners
            .stream()
            .on_response(move |chunk: StreamChunk| {
                let Ok(mut view) = stream_view.lock() else {
                    return;
                };
                let text = if chunk.data.done {
                    // final chunk carries the whole rendered reply
                    let text = if view.streamed {
                        "\n".to_string()
                    } else {
                        format!("{}\n", chunk.data.message.content)
                    };
                    view.streamed = false;
                    view.finished_in = Some(chunk.chat_id.clone());
                    text
                } else {
                    view.streamed = true;
                    chunk.data.message.content
                };
                if let Ok(mut out) = stream_out.lock() {
                    let _ = out.write_all(text.as_bytes());
                    let _ = out.flush();
                }
            });
        if let Some(disposer) = subscribed.data {
            subscriptions.push(disposer);
        }

        let subscribed = state.listeners.stream().on_database_change(|change| {
            tracing::debug!(op = "host.database_change", name = ?change.name, kind = ?change.kind, "Database changed");
        });
        if let Some(disposer) = subscribed.data {
            subscriptions.push(disposer);
        }

        Self {
            state,
            chat: None,
            view,
            out,
            subscriptions,
        }
    }

    pub fn current_chat(&self) -> Option<&str> {
        self.chat.as_deref()
    }

    fn say(&self, text: impl AsRef<str>) {
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{}", text.as_ref());
            let _ = out.flush();
        }
    }

    fn report<T>(&self, envelope: &Envelope<T>) {
        match envelope.error_message() {
            Some(error) => self.say(format!("error {}: {} ({})", envelope.code(), envelope.message(), error)),
            None => self.say(format!("error {}: {}", envelope.code(), envelope.message())),
        }
    }

    /// A background prompt without a current chat lands in a new one; pick
    /// it up once its reply has finished.
    fn adopt_finished_chat(&mut self) {
        if self.chat.is_some() {
            return;
        }
        if let Ok(mut view) = self.view.lock() {
            self.chat = view.finished_in.take();
        }
    }

    /// Run one command. Returns false when the console should exit.
    pub async fn execute(&mut self, command: Command) -> bool {
        self.adopt_finished_chat();
        match command {
            Command::Empty => {}
            Command::Quit => return false,
            Command::Help => self.say(HELP),
            Command::Invalid(line) => self.say(format!("unknown command: {} (try /help)", line)),
            Command::List => {
                let listed = self.state.api.chats().list().await;
                match &listed.data {
                    Some(chats) if chats.is_empty() => self.say("no chats"),
                    Some(chats) => {
                        for chat in chats {
                            let marker = if self.chat.as_deref() == Some(chat.id.as_str()) { "*" } else { " " };
                            self.say(format!("{} {}  {}  [{}]  {}", marker, chat.id, chat.title, chat.model, chat.created_at));
                        }
                    }
                    None => self.report(&listed),
                }
            }
            Command::New => {
                let created = self.state.api.chats().create().await;
                match &created.data {
                    Some(c) => {
                        self.say(format!("created chat {}", c.id));
                        self.chat = Some(c.id.clone());
                    }
                    None => self.report(&created),
                }
            }
            Command::Use(id) => {
                self.say(format!("using chat {}", id));
                self.chat = Some(id);
            }
            Command::History(id) => {
                let Some(id) = id.or_else(|| self.chat.clone()) else {
                    self.say("no current chat");
                    return true;
                };
                let history = self.state.api.messages().get_history(&id).await;
                match &history.data {
                    Some(messages) => {
                        for message in messages {
                            self.say(format!("[{}] {}: {}", message.created_at, message.role.as_str(), message.content));
                        }
                    }
                    None => self.report(&history),
                }
            }
            Command::Delete(id) => {
                let deleted = self.state.api.chats().delete(&id).await;
                if deleted.is_ok() {
                    self.say(format!("deleted chat {}", id));
                    if self.chat.as_deref() == Some(id.as_str()) {
                        self.chat = None;
                    }
                    if let Ok(mut view) = self.view.lock() {
                        view.finished_in = None;
                    }
                } else {
                    self.report(&deleted);
                }
            }
            Command::Models => {
                let models = self.state.api.ollama().models().await;
                match &models.data {
                    Some(models) => {
                        for model in models {
                            self.say(model);
                        }
                    }
                    None => self.report(&models),
                }
            }
            Command::Background(prompt) => {
                let chat_id = self.chat.clone().unwrap_or_else(|| NEW_CHAT_ID.to_string());
                let sent = self.state.api.ollama().generate_detached(&chat_id, &prompt).await;
                if sent.is_ok() {
                    self.say("generating in the background");
                } else {
                    self.report(&sent);
                }
            }
            Command::Prompt(prompt) => {
                let chat_id = self.chat.clone().unwrap_or_else(|| NEW_CHAT_ID.to_string());
                let generated = self.state.api.ollama().generate(&chat_id, &prompt).await;
                match &generated.data {
                    Some(g) => self.chat = Some(g.chat_id.clone()),
                    None => self.report(&generated),
                }
            }
        }
        true
    }

    /// Read commands until EOF or /quit.
    pub async fn run<R>(&mut self, input: R) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        self.say(format!("{} (type /help for commands)", crate::config::app_name()));
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            if !self.execute(Command::parse(&line)).await {
                break;
            }
        }
        Ok(())
    }

    pub async fn close(self) {
        for disposer in self.subscriptions {
            disposer.dispose();
        }
        self.state.shutdown().await;
    }
}
