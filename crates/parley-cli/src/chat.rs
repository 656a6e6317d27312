use anyhow::Result;
use parley_core::{
    ChatEvent, ChatOrchestrator, ChatOrchestratorBuilder, Credentials, Message, MessageId,
    ParleyConfig, PersonaRegistry, Role, SqliteThreadStore, StoreEvent, ThreadId,
};
use std::collections::HashMap;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

// ── commands ─────────────────────────────────────────────────────────────────

const SLASH_COMMANDS: &[(&str, &str)] = &[
    ("/personas", "list assistants"),
    ("/persona", "switch assistant (starts a new chat)  usage: /persona <key>"),
    ("/threads", "list saved conversations"),
    ("/load", "resume a conversation  usage: /load <thread-id>"),
    ("/delete", "delete a conversation  usage: /delete <thread-id>"),
    ("/new", "start a new chat"),
    ("/skip", "show the rest of the current reply"),
    ("/cancel", "stop waiting for the current reply"),
    ("/help", "show this list"),
    ("/quit", "exit Parley"),
];

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Personas,
    Persona(&'a str),
    Threads,
    Load(&'a str),
    Delete(&'a str),
    New,
    Skip,
    Cancel,
    Help,
    Quit,
    Unknown(&'a str),
}

/// `None` for plain chat input.
fn parse_command(line: &str) -> Option<Command<'_>> {
    let line = line.trim();
    if !line.starts_with('/') {
        return None;
    }
    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };
    Some(match (name, arg) {
        ("/personas", _) => Command::Personas,
        ("/persona", key) if !key.is_empty() => Command::Persona(key),
        ("/threads", _) => Command::Threads,
        ("/load", id) if !id.is_empty() => Command::Load(id),
        ("/delete", id) if !id.is_empty() => Command::Delete(id),
        ("/new", _) => Command::New,
        ("/skip", _) => Command::Skip,
        ("/cancel", _) => Command::Cancel,
        ("/help", _) => Command::Help,
        ("/quit" | "/exit", _) => Command::Quit,
        _ => Command::Unknown(name),
    })
}

// ── transcript ───────────────────────────────────────────────────────────────

/// Prints the conversation as the store changes, streaming assistant text
/// as it is revealed.
struct Transcript {
    /// Bytes of each message already on screen.
    shown: HashMap<MessageId, usize>,
}

impl Transcript {
    fn new() -> Self {
        Self {
            shown: HashMap::new(),
        }
    }

    fn speaker(personas: &PersonaRegistry, message: &Message) -> String {
        match message.role {
            Role::User => "you".to_string(),
            Role::Assistant => message
                .personality
                .as_ref()
                .and_then(|p| personas.display_name(p))
                .unwrap_or("assistant")
                .to_string(),
        }
    }

    fn redraw(&mut self, chat: &ChatOrchestrator) {
        self.shown.clear();
        println!("\n────────────────────────────────────────");
        for message in chat.messages() {
            if !message.content.is_empty() {
                println!("{}: {}", Self::speaker(chat.personas(), &message), message.content);
            }
            self.shown.insert(message.id.clone(), message.content.len());
        }
    }

    fn on_store_event(&mut self, chat: &ChatOrchestrator, event: StoreEvent) -> io::Result<()> {
        match event {
            StoreEvent::Reset => self.redraw(chat),
            StoreEvent::Appended(id) => {
                let Some(message) = chat.store().get(&id) else {
                    return Ok(());
                };
                // The user's own line is already on screen.
                let shown = match message.role {
                    Role::User => message.content.len(),
                    Role::Assistant => {
                        if !message.content.is_empty() {
                            println!("{}: {}", Self::speaker(chat.personas(), &message), message.content);
                        }
                        message.content.len()
                    }
                };
                self.shown.insert(id, shown);
            }
            StoreEvent::ContentChanged(id) => {
                let Some(message) = chat.store().get(&id) else {
                    return Ok(());
                };
                let shown = self.shown.entry(id).or_insert(0);
                if message.content.len() < *shown {
                    // Cleared for a fresh reveal.
                    *shown = 0;
                }
                let delta = message.content.get(*shown..).unwrap_or_default();
                if !delta.is_empty() {
                    if *shown == 0 {
                        print!("{}: ", Self::speaker(chat.personas(), &message));
                    }
                    print!("{delta}");
                    *shown = message.content.len();
                    io::stdout().flush()?;
                }
            }
            StoreEvent::Removed(id) => {
                self.shown.remove(&id);
            }
        }
        Ok(())
    }
}

fn prompt() -> io::Result<()> {
    print!("\n> ");
    io::stdout().flush()
}

// ── loop ─────────────────────────────────────────────────────────────────────

pub async fn run(creds: Credentials) -> Result<()> {
    let mut config = ParleyConfig::load()?;
    creds.apply_to(&mut config);
    let transport = creds.build_transport(&config)?;
    let persistence = SqliteThreadStore::open(&config.db_path).await?;

    let chat = ChatOrchestratorBuilder::new(config, transport)
        .persistence(persistence)
        .personas(PersonaRegistry::load())
        .build()?;

    let mut store_events = chat.subscribe_store();
    let mut chat_events = chat.subscribe();
    let mut transcript = Transcript::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Parley. Type a message, or /help for commands.");
    transcript.redraw(&chat);
    prompt()?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&chat, &line).await? {
                    break;
                }
            }
            event = store_events.recv() => match event {
                Ok(event) => transcript.on_store_event(&chat, event)?,
                Err(RecvError::Lagged(_)) => transcript.redraw(&chat),
                Err(RecvError::Closed) => break,
            },
            event = chat_events.recv() => match event {
                Ok(ChatEvent::Response(_)) => prompt()?,
                Ok(ChatEvent::Error { message, .. }) => {
                    eprintln!("\n! {message}");
                    prompt()?;
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if !chat.cancel() {
                    break;
                }
                println!("\n(cancelled)");
                prompt()?;
            }
        }
    }

    println!();
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_line(chat: &ChatOrchestrator, line: &str) -> Result<bool> {
    let Some(command) = parse_command(line) else {
        if line.trim().is_empty() {
            prompt()?;
            return Ok(true);
        }
        if let Err(e) = chat.send_message(line) {
            eprintln!("! {}", e.user_message());
            prompt()?;
        }
        return Ok(true);
    };

    match command {
        Command::Personas => {
            let active = chat.active_personality();
            for persona in chat.personas().all() {
                let marker = if persona.key == active { "*" } else { " " };
                println!("{marker} {:<12} {}", persona.key.as_str(), persona.display_name);
            }
        }
        Command::Persona(key) => match chat.switch_personality(key) {
            Ok(true) => {}
            Ok(false) => println!("Already talking to {key}."),
            Err(e) => eprintln!("! {}", e.user_message()),
        },
        Command::Threads => match chat.list_threads().await {
            Ok(threads) if threads.is_empty() => println!("No saved conversations."),
            Ok(threads) => {
                let current = chat.current_thread();
                for t in threads {
                    let marker = if current.as_ref() == Some(&t.thread_id) { "*" } else { " " };
                    println!(
                        "{marker} {}  [{}] {} ({} messages)",
                        t.thread_id, t.personality, t.title, t.message_count
                    );
                }
            }
            Err(e) => eprintln!("! {}", e.user_message()),
        },
        Command::Load(id) => {
            if let Err(e) = chat.load_thread(&ThreadId::from(id)).await {
                eprintln!("! {}", e.user_message());
            }
        }
        Command::Delete(id) => match chat.delete_thread(&ThreadId::from(id)).await {
            Ok(true) => println!("Deleted {id}."),
            Ok(false) => println!("No conversation {id}."),
            Err(e) => eprintln!("! {}", e.user_message()),
        },
        Command::New => chat.new_chat(),
        Command::Skip => {
            chat.skip_typing();
        }
        Command::Cancel => {
            if chat.cancel() {
                println!("(cancelled)");
            }
        }
        Command::Help => {
            for (name, help) in SLASH_COMMANDS {
                println!("  {name:<10} {help}");
            }
        }
        Command::Quit => return Ok(false),
        Command::Unknown(name) => println!("Unknown command {name}. Try /help."),
    }
    prompt()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_command("hello /persona"), None);
    }

    #[test]
    fn commands_take_trimmed_arguments() {
        assert_eq!(parse_command(" /persona  analyst "), Some(Command::Persona("analyst")));
        assert_eq!(parse_command("/load t-1"), Some(Command::Load("t-1")));
        assert_eq!(parse_command("/quit"), Some(Command::Quit));
    }

    #[test]
    fn missing_argument_is_unknown() {
        assert_eq!(parse_command("/persona"), Some(Command::Unknown("/persona")));
    }
}
