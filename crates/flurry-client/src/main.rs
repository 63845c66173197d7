use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::info;
use uuid::Uuid;

use flurry_client::identity::{self, FileIdentityStore, IdentityStore};
use flurry_client::view::TerminalRenderer;
use flurry_client::{Backend, ClientConfig, RemoteBackend, RoomSession};
use flurry_types::models::User;

const USAGE: &str = "usage: flurry new | flurry chats | flurry <chat-id>";

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout is the chat
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flurry=info".into()),
        )
        .init();

    let config = ClientConfig::from_env()?;
    let backend = Arc::new(RemoteBackend::new(&config));
    let store = FileIdentityStore::new(&config.identity_path);
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let command = std::env::args().nth(1);
    match command.as_deref() {
        Some("new") => {
            let name = display_name(&config, &store, &mut input).await?;
            let (chat, user) = identity::start_chat(&store, backend.as_ref(), &name).await?;
            println!("share this chat id: {}", chat.id);
            run_room(backend, chat.id, user, &config, input).await
        }
        Some("chats") => {
            let name = display_name(&config, &store, &mut input).await?;
            let user = identity::establish_identity(&store, backend.as_ref(), &name).await?;
            let chats = backend.fetch_user_chats(user.id).await?;
            if chats.is_empty() {
                println!("no chats yet");
            }
            for chat in chats {
                println!("{}  {}", chat.id, chat.display_name());
            }
            Ok(())
        }
        Some(raw) => {
            let chat_id: Uuid = raw
                .parse()
                .with_context(|| format!("not a chat id: {}\n{}", raw, USAGE))?;
            let name = display_name(&config, &store, &mut input).await?;
            let user = identity::establish_identity(&store, backend.as_ref(), &name).await?;
            run_room(backend, chat_id, user, &config, input).await
        }
        None => bail!(USAGE),
    }
}

/// Name for a new identity. Not asked for once one is stored.
async fn display_name(
    config: &ClientConfig,
    store: &FileIdentityStore,
    input: &mut Input,
) -> anyhow::Result<String> {
    if let Some(user) = store.load()? {
        return Ok(user.name);
    }
    if let Some(name) = &config.display_name {
        return Ok(name.clone());
    }

    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"your name: ").await?;
        stdout.flush().await?;
        match input.next_line().await? {
            Some(line) if !line.trim().is_empty() => return Ok(line.trim().to_string()),
            Some(_) => continue,
            None => bail!("no name given"),
        }
    }
}

async fn run_room(
    backend: Arc<RemoteBackend>,
    chat_id: Uuid,
    user: User,
    config: &ClientConfig,
    mut input: Input,
) -> anyhow::Result<()> {
    info!("joining chat {} as {}", chat_id, user.name);
    let session = RoomSession::open(backend, chat_id, user, config.room_options()).await?;

    let mut snapshots = session.snapshots();
    let printer = tokio::spawn(async move {
        let mut renderer = TerminalRenderer::new();
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            for line in renderer.render(&snapshot) {
                println!("{}", line);
            }
            if snapshots.changed().await.is_err() {
                break;
            }
        }
    });

    while let Some(line) = input.next_line().await? {
        let command = line.trim();
        if command == "/quit" {
            break;
        } else if command == "/dismiss" {
            session.dismiss_notification();
        } else {
            session.submit(line);
        }
    }

    session.close().await;
    printer.await?;
    Ok(())
}
