use super::{
    ChatCommand, Cli, CliError, Command, CreateProjectArgs, LoginArgs, ProjectCommand,
    ProjectsCommand, PushArgs, RegisterArgs, RunArgs, WatchArgs,
};
use crate::api::{CloneProject, HttpApi, NewProject};
use crate::app::{App, AppEvent};
use crate::auth::{FileTokenStore, Registration};
use crate::chat::{ChatMessage, MergeOutcome, MessageBody};
use crate::config::Config;
use crate::document::full_range;
use crate::execution::{ExecutionResult, ExecutionStatus};
use crate::project::{ProjectRoom, RoomUpdate};
use crate::session::ConnectionState;
use crate::transport::WebSocketConnector;
use collab_proto::{FileId, FileKind, ProjectId, TextChange};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info};

const TICK: Duration = Duration::from_millis(50);

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = match cli.api_url.as_deref() {
        Some(url) => Config::new(url)?,
        None => Config::from_env()?,
    };
    debug!(api = %config.api_url, socket = %config.socket_url, "configuration resolved");
    let mut app = build_app(config)?;

    let result = match cli.command {
        Command::Login(args) => login(&mut app, args).await,
        Command::Register(args) => register(&mut app, args).await,
        Command::Logout => logout(&mut app).await,
        Command::Whoami => whoami(&mut app).await,
        Command::Projects(command) => projects(&mut app, command).await,
        Command::Chat(command) => chat(&mut app, command).await,
        Command::Project(ProjectCommand::Watch(args)) => watch(&mut app, args).await,
        Command::Project(ProjectCommand::Push(args)) => push(&mut app, args).await,
        Command::Run(args) => run_file(&mut app, args).await,
    };
    app.shutdown().await;
    result
}

fn build_app(config: Config) -> Result<App, CliError> {
    let api = Arc::new(HttpApi::new(config.rest_base()?)?);
    let store = Arc::new(FileTokenStore::default_location()?);
    Ok(App::new(config, api, store, Arc::new(WebSocketConnector)))
}

async fn login(app: &mut App, args: LoginArgs) -> Result<(), CliError> {
    app.login(&args.email, &args.password).await?;
    if let Some(user) = app.user() {
        println!("signed in as {}", user.username);
    }
    Ok(())
}

async fn register(app: &mut App, args: RegisterArgs) -> Result<(), CliError> {
    let confirm_password = args
        .confirm_password
        .unwrap_or_else(|| args.password.clone());
    let form = Registration {
        username: args.username,
        email: args.email,
        password: args.password,
        confirm_password,
    };
    app.register(&form).await?;
    if let Some(user) = app.user() {
        println!("registered and signed in as {}", user.username);
    }
    Ok(())
}

async fn logout(app: &mut App) -> Result<(), CliError> {
    app.logout().await?;
    println!("signed out");
    Ok(())
}

/// Confirms the stored token over REST only; no socket is opened.
async fn signed_in_offline(app: &mut App) -> Result<(), CliError> {
    match app.auth_mut().restore().await? {
        Some(_) => Ok(()),
        None => Err(CliError::NotSignedIn),
    }
}

/// Restores the login, opens the session and waits for the handshake.
async fn signed_in_online(app: &mut App) -> Result<(), CliError> {
    if !app.restore().await? {
        return Err(CliError::NotSignedIn);
    }
    let limit = app.config().connect_timeout * 3;
    let connected = timeout(limit, async {
        loop {
            match app.next_event().await {
                Some(AppEvent::Connection(ConnectionState::Connected { .. })) => return Ok(()),
                Some(AppEvent::SignedOut) => return Err(CliError::NotSignedIn),
                Some(AppEvent::Closed) | None => return Err(CliError::SessionClosed),
                Some(_) => {}
            }
        }
    })
    .await;
    connected.unwrap_or(Err(CliError::ConnectTimeout(limit)))
}

async fn whoami(app: &mut App) -> Result<(), CliError> {
    signed_in_offline(app).await?;
    if let Some(user) = app.user() {
        match user.email.as_deref() {
            Some(email) => println!("{} <{email}> ({})", user.username, user.id),
            None => println!("{} ({})", user.username, user.id),
        }
    }
    Ok(())
}

async fn projects(app: &mut App, command: ProjectsCommand) -> Result<(), CliError> {
    signed_in_offline(app).await?;
    match command {
        ProjectsCommand::List => {
            for project in app.list_projects().await? {
                let language = project.language.as_deref().unwrap_or("-");
                println!("{}\t{}\t{language}", project.id, project.name);
            }
        }
        ProjectsCommand::Create(CreateProjectArgs {
            name,
            language,
            description,
            visibility,
        }) => {
            let created = app
                .create_project(&NewProject {
                    name,
                    description,
                    language,
                    visibility,
                })
                .await?;
            println!("created {} ({})", created.name, created.id);
        }
        ProjectsCommand::Delete { id } => {
            app.delete_project(&ProjectId::new(id.clone())).await?;
            println!("deleted {id}");
        }
        ProjectsCommand::Clone { id, name } => {
            let id = ProjectId::new(id);
            let request = match name {
                Some(name) => CloneProject {
                    name,
                    visibility: "private".to_string(),
                },
                None => {
                    let source = app.api().get_project(&id).await?;
                    CloneProject::named_after(&source.name)
                }
            };
            let copy = app.clone_project(&id, &request).await?;
            println!("cloned into {} ({})", copy.name, copy.id);
        }
    }
    Ok(())
}

fn print_message(message: &ChatMessage) {
    let sender = message
        .sender_username
        .as_deref()
        .unwrap_or(message.sender_id.as_str());
    match &message.body {
        MessageBody::Text(text) => println!("[{sender}] {text}"),
        MessageBody::Audio {
            url,
            duration_seconds,
        } => match duration_seconds {
            Some(seconds) => println!("[{sender}] voice message {seconds:.0}s {url}"),
            None => println!("[{sender}] voice message {url}"),
        },
    }
}

async fn chat(app: &mut App, command: ChatCommand) -> Result<(), CliError> {
    signed_in_online(app).await?;
    let Some(stream) = app.enter_global_chat().await? else {
        println!("the server has no global chat");
        return Ok(());
    };
    match command {
        ChatCommand::Tail => {
            for message in stream.messages() {
                print_message(message);
            }
            follow(app, |app, event| {
                if event == AppEvent::GlobalChat(MergeOutcome::Appended) {
                    if let Some(message) = app.global_chat().and_then(|chat| chat.messages().last()) {
                        print_message(message);
                    }
                }
            })
            .await
        }
        ChatCommand::Send { text } => {
            let id = stream.send_text(&text).await?;
            println!("sent {id}");
            Ok(())
        }
        ChatCommand::Voice { path, seconds } => {
            let bytes = tokio::fs::read(&path).await?;
            let id = stream.send_audio(bytes, seconds).await?;
            println!("sent voice message {id}");
            Ok(())
        }
    }
}

/// Routes events until interrupted or the session ends. Only the receive
/// step races the ticker; dispatch always runs to completion.
async fn follow(
    app: &mut App,
    mut on_event: impl FnMut(&App, AppEvent),
) -> Result<(), CliError> {
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        let inbound = tokio::select! {
            _ = &mut interrupted => {
                info!("interrupted");
                return Ok(());
            }
            _ = ticker.tick() => {
                app.tick(Instant::now());
                continue;
            }
            inbound = app.recv() => inbound,
        };
        let Some(inbound) = inbound else {
            return Err(CliError::SessionClosed);
        };
        match app.dispatch(inbound).await {
            AppEvent::SignedOut => return Err(CliError::NotSignedIn),
            AppEvent::Closed => return Err(CliError::SessionClosed),
            event => on_event(app, event),
        }
    }
}

async fn enter(app: &mut App, project: &str, file: Option<&str>) -> Result<(), CliError> {
    signed_in_online(app).await?;
    let room = app.enter_project(&ProjectId::new(project)).await?;
    if let Some(file) = file {
        room.open_file(&FileId::new(file)).await?;
    }
    Ok(())
}

fn print_tree(room: &ProjectRoom) {
    let tree = room.workspace().tree();
    for (depth, node) in tree.walk() {
        let marker = match node.kind {
            FileKind::Folder => "/",
            FileKind::File => "",
        };
        println!("{}{}{marker}\t{}", "  ".repeat(depth), node.name, node.id);
    }
}

fn describe(room: &ProjectRoom, update: &RoomUpdate) {
    match update {
        RoomUpdate::Presence => {
            let names: Vec<_> = room
                .presence()
                .members()
                .iter()
                .map(|member| member.username.as_str())
                .collect();
            println!("present: {}", names.join(", "));
        }
        RoomUpdate::Tree => print_tree(room),
        RoomUpdate::Document(outcome) => {
            if let Some(buffer) = room.workspace().active_buffer() {
                println!(
                    "{} v{} ({outcome:?})\n{}",
                    buffer.name(),
                    buffer.version(),
                    buffer.content()
                );
            }
        }
        RoomUpdate::Cursor(_) => {
            for cursor in room.cursors().iter() {
                println!(
                    "cursor {} at {}:{}",
                    cursor.username, cursor.position.line, cursor.position.column
                );
            }
        }
        RoomUpdate::Chat(MergeOutcome::Appended) => {
            if let Some(message) = room.chat().and_then(|chat| chat.messages().last()) {
                print_message(message);
            }
        }
        RoomUpdate::Execution => {
            if let Some(result) = room.execution().latest() {
                print_execution(result);
            }
        }
        RoomUpdate::Chat(_) | RoomUpdate::Connection | RoomUpdate::Ignored => {}
    }
}

async fn watch(app: &mut App, args: WatchArgs) -> Result<(), CliError> {
    enter(app, &args.project, args.file.as_deref()).await?;
    if let Some(room) = app.room() {
        println!("{}", room.project().name);
        print_tree(room);
        if let Some(buffer) = room.workspace().active_buffer() {
            println!("--- {}\n{}", buffer.name(), buffer.content());
        }
    }
    follow(app, |app, event| match (app.room(), event) {
        (Some(room), AppEvent::Room(update)) => describe(room, &update),
        (_, AppEvent::Connection(state)) => println!("connection: {state:?}"),
        _ => {}
    })
    .await
}

async fn push(app: &mut App, args: PushArgs) -> Result<(), CliError> {
    let content = tokio::fs::read_to_string(&args.path).await?;
    enter(app, &args.project, Some(&args.file)).await?;
    let room = app.room_mut().ok_or(crate::app::AppError::NoProject)?;
    let range = match room.workspace().active_buffer() {
        Some(buffer) => full_range(buffer.text()),
        None => return Err(crate::app::AppError::NoProject.into()),
    };
    room.apply_local_edit(vec![TextChange::replace(range, content)])?;
    let saved = room.save_active().await?;
    println!("saved {} bytes", saved.content.len());
    Ok(())
}

fn print_execution(result: &ExecutionResult) {
    if let Some(output) = result.compile_output.as_deref() {
        println!("--- compile\n{output}");
    }
    if let Some(stdout) = result.stdout.as_deref() {
        print!("{stdout}");
    }
    if let Some(stderr) = result.stderr.as_deref() {
        eprint!("{stderr}");
    }
    if let Some(error) = result.system_error.as_deref() {
        eprintln!("error: {error}");
    }
    let status = match result.status {
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Error => "failed",
    };
    match result.execution_time_ms {
        Some(ms) => println!("--- {status} in {ms:.0} ms"),
        None => println!("--- {status}"),
    }
}

async fn run_file(app: &mut App, args: RunArgs) -> Result<(), CliError> {
    enter(app, &args.project, Some(&args.file)).await?;
    let room = app.room_mut().ok_or(crate::app::AppError::NoProject)?;
    let result = room.run_active(&args.stdin).await?;
    print_execution(result);
    Ok(())
}
