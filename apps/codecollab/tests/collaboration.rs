use std::sync::Arc;
use std::time::Duration;

use codecollab_client_core::api::mock::{MockApi, MockFailure};
use codecollab_client_core::app::{App, AppEvent};
use codecollab_client_core::auth::{MemoryTokenStore, TokenStore};
use codecollab_client_core::chat::MergeOutcome;
use codecollab_client_core::config::{Config, ReconnectPolicy};
use codecollab_client_core::cursors::CursorOutcome;
use codecollab_client_core::project::{RemoteEditOutcome, RoomUpdate};
use codecollab_client_core::session::ConnectionState;
use codecollab_client_core::transport::memory::{MemoryConnector, MemoryPeer};
use collab_proto::{
    decode_client_event, encode_server_event, ChatRecord, ChatRef, ClientEvent, CodeUpdated,
    ConnectedPayload, ConnectionId, CursorMoved, FileId, FileKind, FileRecord, Position,
    PresenceUser, ProjectId, ProjectRecord, ServerEvent, TextChange, UserLeft, UserRef,
};
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
    app: App,
    api: Arc<MockApi>,
    store: Arc<MemoryTokenStore>,
    peer: MemoryPeer,
    peers: UnboundedReceiver<MemoryPeer>,
}

fn file(id: &str, content: &str) -> FileRecord {
    FileRecord {
        id: id.into(),
        name: format!("{id}.js"),
        kind: FileKind::File,
        parent: None,
        content: Some(content.into()),
        language: Some("javascript".into()),
    }
}

fn chat_room(id: &str) -> ChatRecord {
    ChatRecord {
        id: id.into(),
        name: None,
        participants: Vec::new(),
        messages: Vec::new(),
    }
}

fn frame(event: ServerEvent) -> String {
    encode_server_event(&event).unwrap()
}

fn connected(socket: &str) -> String {
    frame(ServerEvent::Connected(ConnectedPayload {
        socket_id: socket.into(),
    }))
}

async fn next_named(peer: &mut MemoryPeer, name: &str) -> ClientEvent {
    loop {
        let raw = peer.next_frame().await.expect("client closed the link");
        let event = decode_client_event(&raw).unwrap();
        if event.name() == name {
            return event;
        }
    }
}

async fn signed_in() -> Harness {
    let api = Arc::new(MockApi::new());
    api.seed_project(ProjectRecord {
        id: "p1".into(),
        name: "demo".into(),
        description: None,
        language: Some("javascript".into()),
        owner: UserRef::Id("u-ada".into()),
        files: vec![file("a", "x=1"), file("b", "y=2")],
        chat: Some(ChatRef::Id("c-p1".into())),
        visibility: None,
    });
    api.seed_chat(chat_room("c-global"));
    api.seed_chat(chat_room("c-p1"));

    let (connector, mut peers) = MemoryConnector::new();
    let mut config = Config::new("http://collab.test").unwrap();
    config.reconnect = ReconnectPolicy {
        initial: Duration::from_millis(10),
        max: Duration::from_millis(20),
    };
    let store = Arc::new(MemoryTokenStore::default());
    let mut app = App::new(config, api.clone(), store.clone(), Arc::new(connector));

    app.login("ada@example.com", "secret").await.unwrap();
    let peer = peers.recv().await.unwrap();
    assert_eq!(peer.token, "token-ada");
    assert!(peer.push(connected("s-local")));
    assert_eq!(
        app.next_event().await,
        Some(AppEvent::Connection(ConnectionState::Connected {
            connection_id: "s-local".into()
        }))
    );

    Harness {
        app,
        api,
        store,
        peer,
        peers,
    }
}

async fn in_project(h: &mut Harness, open: &[&str]) {
    let room = h.app.enter_project(&ProjectId::new("p1")).await.unwrap();
    for id in open {
        room.open_file(&FileId::new(*id)).await.unwrap();
    }
    next_named(&mut h.peer, "join_project").await;
}

async fn deliver(h: &mut Harness, event: ServerEvent) -> AppEvent {
    assert!(h.peer.push(frame(event)));
    h.app.next_event().await.unwrap()
}

fn edit(socket: &str, file: &str, change: TextChange) -> ServerEvent {
    ServerEvent::CodeUpdated(CodeUpdated {
        file_id: file.into(),
        changes: vec![change],
        user_id: "u-bob".into(),
        socket_id: socket.into(),
    })
}

fn cursor(socket: &str, user: &str, line: u32, column: u32) -> ServerEvent {
    ServerEvent::CursorMoved(CursorMoved {
        file_id: "a".into(),
        user_id: user.into(),
        socket_id: socket.into(),
        username: user.into(),
        position: Position::new(line, column),
    })
}

fn active_content(h: &Harness) -> String {
    h.app
        .room()
        .and_then(|room| room.workspace().active_buffer())
        .map(|buffer| buffer.content().to_string())
        .unwrap_or_default()
}

#[test_timeout::tokio_timeout_test]
async fn peer_edits_apply_once_and_own_echoes_are_ignored() {
    let mut h = signed_in().await;
    in_project(&mut h, &["a"]).await;

    let room = h.app.room_mut().unwrap();
    room.apply_local_edit(vec![TextChange::insert(Position::new(1, 4), ";")])
        .unwrap();
    match next_named(&mut h.peer, "code_change").await {
        ClientEvent::CodeChange(change) => {
            assert_eq!(change.file_id, FileId::new("a"));
            assert_eq!(change.version, 1);
        }
        other => panic!("unexpected {other:?}"),
    }

    let echo = edit("s-local", "a", TextChange::insert(Position::new(1, 4), ";"));
    assert_eq!(
        deliver(&mut h, echo).await,
        AppEvent::Room(RoomUpdate::Document(RemoteEditOutcome::SelfEcho))
    );
    assert_eq!(active_content(&h), "x=1;");

    let peer_edit = edit("s-bob", "a", TextChange::insert(Position::new(1, 5), "\ny=2"));
    assert!(matches!(
        deliver(&mut h, peer_edit).await,
        AppEvent::Room(RoomUpdate::Document(RemoteEditOutcome::Applied(_)))
    ));
    assert_eq!(active_content(&h), "x=1;\ny=2");
}

#[test_timeout::tokio_timeout_test]
async fn cursors_are_tracked_per_connection() {
    let mut h = signed_in().await;
    in_project(&mut h, &["a"]).await;

    assert_eq!(
        deliver(&mut h, cursor("s-bob", "u-bob", 1, 1)).await,
        AppEvent::Room(RoomUpdate::Cursor(CursorOutcome::Inserted))
    );
    assert_eq!(
        deliver(&mut h, cursor("s-carol", "u-carol", 2, 5)).await,
        AppEvent::Room(RoomUpdate::Cursor(CursorOutcome::Inserted))
    );
    assert_eq!(
        deliver(&mut h, cursor("s-bob", "u-bob", 3, 1)).await,
        AppEvent::Room(RoomUpdate::Cursor(CursorOutcome::Replaced))
    );

    let cursors = h.app.room().unwrap().cursors();
    assert_eq!(cursors.len(), 2);
    let bob = cursors.get(&ConnectionId::new("s-bob")).unwrap();
    assert_eq!(bob.position, Position::new(3, 1));
    let carol = cursors.get(&ConnectionId::new("s-carol")).unwrap();
    assert_eq!(carol.position, Position::new(2, 5));
}

#[test_timeout::tokio_timeout_test]
async fn duplicate_join_then_leave_clears_presence_and_cursor() {
    let mut h = signed_in().await;
    in_project(&mut h, &["a"]).await;
    let bob = || {
        ServerEvent::UserJoined(PresenceUser {
            user_id: "u-bob".into(),
            username: "bob".into(),
        })
    };

    deliver(&mut h, bob()).await;
    deliver(&mut h, bob()).await;
    assert_eq!(h.app.room().unwrap().presence().len(), 1);
    deliver(&mut h, cursor("s-bob", "u-bob", 1, 2)).await;
    assert_eq!(h.app.room().unwrap().cursors().len(), 1);

    let left = ServerEvent::UserLeft(UserLeft {
        user_id: "u-bob".into(),
        username: Some("bob".into()),
    });
    assert_eq!(deliver(&mut h, left).await, AppEvent::Room(RoomUpdate::Presence));
    let room = h.app.room().unwrap();
    assert!(room.presence().is_empty());
    assert!(room.cursors().is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn chat_echo_of_a_sent_message_is_not_duplicated() {
    let mut h = signed_in().await;
    let chat = h.app.enter_global_chat().await.unwrap().unwrap();
    let id = chat.send_text("hello").await.unwrap();
    assert_eq!(chat.messages().len(), 1);
    next_named(&mut h.peer, "join").await;

    let record = h
        .api
        .state()
        .chats
        .iter()
        .find(|room| room.id.as_str() == "c-global")
        .and_then(|room| room.messages.last().cloned())
        .unwrap();
    assert_eq!(record.id, id);
    assert_eq!(
        deliver(&mut h, ServerEvent::Message(record)).await,
        AppEvent::GlobalChat(MergeOutcome::Duplicate)
    );
    let messages = h.app.global_chat().unwrap().messages();
    assert_eq!(messages.iter().filter(|m| m.id == id).count(), 1);
}

#[test_timeout::tokio_timeout_test]
async fn failed_save_keeps_buffer_dirty() {
    let mut h = signed_in().await;
    in_project(&mut h, &["a"]).await;
    let room = h.app.room_mut().unwrap();
    room.apply_local_edit(vec![TextChange::insert(Position::new(1, 4), ";")])
        .unwrap();

    h.api.fail_next("save_file", MockFailure::Status(500, "disk full"));
    assert!(room.save_active().await.is_err());
    assert!(room.workspace().active_buffer().unwrap().is_dirty());

    let outcome = room.save_active().await.unwrap();
    assert!(outcome.clean);
    assert!(!room.workspace().active_buffer().unwrap().is_dirty());
    assert_eq!(h.api.saved(), vec![(FileId::new("a"), "x=1;".to_string())]);
    match next_named(&mut h.peer, "file_save").await {
        ClientEvent::FileSave(save) => assert_eq!(save.content, "x=1;"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test]
async fn closing_tabs_moves_the_selection() {
    let mut h = signed_in().await;
    in_project(&mut h, &["a", "b"]).await;
    let room = h.app.room_mut().unwrap();
    assert_eq!(room.workspace().active_id(), Some(&FileId::new("b")));

    assert!(room.close_file(&FileId::new("b")).await);
    assert_eq!(room.workspace().active_id(), Some(&FileId::new("a")));
    assert!(room.close_file(&FileId::new("a")).await);
    assert_eq!(room.workspace().active_id(), None);

    match next_named(&mut h.peer, "file_close").await {
        ClientEvent::FileClose(scope) => assert_eq!(scope.file_id, FileId::new("b")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test]
async fn rejected_token_signs_out_and_forgets_it() {
    let mut h = signed_in().await;
    assert!(h.store.load().unwrap().is_some());

    h.api.fail_next("get_project", MockFailure::Unauthorized);
    let err = h.app.enter_project(&ProjectId::new("p1")).await.err().unwrap();
    assert!(err.is_unauthorized());

    assert_eq!(h.app.next_event().await, Some(AppEvent::SignedOut));
    assert!(h.app.user().is_none());
    assert!(h.store.load().unwrap().is_none());
    assert_eq!(h.app.connection(), ConnectionState::Closed);
}

#[test_timeout::tokio_timeout_test]
async fn reconnect_rejoins_rooms_on_the_new_connection() {
    let mut h = signed_in().await;
    in_project(&mut h, &["a"]).await;
    let Harness {
        mut app,
        peer,
        mut peers,
        ..
    } = h;

    drop(peer);
    assert!(matches!(
        app.next_event().await,
        Some(AppEvent::Connection(_))
    ));

    let mut peer = peers.recv().await.unwrap();
    assert!(peer.push(connected("s-local-2")));
    assert!(matches!(
        app.next_event().await,
        Some(AppEvent::Connection(ConnectionState::Connected { .. }))
    ));

    let room = app.room().unwrap();
    assert_eq!(room.connection_id(), Some(&ConnectionId::new("s-local-2")));
    next_named(&mut peer, "join_project").await;
    next_named(&mut peer, "join").await;
    match next_named(&mut peer, "file_open").await {
        ClientEvent::FileOpen(scope) => assert_eq!(scope.file_id, FileId::new("a")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test(20)]
async fn reconnect_refetch_completes_while_a_ticker_races_the_receive() {
    let mut h = signed_in().await;
    in_project(&mut h, &["a"]).await;
    let Harness {
        mut app,
        api,
        peer,
        mut peers,
        ..
    } = h;

    drop(peer);
    assert!(matches!(
        app.next_event().await,
        Some(AppEvent::Connection(_))
    ));
    api.state().files.get_mut(&FileId::new("a")).unwrap().content = Some("x=2".into());
    api.set_latency("get_file", Duration::from_millis(300));

    let peer = peers.recv().await.unwrap();
    assert!(peer.push(connected("s-local-2")));

    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    let deadline = tokio::time::sleep(Duration::from_secs(3));
    tokio::pin!(deadline);
    let reconnected = loop {
        let inbound = tokio::select! {
            _ = &mut deadline => break false,
            _ = ticker.tick() => {
                app.tick(std::time::Instant::now());
                continue;
            }
            inbound = app.recv() => inbound.unwrap(),
        };
        if let AppEvent::Connection(ConnectionState::Connected { connection_id }) =
            app.dispatch(inbound).await
        {
            break connection_id == ConnectionId::new("s-local-2");
        }
    };

    assert!(reconnected);
    let active = app.room().unwrap().workspace().active_buffer().unwrap();
    assert_eq!(active.content(), "x=2");
    assert!(!active.is_stale());
}

#[test_timeout::tokio_timeout_test]
async fn a_dropped_connection_id_is_not_reused_by_new_rooms() {
    let Harness {
        mut app,
        peer,
        mut peers,
        ..
    } = signed_in().await;

    drop(peer);
    assert!(matches!(
        app.next_event().await,
        Some(AppEvent::Connection(_))
    ));
    let room = app.enter_project(&ProjectId::new("p1")).await.unwrap();
    assert_eq!(room.connection_id(), None);

    let mut peer = peers.recv().await.unwrap();
    assert!(peer.push(connected("s-local-2")));
    assert!(matches!(
        app.next_event().await,
        Some(AppEvent::Connection(ConnectionState::Connected { .. }))
    ));
    assert_eq!(
        app.room().unwrap().connection_id(),
        Some(&ConnectionId::new("s-local-2"))
    );
    next_named(&mut peer, "join_project").await;
}

#[test_timeout::tokio_timeout_test]
async fn logout_delivers_leave_events_before_closing() {
    let mut h = signed_in().await;
    in_project(&mut h, &[]).await;
    h.app.logout().await.unwrap();

    let mut names = Vec::new();
    while let Some(raw) = h.peer.next_frame().await {
        names.push(decode_client_event(&raw).unwrap().name());
    }
    let leave_project = names.iter().position(|name| *name == "leave_project");
    let leave_chat = names.iter().position(|name| *name == "leave");
    assert!(leave_project.is_some(), "frames: {names:?}");
    assert!(leave_chat > leave_project, "frames: {names:?}");
}
