//! End-to-end chat relay through two `Game` instances over loopback.

use skelanim::{ConsoleCommand, Game, Severity};
use skelanim_networking::{ConnectionState, NetworkConfig, NetworkContext};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

static CONTEXT: OnceLock<NetworkContext> = OnceLock::new();

fn context() -> &'static NetworkContext {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init()
        .ok();
    CONTEXT.get_or_init(|| NetworkContext::startup().unwrap())
}

fn run(game: &mut Game, line: &str) {
    let command = ConsoleCommand::parse(line).unwrap().unwrap();
    assert!(game.execute(command));
}

/// Updates every game until `done` holds or five seconds pass.
fn update_until(games: &mut [&mut Game], mut done: impl FnMut(&[&mut Game]) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        for game in games.iter_mut() {
            game.update();
        }
        if done(games) {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Starts a hosting game on a free port.
fn host() -> (Game, u16) {
    let mut host = Game::new(context(), NetworkConfig::default());
    run(&mut host, "Server port=0");
    assert!(host.chat_log().contains("Connection state: success(0)"));

    let deadline = Instant::now() + Duration::from_secs(5);
    while host.server().local_addr().is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    let port = host.server().local_addr().unwrap().port();
    (host, port)
}

#[test]
fn test_chat_relay_end_to_end() {
    let (mut host, port) = host();
    let mut guest = Game::new(context(), NetworkConfig::default());
    guest.set_client_id(42);

    run(&mut guest, &format!("Connect host=127.0.0.1 port={port}"));
    run(&mut host, &format!("Connect port={port}"));
    assert!(update_until(&mut [&mut host, &mut guest], |games| {
        games.iter().all(|game| game.client().state() == ConnectionState::Connected)
            && games[0].server().active_connections() == 2
    }));

    run(&mut guest, r#"Send message="hello there""#);
    assert!(update_until(&mut [&mut host, &mut guest], |games| {
        games
            .iter()
            .all(|game| game.chat_log().contains("[CHAT] doom42: hello there"))
    }));

    let host_log = host.chat_log();
    assert!(host_log.contains("[LOG] (CLIENT CHAT) doom42: hello there"));
    assert!(host_log
        .lines()
        .iter()
        .any(|line| line.severity == Severity::Chat));
    drop(host_log);

    let guest_log = guest.chat_log();
    assert!(guest_log.contains("> hello there"));
    assert!(guest_log.contains(&format!("Connecting to 127.0.0.1:{port}...")));
}

#[test]
fn test_send_rolls_client_id_once() {
    let mut game = Game::new(context(), NetworkConfig::default());
    assert_eq!(game.client_id(), None);

    run(&mut game, "Send");
    let id = game.client_id().unwrap();
    run(&mut game, "Send message=again");
    assert_eq!(game.client_id(), Some(id));
    assert!(game.chat_log().contains("> (empty)"));
    assert_eq!(game.client().pending_outbound(), 2);
}

#[test]
fn test_console_feedback() {
    let mut game = Game::new(context(), NetworkConfig::default());
    run(&mut game, "Controls");
    run(&mut game, "Disconnect");
    run(&mut game, "Stop");

    let log = game.chat_log();
    assert!(log.contains("Controls:"));
    assert!(log.contains("WASD - move"));
    assert!(log.contains("Disconnected!"));
    assert!(log.contains("Server stopped!"));
}

#[test]
fn test_second_server_reports_failure_code() {
    let (mut host, _port) = host();
    run(&mut host, "Server port=0");

    let log = host.chat_log();
    let last = log.lines().last().unwrap();
    assert_eq!(last.severity, Severity::Warning);
    assert!(last.text.starts_with("Connection state: "));
    assert!(last.text.ends_with("(-1)"));
}

#[test]
fn test_quit_stops_loop() {
    let mut game = Game::new(context(), NetworkConfig::default());
    assert!(!game.execute(ConsoleCommand::Quit));
}
