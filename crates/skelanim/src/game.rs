//! # Game Networking
//!
//! Owns one client and one server, wires the chat relay into both, and runs
//! console commands against them.
//!
//! ## Chat Relay
//!
//! ```text
//! Send ──▶ client ── MESSAGE(name, text) ──▶ server
//!                                              │ "[LOG] (CLIENT CHAT) name: text"
//! every client ◀── MESSAGE("name: text") ──────┘ broadcast
//!      │
//!      └─▶ "[CHAT] name: text"
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skelanim_networking::{
    NetResult, NetworkClient, NetworkConfig, NetworkContext, NetworkServer, Packet,
};
use std::cell::{Ref, RefCell};
use std::rc::Rc;

use crate::console::{ChatLog, ConsoleCommand, Severity};
use crate::protocol::PacketType;

/// Game-side owner of the networking layer.
pub struct Game {
    /// Keeps the subsystem up for the lifetime of the game.
    context: NetworkContext,
    client: NetworkClient,
    server: NetworkServer,
    /// Shared with the packet handlers.
    chat: Rc<RefCell<ChatLog>>,
    /// Defaults for `Connect` and `Server`.
    network: NetworkConfig,
    /// Rolled on the first `Send`.
    client_id: Option<u8>,
    rng: StdRng,
}

impl Game {
    /// Creates the client and server and registers the chat handlers.
    #[must_use]
    pub fn new(context: &NetworkContext, network: NetworkConfig) -> Self {
        let chat = Rc::new(RefCell::new(ChatLog::new()));
        let mut client = NetworkClient::new(context);
        let mut server = NetworkServer::new(context);

        let client_chat = Rc::clone(&chat);
        client.register_handler(PacketType::Message, move |packet: &mut Packet, _outbox| {
            let text = packet.read_string();
            client_chat
                .borrow_mut()
                .push(Severity::Chat, format!("[CHAT] {text}"));
        });

        let server_chat = Rc::clone(&chat);
        server.register_handler(PacketType::Message, move |outbox, _index, packet: &mut Packet| {
            let name = packet.read_string();
            let text = packet.read_string();
            server_chat
                .borrow_mut()
                .push(Severity::Chat, format!("[LOG] (CLIENT CHAT) {name}: {text}"));

            let mut relay = Packet::new(PacketType::Message);
            relay.write_string(&format!("{name}: {text}"));
            outbox.broadcast(&relay);
        });

        Self {
            context: context.clone(),
            client,
            server,
            chat,
            network,
            client_id: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Runs one frame of networking: client first, then server.
    pub fn update(&mut self) {
        self.client.tick();
        self.server.tick();
    }

    /// Runs a console command and logs its outcome.
    ///
    /// Returns false when the command asks the program to quit.
    pub fn execute(&mut self, command: ConsoleCommand) -> bool {
        match command {
            ConsoleCommand::Connect { host, port } => {
                let mut config = self.network.clone();
                if let Some(host) = host {
                    config.host = host;
                }
                if let Some(port) = port {
                    config.port = port;
                }
                self.log(format!("Connecting to {}:{}...", config.host, config.port));
                let result = self.client.create_client_with(&config);
                self.log_outcome(&result);
            }
            ConsoleCommand::Server { port } => {
                let mut config = self.network.clone();
                if let Some(port) = port {
                    config.port = port;
                }
                self.log(format!("Starting server on {}...", config.port));
                let result = self.server.create_server_with(&config);
                self.log_outcome(&result);
            }
            ConsoleCommand::Send { message } => self.send_chat(&message),
            ConsoleCommand::Disconnect => {
                self.client.release_client();
                self.log("Disconnected!");
            }
            ConsoleCommand::Stop => {
                self.server.release_server();
                self.log("Server stopped!");
            }
            ConsoleCommand::Controls => {
                self.log("Controls:");
                self.log("WASD - move");
            }
            ConsoleCommand::Quit => return false,
        }
        true
    }

    /// Queues a chat line under this player's name.
    pub fn send_chat(&mut self, message: &str) {
        self.log(format!("> {message}"));

        let id = *self.client_id.get_or_insert_with(|| self.rng.gen());
        let mut packet = Packet::new(PacketType::Message);
        packet.write_string(&format!("doom{id}"));
        packet.write_string(message);
        self.client.send_to_server(packet);
    }

    /// Releases the client, then the server.
    pub fn shutdown(&mut self) {
        self.client.release_client();
        self.server.release_server();
    }

    /// Returns the console output so far.
    #[must_use]
    pub fn chat_log(&self) -> Ref<'_, ChatLog> {
        self.chat.borrow()
    }

    /// Returns the player id once one has been rolled.
    #[must_use]
    pub fn client_id(&self) -> Option<u8> {
        self.client_id
    }

    /// Fixes the player id instead of rolling one.
    pub fn set_client_id(&mut self, id: u8) {
        self.client_id = Some(id);
    }

    /// Returns the client.
    #[must_use]
    pub fn client(&self) -> &NetworkClient {
        &self.client
    }

    /// Returns the server.
    #[must_use]
    pub fn server(&self) -> &NetworkServer {
        &self.server
    }

    /// Returns the networking context handle.
    #[must_use]
    pub fn context(&self) -> &NetworkContext {
        &self.context
    }

    fn log(&self, text: impl Into<String>) {
        self.chat.borrow_mut().info(text);
    }

    fn log_outcome(&self, result: &NetResult<()>) {
        let (message, code) = match result {
            Ok(()) => ("success".to_owned(), 0),
            Err(err) => (err.to_string(), err.code()),
        };
        let severity = if result.is_ok() {
            Severity::Info
        } else {
            Severity::Warning
        };
        self.chat
            .borrow_mut()
            .push(severity, format!("Connection state: {message}({code})"));
    }
}

impl Drop for Game {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Game {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Game")
            .field("client", &self.client)
            .field("server", &self.server)
            .field("client_id", &self.client_id)
            .field("chat_lines", &self.chat.borrow().len())
            .finish_non_exhaustive()
    }
}
