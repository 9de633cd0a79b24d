//! Mode assembly: server, client and standalone states plus save/load
//! orchestration.
//!
//! Every mode follows the same cycle: read the network (where there is
//! one), feed the chunk loader under its budget, advance the fixed-tick
//! simulation, write the network, and on the way out switch into an
//! unload state that flushes dirty chunks and player records before the
//! process ends.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use hollow_net::client::Client;
use hollow_net::server::{Server, ServerConfig};
use hollow_shared::constants::CHUNK_IO_BUDGET;
use hollow_shared::math::Vec3;
use hollow_world::block_type::default_registry;
use hollow_world::loader::ChunkLoader;
use hollow_world::save::{PlayerRecord, WorldConf, WorldSave};
use hollow_world::world::{World, WorldConfig};

use crate::command::{CommandBuffer, CommandInterpreter, CommandResult};
use crate::runtime::{Config, Mode};
use crate::states::{Process, RunLimits, State, StateControl};

/// Message class used for command lines and their replies.
pub const MESSAGE_TYPE_COMMAND: u8 = 1;

/// Chunk cache budget for the client, per tick.
const CLIENT_CACHE_BUDGET: usize = 10;

/// Ticks the unload state waits on stubborn save errors before giving up.
const UNLOAD_PATIENCE_TICKS: u32 = 600;

/// Errors that end the process.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad configuration or unreadable world; exit code 1.
    #[error("configuration: {0}")]
    Config(String),
    /// Runtime failure; exit code 2.
    #[error("runtime: {0}")]
    Runtime(String),
}

impl AppError {
    /// The process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Runtime(_) => 2,
        }
    }
}

/// Source of player input each tick; windowing glue implements this.
pub trait ClientController {
    /// Desired movement, each axis in [-1, 1].
    fn movement(&mut self) -> Vec3 {
        Vec3::ZERO
    }
    /// Action bits for the current tick.
    fn actions(&mut self) -> u8 {
        0
    }
}

/// Headless controller: stands perfectly still.
#[derive(Default)]
pub struct NullController;

impl ClientController for NullController {}

/// Opens (or creates) the world save and builds the world around it.
fn open_world(config: &Config) -> Result<(World, ChunkLoader), AppError> {
    let path: PathBuf = config.world_save_path();
    let save = WorldSave::new(path);

    let conf = if save.exists() {
        // an existing world that cannot be read is not safe to run
        save.read_world_conf()
            .map_err(|err| AppError::Config(format!("world '{}': {err}", config.world_name)))?
    } else {
        let conf = WorldConf {
            spawn: hollow_shared::math::IVec3::ZERO,
            seed: config.seed.unwrap_or(0),
        };
        save.write_world_conf(&conf)
            .map_err(|err| AppError::Runtime(format!("cannot create save: {err}")))?;
        conf
    };

    let seed = config.seed.unwrap_or(conf.seed);
    let world = World::new(
        Arc::new(default_registry()),
        WorldConfig {
            name: config.world_name.clone(),
            spawn: conf.spawn,
            seed,
            ..WorldConfig::default()
        },
    );
    Ok((world, ChunkLoader::new(save)))
}

/// Runs the configured mode to completion.
pub fn run(config: Config) -> Result<(), AppError> {
    let limits = RunLimits {
        frame_limit: config.frame_limit,
        time_limit: config.time_limit,
    };
    let state: Box<dyn State> = match config.mode {
        Mode::Server => Box::new(ServerState::new(config)?),
        Mode::Client => Box::new(ClientState::new(config)?),
        Mode::Standalone => Box::new(StandaloneState::new(config)?),
    };
    Process::new(state).run(limits);
    Ok(())
}

// ----------------------------------------------------------------------
// unload

/// Flushes dirty chunks and player records, budgeted, then pops.
pub struct UnloadState {
    world: World,
    loader: ChunkLoader,
    players_saved: bool,
    patience: u32,
}

impl UnloadState {
    fn new(world: World, loader: ChunkLoader) -> Self {
        Self {
            world,
            loader,
            players_saved: false,
            patience: UNLOAD_PATIENCE_TICKS,
        }
    }
}

impl State for UnloadState {
    fn on_enter(&mut self) {
        info!("saving world");
    }

    fn update(&mut self, ctl: &mut StateControl, _dt: i32) {
        if !self.players_saved {
            let players: Vec<_> = self.world.players().to_vec();
            for player in players {
                let Some(entity) = self.world.entity(player.entity) else {
                    continue;
                };
                let record = PlayerRecord {
                    chunk: entity.state.pos.chunk,
                    position: entity.state.pos.block,
                    orientation: entity.state.orient,
                    pitch: entity.state.pitch,
                    yaw: entity.state.yaw,
                    slot: player.inventory_slot,
                };
                let name = entity.name().to_string();
                if let Err(err) = self.loader.save().write_player(&name, &record) {
                    error!("failed to save player {name}: {err}");
                }
            }
            self.players_saved = true;
        }

        self.world.store_chunks(&self.loader, CHUNK_IO_BUDGET);
        self.patience = self.patience.saturating_sub(1);
        if !self.world.has_unsaved_chunks() || self.patience == 0 {
            if self.patience == 0 {
                error!("giving up on unsavable chunks");
            }
            ctl.pop();
        }
    }

    fn handle_quit(&mut self, _ctl: &mut StateControl) {
        // already on the way out; finish the flush first
    }
}

// ----------------------------------------------------------------------
// server

struct ServerInner {
    world: World,
    loader: ChunkLoader,
    server: Server,
    interpreter: CommandInterpreter,
    commands: CommandBuffer,
}

/// Headless authoritative server.
pub struct ServerState {
    inner: Option<ServerInner>,
}

impl ServerState {
    /// Builds the server world and binds the socket.
    pub fn new(config: Config) -> Result<Self, AppError> {
        let (world, loader) = open_world(&config)?;
        let server = Server::bind(&ServerConfig { port: config.port })
            .map_err(|err| AppError::Runtime(format!("cannot bind server: {err}")))?;
        info!("serving world \"{}\"", config.world_name);
        Ok(Self {
            inner: Some(ServerInner {
                world,
                loader,
                server,
                interpreter: CommandInterpreter::new(),
                commands: CommandBuffer::new(),
            }),
        })
    }

    /// Producer handle for the operational command console.
    #[must_use]
    pub fn command_sender(&self) -> Option<crate::command::CommandSender> {
        self.inner.as_ref().map(|inner| inner.commands.sender())
    }
}

impl State for ServerState {
    fn update(&mut self, ctl: &mut StateControl, dt: i32) {
        let Some(inner) = self.inner.as_mut() else {
            ctl.pop();
            return;
        };

        inner.server.handle(&mut inner.world, inner.loader.save());

        if let Err(err) = inner.world.load_chunks(&inner.loader, CHUNK_IO_BUDGET) {
            // unreadable save data mid-run; report and carry on with
            // generation next tick
            error!("chunk load failed: {err}");
        }

        inner.world.update(dt);
        inner
            .server
            .update(dt, &mut inner.world, inner.loader.save());
        inner.world.store_chunks(&inner.loader, CHUNK_IO_BUDGET);

        // player commands from the wire
        for msg in inner.server.drain_messages() {
            if msg.msg_type != MESSAGE_TYPE_COMMAND {
                continue;
            }
            let result = inner
                .interpreter
                .execute(&mut inner.world, msg.entity, &msg.text);
            match &result {
                CommandResult::Broadcast(_) => {
                    if let Some(text) = result.render() {
                        inner
                            .server
                            .broadcast_message(msg.entity, MESSAGE_TYPE_COMMAND, &text);
                    }
                }
                _ => {
                    if let Some(text) = result.render() {
                        inner
                            .server
                            .send_message(msg.entity, MESSAGE_TYPE_COMMAND, &text);
                    }
                }
            }
        }

        // queued console commands, committed at the tick boundary
        for (player, line) in inner.commands.drain() {
            let result = inner.interpreter.execute(&mut inner.world, player, &line);
            if let Some(text) = result.render() {
                println!("{text}");
            }
        }
    }

    fn handle_quit(&mut self, ctl: &mut StateControl) {
        if let Some(inner) = self.inner.take() {
            drop(inner.server);
            ctl.switch(Box::new(UnloadState::new(inner.world, inner.loader)));
        } else {
            ctl.pop_all();
        }
    }
}

// ----------------------------------------------------------------------
// client

enum ClientPhase {
    /// Waiting for the join answer.
    Connecting,
    /// In the world.
    Playing,
    /// Terminal message, then exit.
    Message(String),
}

struct ClientInner {
    world: World,
    client: Client,
    cache: Option<ChunkLoader>,
    controller: Box<dyn ClientController>,
    phase: ClientPhase,
    config: Config,
}

/// Networked client session.
pub struct ClientState {
    inner: Option<ClientInner>,
}

impl ClientState {
    /// Resolves the server and starts the login handshake.
    pub fn new(config: Config) -> Result<Self, AppError> {
        let world = World::new(
            Arc::new(default_registry()),
            WorldConfig {
                name: config.world_name.clone(),
                ..WorldConfig::default()
            },
        );
        let mut client = Client::connect(&config.host, config.port)
            .map_err(|err| AppError::Runtime(format!("cannot reach server: {err}")))?;
        client.send_login(&config.player_name);
        info!(
            "logging in to {}:{} as \"{}\"",
            config.host, config.port, config.player_name
        );
        Ok(Self {
            inner: Some(ClientInner {
                world,
                client,
                cache: None,
                controller: Box::new(NullController),
                phase: ClientPhase::Connecting,
                config,
            }),
        })
    }

    /// Replaces the input source; display glue calls this.
    pub fn set_controller(&mut self, controller: Box<dyn ClientController>) {
        if let Some(inner) = self.inner.as_mut() {
            inner.controller = controller;
        }
    }
}

impl State for ClientState {
    fn update(&mut self, ctl: &mut StateControl, dt: i32) {
        let Some(inner) = self.inner.as_mut() else {
            ctl.pop();
            return;
        };

        inner.client.handle(&mut inner.world);

        if matches!(inner.phase, ClientPhase::Connecting) {
            if inner.client.player_entity().is_some() {
                // received chunks cache under the server's world name
                let world_name = inner
                    .client
                    .world_name()
                    .unwrap_or(&inner.config.world_name)
                    .to_string();
                let cache_path = std::path::Path::new(&inner.config.save_path)
                    .join("cache")
                    .join(format!("{}-{}", inner.config.host, world_name));
                inner.cache = Some(ChunkLoader::new(WorldSave::new(cache_path)));
                inner.phase = ClientPhase::Playing;
            } else if inner.client.rejected() {
                inner.phase = ClientPhase::Message(String::from("login rejected"));
            } else if inner.client.timed_out() {
                inner.phase = ClientPhase::Message(String::from("connection timed out"));
            }
        } else if matches!(inner.phase, ClientPhase::Playing) {
            if inner.client.timed_out() {
                inner.phase = ClientPhase::Message(String::from("connection timed out"));
            } else {
                // drive the local player, predictively
                let movement = inner.controller.movement();
                let actions = inner.controller.actions();
                if let Some(id) = inner.client.player_entity() {
                    if let Some(entity) = inner.world.entity_mut(id) {
                        let speed = 4.0;
                        entity.target_velocity =
                            entity.state.orient.rotate(movement.limited(1.0)) * speed;
                    }
                }
                inner.world.update(dt);

                let slot = inner
                    .world
                    .players()
                    .first()
                    .map_or(0, |p| p.inventory_slot);
                inner
                    .client
                    .push_player_update(&inner.world, dt, movement, actions, slot);

                for message in inner.client.drain_messages() {
                    println!("{}", message.text);
                }

                if let Some(cache) = &inner.cache {
                    if let Err(err) = inner.world.load_chunks(cache, CLIENT_CACHE_BUDGET) {
                        error!("chunk cache read failed: {err}");
                    }
                    inner.world.store_chunks(cache, CLIENT_CACHE_BUDGET);
                }
            }
        } else {
            if let ClientPhase::Message(text) = &inner.phase {
                println!("{text}");
            }
            ctl.pop();
            return;
        }

        inner.client.update(dt);
    }

    fn handle_quit(&mut self, ctl: &mut StateControl) {
        if let Some(mut inner) = self.inner.take() {
            inner.client.send_part();
            match inner.cache {
                Some(cache) => ctl.switch(Box::new(UnloadState::new(inner.world, cache))),
                None => ctl.pop_all(),
            }
        } else {
            ctl.pop_all();
        }
    }
}

// ----------------------------------------------------------------------
// standalone

struct StandaloneInner {
    world: World,
    loader: ChunkLoader,
    interpreter: CommandInterpreter,
    commands: CommandBuffer,
    player: u32,
}

/// Local world without sockets.
pub struct StandaloneState {
    inner: Option<StandaloneInner>,
}

impl StandaloneState {
    /// Builds the world and spawns the local player.
    pub fn new(config: Config) -> Result<Self, AppError> {
        let (mut world, loader) = open_world(&config)?;
        let player = world
            .add_player(&config.player_name)
            .ok_or_else(|| AppError::Config(String::from("player name unavailable")))?;

        if loader.save().player_exists(&config.player_name) {
            match loader.save().read_player(&config.player_name) {
                Ok(record) => {
                    if let Some(e) = world.entity_mut(player.entity) {
                        e.state.pos = hollow_shared::location::ExactLocation::new(
                            record.chunk,
                            record.position,
                        )
                        .sanitize();
                        e.state.orient = record.orientation;
                        e.state.pitch = record.pitch;
                        e.state.yaw = record.yaw;
                    }
                }
                Err(err) => {
                    return Err(AppError::Config(format!("player file: {err}")));
                }
            }
        }

        info!("standalone world \"{}\"", config.world_name);
        Ok(Self {
            inner: Some(StandaloneInner {
                world,
                loader,
                interpreter: CommandInterpreter::new(),
                commands: CommandBuffer::new(),
                player: player.entity,
            }),
        })
    }

    /// Producer handle for the command console.
    #[must_use]
    pub fn command_sender(&self) -> Option<crate::command::CommandSender> {
        self.inner.as_ref().map(|inner| inner.commands.sender())
    }
}

impl State for StandaloneState {
    fn update(&mut self, ctl: &mut StateControl, dt: i32) {
        let Some(inner) = self.inner.as_mut() else {
            ctl.pop();
            return;
        };

        if let Err(err) = inner.world.load_chunks(&inner.loader, CHUNK_IO_BUDGET) {
            error!("chunk load failed: {err}");
        }
        inner.world.update(dt);
        inner.world.store_chunks(&inner.loader, CHUNK_IO_BUDGET);

        let player = inner.player;
        for (issuer, line) in inner.commands.drain() {
            let issuer = if issuer == 0 { player } else { issuer };
            let result = inner.interpreter.execute(&mut inner.world, issuer, &line);
            if let Some(text) = result.render() {
                println!("{text}");
            }
        }
    }

    fn handle_quit(&mut self, ctl: &mut StateControl) {
        if let Some(inner) = self.inner.take() {
            ctl.switch(Box::new(UnloadState::new(inner.world, inner.loader)));
        } else {
            ctl.pop_all();
        }
    }
}
