//! In-world text commands.
//!
//! One line per command: an identifier followed by arguments. Commands
//! run against the world at the tick boundary; responses are routed back
//! to the issuer (` > `), reported as errors (` ! `) or broadcast
//! (` @ `). The operational TCP console feeds the same interpreter
//! through a queued-command channel so it never touches world state
//! mid-tick.

use std::collections::HashMap;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use hollow_shared::location::ExactLocation;
use hollow_shared::math::Vec3;
use hollow_world::world::World;

/// Prefix for a reply to the issuing player.
pub const PREFIX_MESSAGE: &str = " > ";
/// Prefix for an error reply.
pub const PREFIX_ERROR: &str = " ! ";
/// Prefix for a broadcast to everyone.
pub const PREFIX_BROADCAST: &str = " @ ";

/// Outcome of one command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Nothing to say.
    Silent,
    /// Reply to the issuer.
    Message(String),
    /// Error reply to the issuer.
    Error(String),
    /// Tell everyone.
    Broadcast(String),
}

impl CommandResult {
    /// The wire text with its routing prefix, if any.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Silent => None,
            Self::Message(text) => Some(format!("{PREFIX_MESSAGE}{text}")),
            Self::Error(text) => Some(format!("{PREFIX_ERROR}{text}")),
            Self::Broadcast(text) => Some(format!("{PREFIX_BROADCAST}{text}")),
        }
    }
}

/// Whitespace tokenizer over one command line.
pub struct Args<'a> {
    rest: std::str::SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            rest: line.split_whitespace(),
        }
    }

    /// Next raw token.
    pub fn next_token(&mut self) -> Result<&'a str, String> {
        self.rest.next().ok_or_else(|| String::from("missing argument"))
    }

    /// Next token parsed as a float.
    pub fn next_float(&mut self) -> Result<f32, String> {
        let token = self.next_token()?;
        token
            .parse()
            .map_err(|_| format!("not a number: {token}"))
    }
}

/// One registered command.
pub trait Command {
    /// Executes against the world on behalf of a player entity.
    fn execute(&self, world: &mut World, player: u32, args: &mut Args<'_>)
        -> CommandResult;
}

/// Teleport: `tp x y z` in absolute world coordinates.
struct TeleportCommand;

impl Command for TeleportCommand {
    fn execute(&self, world: &mut World, player: u32, args: &mut Args<'_>) -> CommandResult {
        let coords = (|| -> Result<Vec3, String> {
            Ok(Vec3::new(args.next_float()?, args.next_float()?, args.next_float()?))
        })();
        let pos = match coords {
            Ok(pos) => pos,
            Err(err) => return CommandResult::Error(format!("tp: {err}")),
        };
        match world.entity_mut(player) {
            Some(entity) => {
                entity.state.pos = ExactLocation::from_absolute(pos).sanitize();
                entity.state.velocity = Vec3::ZERO;
                CommandResult::Message(format!("teleported to {} {} {}", pos.x, pos.y, pos.z))
            }
            None => CommandResult::Error(String::from("tp: no such player")),
        }
    }
}

/// Name-indexed command table.
pub struct CommandInterpreter {
    commands: HashMap<String, Box<dyn Command>>,
}

impl CommandInterpreter {
    /// Interpreter with the built-in commands.
    #[must_use]
    pub fn new() -> Self {
        let mut commands: HashMap<String, Box<dyn Command>> = HashMap::new();
        commands.insert(String::from("tp"), Box::new(TeleportCommand));
        Self { commands }
    }

    /// Registers an additional command.
    pub fn add_command(&mut self, name: impl Into<String>, command: Box<dyn Command>) {
        self.commands.insert(name.into(), command);
    }

    /// Runs one line on behalf of a player entity.
    pub fn execute(&self, world: &mut World, player: u32, line: &str) -> CommandResult {
        let mut args = Args::new(line);
        let name = match args.next_token() {
            Ok(name) => name,
            Err(_) => return CommandResult::Silent, // empty line
        };
        match self.commands.get(name) {
            Some(command) => command.execute(world, player, &mut args),
            None => CommandResult::Error(format!("{name}: command not found")),
        }
    }
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Queued command lines crossing into the tick from elsewhere (the TCP
/// console). Producers hold a [`CommandSender`]; the tick drains.
pub struct CommandBuffer {
    tx: Sender<(u32, String)>,
    rx: Receiver<(u32, String)>,
}

/// Cloneable producer half of a [`CommandBuffer`].
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<(u32, String)>,
}

impl CommandSender {
    /// Queues a line on behalf of a player entity (0 for the console).
    pub fn submit(&self, player: u32, line: impl Into<String>) {
        let _ = self.tx.send((player, line.into()));
    }
}

impl CommandBuffer {
    /// Fresh empty buffer.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// A handle for producers.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
        }
    }

    /// Drains everything queued since the last tick.
    pub fn drain(&self) -> Vec<(u32, String)> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(entry) => out.push(entry),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hollow_world::block_type::default_registry;
    use hollow_world::world::WorldConfig;
    use std::sync::Arc;

    fn world_with_player() -> (World, u32) {
        let mut world = World::new(Arc::new(default_registry()), WorldConfig::default());
        let player = world.add_player("cmd").unwrap();
        (world, player.entity)
    }

    #[test]
    fn test_tp_moves_player() {
        let (mut world, player) = world_with_player();
        let interp = CommandInterpreter::new();
        let result = interp.execute(&mut world, player, "tp 100 32 -40");
        assert!(matches!(result, CommandResult::Message(_)), "got {result:?}");

        let pos = world.entity(player).unwrap().state.pos;
        let abs = pos.absolute();
        assert!((abs.x - 100.0).abs() < 1e-3);
        assert!((abs.y - 32.0).abs() < 1e-3);
        assert!((abs.z + 40.0).abs() < 1e-3);
        // sanitized: block part in range
        for axis in 0..3 {
            assert!(pos.block[axis] >= 0.0 && pos.block[axis] < 16.0);
        }
    }

    #[test]
    fn test_tp_bad_args() {
        let (mut world, player) = world_with_player();
        let interp = CommandInterpreter::new();
        assert!(matches!(
            interp.execute(&mut world, player, "tp 1 2"),
            CommandResult::Error(_)
        ));
        assert!(matches!(
            interp.execute(&mut world, player, "tp a b c"),
            CommandResult::Error(_)
        ));
    }

    #[test]
    fn test_unknown_command() {
        let (mut world, player) = world_with_player();
        let interp = CommandInterpreter::new();
        let result = interp.execute(&mut world, player, "frobnicate now");
        assert_eq!(
            result,
            CommandResult::Error(String::from("frobnicate: command not found"))
        );
    }

    #[test]
    fn test_empty_line_is_silent() {
        let (mut world, player) = world_with_player();
        let interp = CommandInterpreter::new();
        assert_eq!(interp.execute(&mut world, player, "   "), CommandResult::Silent);
    }

    #[test]
    fn test_render_prefixes() {
        assert_eq!(
            CommandResult::Message("hi".into()).render().unwrap(),
            " > hi"
        );
        assert_eq!(CommandResult::Error("no".into()).render().unwrap(), " ! no");
        assert_eq!(
            CommandResult::Broadcast("all".into()).render().unwrap(),
            " @ all"
        );
        assert!(CommandResult::Silent.render().is_none());
    }

    #[test]
    fn test_command_buffer_queues_until_drain() {
        let buffer = CommandBuffer::new();
        let sender = buffer.sender();
        sender.submit(1, "tp 0 0 0");
        sender.submit(2, "say hi");
        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, 1);
        assert!(buffer.drain().is_empty());
    }
}
