//! Command-line parsing and the process-wide runtime configuration.
//!
//! Both the client and the server share one argument parser. Exit codes:
//! 0 success, 1 invalid arguments or configuration, 2 runtime error.

use hollow_shared::constants::{DEFAULT_CMD_PORT, DEFAULT_PORT};

use crate::settings::Settings;

/// What the process should run as.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Local world, no sockets.
    #[default]
    Standalone,
    /// Headless authoritative server.
    Server,
    /// Networked client.
    Client,
}

/// Parsed process configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Run mode.
    pub mode: Mode,
    /// Double buffering; display glue reads it.
    pub doublebuf: bool,
    /// Multisampling level; display glue reads it.
    pub multisampling: u32,
    /// Run this many frames, then exit.
    pub frame_limit: Option<u64>,
    /// Run this many milliseconds, then exit.
    pub time_limit: Option<i64>,
    /// Generator seed override.
    pub seed: Option<u64>,
    /// Vertical sync; display glue reads it.
    pub vsync: bool,
    /// Keyboard input enabled.
    pub keyboard: bool,
    /// Mouse input enabled.
    pub mouse: bool,
    /// HUD rendering enabled.
    pub hud: bool,
    /// Audio enabled.
    pub audio: bool,
    /// Asset directory.
    pub asset_path: String,
    /// Save directory holding one subdirectory per world.
    pub save_path: String,
    /// World to load or create.
    pub world_name: String,
    /// Server host to connect to (client mode).
    pub host: String,
    /// UDP game port.
    pub port: u16,
    /// TCP command console port.
    pub cmd_port: u16,
    /// Player name to log in under.
    pub player_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Standalone,
            doublebuf: true,
            multisampling: 1,
            frame_limit: None,
            time_limit: None,
            seed: None,
            vsync: true,
            keyboard: true,
            mouse: true,
            hud: true,
            audio: true,
            asset_path: String::from("assets"),
            save_path: String::from("saves"),
            world_name: String::from("default"),
            host: String::from("localhost"),
            port: DEFAULT_PORT,
            cmd_port: DEFAULT_CMD_PORT,
            player_name: String::from("default"),
        }
    }
}

impl Config {
    /// Applies settings-file defaults under the hard-coded ones.
    #[must_use]
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        if let Some(host) = &settings.host {
            self.host = host.clone();
        }
        if let Some(port) = settings.port {
            self.port = port;
        }
        if let Some(cmd_port) = settings.cmd_port {
            self.cmd_port = cmd_port;
        }
        if let Some(save_path) = &settings.save_path {
            self.save_path = save_path.clone();
        }
        if let Some(asset_path) = &settings.asset_path {
            self.asset_path = asset_path.clone();
        }
        if let Some(world_name) = &settings.world_name {
            self.world_name = world_name.clone();
        }
        if let Some(player_name) = &settings.player_name {
            self.player_name = player_name.clone();
        }
        self
    }

    /// Path of this configuration's world save directory.
    #[must_use]
    pub fn world_save_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.save_path).join(&self.world_name)
    }
}

/// Argument error with the offending token.
#[derive(Debug, PartialEq, Eq)]
pub struct ArgError(pub String);

impl std::fmt::Display for ArgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid arguments: {}", self.0)
    }
}

fn take_value<'a>(
    args: &mut impl Iterator<Item = &'a str>,
    opt: &str,
) -> Result<&'a str, ArgError> {
    args.next()
        .ok_or_else(|| ArgError(format!("missing argument to {opt}")))
}

fn parse_num<T: std::str::FromStr>(value: &str, opt: &str) -> Result<T, ArgError> {
    value
        .parse()
        .map_err(|_| ArgError(format!("bad number for {opt}: {value}")))
}

/// Parses command-line arguments over a base configuration.
pub fn parse_args(base: Config, args: &[String]) -> Result<Config, ArgError> {
    let mut config = base;
    let mut iter = args.iter().map(String::as_str);

    while let Some(arg) = iter.next() {
        match arg {
            // long options
            "--server" => config.mode = Mode::Server,
            "--client" => config.mode = Mode::Client,
            "--no-vsync" => config.vsync = false,
            "--no-keyboard" => config.keyboard = false,
            "--no-mouse" => config.mouse = false,
            "--no-hud" => config.hud = false,
            "--no-audio" => config.audio = false,
            "--asset-path" => config.asset_path = take_value(&mut iter, arg)?.to_string(),
            "--save-path" => config.save_path = take_value(&mut iter, arg)?.to_string(),
            "--world-name" => config.world_name = take_value(&mut iter, arg)?.to_string(),
            "--host" => config.host = take_value(&mut iter, arg)?.to_string(),
            "--port" => config.port = parse_num(take_value(&mut iter, arg)?, arg)?,
            "--cmd-port" => config.cmd_port = parse_num(take_value(&mut iter, arg)?, arg)?,
            "--player-name" => config.player_name = take_value(&mut iter, arg)?.to_string(),
            // bundled short options
            _ if arg.starts_with('-') && arg.len() > 1 && !arg.starts_with("--") => {
                let mut flags = arg[1..].chars().peekable();
                while let Some(flag) = flags.next() {
                    match flag {
                        'd' => config.doublebuf = false,
                        'm' => {
                            if flags.peek().is_some() {
                                return Err(ArgError(format!("-m must end the bundle: {arg}")));
                            }
                            config.multisampling = parse_num(take_value(&mut iter, "-m")?, "-m")?;
                        }
                        'n' => {
                            if flags.peek().is_some() {
                                return Err(ArgError(format!("-n must end the bundle: {arg}")));
                            }
                            config.frame_limit =
                                Some(parse_num(take_value(&mut iter, "-n")?, "-n")?);
                        }
                        's' => {
                            if flags.peek().is_some() {
                                return Err(ArgError(format!("-s must end the bundle: {arg}")));
                            }
                            config.seed = Some(parse_num(take_value(&mut iter, "-s")?, "-s")?);
                        }
                        't' => {
                            if flags.peek().is_some() {
                                return Err(ArgError(format!("-t must end the bundle: {arg}")));
                            }
                            config.time_limit =
                                Some(parse_num(take_value(&mut iter, "-t")?, "-t")?);
                        }
                        other => return Err(ArgError(format!("unknown option -{other}"))),
                    }
                }
            }
            other => return Err(ArgError(format!("unknown argument {other}"))),
        }
    }
    Ok(config)
}
