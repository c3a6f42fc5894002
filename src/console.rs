//! Operator console
//!
//! Line-oriented local control for the station operator: grant and revoke control, inspect
//! clients and positions, and drive the actuators directly. Console actions are local and
//! skip the grant check.
//!
//! Movement commands go through the station's request queue and return at once, so
//! `stop` is always read and acted on while earlier motions are still waiting.

use crate::control::{ActuatorGroup, ServoAxis, ServoMotion};
use crate::error::{RigError, RigResult};
use crate::rig::Station;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

const HELP: &str = "\
Commands:
  grant <name>              give control to a connected client
  revoke                    withdraw control
  clients                   list connected clients
  status                    station status as JSON
  stage <position>          move the stage to an absolute position
  lens                      rotate the turret to the next lens
  stop <stage|turret>       cancel the running motion
  zoom <level>              set the digital zoom
  brightness <value>        set the LED brightness
  pan <left|right>          step the pan servo
  tilt <forward|backward>   step the tilt servo
  help                      show this text
  quit                      stop the station";

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Grant(String),
    Revoke,
    Clients,
    Status,
    Stage(i64),
    Lens,
    Stop(ActuatorGroup),
    Zoom(i64),
    Brightness(i64),
    Pan(ServoMotion),
    Tilt(ServoMotion),
    Help,
    Quit,
}

fn integer(verb: &str, arg: Option<&str>) -> RigResult<i64> {
    let raw = arg.ok_or_else(|| RigError::CommandMalformed(format!("{verb} needs a value")))?;
    raw.parse()
        .map_err(|_| RigError::CommandMalformed(format!("{verb} {raw}")))
}

impl FromStr for ConsoleCommand {
    type Err = RigError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let arg = words.next();

        let command = match verb.as_str() {
            "grant" => ConsoleCommand::Grant(
                arg.ok_or_else(|| RigError::CommandMalformed("grant needs a name".into()))?
                    .to_string(),
            ),
            "revoke" => ConsoleCommand::Revoke,
            "clients" => ConsoleCommand::Clients,
            "status" => ConsoleCommand::Status,
            "stage" => ConsoleCommand::Stage(integer("stage", arg)?),
            "lens" => ConsoleCommand::Lens,
            "stop" => {
                let group = arg
                    .and_then(ActuatorGroup::parse)
                    .ok_or_else(|| RigError::CommandMalformed("stop needs a group".into()))?;
                ConsoleCommand::Stop(group)
            }
            "zoom" => ConsoleCommand::Zoom(integer("zoom", arg)?),
            "brightness" => ConsoleCommand::Brightness(integer("brightness", arg)?),
            "pan" => match arg {
                Some("left") => ConsoleCommand::Pan(ServoMotion::Increase),
                Some("right") => ConsoleCommand::Pan(ServoMotion::Decrease),
                _ => return Err(RigError::CommandMalformed("pan <left|right>".into())),
            },
            "tilt" => match arg {
                Some("forward") => ConsoleCommand::Tilt(ServoMotion::Increase),
                Some("backward") => ConsoleCommand::Tilt(ServoMotion::Decrease),
                _ => return Err(RigError::CommandMalformed("tilt <forward|backward>".into())),
            },
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(RigError::CommandUnsupported(other.to_string())),
        };
        Ok(command)
    }
}

/// Execute one console command and return the text to print
pub async fn execute(station: &Station, command: ConsoleCommand) -> RigResult<String> {
    let actuators = station.actuators();
    let queue = station.request_queue();
    let requests = station.requests();
    let positions = actuators.positions();

    let reply = match command {
        ConsoleCommand::Grant(name) => {
            let connected = station.registry().is_connected(&name).await;
            station.registry().grant(name.clone()).await;
            info!(grantee = %name, "Control granted");
            if connected {
                format!("{name} now has control")
            } else {
                format!("{name} now has control (not connected)")
            }
        }
        ConsoleCommand::Revoke => match station.registry().revoke().await {
            Some(previous) => {
                info!(%previous, "Control revoked");
                format!("control revoked from {previous}")
            }
            None => "nobody had control".to_string(),
        },
        ConsoleCommand::Clients => {
            let clients = station.registry().clients().await;
            if clients.is_empty() {
                "no clients connected".to_string()
            } else {
                let grantee = station.registry().current_grantee().await;
                clients
                    .iter()
                    .map(|c| {
                        let marker = if grantee.as_deref() == Some(c.name.as_str()) {
                            " *"
                        } else {
                            ""
                        };
                        format!("{} {} since {}{marker}", c.name, c.address, c.connected_at)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        ConsoleCommand::Status => serde_json::to_string_pretty(&station.status().await)
            .map_err(|e| RigError::Configuration(e.to_string()))?,
        ConsoleCommand::Stage(target) => {
            queue.enqueue(requests.stage_to(target, &positions))?;
            format!("stage moving to {target}")
        }
        ConsoleCommand::Lens => {
            queue.enqueue(requests.lens_change(&positions))?;
            format!("turret leaving lens {}", positions.lens)
        }
        ConsoleCommand::Stop(group) => {
            if actuators.stop(group) {
                format!("{group} stopping")
            } else {
                format!("{group} is not running")
            }
        }
        ConsoleCommand::Zoom(level) => {
            let applied = station.source().set_zoom(level);
            format!("zoom {applied}")
        }
        ConsoleCommand::Brightness(value) => {
            queue.enqueue(requests.brightness(value, &positions))?;
            format!("brightness {}", requests.clamp_brightness(value))
        }
        ConsoleCommand::Pan(motion) => {
            queue.enqueue(requests.servo(ServoAxis::Pan, motion, &positions))?;
            "pan queued".to_string()
        }
        ConsoleCommand::Tilt(motion) => {
            queue.enqueue(requests.servo(ServoAxis::Tilt, motion, &positions))?;
            "tilt queued".to_string()
        }
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Quit => "bye".to_string(),
    };
    Ok(reply)
}

/// Read commands line by line until `quit` or end of input
pub async fn run<R, W>(station: &Station, input: R, mut output: W) -> RigResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Quit) => break,
            Ok(command) => match execute(station, command).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, "Console command failed");
                    format!("error: {e}")
                }
            },
            Err(e) => format!("error: {e} (try 'help')"),
        };

        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(())
}
